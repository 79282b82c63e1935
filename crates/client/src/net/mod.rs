mod client;
mod config;
mod input;
mod prediction;

pub use client::{ClientError, ConnectionState, NetClient, ServerSession};
pub use config::{ClientConfig, PredictionConfig};
pub use input::MoveIntent;
pub use prediction::{Correction, LocalPrediction};
