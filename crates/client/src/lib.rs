pub mod net;

pub use net::{
    ClientConfig, ClientError, ConnectionState, Correction, LocalPrediction, MoveIntent, NetClient,
    PredictionConfig, ServerSession,
};
