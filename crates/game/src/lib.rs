pub mod chat;
pub mod color;
pub mod net;
pub mod roster;

pub use chat::ChatLog;
pub use color::Rgb;
pub use net::{
    DEFAULT_MAP_ID, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, LineBuffer, Message, NetworkStats,
    PlayerEntry, ProtocolError, TcpConnector, TcpPoll, TcpTransport, UdpPoll, UdpTransport,
};
pub use roster::{PositionOutcome, RemotePlayer, Roster, SnapshotOutcome};
