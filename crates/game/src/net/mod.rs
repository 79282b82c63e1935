mod protocol;
mod stats;
mod transport;

pub use protocol::{
    CMD_CHAT, CMD_CONFIG, CMD_CONNECT, CMD_ERROR, CMD_GAME_STATE, CMD_MAP_CHANGE, CMD_PING,
    CMD_PLAYERS, CMD_PONG, CMD_POSITION, CMD_UDP_REGISTER, CMD_UDP_REGISTERED, DEFAULT_MAP_ID,
    DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, Message, PlayerEntry, ProtocolError,
};
pub use stats::NetworkStats;
pub use transport::{
    LineBuffer, MAX_FRAME_BYTES, READ_CHUNK, TcpConnector, TcpPoll, TcpTransport, UdpPoll,
    UdpTransport,
};
