use glam::Vec2;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::color::Rgb;

pub const DEFAULT_TCP_PORT: u16 = 7777;
pub const DEFAULT_UDP_PORT: u16 = 7778;
pub const DEFAULT_MAP_ID: &str = "default";

pub const CMD_CONNECT: &str = "CONNECT";
pub const CMD_CONFIG: &str = "CONFIG";
pub const CMD_PLAYERS: &str = "PLAYERS";
/// Older snapshot alias; decoded, never emitted.
pub const CMD_GAME_STATE: &str = "GAME_STATE";
pub const CMD_POSITION: &str = "POSITION";
pub const CMD_CHAT: &str = "CHAT";
pub const CMD_UDP_REGISTER: &str = "UDP_REGISTER";
pub const CMD_UDP_REGISTERED: &str = "UDP_REGISTERED";
pub const CMD_PING: &str = "PING";
pub const CMD_PONG: &str = "PONG";
pub const CMD_ERROR: &str = "ERROR";
pub const CMD_MAP_CHANGE: &str = "MAP_CHANGE";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("malformed {command} payload: {detail}")]
    Malformed { command: String, detail: String },
}

/// One player entry inside a roster snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEntry {
    pub id: String,
    pub name: String,
    pub color: Rgb,
    pub position: Vec2,
    pub map_id: String,
}

/// Every frame the protocol can carry, in either direction.
///
/// A frame is one newline-terminated line: an uppercase keyword,
/// optionally followed by a space and a JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Handshake request carrying the chosen identity.
    Connect { name: String, color: Rgb },
    /// Handshake acknowledgement assigning the session identity.
    Config {
        player_id: String,
        color: Rgb,
        map_id: Option<String>,
        token: Option<String>,
        position: Option<Vec2>,
    },
    /// Full roster snapshot; a known id missing from it means that
    /// player left.
    Players(Vec<PlayerEntry>),
    /// Single-player position report. The id is present server to
    /// client and omitted client to server.
    Position { id: Option<String>, position: Vec2 },
    Chat { sender: String, text: String },
    UdpRegister { id: String },
    UdpRegistered,
    Ping,
    Pong,
    /// Server-side failure report; the session stays up.
    Error { message: String },
    MapChange { map_id: String },
}

impl Message {
    /// Wire keyword for this message.
    pub fn command(&self) -> &'static str {
        match self {
            Message::Connect { .. } => CMD_CONNECT,
            Message::Config { .. } => CMD_CONFIG,
            Message::Players(_) => CMD_PLAYERS,
            Message::Position { .. } => CMD_POSITION,
            Message::Chat { .. } => CMD_CHAT,
            Message::UdpRegister { .. } => CMD_UDP_REGISTER,
            Message::UdpRegistered => CMD_UDP_REGISTERED,
            Message::Ping => CMD_PING,
            Message::Pong => CMD_PONG,
            Message::Error { .. } => CMD_ERROR,
            Message::MapChange { .. } => CMD_MAP_CHANGE,
        }
    }

    /// Encodes to one newline-terminated wire line.
    pub fn encode(&self) -> String {
        match self.payload() {
            Some(payload) => format!("{} {}\n", self.command(), payload),
            None => format!("{}\n", self.command()),
        }
    }

    fn payload(&self) -> Option<Value> {
        match self {
            Message::Connect { name, color } => Some(json!({
                "name": name,
                "color": color.to_hex(),
            })),
            Message::Config {
                player_id,
                color,
                map_id,
                token,
                position,
            } => {
                let mut object = Map::new();
                object.insert("playerId".to_string(), json!(player_id));
                object.insert("color".to_string(), json!(color.to_hex()));
                if let Some(map_id) = map_id {
                    object.insert("mapId".to_string(), json!(map_id));
                }
                if let Some(token) = token {
                    object.insert("token".to_string(), json!(token));
                }
                if let Some(position) = position {
                    object.insert("x".to_string(), json!(position.x));
                    object.insert("y".to_string(), json!(position.y));
                }
                Some(Value::Object(object))
            }
            Message::Players(entries) => Some(Value::Array(
                entries
                    .iter()
                    .map(|entry| {
                        json!({
                            "id": entry.id,
                            "name": entry.name,
                            "color": entry.color.to_hex(),
                            "x": entry.position.x,
                            "y": entry.position.y,
                            "mapId": entry.map_id,
                        })
                    })
                    .collect(),
            )),
            Message::Position { id, position } => {
                let mut object = Map::new();
                if let Some(id) = id {
                    object.insert("id".to_string(), json!(id));
                }
                object.insert("x".to_string(), json!(position.x));
                object.insert("y".to_string(), json!(position.y));
                Some(Value::Object(object))
            }
            Message::Chat { sender, text } => Some(json!({
                "sender": sender,
                "message": text,
            })),
            Message::UdpRegister { id } => Some(json!({ "id": id })),
            Message::Error { message } => Some(json!({ "message": message })),
            Message::MapChange { map_id } => Some(json!({ "mapId": map_id })),
            Message::UdpRegistered | Message::Ping | Message::Pong => None,
        }
    }

    /// Decodes one frame, trying the structured shape, then bare JSON
    /// objects naming their command in a `type` field, then the legacy
    /// colon/pipe shape. A failure never affects later frames.
    pub fn decode(frame: &str) -> Result<Message, ProtocolError> {
        let line = frame.trim();
        if line.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        if line.starts_with('{') {
            return decode_typed(line);
        }
        if let Some((keyword, payload)) = line.split_once(' ') {
            return match decode_structured(keyword, payload.trim()) {
                Ok(message) => Ok(message),
                Err(structured_err) => decode_legacy(line).map_err(|_| structured_err),
            };
        }
        decode_bare(line)
    }
}

fn decode_structured(command: &str, payload: &str) -> Result<Message, ProtocolError> {
    match command {
        // Payload-less keywords tolerate stray trailing text.
        CMD_PING => return Ok(Message::Ping),
        CMD_PONG => return Ok(Message::Pong),
        CMD_UDP_REGISTERED => return Ok(Message::UdpRegistered),
        CMD_CONNECT | CMD_CONFIG | CMD_PLAYERS | CMD_GAME_STATE | CMD_POSITION | CMD_CHAT
        | CMD_UDP_REGISTER | CMD_ERROR | CMD_MAP_CHANGE => {}
        other => return Err(ProtocolError::UnknownCommand(other.to_string())),
    }
    let value: Value = serde_json::from_str(payload).map_err(|err| ProtocolError::Malformed {
        command: command.to_string(),
        detail: err.to_string(),
    })?;
    decode_payload(command, value)
}

/// Bare JSON object lines carry their command in a `type` field.
fn decode_typed(line: &str) -> Result<Message, ProtocolError> {
    let value: Value = serde_json::from_str(line).map_err(|err| ProtocolError::Malformed {
        command: "<object>".to_string(),
        detail: err.to_string(),
    })?;
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(ProtocolError::Malformed {
            command: "<object>".to_string(),
            detail: "missing type field".to_string(),
        });
    };
    let kind = kind.to_string();
    // Typed PLAYERS wraps its roster in a `players` field rather than the
    // bare array the structured shape carries.
    if kind == CMD_PLAYERS {
        let raw: GameStatePayload = from_value(&kind, value)?;
        return Ok(Message::Players(collect_entries(raw.players)));
    }
    decode_payload(&kind, value)
}

fn decode_payload(command: &str, payload: Value) -> Result<Message, ProtocolError> {
    match command {
        CMD_CONNECT => {
            let raw: ConnectPayload = from_value(command, payload)?;
            Ok(Message::Connect {
                name: raw.name,
                color: Rgb::parse_lossy(&raw.color),
            })
        }
        CMD_CONFIG => {
            let raw: ConfigPayload = from_value(command, payload)?;
            let position = match (raw.x, raw.y) {
                (Some(x), Some(y)) => Some(Vec2::new(x, y)),
                _ => None,
            };
            Ok(Message::Config {
                player_id: raw.player_id,
                color: raw.color.as_deref().map_or(Rgb::RED, Rgb::parse_lossy),
                map_id: raw.map_id,
                token: raw.token,
                position,
            })
        }
        CMD_PLAYERS => {
            let raw: Vec<Value> = from_value(command, payload)?;
            Ok(Message::Players(collect_entries(raw)))
        }
        CMD_GAME_STATE => {
            let raw: GameStatePayload = from_value(command, payload)?;
            Ok(Message::Players(collect_entries(raw.players)))
        }
        CMD_POSITION => {
            let raw: PositionPayload = from_value(command, payload)?;
            Ok(Message::Position {
                id: raw.id,
                position: Vec2::new(raw.x, raw.y),
            })
        }
        CMD_CHAT => {
            let raw: ChatPayload = from_value(command, payload)?;
            Ok(Message::Chat {
                sender: raw.sender,
                text: raw.message,
            })
        }
        CMD_UDP_REGISTER => {
            let raw: UdpRegisterPayload = from_value(command, payload)?;
            Ok(Message::UdpRegister { id: raw.id })
        }
        CMD_ERROR => {
            let raw: ErrorPayload = from_value(command, payload)?;
            Ok(Message::Error {
                message: raw.message,
            })
        }
        CMD_MAP_CHANGE => {
            let raw: MapChangePayload = from_value(command, payload)?;
            Ok(Message::MapChange { map_id: raw.map_id })
        }
        CMD_PING => Ok(Message::Ping),
        CMD_PONG => Ok(Message::Pong),
        CMD_UDP_REGISTERED => Ok(Message::UdpRegistered),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

/// Legacy colon/pipe shape kept for older servers.
fn decode_legacy(line: &str) -> Result<Message, ProtocolError> {
    if let Some(rest) = line.strip_prefix("CONFIG:") {
        let Some((id, color)) = rest.split_once(':') else {
            return Err(legacy_malformed(CMD_CONFIG, "expected id and color"));
        };
        if id.is_empty() {
            return Err(legacy_malformed(CMD_CONFIG, "empty id"));
        }
        return Ok(Message::Config {
            player_id: id.to_string(),
            color: Rgb::parse_lossy(color),
            map_id: None,
            token: None,
            position: None,
        });
    }
    if let Some(rest) = line.strip_prefix("POSITION:") {
        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() != 3 || parts[0].is_empty() {
            return Err(legacy_malformed(CMD_POSITION, "expected id, x and y"));
        }
        let (Ok(x), Ok(y)) = (parts[1].parse::<f32>(), parts[2].parse::<f32>()) else {
            return Err(legacy_malformed(CMD_POSITION, "bad coordinates"));
        };
        return Ok(Message::Position {
            id: Some(parts[0].to_string()),
            position: Vec2::new(x, y),
        });
    }
    if let Some(rest) = line.strip_prefix("PLAYERS:") {
        let mut entries = Vec::new();
        for chunk in rest.split('|') {
            let parts: Vec<&str> = chunk.split(':').collect();
            if parts.len() < 5 || parts[0].is_empty() {
                continue;
            }
            let (Ok(x), Ok(y)) = (parts[3].parse::<f32>(), parts[4].parse::<f32>()) else {
                continue;
            };
            entries.push(PlayerEntry {
                id: parts[0].to_string(),
                name: parts[1].to_string(),
                color: Rgb::parse_lossy(parts[2]),
                position: Vec2::new(x, y),
                map_id: DEFAULT_MAP_ID.to_string(),
            });
        }
        return Ok(Message::Players(entries));
    }
    if let Some(rest) = line.strip_prefix("CHAT:") {
        // The legacy form carries the already-joined display text.
        return Ok(Message::Chat {
            sender: String::new(),
            text: rest.to_string(),
        });
    }
    if line.starts_with(CMD_UDP_REGISTERED) {
        return Ok(Message::UdpRegistered);
    }
    let keyword = line.split(':').next().unwrap_or(line);
    Err(ProtocolError::UnknownCommand(keyword.to_string()))
}

fn decode_bare(line: &str) -> Result<Message, ProtocolError> {
    match line {
        CMD_PING => Ok(Message::Ping),
        CMD_PONG => Ok(Message::Pong),
        CMD_UDP_REGISTERED => Ok(Message::UdpRegistered),
        _ if line.contains(':') => decode_legacy(line),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

fn from_value<T: DeserializeOwned>(command: &str, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|err| ProtocolError::Malformed {
        command: command.to_string(),
        detail: err.to_string(),
    })
}

fn legacy_malformed(command: &str, detail: &str) -> ProtocolError {
    ProtocolError::Malformed {
        command: command.to_string(),
        detail: detail.to_string(),
    }
}

fn collect_entries(raw: Vec<Value>) -> Vec<PlayerEntry> {
    raw.into_iter()
        .filter_map(|entry| serde_json::from_value::<PlayerEntryPayload>(entry).ok())
        .map(PlayerEntry::from)
        .collect()
}

#[derive(Deserialize)]
struct ConnectPayload {
    name: String,
    #[serde(default)]
    color: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigPayload {
    player_id: String,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    map_id: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    x: Option<f32>,
    #[serde(default)]
    y: Option<f32>,
}

#[derive(Deserialize)]
struct GameStatePayload {
    #[serde(default)]
    players: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerEntryPayload {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    map_id: Option<String>,
}

impl From<PlayerEntryPayload> for PlayerEntry {
    fn from(raw: PlayerEntryPayload) -> Self {
        PlayerEntry {
            id: raw.id,
            name: raw.name,
            color: raw.color.as_deref().map_or(Rgb::RED, Rgb::parse_lossy),
            position: Vec2::new(raw.x, raw.y),
            map_id: raw.map_id.unwrap_or_else(|| DEFAULT_MAP_ID.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct PositionPayload {
    #[serde(default)]
    id: Option<String>,
    x: f32,
    y: f32,
}

#[derive(Deserialize)]
struct ChatPayload {
    #[serde(default)]
    sender: String,
    #[serde(default, alias = "text")]
    message: String,
}

#[derive(Deserialize)]
struct UdpRegisterPayload {
    id: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapChangePayload {
    #[serde(alias = "map_id")]
    map_id: String,
}
