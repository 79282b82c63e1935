use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use glam::Vec2;

use plaza::{
    ChatLog, DEFAULT_MAP_ID, LineBuffer, Message, NetworkStats, PositionOutcome, Rgb, Roster,
    TcpConnector, TcpTransport, UdpTransport,
};

use super::config::ClientConfig;
use super::input::MoveIntent;
use super::prediction::{Correction, LocalPrediction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("a connection attempt is already active")]
    AlreadyActive,
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Identity the server assigned us in the handshake ack.
#[derive(Debug, Clone)]
pub struct ServerSession {
    pub player_id: String,
    /// Authoritative; may differ from the color we asked for.
    pub color: Rgb,
    pub token: Option<String>,
    pub map_id: String,
}

struct PendingHandshake {
    name: String,
    color: Rgb,
}

/// Connection supervisor. The host calls `update()` once per frame;
/// everything here is non-blocking and wall-clock driven.
pub struct NetClient {
    config: ClientConfig,
    state: ConnectionState,
    status: String,
    name: String,

    connector: Option<TcpConnector>,
    tcp: Option<TcpTransport>,
    /// Reassembles the reliable byte stream into frames across polls.
    line_buffer: LineBuffer,
    udp: Option<UdpTransport>,
    udp_port: u16,
    pending_handshake: Option<PendingHandshake>,
    connect_started: Option<Instant>,

    session: Option<ServerSession>,
    roster: Roster,
    chat: ChatLog,
    prediction: LocalPrediction,
    stats: NetworkStats,

    last_inbound: Instant,
    last_heartbeat: Instant,
    last_position_send: Instant,

    udp_registered: bool,
    registration_remaining: u32,
    next_registration: Option<Instant>,

    on_roster: Option<Box<dyn FnMut(&Roster)>>,
    on_correction: Option<Box<dyn FnMut(Correction)>>,
    roster_dirty: bool,
    pending_corrections: Vec<Correction>,
}

impl NetClient {
    pub fn new(config: ClientConfig) -> Self {
        let prediction = LocalPrediction::new(config.prediction.clone());
        Self {
            config,
            state: ConnectionState::Disconnected,
            status: "Disconnected".to_string(),
            name: String::new(),
            connector: None,
            tcp: None,
            line_buffer: LineBuffer::default(),
            udp: None,
            udp_port: 0,
            pending_handshake: None,
            connect_started: None,
            session: None,
            roster: Roster::default(),
            chat: ChatLog::default(),
            prediction,
            stats: NetworkStats::default(),
            last_inbound: Instant::now(),
            last_heartbeat: Instant::now(),
            last_position_send: Instant::now(),
            udp_registered: false,
            registration_remaining: 0,
            next_registration: None,
            on_roster: None,
            on_correction: None,
            roster_dirty: false,
            pending_corrections: Vec::new(),
        }
    }

    /// Starts a connection attempt. Name resolution and the TCP dial
    /// run on a helper thread; progress is observed via `update()`.
    pub fn connect(
        &mut self,
        host: &str,
        tcp_port: u16,
        udp_port: u16,
        name: &str,
        color: Rgb,
    ) -> Result<(), ClientError> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(ClientError::AlreadyActive);
        }
        self.teardown();
        let udp = match UdpTransport::bind() {
            Ok(udp) => udp,
            Err(err) => {
                log::warn!("Socket setup failed: {err}");
                self.state = ConnectionState::Failed;
                self.status = format!("Connection failed: {err}");
                return Err(err.into());
            }
        };
        log::info!("Connecting to {host}:{tcp_port}");
        self.udp = Some(udp);
        self.udp_port = udp_port;
        self.name = name.to_string();
        self.pending_handshake = Some(PendingHandshake {
            name: name.to_string(),
            color,
        });
        self.connector = Some(TcpConnector::spawn(host.to_string(), tcp_port));
        self.connect_started = Some(Instant::now());
        self.state = ConnectionState::Connecting;
        self.status = format!("Connecting to {host}:{tcp_port}");
        Ok(())
    }

    /// Tears the session down from any state. Idempotent.
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            log::info!("Disconnecting");
        }
        self.teardown();
        self.state = ConnectionState::Disconnected;
        self.status = "Disconnected".to_string();
    }

    /// One frame of work: pump both sockets, supervise timers, move the
    /// local player, then deliver queued observer callbacks.
    pub fn update(&mut self, dt: f32, intent: MoveIntent) {
        match self.state {
            ConnectionState::Connecting => self.drive_connect(),
            ConnectionState::Connected => self.drive_connected(dt, intent),
            ConnectionState::Disconnected | ConnectionState::Failed => {}
        }
        self.flush_notices();
    }

    pub fn send_chat(&mut self, text: &str) -> Result<(), ClientError> {
        if self.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        // The server echoes chat to everyone, sender included; the
        // local log fills from that echo.
        self.send_reliable(Message::Chat {
            sender: self.name.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    pub fn change_map(&mut self, map_id: &str) -> Result<(), ClientError> {
        if self.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        self.send_reliable(Message::MapChange {
            map_id: map_id.to_string(),
        });
        if let Some(session) = self.session.as_mut() {
            session.map_id = map_id.to_string();
        }
        Ok(())
    }

    pub fn on_roster_change(&mut self, callback: impl FnMut(&Roster) + 'static) {
        self.on_roster = Some(Box::new(callback));
    }

    pub fn on_correction(&mut self, callback: impl FnMut(Correction) + 'static) {
        self.on_correction = Some(Box::new(callback));
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Human-readable account of the last transition or server error.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn session(&self) -> Option<&ServerSession> {
        self.session.as_ref()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn predicted_position(&self) -> Vec2 {
        self.prediction.predicted()
    }

    /// False until the first authoritative position arrives; the host
    /// should not draw the local player before this.
    pub fn is_spawned(&self) -> bool {
        self.prediction.is_spawned()
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    fn drive_connect(&mut self) {
        let outcome = match self.connector.as_mut() {
            Some(connector) => connector.poll(),
            None => None,
        };
        if let Some(outcome) = outcome {
            self.connector = None;
            match outcome {
                Ok(stream) => self.finish_connect(stream),
                Err(err) => self.fail_connect(&err.to_string()),
            }
            return;
        }
        let timeout = Duration::from_secs_f32(self.config.connect_timeout_secs);
        if self
            .connect_started
            .is_some_and(|started| started.elapsed() > timeout)
        {
            self.fail_connect("timed out");
        }
    }

    fn finish_connect(&mut self, stream: TcpStream) {
        let tcp = match TcpTransport::new(stream) {
            Ok(tcp) => tcp,
            Err(err) => {
                self.fail_connect(&err.to_string());
                return;
            }
        };
        let peer = tcp.peer_addr();
        if let Some(udp) = self.udp.as_mut() {
            udp.set_remote(SocketAddr::new(peer.ip(), self.udp_port));
        }
        self.tcp = Some(tcp);
        self.state = ConnectionState::Connected;
        self.status = format!("Connected to {peer}");
        self.connect_started = None;
        self.last_inbound = Instant::now();
        self.last_heartbeat = Instant::now();
        log::info!("Connected to {peer}");
        if let Some(handshake) = self.pending_handshake.take() {
            self.send_reliable(Message::Connect {
                name: handshake.name,
                color: handshake.color,
            });
        }
    }

    fn fail_connect(&mut self, cause: &str) {
        log::warn!("Connection failed: {cause}");
        self.teardown();
        self.state = ConnectionState::Failed;
        self.status = format!("Connection failed: {cause}");
    }

    fn drive_connected(&mut self, dt: f32, intent: MoveIntent) {
        if !self.pump_tcp() {
            return;
        }
        self.pump_udp();
        let liveness = Duration::from_secs_f32(self.config.liveness_timeout_secs);
        if self.last_inbound.elapsed() > liveness {
            self.drop_link("Connection to server timed out");
            return;
        }
        let heartbeat = Duration::from_secs_f32(self.config.heartbeat_interval_secs);
        if self.last_heartbeat.elapsed() >= heartbeat {
            self.last_heartbeat = Instant::now();
            self.send_reliable(Message::Ping);
        }
        self.drive_registration();
        self.prediction.tick(dt, intent.axis());
        self.drive_position_send();
        self.flush_tcp();
    }

    /// Returns false when the reliable link died and the session was
    /// torn down.
    fn pump_tcp(&mut self) -> bool {
        let poll = match self.tcp.as_mut() {
            Some(tcp) => tcp.poll(),
            None => return true,
        };
        match poll {
            Ok(result) => {
                self.stats.bytes_received += result.data.len() as u64;
                self.line_buffer.push(&result.data);
                let lines = self.line_buffer.drain_lines();
                if !lines.is_empty() {
                    self.last_inbound = Instant::now();
                }
                for line in lines {
                    self.stats.frames_received += 1;
                    self.handle_line(&line);
                }
                if result.closed {
                    self.drop_link("Server closed the connection");
                    return false;
                }
                true
            }
            Err(err) => {
                log::warn!("Connection read error: {err}");
                self.drop_link("Connection to server lost");
                false
            }
        }
    }

    fn pump_udp(&mut self) {
        let poll = match self.udp.as_mut() {
            Some(udp) => udp.poll(),
            None => return,
        };
        match poll {
            Ok(result) => {
                if result.rejected > 0 {
                    log::debug!("Rejected {} foreign datagrams", result.rejected);
                    self.stats.rejected_datagrams += result.rejected;
                }
                self.stats.bytes_received += result.bytes_received as u64;
                if !result.lines.is_empty() {
                    self.last_inbound = Instant::now();
                }
                for line in result.lines {
                    self.stats.datagrams_received += 1;
                    self.handle_line(&line);
                }
            }
            Err(err) => log::warn!("Datagram receive error: {err}"),
        }
    }

    fn handle_line(&mut self, line: &str) {
        match Message::decode(line) {
            Ok(message) => self.handle_message(message),
            Err(err) => {
                self.stats.parse_errors += 1;
                log::warn!("Dropping bad frame: {err}");
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Config {
                player_id,
                color,
                map_id,
                token,
                position,
            } => self.handle_config(player_id, color, map_id, token, position),
            Message::Players(entries) => {
                let local_id = self.session.as_ref().map(|s| s.player_id.clone());
                let outcome = self.roster.apply_snapshot(entries, local_id.as_deref());
                for id in &outcome.removed {
                    log::debug!("Player {id} left");
                }
                if outcome.changed {
                    self.roster_dirty = true;
                }
                if let Some(position) = outcome.local_position {
                    self.apply_authoritative(position);
                }
            }
            Message::Position {
                id: Some(id),
                position,
            } => {
                let local_id = self.session.as_ref().map(|s| s.player_id.clone());
                match self
                    .roster
                    .apply_position_delta(&id, position, local_id.as_deref())
                {
                    PositionOutcome::Remote => self.roster_dirty = true,
                    PositionOutcome::Local => self.apply_authoritative(position),
                    PositionOutcome::Unknown => {
                        log::debug!("Position for unknown player {id}");
                    }
                }
            }
            Message::Position { id: None, .. } => {
                log::debug!("Position report without a player id");
            }
            Message::Chat { sender, text } => {
                self.chat.push_message(&sender, &text);
            }
            Message::UdpRegistered => {
                log::debug!("Datagram channel registered");
                self.udp_registered = true;
                self.next_registration = None;
            }
            Message::Ping => self.send_reliable(Message::Pong),
            Message::Pong => {}
            Message::Error { message } => {
                log::warn!("Server error: {message}");
                self.status = format!("Server error: {message}");
            }
            other => {
                log::debug!("Ignoring {} from server", other.command());
            }
        }
    }

    fn handle_config(
        &mut self,
        player_id: String,
        color: Rgb,
        map_id: Option<String>,
        token: Option<String>,
        position: Option<Vec2>,
    ) {
        if let Some(session) = self.session.as_mut() {
            if session.player_id == player_id {
                // Later CONFIG frames may recolor us; identity is fixed.
                session.color = color;
            } else {
                log::warn!(
                    "Server reassigned id {} to {}, ignoring",
                    session.player_id,
                    player_id
                );
            }
            return;
        }
        log::info!("Session established as {player_id}");
        self.session = Some(ServerSession {
            player_id,
            color,
            token,
            map_id: map_id.unwrap_or_else(|| DEFAULT_MAP_ID.to_string()),
        });
        self.start_registration();
        if let Some(position) = position {
            self.apply_authoritative(position);
        }
        // Ask for the authoritative spawn; zero is the request
        // sentinel, not a movement report.
        self.send_reliable(Message::Position {
            id: None,
            position: Vec2::ZERO,
        });
    }

    fn apply_authoritative(&mut self, position: Vec2) {
        self.prediction.apply_server_position(position);
        if self.config.prediction.correction {
            if let Some(correction) = self.prediction.reconcile() {
                self.pending_corrections.push(correction);
            }
        }
    }

    fn start_registration(&mut self) {
        let Some(id) = self.session.as_ref().map(|s| s.player_id.clone()) else {
            return;
        };
        let frame = Message::UdpRegister { id }.encode();
        self.send_datagram(&frame);
        self.udp_registered = false;
        self.registration_remaining = self.config.registration_attempts.saturating_sub(1);
        self.next_registration =
            Some(Instant::now() + Duration::from_secs_f32(self.config.registration_interval_secs));
    }

    fn drive_registration(&mut self) {
        if self.udp_registered {
            return;
        }
        let Some(due) = self.next_registration else {
            return;
        };
        if Instant::now() < due {
            return;
        }
        if self.registration_remaining == 0 {
            log::debug!("Datagram registration unconfirmed, proceeding as registered");
            self.udp_registered = true;
            self.next_registration = None;
            return;
        }
        self.registration_remaining -= 1;
        self.next_registration =
            Some(Instant::now() + Duration::from_secs_f32(self.config.registration_interval_secs));
        let Some(id) = self.session.as_ref().map(|s| s.player_id.clone()) else {
            return;
        };
        let frame = Message::UdpRegister { id }.encode();
        self.send_datagram(&frame);
    }

    fn drive_position_send(&mut self) {
        if !self.prediction.is_spawned() {
            return;
        }
        let interval = Duration::from_secs_f32(self.config.position_interval_secs);
        if self.last_position_send.elapsed() < interval {
            return;
        }
        self.last_position_send = Instant::now();
        let message = Message::Position {
            id: None,
            position: self.prediction.predicted(),
        };
        if self.udp_registered {
            let frame = message.encode();
            self.send_datagram(&frame);
        } else {
            // Datagram channel not confirmed yet; fall back to the
            // reliable channel.
            self.send_reliable(message);
        }
    }

    fn send_reliable(&mut self, message: Message) {
        let frame = message.encode();
        let Some(tcp) = self.tcp.as_mut() else {
            return;
        };
        tcp.queue_line(&frame);
        self.stats.frames_sent += 1;
        match tcp.flush() {
            Ok(n) => self.stats.bytes_sent += n as u64,
            Err(err) => log::warn!("Send failed: {err}"),
        }
    }

    fn send_datagram(&mut self, frame: &str) {
        let Some(udp) = self.udp.as_ref() else {
            return;
        };
        match udp.send_line(frame) {
            Ok(n) => {
                self.stats.datagrams_sent += 1;
                self.stats.bytes_sent += n as u64;
            }
            Err(err) => log::warn!("Datagram send failed: {err}"),
        }
    }

    fn flush_tcp(&mut self) {
        let Some(tcp) = self.tcp.as_mut() else {
            return;
        };
        if tcp.pending_bytes() == 0 {
            return;
        }
        match tcp.flush() {
            Ok(n) => self.stats.bytes_sent += n as u64,
            Err(err) => log::warn!("Send failed: {err}"),
        }
    }

    fn drop_link(&mut self, status: &str) {
        log::warn!("{status}");
        self.teardown();
        self.state = ConnectionState::Disconnected;
        self.status = status.to_string();
    }

    fn teardown(&mut self) {
        self.connector = None;
        self.tcp = None;
        self.line_buffer = LineBuffer::default();
        self.udp = None;
        self.pending_handshake = None;
        self.connect_started = None;
        self.session = None;
        self.roster.clear();
        self.chat.clear();
        self.prediction.reset();
        self.udp_registered = false;
        self.registration_remaining = 0;
        self.next_registration = None;
        self.roster_dirty = false;
        self.pending_corrections.clear();
    }

    fn flush_notices(&mut self) {
        if self.roster_dirty {
            self.roster_dirty = false;
            if let Some(callback) = self.on_roster.as_mut() {
                callback(&self.roster);
            }
        }
        if !self.pending_corrections.is_empty() {
            let corrections: Vec<Correction> = self.pending_corrections.drain(..).collect();
            if let Some(callback) = self.on_correction.as_mut() {
                for correction in corrections {
                    callback(correction);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    fn quick_config() -> ClientConfig {
        ClientConfig {
            connect_timeout_secs: 0.05,
            liveness_timeout_secs: 0.2,
            heartbeat_interval_secs: 0.05,
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_new_client_is_disconnected() {
        let client = NetClient::new(ClientConfig::default());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.status(), "Disconnected");
        assert!(client.session().is_none());
        assert!(client.roster().is_empty());
        assert!(!client.is_spawned());
    }

    #[test]
    fn test_connect_window_expiry_fails_without_connecting() {
        let mut client = NetClient::new(quick_config());
        client.state = ConnectionState::Connecting;
        client.connect_started = Some(Instant::now() - Duration::from_millis(200));

        client.update(0.016, MoveIntent::empty());

        assert_eq!(client.state(), ConnectionState::Failed);
        assert!(client.status().contains("timed out"));
    }

    #[test]
    fn test_handshake_ack_establishes_session_and_spawn() {
        let mut client = NetClient::new(ClientConfig::default());
        client.state = ConnectionState::Connected;

        let ack =
            Message::decode(r##"CONFIG {"playerId":"p7","color":"#FF5252","x":120.0,"y":80.0}"##)
                .unwrap();
        client.handle_message(ack);

        let session = client.session().unwrap();
        assert_eq!(session.player_id, "p7");
        assert_eq!(session.color, Rgb::new(0xFF, 0x52, 0x52));
        assert!(client.is_spawned());
        assert_eq!(client.predicted_position(), Vec2::new(120.0, 80.0));
    }

    #[test]
    fn test_snapshot_routes_local_entry_to_prediction() {
        let mut client = NetClient::new(ClientConfig::default());
        client.state = ConnectionState::Connected;
        client.session = Some(ServerSession {
            player_id: "me".to_string(),
            color: Rgb::RED,
            token: None,
            map_id: DEFAULT_MAP_ID.to_string(),
        });

        let snapshot = Message::decode(
            r#"PLAYERS [{"id":"me","name":"Me","x":40,"y":50},{"id":"p1","name":"Amy","x":1,"y":2}]"#,
        )
        .unwrap();
        client.handle_message(snapshot);

        assert_eq!(client.roster().len(), 1);
        assert!(client.roster().get("me").is_none());
        assert_eq!(client.predicted_position(), Vec2::new(40.0, 50.0));
    }

    #[test]
    fn test_server_error_is_transient() {
        let mut client = NetClient::new(ClientConfig::default());
        client.state = ConnectionState::Connected;

        client.handle_message(Message::Error {
            message: "room full".to_string(),
        });

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.status(), "Server error: room full");
    }

    #[test]
    fn test_disconnect_clears_everything_and_is_idempotent() {
        let mut client = NetClient::new(ClientConfig::default());
        client.state = ConnectionState::Connected;
        client.session = Some(ServerSession {
            player_id: "p1".to_string(),
            color: Rgb::RED,
            token: Some("t".to_string()),
            map_id: DEFAULT_MAP_ID.to_string(),
        });
        client.handle_message(
            Message::decode(r#"PLAYERS [{"id":"p2","name":"Amy","x":1,"y":2}]"#).unwrap(),
        );
        client.handle_message(Message::Chat {
            sender: "Amy".to_string(),
            text: "hi".to_string(),
        });
        client.apply_authoritative(Vec2::new(5.0, 5.0));

        client.disconnect();
        client.disconnect();

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.status(), "Disconnected");
        assert!(client.session().is_none());
        assert!(client.roster().is_empty());
        assert!(client.chat().is_empty());
        assert!(!client.is_spawned());
        assert_eq!(client.predicted_position(), Vec2::ZERO);
    }

    #[test]
    fn test_chat_and_map_require_connection() {
        let mut client = NetClient::new(ClientConfig::default());
        assert!(matches!(
            client.send_chat("hello"),
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.change_map("keep"),
            Err(ClientError::NotConnected)
        ));
    }

    #[test]
    fn test_later_config_updates_color_only() {
        let mut client = NetClient::new(ClientConfig::default());
        client.state = ConnectionState::Connected;
        client.handle_message(
            Message::decode(r##"CONFIG {"playerId":"p7","color":"#FF5252","x":10,"y":10}"##)
                .unwrap(),
        );

        client.handle_message(
            Message::decode(r##"CONFIG {"playerId":"p7","color":"#2196F3","x":99,"y":99}"##)
                .unwrap(),
        );

        let session = client.session().unwrap();
        assert_eq!(session.color, Rgb::new(0x21, 0x96, 0xF3));
        // Identity and spawn are from the first ack only.
        assert_eq!(client.predicted_position(), Vec2::new(10.0, 10.0));
    }

    #[test]
    fn test_correction_fires_per_authoritative_frame_not_per_tick() {
        let mut client = NetClient::new(ClientConfig::default());
        client.state = ConnectionState::Connected;
        let seen = Rc::new(Cell::new(0));
        let sink = Rc::clone(&seen);
        client.on_correction(move |_| sink.set(sink.get() + 1));

        // The first authoritative position is the spawn snap; nothing
        // to correct yet.
        client.apply_authoritative(Vec2::new(10.0, 10.0));
        client.update(0.016, MoveIntent::empty());
        assert_eq!(seen.get(), 0);

        client.apply_authoritative(Vec2::new(14.0, 10.0));
        client.update(0.016, MoveIntent::empty());
        assert_eq!(seen.get(), 1);

        // Ticks without a new authoritative position report nothing,
        // even while the blend is still converging.
        client.update(0.016, MoveIntent::empty());
        client.update(0.016, MoveIntent::empty());
        assert_eq!(seen.get(), 1);
    }
}
