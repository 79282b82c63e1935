use std::cell::Cell;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use glam::Vec2;
use plaza::{Message, PlayerEntry, Rgb};
use plaza_client::{ClientConfig, ClientError, ConnectionState, MoveIntent, NetClient};

fn test_config() -> ClientConfig {
    ClientConfig {
        connect_timeout_secs: 2.0,
        liveness_timeout_secs: 2.0,
        heartbeat_interval_secs: 0.2,
        position_interval_secs: 0.02,
        registration_attempts: 3,
        registration_interval_secs: 0.05,
        ..ClientConfig::default()
    }
}

fn pump_until(
    client: &mut NetClient,
    timeout_ms: u64,
    mut done: impl FnMut(&NetClient) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        client.update(0.016, MoveIntent::empty());
        if done(client) {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

fn pump_for(client: &mut NetClient, ms: u64) {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(ms) {
        client.update(0.016, MoveIntent::empty());
        thread::sleep(Duration::from_millis(2));
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn read_line(stream: &mut TcpStream, buffered: &mut Vec<u8>) -> String {
    loop {
        if let Some(pos) = buffered.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffered.drain(..=pos).collect();
            return String::from_utf8_lossy(&line).trim_end().to_string();
        }
        let mut chunk = [0u8; 512];
        let n = stream.read(&mut chunk).expect("stub read timed out");
        assert!(n > 0, "client closed while the stub expected a frame");
        buffered.extend_from_slice(&chunk[..n]);
    }
}

fn send_frame(stream: &mut TcpStream, message: &Message) {
    stream.write_all(message.encode().as_bytes()).unwrap();
}

/// Answers the client's handshake with id `p7` and the given spawn
/// point, then swallows the spawn request that follows.
fn serve_handshake(stream: &mut TcpStream, buffered: &mut Vec<u8>, spawn: Vec2) -> (String, Rgb) {
    let line = read_line(stream, buffered);
    let Ok(Message::Connect { name, color }) = Message::decode(&line) else {
        panic!("expected handshake, got {line}");
    };
    send_frame(
        stream,
        &Message::Config {
            player_id: "p7".to_string(),
            color,
            map_id: None,
            token: None,
            position: Some(spawn),
        },
    );
    // Heartbeats may interleave; the spawn request is the first
    // non-heartbeat frame after the ack.
    let line = loop {
        let line = read_line(stream, buffered);
        if line != "PING" {
            break line;
        }
    };
    assert!(
        line.starts_with("POSITION "),
        "expected spawn request, got {line}"
    );
    (name, color)
}

/// Keeps the stub's end of the stream alive, draining client traffic,
/// until the test signals completion.
fn wait_done(stream: &mut TcpStream, done: &AtomicBool) {
    stream
        .set_read_timeout(Some(Duration::from_millis(10)))
        .unwrap();
    let mut chunk = [0u8; 512];
    while !done.load(Ordering::SeqCst) {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(_) => {}
            Err(ref err) if is_timeout(err) => {}
            Err(_) => break,
        }
    }
}

struct Stub {
    tcp_port: u16,
    udp_port: u16,
    done: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl Stub {
    fn finish(self) {
        self.done.store(true, Ordering::SeqCst);
        self.handle.join().unwrap();
    }
}

fn spawn_stub(
    script: impl FnOnce(&mut TcpStream, &mut Vec<u8>, &UdpSocket, &AtomicBool) + Send + 'static,
) -> Stub {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let tcp_port = listener.local_addr().unwrap().port();
    let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let udp_port = udp.local_addr().unwrap().port();
    let done = Arc::new(AtomicBool::new(false));
    let done_flag = Arc::clone(&done);
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buffered = Vec::new();
        script(&mut stream, &mut buffered, &udp, &done_flag);
    });
    Stub {
        tcp_port,
        udp_port,
        done,
        handle,
    }
}

fn connect_client(stub: &Stub, config: ClientConfig) -> NetClient {
    let mut client = NetClient::new(config);
    client
        .connect(
            "127.0.0.1",
            stub.tcp_port,
            stub.udp_port,
            "Bob",
            Rgb::parse_lossy("#FF5252"),
        )
        .unwrap();
    client
}

fn entry(id: &str, x: f32, y: f32) -> PlayerEntry {
    PlayerEntry {
        id: id.to_string(),
        name: id.to_uppercase(),
        color: Rgb::RED,
        position: Vec2::new(x, y),
        map_id: "default".to_string(),
    }
}

#[test]
fn test_handshake_establishes_session_and_spawn() {
    let stub = spawn_stub(|stream, buffered, _udp, done| {
        let (name, color) = serve_handshake(stream, buffered, Vec2::new(120.0, 80.0));
        assert_eq!(name, "Bob");
        assert_eq!(color, Rgb::new(0xFF, 0x52, 0x52));
        wait_done(stream, done);
    });

    let mut client = connect_client(&stub, test_config());
    assert!(pump_until(&mut client, 2000, |c| c.is_spawned()));

    assert_eq!(client.state(), ConnectionState::Connected);
    let session = client.session().unwrap();
    assert_eq!(session.player_id, "p7");
    assert_eq!(session.color, Rgb::new(0xFF, 0x52, 0x52));
    assert_eq!(client.predicted_position(), Vec2::new(120.0, 80.0));
    assert!(client.status().starts_with("Connected to"));
    stub.finish();
}

#[test]
fn test_second_connect_while_active_is_rejected() {
    let stub = spawn_stub(|stream, buffered, _udp, done| {
        serve_handshake(stream, buffered, Vec2::ZERO);
        wait_done(stream, done);
    });

    let mut client = connect_client(&stub, test_config());
    assert!(matches!(
        client.connect("127.0.0.1", stub.tcp_port, stub.udp_port, "Bob", Rgb::RED),
        Err(ClientError::AlreadyActive)
    ));
    assert!(pump_until(&mut client, 2000, |c| c.is_connected()));
    stub.finish();
}

#[test]
fn test_snapshots_reconcile_and_prune_roster() {
    let stub = spawn_stub(|stream, buffered, _udp, done| {
        serve_handshake(stream, buffered, Vec2::ZERO);
        send_frame(
            stream,
            &Message::Players(vec![entry("p1", 10.0, 10.0), entry("p2", 20.0, 20.0)]),
        );
        thread::sleep(Duration::from_millis(150));
        send_frame(stream, &Message::Players(vec![entry("p2", 25.0, 25.0)]));
        wait_done(stream, done);
    });

    let mut client = connect_client(&stub, test_config());
    let notified = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&notified);
    client.on_roster_change(move |_| counter.set(counter.get() + 1));

    assert!(pump_until(&mut client, 2000, |c| c.roster().len() == 2));
    assert!(pump_until(&mut client, 2000, |c| {
        c.roster().len() == 1
            && c.roster()
                .get("p2")
                .is_some_and(|p| p.position == Vec2::new(25.0, 25.0))
    }));
    assert!(client.roster().get("p1").is_none());
    assert!(notified.get() >= 2);
    stub.finish();
}

#[test]
fn test_chat_normalizes_both_encodings() {
    let stub = spawn_stub(|stream, buffered, _udp, done| {
        serve_handshake(stream, buffered, Vec2::ZERO);
        send_frame(
            stream,
            &Message::Chat {
                sender: "Alice".to_string(),
                text: "hi".to_string(),
            },
        );
        stream.write_all(b"CHAT:Alice: hi\n").unwrap();
        wait_done(stream, done);
    });

    let mut client = connect_client(&stub, test_config());
    assert!(pump_until(&mut client, 2000, |c| c.chat().len() == 2));

    let lines: Vec<&str> = client.chat().iter().collect();
    assert_eq!(lines, vec!["Alice: hi", "Alice: hi"]);
    stub.finish();
}

#[test]
fn test_registration_burst_then_datagram_positions() {
    let stub = spawn_stub(|stream, buffered, udp, done| {
        serve_handshake(stream, buffered, Vec2::new(50.0, 50.0));

        udp.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut chunk = [0u8; 512];
        let (n, from) = udp.recv_from(&mut chunk).unwrap();
        let line = String::from_utf8_lossy(&chunk[..n]).trim_end().to_string();
        assert!(
            matches!(Message::decode(&line), Ok(Message::UdpRegister { ref id }) if id == "p7"),
            "expected registration, got {line}"
        );
        udp.send_to(b"UDP_REGISTERED\n", from).unwrap();

        // Position reports move onto the datagram channel once the
        // registration is acknowledged.
        loop {
            let (n, _) = udp.recv_from(&mut chunk).unwrap();
            let line = String::from_utf8_lossy(&chunk[..n]).trim_end().to_string();
            match Message::decode(&line) {
                Ok(Message::Position { id: None, .. }) => break,
                Ok(Message::UdpRegister { .. }) => continue,
                other => panic!("unexpected datagram {line}: {other:?}"),
            }
        }
        wait_done(stream, done);
    });

    let mut client = connect_client(&stub, test_config());
    assert!(pump_until(&mut client, 2000, |c| {
        c.stats().datagrams_received >= 1
    }));
    pump_for(&mut client, 300);
    assert!(client.stats().datagrams_sent >= 2);
    stub.finish();
}

#[test]
fn test_peer_close_drops_session_with_reason() {
    let stub = spawn_stub(|stream, buffered, _udp, _done| {
        serve_handshake(stream, buffered, Vec2::new(10.0, 10.0));
        send_frame(stream, &Message::Players(vec![entry("p1", 1.0, 1.0)]));
        thread::sleep(Duration::from_millis(150));
    });

    let mut client = connect_client(&stub, test_config());
    assert!(pump_until(&mut client, 2000, |c| c.roster().len() == 1));
    assert!(pump_until(&mut client, 2000, |c| {
        c.state() == ConnectionState::Disconnected
    }));

    assert_eq!(client.status(), "Server closed the connection");
    assert!(client.session().is_none());
    assert!(client.roster().is_empty());
    assert!(!client.is_spawned());
    stub.finish();
}

#[test]
fn test_silence_drops_session_with_timeout_reason() {
    let stub = spawn_stub(|stream, buffered, _udp, done| {
        serve_handshake(stream, buffered, Vec2::ZERO);
        wait_done(stream, done);
    });

    let config = ClientConfig {
        liveness_timeout_secs: 0.3,
        heartbeat_interval_secs: 0.1,
        ..test_config()
    };
    let mut client = connect_client(&stub, config);
    assert!(pump_until(&mut client, 2000, |c| c.session().is_some()));
    assert!(pump_until(&mut client, 2000, |c| {
        c.state() == ConnectionState::Disconnected
    }));

    assert_eq!(client.status(), "Connection to server timed out");
    assert!(client.session().is_none());
    stub.finish();
}

#[test]
fn test_disconnect_resets_and_allows_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let tcp_port = listener.local_addr().unwrap().port();
    let udp_port = UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let handle = thread::spawn(move || {
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            let mut buffered = Vec::new();
            serve_handshake(&mut stream, &mut buffered, Vec2::new(30.0, 30.0));
            let mut chunk = [0u8; 256];
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(ref err) if is_timeout(err) => {}
                    Err(_) => break,
                }
            }
        }
    });

    let mut client = NetClient::new(test_config());
    client
        .connect("127.0.0.1", tcp_port, udp_port, "Bob", Rgb::RED)
        .unwrap();
    assert!(pump_until(&mut client, 2000, |c| c.is_spawned()));

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.status(), "Disconnected");
    assert!(client.session().is_none());
    assert!(!client.is_spawned());
    assert_eq!(client.predicted_position(), Vec2::ZERO);

    client
        .connect("127.0.0.1", tcp_port, udp_port, "Bob", Rgb::RED)
        .unwrap();
    assert!(pump_until(&mut client, 2000, |c| c.is_spawned()));
    assert_eq!(client.session().unwrap().player_id, "p7");

    drop(client);
    handle.join().unwrap();
}

#[test]
fn test_refused_connect_fails_without_connecting() {
    let doomed = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = doomed.local_addr().unwrap().port();
    drop(doomed);

    let mut client = NetClient::new(test_config());
    client
        .connect("127.0.0.1", port, port, "Bob", Rgb::RED)
        .unwrap();

    let failed = pump_until(&mut client, 3000, |c| {
        assert_ne!(c.state(), ConnectionState::Connected);
        c.state() == ConnectionState::Failed
    });
    assert!(failed);
    assert!(client.status().starts_with("Connection failed"));
}
