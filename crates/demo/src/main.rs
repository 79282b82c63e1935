use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use glam::Vec2;
use log::info;
use plaza::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, Rgb};
use plaza_client::{ClientConfig, ConnectionState, MoveIntent, NetClient};

/// Walks a lazy square so the bot's motion is visible to everyone else.
fn wander(elapsed: f32) -> MoveIntent {
    match (elapsed as u32 / 2) % 4 {
        0 => MoveIntent::RIGHT,
        1 => MoveIntent::DOWN,
        2 => MoveIntent::LEFT,
        _ => MoveIntent::UP,
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let name = args.next().unwrap_or_else(|| "wanderer".to_string());
    let color = args
        .next()
        .map(|hex| Rgb::parse_lossy(&hex))
        .unwrap_or(Rgb::new(0x4F, 0xC3, 0xF7));

    let mut client = NetClient::new(ClientConfig::default());
    client.on_roster_change(|roster| info!("Roster now lists {} other players", roster.len()));
    client.on_correction(|correction| {
        info!(
            "Server moved us {:?} -> {:?} (snapped: {})",
            correction.previous, correction.corrected, correction.snapped
        );
    });

    client.connect(&host, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, &name, color)?;
    println!("[status] {}", client.status());

    let started = Instant::now();
    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();
    let mut last_status = client.status().to_string();
    let mut printed_chat = 0;

    while started.elapsed() < Duration::from_secs(30) {
        let dt = last_frame.elapsed().as_secs_f32();
        last_frame = Instant::now();

        client.update(dt, wander(started.elapsed().as_secs_f32()));

        if client.status() != last_status {
            last_status = client.status().to_string();
            println!("[status] {last_status}");
        }
        for line in client.chat().iter().skip(printed_chat) {
            println!("[chat] {line}");
        }
        printed_chat = client.chat().len();

        if client.is_spawned() && last_report.elapsed() > Duration::from_secs(5) {
            let Vec2 { x, y } = client.predicted_position();
            println!("[pos] {x:.1}, {y:.1}");
            last_report = Instant::now();
        }

        match client.state() {
            ConnectionState::Failed | ConnectionState::Disconnected => break,
            _ => {}
        }
        thread::sleep(Duration::from_millis(16));
    }

    if client.is_connected() {
        client.send_chat("Heading out")?;
        client.update(0.0, MoveIntent::empty());
        client.disconnect();
    }
    info!("Session over: {}", client.status());
    Ok(())
}
