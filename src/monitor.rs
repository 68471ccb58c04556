//! Console traffic monitor for debugging and development
//!
//! Connects to the console without sending anything and prints every inbound
//! MIDI message with its decoded meaning.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use colored::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::avantis::{CacheUpdate, MixerSession};
use crate::config::AppConfig;
use crate::drivers::avantis::signals::format_level;
use crate::midi::{format_hex, MidiMessage, MidiStreamParser};
use crate::transport::{ConnectionStatus, DataCallback, TcpTransport, Transport};

/// One decoded line of inbound traffic
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    pub timestamp: DateTime<Local>,
    pub message: Result<MidiMessage, String>,
}

/// Turns raw chunks into printable events
pub struct TrafficMonitor {
    parser: MidiStreamParser,
    session: MixerSession,
}

impl TrafficMonitor {
    pub fn new(base_midi_channel: u8) -> Result<Self> {
        Ok(Self {
            parser: MidiStreamParser::new(),
            session: MixerSession::new(base_midi_channel)?,
        })
    }

    /// Parse a chunk into events plus the cache updates it implies
    pub fn process(&mut self, chunk: &[u8]) -> (Vec<MonitorEvent>, Vec<CacheUpdate>) {
        let timestamp = Local::now();
        let events = self
            .parser
            .feed(chunk)
            .into_iter()
            .map(|message| MonitorEvent {
                timestamp,
                message: message.map_err(|e| e.to_string()),
            })
            .collect();
        let updates = self.session.decode(chunk);
        (events, updates)
    }

    pub fn reset(&mut self) {
        self.parser.reset();
        self.session.reset_connection();
    }
}

pub fn render_event(event: &MonitorEvent) -> String {
    let timestamp = event.timestamp.format("%H:%M:%S%.3f").to_string();
    let line = match &event.message {
        Ok(msg) => {
            let hex = format_hex(&msg.encode());
            let hex_colored = match msg {
                MidiMessage::NoteOn { .. } => hex.bright_green(),
                MidiMessage::NoteOff { .. } => hex.bright_red(),
                MidiMessage::ControlChange { .. } => hex.bright_yellow(),
                MidiMessage::ProgramChange { .. } => hex.bright_cyan(),
                MidiMessage::SysEx { .. } => hex.bright_magenta(),
            };
            format!("{} => {}", hex_colored, msg.to_string().bright_blue())
        }
        Err(e) => format!("{}", format!("dropped: {}", e).bright_black()),
    };
    format!("[{}] {} | {}", timestamp.dimmed(), "RX".green(), line)
}

pub fn describe_update(update: &CacheUpdate) -> String {
    match update {
        CacheUpdate::Mute { channel, muted } => {
            format!("{} mute {}", channel, if *muted { "ON" } else { "OFF" })
        }
        CacheUpdate::Fader { channel, db } => format!("{} fader {}", channel, format_level(*db)),
        CacheUpdate::Name { channel, name } => format!("{} name '{}'", channel, name),
        CacheUpdate::Color { channel, color } => format!("{} color {}", channel, color),
        CacheUpdate::MainAssign { channel, assigned } => {
            format!("{} main {}", channel, if *assigned { "assigned" } else { "unassigned" })
        }
        CacheUpdate::GroupAssign { channel, group, assigned } => format!(
            "{} {} {}",
            channel,
            if *assigned { "joined" } else { "left" },
            group
        ),
        CacheUpdate::Scene { scene } => format!("scene {}", scene),
        CacheUpdate::SceneName { scene, name } => format!("scene {} name '{}'", scene, name),
    }
}

/// Hand every chunk to the print loop
///
/// Unbounded, because a dropped chunk would split a frame and desync the
/// parser for everything after it.
fn chunk_forwarder(tx: mpsc::UnboundedSender<Vec<u8>>) -> DataCallback {
    Arc::new(move |chunk: &[u8]| {
        if tx.send(chunk.to_vec()).is_err() {
            warn!("Monitor closed, dropping {} inbound bytes", chunk.len());
        }
    })
}

/// Run the monitor until Ctrl+C
pub async fn run_monitor(config: &AppConfig) -> Result<()> {
    println!("{}", "=== Avantis Traffic Monitor ===".bold().cyan());
    println!(
        "Console {}:{} (MIDI channel {})",
        config.console.host, config.console.port, config.console.base_midi_channel
    );
    println!("Press Ctrl+C to exit\n");
    println!("{}", "Format: [time] DIR | HEX => PARSED".dimmed());
    println!("{}\n", "─".repeat(80).dimmed());

    let mut monitor = TrafficMonitor::new(config.console.wire_base_channel())
        .context("Invalid base MIDI channel")?;

    let transport = TcpTransport::new(config.transport.options());
    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
    transport.on_data(chunk_forwarder(chunk_tx));

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    transport.on_status(Arc::new(move |status| {
        let _ = status_tx.send(status);
    }));

    transport.connect(&config.console.host, config.console.port);
    info!("Monitor started");

    loop {
        tokio::select! {
            Some(chunk) = chunk_rx.recv() => {
                let (events, updates) = monitor.process(&chunk);
                for event in &events {
                    println!("{}", render_event(event));
                }
                for update in &updates {
                    println!("           {} {}", "↳".dimmed(), describe_update(update).white());
                }
            }
            Some(status) = status_rx.recv() => {
                let line = match status {
                    ConnectionStatus::Connected => "● connected".green(),
                    ConnectionStatus::Disconnected => "○ disconnected".red(),
                    ConnectionStatus::Reconnecting { attempt } => {
                        format!("◌ reconnecting (attempt {})", attempt).yellow()
                    }
                };
                if matches!(status, ConnectionStatus::Connected) {
                    monitor.reset();
                }
                println!("{}", line);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    transport.destroy().await;
    println!("\n{}", "Monitor stopped".yellow());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avantis::{ChannelType, LogicalChannel};

    #[test]
    fn test_process_reports_messages_and_updates() {
        let mut monitor = TrafficMonitor::new(11).unwrap();
        let (events, updates) = monitor.process(&[0x9B, 0x05, 0x7F, 0xCB, 0x02]);

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].message,
            Ok(MidiMessage::NoteOn { channel: 11, note: 5, velocity: 0x7F })
        );
        assert_eq!(updates.len(), 2);
        assert_eq!(describe_update(&updates[0]), "Input 5 mute ON");
        assert_eq!(describe_update(&updates[1]), "scene 3");
    }

    #[test]
    fn test_render_is_plain_without_color() {
        colored::control::set_override(false);
        let event = MonitorEvent {
            timestamp: Local::now(),
            message: Ok(MidiMessage::ControlChange { channel: 0, cc: 0x63, value: 1 }),
        };
        let line = render_event(&event);
        assert!(line.contains("RX | B0 63 01 => CC ch:1 cc:99 v:1"), "{}", line);

        let sysex = MonitorEvent {
            timestamp: Local::now(),
            message: Ok(MidiMessage::SysEx { data: vec![0x00, 0x00, 0x1A] }),
        };
        assert!(render_event(&sysex).contains("F0 00 00 1A F7"));
    }

    #[test]
    fn test_forwarder_keeps_every_chunk_while_backlogged() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let forward = chunk_forwarder(tx);
        for i in 0..5000u32 {
            forward(&[0x90, (i % 128) as u8, 0x7F]);
        }

        let mut monitor = TrafficMonitor::new(0).unwrap();
        let mut events = 0;
        while let Ok(chunk) = rx.try_recv() {
            events += monitor.process(&chunk).0.len();
        }
        assert_eq!(events, 5000);
    }

    #[test]
    fn test_group_description() {
        let update = CacheUpdate::GroupAssign {
            channel: LogicalChannel::new(ChannelType::Input, 4).unwrap(),
            group: LogicalChannel::new(ChannelType::Dca, 2).unwrap(),
            assigned: true,
        };
        assert_eq!(describe_update(&update), "Input 4 joined DCA 2");
    }
}
