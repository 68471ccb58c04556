//! Command-line interface and REPL

use anyhow::{Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::avantis::{ActionRequest, ChannelState, ChannelType, Color, LogicalChannel, MuteState};
use crate::drivers::avantis::signals::format_level;
use crate::drivers::{AvantisDriver, Driver};

const HELP: &str = "\
Commands:
  mute <type> <n> [on|off|toggle]
  fader <type> <n> <dB|-inf>
  scene <n>
  name <type> <n> <text>
  color <type> <n> <color>
  main <type> <n> <on|off>
  assign <type> <n> <dca|mute_group> <g1,g2,..> [on|off]
  send <type> <n> <dest_type> <dest> <dB>
  show <type> <n>
  sync | status | help | quit

Types: input, mono_group, stereo_group, mono_aux, stereo_aux, mono_matrix,
stereo_matrix, mono_fx_send, stereo_fx_send, fx_return, main, dca, mute_group";

/// A parsed REPL line
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Action(ActionRequest),
    Show(LogicalChannel),
    Sync,
    Status,
    Help,
    Quit,
}

/// Parse one line; Ok(None) for blank input
pub fn parse_command(line: &str) -> Result<Option<ReplCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match verb.to_ascii_lowercase().as_str() {
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        "sync" => ReplCommand::Sync,
        "status" => ReplCommand::Status,
        "show" => ReplCommand::Show(channel_arg(&args, 0)?),
        "mute" => ReplCommand::Action(ActionRequest::Mute {
            channel: channel_arg(&args, 0)?,
            state: match args.get(2) {
                Some(s) => s.parse()?,
                None => MuteState::Toggle,
            },
        }),
        "fader" => ReplCommand::Action(ActionRequest::Fader {
            channel: channel_arg(&args, 0)?,
            db: level_arg(&args, 2)?,
        }),
        "scene" => ReplCommand::Action(ActionRequest::SceneRecall {
            scene: number_arg(&args, 0, "scene")?,
        }),
        "name" => {
            let channel = channel_arg(&args, 0)?;
            if args.len() < 3 {
                anyhow::bail!("usage: name <type> <n> <text>");
            }
            ReplCommand::Action(ActionRequest::SetName {
                channel,
                name: args[2..].join(" "),
            })
        }
        "color" | "colour" => {
            let channel = channel_arg(&args, 0)?;
            if args.len() < 3 {
                anyhow::bail!("usage: color <type> <n> <color>");
            }
            let color: Color = args[2..].join(" ").parse()?;
            ReplCommand::Action(ActionRequest::SetColor { channel, color })
        }
        "main" => ReplCommand::Action(ActionRequest::MainAssign {
            channel: channel_arg(&args, 0)?,
            assign: switch_arg(&args, 2)?.context("usage: main <type> <n> <on|off>")?,
        }),
        "assign" => {
            let channel = channel_arg(&args, 0)?;
            let kind: ChannelType = args
                .get(2)
                .context("usage: assign <type> <n> <dca|mute_group> <groups> [on|off]")?
                .parse()?;
            let groups = args
                .get(3)
                .context("missing group list")?
                .split(',')
                .filter(|g| !g.trim().is_empty())
                .map(|g| -> Result<LogicalChannel> {
                    let index: u16 = g
                        .trim()
                        .parse()
                        .with_context(|| format!("'{}' is not a group number", g))?;
                    Ok(LogicalChannel::new(kind, index)?)
                })
                .collect::<Result<Vec<_>>>()?;
            ReplCommand::Action(ActionRequest::Assign {
                channel,
                groups,
                assign: switch_arg(&args, 4)?.unwrap_or(true),
            })
        }
        "send" => {
            let source = channel_arg(&args, 0)?;
            let destination = channel_arg(&args, 2)?;
            ReplCommand::Action(ActionRequest::SendLevel {
                source,
                destination,
                db: level_arg(&args, 4)?,
            })
        }
        other => anyhow::bail!("unknown command '{}' (try 'help')", other),
    };

    if let ReplCommand::Action(request) = &command {
        request.validate()?;
    }
    Ok(Some(command))
}

/// `<type> <n>` starting at `at`
fn channel_arg(args: &[&str], at: usize) -> Result<LogicalChannel> {
    let kind: ChannelType = args
        .get(at)
        .context("missing channel type")?
        .parse()?;
    let index = number_arg(args, at + 1, "channel")?;
    Ok(LogicalChannel::new(kind, index)?)
}

fn number_arg(args: &[&str], at: usize, what: &str) -> Result<u16> {
    let raw = args
        .get(at)
        .with_context(|| format!("missing {} number", what))?;
    raw.parse()
        .with_context(|| format!("'{}' is not a valid {} number", raw, what))
}

fn level_arg(args: &[&str], at: usize) -> Result<f64> {
    let raw = args.get(at).context("missing level in dB")?;
    let raw = raw.trim_end_matches("dB").trim_end_matches("db");
    if raw.eq_ignore_ascii_case("-inf") {
        return Ok(f64::NEG_INFINITY);
    }
    raw.parse()
        .with_context(|| format!("'{}' is not a level in dB", raw))
}

fn switch_arg(args: &[&str], at: usize) -> Result<Option<bool>> {
    match args.get(at).map(|s| s.to_ascii_lowercase()) {
        None => Ok(None),
        Some(s) if s == "on" || s == "true" => Ok(Some(true)),
        Some(s) if s == "off" || s == "false" => Ok(Some(false)),
        Some(s) => anyhow::bail!("expected on/off, got '{}'", s),
    }
}

fn render_state(channel: LogicalChannel, state: &ChannelState) -> String {
    let unknown = || "?".dimmed().to_string();
    let mute = state
        .mute
        .map(|m| if m { "MUTED".red().to_string() } else { "on".green().to_string() })
        .unwrap_or_else(unknown);
    let level = state.fader_db.map(format_level).unwrap_or_else(unknown);
    let name = state.name.clone().unwrap_or_else(unknown);
    let color = state.color.map(|c| c.to_string()).unwrap_or_else(unknown);
    let main = state
        .main_assign
        .map(|m| if m { "yes" } else { "no" }.to_string())
        .unwrap_or_else(unknown);

    let mut line = format!(
        "{}  name: {}  mute: {}  level: {}  color: {}  main: {}",
        channel.to_string().bold(),
        name,
        mute,
        level,
        color,
        main
    );
    let groups: Vec<String> = state
        .groups
        .iter()
        .filter(|(_, assigned)| **assigned)
        .map(|(group, _)| group.to_string())
        .collect();
    if !groups.is_empty() {
        line.push_str(&format!("  groups: {}", groups.join(", ")));
    }
    line
}

/// Interactive prompt driving the console through `driver`
///
/// Returns when the user quits or stdin closes.
pub async fn run_repl(driver: Arc<AvantisDriver>) -> Result<()> {
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

    // rustyline blocks; a plain thread does not hold up runtime shutdown
    std::thread::Builder::new()
        .name("repl".to_string())
        .spawn(move || read_lines(line_tx))
        .context("Failed to start REPL thread")?;

    println!("{}", "Type 'help' for commands".dimmed());

    while let Some(line) = line_rx.recv().await {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{} {:#}", "✗".red(), e);
                continue;
            }
        };

        match command {
            ReplCommand::Quit => break,
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::Status => {
                println!("Connection: {:?}", driver.connection_status());
                let scene = driver
                    .current_scene()
                    .await
                    .map_or_else(|| "?".to_string(), |s| s.to_string());
                match driver.current_scene_name().await {
                    Some(name) => println!("Current scene: {} ({})", scene, name),
                    None => println!("Current scene: {}", scene),
                }
            }
            ReplCommand::Sync => match driver.sync().await {
                Ok(()) => println!("{} state queries sent", "✓".green()),
                Err(e) => println!("{} {:#}", "✗".red(), e),
            },
            ReplCommand::Show(channel) => match driver.channel_state(channel).await {
                Some(state) => println!("{}", render_state(channel, &state)),
                None => println!("{} no state for {}", "✗".red(), channel),
            },
            ReplCommand::Action(request) => {
                let label = request.to_string();
                match driver.perform(request).await {
                    Ok(_) => println!("{} {}", "✓".green(), label),
                    Err(e) => println!("{} {:#}", "✗".red(), e),
                }
            }
        }
    }

    Ok(())
}

/// What to keep in history for a line: trimmed, never blank
fn history_entry(line: &str) -> Option<&str> {
    Some(line.trim()).filter(|entry| !entry.is_empty())
}

fn read_lines(line_tx: mpsc::UnboundedSender<String>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            warn!("REPL unavailable: {}", e);
            return;
        }
    };
    loop {
        match rl.readline("avantis> ") {
            Ok(line) => {
                if let Some(entry) = history_entry(&line) {
                    if let Err(e) = rl.add_history_entry(entry) {
                        debug!("History not updated: {}", e);
                    }
                }
                let quitting = matches!(line.trim(), "quit" | "exit");
                if line_tx.send(line).is_err() || quitting {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                warn!("REPL read failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(kind: ChannelType, index: u16) -> LogicalChannel {
        LogicalChannel::new(kind, index).unwrap()
    }

    fn action(line: &str) -> ActionRequest {
        match parse_command(line).unwrap() {
            Some(ReplCommand::Action(request)) => request,
            other => panic!("expected an action, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_and_meta_commands() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("quit").unwrap(), Some(ReplCommand::Quit));
        assert_eq!(parse_command("SYNC").unwrap(), Some(ReplCommand::Sync));
        assert_eq!(
            parse_command("show dca 4").unwrap(),
            Some(ReplCommand::Show(ch(ChannelType::Dca, 4)))
        );
    }

    #[test]
    fn test_mute_and_fader() {
        assert_eq!(
            action("mute input 5 on"),
            ActionRequest::Mute { channel: ch(ChannelType::Input, 5), state: MuteState::On }
        );
        assert_eq!(
            action("mute main 1"),
            ActionRequest::Mute { channel: ch(ChannelType::Main, 1), state: MuteState::Toggle }
        );
        assert_eq!(
            action("fader stereo_aux 2 -5dB"),
            ActionRequest::Fader { channel: ch(ChannelType::StereoAux, 2), db: -5.0 }
        );
        match action("fader input 1 -inf") {
            ActionRequest::Fader { db, .. } => assert!(db.is_infinite()),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_name_keeps_spaces_and_color_labels() {
        assert_eq!(
            action("name input 3 Lead Vox"),
            ActionRequest::SetName { channel: ch(ChannelType::Input, 3), name: "Lead Vox".into() }
        );
        assert_eq!(
            action("color input 3 lt blue"),
            ActionRequest::SetColor { channel: ch(ChannelType::Input, 3), color: Color::LtBlue }
        );
    }

    #[test]
    fn test_assign_and_send() {
        assert_eq!(
            action("assign input 1 dca 1,3 off"),
            ActionRequest::Assign {
                channel: ch(ChannelType::Input, 1),
                groups: vec![ch(ChannelType::Dca, 1), ch(ChannelType::Dca, 3)],
                assign: false,
            }
        );
        assert_eq!(
            action("send input 2 mono_aux 4 -10"),
            ActionRequest::SendLevel {
                source: ch(ChannelType::Input, 2),
                destination: ch(ChannelType::MonoAux, 4),
                db: -10.0,
            }
        );
    }

    #[test]
    fn test_errors() {
        assert!(parse_command("mute input 65").is_err());
        assert!(parse_command("scene 0").is_err());
        assert!(parse_command("main dca 1 on").is_err());
        assert!(parse_command("assign input 1 mono_aux 1").is_err());
        assert!(parse_command("frobnicate").is_err());
    }

    #[test]
    fn test_history_skips_blank_lines() {
        assert_eq!(history_entry("  mute input 1  "), Some("mute input 1"));
        assert_eq!(history_entry("   "), None);
        assert_eq!(history_entry(""), None);
    }

    #[test]
    fn test_render_state_marks_unknowns() {
        colored::control::set_override(false);
        let state = ChannelState {
            mute: Some(true),
            name: Some("Kick".into()),
            ..ChannelState::default()
        };
        let line = render_state(ch(ChannelType::Input, 1), &state);
        assert!(line.contains("name: Kick"));
        assert!(line.contains("mute: MUTED"));
        assert!(line.contains("level: ?"));
    }
}
