//! pbridge - reference host for the session presence bridge
//!
//! Simulates a game server: it loads the bridge like a plugin, registers the
//! configured commands, then turns stdin lines into player signals.
//!
//! # Usage
//!
//! ```bash
//! # Use the default config ($PBRIDGE_CONFIG or ~/.config/pbridge/bridge.toml)
//! pbridge
//!
//! # Point at a controller directly
//! pbridge --controller 10.0.0.5:7450
//!
//! # Enable debug logging
//! RUST_LOG=pbridge_plugin=debug pbridge
//! ```
//!
//! Input lines:
//!
//! ```text
//! join <name> <id>
//! leave <name> <id>
//! commands
//! stats
//! quit
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pbridge_plugin::{BridgeConfig, LocalHost, Registrar};

/// Session presence bridge - reference host
#[derive(Parser, Debug)]
#[command(name = "pbridge", version, about)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Controller address (host:port), overrides the config file
    #[arg(long)]
    controller: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

/// One line of host input.
#[derive(Debug, PartialEq, Eq)]
enum HostInput {
    Join { name: String, id: String },
    Leave { name: String, id: String },
    Commands,
    Stats,
    Quit,
}

impl HostInput {
    /// Parses a line; `Ok(None)` for blank lines.
    fn parse(line: &str) -> std::result::Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let input = match verb {
            "join" | "leave" => {
                let (Some(name), Some(id), None) = (words.next(), words.next(), words.next())
                else {
                    return Err(format!("usage: {verb} <name> <id>"));
                };
                let (name, id) = (name.to_string(), id.to_string());
                if verb == "join" {
                    Self::Join { name, id }
                } else {
                    Self::Leave { name, id }
                }
            }
            "commands" => Self::Commands,
            "stats" => Self::Stats,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown input '{other}'")),
        };
        Ok(Some(input))
    }
}

fn init_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("pbridge={level}").parse()?)
                .add_directive(format!("pbridge_plugin={level}").parse()?)
                .add_directive(format!("pbridge_protocol={level}").parse()?),
        )
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug)?;

    let mut config =
        BridgeConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(address) = args.controller {
        config.controller.address = address;
        config.validate().context("Invalid --controller")?;
    }

    run(config, io::stdin().lock(), io::stdout().lock())
}

fn run(config: BridgeConfig, input: impl BufRead, mut output: impl Write) -> Result<()> {
    let mut host = LocalHost::new();
    let mut registrar = Registrar::new(config);

    // Bootstrap phase
    registrar.bootstrap().context("Failed to bootstrap bridge")?;
    registrar
        .register_commands(&mut host)
        .context("Failed to register commands")?;

    // Plugin phase
    let bridge = registrar.provide_instance();
    bridge.activate().context("Failed to activate bridge")?;
    bridge.attach(&mut host);
    info!("Host ready, reading signals from stdin");

    for line in input.lines() {
        let line = line.context("Failed to read input")?;
        match HostInput::parse(&line) {
            Ok(None) => {}
            Ok(Some(HostInput::Join { name, id })) => host.player_arrived(&name, &id),
            Ok(Some(HostInput::Leave { name, id })) => host.player_departed(&name, &id),
            Ok(Some(HostInput::Commands)) => {
                for command in host.commands() {
                    writeln!(output, "/{} - {}", command.name, command.description)?;
                    if let Some(usage) = &command.usage {
                        writeln!(output, "    usage: {usage}")?;
                    }
                    if let Some(permission) = &command.permission {
                        writeln!(output, "    permission: {permission}")?;
                    }
                }
            }
            Ok(Some(HostInput::Stats)) => {
                let stats = bridge.stats();
                writeln!(
                    output,
                    "connected={} submitted={} delivered={} retried={} dropped={} rejected={} in_flight={}",
                    bridge.is_connected(),
                    stats.submitted,
                    stats.delivered,
                    stats.retried,
                    stats.dropped,
                    stats.rejected,
                    stats.in_flight()
                )?;
            }
            Ok(Some(HostInput::Quit)) => break,
            Err(e) => warn!(input = %line, "{e}"),
        }
    }

    let report = bridge.deactivate().context("Failed to deactivate bridge")?;
    writeln!(
        output,
        "flushed={} dropped={}",
        report.flushed, report.dropped
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbridge_plugin::CommandDescriptor;

    #[test]
    fn test_parse_signals() {
        assert_eq!(
            HostInput::parse("join Alice 1111").unwrap(),
            Some(HostInput::Join {
                name: "Alice".to_string(),
                id: "1111".to_string()
            })
        );
        assert_eq!(
            HostInput::parse("  leave Alice 1111 ").unwrap(),
            Some(HostInput::Leave {
                name: "Alice".to_string(),
                id: "1111".to_string()
            })
        );
    }

    #[test]
    fn test_parse_other_inputs() {
        assert_eq!(HostInput::parse("").unwrap(), None);
        assert_eq!(HostInput::parse("stats").unwrap(), Some(HostInput::Stats));
        assert_eq!(HostInput::parse("commands").unwrap(), Some(HostInput::Commands));
        assert_eq!(HostInput::parse("exit").unwrap(), Some(HostInput::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(HostInput::parse("join Alice").is_err());
        assert!(HostInput::parse("join Alice 1 extra").is_err());
        assert!(HostInput::parse("dance").is_err());
    }

    #[test]
    fn test_run_lists_commands_and_reports_shutdown() {
        let mut config = BridgeConfig::default();
        // Nothing listens on port 1; events are dropped quickly
        config.controller.address = "127.0.0.1:1".to_string();
        config.retry.max_attempts = 1;
        config.shutdown.grace_period_ms = 100;
        config.commands = vec![CommandDescriptor {
            usage: Some("/lobby [server]".to_string()),
            ..CommandDescriptor::new("lobby", "Return to the lobby")
        }];

        let input = "commands\njoin Alice 1111\nbogus\nquit\njoin Bob 2222\n";
        let mut output = Vec::new();

        run(config, input.as_bytes(), &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("/lobby - Return to the lobby"));
        assert!(output.contains("usage: /lobby [server]"));
        assert!(output.contains("flushed=0"));
    }
}
