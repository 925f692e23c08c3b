// ─── Operator Commands ───
// One line of stdin per command; results go to stdout.

use std::str::FromStr;

use crate::core::error::ManagerResult;
use crate::core::state::ServerManager;

const DEFAULT_LOG_LINES: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Versions { include_unstable: bool },
    Start(String),
    Stop(String),
    Restart(String),
    Accept(String),
    Send { name: String, text: String },
    Log { name: String, lines: usize },
    Clear(String),
    Running,
    Help,
    Quit,
}

/// Whether the operator loop keeps going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub const HELP: &str = "\
commands:
  list                    instance directories and their state
  versions [all]          available server versions (all = include snapshots)
  start <name>            start an instance
  stop <name>             stop an instance
  restart <name>          stop, wait, start
  accept <name>           accept the agreement for an instance
  send <name> <text>      send a console command
  log <name> [n]          last n console lines
  clear <name>            clear the console log
  running                 names of running instances
  quit                    stop everything and exit";

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let name = |usage: &str| -> Result<String, String> {
            match rest.split_whitespace().next() {
                Some(name) => Ok(name.to_string()),
                None => Err(format!("usage: {usage}")),
            }
        };

        match verb.to_ascii_lowercase().as_str() {
            "list" | "ls" => Ok(Command::List),
            "versions" => Ok(Command::Versions {
                include_unstable: rest.eq_ignore_ascii_case("all"),
            }),
            "start" => name("start <name>").map(Command::Start),
            "stop" => name("stop <name>").map(Command::Stop),
            "restart" => name("restart <name>").map(Command::Restart),
            "accept" => name("accept <name>").map(Command::Accept),
            "clear" => name("clear <name>").map(Command::Clear),
            "send" => match rest.split_once(char::is_whitespace) {
                Some((name, text)) if !text.trim().is_empty() => Ok(Command::Send {
                    name: name.to_string(),
                    text: text.trim().to_string(),
                }),
                _ => Err("usage: send <name> <text>".to_string()),
            },
            "log" => {
                let mut parts = rest.split_whitespace();
                let name = parts
                    .next()
                    .ok_or_else(|| "usage: log <name> [n]".to_string())?;
                let lines = match parts.next() {
                    Some(n) => n.parse().map_err(|_| format!("not a line count: {n}"))?,
                    None => DEFAULT_LOG_LINES,
                };
                Ok(Command::Log {
                    name: name.to_string(),
                    lines,
                })
            }
            "running" => Ok(Command::Running),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            "" => Err(String::new()),
            other => Err(format!("unknown command {other:?}; try help")),
        }
    }
}

/// Run one command against the manager.
pub async fn dispatch(manager: &ServerManager, command: Command) -> ManagerResult<Flow> {
    match command {
        Command::List => {
            let instances = manager.discover().await?;
            if instances.is_empty() {
                println!("no instances under {:?}", manager.settings().servers_dir());
            }
            for instance in instances {
                println!(
                    "{:<20} {:<9} version={} agreement={} {}",
                    instance.name,
                    instance.state.to_string(),
                    instance.version.as_deref().unwrap_or("-"),
                    if instance.agreement_accepted { "yes" } else { "no" },
                    instance.description
                );
            }
        }
        Command::Versions { include_unstable } => {
            for version in manager.versions(include_unstable).await? {
                println!("{version}");
            }
        }
        Command::Start(name) => {
            manager.start(&name).await?;
            println!("{name} started");
        }
        Command::Stop(name) => {
            manager.stop(&name).await?;
            println!("{name} stopped");
        }
        Command::Restart(name) => {
            manager.restart(&name).await?;
            println!("{name} restarted");
        }
        Command::Accept(name) => {
            manager.accept_agreement(&name).await?;
            println!("agreement accepted for {name}");
        }
        Command::Send { name, text } => manager.send(&name, &text).await?,
        Command::Log { name, lines } => {
            for line in manager.console_tail(&name, lines).await? {
                println!("{line}");
            }
        }
        Command::Clear(name) => manager.clear_console(&name).await?,
        Command::Running => {
            let running = manager.running().await;
            if running.is_empty() {
                println!("nothing running");
            } else {
                println!("{}", running.join(", "));
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}
