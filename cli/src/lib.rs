// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line commands understood by the interactive CLI

pub mod render;

use anyhow::{anyhow, bail, Result};

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Host a new session
    Create { name: String, capacity: usize },
    /// Join by lobby code
    Join { code: String },
    /// Join any open session
    Quick,
    Leave,
    Rename { name: String },
    /// Print the current player list
    Roster,
    /// Fetch the session right away
    Refresh,
    /// Let a simulated peer join the local session
    PeerJoin,
    /// Let the most recently joined simulated peer leave
    PeerLeave,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  create <name> <capacity>   host a new session
  join <code>                join a session by lobby code
  quick                      join any open session
  leave                      leave the current session
  rename <name>              change your display name
  roster                     show players in the session
  refresh                    fetch the session now
  peer-join                  let a simulated peer join
  peer-leave                 let a simulated peer leave
  status                     show session and timer state
  quit                       leave and exit";

/// Parse one line of input; blank lines yield `None`
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (verb.to_lowercase().as_str(), args.as_slice()) {
        ("create", [name, capacity]) => Command::Create {
            name: name.to_string(),
            capacity: capacity
                .parse()
                .map_err(|_| anyhow!("Invalid capacity '{}'", capacity))?,
        },
        ("create", [name]) => Command::Create {
            name: name.to_string(),
            capacity: 4,
        },
        ("join", [code]) => Command::Join {
            code: code.to_string(),
        },
        ("quick", []) => Command::Quick,
        ("leave", []) => Command::Leave,
        ("rename", [_, ..]) => Command::Rename {
            name: args.join(" "),
        },
        ("roster", []) => Command::Roster,
        ("refresh", []) => Command::Refresh,
        ("peer-join", []) => Command::PeerJoin,
        ("peer-leave", []) => Command::PeerLeave,
        ("status", []) => Command::Status,
        ("help", []) | ("?", []) => Command::Help,
        ("quit", []) | ("exit", []) => Command::Quit,
        (verb, _) => bail!("Unknown command or wrong arguments: '{}' (try 'help')", verb),
    };
    Ok(Some(command))
}
