//! Line commands read from stdin.

use std::str::FromStr;

use deskcast_types::{ParseScreenSizeError, ScreenSize};
use thiserror::Error;

/// A command accepted by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCommand {
    /// Change the virtual screen size.
    Resize(ScreenSize),

    /// Start pushing the broadcast to a destination.
    BroadcastStart(String),

    /// Stop the broadcast.
    BroadcastStop,

    /// Grab a screencast image.
    Screencast,

    /// Print stream statistics.
    Status,

    /// Shut down and exit.
    Quit,
}

/// Errors parsing a command line.
#[derive(Debug, Error)]
pub enum ParseCommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid screen size: {0}")]
    ScreenSize(#[from] ParseScreenSizeError),
}

impl FromStr for ServiceCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(ParseCommandError::Empty)?;

        match command {
            "resize" => {
                let size = words
                    .next()
                    .ok_or(ParseCommandError::MissingArgument("size"))?;
                Ok(Self::Resize(size.parse()?))
            }
            "broadcast" => match words.next() {
                Some("start") => {
                    let url = words
                        .next()
                        .ok_or(ParseCommandError::MissingArgument("url"))?;
                    Ok(Self::BroadcastStart(url.to_string()))
                }
                Some("stop") => Ok(Self::BroadcastStop),
                Some(other) => Err(ParseCommandError::Unknown(format!("broadcast {other}"))),
                None => Err(ParseCommandError::MissingArgument("start|stop")),
            },
            "screencast" => Ok(Self::Screencast),
            "status" => Ok(Self::Status),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}
