//! Parsing of the remote command line the SSH layer hands us.
//!
//! The peer's exec request carries a single string of the form
//! `scp <flags> <path>`. Recognized flags are `-t` (sink), `-f` (source),
//! `-r` (recursive), `-p` (preserve) and `-d` (target must be a directory);
//! unknown flags are ignored for forward compatibility. Everything after
//! the flags is the target path, spaces included.

use crate::errors::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// `scp -f`: read the local filesystem, transmit to the peer.
    Source,
    /// `scp -t`: receive from the peer, write the local filesystem.
    Sink,
}

/// A parsed `scp` invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub direction: Direction,
    pub recursive: bool,
    pub preserve: bool,
    pub must_be_directory: bool,
    pub target: String,
}

impl Command {
    /// Sink-side settings for this invocation.
    pub fn sink_settings(&self, buffer_size: usize) -> crate::sink::Settings {
        crate::sink::Settings {
            recursive: self.recursive,
            must_be_directory: self.must_be_directory,
            preserve: self.preserve,
            buffer_size,
        }
    }

    /// Source-side settings for this invocation.
    pub fn source_settings(&self, buffer_size: usize) -> crate::source::Settings {
        crate::source::Settings {
            recursive: self.recursive,
            preserve: self.preserve,
            buffer_size,
        }
    }
}

pub fn parse(command: &str) -> Result<Command> {
    let unsupported = || Error::ProtocolViolation(format!("unsupported command: {command:?}"));
    let mut tokens = command.split_whitespace().peekable();
    if tokens.next() != Some("scp") {
        return Err(unsupported());
    }
    let mut direction = None;
    let mut recursive = false;
    let mut preserve = false;
    let mut must_be_directory = false;
    while let Some(token) = tokens.peek() {
        let Some(flags) = token.strip_prefix('-') else {
            break;
        };
        for flag in flags.chars() {
            match flag {
                't' => direction = Some(Direction::Sink),
                'f' => direction = Some(Direction::Source),
                'r' => recursive = true,
                'p' => preserve = true,
                'd' => must_be_directory = true,
                // unknown flags are ignored
                other => tracing::debug!("ignoring unknown scp flag -{}", other),
            }
        }
        tokens.next();
    }
    let target = tokens.collect::<Vec<_>>().join(" ");
    if target.is_empty() {
        return Err(unsupported());
    }
    let Some(direction) = direction else {
        return Err(unsupported());
    };
    Ok(Command {
        direction,
        recursive,
        preserve,
        must_be_directory,
        target,
    })
}
