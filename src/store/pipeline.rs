//! Command batching.
//!
//! A [`Pipeline`] collects write commands so a store can submit them in a
//! single round trip. Queuing never fails and never touches the network;
//! everything happens in [`BitStore::flush`](crate::store::BitStore::flush).

use crate::protocol::RespValue;
use std::time::Duration;

/// A write command that can be queued on a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `SETBIT key offset 0|1`
    SetBit { key: String, offset: u64, value: bool },

    /// `PEXPIRE key milliseconds`
    Expire { key: String, ttl: Duration },
}

impl Command {
    /// The key this command targets.
    pub fn key(&self) -> &str {
        match self {
            Command::SetBit { key, .. } | Command::Expire { key, .. } => key,
        }
    }

    /// Encodes the command as a RESP request array.
    pub fn to_resp(&self) -> RespValue {
        match self {
            Command::SetBit { key, offset, value } => RespValue::command([
                "SETBIT",
                key.as_str(),
                offset.to_string().as_str(),
                if *value { "1" } else { "0" },
            ]),
            Command::Expire { key, ttl } => RespValue::command([
                "PEXPIRE",
                key.as_str(),
                ttl.as_millis().to_string().as_str(),
            ]),
        }
    }
}

/// An ordered batch of commands waiting to be flushed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty pipeline with room for `capacity` commands.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    /// Queues a `SETBIT`.
    pub fn set_bit(&mut self, key: impl Into<String>, offset: u64, value: bool) -> &mut Self {
        self.commands.push(Command::SetBit {
            key: key.into(),
            offset,
            value,
        });
        self
    }

    /// Queues a `PEXPIRE`.
    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.commands.push(Command::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The queued commands, in submission order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Consumes the pipeline and returns its commands.
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}
