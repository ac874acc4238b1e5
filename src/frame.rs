//! STOMP 1.2 frame model.
//!
//! A [`Frame`] is either a heartbeat (a bare newline with no command or
//! headers) or a command frame carrying an ordered header list and,
//! for a handful of commands, a body.

use std::fmt;

/// Headers are kept as an ordered list rather than a map: STOMP mandates
/// that the *first* occurrence of a header name wins, and preserving
/// insertion order makes that rule trivial to apply on both read and
/// write paths without a second pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a header, keeping any existing occurrence of the same name first.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Returns the value of the first occurrence of `name`, per STOMP's
    /// "first header wins" rule.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Headers sorted by name, used when serializing so that output is
    /// deterministic and easy to assert against in tests.
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<_> = self.0.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The set of STOMP 1.2 commands this client sends or receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // client -> server
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Begin,
    Commit,
    Abort,
    Ack,
    Nack,
    Disconnect,
    // server -> client
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        })
    }

    /// CONNECT/STOMP/CONNECTED headers are not escaped, per the STOMP 1.2 spec.
    pub fn skips_header_escaping(self) -> bool {
        matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame, or a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Heartbeat,
    Command {
        command: Command,
        headers: Headers,
        body: Vec<u8>,
    },
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Frame::Command {
            command,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(command: Command, body: impl Into<Vec<u8>>) -> Self {
        Frame::Command {
            command,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Frame::Command { headers, .. } = &mut self {
            headers.push(name, value);
        }
        self
    }

    pub fn command(&self) -> Option<Command> {
        match self {
            Frame::Heartbeat => None,
            Frame::Command { command, .. } => Some(*command),
        }
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        match self {
            Frame::Heartbeat => None,
            Frame::Command { headers, .. } => headers.get(name),
        }
    }

    pub fn body(&self) -> &[u8] {
        match self {
            Frame::Heartbeat => &[],
            Frame::Command { body, .. } => body,
        }
    }
}
