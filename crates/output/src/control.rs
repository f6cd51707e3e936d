//! Text command protocol shared by the data and control channels
//!
//! Commands are dequeued from a session's ring buffer and matched by prefix
//! against a fixed table. On the control channel every command is answered
//! with zero or more output lines followed by `OK`, or by `KO <reason>`.
//! The data channel only understands `START:`, `DONE:` and `FILTER:`. Its
//! only reply is the bare two bytes `OK` after an accepted filter, since the
//! client goes straight back to parsing binary records; a filter that does
//! not compile closes the session instead.
//!
//! ```text
//! → STATUS:
//! ← channel data
//! ← clients 2
//! ← ...
//! ← OK
//! ```

use bytes::Bytes;
use tracing::{debug, info};

use crate::filter::RecordFilter;
use crate::manager::{Channel, OutputStats};
use crate::session::{ClientSession, CloseReason};

/// A parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Done,
    Display(String),
    Highlight(String),
    Search(String),
    Filter(String),
    Tree(String),
    Mar,
    Status,
    Unknown(String),
}

type Builder = fn(String) -> Command;

/// Command table, matched case-insensitively on the leading word
const COMMANDS: &[(&str, Builder)] = &[
    ("START", |_| Command::Start),
    ("DONE", |_| Command::Done),
    ("DISPLAY", Command::Display),
    ("HIGHLIGHT", Command::Highlight),
    ("SEARCH", Command::Search),
    ("FILTER", Command::Filter),
    ("TREE", Command::Tree),
    ("MAR", |_| Command::Mar),
    ("STATUS", |_| Command::Status),
];

impl Command {
    /// Match a dequeued line against the command table
    ///
    /// The keyword may be followed by `:`, whitespace, or nothing; the rest
    /// of the line is the argument.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        for (name, build) in COMMANDS {
            let Some(head) = line.get(..name.len()) else {
                continue;
            };
            if !head.eq_ignore_ascii_case(name) {
                continue;
            }
            let rest = &line[name.len()..];
            if !(rest.is_empty() || rest.starts_with(':') || rest.starts_with(char::is_whitespace))
            {
                continue;
            }
            let arg = rest.strip_prefix(':').unwrap_or(rest).trim();
            return build(arg.to_string());
        }
        Self::Unknown(line.to_string())
    }

    /// Keyword for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Done => "DONE",
            Self::Display(_) => "DISPLAY",
            Self::Highlight(_) => "HIGHLIGHT",
            Self::Search(_) => "SEARCH",
            Self::Filter(_) => "FILTER",
            Self::Tree(_) => "TREE",
            Self::Mar => "MAR",
            Self::Status => "STATUS",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Per-session display settings stored by the control commands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlState {
    pub display: Option<String>,
    pub highlight: Option<String>,
    pub search: Option<String>,
    pub tree: Option<String>,
}

/// Final line of a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Ok,
    Ko(String),
}

/// Handler output followed by an acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    lines: Vec<String>,
    ack: Ack,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            lines: Vec::new(),
            ack: Ack::Ok,
        }
    }

    pub fn ko(reason: impl Into<String>) -> Self {
        Self {
            lines: Vec::new(),
            ack: Ack::Ko(reason.into()),
        }
    }

    pub fn with_lines(mut self, lines: Vec<String>) -> Self {
        self.lines = lines;
        self
    }

    #[inline]
    pub fn ack(&self) -> &Ack {
        &self.ack
    }

    #[inline]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Wire form: each line newline-terminated, ack last
    pub fn encode(&self) -> Bytes {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        match &self.ack {
            Ack::Ok => out.push_str("OK\n"),
            Ack::Ko(reason) => {
                out.push_str("KO ");
                out.push_str(reason);
                out.push('\n');
            }
        }
        Bytes::from(out)
    }

    /// Wire form for a channel; data-channel acks carry no text around them
    pub fn encode_for(&self, channel: Channel) -> Bytes {
        match (channel, &self.ack) {
            (Channel::Control, _) => self.encode(),
            (Channel::Data, Ack::Ok) => Bytes::from_static(b"OK"),
            (Channel::Data, Ack::Ko(_)) => Bytes::from_static(b"KO"),
        }
    }
}

/// Run a command against a session
///
/// Returns the reply to queue back to the client, if any.
pub fn execute(
    command: Command,
    channel: Channel,
    session: &mut ClientSession,
    stats: &OutputStats,
) -> Option<Reply> {
    debug!(session_id = session.id(), channel = %channel, command = command.name(), "client command");

    match (channel, command) {
        (Channel::Data, Command::Filter(expr)) => {
            let reply = install_filter(session, &expr);
            if reply.ack() != &Ack::Ok {
                session.close(CloseReason::BadFilter);
                return None;
            }
            Some(reply)
        }
        (Channel::Control, Command::Filter(expr)) => Some(install_filter(session, &expr)),
        (Channel::Data, Command::Start) => {
            session.start();
            None
        }
        (Channel::Data, Command::Done) => {
            session.close(CloseReason::PeerDone);
            None
        }
        (Channel::Data, other) => {
            info!(session_id = session.id(), command = ?other, "unrecognised data channel command");
            None
        }
        (Channel::Control, Command::Start) => {
            session.start();
            Some(Reply::ok())
        }
        (Channel::Control, Command::Done) => {
            session.close(CloseReason::PeerDone);
            Some(Reply::ok())
        }
        (Channel::Control, Command::Display(arg)) => {
            Some(store(&mut session.control_mut().display, "DISPLAY", arg))
        }
        (Channel::Control, Command::Highlight(arg)) => {
            Some(store(&mut session.control_mut().highlight, "HIGHLIGHT", arg))
        }
        (Channel::Control, Command::Search(arg)) => {
            Some(store(&mut session.control_mut().search, "SEARCH", arg))
        }
        (Channel::Control, Command::Tree(arg)) => {
            Some(store(&mut session.control_mut().tree, "TREE", arg))
        }
        (Channel::Control, Command::Mar) => Some(Reply::ok().with_lines(vec![stats.summary_line()])),
        (Channel::Control, Command::Status) => Some(Reply::ok().with_lines(stats.report_lines())),
        (Channel::Control, Command::Unknown(line)) => {
            info!(session_id = session.id(), line = %line, "unrecognised control command");
            Some(Reply::ko("unknown command"))
        }
    }
}

fn install_filter(session: &mut ClientSession, expr: &str) -> Reply {
    if expr.is_empty() {
        session.set_filter(None);
        return Reply::ok();
    }
    match RecordFilter::compile(expr) {
        Ok(filter) => {
            info!(session_id = session.id(), filter = %filter, "filter installed");
            session.set_filter(Some(filter));
            Reply::ok()
        }
        Err(e) => {
            debug!(session_id = session.id(), error = %e, "filter rejected");
            Reply::ko(e.to_string())
        }
    }
}

/// Store a setting and echo it; an empty argument clears it
fn store(slot: &mut Option<String>, name: &str, arg: String) -> Reply {
    if arg.is_empty() {
        *slot = None;
        return Reply::ok();
    }
    let line = format!("{name}: {arg}");
    *slot = Some(arg);
    Reply::ok().with_lines(vec![line])
}

#[cfg(test)]
#[path = "control_test.rs"]
mod tests;
