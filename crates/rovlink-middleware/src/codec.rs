//! Line-oriented wire codec.
//!
//! Every message, in both directions, is one ASCII line of space-separated
//! fields terminated by `\n`.  There is no escaping, so outbound fields are
//! checked for separators before they are encoded.
//!
//! | Direction | Shape |
//! |---|---|
//! | client → robot | `ai`, `drive <left> <right>`, `led <id> <status>` |
//! | robot → client | `<tag> <arg> <arg> …` |

use std::fmt::Display;
use std::str::FromStr;

use rovlink_hal::DriveCommand;
use rovlink_types::LinkError;

/// Handshake sent once after connecting; identifies an automated controller.
pub const HANDSHAKE: &str = "ai";

/// An outbound command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Handshake,
    Drive(DriveCommand),
    Led {
        id: u32,
        status: String,
    },
}

impl Command {
    /// Build an LED command, rejecting status tokens that would break the line
    /// framing.
    pub fn led(id: u32, status: impl AsRef<str>) -> Result<Self, LinkError> {
        let status = status.as_ref();
        if status.is_empty() || status.contains([' ', '\n', '\r']) {
            return Err(LinkError::InvalidCommand(format!(
                "LED status must be a single non-empty token, got {status:?}"
            )));
        }
        Ok(Command::Led {
            id,
            status: status.to_string(),
        })
    }

    /// Encode as a `\n`-terminated line.
    pub fn encode(&self) -> String {
        match self {
            Command::Handshake => format!("{HANDSHAKE}\n"),
            Command::Drive(cmd) => format!("drive {} {}\n", cmd.left, cmd.right),
            Command::Led { id, status } => format!("led {id} {status}\n"),
        }
    }
}

/// One inbound line after splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// Empty first token: the robot closed the stream or stopped responding.
    Closed,
    Frame(Frame<'a>),
}

/// A tagged inbound line: `tags[0]` is the tag, the rest are its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    line: &'a str,
    tag: &'a str,
    args: Vec<&'a str>,
}

impl<'a> Frame<'a> {
    pub fn tag(&self) -> &'a str {
        self.tag
    }

    pub fn args(&self) -> &[&'a str] {
        &self.args
    }

    /// The line without its terminator.
    pub fn line(&self) -> &'a str {
        self.line
    }

    /// Fail unless at least `count` arguments follow the tag.
    pub fn expect_args(&self, count: usize) -> Result<(), LinkError> {
        if self.args.len() < count {
            return Err(self.error(format!(
                "`{}` needs {count} argument(s), got {}",
                self.tag,
                self.args.len()
            )));
        }
        Ok(())
    }

    /// Parse argument `index` (0 is the first token after the tag).
    pub fn parse<T>(&self, index: usize) -> Result<T, LinkError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let token = self
            .args
            .get(index)
            .ok_or_else(|| self.error(format!("missing argument {index}")))?;
        token
            .parse()
            .map_err(|e| self.error(format!("argument {index} ({token:?}): {e}")))
    }

    /// Parse every argument from `start` onward.
    pub fn parse_rest<T>(&self, start: usize) -> Result<Vec<T>, LinkError>
    where
        T: FromStr,
        T::Err: Display,
    {
        (start..self.args.len()).map(|i| self.parse(i)).collect()
    }

    pub fn error(&self, reason: impl Into<String>) -> LinkError {
        LinkError::protocol(self.line, reason)
    }
}

/// Split one raw line (terminator included or not) into tag and arguments.
///
/// Only the trailing `\n` is stripped.  A line whose first token is empty
/// (an empty line, or one starting with a space) is [`Inbound::Closed`].
pub fn parse_line(raw: &str) -> Result<Inbound<'_>, LinkError> {
    let line = raw.strip_suffix('\n').unwrap_or(raw);
    let mut tokens = line.split(' ');
    let tag = tokens.next().unwrap_or_default();
    if tag.is_empty() {
        return Ok(Inbound::Closed);
    }
    Ok(Inbound::Frame(Frame {
        line,
        tag,
        args: tokens.collect(),
    }))
}

/// Decode a `drive <left> <right>` line.
pub fn parse_drive(raw: &str) -> Result<DriveCommand, LinkError> {
    match parse_line(raw)? {
        Inbound::Frame(frame) if frame.tag() == "drive" => {
            frame.expect_args(2)?;
            Ok(DriveCommand {
                left: frame.parse(0)?,
                right: frame.parse(1)?,
            })
        }
        Inbound::Frame(frame) => Err(frame.error("not a drive command")),
        Inbound::Closed => Err(LinkError::protocol(raw, "empty line")),
    }
}
