//! IRC message codec.
//!
//! Line grammar (RFC 1459 / RFC 2812):
//!
//! ```text
//! [':' prefix SPACE] verb *(SPACE param) [SPACE ':' trailing]
//! ```
//!
//! Lines are CR-LF terminated on the wire and at most [`MAX_LINE_LENGTH`]
//! bytes long, terminator included. [`Message::parse`] accepts a line with or
//! without its terminator; [`Message::encode`] never appends one.

use std::fmt;

/// Maximum line length on the wire, including the trailing `\r\n`.
pub const MAX_LINE_LENGTH: usize = 512;

/// Who sent a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A bare server name (`irc.example.net`).
    Server(String),
    /// A user prefix, `nick!ident@host`. Ident and host are empty when the
    /// server omitted them.
    User {
        nick: String,
        ident: String,
        host: String,
    },
}

impl Source {
    /// Classify a raw prefix. Anything carrying a `!` or `@` is a user.
    pub fn parse(prefix: &str) -> Self {
        if !prefix.contains('!') && !prefix.contains('@') {
            return Source::Server(prefix.to_string());
        }
        let (nick_ident, host) = match prefix.split_once('@') {
            Some((left, host)) => (left, host),
            None => (prefix, ""),
        };
        let (nick, ident) = match nick_ident.split_once('!') {
            Some((nick, ident)) => (nick, ident),
            None => (nick_ident, ""),
        };
        Source::User {
            nick: nick.to_string(),
            ident: ident.to_string(),
            host: host.to_string(),
        }
    }

    /// Build a user source from its three parts.
    pub fn user(nick: &str, ident: &str, host: &str) -> Self {
        Source::User {
            nick: nick.to_string(),
            ident: ident.to_string(),
            host: host.to_string(),
        }
    }

    /// The nickname, if this is a user source.
    pub fn nick(&self) -> Option<&str> {
        match self {
            Source::User { nick, .. } => Some(nick),
            Source::Server(_) => None,
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Source::Server(_))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Server(name) => f.write_str(name),
            Source::User { nick, ident, host } => {
                f.write_str(nick)?;
                if !ident.is_empty() {
                    write!(f, "!{ident}")?;
                }
                if !host.is_empty() {
                    write!(f, "@{host}")?;
                }
                Ok(())
            }
        }
    }
}

/// Codec failures. Both are local to a single line: drop it and move on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),
    #[error("invalid parameter sequence: {0}")]
    InvalidParameterSequence(&'static str),
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub source: Option<Source>,
    /// Command name (`PRIVMSG`) or three-digit numeric (`001`).
    pub verb: String,
    pub params: Vec<String>,
}

impl Message {
    /// A message with no source, as a client sends it.
    pub fn new(verb: &str, params: Vec<&str>) -> Self {
        Self {
            source: None,
            verb: verb.to_string(),
            params: params.into_iter().map(str::to_string).collect(),
        }
    }

    /// Attach a source prefix.
    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    /// Parse a single line. A trailing `\r\n` (or bare `\n`) is ignored.
    pub fn parse(line: &str) -> Result<Self, CodecError> {
        let body = line
            .strip_suffix('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .unwrap_or(line);

        if body.is_empty() {
            return Err(CodecError::MalformedMessage("empty line"));
        }
        if body.len() + 2 > MAX_LINE_LENGTH {
            return Err(CodecError::MalformedMessage("line exceeds 512 bytes"));
        }
        if body.contains(['\r', '\n', '\0']) {
            return Err(CodecError::MalformedMessage("embedded line break or NUL"));
        }

        let (source, rest) = match body.strip_prefix(':') {
            Some(after) => {
                let (prefix, rest) = after
                    .split_once(' ')
                    .ok_or(CodecError::MalformedMessage("prefix without verb"))?;
                if prefix.is_empty() {
                    return Err(CodecError::MalformedMessage("empty prefix"));
                }
                (Some(Source::parse(prefix)), rest.trim_start_matches(' '))
            }
            None => (None, body),
        };

        let (verb, mut remaining) = match rest.split_once(' ') {
            Some((verb, params)) => (verb, params),
            None => (rest, ""),
        };
        if !is_valid_verb(verb) {
            return Err(CodecError::MalformedMessage("missing or invalid verb"));
        }

        let mut params = Vec::new();
        while !remaining.is_empty() {
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, next)) => {
                    if !param.is_empty() {
                        params.push(param.to_string());
                    }
                    remaining = next;
                }
                None => {
                    params.push(remaining.to_string());
                    break;
                }
            }
        }

        Ok(Message {
            source,
            verb: verb.to_string(),
            params,
        })
    }

    /// Serialize to wire form without the terminator.
    ///
    /// Only the final parameter may contain spaces, be empty, or start with
    /// `:`; it is written with the trailing marker exactly when one of those
    /// holds.
    pub fn encode(&self) -> Result<String, CodecError> {
        if !is_valid_verb(&self.verb) {
            return Err(CodecError::InvalidParameterSequence("invalid verb"));
        }

        let mut out = String::with_capacity(64);
        if let Some(source) = &self.source {
            check_source(source)?;
            out.push(':');
            out.push_str(&source.to_string());
            out.push(' ');
        }
        out.push_str(&self.verb);

        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if param.contains(['\r', '\n', '\0']) {
                return Err(CodecError::InvalidParameterSequence(
                    "parameter contains a line break or NUL",
                ));
            }
            out.push(' ');
            let needs_marker = param.is_empty() || param.contains(' ') || param.starts_with(':');
            if needs_marker {
                if i != last {
                    return Err(CodecError::InvalidParameterSequence(
                        "only the final parameter may be empty, contain spaces or start with ':'",
                    ));
                }
                out.push(':');
            }
            out.push_str(param);
        }

        if out.len() + 2 > MAX_LINE_LENGTH {
            return Err(CodecError::InvalidParameterSequence("line exceeds 512 bytes"));
        }
        Ok(out)
    }

    /// Source nickname, for messages sent by users.
    pub fn nick(&self) -> Option<&str> {
        self.source.as_ref().and_then(Source::nick)
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// True for three-digit numeric replies.
    pub fn is_numeric(&self) -> bool {
        self.verb.len() == 3 && self.verb.bytes().all(|b| b.is_ascii_digit())
    }
}

impl fmt::Display for Message {
    /// Best-effort rendering for logs; use [`Message::encode`] for the wire.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Ok(line) => f.write_str(&line),
            Err(_) => write!(f, "{} {:?}", self.verb, self.params),
        }
    }
}

/// Reject sources that would decode back as something else.
fn check_source(source: &Source) -> Result<(), CodecError> {
    let bad = |part: &str| part.contains([' ', '\r', '\n', '\0']);
    match source {
        Source::Server(name) => {
            if name.is_empty() || bad(name) || name.contains(['!', '@']) {
                return Err(CodecError::InvalidParameterSequence("invalid server source"));
            }
        }
        Source::User { nick, ident, host } => {
            if nick.is_empty() || bad(nick) || bad(ident) || bad(host) {
                return Err(CodecError::InvalidParameterSequence("invalid user source"));
            }
            if nick.contains(['!', '@']) || ident.contains('@') {
                return Err(CodecError::InvalidParameterSequence(
                    "user source part contains a separator",
                ));
            }
            // A bare nick would read back as a server name.
            if ident.is_empty() && host.is_empty() {
                return Err(CodecError::InvalidParameterSequence(
                    "user source needs an ident or host",
                ));
            }
        }
    }
    Ok(())
}

fn is_valid_verb(verb: &str) -> bool {
    if verb.is_empty() {
        return false;
    }
    let numeric = verb.len() == 3 && verb.bytes().all(|b| b.is_ascii_digit());
    numeric || verb.bytes().all(|b| b.is_ascii_alphabetic())
}
