//! CTCP framing inside PRIVMSG/NOTICE bodies: `\x01VERB [args]\x01`.

const DELIM: char = '\x01';

/// A CTCP query or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ctcp<'a> {
    /// Uppercased verb (`VERSION`, `PING`, `ACTION`, ...).
    pub verb: String,
    pub args: Option<&'a str>,
}

impl<'a> Ctcp<'a> {
    /// Parse a message body. The closing delimiter is optional, as many
    /// clients omit it.
    pub fn parse(text: &'a str) -> Option<Self> {
        let inner = text.strip_prefix(DELIM)?;
        let inner = inner.strip_suffix(DELIM).unwrap_or(inner);
        if inner.is_empty() {
            return None;
        }
        let (verb, args) = match inner.split_once(' ') {
            Some((verb, args)) => (verb, Some(args).filter(|a| !a.is_empty())),
            None => (inner, None),
        };
        Some(Self {
            verb: verb.to_ascii_uppercase(),
            args,
        })
    }

    /// True when `text` looks like a CTCP frame at all.
    pub fn is_ctcp(text: &str) -> bool {
        text.starts_with(DELIM)
    }
}

/// Frame a CTCP body.
pub fn frame(verb: &str, args: Option<&str>) -> String {
    match args {
        Some(args) => format!("{DELIM}{verb} {args}{DELIM}"),
        None => format!("{DELIM}{verb}{DELIM}"),
    }
}

/// CTCP verbs answered automatically.
pub const SUPPORTED: &[&str] = &["ACTION", "CLIENTINFO", "PING", "TIME", "VERSION"];
