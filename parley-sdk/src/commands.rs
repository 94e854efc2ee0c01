//! Interactive commands addressed to the client by users.
//!
//! A text message is matched once against a single regex built from every
//! registered keyword. The matched [`Command`] runs with a [`Request`]
//! carrying where it was asked ([`Location`]), who asked (the directory
//! [`User`]) and with what [`Role`]. Typed failures become exactly one
//! explanatory reply to the same target; anything else is handed back to the
//! registry boundary as a handler error.
//!
//! Commands return replies rather than sending them, so reply order is the
//! order of the returned vector. Pacing between lines is left to the outbound
//! flood gate.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::casemap;
use crate::directory::{Directory, User, UserId};
use crate::irc::Message;

/// Longest reply text per line, leaving room for the prefix and target.
pub const MAX_REPLY_LEN: usize = 400;

/// Where a command was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Channel(String),
    Private,
}

impl Location {
    pub fn is_channel(&self) -> bool {
        matches!(self, Location::Channel(_))
    }

    pub fn channel(&self) -> Option<&str> {
        match self {
            Location::Channel(name) => Some(name),
            Location::Private => None,
        }
    }
}

/// Where a command may be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationPolicy {
    #[default]
    Any,
    ChannelOnly,
    PrivateOnly,
}

impl LocationPolicy {
    pub fn allows(self, location: &Location) -> bool {
        match self {
            LocationPolicy::Any => true,
            LocationPolicy::ChannelOnly => location.is_channel(),
            LocationPolicy::PrivateOnly => !location.is_channel(),
        }
    }
}

/// Privilege of the requesting user, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Role {
    #[default]
    Normal,
    Voiced,
    Operator,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Normal => "normal",
            Role::Voiced => "voiced",
            Role::Operator => "operator",
            Role::Admin => "admin",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("wrong location")]
    InsufficientLocation(LocationPolicy),
    #[error("requires {0} access")]
    InsufficientRole(Role),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Output of a command, in send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// PRIVMSG to the reply target; long text is wrapped.
    Say(String),
    /// NOTICE to the requesting user.
    Notice(String),
    /// CTCP ACTION to the reply target.
    Action(String),
    /// Any other outbound message, sent as is.
    Raw(Message),
}

/// One incoming command invocation.
pub struct Request<'a> {
    pub location: &'a Location,
    pub user_id: UserId,
    pub user: &'a User,
    pub role: Role,
    /// Matched keyword, lowercased.
    pub keyword: &'a str,
    /// Everything after the keyword, trimmed.
    pub args: &'a str,
    pub directory: &'a Directory,
    pub own_nick: &'a str,
    pub commands: &'a Commands,
}

impl Request<'_> {
    /// Channel for channel requests, the requester's nick for private ones.
    pub fn reply_target(&self) -> &str {
        self.location.channel().unwrap_or(&self.user.nick)
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.split_whitespace().nth(index)
    }

    /// Arguments after the first `skip` words, as one string.
    pub fn rest(&self, skip: usize) -> &str {
        let mut rest = self.args;
        for _ in 0..skip {
            rest = rest.trim_start();
            match rest.find(char::is_whitespace) {
                Some(end) => rest = &rest[end..],
                None => return "",
            }
        }
        rest.trim()
    }
}

pub trait Command: Send + Sync {
    /// Keywords that trigger this command. The first is its display name.
    fn keywords(&self) -> &'static [&'static str];

    /// One-line description for help output.
    fn summary(&self) -> &'static str;

    /// Argument synopsis, without the keyword.
    fn usage(&self) -> &'static str {
        ""
    }

    fn location(&self) -> LocationPolicy {
        LocationPolicy::Any
    }

    fn role(&self) -> Role {
        Role::Normal
    }

    fn run(&self, req: &Request<'_>) -> Result<Vec<Reply>, CommandError>;
}

/// A `nick!ident@host` glob with `*` and `?` wildcards. Matching uses the
/// same RFC 1459 casemapping as nickname comparison.
#[derive(Debug, Clone)]
pub struct HostMask {
    glob: String,
    pattern: Regex,
}

impl HostMask {
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        let mut source = String::from("^");
        for c in casemap::fold(glob).chars() {
            match c {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                _ => source.push_str(&regex::escape(&c.to_string())),
            }
        }
        source.push('$');
        let pattern = Regex::new(&source)?;
        Ok(Self {
            glob: glob.to_string(),
            pattern,
        })
    }

    pub fn matches(&self, hostmask: &str) -> bool {
        self.pattern.is_match(&casemap::fold(hostmask))
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandSetError {
    #[error("keyword `{0}` is registered twice")]
    DuplicateKeyword(String),
    #[error("invalid admin mask: {0}")]
    Mask(regex::Error),
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

/// Collects commands, then freezes them into [`Commands`].
#[derive(Default)]
pub struct CommandsBuilder {
    prefix: String,
    admins: Vec<String>,
    entries: Vec<Arc<dyn Command>>,
}

impl CommandsBuilder {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            ..Default::default()
        }
    }

    pub fn admin(mut self, mask: &str) -> Self {
        self.admins.push(mask.to_string());
        self
    }

    pub fn command(mut self, command: impl Command + 'static) -> Self {
        self.entries.push(Arc::new(command));
        self
    }

    /// Compile the keyword regex and admin masks.
    pub fn build(self) -> Result<Commands, CommandSetError> {
        let mut by_keyword = HashMap::new();
        for (index, command) in self.entries.iter().enumerate() {
            for keyword in command.keywords() {
                let key = keyword.to_lowercase();
                if by_keyword.insert(key.clone(), index).is_some() {
                    return Err(CommandSetError::DuplicateKeyword(key));
                }
            }
        }

        let mut keywords: Vec<&str> = by_keyword.keys().map(String::as_str).collect();
        keywords.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        let matcher = if keywords.is_empty() {
            None
        } else {
            let alternation = keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            let prefix = regex::escape(&self.prefix);
            let channel = RegexBuilder::new(&format!(r"^{prefix}({alternation})(?:\s+(.*?))?\s*$"))
                .case_insensitive(true)
                .build()?;
            let private =
                RegexBuilder::new(&format!(r"^(?:{prefix})?({alternation})(?:\s+(.*?))?\s*$"))
                    .case_insensitive(true)
                    .build()?;
            Some(Matcher { channel, private })
        };

        let admins = self
            .admins
            .iter()
            .map(|m| HostMask::new(m).map_err(CommandSetError::Mask))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Commands {
            prefix: self.prefix,
            admins,
            entries: self.entries,
            by_keyword,
            matcher,
        })
    }
}

struct Matcher {
    /// Prefix required.
    channel: Regex,
    /// Prefix optional.
    private: Regex,
}

/// A frozen command set with its matcher.
pub struct Commands {
    prefix: String,
    admins: Vec<HostMask>,
    entries: Vec<Arc<dyn Command>>,
    by_keyword: HashMap<String, usize>,
    matcher: Option<Matcher>,
}

impl Commands {
    pub fn builder(prefix: &str) -> CommandsBuilder {
        CommandsBuilder::new(prefix)
    }

    /// A set with no commands.
    pub fn empty() -> Self {
        Self {
            prefix: String::new(),
            admins: Vec::new(),
            entries: Vec::new(),
            by_keyword: HashMap::new(),
            matcher: None,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Command> {
        self.entries.iter().map(|c| c.as_ref())
    }

    pub fn find(&self, keyword: &str) -> Option<&dyn Command> {
        self.by_keyword
            .get(&keyword.to_lowercase())
            .map(|&i| self.entries[i].as_ref())
    }

    /// Split `text` into `(keyword, args)` if it invokes a command.
    ///
    /// In a channel the command prefix is required, unless the text addresses
    /// the client by nick (`nick: cmd`). In private the prefix is optional.
    pub fn parse<'t>(
        &self,
        text: &'t str,
        location: &Location,
        own_nick: &str,
    ) -> Option<(String, &'t str)> {
        let matcher = self.matcher.as_ref()?;
        let (pattern, body) = match location {
            Location::Private => (&matcher.private, text),
            Location::Channel(_) => match strip_address(text, own_nick) {
                Some(rest) => (&matcher.private, rest),
                None => (&matcher.channel, text),
            },
        };
        let captures = pattern.captures(body)?;
        let keyword = captures.get(1)?.as_str().to_lowercase();
        let args = captures.get(2).map_or("", |m| m.as_str());
        Some((keyword, args))
    }

    /// Role of `user` at `location`.
    pub fn role_of(&self, user: &User, location: &Location, directory: &Directory) -> Role {
        let hostmask = user.hostmask();
        if self.admins.iter().any(|m| m.matches(&hostmask)) {
            return Role::Admin;
        }
        let Some(channel) = location.channel() else {
            return Role::Normal;
        };
        match directory.modes(channel, &user.nick) {
            Some(modes) if modes.is_operator() => Role::Operator,
            Some(modes) if modes.is_voiced() => Role::Voiced,
            _ => Role::Normal,
        }
    }

    /// Check policy, run the command and turn the result into messages.
    ///
    /// Typed failures become one explanatory line; `Failed` is returned.
    pub fn execute(&self, req: &Request<'_>) -> Result<Vec<Message>, anyhow::Error> {
        let Some(command) = self.find(req.keyword) else {
            return Ok(Vec::new());
        };
        let outcome = if !command.location().allows(req.location) {
            Err(CommandError::InsufficientLocation(command.location()))
        } else if req.role < command.role() {
            Err(CommandError::InsufficientRole(command.role()))
        } else {
            command.run(req)
        };

        match outcome {
            Ok(replies) => Ok(render(req, replies)),
            Err(CommandError::Failed(e)) => Err(e),
            Err(e) => {
                let text = self.explain(command, &e);
                let line = match req.location {
                    Location::Channel(_) => format!("{}: {text}", req.user.nick),
                    Location::Private => text,
                };
                Ok(render(req, vec![Reply::Say(line)]))
            }
        }
    }

    fn explain(&self, command: &dyn Command, error: &CommandError) -> String {
        let name = command.keywords().first().copied().unwrap_or("?");
        match error {
            CommandError::InsufficientLocation(LocationPolicy::ChannelOnly) => {
                format!("{}{name} only works in a channel.", self.prefix)
            }
            CommandError::InsufficientLocation(_) => {
                format!("{}{name} only works in a private message.", self.prefix)
            }
            CommandError::InsufficientRole(role) => {
                format!("{}{name} requires {role} access.", self.prefix)
            }
            CommandError::InvalidArguments(detail) => {
                let usage = command.usage();
                if usage.is_empty() {
                    format!("{detail}.")
                } else {
                    format!("{detail}. Usage: {}{name} {usage}", self.prefix)
                }
            }
            CommandError::Failed(e) => e.to_string(),
        }
    }
}

/// `nick: rest` or `nick, rest` addressed to `own_nick`.
fn strip_address<'t>(text: &'t str, own_nick: &str) -> Option<&'t str> {
    if own_nick.is_empty() || text.len() <= own_nick.len() {
        return None;
    }
    let (head, tail) = text.split_at_checked(own_nick.len())?;
    if !casemap::eq(head, own_nick) {
        return None;
    }
    let rest = tail.strip_prefix(':').or_else(|| tail.strip_prefix(','))?;
    Some(rest.trim_start())
}

fn render(req: &Request<'_>, replies: Vec<Reply>) -> Vec<Message> {
    let target = req.reply_target();
    let mut out = Vec::new();
    for reply in replies {
        match reply {
            Reply::Say(text) => {
                for line in wrap_lines(&text, MAX_REPLY_LEN) {
                    out.push(Message::new("PRIVMSG", vec![target, &line]));
                }
            }
            Reply::Notice(text) => {
                for line in wrap_lines(&text, MAX_REPLY_LEN) {
                    out.push(Message::new("NOTICE", vec![req.user.nick.as_str(), &line]));
                }
            }
            Reply::Action(text) => {
                let body = crate::ctcp::frame("ACTION", Some(&text));
                out.push(Message::new("PRIVMSG", vec![target, &body]));
            }
            Reply::Raw(msg) => out.push(msg),
        }
    }
    out
}

/// Wrap text into lines of at most `max_len` bytes, breaking on word
/// boundaries. Words longer than a line are split.
pub fn wrap_lines(text: &str, max_len: usize) -> Vec<String> {
    let mut result = Vec::new();
    for line in text.lines() {
        if line.len() <= max_len {
            if !line.is_empty() {
                result.push(line.to_string());
            }
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            let mut word = word;
            while word.len() > max_len {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
                let mut cut = max_len;
                while !word.is_char_boundary(cut) {
                    cut -= 1;
                }
                result.push(word[..cut].to_string());
                word = &word[cut..];
            }
            if !current.is_empty() && current.len() + word.len() + 1 > max_len {
                result.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::Source;
    use crate::isupport::MemberModes;

    struct Echo;

    impl Command for Echo {
        fn keywords(&self) -> &'static [&'static str] {
            &["echo", "say"]
        }

        fn summary(&self) -> &'static str {
            "Repeat text"
        }

        fn usage(&self) -> &'static str {
            "<text>"
        }

        fn run(&self, req: &Request<'_>) -> Result<Vec<Reply>, CommandError> {
            if req.args.is_empty() {
                return Err(CommandError::InvalidArguments("nothing to echo".into()));
            }
            Ok(vec![Reply::Say(req.args.to_string()), Reply::Notice("done".into())])
        }
    }

    struct OpsOnly;

    impl Command for OpsOnly {
        fn keywords(&self) -> &'static [&'static str] {
            &["kickme"]
        }

        fn summary(&self) -> &'static str {
            "Operators only"
        }

        fn location(&self) -> LocationPolicy {
            LocationPolicy::ChannelOnly
        }

        fn role(&self) -> Role {
            Role::Operator
        }

        fn run(&self, _: &Request<'_>) -> Result<Vec<Reply>, CommandError> {
            Ok(vec![Reply::Say("ok".into())])
        }
    }

    struct Broken;

    impl Command for Broken {
        fn keywords(&self) -> &'static [&'static str] {
            &["broken"]
        }

        fn summary(&self) -> &'static str {
            "Always fails"
        }

        fn run(&self, _: &Request<'_>) -> Result<Vec<Reply>, CommandError> {
            Err(anyhow::anyhow!("backend unavailable").into())
        }
    }

    fn commands() -> Commands {
        Commands::builder("!")
            .admin("root!*@trusted.example")
            .command(Echo)
            .command(OpsOnly)
            .command(Broken)
            .build()
            .unwrap()
    }

    fn directory_with(nick: &str, modes: MemberModes) -> (Directory, UserId) {
        let mut dir = Directory::new();
        dir.set_own("bot");
        let id = dir.request_user(&Source::user(nick, "u", "host.example")).unwrap();
        dir.join("#c", id, modes).unwrap();
        (dir, id)
    }

    fn run(commands: &Commands, dir: &Directory, id: UserId, location: &Location, text: &str) -> Vec<String> {
        let user = dir.user(id).unwrap();
        let (keyword, args) = commands.parse(text, location, "bot").unwrap();
        let req = Request {
            location,
            user_id: id,
            user,
            role: commands.role_of(user, location, dir),
            keyword: &keyword,
            args,
            directory: dir,
            own_nick: "bot",
            commands,
        };
        commands
            .execute(&req)
            .unwrap()
            .iter()
            .map(|m| m.encode().unwrap())
            .collect()
    }

    #[test]
    fn parse_requires_prefix_in_channel() {
        let commands = commands();
        let channel = Location::Channel("#c".into());
        assert_eq!(
            commands.parse("!ECHO hi there ", &channel, "bot"),
            Some(("echo".to_string(), "hi there"))
        );
        assert!(commands.parse("echo hi", &channel, "bot").is_none());
        assert!(commands.parse("!echoes", &channel, "bot").is_none());
        assert!(commands.parse("!unknown", &channel, "bot").is_none());
    }

    #[test]
    fn parse_accepts_nick_address_and_bare_private() {
        let commands = commands();
        let channel = Location::Channel("#c".into());
        assert_eq!(
            commands.parse("Bot: say hello", &channel, "bot"),
            Some(("say".to_string(), "hello"))
        );
        assert_eq!(
            commands.parse("echo", &Location::Private, "bot"),
            Some(("echo".to_string(), ""))
        );
        assert_eq!(
            commands.parse("!echo x", &Location::Private, "bot"),
            Some(("echo".to_string(), "x"))
        );
    }

    #[test]
    fn duplicate_keywords_are_rejected() {
        let result = Commands::builder("!").command(Echo).command(Echo).build();
        assert!(matches!(result, Err(CommandSetError::DuplicateKeyword(_))));
    }

    #[test]
    fn replies_keep_order_and_routing() {
        let commands = commands();
        let (dir, id) = directory_with("alice", MemberModes::NONE);
        let lines = run(&commands, &dir, id, &Location::Channel("#c".into()), "!echo hello world");
        assert_eq!(lines, vec!["PRIVMSG #c :hello world", "NOTICE alice done"]);

        let lines = run(&commands, &dir, id, &Location::Private, "echo hi");
        assert_eq!(lines, vec!["PRIVMSG alice hi", "NOTICE alice done"]);
    }

    #[test]
    fn invalid_arguments_explain_usage_once() {
        let commands = commands();
        let (dir, id) = directory_with("alice", MemberModes::NONE);
        let lines = run(&commands, &dir, id, &Location::Channel("#c".into()), "!echo");
        assert_eq!(lines, vec!["PRIVMSG #c :alice: nothing to echo. Usage: !echo <text>"]);
    }

    #[test]
    fn location_and_role_are_enforced() {
        let commands = commands();
        let (dir, id) = directory_with("alice", MemberModes::VOICE);

        let lines = run(&commands, &dir, id, &Location::Private, "kickme");
        assert_eq!(lines, vec!["PRIVMSG alice :!kickme only works in a channel."]);

        let lines = run(&commands, &dir, id, &Location::Channel("#c".into()), "!kickme");
        assert_eq!(lines, vec!["PRIVMSG #c :alice: !kickme requires operator access."]);

        let (dir, id) = directory_with("alice", MemberModes::OP);
        let lines = run(&commands, &dir, id, &Location::Channel("#c".into()), "!kickme");
        assert_eq!(lines, vec!["PRIVMSG #c ok"]);
    }

    #[test]
    fn admin_masks_grant_admin() {
        let commands = commands();
        let mut dir = Directory::new();
        let id = dir.request_user(&Source::user("Root", "x", "TRUSTED.example")).unwrap();
        let user = dir.user(id).unwrap();
        assert_eq!(commands.role_of(user, &Location::Private, &dir), Role::Admin);

        let (dir, id) = directory_with("alice", MemberModes::OP);
        let user = dir.user(id).unwrap();
        assert_eq!(commands.role_of(user, &Location::Private, &dir), Role::Normal);
        assert_eq!(
            commands.role_of(user, &Location::Channel("#c".into()), &dir),
            Role::Operator
        );
    }

    #[test]
    fn host_masks_follow_irc_casemapping() {
        let mask = HostMask::new("[a]!*@*.Example").unwrap();
        assert!(mask.matches("{A}!x@host.example"));
        assert!(mask.matches("[a]!~x@HOST.EXAMPLE"));
        assert!(!mask.matches("a!x@host.example"));

        let escaped = HostMask::new("n\\?!*@h").unwrap();
        assert!(escaped.matches("N|x!i@h"));
        assert!(!escaped.matches("nx!i@h"));
    }

    #[test]
    fn unclassified_failures_are_returned() {
        let commands = commands();
        let (dir, id) = directory_with("alice", MemberModes::NONE);
        let user = dir.user(id).unwrap();
        let location = Location::Private;
        let req = Request {
            location: &location,
            user_id: id,
            user,
            role: Role::Normal,
            keyword: "broken",
            args: "",
            directory: &dir,
            own_nick: "bot",
            commands: &commands,
        };
        assert!(commands.execute(&req).is_err());
    }

    #[test]
    fn wrap_lines_breaks_on_words() {
        let text = "aaaa bbbb cccc";
        assert_eq!(wrap_lines(text, 9), vec!["aaaa bbbb", "cccc"]);
        assert_eq!(wrap_lines("x".repeat(10).as_str(), 4), vec!["xxxx", "xxxx", "xx"]);
        assert_eq!(wrap_lines("one\n\ntwo", 10), vec!["one", "two"]);
    }

    #[test]
    fn empty_set_matches_nothing() {
        let commands = Commands::empty();
        assert!(commands.parse("!help", &Location::Private, "bot").is_none());
    }
}
