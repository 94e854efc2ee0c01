//! Built-in bot commands.

use parley_sdk::commands::{
    Command, CommandError, Commands, CommandSetError, LocationPolicy, Reply, Request, Role,
};
use parley_sdk::irc::Message;

/// The command set with every built-in, admin masks and `prefix`.
pub fn build(prefix: &str, admins: &[String]) -> Result<Commands, CommandSetError> {
    let mut builder = Commands::builder(prefix)
        .command(Help)
        .command(Ping)
        .command(WhoAmI)
        .command(Channels)
        .command(Join)
        .command(Part)
        .command(Topic);
    for mask in admins {
        builder = builder.admin(mask);
    }
    builder.build()
}

fn is_channel_name(name: &str) -> bool {
    name.len() > 1 && name.starts_with(['#', '&']) && !name.contains([',', '\x07'])
}

fn role_suffix(role: Role) -> String {
    match role {
        Role::Normal => String::new(),
        role => format!(" ({role})"),
    }
}

// ── Everyone ───────────────────────────────────────────────────────

pub struct Help;

impl Command for Help {
    fn keywords(&self) -> &'static [&'static str] {
        &["help", "commands"]
    }

    fn summary(&self) -> &'static str {
        "List commands, or describe one"
    }

    fn usage(&self) -> &'static str {
        "[command]"
    }

    fn run(&self, req: &Request<'_>) -> Result<Vec<Reply>, CommandError> {
        let prefix = req.commands.prefix();
        let Some(wanted) = req.arg(0) else {
            let names: Vec<String> = req
                .commands
                .iter()
                .filter(|c| c.role() <= req.role && c.location().allows(req.location))
                .filter_map(|c| c.keywords().first())
                .map(|name| format!("{prefix}{name}"))
                .collect();
            return Ok(vec![Reply::Notice(format!("Commands: {}", names.join(", ")))]);
        };

        let wanted = wanted.strip_prefix(prefix).unwrap_or(wanted);
        let command = req
            .commands
            .find(wanted)
            .ok_or_else(|| CommandError::InvalidArguments(format!("No such command {wanted:?}")))?;
        let name = command.keywords().first().copied().unwrap_or(wanted);
        let usage = match command.usage() {
            "" => String::new(),
            usage => format!(" {usage}"),
        };
        Ok(vec![Reply::Notice(format!(
            "{prefix}{name}{usage}: {}{}",
            command.summary(),
            role_suffix(command.role())
        ))])
    }
}

pub struct Ping;

impl Command for Ping {
    fn keywords(&self) -> &'static [&'static str] {
        &["ping"]
    }

    fn summary(&self) -> &'static str {
        "Check that the bot is alive"
    }

    fn run(&self, _: &Request<'_>) -> Result<Vec<Reply>, CommandError> {
        Ok(vec![Reply::Say("pong".into())])
    }
}

pub struct WhoAmI;

impl Command for WhoAmI {
    fn keywords(&self) -> &'static [&'static str] {
        &["whoami"]
    }

    fn summary(&self) -> &'static str {
        "Show how the bot sees you"
    }

    fn run(&self, req: &Request<'_>) -> Result<Vec<Reply>, CommandError> {
        let mut shared = req.directory.channels_of(req.user_id);
        shared.sort_unstable();
        let channels = if shared.is_empty() {
            "no shared channels".to_string()
        } else {
            shared.join(" ")
        };
        Ok(vec![Reply::Say(format!(
            "You are {} with {} access; {channels}.",
            req.user.hostmask(),
            req.role
        ))])
    }
}

// ── Admin ──────────────────────────────────────────────────────────

pub struct Channels;

impl Command for Channels {
    fn keywords(&self) -> &'static [&'static str] {
        &["channels"]
    }

    fn summary(&self) -> &'static str {
        "List joined channels"
    }

    fn location(&self) -> LocationPolicy {
        LocationPolicy::PrivateOnly
    }

    fn role(&self) -> Role {
        Role::Admin
    }

    fn run(&self, req: &Request<'_>) -> Result<Vec<Reply>, CommandError> {
        let mut channels: Vec<String> = req
            .directory
            .channels()
            .map(|c| format!("{} ({})", c.name, c.member_count()))
            .collect();
        if channels.is_empty() {
            return Ok(vec![Reply::Say("Not in any channels.".into())]);
        }
        channels.sort_unstable();
        Ok(vec![Reply::Say(channels.join(", "))])
    }
}

pub struct Join;

impl Command for Join {
    fn keywords(&self) -> &'static [&'static str] {
        &["join"]
    }

    fn summary(&self) -> &'static str {
        "Join a channel"
    }

    fn usage(&self) -> &'static str {
        "<#channel> [key]"
    }

    fn role(&self) -> Role {
        Role::Admin
    }

    fn run(&self, req: &Request<'_>) -> Result<Vec<Reply>, CommandError> {
        let channel = req
            .arg(0)
            .ok_or_else(|| CommandError::InvalidArguments("Missing channel".into()))?;
        if !is_channel_name(channel) {
            return Err(CommandError::InvalidArguments(format!("{channel:?} is not a channel")));
        }
        let mut params = vec![channel];
        params.extend(req.arg(1));
        Ok(vec![Reply::Raw(Message::new("JOIN", params))])
    }
}

pub struct Part;

impl Command for Part {
    fn keywords(&self) -> &'static [&'static str] {
        &["part", "leave"]
    }

    fn summary(&self) -> &'static str {
        "Leave a channel"
    }

    fn usage(&self) -> &'static str {
        "[#channel] [reason]"
    }

    fn role(&self) -> Role {
        Role::Admin
    }

    fn run(&self, req: &Request<'_>) -> Result<Vec<Reply>, CommandError> {
        let (channel, reason) = match req.arg(0) {
            Some(first) if is_channel_name(first) => (first, req.rest(1)),
            _ => match req.location.channel() {
                Some(here) => (here, req.rest(0)),
                None => return Err(CommandError::InvalidArguments("Missing channel".into())),
            },
        };
        if req.directory.channel(channel).is_none() {
            return Err(CommandError::InvalidArguments(format!("Not in {channel}")));
        }
        let mut params = vec![channel];
        if !reason.is_empty() {
            params.push(reason);
        }
        Ok(vec![Reply::Raw(Message::new("PART", params))])
    }
}

// ── Operator ───────────────────────────────────────────────────────

pub struct Topic;

impl Command for Topic {
    fn keywords(&self) -> &'static [&'static str] {
        &["topic"]
    }

    fn summary(&self) -> &'static str {
        "Set this channel's topic"
    }

    fn usage(&self) -> &'static str {
        "<text>"
    }

    fn location(&self) -> LocationPolicy {
        LocationPolicy::ChannelOnly
    }

    fn role(&self) -> Role {
        Role::Operator
    }

    fn run(&self, req: &Request<'_>) -> Result<Vec<Reply>, CommandError> {
        let channel = req
            .location
            .channel()
            .ok_or(CommandError::InsufficientLocation(LocationPolicy::ChannelOnly))?;
        if req.args.is_empty() {
            return Err(CommandError::InvalidArguments("Missing topic".into()));
        }
        Ok(vec![Reply::Raw(Message::new("TOPIC", vec![channel, req.args]))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_sdk::commands::Location;
    use parley_sdk::directory::Directory;
    use parley_sdk::irc::Source;
    use parley_sdk::isupport::MemberModes;

    struct Fixture {
        commands: Commands,
        directory: Directory,
    }

    impl Fixture {
        fn new() -> Self {
            let commands = build("!", &["owner!*@trusted.example".to_string()]).unwrap();
            let mut directory = Directory::new();
            let me = directory.set_own("bot");
            directory.join("#chan", me, MemberModes::NONE).unwrap();
            for (nick, host, modes) in [
                ("alice", "h", MemberModes::OP),
                ("bob", "h", MemberModes::NONE),
                ("owner", "trusted.example", MemberModes::NONE),
            ] {
                let id = directory.request_user(&Source::user(nick, nick, host)).unwrap();
                directory.join("#chan", id, modes).unwrap();
            }
            Self { commands, directory }
        }

        /// Send `text` from `nick` at `location` and return the wire lines.
        fn say(&self, nick: &str, location: Location, text: &str) -> Vec<String> {
            let (keyword, args) = self.commands.parse(text, &location, "bot").unwrap();
            let user_id = self.directory.find(nick).unwrap();
            let user = self.directory.user(user_id).unwrap();
            let request = Request {
                location: &location,
                user_id,
                user,
                role: self.commands.role_of(user, &location, &self.directory),
                keyword: &keyword,
                args,
                directory: &self.directory,
                own_nick: "bot",
                commands: &self.commands,
            };
            self.commands
                .execute(&request)
                .unwrap()
                .iter()
                .map(|m| m.encode().unwrap())
                .collect()
        }
    }

    fn chan() -> Location {
        Location::Channel("#chan".into())
    }

    #[test]
    fn help_lists_what_the_user_may_run() {
        let f = Fixture::new();
        let out = f.say("bob", chan(), "!help");
        assert_eq!(out, vec!["NOTICE bob :Commands: !help, !ping, !whoami"]);

        let out = f.say("owner", Location::Private, "help");
        assert_eq!(
            out,
            vec!["NOTICE owner :Commands: !help, !ping, !whoami, !channels, !join, !part"]
        );
    }

    #[test]
    fn help_describes_one_command() {
        let f = Fixture::new();
        let out = f.say("bob", chan(), "!help !join");
        assert_eq!(out, vec!["NOTICE bob :!join <#channel> [key]: Join a channel (admin)"]);

        let out = f.say("bob", chan(), "!help nothing");
        assert_eq!(
            out,
            vec!["PRIVMSG #chan :bob: No such command \"nothing\". Usage: !help [command]"]
        );
    }

    #[test]
    fn ping_and_whoami() {
        let f = Fixture::new();
        assert_eq!(f.say("bob", chan(), "!PING"), vec!["PRIVMSG #chan pong"]);
        assert_eq!(
            f.say("alice", chan(), "bot: whoami"),
            vec!["PRIVMSG #chan :You are alice!alice@h with operator access; #chan."]
        );
    }

    #[test]
    fn channels_is_private_and_admin_only() {
        let f = Fixture::new();
        assert_eq!(
            f.say("owner", chan(), "!channels"),
            vec!["PRIVMSG #chan :owner: !channels only works in a private message."]
        );
        assert_eq!(
            f.say("bob", Location::Private, "channels"),
            vec!["PRIVMSG bob :!channels requires admin access."]
        );
        assert_eq!(f.say("owner", Location::Private, "channels"), vec!["PRIVMSG owner :#chan (4)"]);
    }

    #[test]
    fn join_and_part_emit_raw_messages() {
        let f = Fixture::new();
        assert_eq!(f.say("owner", Location::Private, "join #new key"), vec!["JOIN #new key"]);
        assert_eq!(
            f.say("owner", Location::Private, "join new"),
            vec!["PRIVMSG owner :\"new\" is not a channel. Usage: !join <#channel> [key]"]
        );
        assert_eq!(f.say("owner", chan(), "!part see you"), vec!["PART #chan :see you"]);
        assert_eq!(f.say("owner", Location::Private, "leave #chan"), vec!["PART #chan"]);
        assert_eq!(
            f.say("owner", Location::Private, "part"),
            vec!["PRIVMSG owner :Missing channel. Usage: !part [#channel] [reason]"]
        );
        assert_eq!(
            f.say("alice", chan(), "!join #new"),
            vec!["PRIVMSG #chan :alice: !join requires admin access."]
        );
    }

    #[test]
    fn topic_needs_an_operator_in_a_channel() {
        let f = Fixture::new();
        assert_eq!(f.say("alice", chan(), "!topic Release day"), vec!["TOPIC #chan :Release day"]);
        assert_eq!(
            f.say("bob", chan(), "!topic mine now"),
            vec!["PRIVMSG #chan :bob: !topic requires operator access."]
        );
        assert_eq!(
            f.say("owner", Location::Private, "topic hi"),
            vec!["PRIVMSG owner :!topic only works in a channel."]
        );
    }
}
