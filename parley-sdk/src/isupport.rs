//! Server feature advertisement (`005 RPL_ISUPPORT`).
//!
//! Only the tokens the directory and nick negotiation depend on are kept.
//! Everything starts at RFC defaults and is overwritten as 005 lines arrive.

use bitflags::bitflags;

bitflags! {
    /// Membership prefix modes the directory understands.
    #[derive(Default)]
    pub struct MemberModes: u8 {
        const VOICE = 1 << 0;
        const HALFOP = 1 << 1;
        const OP = 1 << 2;
        const ADMIN = 1 << 3;
        const OWNER = 1 << 4;
    }
}

impl MemberModes {
    pub const NONE: MemberModes = MemberModes::empty();

    /// Map a channel mode letter (`o`, `v`, ...) to its flag.
    pub fn from_mode(mode: char) -> Option<MemberModes> {
        match mode {
            'v' => Some(Self::VOICE),
            'h' => Some(Self::HALFOP),
            'o' => Some(Self::OP),
            'a' => Some(Self::ADMIN),
            'q' => Some(Self::OWNER),
            _ => None,
        }
    }

    /// Half-op or better.
    pub fn is_operator(self) -> bool {
        self.intersects(Self::HALFOP | Self::OP | Self::ADMIN | Self::OWNER)
    }

    pub fn is_voiced(self) -> bool {
        !self.is_empty()
    }
}

/// Parsed ISUPPORT state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ISupport {
    /// `(mode, sigil)` pairs, highest rank first.
    pub prefixes: Vec<(char, char)>,
    pub chantypes: String,
    /// CHANMODES classes A (list), B (always arg), C (arg when set), D (never).
    pub chanmodes: [String; 4],
    pub nicklen: usize,
    pub network: Option<String>,
}

impl Default for ISupport {
    fn default() -> Self {
        Self {
            prefixes: vec![('q', '~'), ('a', '&'), ('o', '@'), ('h', '%'), ('v', '+')],
            chantypes: "#&".to_string(),
            chanmodes: [
                "beI".to_string(),
                "k".to_string(),
                "l".to_string(),
                "imnpst".to_string(),
            ],
            nicklen: 9,
            network: None,
        }
    }
}

impl ISupport {
    /// Apply the feature tokens of one 005 line. `params` excludes the leading
    /// target nick and the trailing human-readable text.
    pub fn apply<'a>(&mut self, tokens: impl IntoIterator<Item = &'a str>) {
        for token in tokens {
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            match key {
                "PREFIX" => {
                    if let Some(prefixes) = parse_prefix(value) {
                        self.prefixes = prefixes;
                    }
                }
                "CHANTYPES" if !value.is_empty() => self.chantypes = value.to_string(),
                "CHANMODES" => {
                    let mut classes = value.splitn(4, ',');
                    for slot in self.chanmodes.iter_mut() {
                        *slot = classes.next().unwrap_or("").to_string();
                    }
                }
                "NICKLEN" => {
                    if let Ok(len) = value.parse::<usize>() {
                        self.nicklen = len.max(1);
                    }
                }
                "NETWORK" if !value.is_empty() => self.network = Some(value.to_string()),
                _ => {}
            }
        }
    }

    /// Whether `target` names a channel (starts with a CHANTYPES marker).
    pub fn is_channel(&self, target: &str) -> bool {
        target
            .chars()
            .next()
            .is_some_and(|c| self.chantypes.contains(c))
    }

    /// Strip leading membership sigils (`@+nick` under multi-prefix) and return
    /// the collected flags with the bare nickname.
    pub fn split_sigils<'a>(&self, entry: &'a str) -> (MemberModes, &'a str) {
        let mut modes = MemberModes::NONE;
        let mut rest = entry;
        while let Some(c) = rest.chars().next() {
            let Some(&(mode, _)) = self.prefixes.iter().find(|(_, sigil)| *sigil == c) else {
                break;
            };
            if let Some(flag) = MemberModes::from_mode(mode) {
                modes.insert(flag);
            }
            rest = &rest[c.len_utf8()..];
        }
        (modes, rest)
    }

    pub fn is_prefix_mode(&self, mode: char) -> bool {
        self.prefixes.iter().any(|(m, _)| *m == mode)
    }

    /// Whether a channel mode change consumes an argument.
    pub fn takes_arg(&self, mode: char, adding: bool) -> bool {
        if self.is_prefix_mode(mode) {
            return true;
        }
        let [list, always, when_set, _] = &self.chanmodes;
        list.contains(mode) || always.contains(mode) || (adding && when_set.contains(mode))
    }
}

fn parse_prefix(value: &str) -> Option<Vec<(char, char)>> {
    if value.is_empty() {
        return Some(Vec::new());
    }
    let inner = value.strip_prefix('(')?;
    let (modes, sigils) = inner.split_once(')')?;
    if modes.chars().count() != sigils.chars().count() {
        return None;
    }
    Some(modes.chars().zip(sigils.chars()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_common_prefixes() {
        let isupport = ISupport::default();
        let (modes, nick) = isupport.split_sigils("@+alice");
        assert_eq!(nick, "alice");
        assert!(modes.contains(MemberModes::OP));
        assert!(modes.contains(MemberModes::VOICE));
        assert!(!modes.contains(MemberModes::HALFOP));
    }

    #[test]
    fn apply_overrides_prefix_and_chantypes() {
        let mut isupport = ISupport::default();
        isupport.apply(["PREFIX=(ov)@+", "CHANTYPES=#", "NICKLEN=16", "NETWORK=Example"]);
        assert_eq!(isupport.prefixes, vec![('o', '@'), ('v', '+')]);
        assert!(isupport.is_channel("#rust"));
        assert!(!isupport.is_channel("&local"));
        assert_eq!(isupport.nicklen, 16);
        assert_eq!(isupport.network.as_deref(), Some("Example"));

        // '~' is no longer a sigil, so it stays part of the name
        let (modes, nick) = isupport.split_sigils("~odd");
        assert!(modes.is_empty());
        assert_eq!(nick, "~odd");
    }

    #[test]
    fn malformed_prefix_is_ignored() {
        let mut isupport = ISupport::default();
        isupport.apply(["PREFIX=(ov)@"]);
        assert_eq!(isupport.prefixes.len(), 5);
    }

    #[test]
    fn chanmodes_decide_argument_consumption() {
        let mut isupport = ISupport::default();
        isupport.apply(["CHANMODES=beI,k,lj,imnpst"]);
        assert!(isupport.takes_arg('b', false));
        assert!(isupport.takes_arg('k', false));
        assert!(isupport.takes_arg('j', true));
        assert!(!isupport.takes_arg('j', false));
        assert!(!isupport.takes_arg('m', true));
        assert!(isupport.takes_arg('o', false));
    }

    #[test]
    fn operator_rank() {
        assert!(MemberModes::HALFOP.is_operator());
        assert!((MemberModes::OP | MemberModes::VOICE).is_operator());
        assert!(!MemberModes::VOICE.is_operator());
        assert!(MemberModes::VOICE.is_voiced());
        assert!(!MemberModes::NONE.is_voiced());
    }

    #[test]
    fn mode_changes_toggle_single_flags() {
        let mut modes = MemberModes::from_mode('o').unwrap() | MemberModes::VOICE;
        modes.remove(MemberModes::from_mode('o').unwrap());
        assert_eq!(modes, MemberModes::VOICE);
        assert!(!modes.is_operator());
        modes.insert(MemberModes::OWNER);
        assert!(modes.is_operator());
        assert_eq!(MemberModes::from_mode('x'), None);
    }
}
