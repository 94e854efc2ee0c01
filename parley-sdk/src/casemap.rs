//! RFC 1459 case folding.
//!
//! IRC treats `[]\~` as the lowercase forms of `{}|^`, on top of ASCII
//! letters. Every directory key goes through [`fold`].

/// Fold a nickname or channel name to its canonical lookup key.
pub fn fold(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'A'..='Z' => c.to_ascii_lowercase(),
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            _ => c,
        })
        .collect()
}

/// Case-insensitive comparison under RFC 1459 rules.
pub fn eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && fold(a) == fold(b)
}
