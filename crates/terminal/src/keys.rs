//! Special keys in caret notation.
//!
//! `^C` interrupts the foreground program, `^D` sends end-of-file, `^Z`
//! suspends, and so on. Letters are case-insensitive.

/// Decodes a caret-notation token such as `^C` into its control byte.
///
/// Returns `None` for anything that is not a single caret sequence.
pub fn parse_special_key(token: &str) -> Option<u8> {
    let mut chars = token.strip_prefix('^')?.chars();
    let key = chars.next()?;
    if chars.next().is_some() {
        return None;
    }

    match key.to_ascii_uppercase() {
        '?' => Some(0x7f),
        c @ '@'..='_' => Some(c as u8 - b'@'),
        _ => None,
    }
}

/// Returns true if `text` is exactly one caret-notation key.
pub fn is_special_key(text: &str) -> bool {
    parse_special_key(text).is_some()
}
