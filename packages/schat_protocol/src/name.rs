//! Display-name rules.
//!
//! A name must survive a trip through the command grammar: `@alice` and
//! `!alice` have to address it, so it cannot contain whitespace or begin
//! with a marker character.

use crate::error::NameError;

/// Longest display name the relay accepts, in characters.
pub const MAX_NAME_LEN: usize = 32;

const RESERVED_PREFIXES: [char; 3] = ['@', '!', '/'];

pub fn validate_display_name(name: &str) -> Result<(), NameError> {
    let first = name.chars().next().ok_or(NameError::Empty)?;
    if RESERVED_PREFIXES.contains(&first) {
        return Err(NameError::ReservedPrefix(first));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(NameError::Whitespace);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(NameError::TooLong { max: MAX_NAME_LEN });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(validate_display_name("alice").is_ok());
        assert!(validate_display_name("bob_2").is_ok());
        assert!(validate_display_name("émile").is_ok());
    }

    #[test]
    fn rejects_unaddressable_names() {
        assert_eq!(validate_display_name(""), Err(NameError::Empty));
        assert_eq!(validate_display_name("a b"), Err(NameError::Whitespace));
        assert_eq!(
            validate_display_name("@alice"),
            Err(NameError::ReservedPrefix('@'))
        );
        assert_eq!(
            validate_display_name("!alice"),
            Err(NameError::ReservedPrefix('!'))
        );
        assert_eq!(
            validate_display_name("/quit"),
            Err(NameError::ReservedPrefix('/'))
        );
    }

    #[test]
    fn length_is_counted_in_chars() {
        let at_limit = "é".repeat(MAX_NAME_LEN);
        assert!(validate_display_name(&at_limit).is_ok());
        let over = "x".repeat(MAX_NAME_LEN + 1);
        assert_eq!(
            validate_display_name(&over),
            Err(NameError::TooLong { max: MAX_NAME_LEN })
        );
    }
}
