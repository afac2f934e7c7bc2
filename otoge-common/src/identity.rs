//! Player identity credentials
//!
//! A `PlayerIdentity` is the opaque credential naming one player's local
//! score set. It must be UUID-shaped (32 hex digits in 8-4-4-4-12 groups,
//! hyphens optional) and is checked before any lock or storage access.
//! `Display`/`Debug` print a redacted form; use [`PlayerIdentity::as_str`]
//! when the raw credential is required.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("identity is not a UUID-formatted credential")]
    InvalidFormat,
}

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlayerIdentity(String);

impl PlayerIdentity {
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        if is_uuid_shaped(raw) {
            Ok(PlayerIdentity(raw.to_string()))
        } else {
            Err(IdentityError::InvalidFormat)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First group only, for logs
    pub fn redacted(&self) -> String {
        format!("{}-***", &self.0[..GROUPS[0]])
    }
}

fn is_uuid_shaped(raw: &str) -> bool {
    let mut rest = raw.as_bytes();
    for (i, len) in GROUPS.iter().enumerate() {
        if i > 0 {
            if let Some(b'-') = rest.first() {
                rest = &rest[1..];
            }
        }
        if rest.len() < *len || !rest[..*len].iter().all(u8::is_ascii_hexdigit) {
            return false;
        }
        rest = &rest[*len..];
    }
    rest.is_empty()
}

impl FromStr for PlayerIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlayerIdentity::parse(s)
    }
}

impl TryFrom<String> for PlayerIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PlayerIdentity::parse(&value)
    }
}

impl From<PlayerIdentity> for String {
    fn from(identity: PlayerIdentity) -> String {
        identity.0
    }
}

impl fmt::Display for PlayerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for PlayerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlayerIdentity({})", self.redacted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_hyphenated_and_simple_forms() {
        assert!(PlayerIdentity::parse("3f2504e0-4f89-11d3-9a0c-0305e82c3301").is_ok());
        assert!(PlayerIdentity::parse("3F2504E04F8911D39A0C0305E82C3301").is_ok());
        assert!(PlayerIdentity::parse("3f2504e0-4f8911d3-9a0c0305e82c3301").is_ok());
    }

    #[test]
    fn test_rejects_malformed_credentials() {
        for bad in [
            "",
            "not-a-uuid",
            "3f2504e0-4f89-11d3-9a0c-0305e82c330",
            "3f2504e0-4f89-11d3-9a0c-0305e82c33011",
            "3f2504e0--4f89-11d3-9a0c-0305e82c3301",
            "{3f2504e0-4f89-11d3-9a0c-0305e82c3301}",
            "zf2504e0-4f89-11d3-9a0c-0305e82c3301",
            "3f2504e0-4f89-11d3-9a0c-0305e82c3301-",
        ] {
            assert_eq!(PlayerIdentity::parse(bad), Err(IdentityError::InvalidFormat), "{bad}");
        }
    }

    #[test]
    fn test_display_is_redacted() {
        let id = PlayerIdentity::parse("3f2504e0-4f89-11d3-9a0c-0305e82c3301").unwrap();
        assert_eq!(id.to_string(), "3f2504e0-***");
        assert!(!format!("{:?}", id).contains("0305e82c3301"));
        assert_eq!(id.as_str(), "3f2504e0-4f89-11d3-9a0c-0305e82c3301");
    }

    #[test]
    fn test_serde_validates() {
        let ok: Result<PlayerIdentity, _> =
            serde_json::from_str("\"3f2504e04f8911d39a0c0305e82c3301\"");
        assert!(ok.is_ok());
        let bad: Result<PlayerIdentity, _> = serde_json::from_str("\"oops\"");
        assert!(bad.is_err());
    }
}
