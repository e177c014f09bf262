//! Feed identity types.
//!
//! A feed is identified by its name together with a set of string-valued
//! arguments. Two identities with the same name and the same arguments refer
//! to the same server feed, so the client derives a canonical *serial* from
//! each identity and uses it as the lookup key everywhere feeds are indexed.
//!
//! # Example
//!
//! ```
//! use feedlink_core::feed::FeedIdentity;
//!
//! let a = FeedIdentity::new("chat", [("room", "lobby"), ("lang", "en")]);
//! let b = FeedIdentity::new("chat", [("lang", "en"), ("room", "lobby")]);
//!
//! // Argument order does not matter
//! assert_eq!(a.serial(), b.serial());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a server feed: a name plus string-valued arguments.
///
/// Arguments are kept in a [`BTreeMap`] so that serialization is
/// deterministic regardless of the order they were supplied in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedIdentity {
    name: String,
    args: BTreeMap<String, String>,
}

impl FeedIdentity {
    /// Creates a feed identity from a name and argument pairs.
    pub fn new<N, K, V, A>(name: N, args: A) -> Self
    where
        N: Into<String>,
        K: Into<String>,
        V: Into<String>,
        A: IntoIterator<Item = (K, V)>,
    {
        Self {
            name: name.into(),
            args: args
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Creates a feed identity directly from an argument map.
    pub fn from_parts(name: impl Into<String>, args: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Returns the feed name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the feed arguments.
    pub fn args(&self) -> &BTreeMap<String, String> {
        &self.args
    }

    /// Returns the canonical serial for this identity.
    ///
    /// The serial is the canonical JSON encoding of `[name, args]`; argument
    /// keys are sorted, so identities that differ only in argument order
    /// produce the same serial.
    pub fn serial(&self) -> FeedSerial {
        FeedSerial(serde_json::json!([&self.name, &self.args]).to_string())
    }
}

impl fmt::Display for FeedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serial())
    }
}

/// Canonical string identity of a feed.
///
/// Obtained via [`FeedIdentity::serial`]; used as the key for every per-feed
/// table in the client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeedSerial(String);

impl FeedSerial {
    /// Returns the serial as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_is_order_insensitive() {
        let a = FeedIdentity::new("chat", [("room", "a"), ("user", "b")]);
        let b = FeedIdentity::new("chat", [("user", "b"), ("room", "a")]);
        assert_eq!(a.serial(), b.serial());
    }

    #[test]
    fn test_serial_distinguishes_names() {
        let a = FeedIdentity::new("chat", [("room", "a")]);
        let b = FeedIdentity::new("news", [("room", "a")]);
        assert_ne!(a.serial(), b.serial());
    }

    #[test]
    fn test_serial_distinguishes_args() {
        let a = FeedIdentity::new("chat", [("room", "a")]);
        let b = FeedIdentity::new("chat", [("room", "b")]);
        assert_ne!(a.serial(), b.serial());
    }

    #[test]
    fn test_serial_is_unambiguous() {
        // Name/argument boundaries must not collide once encoded.
        let a = FeedIdentity::new("chat", [("ro", "oma")]);
        let b = FeedIdentity::new("chat", [("room", "a")]);
        assert_ne!(a.serial(), b.serial());
    }

    #[test]
    fn test_no_args() {
        let feed = FeedIdentity::new("status", Vec::<(String, String)>::new());
        assert_eq!(feed.serial().as_str(), r#"["status",{}]"#);
    }
}
