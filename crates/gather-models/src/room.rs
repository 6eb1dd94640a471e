use serde::{Deserialize, Serialize};
use std::fmt;

/// Key identifying a broadcast channel.
///
/// Direct rooms are derived from the two participant ids, lexicographically
/// sorted, so both sides compute the same key with no coordination round
/// trip. Topic rooms (events, help-request threads) carry an externally
/// assigned id unchanged. User and topic ids must not contain `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn direct(a: &str, b: &str) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        RoomKey(format!("dm:{lo}:{hi}"))
    }

    pub fn topic(id: &str) -> Self {
        RoomKey(format!("topic:{id}"))
    }

    /// Parse a key received over the wire (e.g. a REST path segment).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.split(':').collect::<Vec<_>>().as_slice() {
            ["dm", a, b] if !a.is_empty() && !b.is_empty() && a <= b => {
                Some(RoomKey(raw.to_string()))
            }
            ["topic", id] if !id.is_empty() => Some(RoomKey(raw.to_string())),
            _ => None,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.0.starts_with("dm:")
    }

    /// Both participant ids of a direct room, in sorted order.
    pub fn direct_peers(&self) -> Option<(&str, &str)> {
        let rest = self.0.strip_prefix("dm:")?;
        rest.split_once(':')
    }

    /// The other participant of a direct room, from `me`'s point of view.
    pub fn direct_counterpart(&self, me: &str) -> Option<&str> {
        let (a, b) = self.direct_peers()?;
        if a == me {
            Some(b)
        } else if b == me {
            Some(a)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
