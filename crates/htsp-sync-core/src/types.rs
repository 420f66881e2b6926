//! Strong type definitions for channel identity and ordering.
//!
//! Identifiers are newtypes so a row id can never be passed where a
//! server-side channel id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable upstream channel identity: the server's `channelId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OriginalNetworkId(pub u32);

impl OriginalNetworkId {
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for OriginalNetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for OriginalNetworkId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Locally assigned storage identity of a persisted channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub i64);

impl RowId {
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row:{}", self.0)
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A channel number, e.g. `101` or `7.1`.
///
/// Ordered by major, then minor number. This is the ordering key channels
/// are sorted by before reconciliation and display.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChannelNumber {
    pub major: u32,
    pub minor: u32,
}

impl ChannelNumber {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ChannelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "{}", self.major)
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

impl From<u32> for ChannelNumber {
    fn from(major: u32) -> Self {
        Self { major, minor: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_number_ordering() {
        let mut numbers = vec![
            ChannelNumber::new(10, 0),
            ChannelNumber::new(2, 1),
            ChannelNumber::new(2, 0),
            ChannelNumber::new(1, 5),
        ];
        numbers.sort();
        assert_eq!(
            numbers,
            vec![
                ChannelNumber::new(1, 5),
                ChannelNumber::new(2, 0),
                ChannelNumber::new(2, 1),
                ChannelNumber::new(10, 0),
            ]
        );
    }

    #[test]
    fn test_channel_number_display() {
        assert_eq!(ChannelNumber::new(101, 0).to_string(), "101");
        assert_eq!(ChannelNumber::new(7, 1).to_string(), "7.1");
    }

    #[test]
    fn test_row_id_display() {
        assert_eq!(RowId(12).to_string(), "row:12");
    }
}
