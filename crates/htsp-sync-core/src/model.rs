//! Channel and program model, projected from `channelAdd` / `eventAdd` pushes.
//!
//! Instances live only in a session's accumulation buffers
//! ([`ChannelList`], [`ProgramList`]) until reconciliation writes them to a
//! store. Buffers are created per session and never reused.

use serde::{Deserialize, Serialize};

use crate::error::FieldError;
use crate::message::Message;
use crate::types::{ChannelNumber, OriginalNetworkId};
use crate::value::FieldMap;

/// A channel as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Stable upstream identity.
    pub original_network_id: OriginalNetworkId,
    /// Display number; the ordering key.
    pub number: ChannelNumber,
    /// Display name.
    pub name: String,
    /// Logo reference (server-relative path or URL).
    pub icon: Option<String>,
}

impl Channel {
    pub fn new(id: u32, major: u32, name: impl Into<String>) -> Self {
        Self {
            original_network_id: OriginalNetworkId(id),
            number: ChannelNumber::from(major),
            name: name.into(),
            icon: None,
        }
    }

    pub fn with_number(mut self, number: ChannelNumber) -> Self {
        self.number = number;
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// The key channels are totally ordered by.
    pub fn ordering_key(&self) -> ChannelNumber {
        self.number
    }

    /// Project a `channelAdd` push.
    pub fn from_message(message: &Message) -> Result<Self, FieldError> {
        let fields = message.fields();
        let major = opt_u32(fields, "channelNumber")?.unwrap_or(0);
        let minor = opt_u32(fields, "channelNumberMinor")?.unwrap_or(0);

        Ok(Self {
            original_network_id: OriginalNetworkId(req_u32(fields, "channelId")?),
            number: ChannelNumber::new(major, minor),
            name: fields.req_str("channelName")?.to_owned(),
            icon: fields.opt_str("channelIcon")?.map(str::to_owned),
        })
    }
}

/// A program (EPG event) on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// Server-side event id.
    pub event_id: u32,
    /// Owning channel.
    pub channel: OriginalNetworkId,
    /// Start time, unix seconds.
    pub start: i64,
    /// Stop time, unix seconds.
    pub stop: i64,
    pub title: String,
    pub summary: Option<String>,
    pub description: Option<String>,
}

impl Program {
    /// Project an `eventAdd` push.
    pub fn from_message(message: &Message) -> Result<Self, FieldError> {
        let fields = message.fields();

        Ok(Self {
            event_id: req_u32(fields, "eventId")?,
            channel: OriginalNetworkId(req_u32(fields, "channelId")?),
            start: fields.req_i64("start")?,
            stop: fields.req_i64("stop")?,
            title: fields.opt_str("title")?.unwrap_or_default().to_owned(),
            summary: fields.opt_str("summary")?.map(str::to_owned),
            description: fields.opt_str("description")?.map(str::to_owned),
        })
    }

    /// Duration in seconds; zero for inverted ranges.
    pub fn duration_secs(&self) -> i64 {
        (self.stop - self.start).max(0)
    }
}

fn opt_u32(fields: &FieldMap, name: &'static str) -> Result<Option<u32>, FieldError> {
    fields
        .opt_i64(name)?
        .map(|n| u32::try_from(n).map_err(|_| FieldError::OutOfRange { field: name, value: n }))
        .transpose()
}

fn req_u32(fields: &FieldMap, name: &'static str) -> Result<u32, FieldError> {
    opt_u32(fields, name)?.ok_or(FieldError::Missing(name))
}

/// Append-only channel buffer for one sync session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelList(Vec<Channel>);

impl ChannelList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, channel: Channel) {
        self.0.push(channel);
    }

    /// Stable sort by channel number; equal numbers keep arrival order.
    pub fn sort_by_number(&mut self) {
        self.0.sort_by_key(Channel::ordering_key);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Channel> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Channel] {
        &self.0
    }
}

impl FromIterator<Channel> for ChannelList {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ChannelList {
    type Item = &'a Channel;
    type IntoIter = std::slice::Iter<'a, Channel>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Append-only program buffer for one sync session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramList(Vec<Program>);

impl ProgramList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, program: Program) {
        self.0.push(program);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Program> {
        self.0.iter()
    }
}

impl FromIterator<Program> for ProgramList {
    fn from_iter<I: IntoIterator<Item = Program>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ProgramList {
    type Item = &'a Program;
    type IntoIter = std::slice::Iter<'a, Program>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use crate::value::Value;

    fn channel_add(id: i64, number: i64, name: &str) -> Message {
        Message::from(
            FieldMap::new()
                .with("method", MessageKind::ChannelAdd.as_method())
                .with("channelId", id)
                .with("channelNumber", number)
                .with("channelName", name),
        )
    }

    #[test]
    fn test_channel_from_push() {
        let msg = channel_add(1001, 5, "BBC One").with("channelIcon", "imagecache/12");
        let channel = Channel::from_message(&msg).unwrap();

        assert_eq!(channel.original_network_id, OriginalNetworkId(1001));
        assert_eq!(channel.number, ChannelNumber::new(5, 0));
        assert_eq!(channel.name, "BBC One");
        assert_eq!(channel.icon.as_deref(), Some("imagecache/12"));
    }

    #[test]
    fn test_channel_minor_number() {
        let msg = channel_add(7, 7, "Seven HD").with("channelNumberMinor", 1i64);
        let channel = Channel::from_message(&msg).unwrap();
        assert_eq!(channel.number, ChannelNumber::new(7, 1));
    }

    #[test]
    fn test_channel_missing_id() {
        let msg = Message::from(FieldMap::new().with("channelName", "nameless"));
        assert_eq!(
            Channel::from_message(&msg),
            Err(FieldError::Missing("channelId"))
        );
    }

    #[test]
    fn test_channel_negative_id() {
        let msg = channel_add(-4, 1, "bad");
        assert_eq!(
            Channel::from_message(&msg),
            Err(FieldError::OutOfRange {
                field: "channelId",
                value: -4,
            })
        );
    }

    #[test]
    fn test_program_from_push() {
        let msg = Message::from(
            FieldMap::new()
                .with("method", "eventAdd")
                .with("eventId", 99i64)
                .with("channelId", 1001i64)
                .with("start", 1_700_000_000i64)
                .with("stop", 1_700_003_600i64)
                .with("title", "News")
                .with("description", Value::Str("Headlines".into())),
        );
        let program = Program::from_message(&msg).unwrap();

        assert_eq!(program.event_id, 99);
        assert_eq!(program.channel, OriginalNetworkId(1001));
        assert_eq!(program.duration_secs(), 3600);
        assert_eq!(program.title, "News");
        assert_eq!(program.summary, None);
        assert_eq!(program.description.as_deref(), Some("Headlines"));
    }

    #[test]
    fn test_sort_is_stable() {
        let mut list: ChannelList = vec![
            Channel::new(3, 20, "c"),
            Channel::new(1, 10, "a"),
            Channel::new(2, 10, "b"),
        ]
        .into_iter()
        .collect();
        list.sort_by_number();

        let ids: Vec<u32> = list.iter().map(|c| c.original_network_id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_channel_json_shape() {
        let channel = Channel::new(1001, 5, "BBC One").with_icon("imagecache/12");
        let json = serde_json::to_value(&channel).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "original_network_id": 1001,
                "number": { "major": 5, "minor": 0 },
                "name": "BBC One",
                "icon": "imagecache/12",
            })
        );
    }
}
