//! HTSP messages: requests, correlated replies and server pushes.
//!
//! A message is a [`FieldMap`] plus two well-known fields:
//!
//! - `method`: the request or push name, absent on correlated replies
//! - `seq`: the correlation id, present on requests and their replies

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{FieldMap, Value};

/// Field carrying the method name.
pub const METHOD_FIELD: &str = "method";

/// Field carrying the correlation id.
pub const SEQ_FIELD: &str = "seq";

/// The kind of an HTSP message, derived from its `method` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    // Handshake
    Hello,
    Authenticate,
    EnableAsyncMetadata,

    // Channel pushes
    ChannelAdd,
    ChannelUpdate,
    ChannelDelete,

    // Tag pushes
    TagAdd,
    TagUpdate,
    TagDelete,

    // EPG pushes
    EventAdd,
    EventUpdate,
    EventDelete,

    // Recording pushes
    DvrEntryAdd,
    DvrEntryUpdate,
    DvrEntryDelete,

    /// End of the initial metadata dump.
    InitialSyncCompleted,

    /// A method this client does not model.
    Other(String),
}

impl MessageKind {
    /// The wire method name.
    pub fn as_method(&self) -> &str {
        match self {
            Self::Hello => "hello",
            Self::Authenticate => "authenticate",
            Self::EnableAsyncMetadata => "enableAsyncMetadata",
            Self::ChannelAdd => "channelAdd",
            Self::ChannelUpdate => "channelUpdate",
            Self::ChannelDelete => "channelDelete",
            Self::TagAdd => "tagAdd",
            Self::TagUpdate => "tagUpdate",
            Self::TagDelete => "tagDelete",
            Self::EventAdd => "eventAdd",
            Self::EventUpdate => "eventUpdate",
            Self::EventDelete => "eventDelete",
            Self::DvrEntryAdd => "dvrEntryAdd",
            Self::DvrEntryUpdate => "dvrEntryUpdate",
            Self::DvrEntryDelete => "dvrEntryDelete",
            Self::InitialSyncCompleted => "initialSyncCompleted",
            Self::Other(name) => name,
        }
    }

    /// Parse a wire method name. Never fails: unknown names map to `Other`.
    pub fn from_method(method: &str) -> Self {
        match method {
            "hello" => Self::Hello,
            "authenticate" => Self::Authenticate,
            "enableAsyncMetadata" => Self::EnableAsyncMetadata,
            "channelAdd" => Self::ChannelAdd,
            "channelUpdate" => Self::ChannelUpdate,
            "channelDelete" => Self::ChannelDelete,
            "tagAdd" => Self::TagAdd,
            "tagUpdate" => Self::TagUpdate,
            "tagDelete" => Self::TagDelete,
            "eventAdd" => Self::EventAdd,
            "eventUpdate" => Self::EventUpdate,
            "eventDelete" => Self::EventDelete,
            "dvrEntryAdd" => Self::DvrEntryAdd,
            "dvrEntryUpdate" => Self::DvrEntryUpdate,
            "dvrEntryDelete" => Self::DvrEntryDelete,
            "initialSyncCompleted" => Self::InitialSyncCompleted,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Whether the server sends this kind unsolicited.
    pub fn is_push(&self) -> bool {
        !matches!(
            self,
            Self::Hello | Self::Authenticate | Self::EnableAsyncMetadata
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_method())
    }
}

/// A single HTSP message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    fields: FieldMap,
}

impl Message {
    /// Build a request for `kind` carrying correlation id `seq`.
    pub fn request(kind: MessageKind, seq: u64) -> Self {
        let fields = FieldMap::new()
            .with(METHOD_FIELD, kind.as_method())
            .with(SEQ_FIELD, seq as i64);
        Self { fields }
    }

    /// Builder-style field insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name, value);
        self
    }

    /// The raw `method` field, if any.
    pub fn method(&self) -> Option<&str> {
        self.fields.get(METHOD_FIELD).and_then(Value::as_str)
    }

    /// The message kind, if the message names a method.
    pub fn kind(&self) -> Option<MessageKind> {
        self.method().map(MessageKind::from_method)
    }

    /// The correlation id, if present and non-negative.
    pub fn seq(&self) -> Option<u64> {
        self.fields
            .get(SEQ_FIELD)
            .and_then(Value::as_i64)
            .and_then(|n| u64::try_from(n).ok())
    }

    /// The server-reported error on a failed reply.
    pub fn error(&self) -> Option<&str> {
        self.fields.get("error").and_then(Value::as_str)
    }

    /// Whether the server refused the request for lack of privileges.
    pub fn no_access(&self) -> bool {
        matches!(self.fields.get("noaccess"), Some(Value::Int(n)) if *n != 0)
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn into_fields(self) -> FieldMap {
        self.fields
    }
}

impl From<FieldMap> for Message {
    fn from(fields: FieldMap) -> Self {
        Self { fields }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.method(), self.seq()) {
            (Some(m), Some(s)) => write!(f, "{}#{} ({} fields)", m, s, self.fields.len()),
            (Some(m), None) => write!(f, "{} ({} fields)", m, self.fields.len()),
            (None, Some(s)) => write!(f, "reply#{} ({} fields)", s, self.fields.len()),
            (None, None) => write!(f, "anonymous ({} fields)", self.fields.len()),
        }
    }
}
