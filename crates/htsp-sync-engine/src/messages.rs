//! Typed HTSP requests and replies used by the sync protocol.
//!
//! Requests render into [`Message`]s with a caller-supplied correlation id;
//! replies are projected out of the correlated [`Message`] the server sent.

use serde::{Deserialize, Serialize};

use htsp_sync_core::{Message, MessageKind, Value};

use crate::error::SyncError;

/// Protocol version announced in `hello`.
pub const HTSP_VERSION: i64 = 23;

/// `hello`: the first request on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub client_name: String,
    pub client_version: String,
    pub username: Option<String>,
}

impl HelloRequest {
    pub fn into_message(self, seq: u64) -> Message {
        let msg = Message::request(MessageKind::Hello, seq)
            .with("htspversion", HTSP_VERSION)
            .with("clientname", self.client_name)
            .with("clientversion", self.client_version);

        match self.username {
            Some(username) => msg.with("username", username),
            None => msg,
        }
    }
}

/// Server identity from the `hello` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    pub htsp_version: Option<i64>,
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    pub capabilities: Vec<String>,
}

impl HelloReply {
    /// Project the reply. Missing or mistyped fields are left empty; a
    /// minimal server still completes the handshake.
    pub fn from_message(message: &Message) -> Self {
        let fields = message.fields();
        let capabilities = fields
            .get("servercapability")
            .and_then(Value::as_list)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            htsp_version: fields.get("htspversion").and_then(Value::as_i64),
            server_name: fields.get("servername").and_then(Value::as_str).map(str::to_owned),
            server_version: fields
                .get("serverversion")
                .and_then(Value::as_str)
                .map(str::to_owned),
            capabilities,
        }
    }
}

/// `enableAsyncMetadata`: start the metadata push stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnableAsyncMetadata {
    /// Include EPG events.
    pub epg: bool,
    /// Latest event start to include, unix seconds.
    pub epg_max_time: i64,
}

impl EnableAsyncMetadata {
    /// EPG enabled with a window of `window_secs` from `now`.
    pub fn window(now: i64, window_secs: i64) -> Self {
        Self {
            epg: true,
            epg_max_time: now + window_secs,
        }
    }

    pub fn into_message(self, seq: u64) -> Message {
        Message::request(MessageKind::EnableAsyncMetadata, seq)
            .with("epg", self.epg)
            .with("epgMaxTime", self.epg_max_time)
    }
}

/// Fail with [`SyncError::Server`] if `reply` reports an error or refusal.
pub fn check_reply(kind: &MessageKind, reply: &Message) -> Result<(), SyncError> {
    if let Some(error) = reply.error() {
        return Err(SyncError::Server {
            method: kind.to_string(),
            message: error.to_owned(),
        });
    }
    if reply.no_access() {
        return Err(SyncError::Server {
            method: kind.to_string(),
            message: "access denied".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use htsp_sync_core::FieldMap;

    #[test]
    fn test_hello_fields() {
        let msg = HelloRequest {
            client_name: "htsp-sync".into(),
            client_version: "0.1.0".into(),
            username: Some("viewer".into()),
        }
        .into_message(1);

        let fields = msg.fields();
        assert_eq!(msg.kind(), Some(MessageKind::Hello));
        assert_eq!(msg.seq(), Some(1));
        assert_eq!(fields.opt_i64("htspversion").unwrap(), Some(23));
        assert_eq!(fields.opt_str("clientname").unwrap(), Some("htsp-sync"));
        assert_eq!(fields.opt_str("username").unwrap(), Some("viewer"));
    }

    #[test]
    fn test_hello_without_username() {
        let msg = HelloRequest {
            client_name: "c".into(),
            client_version: "v".into(),
            username: None,
        }
        .into_message(4);

        assert!(!msg.fields().contains_key("username"));
    }

    #[test]
    fn test_metadata_window() {
        let msg = EnableAsyncMetadata::window(1_700_000_000, 60).into_message(2);

        assert_eq!(msg.fields().opt_i64("epg").unwrap(), Some(1));
        assert_eq!(
            msg.fields().opt_i64("epgMaxTime").unwrap(),
            Some(1_700_000_060)
        );
    }

    #[test]
    fn test_hello_reply_projection() {
        let reply = Message::from(
            FieldMap::new()
                .with("seq", 1i64)
                .with("htspversion", 25i64)
                .with("servername", "HTS Tvheadend")
                .with("serverversion", "4.2.8")
                .with(
                    "servercapability",
                    vec![Value::from("timeshift"), Value::from("imagecache")],
                ),
        );

        let hello = HelloReply::from_message(&reply);
        assert_eq!(hello.htsp_version, Some(25));
        assert_eq!(hello.server_name.as_deref(), Some("HTS Tvheadend"));
        assert_eq!(hello.capabilities, vec!["timeshift", "imagecache"]);
    }

    #[test]
    fn test_check_reply() {
        let ok = Message::from(FieldMap::new().with("seq", 1i64));
        assert!(check_reply(&MessageKind::Hello, &ok).is_ok());

        let refused = Message::from(FieldMap::new().with("noaccess", 1i64));
        assert!(matches!(
            check_reply(&MessageKind::EnableAsyncMetadata, &refused),
            Err(SyncError::Server { method, .. }) if method == "enableAsyncMetadata"
        ));

        let failed = Message::from(FieldMap::new().with("error", "Invalid arguments"));
        assert!(matches!(
            check_reply(&MessageKind::Hello, &failed),
            Err(SyncError::Server { message, .. }) if message == "Invalid arguments"
        ));
    }
}
