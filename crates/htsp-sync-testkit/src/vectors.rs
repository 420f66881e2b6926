//! Golden HTSMSG vectors.
//!
//! Each vector pairs a message with the exact body bytes Tvheadend puts on
//! the wire for it. The frame length prefix is not included.

use serde::Serialize;

use htsp_sync_core::{
    decode_body, encode_body, Channel, ChannelNumber, FieldMap, Message, MessageKind, Value,
};
use htsp_sync_engine::{EnableAsyncMetadata, HelloRequest};

use crate::fixtures::channel_add;

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Builds the message under test.
    pub message: fn() -> Message,
    /// Expected body bytes (hex).
    pub body_hex: &'static str,
}

impl GoldenVector {
    pub fn expected_body(&self) -> Vec<u8> {
        hex::decode(self.body_hex).unwrap_or_default()
    }
}

fn hello() -> Message {
    HelloRequest {
        client_name: "htsp-sync".into(),
        client_version: "0.1.0".into(),
        username: None,
    }
    .into_message(1)
}

fn enable_metadata() -> Message {
    EnableAsyncMetadata::window(1_700_000_000, 60).into_message(2)
}

fn three_hd() -> Message {
    channel_add(
        &Channel::new(101, 3, "Three HD")
            .with_number(ChannelNumber::new(3, 1))
            .with_icon("imagecache/3"),
    )
}

fn hello_reply() -> Message {
    Message::default()
        .with("seq", 1i64)
        .with("htspversion", 34i64)
        .with("servername", "Tvheadend")
        .with("servercapability", vec![Value::from("cwc"), Value::from("timeshift")])
}

fn integer_widths() -> Message {
    Message::default()
        .with("start", -1i64)
        .with("zero", 0i64)
        .with("blob", vec![0x00u8, 0xff])
}

fn nested() -> Message {
    Message::default().with(
        "services",
        vec![
            Value::Map(FieldMap::new().with("name", "svc")),
            Value::Map(FieldMap::new()),
        ],
    )
}

fn sync_completed() -> Message {
    Message::default().with("method", MessageKind::InitialSyncCompleted.as_method())
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "hello request",
            message: hello,
            body_hex: "0306000000056d6574686f6468656c6c6f02030000000173657101020b000000016874737076657273696f6e17030a00000009636c69656e746e616d65687473702d73796e63030d00000005636c69656e7476657273696f6e302e312e30",
        },
        GoldenVector {
            name: "enableAsyncMetadata with 60s window",
            message: enable_metadata,
            body_hex: "0306000000136d6574686f64656e61626c654173796e634d657461646174610203000000017365710202030000000165706701020a000000046570674d617854696d653cf15365",
        },
        GoldenVector {
            name: "channelAdd with minor number and icon",
            message: three_hd,
            body_hex: "03060000000a6d6574686f646368616e6e656c4164640209000000016368616e6e656c496465020d000000016368616e6e656c4e756d62657203030b000000086368616e6e656c4e616d6554687265652048440212000000016368616e6e656c4e756d6265724d696e6f7201030b0000000c6368616e6e656c49636f6e696d61676563616368652f33",
        },
        GoldenVector {
            name: "hello reply with capability list",
            message: hello_reply,
            body_hex: "02030000000173657101020b000000016874737076657273696f6e22030a000000097365727665726e616d65547668656164656e640510000000187365727665726361706162696c69747903000000000363776303000000000974696d657368696674",
        },
        GoldenVector {
            name: "negative, zero and binary fields",
            message: integer_widths,
            body_hex: "0205000000087374617274ffffffffffffffff0204000000007a65726f040400000002626c6f6200ff",
        },
        GoldenVector {
            name: "list of maps",
            message: nested,
            body_hex: "050800000019736572766963657301000000000d0304000000036e616d65737663010000000000",
        },
        GoldenVector {
            name: "initialSyncCompleted",
            message: sync_completed,
            body_hex: "0306000000146d6574686f64696e697469616c53796e63436f6d706c65746564",
        },
    ]
}

/// A vector as exported for other implementations.
#[derive(Debug, Serialize)]
struct ExportedVector {
    name: &'static str,
    message: Message,
    body_hex: &'static str,
}

/// All vectors as a JSON array of `{name, message, body_hex}`.
pub fn vectors_json() -> serde_json::Result<String> {
    let exported: Vec<ExportedVector> = all_vectors()
        .into_iter()
        .map(|v| ExportedVector {
            name: v.name,
            message: (v.message)(),
            body_hex: v.body_hex,
        })
        .collect();
    serde_json::to_string_pretty(&exported)
}

/// Check every vector in both directions.
///
/// Returns `(name, matches, actual hex)` per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let message = (v.message)();
            let actual = encode_body(message.fields()).map(hex::encode).unwrap_or_default();
            let decodes = decode_body(&v.expected_body())
                .map(|fields| &fields == message.fields())
                .unwrap_or(false);

            (v.name.to_string(), actual == v.body_hex && decodes, actual)
        })
        .collect()
}
