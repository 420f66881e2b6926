//! Proptest generators for property-based testing.

use bytes::Bytes;
use proptest::prelude::*;

use htsp_sync_core::{Channel, ChannelNumber, FieldMap, OriginalNetworkId, Program, Value};

/// Field names: 0..=32 bytes of ASCII, possibly empty.
pub fn field_name() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{0,32}"
}

/// Leaf values: integers, strings and blobs.
pub fn leaf_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Int),
        ".{0,40}".prop_map(Value::Str),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(|b| Value::Bin(Bytes::from(b))),
    ]
}

/// Arbitrarily nested values, at most `depth` levels of maps and lists.
pub fn value(depth: u32) -> impl Strategy<Value = Value> {
    leaf_value().prop_recursive(depth, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::List),
            field_map_of(inner).prop_map(Value::Map),
        ]
    })
}

/// Field maps with unique names.
pub fn field_map() -> impl Strategy<Value = FieldMap> {
    field_map_of(value(3).boxed())
}

fn field_map_of(values: BoxedStrategy<Value>) -> impl Strategy<Value = FieldMap> {
    prop::collection::btree_map(field_name(), values, 0..8)
        .prop_map(|fields| fields.into_iter().collect())
}

pub fn channel_number() -> impl Strategy<Value = ChannelNumber> {
    (0u32..10_000, prop_oneof![Just(0u32), 1u32..10])
        .prop_map(|(major, minor)| ChannelNumber::new(major, minor))
}

pub fn channel() -> impl Strategy<Value = Channel> {
    (
        any::<u32>(),
        channel_number(),
        "[A-Za-z0-9 ]{1,24}",
        proptest::option::of("imagecache/[0-9]{1,4}"),
    )
        .prop_map(|(id, number, name, icon)| Channel {
            original_network_id: OriginalNetworkId(id),
            number,
            name,
            icon,
        })
}

/// Channels with distinct upstream ids.
pub fn lineup(max: usize) -> impl Strategy<Value = Vec<Channel>> {
    prop::collection::btree_map(any::<u32>(), channel(), 0..=max).prop_map(|channels| {
        channels
            .into_iter()
            .map(|(id, channel)| Channel {
                original_network_id: OriginalNetworkId(id),
                ..channel
            })
            .collect()
    })
}

pub fn program_on(channel: OriginalNetworkId) -> impl Strategy<Value = Program> {
    (
        any::<u32>(),
        1_600_000_000i64..1_900_000_000,
        60i64..14_400,
        "[A-Za-z ]{0,32}",
        proptest::option::of("[A-Za-z ]{0,64}"),
    )
        .prop_map(move |(event_id, start, length, title, summary)| Program {
            event_id,
            channel,
            start,
            stop: start + length,
            title,
            summary,
            description: None,
        })
}
