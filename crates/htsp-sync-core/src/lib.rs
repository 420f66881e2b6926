//! # HTSP Sync Core
//!
//! Pure primitives for the HTSP EPG sync client: messages, the HTSMSG wire
//! codec, and the channel/program model.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Message`] - A request, correlated reply or server push
//! - [`MessageKind`] - Tagged method name used for routing
//! - [`FieldMap`] / [`Value`] - The ordered, typed field mapping
//! - [`Channel`] / [`Program`] - Entities accumulated during a sync
//!
//! ## Wire Format
//!
//! Messages are framed with a big-endian u32 length and encoded as HTSMSG.
//! See the [`htsmsg`] module.

pub mod error;
pub mod htsmsg;
pub mod message;
pub mod model;
pub mod types;
pub mod value;

pub use error::{CodecError, FieldError};
pub use htsmsg::{
    decode_body, encode_body, FieldCodec, HtsmsgCodec, FRAME_HEADER_LEN, MAX_NESTING_DEPTH,
};
pub use message::{Message, MessageKind, METHOD_FIELD, SEQ_FIELD};
pub use model::{Channel, ChannelList, Program, ProgramList};
pub use types::{ChannelNumber, OriginalNetworkId, RowId};
pub use value::{FieldMap, Value};
