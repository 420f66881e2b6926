//! Length-prefixed framing over an async byte stream.
//!
//! Every frame is a big-endian u32 body length followed by an HTSMSG body.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use htsp_sync_core::{CodecError, FieldCodec, Message};

use crate::error::ConnectionError;

/// Default cap on an inbound frame body.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Reads and decodes frames from a stream.
pub struct FrameReader<R> {
    reader: R,
    codec: Arc<dyn FieldCodec>,
    max_len: usize,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, codec: Arc<dyn FieldCodec>, max_len: usize) -> Self {
        Self {
            reader,
            codec,
            max_len,
            buf: BytesMut::new(),
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` when the peer closes the stream on a frame
    /// boundary. A close in the middle of a frame is a transport error.
    pub async fn next(&mut self) -> Result<Option<Message>, ConnectionError> {
        let len = match self.reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if len > self.max_len {
            return Err(CodecError::FrameTooLarge {
                len,
                limit: self.max_len,
            }
            .into());
        }

        self.buf.clear();
        self.buf.resize(len, 0);
        self.reader.read_exact(&mut self.buf).await?;

        let fields = self.codec.decode(&self.buf)?;
        Ok(Some(Message::from(fields)))
    }
}

/// Write one pre-encoded frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Bytes) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use htsp_sync_core::{HtsmsgCodec, MessageKind};

    fn codec() -> Arc<dyn FieldCodec> {
        Arc::new(HtsmsgCodec)
    }

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let first = Message::request(MessageKind::Hello, 1);
        let second = Message::request(MessageKind::EnableAsyncMetadata, 2).with("epg", 1i64);

        let mut wire = Vec::new();
        for msg in [&first, &second] {
            wire.extend_from_slice(&HtsmsgCodec.encode_frame(msg.fields()).unwrap());
        }

        let mut reader = FrameReader::new(wire.as_slice(), codec(), DEFAULT_MAX_MESSAGE_LEN);
        assert_eq!(reader.next().await.unwrap().unwrap().fields(), first.fields());
        assert_eq!(reader.next().await.unwrap().unwrap().fields(), second.fields());
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let wire = 1024u32.to_be_bytes();
        let mut reader = FrameReader::new(&wire[..], codec(), 16);

        assert!(matches!(
            reader.next().await,
            Err(ConnectionError::Decode(CodecError::FrameTooLarge { len: 1024, limit: 16 }))
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_is_transport_error() {
        let mut wire = 10u32.to_be_bytes().to_vec();
        wire.extend_from_slice(&[1, 2, 3]);
        let mut reader = FrameReader::new(wire.as_slice(), codec(), DEFAULT_MAX_MESSAGE_LEN);

        assert!(matches!(reader.next().await, Err(ConnectionError::Transport(_))));
    }

    #[tokio::test]
    async fn test_garbage_body_is_decode_error() {
        let mut wire = 2u32.to_be_bytes().to_vec();
        wire.extend_from_slice(&[0xff, 0x00]);
        let mut reader = FrameReader::new(wire.as_slice(), codec(), DEFAULT_MAX_MESSAGE_LEN);

        assert!(matches!(reader.next().await, Err(ConnectionError::Decode(_))));
    }

    #[tokio::test]
    async fn test_deeply_nested_body_is_decode_error() {
        let levels = 100_000usize;
        let mut body = Vec::with_capacity(levels * 6);
        for level in 0..levels {
            body.push(1);
            body.push(0);
            body.extend_from_slice(&(((levels - level - 1) * 6) as u32).to_be_bytes());
        }
        let mut wire = (body.len() as u32).to_be_bytes().to_vec();
        wire.extend_from_slice(&body);
        let mut reader = FrameReader::new(wire.as_slice(), codec(), DEFAULT_MAX_MESSAGE_LEN);

        assert!(matches!(
            reader.next().await,
            Err(ConnectionError::Decode(CodecError::TooDeep { .. }))
        ));
    }

    #[tokio::test]
    async fn test_write_frame() {
        let frame = Bytes::from_static(&[0, 0, 0, 1, 9]);
        let mut out = Vec::new();
        write_frame(&mut out, &frame).await.unwrap();
        assert_eq!(out, vec![0, 0, 0, 1, 9]);
    }
}
