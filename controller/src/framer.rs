use std::{io, time::Duration};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use podctl_common::protocol::FRAME_DELIMITER;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::error::TransportError;

/// Splits a byte stream on the `\n\n` delimiter and appends it on write.
#[derive(Debug, Default)]
pub struct FrameCodec {
    // Where the next delimiter search starts, so partial frames are not rescanned.
    scanned: usize,
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = self.scanned.saturating_sub(FRAME_DELIMITER.len() - 1);
        let found = src[start..]
            .windows(FRAME_DELIMITER.len())
            .position(|window| window == FRAME_DELIMITER);

        match found {
            Some(offset) => {
                let message = src.split_to(start + offset).freeze();
                src.advance(FRAME_DELIMITER.len());
                self.scanned = 0;
                Ok(Some(message))
            }
            None => {
                self.scanned = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // An unterminated tail is left in the buffer; the caller sees end of stream.
        self.decode(src)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + FRAME_DELIMITER.len());
        dst.put_slice(item.as_bytes());
        dst.put_slice(FRAME_DELIMITER);
        Ok(())
    }
}

/// Message-level view of the hardware socket.
///
/// Reads are cancel-safe: bytes that arrive after a timed-out
/// [`read_message`](Self::read_message) stay buffered for the next call.
pub struct MessageFramer<S> {
    inner: Framed<S, FrameCodec>,
}

impl<S> MessageFramer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S) -> Self {
        Self {
            inner: Framed::new(io, FrameCodec::default()),
        }
    }

    pub async fn read_message(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        match tokio::time::timeout(timeout, self.inner.next()).await {
            Err(_) => Err(TransportError::Timeout { after: timeout }),
            Ok(None) => Err(TransportError::StreamEnded),
            Ok(Some(frame)) => Ok(frame?),
        }
    }

    pub async fn write_message(&mut self, body: String) -> Result<(), TransportError> {
        self.inner.send(body).await?;
        Ok(())
    }
}
