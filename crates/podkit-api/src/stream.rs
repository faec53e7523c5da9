// ── Stream decoding ──
//
// Attach, logs and exec output arrive multiplexed: every frame carries an
// 8-byte header `[tag:1][reserved:3][len:4 BE]` followed by `len` payload
// bytes. Events and pull/push/build progress arrive as JSON lines. Both
// decoders sit on top of a raw body stream and buffer partial reads.

use std::future::ready;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder, FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::trace;

use crate::error::Error;
use crate::transport::ByteStream;

/// Size of a frame header.
pub const HEADER_LEN: usize = 8;

/// Largest payload accepted in a single frame (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Longest JSON line accepted from event and progress streams (8 MiB).
pub const MAX_LINE_LEN: usize = 8 * 1024 * 1024;

/// Lazily decoded frames. Ends when the daemon closes the stream.
pub type FrameStream = BoxStream<'static, Result<Frame, Error>>;

/// Lazily decoded JSON values, one per line.
pub type JsonStream<T> = BoxStream<'static, Result<T, Error>>;

/// Channel a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream: StreamType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(stream: StreamType, payload: impl Into<Bytes>) -> Self {
        Self {
            stream,
            payload: payload.into(),
        }
    }
}

// ── Multiplexed frames ──────────────────────────────────────────────

/// Codec for the multiplexed stdio framing.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_len: MAX_FRAME_LEN,
        }
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the payload limit.
    pub fn with_max_len(max_len: usize) -> Self {
        Self { max_len }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let tag = src[0];
        let stream = StreamType::from_tag(tag).ok_or_else(|| Error::StreamDecode {
            message: format!("invalid stream tag {tag:#04x}"),
        })?;

        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        if len > self.max_len {
            return Err(Error::StreamDecode {
                message: format!("frame length {len} exceeds limit of {}", self.max_len),
            });
        }

        let total = HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        trace!(?stream, len, "decoded frame");
        Ok(Some(Frame { stream, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(Error::StreamDecode {
                message: format!("stream closed with {} bytes of an incomplete frame", src.len()),
            }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Error> {
        let len = frame.payload.len();
        if len > self.max_len {
            return Err(Error::StreamDecode {
                message: format!("frame length {len} exceeds limit of {}", self.max_len),
            });
        }
        let len = u32::try_from(len).map_err(|_| Error::StreamDecode {
            message: format!("frame length {len} does not fit in a header"),
        })?;

        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u8(frame.stream.tag());
        dst.put_bytes(0, 3);
        dst.put_u32(len);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

/// Decode a multiplexed body into frames.
///
/// A malformed header ends the stream with `Error::StreamDecode`; nothing
/// after it is yielded.
pub fn demux(body: ByteStream) -> FrameStream {
    FramedRead::new(StreamReader::new(body), FrameCodec::new()).boxed()
}

/// Wrap an unframed body (TTY attach) as a stream of stdout frames.
pub fn raw(body: ByteStream) -> FrameStream {
    body.map_ok(|chunk| Frame::new(StreamType::Stdout, chunk))
        .map_err(Error::from)
        .boxed()
}

// ── JSON lines ──────────────────────────────────────────────────────

/// Decode a newline-delimited JSON body, skipping blank lines.
pub fn json_lines<T>(body: ByteStream) -> JsonStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    FramedRead::new(
        StreamReader::new(body),
        LinesCodec::new_with_max_length(MAX_LINE_LEN),
    )
    .map_err(|e| match e {
        LinesCodecError::MaxLineLengthExceeded => Error::StreamDecode {
            message: format!("line longer than {MAX_LINE_LEN} bytes"),
        },
        LinesCodecError::Io(e) => Error::from(e),
    })
    .try_filter(|line| ready(!line.trim().is_empty()))
    .and_then(|line| {
        ready(
            serde_json::from_str(&line).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: line,
            }),
        )
    })
    .boxed()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io;

    use futures_util::stream;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    use super::*;

    fn chunked(bytes: &[u8], size: usize) -> ByteStream {
        let chunks: Vec<io::Result<Bytes>> = bytes
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(chunks).boxed()
    }

    fn encode_all(frames: &[Frame]) -> BytesMut {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        for frame in frames {
            codec.encode(frame.clone(), &mut buf).unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn decodes_single_stdout_frame() {
        let wire = b"\x01\x00\x00\x00\x00\x00\x00\x05hello";
        let frames: Vec<Frame> = demux(chunked(wire, wire.len()))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(frames, vec![Frame::new(StreamType::Stdout, "hello")]);
    }

    #[tokio::test]
    async fn round_trip_survives_any_chunking() {
        let frames = vec![
            Frame::new(StreamType::Stdout, "line one\n"),
            Frame::new(StreamType::Stderr, "warning: something\n"),
            Frame::new(StreamType::Stdout, Bytes::new()),
            Frame::new(StreamType::Stdin, vec![0_u8, 1, 2, 255]),
            Frame::new(StreamType::Stdout, vec![b'x'; 70_000]),
            Frame::new(StreamType::Stderr, "tail"),
        ];
        let wire = encode_all(&frames);

        for size in [1, 2, 3, 5, 7, 8, 9, 13, 64, 4096, wire.len()] {
            let decoded: Vec<Frame> = demux(chunked(&wire, size)).try_collect().await.unwrap();
            assert_eq!(decoded, frames, "chunk size {size}");
        }
    }

    #[tokio::test]
    async fn codec_reads_headers_split_across_reads() {
        let reader = tokio_test::io::Builder::new()
            .read(b"\x02\x00\x00")
            .read(b"\x00\x00\x00\x00\x04ou")
            .read(b"ch\x01\x00\x00\x00\x00\x00\x00\x00")
            .build();
        let frames: Vec<Frame> = FramedRead::new(reader, FrameCodec::new())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            frames,
            vec![
                Frame::new(StreamType::Stderr, "ouch"),
                Frame::new(StreamType::Stdout, Bytes::new()),
            ]
        );
    }

    #[tokio::test]
    async fn invalid_tag_aborts_stream() {
        let mut wire = encode_all(&[Frame::new(StreamType::Stdout, "ok")]);
        wire.extend_from_slice(b"\x07\x00\x00\x00\x00\x00\x00\x02no");
        wire.extend_from_slice(&encode_all(&[Frame::new(StreamType::Stdout, "never")]));

        let mut frames = demux(chunked(&wire, 3));
        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            Frame::new(StreamType::Stdout, "ok")
        );
        let err = frames.next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::StreamDecode { .. }), "{err:?}");
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let wire = b"\x02\x00\x00\x00\xff\xff\xff\xff";
        let err = demux(chunked(wire, 8)).next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::StreamDecode { .. }));
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let wire = b"\x01\x00\x00\x00\x00\x00\x00\x0ashort";
        let result: Result<Vec<Frame>, Error> = demux(chunked(wire, 4)).try_collect().await;
        assert!(matches!(result, Err(Error::StreamDecode { .. })));
    }

    #[tokio::test]
    async fn body_errors_surface_as_connection_errors() {
        let body: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"\x01\x00\x00")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ])
        .boxed();
        let err = demux(body).next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Connection { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn raw_body_becomes_stdout_frames() {
        let frames: Vec<Frame> = raw(chunked(b"tty output", 4)).try_collect().await.unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.stream == StreamType::Stdout));
    }

    #[tokio::test]
    async fn json_lines_split_across_chunks() {
        let body = b"{\"status\":\"pulling\"}\n\n{\"id\":\"abc\"}\r\n{\"stream\":\"done\"}";
        let values: Vec<Value> = json_lines(chunked(body, 5)).try_collect().await.unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[1]["id"], "abc");
        assert_eq!(values[2]["stream"], "done");
    }

    #[tokio::test]
    async fn json_lines_report_bad_lines() {
        let err = json_lines::<Value>(chunked(b"{not json}\n", 64))
            .next()
            .await
            .unwrap()
            .unwrap_err();
        match err {
            Error::Deserialization { body, .. } => assert_eq!(body, "{not json}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
