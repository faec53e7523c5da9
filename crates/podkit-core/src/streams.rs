// Stream types handed to callers, with errors already in `CoreError` form.

use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use podkit_api::stream::{demux, json_lines, raw};
use podkit_api::{ByteStream, Frame, StreamType};
use serde::de::DeserializeOwned;

use crate::error::CoreError;

/// Demultiplexed stdout/stderr frames.
pub type FrameStream = BoxStream<'static, Result<Frame, CoreError>>;

/// One decoded value per JSON line.
pub type JsonStream<T> = BoxStream<'static, Result<T, CoreError>>;

/// Frames from a body; TTY sessions are not multiplexed.
pub(crate) fn frames(body: ByteStream, tty: bool) -> FrameStream {
    let decoded = if tty { raw(body) } else { demux(body) };
    decoded.map_err(CoreError::from).boxed()
}

pub(crate) fn json<T>(body: ByteStream) -> JsonStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    json_lines(body).map_err(CoreError::from).boxed()
}

/// Concatenated payloads of one stream type.
pub fn collect_output(frames: &[Frame], stream: StreamType) -> Vec<u8> {
    frames
        .iter()
        .filter(|frame| frame.stream == stream)
        .flat_map(|frame| frame.payload.iter().copied())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::stream;

    #[tokio::test]
    async fn tty_bodies_pass_through_as_stdout() {
        let body = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"\x01raw"))]).boxed();
        let frames: Vec<Frame> = frames(body, true).try_collect().await.unwrap();
        assert_eq!(frames, vec![Frame::new(StreamType::Stdout, &b"\x01raw"[..])]);
    }

    #[tokio::test]
    async fn decode_errors_become_core_errors() {
        let body = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"\x07\0\0\0\0\0\0\x01x"))]).boxed();
        let err = frames(body, false).try_collect::<Vec<_>>().await.unwrap_err();
        assert!(matches!(err, CoreError::StreamDecode { .. }));
    }

    #[test]
    fn output_is_split_by_stream() {
        let frames = vec![
            Frame::new(StreamType::Stdout, &b"he"[..]),
            Frame::new(StreamType::Stderr, &b"oops"[..]),
            Frame::new(StreamType::Stdout, &b"llo"[..]),
        ];
        assert_eq!(collect_output(&frames, StreamType::Stdout), b"hello");
        assert_eq!(collect_output(&frames, StreamType::Stderr), b"oops");
    }
}
