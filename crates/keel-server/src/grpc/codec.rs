//! gRPC message framing.
//!
//! Every message on the wire is prefixed with a one byte compression flag and
//! a four byte big-endian length. Compressed messages are not supported.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::StreamExt;
use http::header::{HeaderMap, HeaderValue};
use http_body_util::BodyStream;
use hyper::body::Body;
use keel_middleware::{GrpcCode, MessageStream, RequestError};
use std::fmt::Write as _;

/// Length of the frame prefix.
pub const PREFIX_LEN: usize = 5;

/// Default cap on a single inbound message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Frames one message.
#[must_use]
pub fn encode(message: &[u8]) -> Bytes {
    let len = u32::try_from(message.len()).unwrap_or(u32::MAX);
    let mut frame = BytesMut::with_capacity(PREFIX_LEN + message.len());
    frame.put_u8(0);
    frame.put_u32(len);
    frame.put_slice(message);
    frame.freeze()
}

/// Splits the next complete message off `buf`, if one is buffered.
pub fn split_message(buf: &mut BytesMut, max: usize) -> Result<Option<Bytes>, RequestError> {
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }
    if buf[0] != 0 {
        return Err(RequestError::from_grpc(
            GrpcCode::Unimplemented,
            "compressed messages are not supported",
        ));
    }

    let len = usize::try_from(u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]))
        .unwrap_or(usize::MAX);
    if len > max {
        return Err(RequestError::from_grpc(
            GrpcCode::ResourceExhausted,
            format!("message of {len} bytes exceeds the {max} byte limit"),
        ));
    }
    if buf.len() < PREFIX_LEN + len {
        return Ok(None);
    }

    buf.advance(PREFIX_LEN);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Decodes a body that must carry exactly one message.
pub fn decode_unary(body: &[u8], max: usize) -> Result<Bytes, RequestError> {
    let mut buf = BytesMut::from(body);
    match split_message(&mut buf, max)? {
        Some(message) if buf.is_empty() => Ok(message),
        Some(_) => Err(RequestError::from_grpc(
            GrpcCode::InvalidArgument,
            "unary call carried more than one message",
        )),
        None => Err(RequestError::from_grpc(
            GrpcCode::InvalidArgument,
            "unary call carried no complete message",
        )),
    }
}

struct Decoder<B> {
    frames: BodyStream<B>,
    buf: BytesMut,
    max: usize,
    done: bool,
}

/// Decodes a request body into a stream of messages.
///
/// The stream ends with an error if the body breaks off mid-message.
pub fn decode_stream<B>(body: B, max: usize) -> MessageStream
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: std::fmt::Display,
{
    let decoder = Decoder {
        frames: BodyStream::new(body),
        buf: BytesMut::new(),
        max,
        done: false,
    };

    Box::pin(futures_util::stream::unfold(decoder, |mut decoder| async move {
        loop {
            if decoder.done {
                return None;
            }
            match split_message(&mut decoder.buf, decoder.max) {
                Ok(Some(message)) => return Some((Ok(message), decoder)),
                Ok(None) => {}
                Err(e) => {
                    decoder.done = true;
                    return Some((Err(e), decoder));
                }
            }

            match decoder.frames.next().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        decoder.buf.extend_from_slice(&data);
                    }
                }
                Some(Err(e)) => {
                    decoder.done = true;
                    return Some((
                        Err(RequestError::from_grpc(GrpcCode::Cancelled, e.to_string())),
                        decoder,
                    ));
                }
                None => {
                    decoder.done = true;
                    if decoder.buf.is_empty() {
                        return None;
                    }
                    return Some((
                        Err(RequestError::from_grpc(
                            GrpcCode::InvalidArgument,
                            "stream ended inside a message",
                        )),
                        decoder,
                    ));
                }
            }
        }
    }))
}

/// Builds the `grpc-status` / `grpc-message` pair sent as trailers.
#[must_use]
pub fn status_headers(code: GrpcCode, message: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("grpc-status", HeaderValue::from(u16::from(code.as_u8())));
    if !message.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&percent_encode(message)) {
            headers.insert("grpc-message", value);
        }
    }
    headers
}

fn percent_encode(message: &str) -> String {
    let mut encoded = String::with_capacity(message.len());
    for byte in message.bytes() {
        if (0x20..=0x7e).contains(&byte) && byte != b'%' {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}
