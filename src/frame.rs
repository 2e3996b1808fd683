//! Wire frame codec.
//!
//! Every frame starts with a 4-byte big-endian length counting the tag byte
//! and the body (not the length field itself), followed by a 1-byte type tag
//! and a type-specific body. String-bearing frames declare their payload
//! length plus one; decode slices exactly `length - 1` payload bytes.
//!
//! Encoding and decoding are pure: no I/O, no state.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

const TAG_DATA: u8 = 0;
const TAG_RESIZE: u8 = 1;
const TAG_NAME: u8 = 2;
const TAG_CWD: u8 = 3;

/// Number of header bytes preceding the body: length field plus type tag.
const HEADER_LEN: usize = 5;

/// One length-prefixed, type-tagged unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Terminal output or input bytes.
    Data(Bytes),
    /// Terminal dimension change (caller to backend only).
    Resize { cols: u16, rows: u16 },
    /// Foreground process name reported by the backend.
    Name(String),
    /// Working directory reported by the backend.
    Cwd(String),
}

/// Encode a frame into its wire representation.
pub fn encode(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::new();
    match frame {
        Frame::Data(payload) => put_text_frame(&mut buf, TAG_DATA, payload),
        Frame::Resize { cols, rows } => {
            buf.reserve(9);
            buf.put_u32(5);
            buf.put_u8(TAG_RESIZE);
            buf.put_u16(*cols);
            buf.put_u16(*rows);
        }
        Frame::Name(name) => put_text_frame(&mut buf, TAG_NAME, name.as_bytes()),
        Frame::Cwd(cwd) => put_text_frame(&mut buf, TAG_CWD, cwd.as_bytes()),
    }
    buf.freeze()
}

fn put_text_frame(buf: &mut BytesMut, tag: u8, payload: &[u8]) {
    buf.reserve(HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32 + 1);
    buf.put_u8(tag);
    buf.put_slice(payload);
}

/// Attempt to decode one frame from the start of `buf`.
///
/// On success returns the frame together with the total number of bytes it
/// occupied (`4 + length`) so the caller can advance its cursor. Returns
/// `Ok(None)` when the buffer does not yet hold a complete frame; nothing is
/// consumed in either case, and the buffer must be retried unchanged once
/// more bytes arrive.
pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + length {
        return Ok(None);
    }
    if length == 0 {
        return Err(ProtocolError::Malformed("zero-length frame"));
    }

    let tag = buf[4];
    let body = &buf[HEADER_LEN..4 + length];
    let frame = match tag {
        TAG_DATA => Frame::Data(Bytes::copy_from_slice(body)),
        TAG_RESIZE => {
            if body.len() < 4 {
                return Err(ProtocolError::Malformed("resize body shorter than 4 bytes"));
            }
            Frame::Resize {
                cols: u16::from_be_bytes([body[0], body[1]]),
                rows: u16::from_be_bytes([body[2], body[3]]),
            }
        }
        TAG_NAME => Frame::Name(String::from_utf8_lossy(body).into_owned()),
        TAG_CWD => Frame::Cwd(String::from_utf8_lossy(body).into_owned()),
        other => return Err(ProtocolError::UnknownFrameType(other)),
    };

    Ok(Some((frame, 4 + length)))
}
