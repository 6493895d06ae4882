//! AMQP 0-9-1 frame codec.
//!
//! A frame is the unit of transmission: a 7-byte header
//! `{type: u8, channel: u16, size: u32}`, a payload of exactly `size`
//! bytes whose shape depends on `type`, and a trailing `0xCE` end
//! octet.
//!
//! # Examples
//!
//! ```rust
//! use bytes::BytesMut;
//! use dumq_amqp::frame::{Frame, read_frame, write_frame};
//!
//! let frame = Frame::Heartbeat;
//! let mut buf = BytesMut::new();
//! write_frame(&mut buf, 131072, &frame).unwrap();
//!
//! let mut input = buf.clone();
//! let decoded = read_frame(&mut input, 131072).unwrap().unwrap();
//! assert_eq!(decoded, frame);
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;

pub const FRAME_END: u8 = 0xCE;

pub const FRAME_TYPE_METHOD: u8 = 1;
pub const FRAME_TYPE_HEADER: u8 = 2;
pub const FRAME_TYPE_BODY: u8 = 3;
pub const FRAME_TYPE_HEARTBEAT: u8 = 8;

/// One of the four AMQP 0-9-1 frame variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Method { channel: u16, class_id: u16, method_id: u16, arguments: Bytes },
    Header { channel: u16, class_id: u16, content_size: u64, properties: Bytes },
    Body { channel: u16, payload: Bytes },
    Heartbeat,
}

impl Frame {
    pub fn channel(&self) -> u16 {
        match self {
            Frame::Method { channel, .. } => *channel,
            Frame::Header { channel, .. } => *channel,
            Frame::Body { channel, .. } => *channel,
            Frame::Heartbeat => 0,
        }
    }
}

/// Attempt to parse one frame from the front of `buf`.
///
/// Returns `Ok(None)` when fewer than a full frame's worth of bytes
/// are buffered; the caller should read more from the socket and
/// retry. This is the only non-fatal outcome — everything else
/// (oversized frame, bad end octet) is a protocol violation.
///
/// On success, the consumed bytes are advanced out of `buf`. On
/// `Ok(None)`, `buf` is left untouched so a subsequent call after
/// more bytes arrive reparses from the same header.
pub fn read_frame(buf: &mut BytesMut, max_frame_size: u32) -> Result<Option<Frame>, CodecError> {
    const HEADER_LEN: usize = 7;
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let frame_type = buf[0];
    let channel = u16::from_be_bytes([buf[1], buf[2]]);
    let size = u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]);

    if max_frame_size != 0 && size > max_frame_size {
        return Err(CodecError::FrameTooLarge { size, max: max_frame_size });
    }

    let total_len = HEADER_LEN + size as usize + 1;
    if buf.len() < total_len {
        return Ok(None);
    }

    let mut framed = buf.split_to(total_len).freeze();
    framed.advance(HEADER_LEN);
    let body = framed.copy_to_bytes(size as usize);
    let end = framed.get_u8();
    if end != FRAME_END {
        return Err(CodecError::BadFrameEnd(end));
    }

    let frame = match frame_type {
        FRAME_TYPE_METHOD => {
            let mut b = body;
            if b.remaining() < 4 {
                return Err(CodecError::Truncated { needed: 4, available: b.remaining() });
            }
            let class_id = b.get_u16();
            let method_id = b.get_u16();
            Frame::Method { channel, class_id, method_id, arguments: b }
        }
        FRAME_TYPE_HEADER => {
            let mut b = body;
            if b.remaining() < 2 + 2 + 8 {
                return Err(CodecError::Truncated { needed: 12, available: b.remaining() });
            }
            let class_id = b.get_u16();
            let _weight = b.get_u16();
            let content_size = b.get_u64();
            Frame::Header { channel, class_id, content_size, properties: b }
        }
        FRAME_TYPE_BODY => Frame::Body { channel, payload: body },
        FRAME_TYPE_HEARTBEAT => Frame::Heartbeat,
        other => return Err(CodecError::UnknownMethod(other as u16, 0)),
    };

    Ok(Some(frame))
}

/// Serialize `frame` to an intermediate buffer and append it whole to
/// `out` in a single extend, so a caller writing `out` to a socket
/// never interleaves another frame's bytes mid-write.
///
/// Fails with `FrameTooLarge` and writes nothing to `out` if the
/// encoded size would exceed `max_frame_size`.
pub fn write_frame(out: &mut BytesMut, max_frame_size: u32, frame: &Frame) -> Result<(), CodecError> {
    let (frame_type, channel, body) = match frame {
        Frame::Method { channel, class_id, method_id, arguments } => {
            let mut body = BytesMut::with_capacity(4 + arguments.len());
            body.put_u16(*class_id);
            body.put_u16(*method_id);
            body.extend_from_slice(arguments);
            (FRAME_TYPE_METHOD, *channel, body)
        }
        Frame::Header { channel, class_id, content_size, properties } => {
            let mut body = BytesMut::with_capacity(12 + properties.len());
            body.put_u16(*class_id);
            body.put_u16(0); // weight, always 0
            body.put_u64(*content_size);
            body.extend_from_slice(properties);
            (FRAME_TYPE_HEADER, *channel, body)
        }
        Frame::Body { channel, payload } => {
            let mut body = BytesMut::with_capacity(payload.len());
            body.extend_from_slice(payload);
            (FRAME_TYPE_BODY, *channel, body)
        }
        Frame::Heartbeat => (FRAME_TYPE_HEARTBEAT, 0, BytesMut::new()),
    };

    let size = body.len() as u32;
    if max_frame_size != 0 && size > max_frame_size {
        return Err(CodecError::FrameTooLarge { size, max: max_frame_size });
    }

    let mut framed = BytesMut::with_capacity(7 + body.len() + 1);
    framed.put_u8(frame_type);
    framed.put_u16(channel);
    framed.put_u32(size);
    framed.extend_from_slice(&body);
    framed.put_u8(FRAME_END);

    out.extend_from_slice(&framed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let mut buf = BytesMut::new();
        write_frame(&mut buf, 131072, &frame).unwrap();
        let decoded = read_frame(&mut buf, 131072).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn round_trip_all_frame_variants() {
        roundtrip(Frame::Method {
            channel: 1,
            class_id: 60,
            method_id: 40,
            arguments: Bytes::from_static(b"args"),
        });
        roundtrip(Frame::Header {
            channel: 1,
            class_id: 60,
            content_size: 11,
            properties: Bytes::from_static(b"props"),
        });
        roundtrip(Frame::Body { channel: 1, payload: Bytes::from_static(b"hello world") });
        roundtrip(Frame::Heartbeat);
    }

    #[test]
    fn read_frame_returns_none_on_incomplete_input() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[FRAME_TYPE_METHOD, 0, 1, 0, 0, 0, 10]); // declares 10-byte body, none buffered
        assert_eq!(read_frame(&mut buf, 131072).unwrap(), None);
        // Buffer must be untouched so a later retry reparses cleanly.
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn read_frame_rejects_bad_end_octet() {
        let mut buf = BytesMut::new();
        buf.put_u8(FRAME_TYPE_HEARTBEAT);
        buf.put_u16(0);
        buf.put_u32(0);
        buf.put_u8(0x00); // wrong end octet
        let err = read_frame(&mut buf, 131072).unwrap_err();
        assert!(matches!(err, CodecError::BadFrameEnd(0x00)));
    }

    #[test]
    fn write_frame_rejects_oversized_frame_and_writes_nothing() {
        let mut out = BytesMut::new();
        let frame = Frame::Body { channel: 1, payload: Bytes::from(vec![0u8; 100]) };
        let err = write_frame(&mut out, 50, &frame).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { .. }));
        assert!(out.is_empty());
    }

    #[test]
    fn read_frame_rejects_oversized_declared_size() {
        let mut buf = BytesMut::new();
        buf.put_u8(FRAME_TYPE_BODY);
        buf.put_u16(1);
        buf.put_u32(1_000_000);
        let err = read_frame(&mut buf, 131072).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { .. }));
    }
}
