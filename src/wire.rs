// ABOUTME: Wire-level codec for the Wayland-style protocol wire format
// ABOUTME: Separates header/argument encoding from object resolution and dispatch

//! Frame codec: the wire format is a fixed 8-byte header followed by a packed
//! argument payload. Unlike an SMPP-style fixed PDU catalogue, the argument
//! layout of a message is not known statically by this module: it is handed
//! a `&[ArgType]` signature (supplied by an [`crate::interface::Interface`])
//! and decodes/encodes against that signature. File descriptors never appear
//! inline; they travel through the side channel in [`crate::socket`] and are
//! threaded through [`ArgValue::Fd`] slots in argument order.

use bytes::{Buf, BufMut, BytesMut};
use std::collections::VecDeque;
use std::io::Cursor;
use std::os::fd::OwnedFd;
use thiserror::Error;

/// A 32-bit protocol object id. `0` denotes "null" in argument position.
pub type RawObjectId = u32;

/// Maximum allowed message size, matching the de-facto Wayland wire limit.
pub const MAX_MESSAGE_SIZE: u32 = 4096;

/// 24.8 signed fixed-point number, as used by the `fixed` argument type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Fixed(pub i32);

impl Fixed {
    pub fn from_f64(value: f64) -> Self {
        Fixed((value * 256.0) as i32)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 256.0
    }
}

impl From<f64> for Fixed {
    fn from(value: f64) -> Self {
        Fixed::from_f64(value)
    }
}

/// Declared shape of one argument in a request/event signature.
///
/// `Object`/`NewId` carry a `nullable` flag because the protocol lets some
/// object-valued arguments legitimately be absent (id 0) while others must
/// not be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgType {
    Int,
    Uint,
    Fixed,
    String,
    Array,
    Object { nullable: bool },
    NewId,
    /// A `new_id` whose interface is not statically known (e.g. `Registry.bind`):
    /// encoded/decoded as (interface name, version, id).
    AnyNewId,
    Fd,
}

/// A decoded or to-be-encoded argument value.
#[derive(Debug)]
pub enum ArgValue {
    Int(i32),
    Uint(u32),
    Fixed(Fixed),
    String(String),
    Array(Vec<u8>),
    Object(RawObjectId),
    NewId(RawObjectId),
    AnyNewId {
        interface: String,
        version: u32,
        id: RawObjectId,
    },
    Fd(OwnedFd),
}

impl ArgValue {
    pub fn as_uint(&self) -> Option<u32> {
        match self {
            ArgValue::Uint(v) => Some(*v),
            ArgValue::Object(v) | ArgValue::NewId(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_fd(self) -> Option<OwnedFd> {
        match self {
            ArgValue::Fd(fd) => Some(fd),
            _ => None,
        }
    }
}

/// The 8-byte frame header: target object, then `(size << 16) | opcode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub sender: RawObjectId,
    pub opcode: u16,
    /// Total frame length in bytes, including this header.
    pub size: u16,
}

impl MessageHeader {
    pub const SIZE: usize = 8;

    /// Peek the header without consuming it. Leaves `buf`'s position untouched.
    pub fn peek(buf: &Cursor<&[u8]>) -> Result<MessageHeader, WireError> {
        let slice = buf.get_ref();
        let pos = buf.position() as usize;
        if slice.len() - pos < Self::SIZE {
            return Err(WireError::Incomplete);
        }
        let raw = &slice[pos..pos + Self::SIZE];
        let sender = u32::from_le_bytes(raw[0..4].try_into().unwrap());
        let size_and_opcode = u32::from_le_bytes(raw[4..8].try_into().unwrap());
        let header = MessageHeader {
            sender,
            opcode: (size_and_opcode & 0xFFFF) as u16,
            size: (size_and_opcode >> 16) as u16,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), WireError> {
        if (self.size as usize) < Self::SIZE {
            return Err(WireError::SizeTooSmall(self.size as u32));
        }
        if self.size % 4 != 0 {
            return Err(WireError::SizeNotAligned(self.size as u32));
        }
        if self.size as u32 > MAX_MESSAGE_SIZE {
            return Err(WireError::SizeTooLarge {
                size: self.size as u32,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(())
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.sender);
        buf.put_u32_le(((self.size as u32) << 16) | self.opcode as u32);
    }
}

/// Codec-level errors. Each maps to one row of the error taxonomy carried by
/// `ProtocolError` (see `crate::error`).
#[derive(Debug, Error)]
pub enum WireError {
    #[error("incomplete frame: need more data")]
    Incomplete,

    #[error("frame size {0} is smaller than the 8-byte header")]
    SizeTooSmall(u32),

    #[error("frame size {0} is not a multiple of 4")]
    SizeNotAligned(u32),

    #[error("frame size {size} exceeds the maximum of {max}")]
    SizeTooLarge { size: u32, max: u32 },

    #[error("string argument is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("missing file descriptor for fd argument")]
    MissingFd,

    #[error("null object id where a non-nullable object/new_id argument was expected")]
    UnexpectedNull,

    #[error("trailing bytes left in payload after decoding signature")]
    TrailingBytes,
}

/// Split an owned argument list into the values that occupy wire bytes and
/// the fds that travel as ancillary data, preserving each group's relative
/// order. Call this before `encode_message` when the caller holds `fds`
/// separately for `sendmsg`.
pub fn take_fds(args: Vec<ArgValue>) -> (Vec<ArgValue>, Vec<OwnedFd>) {
    let mut values = Vec::with_capacity(args.len());
    let mut fds = Vec::new();
    for arg in args {
        match arg {
            ArgValue::Fd(fd) => fds.push(fd),
            other => values.push(other),
        }
    }
    (values, fds)
}

/// Encode one message's header and non-fd arguments into `buf`. `args` must
/// already have had its `Fd` entries extracted via [`take_fds`] — fd-typed
/// argument slots contribute no bytes to the payload.
pub fn encode_message(
    sender: RawObjectId,
    opcode: u16,
    args: &[ArgValue],
) -> Result<BytesMut, WireError> {
    let mut buf = BytesMut::with_capacity(MessageHeader::SIZE + 32);
    buf.put_bytes(0, MessageHeader::SIZE);

    for arg in args {
        match arg {
            ArgValue::Int(v) => buf.put_i32_le(*v),
            ArgValue::Uint(v) => buf.put_u32_le(*v),
            ArgValue::Fixed(Fixed(v)) => buf.put_i32_le(*v),
            ArgValue::Object(id) | ArgValue::NewId(id) => buf.put_u32_le(*id),
            ArgValue::String(s) => encode_array(&mut buf, s.as_bytes(), true),
            ArgValue::Array(bytes) => encode_array(&mut buf, bytes, false),
            ArgValue::AnyNewId {
                interface,
                version,
                id,
            } => {
                encode_array(&mut buf, interface.as_bytes(), true);
                buf.put_u32_le(*version);
                buf.put_u32_le(*id);
            }
            ArgValue::Fd(_) => {
                unreachable!("fd arguments must be extracted with take_fds before encoding")
            }
        }
    }

    let size = buf.len();
    if size as u32 > MAX_MESSAGE_SIZE {
        return Err(WireError::SizeTooLarge {
            size: size as u32,
            max: MAX_MESSAGE_SIZE,
        });
    }
    let header = MessageHeader {
        sender,
        opcode,
        size: size as u16,
    };
    let mut header_buf = BytesMut::with_capacity(MessageHeader::SIZE);
    header.encode(&mut header_buf);
    buf[0..MessageHeader::SIZE].copy_from_slice(&header_buf);
    Ok(buf)
}

fn encode_array(buf: &mut BytesMut, bytes: &[u8], nul_terminate: bool) {
    let logical_len = bytes.len() + if nul_terminate { 1 } else { 0 };
    buf.put_u32_le(logical_len as u32);
    buf.put_slice(bytes);
    if nul_terminate {
        buf.put_u8(0);
    }
    let padding = pad_len(logical_len);
    buf.put_bytes(0, padding);
}

fn pad_len(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// Decode the argument payload of a message whose header has already been
/// consumed. `fds` is the connection's inbound fd queue; one entry is popped
/// per `ArgType::Fd` signature slot, in order (Invariant I2).
pub fn decode_args(
    buf: &mut Cursor<&[u8]>,
    signature: &[ArgType],
    fds: &mut VecDeque<OwnedFd>,
) -> Result<Vec<ArgValue>, WireError> {
    let mut values = Vec::with_capacity(signature.len());
    for arg_type in signature {
        let value = match arg_type {
            ArgType::Int => ArgValue::Int(get_i32(buf)?),
            ArgType::Uint => ArgValue::Uint(get_u32(buf)?),
            ArgType::Fixed => ArgValue::Fixed(Fixed(get_i32(buf)?)),
            ArgType::Object { nullable } => {
                let id = get_u32(buf)?;
                if id == 0 && !nullable {
                    return Err(WireError::UnexpectedNull);
                }
                ArgValue::Object(id)
            }
            ArgType::NewId => ArgValue::NewId(get_u32(buf)?),
            ArgType::AnyNewId => {
                let interface = decode_string(buf)?;
                let version = get_u32(buf)?;
                let id = get_u32(buf)?;
                ArgValue::AnyNewId {
                    interface,
                    version,
                    id,
                }
            }
            ArgType::String => ArgValue::String(decode_string(buf)?),
            ArgType::Array => ArgValue::Array(decode_array(buf)?),
            ArgType::Fd => {
                let fd = fds.pop_front().ok_or(WireError::MissingFd)?;
                ArgValue::Fd(fd)
            }
        };
        values.push(value);
    }
    if buf.has_remaining() {
        return Err(WireError::TrailingBytes);
    }
    Ok(values)
}

fn get_i32(buf: &mut Cursor<&[u8]>) -> Result<i32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Incomplete);
    }
    Ok(buf.get_i32_le())
}

fn get_u32(buf: &mut Cursor<&[u8]>) -> Result<u32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Incomplete);
    }
    Ok(buf.get_u32_le())
}

fn decode_array(buf: &mut Cursor<&[u8]>) -> Result<Vec<u8>, WireError> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(WireError::Incomplete);
    }
    let bytes = buf.copy_to_bytes(len).to_vec();
    let padding = pad_len(len);
    if buf.remaining() < padding {
        return Err(WireError::Incomplete);
    }
    buf.advance(padding);
    Ok(bytes)
}

fn decode_string(buf: &mut Cursor<&[u8]>) -> Result<String, WireError> {
    let mut bytes = decode_array(buf)?;
    // Logical length includes the trailing NUL; strip it before validating UTF-8.
    if bytes.last() == Some(&0) {
        bytes.pop();
    }
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encoding_matches_scenario_1() {
        let buf = encode_message(1, 0, &[]).unwrap();
        assert_eq!(&buf[..], &[0x01, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn string_padding_matches_scenario_2() {
        let args = vec![ArgValue::String("None".to_string())];
        let buf = encode_message(1, 0, &args).unwrap();
        // header(8) + len(4) + "None\0"(5) padded to 8 = 20 total
        assert_eq!(buf.len(), 20);
        assert_eq!(&buf[8..12], &5u32.to_le_bytes());
        assert_eq!(&buf[12..20], b"None\0\0\0\0");
    }

    #[test]
    fn header_peek_rejects_misaligned_size() {
        let mut data = vec![1, 0, 0, 0];
        // size=9 (not a multiple of 4), opcode=0
        data.extend_from_slice(&(9u32 << 16).to_le_bytes());
        let cursor = Cursor::new(data.as_slice());
        let err = MessageHeader::peek(&cursor).unwrap_err();
        assert!(matches!(err, WireError::SizeNotAligned(9)));
    }

    #[test]
    fn header_peek_rejects_size_below_header() {
        let mut data = vec![1, 0, 0, 0];
        data.extend_from_slice(&(4u32 << 16).to_le_bytes());
        let cursor = Cursor::new(data.as_slice());
        let err = MessageHeader::peek(&cursor).unwrap_err();
        assert!(matches!(err, WireError::SizeTooSmall(4)));
    }

    #[test]
    fn header_peek_incomplete_on_short_buffer() {
        let data = vec![0u8; 4];
        let cursor = Cursor::new(data.as_slice());
        assert!(matches!(
            MessageHeader::peek(&cursor),
            Err(WireError::Incomplete)
        ));
    }

    #[test]
    fn round_trip_mixed_arguments() {
        let args = vec![
            ArgValue::Uint(42),
            ArgValue::Int(-7),
            ArgValue::Fixed(Fixed::from_f64(1.5)),
            ArgValue::String("hi".into()),
            ArgValue::Object(5),
        ];
        let buf = encode_message(3, 2, &args).unwrap();

        let mut cursor = Cursor::new(&buf[..]);
        let header = MessageHeader::peek(&cursor).unwrap();
        assert_eq!(header.sender, 3);
        assert_eq!(header.opcode, 2);
        cursor.set_position(MessageHeader::SIZE as u64);

        let signature = [
            ArgType::Uint,
            ArgType::Int,
            ArgType::Fixed,
            ArgType::String,
            ArgType::Object { nullable: false },
        ];
        let mut fd_queue = VecDeque::new();
        let decoded = decode_args(&mut cursor, &signature, &mut fd_queue).unwrap();
        assert_eq!(decoded[0].as_uint(), Some(42));
        assert_eq!(decoded[3].as_str(), Some("hi"));
    }

    #[test]
    fn null_object_rejected_when_not_nullable() {
        let args = vec![ArgValue::Object(0)];
        let buf = encode_message(1, 0, &args).unwrap();
        let mut cursor = Cursor::new(&buf[MessageHeader::SIZE..]);
        let signature = [ArgType::Object { nullable: false }];
        let mut fd_queue = VecDeque::new();
        let err = decode_args(&mut cursor, &signature, &mut fd_queue).unwrap_err();
        assert!(matches!(err, WireError::UnexpectedNull));
    }

    #[test]
    fn partial_read_three_chunks_yields_two_frames() {
        // Build two minimal frames back to back, then feed them to a cursor
        // in chunks of (12, 4, 12) bytes as in the spec's scenario 5.
        let frame_a = encode_message(1, 0, &[ArgValue::Uint(1)]).unwrap();
        let frame_b = encode_message(1, 0, &[ArgValue::Uint(2)]).unwrap();
        assert_eq!(frame_a.len(), 12);
        assert_eq!(frame_b.len(), 12);

        let mut stream = Vec::new();
        stream.extend_from_slice(&frame_a);
        stream.extend_from_slice(&frame_b);

        let chunks = [12usize, 4, 12];
        assert_eq!(chunks.iter().sum::<usize>(), stream.len());

        let mut available = 0;
        let mut dispatched = 0;
        let mut offset = 0;
        for &chunk in &chunks {
            available += chunk;
            while available >= MessageHeader::SIZE {
                let cursor = Cursor::new(&stream[offset..offset + available]);
                match MessageHeader::peek(&cursor) {
                    Ok(header) if header.size as usize <= available => {
                        offset += header.size as usize;
                        available -= header.size as usize;
                        dispatched += 1;
                    }
                    _ => break,
                }
            }
        }
        assert_eq!(dispatched, 2);
    }
}
