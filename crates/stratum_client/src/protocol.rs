//! Wire primitives: a MessagePack subset writer/reader and operation codes.
//!
//! The Stratum wire protocol uses a restricted MessagePack vocabulary: nil,
//! bool, the int family, str, bin, map, array, and `fixext16` with extension
//! type 1 for UUIDs. The writer always emits the minimal signed int encoding;
//! the reader accepts any int encoding, including the uint family.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Extension type id carried by `fixext16` UUID values.
const UUID_EXT_TYPE: i8 = 1;

/// RPC operation codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    SchemasGet,
    TableGet,
    TablesGet,
    TupleGet,
    TupleGetAll,
    TupleUpsert,
    TupleUpsertAll,
    TupleGetAndUpsert,
    TupleInsert,
    TupleInsertAll,
    TupleReplace,
    TupleReplaceExact,
    TupleGetAndReplace,
    TupleDelete,
    TupleDeleteExact,
    TupleGetAndDelete,
    TupleDeleteAll,
    TupleDeleteAllExact,
}

impl Operation {
    pub fn code(self) -> i32 {
        match self {
            Operation::SchemasGet => 1,
            Operation::TableGet => 2,
            Operation::TablesGet => 3,
            Operation::TupleGet => 10,
            Operation::TupleGetAll => 11,
            Operation::TupleUpsert => 12,
            Operation::TupleUpsertAll => 13,
            Operation::TupleGetAndUpsert => 14,
            Operation::TupleInsert => 15,
            Operation::TupleInsertAll => 16,
            Operation::TupleReplace => 17,
            Operation::TupleReplaceExact => 18,
            Operation::TupleGetAndReplace => 19,
            Operation::TupleDelete => 20,
            Operation::TupleDeleteExact => 21,
            Operation::TupleGetAndDelete => 22,
            Operation::TupleDeleteAll => 23,
            Operation::TupleDeleteAllExact => 24,
        }
    }

    pub fn from_code(code: i32) -> Option<Operation> {
        let op = match code {
            1 => Operation::SchemasGet,
            2 => Operation::TableGet,
            3 => Operation::TablesGet,
            10 => Operation::TupleGet,
            11 => Operation::TupleGetAll,
            12 => Operation::TupleUpsert,
            13 => Operation::TupleUpsertAll,
            14 => Operation::TupleGetAndUpsert,
            15 => Operation::TupleInsert,
            16 => Operation::TupleInsertAll,
            17 => Operation::TupleReplace,
            18 => Operation::TupleReplaceExact,
            19 => Operation::TupleGetAndReplace,
            20 => Operation::TupleDelete,
            21 => Operation::TupleDeleteExact,
            22 => Operation::TupleGetAndDelete,
            23 => Operation::TupleDeleteAll,
            24 => Operation::TupleDeleteAllExact,
            _ => return None,
        };
        Some(op)
    }
}

/// MessagePack writer over a growable buffer.
#[derive(Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Writer {
        Writer {
            buf: BytesMut::new(),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    /// Append raw bytes with no MessagePack framing.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_nil(&mut self) {
        self.buf.put_u8(0xc0);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(if value { 0xc3 } else { 0xc2 });
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_i64(i64::from(value));
    }

    /// Minimal signed int encoding.
    pub fn write_i64(&mut self, value: i64) {
        if (0..=127).contains(&value) {
            self.buf.put_u8(value as u8);
        } else if (-32..0).contains(&value) {
            self.buf.put_u8(value as i8 as u8);
        } else if let Ok(v) = i8::try_from(value) {
            self.buf.put_u8(0xd0);
            self.buf.put_i8(v);
        } else if let Ok(v) = i16::try_from(value) {
            self.buf.put_u8(0xd1);
            self.buf.put_i16(v);
        } else if let Ok(v) = i32::try_from(value) {
            self.buf.put_u8(0xd2);
            self.buf.put_i32(v);
        } else {
            self.buf.put_u8(0xd3);
            self.buf.put_i64(value);
        }
    }

    pub fn write_str(&mut self, value: &str) {
        let len = value.len();
        if len < 32 {
            self.buf.put_u8(0xa0 | len as u8);
        } else if len <= 0xff {
            self.buf.put_u8(0xd9);
            self.buf.put_u8(len as u8);
        } else if len <= 0xffff {
            self.buf.put_u8(0xda);
            self.buf.put_u16(len as u16);
        } else {
            self.buf.put_u8(0xdb);
            self.buf.put_u32(len as u32);
        }
        self.buf.put_slice(value.as_bytes());
    }

    pub fn write_binary(&mut self, value: &[u8]) {
        let len = value.len();
        if len <= 0xff {
            self.buf.put_u8(0xc4);
            self.buf.put_u8(len as u8);
        } else if len <= 0xffff {
            self.buf.put_u8(0xc5);
            self.buf.put_u16(len as u16);
        } else {
            self.buf.put_u8(0xc6);
            self.buf.put_u32(len as u32);
        }
        self.buf.put_slice(value);
    }

    /// The no-value bitset travels as an ordinary sized bin blob.
    pub fn write_bitset(&mut self, bits: &[u8]) {
        self.write_binary(bits);
    }

    /// UUIDs travel as `fixext16` with extension type 1, big-endian bytes.
    pub fn write_uuid(&mut self, value: Uuid) {
        self.buf.put_u8(0xd8);
        self.buf.put_i8(UUID_EXT_TYPE);
        self.buf.put_slice(value.as_bytes());
    }

    pub fn write_map_len(&mut self, len: usize) {
        if len < 16 {
            self.buf.put_u8(0x80 | len as u8);
        } else if len <= 0xffff {
            self.buf.put_u8(0xde);
            self.buf.put_u16(len as u16);
        } else {
            self.buf.put_u8(0xdf);
            self.buf.put_u32(len as u32);
        }
    }

    pub fn write_array_len(&mut self, len: usize) {
        if len < 16 {
            self.buf.put_u8(0x90 | len as u8);
        } else if len <= 0xffff {
            self.buf.put_u8(0xdc);
            self.buf.put_u16(len as u16);
        } else {
            self.buf.put_u8(0xdd);
            self.buf.put_u32(len as u32);
        }
    }
}

/// MessagePack reader over an owned byte buffer.
///
/// Slices handed out by [`read_binary`](Reader::read_binary) and
/// [`into_remaining`](Reader::into_remaining) share the underlying buffer
/// without copying.
pub struct Reader {
    buf: Bytes,
}

impl Reader {
    pub fn new(buf: Bytes) -> Reader {
        Reader { buf }
    }

    /// Bytes not yet consumed.
    pub fn into_remaining(self) -> Bytes {
        self.buf
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::protocol(format!(
                "short read: need {n} more bytes for {what}"
            )));
        }
        Ok(())
    }

    fn tag(&mut self, what: &str) -> Result<u8> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    /// Copy raw bytes with no MessagePack framing.
    pub fn read_raw(&mut self, out: &mut [u8]) -> Result<()> {
        self.need(out.len(), "raw bytes")?;
        self.buf.copy_to_slice(out);
        Ok(())
    }

    /// Consume a nil if one is next; leave anything else untouched.
    pub fn try_read_nil(&mut self) -> Result<bool> {
        self.need(1, "value")?;
        if self.buf.chunk()[0] == 0xc0 {
            self.buf.advance(1);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.tag("bool")? {
            0xc2 => Ok(false),
            0xc3 => Ok(true),
            tag => Err(Error::protocol(format!("expected bool, got tag {tag:#04x}"))),
        }
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let tag = self.tag("int")?;
        match tag {
            0x00..=0x7f => Ok(i64::from(tag)),
            0xe0..=0xff => Ok(i64::from(tag as i8)),
            0xcc => {
                self.need(1, "uint8")?;
                Ok(i64::from(self.buf.get_u8()))
            }
            0xcd => {
                self.need(2, "uint16")?;
                Ok(i64::from(self.buf.get_u16()))
            }
            0xce => {
                self.need(4, "uint32")?;
                Ok(i64::from(self.buf.get_u32()))
            }
            0xcf => {
                self.need(8, "uint64")?;
                let v = self.buf.get_u64();
                i64::try_from(v)
                    .map_err(|_| Error::protocol(format!("uint64 {v} exceeds int64 range")))
            }
            0xd0 => {
                self.need(1, "int8")?;
                Ok(i64::from(self.buf.get_i8()))
            }
            0xd1 => {
                self.need(2, "int16")?;
                Ok(i64::from(self.buf.get_i16()))
            }
            0xd2 => {
                self.need(4, "int32")?;
                Ok(i64::from(self.buf.get_i32()))
            }
            0xd3 => {
                self.need(8, "int64")?;
                Ok(self.buf.get_i64())
            }
            tag => Err(Error::protocol(format!("expected int, got tag {tag:#04x}"))),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let v = self.read_i64()?;
        i32::try_from(v).map_err(|_| Error::protocol(format!("int {v} exceeds int32 range")))
    }

    pub fn read_str(&mut self) -> Result<String> {
        let tag = self.tag("str")?;
        let len = match tag {
            0xa0..=0xbf => usize::from(tag & 0x1f),
            0xd9 => {
                self.need(1, "str8 length")?;
                usize::from(self.buf.get_u8())
            }
            0xda => {
                self.need(2, "str16 length")?;
                usize::from(self.buf.get_u16())
            }
            0xdb => {
                self.need(4, "str32 length")?;
                self.buf.get_u32() as usize
            }
            tag => return Err(Error::protocol(format!("expected str, got tag {tag:#04x}"))),
        };
        self.need(len, "str payload")?;
        let bytes = self.buf.copy_to_bytes(len);
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::protocol("str payload is not valid UTF-8"))
    }

    pub fn read_binary(&mut self) -> Result<Bytes> {
        let tag = self.tag("bin")?;
        let len = match tag {
            0xc4 => {
                self.need(1, "bin8 length")?;
                usize::from(self.buf.get_u8())
            }
            0xc5 => {
                self.need(2, "bin16 length")?;
                usize::from(self.buf.get_u16())
            }
            0xc6 => {
                self.need(4, "bin32 length")?;
                self.buf.get_u32() as usize
            }
            tag => return Err(Error::protocol(format!("expected bin, got tag {tag:#04x}"))),
        };
        self.need(len, "bin payload")?;
        Ok(self.buf.copy_to_bytes(len))
    }

    pub fn read_uuid(&mut self) -> Result<Uuid> {
        let tag = self.tag("uuid")?;
        if tag != 0xd8 {
            return Err(Error::protocol(format!(
                "expected fixext16 uuid, got tag {tag:#04x}"
            )));
        }
        self.need(17, "uuid payload")?;
        let ext_type = self.buf.get_i8();
        if ext_type != UUID_EXT_TYPE {
            return Err(Error::protocol(format!(
                "unexpected extension type {ext_type} for uuid"
            )));
        }
        let mut bytes = [0u8; 16];
        self.buf.copy_to_slice(&mut bytes);
        Ok(Uuid::from_bytes(bytes))
    }

    pub fn read_map_len(&mut self) -> Result<usize> {
        let tag = self.tag("map")?;
        match tag {
            0x80..=0x8f => Ok(usize::from(tag & 0x0f)),
            0xde => {
                self.need(2, "map16 length")?;
                Ok(usize::from(self.buf.get_u16()))
            }
            0xdf => {
                self.need(4, "map32 length")?;
                Ok(self.buf.get_u32() as usize)
            }
            tag => Err(Error::protocol(format!("expected map, got tag {tag:#04x}"))),
        }
    }

    pub fn read_array_len(&mut self) -> Result<usize> {
        let tag = self.tag("array")?;
        match tag {
            0x90..=0x9f => Ok(usize::from(tag & 0x0f)),
            0xdc => {
                self.need(2, "array16 length")?;
                Ok(usize::from(self.buf.get_u16()))
            }
            0xdd => {
                self.need(4, "array32 length")?;
                Ok(self.buf.get_u32() as usize)
            }
            tag => Err(Error::protocol(format!(
                "expected array, got tag {tag:#04x}"
            ))),
        }
    }
}
