//! Compact binary encoding for fixed-arity heterogeneous field sequences.
//!
//! Layout:
//!
//! ```text
//! flags: u8        bits 0..2: offset entry width code (0 -> 1, 1 -> 2, 2 -> 4 bytes)
//!                  bit 2: null map present
//! null map         ceil(n/8) bytes when the flag is set; bit i set = field i has no payload
//! offset table     n unsigned little-endian entries, cumulative END offset of field i
//! payload area     concatenated field payloads
//! ```
//!
//! The entry width is the smallest of 1/2/4 bytes that holds the total
//! payload length. A null field has zero length *and* its null-map bit set;
//! a zero-length payload without the bit is a present, empty value (such as
//! an empty string). Field payloads are self-delimited by the offset table,
//! so new field encodings can be introduced without breaking older readers.
//!
//! Building is two-pass because the offset table precedes the payloads:
//! every field's size is claimed first, then the buffer is laid out, then
//! payloads are appended.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

const FLAG_NULL_MAP: u8 = 0b100;

fn null_map_len(element_count: usize) -> usize {
    element_count.div_ceil(8)
}

fn entry_width(total_payload: usize) -> (u8, usize) {
    if total_payload <= 0xff {
        (0, 1)
    } else if total_payload <= 0xffff {
        (1, 2)
    } else {
        (2, 4)
    }
}

enum Stage {
    Claiming,
    Appending,
}

/// Two-pass builder: claim every field size, lay out, append every payload.
pub struct BinaryTupleBuilder {
    element_count: usize,
    sizes: Vec<Option<usize>>,
    stage: Stage,
    appended: usize,
    entry_size: usize,
    offsets_at: usize,
    payload_end: usize,
    buf: BytesMut,
}

impl BinaryTupleBuilder {
    pub fn new(element_count: usize) -> BinaryTupleBuilder {
        BinaryTupleBuilder {
            element_count,
            sizes: Vec::with_capacity(element_count),
            stage: Stage::Claiming,
            appended: 0,
            entry_size: 0,
            offsets_at: 0,
            payload_end: 0,
            buf: BytesMut::new(),
        }
    }

    /// Reserve space for the next field. `None` claims a null field.
    pub fn claim(&mut self, size: Option<usize>) {
        debug_assert!(matches!(self.stage, Stage::Claiming));
        debug_assert!(self.sizes.len() < self.element_count);
        self.sizes.push(size);
    }

    /// Compute the layout from the claimed sizes and allocate the buffer.
    pub fn layout(&mut self) -> Result<()> {
        if self.sizes.len() != self.element_count {
            return Err(Error::protocol(format!(
                "claimed {} of {} tuple fields",
                self.sizes.len(),
                self.element_count
            )));
        }
        let total: usize = self.sizes.iter().map(|s| s.unwrap_or(0)).sum();
        if total > u32::MAX as usize {
            return Err(Error::protocol("tuple payload exceeds 4 GiB"));
        }
        let has_nulls = self.sizes.iter().any(Option::is_none);
        let (code, entry_size) = entry_width(total);
        self.entry_size = entry_size;

        let map_len = if has_nulls {
            null_map_len(self.element_count)
        } else {
            0
        };
        let offsets_at = 1 + map_len;
        self.offsets_at = offsets_at;
        self.buf = BytesMut::with_capacity(offsets_at + self.element_count * entry_size + total);

        let flags = code | if has_nulls { FLAG_NULL_MAP } else { 0 };
        self.buf.put_u8(flags);
        if has_nulls {
            let mut map = vec![0u8; map_len];
            for (i, size) in self.sizes.iter().enumerate() {
                if size.is_none() {
                    map[i / 8] |= 1 << (i % 8);
                }
            }
            self.buf.put_slice(&map);
        }
        // Offset table is patched as payloads arrive.
        self.buf.put_bytes(0, self.element_count * entry_size);
        self.stage = Stage::Appending;
        Ok(())
    }

    /// Emit the next field's payload. Must mirror the claim pass.
    pub fn append(&mut self, payload: Option<&[u8]>) -> Result<()> {
        debug_assert!(matches!(self.stage, Stage::Appending));
        let index = self.appended;
        if index >= self.element_count {
            return Err(Error::protocol("appended more fields than claimed"));
        }
        let claimed = self.sizes[index];
        match (claimed, payload) {
            (None, None) => {}
            (Some(size), Some(bytes)) if bytes.len() == size => {
                self.buf.put_slice(bytes);
                self.payload_end += size;
            }
            _ => {
                return Err(Error::protocol(format!(
                    "field {index} append does not match its claim"
                )));
            }
        }
        let at = self.offsets_at + index * self.entry_size;
        let end = self.payload_end as u64;
        let entry = &mut self.buf[at..at + self.entry_size];
        entry.copy_from_slice(&end.to_le_bytes()[..self.entry_size]);
        self.appended += 1;
        Ok(())
    }

    pub fn build(self) -> Result<Bytes> {
        if self.appended != self.element_count {
            return Err(Error::protocol(format!(
                "appended {} of {} tuple fields",
                self.appended, self.element_count
            )));
        }
        Ok(self.buf.freeze())
    }
}

/// One-pass bounded parser over a built tuple.
pub struct BinaryTupleParser {
    element_count: usize,
    entry_size: usize,
    index: usize,
    data: Bytes,
    offsets_at: usize,
    payload_at: usize,
}

impl BinaryTupleParser {
    pub fn new(element_count: usize, data: Bytes) -> Result<BinaryTupleParser> {
        if data.is_empty() {
            return Err(Error::protocol("binary tuple is empty"));
        }
        let flags = data[0];
        let entry_size = match flags & 0b11 {
            0 => 1,
            1 => 2,
            2 => 4,
            _ => return Err(Error::protocol("bad binary tuple entry width")),
        };
        let map_len = if flags & FLAG_NULL_MAP != 0 {
            null_map_len(element_count)
        } else {
            0
        };
        let offsets_at = 1 + map_len;
        let payload_at = offsets_at + element_count * entry_size;
        if data.len() < payload_at {
            return Err(Error::protocol(format!(
                "binary tuple too short for {element_count} fields"
            )));
        }
        Ok(BinaryTupleParser {
            element_count,
            entry_size,
            index: 0,
            data,
            offsets_at,
            payload_at,
        })
    }

    fn offset(&self, index: usize) -> usize {
        let at = self.offsets_at + index * self.entry_size;
        let mut entry = [0u8; 8];
        entry[..self.entry_size].copy_from_slice(&self.data[at..at + self.entry_size]);
        u64::from_le_bytes(entry) as usize
    }

    fn is_null(&self, index: usize) -> bool {
        if self.data[0] & FLAG_NULL_MAP == 0 {
            return false;
        }
        self.data[1 + index / 8] & (1 << (index % 8)) != 0
    }

    /// Next field's payload; `None` when the field is null.
    pub fn next_field(&mut self) -> Result<Option<Bytes>> {
        let index = self.index;
        if index >= self.element_count {
            return Err(Error::protocol(format!(
                "binary tuple has only {} fields",
                self.element_count
            )));
        }
        self.index += 1;
        let start = if index == 0 { 0 } else { self.offset(index - 1) };
        let end = self.offset(index);
        if start > end || self.payload_at + end > self.data.len() {
            return Err(Error::protocol(format!(
                "binary tuple offsets out of bounds for field {index}"
            )));
        }
        if self.is_null(index) {
            if start != end {
                return Err(Error::protocol(format!(
                    "null field {index} carries a payload"
                )));
            }
            return Ok(None);
        }
        Ok(Some(
            self.data.slice(self.payload_at + start..self.payload_at + end),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(fields: &[Option<&[u8]>]) -> Bytes {
        let mut builder = BinaryTupleBuilder::new(fields.len());
        for field in fields {
            builder.claim(field.map(<[u8]>::len));
        }
        builder.layout().unwrap();
        for field in fields {
            builder.append(*field).unwrap();
        }
        builder.build().unwrap()
    }

    fn parse(count: usize, data: Bytes) -> Vec<Option<Vec<u8>>> {
        let mut parser = BinaryTupleParser::new(count, data).unwrap();
        (0..count)
            .map(|_| parser.next_field().unwrap().map(|b| b.to_vec()))
            .collect()
    }

    #[test]
    fn fields_round_trip() {
        let fields: &[Option<&[u8]>] =
            &[Some(&[42, 0, 0, 0, 0, 0, 0, 0]), Some(b"alice"), Some(&[])];
        let data = build(fields);
        // No nulls, small payload: single header byte plus 1-byte offsets.
        assert_eq!(data[0], 0x00);
        let parsed = parse(3, data);
        assert_eq!(parsed[0].as_deref(), Some(&[42u8, 0, 0, 0, 0, 0, 0, 0][..]));
        assert_eq!(parsed[1].as_deref(), Some(&b"alice"[..]));
        assert_eq!(parsed[2].as_deref(), Some(&[][..]));
    }

    #[test]
    fn null_fields_are_distinct_from_empty_ones() {
        let fields: &[Option<&[u8]>] = &[None, Some(&[]), Some(b"x")];
        let data = build(fields);
        assert_eq!(data[0] & FLAG_NULL_MAP, FLAG_NULL_MAP);
        let parsed = parse(3, data);
        assert_eq!(parsed[0], None);
        assert_eq!(parsed[1].as_deref(), Some(&[][..]));
        assert_eq!(parsed[2].as_deref(), Some(&b"x"[..]));
    }

    #[test]
    fn empty_tuple_is_a_single_header_byte() {
        let data = build(&[]);
        assert_eq!(&data[..], &[0x00]);
        let mut parser = BinaryTupleParser::new(0, data).unwrap();
        assert!(matches!(parser.next_field(), Err(Error::Protocol(_))));
    }

    #[test]
    fn entry_width_escalates_with_payload_size() {
        let medium = vec![7u8; 300];
        let data = build(&[Some(&medium)]);
        assert_eq!(data[0] & 0b11, 1);
        let parsed = parse(1, data);
        assert_eq!(parsed[0].as_deref(), Some(&medium[..]));

        let large = vec![9u8; 70_000];
        let data = build(&[Some(&large)]);
        assert_eq!(data[0] & 0b11, 2);
        let parsed = parse(1, data);
        assert_eq!(parsed[0].as_deref(), Some(&large[..]));
    }

    #[test]
    fn claim_append_mismatch_is_rejected() {
        let mut builder = BinaryTupleBuilder::new(1);
        builder.claim(Some(3));
        builder.layout().unwrap();
        assert!(matches!(builder.append(Some(b"xx")), Err(Error::Protocol(_))));

        let mut builder = BinaryTupleBuilder::new(2);
        builder.claim(Some(1));
        assert!(matches!(builder.layout(), Err(Error::Protocol(_))));

        let mut builder = BinaryTupleBuilder::new(1);
        builder.claim(Some(1));
        builder.layout().unwrap();
        assert!(matches!(builder.build(), Err(Error::Protocol(_))));
    }

    #[test]
    fn truncated_tuples_are_protocol_errors() {
        assert!(matches!(
            BinaryTupleParser::new(1, Bytes::new()),
            Err(Error::Protocol(_))
        ));
        // Header claims one offset entry but the buffer ends before it.
        assert!(matches!(
            BinaryTupleParser::new(1, Bytes::from_static(&[0x00])),
            Err(Error::Protocol(_))
        ));
        // Offset points past the payload area.
        let mut parser =
            BinaryTupleParser::new(1, Bytes::from_static(&[0x00, 0x09, 0x01])).unwrap();
        assert!(matches!(parser.next_field(), Err(Error::Protocol(_))));
    }
}
