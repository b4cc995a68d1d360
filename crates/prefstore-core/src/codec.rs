//! Encoding and decoding of values and full snapshots
//!
//! Pure functions over byte buffers, no I/O. The file layout is described
//! in [`crate::format`]. Every read is bounds-checked: a length that runs
//! past the end of the buffer is reported as [`CodecError::Truncated`],
//! an unknown type byte as [`CodecError::UnknownType`].

use std::collections::BTreeSet;

use crate::error::CodecError;
use crate::format::{FileHeader, HEADER_SIZE, MAX_WIRE_STRING, MIN_ENTRY_SIZE, TRAILER_SIZE};
use crate::key::Key;
use crate::value::{Value, ValueType};

/// Ordered key-value pairs as they appear in a file.
pub type Snapshot = Vec<(Key, Value)>;

/// Encode a full snapshot: header, entry count, entries, CRC32C trailer.
///
/// With `key_hashes` set, each key's cached hash is written after its bytes
/// so the next load can skip rehashing.
pub fn encode<'a, I>(entries: I, key_hashes: bool) -> Result<Vec<u8>, CodecError>
where
    I: IntoIterator<Item = (&'a Key, &'a Value)>,
    I::IntoIter: ExactSizeIterator,
{
    let entries = entries.into_iter();
    let count = checked_count(entries.len(), "entry count")?;

    let header = FileHeader::new(key_hashes);
    let mut buf = Vec::with_capacity(HEADER_SIZE + 4 + entries.len() * 16);
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(&count.to_be_bytes());

    for (key, value) in entries {
        write_bytes(&mut buf, key.as_bytes(), "key")?;
        if key_hashes {
            buf.extend_from_slice(&key.hash_code().to_be_bytes());
        }
        write_value(&mut buf, value)?;
    }

    let checksum = crc32c::crc32c(&buf);
    buf.extend_from_slice(&checksum.to_be_bytes());
    Ok(buf)
}

/// Decode a full snapshot, preserving on-disk entry order.
pub fn decode(data: &[u8]) -> Result<Snapshot, CodecError> {
    let header = FileHeader::parse(data)?;
    let mut reader = Reader::at(data, HEADER_SIZE);

    let count = reader.count("entry count")?;
    // Never trust the declared count for allocation
    let mut entries = Vec::with_capacity(count.min(reader.remaining() / MIN_ENTRY_SIZE));

    for _ in 0..count {
        let key_len = reader.u16()? as usize;
        let key_offset = reader.pos;
        let key_bytes = reader.take(key_len)?;
        if let Err(e) = std::str::from_utf8(key_bytes) {
            return Err(CodecError::Malformed {
                offset: key_offset,
                reason: format!("invalid UTF-8 in key: {}", e),
            });
        }
        let key_bytes = key_bytes.to_vec();
        let key = if header.has_key_hashes() {
            let hash = reader.i32()?;
            Key::from_parts(hash, key_bytes)
        } else {
            Key::from_bytes(key_bytes)
        };
        let value = reader.value()?;
        entries.push((key, value));
    }

    let body_end = reader.pos;
    let expected = reader.u32()?;
    if reader.remaining() != 0 {
        return Err(CodecError::Malformed {
            offset: reader.pos,
            reason: format!("{} unexpected bytes after trailer", reader.remaining()),
        });
    }

    let actual = crc32c::crc32c(&data[..body_end]);
    if actual != expected {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }

    Ok(entries)
}

/// Bytes of an encoded snapshot outside its entries: header, entry count, trailer.
pub const SNAPSHOT_OVERHEAD: u64 = (HEADER_SIZE + 4 + TRAILER_SIZE) as u64;

/// Exact encoded size of one entry, matching what [`encode`] writes.
pub fn encoded_entry_len(key: &[u8], value: &Value, key_hashes: bool) -> u64 {
    let hash = if key_hashes { 4 } else { 0 };
    let payload = match value {
        Value::String(s) => 2 + s.len() as u64,
        Value::StringSet(set) => 4 + set.iter().map(|s| 2 + s.len() as u64).sum::<u64>(),
        Value::Int(_) | Value::Float(_) => 4,
        Value::Bool(_) => 1,
        Value::Long(_) => 8,
    };
    2 + key.len() as u64 + hash + 1 + payload
}

/// Encode one value as type tag + payload.
pub fn encode_value(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    write_value(&mut buf, value)?;
    Ok(buf)
}

/// Decode one value (type tag + payload). Returns the value and the bytes consumed.
pub fn decode_value(data: &[u8]) -> Result<(Value, usize), CodecError> {
    let mut reader = Reader::at(data, 0);
    let value = reader.value()?;
    Ok((value, reader.pos))
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), CodecError> {
    buf.push(value.value_type().tag());
    match value {
        Value::String(s) => write_bytes(buf, s.as_bytes(), "string")?,
        Value::StringSet(set) => {
            let count = checked_count(set.len(), "string set")?;
            buf.extend_from_slice(&count.to_be_bytes());
            for s in set {
                write_bytes(buf, s.as_bytes(), "string")?;
            }
        }
        Value::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Bool(v) => buf.push(u8::from(*v)),
        Value::Long(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Value::Float(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
    }
    Ok(())
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8], component: &'static str) -> Result<(), CodecError> {
    if bytes.len() > MAX_WIRE_STRING {
        return Err(CodecError::Oversized {
            component,
            size: bytes.len(),
            max: MAX_WIRE_STRING,
        });
    }
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn checked_count(len: usize, component: &'static str) -> Result<i32, CodecError> {
    i32::try_from(len).map_err(|_| CodecError::Oversized {
        component,
        size: len,
        max: i32::MAX as usize,
    })
}

/// Bounds-checked cursor over an input buffer.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    /// A signed 32-bit count; negative values are malformed.
    fn count(&mut self, what: &str) -> Result<usize, CodecError> {
        let offset = self.pos;
        let raw = self.i32()?;
        usize::try_from(raw).map_err(|_| CodecError::Malformed {
            offset,
            reason: format!("negative {}: {}", what, raw),
        })
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let len = self.u16()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::Malformed {
            offset,
            reason: format!("invalid UTF-8 in string: {}", e),
        })
    }

    fn value(&mut self) -> Result<Value, CodecError> {
        let tag_offset = self.pos;
        let tag = self.u8()?;
        let value_type = ValueType::from_tag(tag).ok_or(CodecError::UnknownType {
            tag,
            offset: tag_offset,
        })?;

        let value = match value_type {
            ValueType::String => Value::String(self.string()?),
            ValueType::StringSet => {
                let count = self.count("string set length")?;
                let mut set = BTreeSet::new();
                for _ in 0..count {
                    set.insert(self.string()?);
                }
                Value::StringSet(set)
            }
            ValueType::Int => Value::Int(self.i32()?),
            ValueType::Bool => {
                let offset = self.pos;
                match self.u8()? {
                    0 => Value::Bool(false),
                    1 => Value::Bool(true),
                    other => {
                        return Err(CodecError::Malformed {
                            offset,
                            reason: format!("invalid bool byte {}", other),
                        })
                    }
                }
            }
            ValueType::Long => Value::Long(self.i64()?),
            ValueType::Float => Value::Float(f32::from_bits(self.u32()?)),
        };
        Ok(value)
    }
}
