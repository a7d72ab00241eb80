//! Data section decoding for MaxMind DB files
//!
//! Implements the complete MaxMind DB data type specification. Every value
//! starts with a control byte: the top 3 bits hold the type number and the low
//! 5 bits hold a size (or, for pointers, a size class plus the high bits of
//! the pointer payload).
//!
//! # Supported Types
//!
//! - **Pointer** (1): Reference to another data item
//! - **String** (2): UTF-8 text data
//! - **Double** (3): 64-bit floating point (IEEE 754)
//! - **Bytes** (4): Raw byte arrays
//! - **Uint16** (5) / **Uint32** (6): Unsigned integers
//! - **Map** (7): Key-value pairs (string keys)
//! - **Int32** (8): Signed 32-bit integers
//! - **Uint64** (9) / **Uint128** (10): Wide unsigned integers
//! - **Array** (11): Ordered lists of values
//! - **Bool** (14): Boolean values
//! - **Float** (15): 32-bit floating point (IEEE 754)
//!
//! Types 8 and above are "extended": the control byte carries type 0 and the
//! following byte holds `type - 7`.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::error::{MmdbError, Result};
use crate::source::ByteSource;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::HashMap;

/// Deepest chain of nested containers and pointers the decoder follows
///
/// Well-formed databases stay far below this; hitting it means a pointer
/// cycle or a hostile file.
pub const MAX_DECODE_DEPTH: usize = 512;

/// Added to the raw payload of each pointer size class
const POINTER_BIAS: [usize; 4] = [0, 2048, 526_336, 0];

/// Upper bound on speculative container preallocation
const MAX_PREALLOC: usize = 1024;

/// A decoded value from the data section
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// Resolved pointer (only produced when pointer-test mode is enabled)
    Pointer(u64),
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only per MMDB spec)
    Map(HashMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Look up a key if this value is a map
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        match self {
            DataValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Borrow the string contents
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any unsigned integer that fits in a `u64`
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            DataValue::Uint16(n) => Some(n as u64),
            DataValue::Uint32(n) => Some(n as u64),
            DataValue::Uint64(n) => Some(n),
            DataValue::Uint128(n) => u64::try_from(n).ok(),
            _ => None,
        }
    }

    /// Either floating point type, widened to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            DataValue::Double(d) => Some(d),
            DataValue::Float(f) => Some(f as f64),
            _ => None,
        }
    }

    /// Boolean contents
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            DataValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow the map contents
    pub fn as_map(&self) -> Option<&HashMap<String, DataValue>> {
        match self {
            DataValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow the array contents
    pub fn as_array(&self) -> Option<&[DataValue]> {
        match self {
            DataValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Name of the MMDB type this value was decoded from
    pub fn type_name(&self) -> &'static str {
        match self {
            DataValue::Pointer(_) => "pointer",
            DataValue::String(_) => "utf8_string",
            DataValue::Double(_) => "double",
            DataValue::Bytes(_) => "bytes",
            DataValue::Uint16(_) => "uint16",
            DataValue::Uint32(_) => "uint32",
            DataValue::Map(_) => "map",
            DataValue::Int32(_) => "int32",
            DataValue::Uint64(_) => "uint64",
            DataValue::Uint128(_) => "uint128",
            DataValue::Array(_) => "array",
            DataValue::Bool(_) => "boolean",
            DataValue::Float(_) => "float",
        }
    }
}

// Plain data rendering: no type tags, maps and arrays as-is
impl Serialize for DataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            DataValue::Pointer(p) => serializer.serialize_u64(*p),
            DataValue::String(s) => serializer.serialize_str(s),
            DataValue::Double(d) => serializer.serialize_f64(*d),
            DataValue::Bytes(b) => {
                let mut seq = serializer.serialize_seq(Some(b.len()))?;
                for byte in b {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            DataValue::Uint16(n) => serializer.serialize_u16(*n),
            DataValue::Uint32(n) => serializer.serialize_u32(*n),
            DataValue::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            DataValue::Int32(n) => serializer.serialize_i32(*n),
            DataValue::Uint64(n) => serializer.serialize_u64(*n),
            // Beyond u64 most formats have no native integer, use decimal text
            DataValue::Uint128(n) => match u64::try_from(*n) {
                Ok(small) => serializer.serialize_u64(small),
                Err(_) => serializer.collect_str(n),
            },
            DataValue::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for item in a {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            DataValue::Bool(b) => serializer.serialize_bool(*b),
            DataValue::Float(f) => serializer.serialize_f32(*f),
        }
    }
}

/// Type numbers with a decoder. 12 (data cache) and 13 (end marker) never
/// appear in a data section and are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataType {
    Pointer,
    String,
    Double,
    Bytes,
    Uint16,
    Uint32,
    Map,
    Int32,
    Uint64,
    Uint128,
    Array,
    Bool,
    Float,
}

impl DataType {
    fn from_number(type_num: usize) -> Option<Self> {
        let data_type = match type_num {
            1 => DataType::Pointer,
            2 => DataType::String,
            3 => DataType::Double,
            4 => DataType::Bytes,
            5 => DataType::Uint16,
            6 => DataType::Uint32,
            7 => DataType::Map,
            8 => DataType::Int32,
            9 => DataType::Uint64,
            10 => DataType::Uint128,
            11 => DataType::Array,
            14 => DataType::Bool,
            15 => DataType::Float,
            _ => return None,
        };
        Some(data_type)
    }
}

/// Data section decoder
///
/// Decodes the value at any absolute offset of a [`ByteSource`], following
/// pointers recursively. Pointers are resolved as `payload + bias +
/// pointer_base`, where `pointer_base` is the offset the pointed-to section
/// starts at (the data section for records, the metadata start for metadata).
///
/// The decoder holds no mutable state, so one instance can serve any number
/// of concurrent lookups.
pub struct DataDecoder<'a> {
    source: &'a dyn ByteSource,
    pointer_base: usize,
    pointer_test: bool,
}

impl<'a> DataDecoder<'a> {
    /// Create a decoder
    ///
    /// # Arguments
    /// * `source` - The database bytes
    /// * `pointer_base` - Offset added to every pointer payload
    pub fn new(source: &'a dyn ByteSource, pointer_base: usize) -> Self {
        Self {
            source,
            pointer_base,
            pointer_test: false,
        }
    }

    /// Return pointers as [`DataValue::Pointer`] instead of following them
    #[doc(hidden)]
    pub fn with_pointer_test(mut self, enabled: bool) -> Self {
        self.pointer_test = enabled;
        self
    }

    /// Offset added to every pointer payload
    pub fn pointer_base(&self) -> usize {
        self.pointer_base
    }

    /// Decode the value at `offset`
    ///
    /// Returns the value and the offset just past it. When the value is a
    /// pointer, the returned offset is the one after the pointer itself, not
    /// after the pointed-to value.
    pub fn decode(&self, offset: usize) -> Result<(DataValue, usize)> {
        self.decode_at(offset, 0)
    }

    fn decode_at(&self, offset: usize, depth: usize) -> Result<(DataValue, usize)> {
        if depth > MAX_DECODE_DEPTH {
            return Err(MmdbError::InvalidDatabase(format!(
                "Exceeded maximum data structure depth ({}); the data section may contain a pointer cycle",
                MAX_DECODE_DEPTH
            )));
        }

        let ctrl = self.source.read_byte(offset)?;
        let mut cursor = offset + 1;

        let mut type_num = (ctrl >> 5) as usize;
        if type_num == 0 {
            type_num = self.source.read_byte(cursor)? as usize + 7;
            cursor += 1;
            if type_num < 8 {
                return Err(MmdbError::InvalidDatabase(format!(
                    "Something went horribly wrong in the decoder. An extended type resolved to a type number < 8 ({})",
                    type_num
                )));
            }
        }

        let data_type = DataType::from_number(type_num).ok_or_else(MmdbError::bad_data)?;
        let (size, cursor) = self.size_from_ctrl(ctrl, cursor, data_type)?;

        match data_type {
            DataType::Pointer => self.decode_pointer(size, cursor, depth),
            DataType::String => self.decode_string(size, cursor),
            DataType::Double => self.decode_double(size, cursor),
            DataType::Bytes => self.decode_bytes(size, cursor),
            DataType::Uint16 => {
                let buf = self.read_padded::<2>(size, cursor)?;
                Ok((DataValue::Uint16(u16::from_be_bytes(buf)), cursor + size))
            }
            DataType::Uint32 => {
                let buf = self.read_padded::<4>(size, cursor)?;
                Ok((DataValue::Uint32(u32::from_be_bytes(buf)), cursor + size))
            }
            DataType::Map => self.decode_map(size, cursor, depth),
            DataType::Int32 => {
                let buf = self.read_padded::<4>(size, cursor)?;
                Ok((DataValue::Int32(i32::from_be_bytes(buf)), cursor + size))
            }
            DataType::Uint64 => {
                let buf = self.read_padded::<8>(size, cursor)?;
                Ok((DataValue::Uint64(u64::from_be_bytes(buf)), cursor + size))
            }
            DataType::Uint128 => self.decode_uint128(size, cursor),
            DataType::Array => self.decode_array(size, cursor, depth),
            DataType::Bool => Ok((DataValue::Bool(size != 0), cursor)),
            DataType::Float => self.decode_float(size, cursor),
        }
    }

    /// Resolve the size prefix of a control byte
    ///
    /// Pointers reuse these 5 bits for their own encoding, so they are
    /// returned untouched.
    fn size_from_ctrl(
        &self,
        ctrl: u8,
        offset: usize,
        data_type: DataType,
    ) -> Result<(usize, usize)> {
        let size = (ctrl & 0x1f) as usize;
        if data_type == DataType::Pointer || size < 29 {
            return Ok((size, offset));
        }

        match size {
            29 => {
                let b0 = self.source.read_byte(offset)? as usize;
                Ok((29 + b0, offset + 1))
            }
            30 => {
                let buf = self.source.read(offset, 2)?;
                let n = ((buf[0] as usize) << 8) | buf[1] as usize;
                Ok((285 + n, offset + 2))
            }
            _ => {
                let buf = self.source.read(offset, 3)?;
                let n = ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | buf[2] as usize;
                Ok((65_821 + n, offset + 3))
            }
        }
    }

    /// Type 1: bits 3-4 of the size field pick the payload length (1-4
    /// bytes); for the three shorter classes the low 3 bits are the most
    /// significant bits of the pointer.
    fn decode_pointer(&self, size: usize, offset: usize, depth: usize) -> Result<(DataValue, usize)> {
        let class = (size >> 3) & 0x3;
        let payload_len = class + 1;
        let buf = self.source.read(offset, payload_len)?;

        let mut pointer = if class == 3 { 0 } else { size & 0x7 };
        for &b in buf.iter() {
            pointer = (pointer << 8) | b as usize;
        }
        let pointer = pointer + POINTER_BIAS[class] + self.pointer_base;
        let next = offset + payload_len;

        if self.pointer_test {
            return Ok((DataValue::Pointer(pointer as u64), next));
        }

        let (value, _) = self.decode_at(pointer, depth + 1)?;
        Ok((value, next))
    }

    fn decode_string(&self, size: usize, offset: usize) -> Result<(DataValue, usize)> {
        let buf = self.source.read(offset, size)?;
        let s = String::from_utf8_lossy(&buf).into_owned();
        Ok((DataValue::String(s), offset + size))
    }

    fn decode_double(&self, size: usize, offset: usize) -> Result<(DataValue, usize)> {
        if size != 8 {
            return Err(MmdbError::bad_data());
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.source.read(offset, 8)?);
        Ok((DataValue::Double(f64::from_be_bytes(bytes)), offset + 8))
    }

    fn decode_float(&self, size: usize, offset: usize) -> Result<(DataValue, usize)> {
        if size != 4 {
            return Err(MmdbError::bad_data());
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.source.read(offset, 4)?);
        Ok((DataValue::Float(f32::from_be_bytes(bytes)), offset + 4))
    }

    fn decode_bytes(&self, size: usize, offset: usize) -> Result<(DataValue, usize)> {
        let buf = self.source.read(offset, size)?;
        Ok((DataValue::Bytes(buf.into_owned()), offset + size))
    }

    /// Widths of 9..=16 bytes split into a high part (first `size - 8`
    /// bytes) and a low 64-bit part.
    fn decode_uint128(&self, size: usize, offset: usize) -> Result<(DataValue, usize)> {
        if size <= 8 {
            let low = u64::from_be_bytes(self.read_padded::<8>(size, offset)?);
            return Ok((DataValue::Uint128(low as u128), offset + size));
        }
        if size > 16 {
            return Err(MmdbError::bad_data());
        }

        let buf = self.source.read(offset, size)?;
        let (high_bytes, low_bytes) = buf.split_at(size - 8);
        let mut high = [0u8; 8];
        high[8 - high_bytes.len()..].copy_from_slice(high_bytes);
        let mut low = [0u8; 8];
        low.copy_from_slice(low_bytes);

        let value = ((u64::from_be_bytes(high) as u128) << 64) | u64::from_be_bytes(low) as u128;
        Ok((DataValue::Uint128(value), offset + size))
    }

    fn decode_map(&self, size: usize, offset: usize, depth: usize) -> Result<(DataValue, usize)> {
        let mut map = HashMap::with_capacity(size.min(MAX_PREALLOC));
        let mut cursor = offset;

        for _ in 0..size {
            let (key, next) = self.decode_at(cursor, depth + 1)?;
            let key = match key {
                DataValue::String(s) => s,
                other => {
                    return Err(MmdbError::InvalidDatabase(format!(
                        "Map key must be a string, found {}",
                        other.type_name()
                    )))
                }
            };
            let (value, next) = self.decode_at(next, depth + 1)?;
            map.insert(key, value);
            cursor = next;
        }

        Ok((DataValue::Map(map), cursor))
    }

    fn decode_array(&self, size: usize, offset: usize, depth: usize) -> Result<(DataValue, usize)> {
        let mut array = Vec::with_capacity(size.min(MAX_PREALLOC));
        let mut cursor = offset;

        for _ in 0..size {
            let (value, next) = self.decode_at(cursor, depth + 1)?;
            array.push(value);
            cursor = next;
        }

        Ok((DataValue::Array(array), cursor))
    }

    /// Read `size` bytes right-aligned into a zeroed `N`-byte buffer
    fn read_padded<const N: usize>(&self, size: usize, offset: usize) -> Result<[u8; N]> {
        if size > N {
            return Err(MmdbError::bad_data());
        }
        let mut buf = [0u8; N];
        if size > 0 {
            let bytes = self.source.read(offset, size)?;
            buf[N - size..].copy_from_slice(&bytes);
        }
        Ok(buf)
    }
}
