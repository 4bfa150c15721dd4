//! Parameter records and their typed views.
//!
//! A parameter is a named, typed array stored in Fortran order: the first
//! dimension varies fastest. Character arrays store the string width as
//! their first dimension, so `LABELS` with 24 four-character labels has
//! dimensions `[4, 24]`.

use std::borrow::Cow;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Serialize, Serializer};

use crate::error::{C3dError, CorruptionError};

/// Longest name a record can carry: the name length is a signed byte.
pub const MAX_NAME_LEN: usize = 127;
/// Dimensions are stored as unsigned bytes.
pub const MAX_DIMENSION: usize = u8::MAX as usize;
/// Description lengths are stored as unsigned bytes.
pub const MAX_DESC_LEN: usize = u8::MAX as usize;

/// Element type of a parameter payload, as encoded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataType {
    /// `-1`: one byte per character.
    Char,
    /// `1`: one byte, read as signed or unsigned by the accessor.
    Byte,
    /// `2`: 16-bit word, signed or unsigned by the accessor.
    Int16,
    /// `4`: IEEE single-precision float.
    Float32,
}

impl DataType {
    pub fn from_code(code: i8) -> Result<Self, CorruptionError> {
        match code {
            -1 => Ok(DataType::Char),
            1  => Ok(DataType::Byte),
            2  => Ok(DataType::Int16),
            4  => Ok(DataType::Float32),
            other => Err(CorruptionError::UnsupportedType(other)),
        }
    }

    pub fn code(self) -> i8 {
        match self {
            DataType::Char    => -1,
            DataType::Byte    => 1,
            DataType::Int16   => 2,
            DataType::Float32 => 4,
        }
    }

    /// Bytes per element.
    pub fn width(self) -> usize {
        self.code().unsigned_abs() as usize
    }
}

/// Decode bytes as UTF-8, falling back to Latin-1 so that no input fails.
pub fn decode_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s)  => s.to_owned(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// On-disk form of a name or description; [`decode_string`] maps it back to
/// `s`. Latin-1 when every character fits a byte and the result cannot be
/// mistaken for UTF-8, so text decoded from a Latin-1 file keeps its length.
pub fn encode_string(s: &str) -> Cow<'_, [u8]> {
    if s.is_ascii() || s.chars().any(|c| u32::from(c) > 0xff) {
        return Cow::Borrowed(s.as_bytes());
    }
    let latin: Vec<u8> = s.chars().map(|c| u32::from(c) as u8).collect();
    if std::str::from_utf8(&latin).is_ok() {
        Cow::Borrowed(s.as_bytes())
    } else {
        Cow::Owned(latin)
    }
}

fn serialize_hex<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(data))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name:       String,
    pub desc:       String,
    pub data_type:  DataType,
    /// Fortran order; empty for a scalar.
    pub dimensions: Vec<usize>,
    #[serde(serialize_with = "serialize_hex")]
    pub data:       Vec<u8>,
    pub locked:     bool,
}

impl Parameter {
    /// Build a parameter from a decoded record, enforcing that the payload
    /// length matches the declared dimensions exactly.
    pub fn from_raw(
        name:       String,
        desc:       String,
        data_type:  DataType,
        dimensions: Vec<usize>,
        data:       Vec<u8>,
        locked:     bool,
    ) -> Result<Self, CorruptionError> {
        let expected = element_count(&dimensions).saturating_mul(data_type.width());
        if data.len() != expected {
            return Err(CorruptionError::PayloadMismatch { name, expected, actual: data.len() });
        }
        Ok(Self { name, desc, data_type, dimensions, data, locked })
    }

    /// Build a parameter from typed values; the dimension list comes from
    /// the value's shape.
    pub fn from_value(name: &str, desc: &str, value: ParamValue) -> Result<Self, C3dError> {
        let name = normalize_name(name)?;
        let (data_type, dimensions, data) = value.into_parts()?;
        Ok(Self { name, desc: desc.to_owned(), data_type, dimensions, data, locked: false })
    }

    /// Product of the dimensions; 1 for a scalar.
    pub fn num_elements(&self) -> usize {
        element_count(&self.dimensions)
    }

    pub fn total_bytes(&self) -> usize {
        self.data.len()
    }

    /// Size of the encoded record, including name and description.
    pub fn binary_size(&self) -> usize {
        1 + 1 + encode_string(&self.name).len()   // name length, group id, name
            + 2                                   // offset to next record
            + 1 + 1 + self.dimensions.len()
            + self.data.len()
            + 1 + encode_string(&self.desc).len()
    }

    /// Check that the record can be encoded as it stands. Fields are public,
    /// so edits made through [`get_mut`](crate::Dictionary::get_mut) are
    /// only caught here.
    pub fn validate(&self) -> Result<(), C3dError> {
        let shape_error = |msg: String| Err(C3dError::Shape(format!("parameter {}: {msg}", self.name)));
        let name = encode_string(&self.name);
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return shape_error(format!("name is {} bytes, must be 1..={MAX_NAME_LEN}", name.len()));
        }
        let desc = encode_string(&self.desc).len();
        if desc > MAX_DESC_LEN {
            return shape_error(format!("description is {desc} bytes, at most {MAX_DESC_LEN} fit"));
        }
        if self.dimensions.len() > MAX_DIMENSION {
            return shape_error(format!("{} dimensions, at most {MAX_DIMENSION}", self.dimensions.len()));
        }
        if let Some(d) = self.dimensions.iter().find(|&&d| d > MAX_DIMENSION) {
            return shape_error(format!("dimension {d} exceeds {MAX_DIMENSION}"));
        }
        let expected = self.num_elements().saturating_mul(self.data_type.width());
        if self.data.len() != expected {
            return shape_error(format!("{} payload bytes, dimensions require {expected}", self.data.len()));
        }
        if self.binary_size() - 2 - name.len() > i16::MAX as usize {
            return shape_error(format!("record of {} bytes is too long to address", self.binary_size()));
        }
        Ok(())
    }

    // ── Scalar views ─────────────────────────────────────────────────────────

    pub fn as_i8(&self) -> Option<i8> {
        self.data.first().map(|&b| b as i8)
    }

    pub fn as_u8(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub fn as_i16(&self) -> Option<i16> {
        self.data.get(..2).map(LittleEndian::read_i16)
    }

    pub fn as_u16(&self) -> Option<u16> {
        self.data.get(..2).map(LittleEndian::read_u16)
    }

    /// Four bytes read as one integer; frame counters are stored as two
    /// 16-bit words, low word first.
    pub fn as_i32(&self) -> Option<i32> {
        self.data.get(..4).map(LittleEndian::read_i32)
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.data.get(..4).map(LittleEndian::read_u32)
    }

    /// Only defined for float parameters.
    pub fn as_f32(&self) -> Option<f32> {
        match self.data_type {
            DataType::Float32 => self.data.get(..4).map(LittleEndian::read_f32),
            _ => None,
        }
    }

    /// Whole payload as one string.
    pub fn as_string(&self) -> String {
        decode_string(&self.data)
    }

    /// An unsigned count stored in whatever type the producer chose. Floats
    /// holding a whole number are converted; other float bit patterns are
    /// read as `u32`.
    pub fn any_uint(&self) -> Option<u32> {
        match self.data_type {
            DataType::Float32 => {
                let v = self.as_f32()?;
                if v.fract() == 0.0 && v >= 0.0 && v <= u32::MAX as f32 {
                    Some(v as u32)
                } else {
                    self.as_u32()
                }
            }
            DataType::Int16 => self.as_u16().map(u32::from),
            DataType::Byte | DataType::Char => self.as_u8().map(u32::from),
        }
    }

    // ── Array views (flattened, file order) ──────────────────────────────────

    pub fn i8_array(&self) -> Vec<i8> {
        self.data.iter().map(|&b| b as i8).collect()
    }

    pub fn u8_array(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn i16_array(&self) -> Vec<i16> {
        self.data.chunks_exact(2).map(LittleEndian::read_i16).collect()
    }

    pub fn u16_array(&self) -> Vec<u16> {
        self.data.chunks_exact(2).map(LittleEndian::read_u16).collect()
    }

    /// Empty unless the parameter holds floats.
    pub fn f32_array(&self) -> Vec<f32> {
        match self.data_type {
            DataType::Float32 => self.data.chunks_exact(4).map(LittleEndian::read_f32).collect(),
            _ => Vec::new(),
        }
    }

    /// Character array split into strings of `dimensions[0]` bytes, with
    /// trailing padding removed. A one-dimensional array is a single string.
    pub fn string_array(&self) -> Vec<String> {
        match self.dimensions.as_slice() {
            [] => Vec::new(),
            [_] => vec![self.as_string().trim_end_matches(is_padding).to_owned()],
            [width, ..] => {
                if *width == 0 {
                    return Vec::new();
                }
                self.data
                    .chunks(*width)
                    .map(|chunk| decode_string(chunk).trim_end_matches(is_padding).to_owned())
                    .collect()
            }
        }
    }

    /// Human-readable rendering of the value, used by metadata dumps.
    pub fn display_value(&self) -> String {
        match self.data_type {
            DataType::Char => format!("{:?}", self.string_array()),
            DataType::Byte if self.dimensions.is_empty() => format!("{}", self.as_i8().unwrap_or(0)),
            DataType::Byte => format!("{:?}", self.i8_array()),
            DataType::Int16 if self.dimensions.is_empty() => format!("{}", self.as_i16().unwrap_or(0)),
            DataType::Int16 => format!("{:?}", self.i16_array()),
            DataType::Float32 if self.dimensions.is_empty() => format!("{}", self.as_f32().unwrap_or(0.0)),
            DataType::Float32 => format!("{:?}", self.f32_array()),
        }
    }
}

fn is_padding(c: char) -> bool {
    c == ' ' || c == '\0'
}

/// Product of the dimensions, saturating instead of overflowing.
pub(crate) fn element_count(dimensions: &[usize]) -> usize {
    dimensions.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)).unwrap_or(usize::MAX)
}

pub(crate) fn normalize_name(name: &str) -> Result<String, C3dError> {
    let upper = name.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return Err(C3dError::Shape("names must not be empty".into()));
    }
    if upper.len() > MAX_NAME_LEN {
        return Err(C3dError::Shape(format!(
            "name {upper} is {} bytes, at most {MAX_NAME_LEN} fit in a record",
            upper.len()
        )));
    }
    Ok(upper)
}

// ── Typed values for metadata edits ──────────────────────────────────────────

/// Elements of a [`ParamValue`].
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    F32(Vec<f32>),
    /// Raw characters; the shape gives width and count.
    Text(Vec<u8>),
}

impl Values {
    fn len(&self) -> usize {
        match self {
            Values::I8(v)   => v.len(),
            Values::U8(v)   => v.len(),
            Values::I16(v)  => v.len(),
            Values::U16(v)  => v.len(),
            Values::F32(v)  => v.len(),
            Values::Text(v) => v.len(),
        }
    }
}

/// A typed value plus the shape it should be stored with.
///
/// An empty shape denotes a scalar and requires exactly one element.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamValue {
    pub values: Values,
    pub shape:  Vec<usize>,
}

impl ParamValue {
    pub fn new(values: Values, shape: Vec<usize>) -> Self {
        Self { values, shape }
    }

    pub fn i8(v: i8) -> Self { Self::new(Values::I8(vec![v]), Vec::new()) }
    pub fn u8(v: u8) -> Self { Self::new(Values::U8(vec![v]), Vec::new()) }
    pub fn i16(v: i16) -> Self { Self::new(Values::I16(vec![v]), Vec::new()) }
    pub fn u16(v: u16) -> Self { Self::new(Values::U16(vec![v]), Vec::new()) }
    pub fn f32(v: f32) -> Self { Self::new(Values::F32(vec![v]), Vec::new()) }

    /// A 32-bit unsigned counter stored as two 16-bit words, low word first.
    pub fn u32_words(v: u32) -> Self {
        Self::new(Values::U16(vec![(v & 0xffff) as u16, (v >> 16) as u16]), vec![2])
    }

    pub fn i16_array(v: Vec<i16>) -> Self {
        let n = v.len();
        Self::new(Values::I16(v), vec![n])
    }

    pub fn f32_array(v: Vec<f32>) -> Self {
        let n = v.len();
        Self::new(Values::F32(v), vec![n])
    }

    /// One string, stored with dimensions `[len]`.
    pub fn text(s: &str) -> Self {
        let bytes = s.as_bytes().to_vec();
        let n = bytes.len();
        Self::new(Values::Text(bytes), vec![n])
    }

    /// Several strings padded with spaces to the longest one, stored with
    /// dimensions `[width, count]`.
    pub fn text_array<S: AsRef<str>>(labels: &[S]) -> Self {
        let width = labels.iter().map(|l| l.as_ref().len()).max().unwrap_or(0);
        let mut bytes = Vec::with_capacity(width * labels.len());
        for label in labels {
            let l = label.as_ref().as_bytes();
            bytes.extend_from_slice(l);
            bytes.resize(bytes.len() + width - l.len(), b' ');
        }
        Self::new(Values::Text(bytes), vec![width, labels.len()])
    }

    /// Zero-length array of the given element type.
    pub fn empty(data_type: DataType) -> Self {
        let values = match data_type {
            DataType::Char    => Values::Text(Vec::new()),
            DataType::Byte    => Values::I8(Vec::new()),
            DataType::Int16   => Values::I16(Vec::new()),
            DataType::Float32 => Values::F32(Vec::new()),
        };
        Self::new(values, vec![0])
    }

    /// Replace the shape, e.g. to store a flat vector as a matrix.
    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = shape;
        self
    }

    pub fn data_type(&self) -> DataType {
        match self.values {
            Values::I8(_) | Values::U8(_)   => DataType::Byte,
            Values::I16(_) | Values::U16(_) => DataType::Int16,
            Values::F32(_)                  => DataType::Float32,
            Values::Text(_)                 => DataType::Char,
        }
    }

    /// Validate the shape and produce `(type, dimensions, payload)`.
    pub(crate) fn into_parts(self) -> Result<(DataType, Vec<usize>, Vec<u8>), C3dError> {
        let expected = element_count(&self.shape);
        let actual = self.values.len();
        if expected != actual {
            return Err(C3dError::Shape(format!(
                "{actual} elements do not fill a {:?} array ({expected} elements)",
                self.shape
            )));
        }
        if let Some(&d) = self.shape.iter().find(|&&d| d > MAX_DIMENSION) {
            return Err(C3dError::Shape(format!(
                "dimension {d} exceeds the {MAX_DIMENSION} limit of a parameter record"
            )));
        }
        if self.shape.len() > MAX_DIMENSION {
            return Err(C3dError::Shape(format!("{} dimensions do not fit a record", self.shape.len())));
        }

        let data_type = self.data_type();
        let data = match self.values {
            Values::I8(v)   => v.into_iter().map(|x| x as u8).collect(),
            Values::U8(v)   => v,
            Values::Text(v) => v,
            Values::I16(v) => {
                let mut out = vec![0u8; v.len() * 2];
                LittleEndian::write_i16_into(&v, &mut out);
                out
            }
            Values::U16(v) => {
                let mut out = vec![0u8; v.len() * 2];
                LittleEndian::write_u16_into(&v, &mut out);
                out
            }
            Values::F32(v) => {
                let mut out = vec![0u8; v.len() * 4];
                LittleEndian::write_f32_into(&v, &mut out);
                out
            }
        };
        Ok((data_type, self.shape, data))
    }
}
