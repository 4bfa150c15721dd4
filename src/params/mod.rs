//! Parameter groups. Records chain by a signed offset; a zero name length or
//! group id ends the chain.

mod value;

pub use value::{
    decode_string, encode_string, DataType, ParamValue, Parameter, Values, MAX_DESC_LEN, MAX_DIMENSION,
    MAX_NAME_LEN,
};

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::Serialize;

use crate::error::{C3dError, CorruptionError};
use crate::header::{MAGIC, PROCESSOR_INTEL};
use crate::layout::{block_offset, blocks_for, BLOCK_SIZE};
use value::normalize_name;

/// Bytes before the first record.
pub const PREAMBLE_SIZE: usize = 4;
/// Group ids are stored as a signed byte.
pub const MAX_GROUP_ID: u8 = 127;

// ── Group ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub id:     u8,
    pub name:   String,
    pub desc:   String,
    pub locked: bool,
    params:     Vec<Parameter>,
    /// Created by a parameter record before its group record was seen.
    #[serde(skip)]
    placeholder: bool,
}

impl Group {
    fn new(id: u8, name: String, desc: String) -> Self {
        Self { id, name, desc, locked: false, params: Vec::new(), placeholder: false }
    }

    /// Parameters in insertion order.
    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.position(name).map(|i| &self.params[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.position(name).map(move |i| &mut self.params[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Add a new parameter. Fails if the name is already taken.
    pub fn add(&mut self, name: &str, desc: &str, value: ParamValue) -> Result<&mut Parameter, C3dError> {
        if self.contains(name) {
            return Err(C3dError::Duplicate(format!("{}:{}", self.name, name.to_ascii_uppercase())));
        }
        let param = build_param(name, desc, value)?;
        self.params.push(param);
        let last = self.params.len() - 1;
        Ok(&mut self.params[last])
    }

    /// Replace a parameter's payload in place, or append it if absent.
    pub fn set(&mut self, name: &str, desc: &str, value: ParamValue) -> Result<(), C3dError> {
        let mut param = build_param(name, desc, value)?;
        match self.position(name) {
            Some(i) => {
                param.locked = self.params[i].locked;
                self.params[i] = param;
            }
            None => self.params.push(param),
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        self.position(name).map(|i| self.params.remove(i))
    }

    pub fn rename(&mut self, name: &str, new_name: &str) -> Result<(), C3dError> {
        let new_name = normalize_name(new_name)?;
        if self.contains(&new_name) {
            return Err(C3dError::Duplicate(format!("{}:{}", self.name, new_name)));
        }
        let i = self
            .position(name)
            .ok_or_else(|| C3dError::Shape(format!("no parameter {}:{}", self.name, name)))?;
        self.params[i].name = new_name;
        Ok(())
    }

    // ── Convenience setters ──────────────────────────────────────────────────

    pub fn set_i16(&mut self, name: &str, desc: &str, v: i16) -> Result<(), C3dError> {
        self.set(name, desc, ParamValue::i16(v))
    }

    pub fn set_u16(&mut self, name: &str, desc: &str, v: u16) -> Result<(), C3dError> {
        self.set(name, desc, ParamValue::u16(v))
    }

    pub fn set_f32(&mut self, name: &str, desc: &str, v: f32) -> Result<(), C3dError> {
        self.set(name, desc, ParamValue::f32(v))
    }

    pub fn set_i16_array(&mut self, name: &str, desc: &str, v: &[i16]) -> Result<(), C3dError> {
        self.set(name, desc, ParamValue::i16_array(v.to_vec()))
    }

    pub fn set_f32_array(&mut self, name: &str, desc: &str, v: &[f32]) -> Result<(), C3dError> {
        self.set(name, desc, ParamValue::f32_array(v.to_vec()))
    }

    pub fn set_str(&mut self, name: &str, desc: &str, v: &str) -> Result<(), C3dError> {
        self.set(name, desc, ParamValue::text(v))
    }

    pub fn set_str_array<S: AsRef<str>>(&mut self, name: &str, desc: &str, v: &[S]) -> Result<(), C3dError> {
        self.set(name, desc, ParamValue::text_array(v))
    }

    pub fn set_empty_array(&mut self, name: &str, desc: &str, data_type: DataType) -> Result<(), C3dError> {
        self.set(name, desc, ParamValue::empty(data_type))
    }

    /// Keep a decoded parameter even if its name repeats.
    fn insert_decoded(&mut self, mut param: Parameter) {
        if self.contains(&param.name) {
            let base = param.name.clone();
            let renamed = (2..)
                .map(|n| format!("{base}{n}"))
                .find(|candidate| !self.contains(candidate))
                .unwrap_or(base.clone());
            tracing::warn!("duplicate parameter {}:{} kept as {}", self.name, base, renamed);
            param.name = renamed;
        }
        self.params.push(param);
    }

    // ── Binary form ──────────────────────────────────────────────────────────

    /// Size of the group record plus all of its parameter records.
    pub fn binary_size(&self) -> usize {
        1 + 1 + encode_string(&self.name).len() + 2 + 1 + encode_string(&self.desc).len()
            + self.params.iter().map(Parameter::binary_size).sum::<usize>()
    }

    /// Check the group record and every parameter record.
    pub fn validate(&self) -> Result<(), C3dError> {
        if self.id == 0 || self.id > MAX_GROUP_ID {
            return Err(C3dError::Shape(format!("group {} has id {}, outside 1..={MAX_GROUP_ID}", self.name, self.id)));
        }
        let name = encode_string(&self.name).len();
        if name == 0 || name > MAX_NAME_LEN {
            return Err(C3dError::Shape(format!("group name {} is {name} bytes", self.name)));
        }
        if encode_string(&self.desc).len() > MAX_DESC_LEN {
            return Err(C3dError::Shape(format!("description of group {} exceeds {MAX_DESC_LEN} bytes", self.name)));
        }
        self.params.iter().try_for_each(Parameter::validate)
    }

    /// Callers run [`validate`](Self::validate) first; lengths are written as is.
    fn encode_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let name = encode_string(&self.name);
        let desc = encode_string(&self.desc);
        w.write_i8(signed_len(name.len(), self.locked))?;
        w.write_i8(-(self.id as i8))?;
        w.write_all(&name)?;
        w.write_i16::<LittleEndian>(3 + desc.len() as i16)?;
        w.write_u8(desc.len() as u8)?;
        w.write_all(&desc)?;
        for p in &self.params {
            encode_param(p, self.id, w)?;
        }
        Ok(())
    }
}

fn build_param(name: &str, desc: &str, value: ParamValue) -> Result<Parameter, C3dError> {
    let param = Parameter::from_value(name, desc, value)?;
    param.validate()?;
    Ok(param)
}

fn signed_len(len: usize, locked: bool) -> i8 {
    let len = len as i8;
    if locked { -len } else { len }
}

fn encode_param<W: Write>(p: &Parameter, group_id: u8, w: &mut W) -> io::Result<()> {
    let name = encode_string(&p.name);
    let desc = encode_string(&p.desc);
    w.write_i8(signed_len(name.len(), p.locked))?;
    w.write_i8(group_id as i8)?;
    w.write_all(&name)?;
    w.write_i16::<LittleEndian>((p.binary_size() - 2 - name.len()) as i16)?;
    w.write_i8(p.data_type.code())?;
    w.write_u8(p.dimensions.len() as u8)?;
    for &d in &p.dimensions {
        w.write_u8(d as u8)?;
    }
    w.write_all(&p.data)?;
    w.write_u8(desc.len() as u8)?;
    w.write_all(&desc)?;
    Ok(())
}

// ── Dictionary ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dictionary {
    groups: Vec<Group>,
}

impl Dictionary {
    /// Read the parameter section starting at 1-based block `start_block`.
    pub fn read<R: Read + Seek>(reader: &mut R, start_block: u8) -> Result<Self, C3dError> {
        reader.seek(SeekFrom::Start(block_offset(u16::from(start_block))))?;
        let mut preamble = [0u8; PREAMBLE_SIZE];
        reader
            .read_exact(&mut preamble)
            .map_err(|_| CorruptionError::TruncatedRecord { offset: 0 })?;
        let blocks = usize::from(preamble[2]);
        if blocks == 0 {
            tracing::warn!("parameter section declares zero blocks");
        }

        let mut section = preamble.to_vec();
        reader
            .by_ref()
            .take((blocks * BLOCK_SIZE).saturating_sub(PREAMBLE_SIZE) as u64)
            .read_to_end(&mut section)?;
        if section.len() < blocks * BLOCK_SIZE {
            tracing::warn!(
                "parameter section declares {} bytes, only {} available",
                blocks * BLOCK_SIZE,
                section.len()
            );
        }
        Self::decode(&section)
    }

    /// Decode a parameter section, preamble included.
    pub fn decode(section: &[u8]) -> Result<Self, C3dError> {
        if section.len() < PREAMBLE_SIZE {
            return Err(CorruptionError::TruncatedRecord { offset: 0 }.into());
        }
        let mut dict = Dictionary::default();
        let mut pos = PREAMBLE_SIZE;

        while pos + 2 <= section.len() {
            let name_len = section[pos] as i8;
            let group_id = section[pos + 1] as i8;
            if name_len == 0 || group_id == 0 {
                break;
            }
            if group_id == i8::MIN {
                return Err(CorruptionError::GroupIdOutOfRange { offset: pos }.into());
            }
            let truncated = CorruptionError::TruncatedRecord { offset: pos };

            let name_start = pos + 2;
            let name_end = name_start + name_len.unsigned_abs() as usize;
            if name_end + 2 > section.len() {
                return Err(truncated.into());
            }
            let name = decode_string(&section[name_start..name_end]).to_ascii_uppercase();
            let locked = name_len < 0;

            let offset = LittleEndian::read_i16(&section[name_end..name_end + 2]);
            let body_start = name_end + 2;
            let (body_end, last) = if offset <= 0 {
                (section.len(), true)
            } else {
                (name_end + offset as usize, false)
            };
            if body_end < body_start || body_end > section.len() {
                return Err(truncated.into());
            }
            let body = &section[body_start..body_end];

            if group_id < 0 {
                let desc = read_desc(body, 0).ok_or(truncated)?;
                dict.insert_decoded_group(group_id.unsigned_abs(), name, desc, locked);
            } else {
                let param = decode_param_body(name, body, locked, pos)?;
                dict.decoded_group_for(group_id as u8).insert_decoded(param);
            }

            if last {
                break;
            }
            pos = body_end;
        }
        Ok(dict)
    }

    /// Serialize every group in insertion order.
    ///
    /// Returns the section bytes, zero-padded to whole blocks, and the number
    /// of blocks they span.
    pub fn encode(&self) -> Result<(Vec<u8>, usize), C3dError> {
        let blocks = self.block_count();
        if blocks > usize::from(u8::MAX) {
            return Err(C3dError::Shape(format!(
                "parameter section needs {blocks} blocks, at most 255 can be addressed"
            )));
        }
        self.groups.iter().try_for_each(Group::validate)?;
        let mut out = Vec::with_capacity(blocks * BLOCK_SIZE);
        out.extend_from_slice(&[1, MAGIC, blocks as u8, PROCESSOR_INTEL]);
        for group in &self.groups {
            group.encode_into(&mut out)?;
        }
        out.resize(blocks * BLOCK_SIZE, 0);
        Ok((out, blocks))
    }

    /// Encoded length before block padding.
    pub fn byte_len(&self) -> usize {
        PREAMBLE_SIZE + self.groups.iter().map(Group::binary_size).sum::<usize>()
    }

    pub fn block_count(&self) -> usize {
        blocks_for(self.byte_len())
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.position(name).map(|i| &self.groups[i])
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.position(name).map(move |i| &mut self.groups[i])
    }

    pub fn group_by_id(&self, id: u8) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Look up `"GROUP:PARAMETER"` (or `"GROUP.PARAMETER"`), ignoring case.
    pub fn get(&self, path: &str) -> Option<&Parameter> {
        let (group, param) = split_path(path)?;
        self.group(group)?.get(param)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Parameter> {
        let (group, param) = split_path(path)?;
        self.group_mut(group)?.get_mut(param)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    // ── Editing ──────────────────────────────────────────────────────────────

    /// Smallest id above every id in use.
    pub fn next_id(&self) -> Result<u8, C3dError> {
        let max = self.groups.iter().map(|g| g.id).max().unwrap_or(0);
        if max >= MAX_GROUP_ID {
            return Err(C3dError::Shape(format!("no group id left above {max}")));
        }
        Ok(max + 1)
    }

    pub fn add_group(&mut self, id: u8, name: &str, desc: &str) -> Result<&mut Group, C3dError> {
        let name = normalize_name(name)?;
        if id == 0 || id > MAX_GROUP_ID {
            return Err(C3dError::Shape(format!("group id {id} outside 1..={MAX_GROUP_ID}")));
        }
        if self.group_by_id(id).is_some() {
            return Err(C3dError::Duplicate(format!("group id {id}")));
        }
        if self.group(&name).is_some() {
            return Err(C3dError::Duplicate(name));
        }
        if desc.len() > MAX_DESC_LEN {
            return Err(C3dError::Shape(format!("description of {name} exceeds {MAX_DESC_LEN} bytes")));
        }
        self.groups.push(Group::new(id, name, desc.to_owned()));
        let last = self.groups.len() - 1;
        Ok(&mut self.groups[last])
    }

    /// Existing group, or a new empty one with the next free id.
    pub fn get_create(&mut self, name: &str) -> Result<&mut Group, C3dError> {
        if let Some(i) = self.position(name) {
            return Ok(&mut self.groups[i]);
        }
        let id = self.next_id()?;
        let upper = normalize_name(name)?;
        let desc = format!("{upper} group");
        self.add_group(id, &upper, &desc)
    }

    pub fn remove_group(&mut self, name: &str) -> Option<Group> {
        self.position(name).map(|i| self.groups.remove(i))
    }

    pub fn rename_group(&mut self, name: &str, new_name: &str) -> Result<(), C3dError> {
        let new_name = normalize_name(new_name)?;
        let i = self
            .position(name)
            .ok_or_else(|| C3dError::Shape(format!("no group {name}")))?;
        if let Some(j) = self.position(&new_name) {
            if i == j {
                return Ok(());
            }
            return Err(C3dError::Duplicate(new_name));
        }
        self.groups[i].name = new_name;
        Ok(())
    }

    // ── Decode helpers ───────────────────────────────────────────────────────

    /// A repeated group name is kept as `NAME{id}`.
    fn insert_decoded_group(&mut self, id: u8, name: String, desc: String, locked: bool) {
        let name = match self.groups.iter().find(|g| g.id != id && g.name == name) {
            Some(_) => {
                let renamed = format!("{name}{id}");
                tracing::warn!("duplicate parameter group {} (id {}) kept as {}", name, id, renamed);
                renamed
            }
            None => name,
        };
        match self.groups.iter_mut().find(|g| g.id == id) {
            Some(group) if group.placeholder => {
                group.name = name;
                group.desc = desc;
                group.locked = locked;
                group.placeholder = false;
            }
            Some(group) => {
                tracing::warn!("group id {} declared twice, keeping name {}", id, group.name);
                group.desc = desc;
            }
            None => {
                let mut group = Group::new(id, name, desc);
                group.locked = locked;
                self.groups.push(group);
            }
        }
    }

    fn decoded_group_for(&mut self, id: u8) -> &mut Group {
        let i = match self.groups.iter().position(|g| g.id == id) {
            Some(i) => i,
            None => {
                let mut group = Group::new(id, format!("GROUP{id}"), String::new());
                group.placeholder = true;
                self.groups.push(group);
                self.groups.len() - 1
            }
        };
        &mut self.groups[i]
    }
}

fn split_path(path: &str) -> Option<(&str, &str)> {
    path.split_once([':', '.'])
}

fn read_desc(body: &[u8], at: usize) -> Option<String> {
    let len = usize::from(*body.get(at)?);
    let bytes = body.get(at + 1..at + 1 + len)?;
    Some(decode_string(bytes))
}

fn decode_param_body(name: String, body: &[u8], locked: bool, record: usize) -> Result<Parameter, C3dError> {
    let truncated = CorruptionError::TruncatedRecord { offset: record };
    if body.len() < 2 {
        return Err(truncated.into());
    }
    let data_type = DataType::from_code(body[0] as i8)?;
    let ndims = usize::from(body[1]);
    let dims_end = 2 + ndims;
    let dimensions: Vec<usize> = body
        .get(2..dims_end)
        .ok_or(truncated.clone())?
        .iter()
        .map(|&d| usize::from(d))
        .collect();

    let available = body.len() - dims_end;
    let needed = dimensions
        .iter()
        .try_fold(data_type.width(), |acc, &d| acc.checked_mul(d))
        .unwrap_or(usize::MAX);
    if needed > available {
        return Err(CorruptionError::PayloadOverflow { name, needed, available }.into());
    }
    let data = body[dims_end..dims_end + needed].to_vec();
    let desc = read_desc(body, dims_end + needed).ok_or(truncated)?;
    Ok(Parameter::from_raw(name, desc, data_type, dimensions, data, locked)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dictionary {
        let mut d = Dictionary::default();
        let point = d.get_create("POINT").unwrap();
        point.set_u16("USED", "Number of points", 24).unwrap();
        point.set_f32("RATE", "Frame rate", 200.0).unwrap();
        point.set_str_array("LABELS", "Marker labels", &["RFT1", "RFT2", "LFT1"]).unwrap();
        let analog = d.get_create("analog").unwrap();
        analog.set_f32_array("SCALE", "", &[0.5, 0.25, 2.0]).unwrap();
        analog.set_i16_array("OFFSET", "", &[0, -3, 12]).unwrap();
        d
    }

    /// Hand-build one raw record.
    fn record(name: &str, group_id: i8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![name.len() as u8, group_id as u8];
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&((body.len() + 2) as i16).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    fn section(records: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![1, MAGIC, 1, PROCESSOR_INTEL];
        for r in records {
            out.extend_from_slice(r);
        }
        out.resize(BLOCK_SIZE, 0);
        out
    }

    #[test]
    fn encode_decode_roundtrip() {
        let d = sample();
        let (bytes, blocks) = d.encode().unwrap();
        assert_eq!(blocks, 1);
        assert_eq!(bytes.len(), BLOCK_SIZE);
        assert_eq!(bytes[2], 1);
        assert_eq!(bytes[3], PROCESSOR_INTEL);
        assert_eq!(Dictionary::decode(&bytes).unwrap(), d);
    }

    #[test]
    fn block_count_rounds_up() {
        let mut d = Dictionary::default();
        let g = d.get_create("BIG").unwrap();
        g.set("DATA", "", ParamValue::f32_array(vec![0.0; 200])).unwrap();
        assert!(d.byte_len() > BLOCK_SIZE);
        let (bytes, blocks) = d.encode().unwrap();
        assert_eq!(blocks, 2);
        assert_eq!(bytes.len(), 2 * BLOCK_SIZE);
    }

    #[test]
    fn lookup_is_case_insensitive_with_either_separator() {
        let d = sample();
        assert_eq!(d.get("point:used").and_then(Parameter::as_u16), Some(24));
        assert_eq!(d.get("Point.Rate").and_then(Parameter::as_f32), Some(200.0));
        assert!(d.get("POINT").is_none());
        assert!(d.get("POINT:MISSING").is_none());
        assert_eq!(d.group("analog").map(|g| g.id), Some(2));
    }

    #[test]
    fn duplicate_group_names_are_both_kept() {
        let desc = [0u8];
        let used = [2u8, 0, 7, 0, 0]; // int16 scalar 7, empty description
        let s = section(&[
            record("FORCE", -3, &desc),
            record("USED", 3, &used),
            record("FORCE", -7, &desc),
            record("USED", 7, &[2, 0, 9, 0, 0]),
        ]);
        let d = Dictionary::decode(&s).unwrap();
        assert_eq!(d.groups().len(), 2);
        assert_eq!(d.group("FORCE").map(|g| g.id), Some(3));
        assert_eq!(d.group("FORCE7").map(|g| g.id), Some(7));
        assert_eq!(d.get("FORCE:USED").and_then(Parameter::as_i16), Some(7));
        assert_eq!(d.get("FORCE7:USED").and_then(Parameter::as_i16), Some(9));
    }

    #[test]
    fn parameter_before_its_group_record() {
        let s = section(&[
            record("USED", 1, &[2, 0, 5, 0, 0]),
            record("POINT", -1, &[4, b'P', b't', b's', b'.']),
        ]);
        let d = Dictionary::decode(&s).unwrap();
        let g = d.group("POINT").unwrap();
        assert_eq!(g.desc, "Pts.");
        assert_eq!(g.get("USED").and_then(Parameter::as_i16), Some(5));
        assert!(d.group("GROUP1").is_none());
    }

    #[test]
    fn duplicate_parameter_names_are_suffixed() {
        let s = section(&[
            record("POINT", -1, &[0]),
            record("LABELS", 1, &[0xff, 1, 2, b'A', b'B', 0]),
            record("LABELS", 1, &[0xff, 1, 2, b'C', b'D', 0]),
        ]);
        let d = Dictionary::decode(&s).unwrap();
        assert_eq!(d.get("POINT:LABELS").unwrap().as_string(), "AB");
        assert_eq!(d.get("POINT:LABELS2").unwrap().as_string(), "CD");
    }

    #[test]
    fn unknown_type_code_is_corruption() {
        let s = section(&[record("POINT", -1, &[0]), record("ODD", 1, &[3, 0, 0, 0, 0])]);
        assert!(matches!(
            Dictionary::decode(&s),
            Err(C3dError::Corruption(CorruptionError::UnsupportedType(3)))
        ));
    }

    #[test]
    fn oversized_dimensions_are_corruption() {
        // float array of 200 elements inside a 12-byte body
        let s = section(&[record("POINT", -1, &[0]), record("BIG", 1, &[4, 1, 200, 0, 0, 0, 0, 0, 0, 0])]);
        match Dictionary::decode(&s) {
            Err(C3dError::Corruption(CorruptionError::PayloadOverflow { name, needed, .. })) => {
                assert_eq!(name, "BIG");
                assert_eq!(needed, 800);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn offset_past_section_is_truncation() {
        let mut s = vec![1, MAGIC, 1, PROCESSOR_INTEL];
        s.extend_from_slice(&[5, 0xff]);
        s.extend_from_slice(b"POINT");
        s.extend_from_slice(&600i16.to_le_bytes());
        s.push(0);
        s.resize(BLOCK_SIZE, 0);
        assert!(matches!(
            Dictionary::decode(&s),
            Err(C3dError::Corruption(CorruptionError::TruncatedRecord { offset: 4 }))
        ));
    }

    #[test]
    fn non_positive_offset_marks_last_record() {
        let mut s = vec![1, MAGIC, 1, PROCESSOR_INTEL];
        s.extend_from_slice(&record("POINT", -1, &[0]));
        s.extend_from_slice(&[4, 1]);
        s.extend_from_slice(b"RATE");
        s.extend_from_slice(&0i16.to_le_bytes());
        s.extend_from_slice(&[4, 0]);
        s.extend_from_slice(&100f32.to_le_bytes());
        s.push(0);
        s.resize(BLOCK_SIZE, 0);
        let d = Dictionary::decode(&s).unwrap();
        assert_eq!(d.get("POINT:RATE").and_then(Parameter::as_f32), Some(100.0));
    }

    #[test]
    fn locked_flag_survives_roundtrip() {
        let mut d = sample();
        d.group_mut("POINT").unwrap().locked = true;
        d.get_mut("POINT:RATE").unwrap().locked = true;
        let (bytes, _) = d.encode().unwrap();
        let back = Dictionary::decode(&bytes).unwrap();
        assert!(back.group("POINT").unwrap().locked);
        assert!(back.get("POINT:RATE").unwrap().locked);
        assert!(!back.get("POINT:USED").unwrap().locked);
    }

    #[test]
    fn latin1_description_keeps_following_records() {
        let mut used = vec![2u8, 0, 7, 0, 200];
        used.extend_from_slice(&[0xe9; 200]);
        let mut rate = vec![4u8, 0];
        rate.extend_from_slice(&100f32.to_le_bytes());
        rate.push(0);
        let s = section(&[record("POINT", -1, &[0]), record("USED", 1, &used), record("RATE", 1, &rate)]);

        let d = Dictionary::decode(&s).unwrap();
        assert_eq!(d.get("POINT:USED").unwrap().desc.chars().count(), 200);
        // preamble + group record + USED + RATE, descriptions at one byte per character
        assert_eq!(d.byte_len(), 4 + 10 + 213 + 15);

        let (bytes, _) = d.encode().unwrap();
        let back = Dictionary::decode(&bytes).unwrap();
        assert_eq!(back, d);
        assert_eq!(back.get("POINT:RATE").and_then(Parameter::as_f32), Some(100.0));
    }

    #[test]
    fn group_id_minus_128_is_corruption() {
        let s = section(&[record("POINT", i8::MIN, &[0])]);
        assert!(matches!(
            Dictionary::decode(&s),
            Err(C3dError::Corruption(CorruptionError::GroupIdOutOfRange { offset: 4 }))
        ));
    }

    #[test]
    fn direct_field_edits_are_checked_on_encode() {
        let mut d = sample();
        d.get_mut("POINT:LABELS").unwrap().dimensions = vec![4, 300];
        assert!(matches!(d.encode(), Err(C3dError::Shape(_))));

        let mut d = sample();
        d.get_mut("ANALOG:SCALE").unwrap().data.push(0);
        assert!(matches!(d.encode(), Err(C3dError::Shape(_))));

        let mut d = sample();
        d.get_mut("POINT:RATE").unwrap().desc = "\u{e9}".repeat(300);
        assert!(matches!(d.encode(), Err(C3dError::Shape(_))));

        let mut d = sample();
        d.group_mut("POINT").unwrap().name = "N".repeat(128);
        assert!(matches!(d.encode(), Err(C3dError::Shape(_))));
    }

    #[test]
    fn editing_groups_and_parameters() {
        let mut d = sample();
        assert!(matches!(d.add_group(1, "OTHER", ""), Err(C3dError::Duplicate(_))));
        assert!(matches!(d.add_group(9, "point", ""), Err(C3dError::Duplicate(_))));
        d.rename_group("ANALOG", "FORCE_PLATFORM").unwrap();
        assert!(d.group("ANALOG").is_none());
        assert_eq!(d.get_create("FORCE_PLATFORM").unwrap().id, 2);
        assert_eq!(d.get_create("TRIAL").unwrap().id, 3);

        let point = d.group_mut("POINT").unwrap();
        assert!(matches!(point.add("USED", "", ParamValue::u16(1)), Err(C3dError::Duplicate(_))));
        point.set_u16("USED", "", 30).unwrap();
        assert_eq!(point.params()[0].as_u16(), Some(30));
        point.rename("RATE", "FRAME_RATE").unwrap();
        assert!(point.remove("FRAME_RATE").is_some());
        assert!(d.remove_group("TRIAL").is_some());
        assert_eq!(d.next_id().unwrap(), 3);
    }
}
