//! The fixed 512-byte record at the start of every C3D file.
//!
//! ```text
//!   0  u8   parameter-section block     16  u16  data-section block
//!   1  u8   magic (0x50)                18  u16  analog samples per frame
//!   2  u16  point count                 20  f32  frame rate
//!   4  u16  analog samples / frame      24  274  reserved
//!   6  u16  first frame                298  u16  long event label key
//!   8  u16  last frame                 300  u16  event count
//!  10  u16  max interpolation gap      302  u16  reserved
//!  12  f32  point scale factor         304  164  event table
//!                                      468   44  reserved
//! ```
//!
//! The processor type lives in the fourth byte of the parameter section;
//! [`Header::read`] checks it so that a foreign-endian file fails before any
//! of its fields are trusted.

use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use crate::error::{C3dError, FormatError};
use crate::layout::{block_offset, BLOCK_SIZE};

pub const HEADER_SIZE: usize = BLOCK_SIZE;
pub const MAGIC: u8 = 0x50;
/// Written at byte 298 when event labels are four characters long.
pub const LONG_EVENT_KEY: u16 = 0x3039;
pub const MAX_EVENTS: usize = 18;
pub const EVENT_LABEL_LEN: usize = 4;

const EVENT_TIMES:  usize = 304;
const EVENT_FLAGS:  usize = EVENT_TIMES + 4 * MAX_EVENTS;
const EVENT_LABELS: usize = EVENT_FLAGS + MAX_EVENTS + 2;

pub const PROCESSOR_INTEL: u8 = 84;
pub const PROCESSOR_DEC:   u8 = 85;
pub const PROCESSOR_MIPS:  u8 = 86;

/// Accept only the little-endian IEEE processor type.
pub fn check_processor(code: u8) -> Result<(), FormatError> {
    match code {
        PROCESSOR_INTEL                  => Ok(()),
        PROCESSOR_DEC | PROCESSOR_MIPS   => Err(FormatError::UnsupportedProcessor(code)),
        other                            => Err(FormatError::UnknownProcessor(other)),
    }
}

/// One entry of the header event table.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Seconds, relative to frame 1 (not to `first_frame`).
    pub time:      f32,
    pub label:     String,
    pub displayed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub parameter_block:   u8,
    pub point_count:       u16,
    /// Analog samples per frame across all channels (channels × ratio).
    pub analog_count:      u16,
    pub first_frame:       u16,
    pub last_frame:        u16,
    pub max_gap:           u16,
    /// Negative: points stored as floats. Positive: `i16 × scale`.
    pub scale_factor:      f32,
    pub data_block:        u16,
    pub analog_per_frame:  u16,
    pub frame_rate:        f32,
    pub long_event_labels: bool,
    pub events:            Vec<Event>,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            parameter_block:   2,
            point_count:       0,
            analog_count:      0,
            first_frame:       1,
            last_frame:        1,
            max_gap:           0,
            scale_factor:      -1.0,
            data_block:        3,
            analog_per_frame:  0,
            frame_rate:        60.0,
            long_event_labels: false,
            events:            Vec::new(),
        }
    }
}

impl Header {
    /// Read the header at offset 0 and verify the processor type declared by
    /// the parameter section.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, C3dError> {
        reader.seek(SeekFrom::Start(0))?;
        let mut raw = Vec::with_capacity(HEADER_SIZE);
        reader.by_ref().take(HEADER_SIZE as u64).read_to_end(&mut raw)?;
        let header = Self::decode(&raw)?;

        if header.parameter_block == 0 {
            return Err(FormatError::NoParameterSection.into());
        }
        reader.seek(SeekFrom::Start(block_offset(u16::from(header.parameter_block))))?;
        let mut preamble = [0u8; 4];
        reader.read_exact(&mut preamble).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => C3dError::Format(FormatError::NoParameterSection),
            _                            => C3dError::Io(e),
        })?;
        check_processor(preamble[3])?;
        Ok(header)
    }

    /// Decode the 512-byte header record. Does not look at the processor type.
    pub fn decode(raw: &[u8]) -> Result<Self, C3dError> {
        if raw.len() < HEADER_SIZE {
            return Err(FormatError::TooShort(raw.len()).into());
        }
        if raw[1] != MAGIC {
            return Err(FormatError::BadMagic(raw[1]).into());
        }
        let mut r = Cursor::new(&raw[..HEADER_SIZE]);
        let parameter_block  = r.read_u8()?;
        let _magic           = r.read_u8()?;
        let point_count      = r.read_u16::<LittleEndian>()?;
        let analog_count     = r.read_u16::<LittleEndian>()?;
        let first_frame      = r.read_u16::<LittleEndian>()?;
        let last_frame       = r.read_u16::<LittleEndian>()?;
        let max_gap          = r.read_u16::<LittleEndian>()?;
        let scale_factor     = r.read_f32::<LittleEndian>()?;
        let data_block       = r.read_u16::<LittleEndian>()?;
        let analog_per_frame = r.read_u16::<LittleEndian>()?;
        let frame_rate       = r.read_f32::<LittleEndian>()?;

        r.set_position(298);
        let long_event_labels = r.read_u16::<LittleEndian>()? == LONG_EVENT_KEY;
        let event_count       = usize::from(r.read_u16::<LittleEndian>()?).min(MAX_EVENTS);

        r.set_position(EVENT_TIMES as u64);
        let mut times = [0f32; MAX_EVENTS];
        r.read_f32_into::<LittleEndian>(&mut times)?;
        let mut flags = [0u8; MAX_EVENTS];
        r.read_exact(&mut flags)?;
        let _reserved = r.read_u16::<LittleEndian>()?;
        let mut labels = [0u8; MAX_EVENTS * EVENT_LABEL_LEN];
        r.read_exact(&mut labels)?;

        let events = (0..event_count)
            .map(|i| Event {
                time:      times[i],
                label:     decode_label(&labels[i * EVENT_LABEL_LEN..(i + 1) * EVENT_LABEL_LEN]),
                displayed: flags[i] > 0,
            })
            .collect();

        Ok(Self {
            parameter_block,
            point_count,
            analog_count,
            first_frame,
            last_frame,
            max_gap,
            scale_factor,
            data_block,
            analog_per_frame,
            frame_rate,
            long_event_labels,
            events,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        raw[0] = self.parameter_block;
        raw[1] = MAGIC;
        LittleEndian::write_u16(&mut raw[2..4], self.point_count);
        LittleEndian::write_u16(&mut raw[4..6], self.analog_count);
        LittleEndian::write_u16(&mut raw[6..8], self.first_frame);
        LittleEndian::write_u16(&mut raw[8..10], self.last_frame);
        LittleEndian::write_u16(&mut raw[10..12], self.max_gap);
        LittleEndian::write_f32(&mut raw[12..16], self.scale_factor);
        LittleEndian::write_u16(&mut raw[16..18], self.data_block);
        LittleEndian::write_u16(&mut raw[18..20], self.analog_per_frame);
        LittleEndian::write_f32(&mut raw[20..24], self.frame_rate);

        let key = if self.long_event_labels { LONG_EVENT_KEY } else { 0 };
        LittleEndian::write_u16(&mut raw[298..300], key);
        let events = &self.events[..self.events.len().min(MAX_EVENTS)];
        LittleEndian::write_u16(&mut raw[300..302], events.len() as u16);

        for (i, e) in events.iter().enumerate() {
            LittleEndian::write_f32(&mut raw[EVENT_TIMES + 4 * i..EVENT_TIMES + 4 * (i + 1)], e.time);
            raw[EVENT_FLAGS + i] = u8::from(e.displayed);
            let label = e.label.as_bytes();
            let n = label.len().min(EVENT_LABEL_LEN);
            let at = EVENT_LABELS + i * EVENT_LABEL_LEN;
            raw[at..at + n].copy_from_slice(&label[..n]);
        }
        raw
    }

    /// Write the header to bytes `0..512` of the sink.
    pub fn write<W: Write + Seek>(&self, writer: &mut W) -> io::Result<()> {
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&self.encode())
    }

    /// Displayed events as `(time, label)` pairs.
    pub fn events(&self) -> impl Iterator<Item = (f32, &str)> {
        self.events
            .iter()
            .filter(|e| e.displayed)
            .map(|e| (e.time, e.label.as_str()))
    }

    /// Replace the event table. At most [`MAX_EVENTS`] entries are kept.
    pub fn encode_events(&mut self, events: &[(f32, &str)]) {
        if events.len() > MAX_EVENTS {
            tracing::warn!(
                "header holds at most {} events, dropping {}",
                MAX_EVENTS,
                events.len() - MAX_EVENTS
            );
        }
        self.events = events
            .iter()
            .take(MAX_EVENTS)
            .map(|&(time, label)| Event { time, label: label.to_owned(), displayed: true })
            .collect();
        self.long_event_labels = true;
    }
}

fn decode_label(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    crate::params::decode_string(&bytes[..end])
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  parameter_block    {}", self.parameter_block)?;
        writeln!(f, "  point_count        {}", self.point_count)?;
        writeln!(f, "  analog_count       {}", self.analog_count)?;
        writeln!(f, "  first_frame        {}", self.first_frame)?;
        writeln!(f, "  last_frame         {}", self.last_frame)?;
        writeln!(f, "  max_gap            {}", self.max_gap)?;
        writeln!(f, "  scale_factor       {}", self.scale_factor)?;
        writeln!(f, "  data_block         {}", self.data_block)?;
        writeln!(f, "  analog_per_frame   {}", self.analog_per_frame)?;
        writeln!(f, "  frame_rate         {}", self.frame_rate)?;
        write!(f,   "  long_event_labels  {}", self.long_event_labels)
    }
}
