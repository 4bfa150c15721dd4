//! Writing C3D files.
//!
//! A [`Writer`] buffers frames and edits metadata in memory. [`Writer::write`]
//! lays the file out in one pass:
//!
//! 1. sync the POINT, ANALOG and TRIAL parameters with the buffered frames;
//! 2. size the dictionary and point the header at the data section;
//! 3. emit header, dictionary and frames, padding each section to a block.
//!
//! The frame buffer is left untouched, so the same writer can be written
//! again or extended.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;

use crate::error::C3dError;
use crate::frame::{AnalogMode, Frame};
use crate::header::Header;
use crate::layout::{block_offset, data_start_block, pad_to_block, zero_fill_to};
use crate::manager::Manager;
use crate::params::{DataType, Dictionary, Group, ParamValue};
use crate::reader::{ReadOptions, Reader};

const FRAME_COUNTER_MAX: usize = u16::MAX as usize;

/// Initial metadata of a new writer.
#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    /// Point frames per second.
    pub point_rate:  f32,
    /// Analog samples per second per channel; must be a whole multiple of
    /// `point_rate`, or 0 to derive it from the frames.
    pub analog_rate: f32,
    /// Negative stores points as floats, positive as scaled integers.
    pub point_scale: f32,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self { point_rate: 480.0, analog_rate: 0.0, point_scale: -1.0 }
    }
}

/// What [`Writer::from_reader`] copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversionMode {
    /// Header, every parameter and every frame.
    #[default]
    Copy,
    /// Header and every parameter, no frames.
    CopyMetadata,
    /// Header, a minimal parameter set and every frame.
    Shallow,
    /// Header and a minimal parameter set, no frames.
    CopyHeader,
}

impl ConversionMode {
    fn copies_parameters(self) -> bool {
        matches!(self, ConversionMode::Copy | ConversionMode::CopyMetadata)
    }

    fn copies_frames(self) -> bool {
        matches!(self, ConversionMode::Copy | ConversionMode::Shallow)
    }
}

#[derive(Debug, Clone)]
pub struct Writer {
    manager:     Manager,
    frames:      Vec<Frame>,
    analog_mode: AnalogMode,
}

impl Default for Writer {
    fn default() -> Self {
        Self {
            manager:     Manager::new(Header::default(), Dictionary::default()),
            frames:      Vec::new(),
            analog_mode: AnalogMode::Transformed,
        }
    }
}

impl Writer {
    pub fn new(options: WriterOptions) -> Result<Self, C3dError> {
        let mut writer = Writer::default();
        writer.manager.header.frame_rate = options.point_rate;
        writer.manager.header.scale_factor = options.point_scale;
        writer.set_analog_rate(options.analog_rate)?;
        Ok(writer)
    }

    /// Copy a reader's metadata, and depending on `mode` its frames.
    ///
    /// Frames are copied with raw analog values so that they encode back to
    /// the same words.
    pub fn from_reader<R: Read + Seek>(reader: &mut Reader<R>, mode: ConversionMode) -> Result<Self, C3dError> {
        let mut writer = Writer::default();
        if mode.copies_parameters() {
            writer.manager = reader.manager().clone();
        } else {
            let source = reader.manager();
            writer.manager.header = source.header.clone();
            writer.set_start_frame(source.first_frame())?;
            writer.set_point_labels(&source.point_labels())?;
            writer.set_analog_labels(&source.analog_labels())?;
            let (gen_scale, scales, offsets) = source.analog_transform_parameters();
            writer.set_analog_general_scale(gen_scale)?;
            writer.set_analog_scales(&scales)?;
            writer.set_analog_offsets(&offsets)?;
        }
        writer.analog_mode = AnalogMode::Raw;

        if mode.copies_frames() {
            let (frames, status) = reader.read_all(ReadOptions::raw())?;
            if !status.is_complete() {
                tracing::warn!("copied {} of {} frames", status.frames_read(), reader.frame_count());
            }
            writer.add_frames(frames, None)?;
        }
        Ok(writer)
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn header(&self) -> &Header {
        &self.manager.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.manager.header
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.manager.dictionary
    }

    pub fn dictionary_mut(&mut self) -> &mut Dictionary {
        &mut self.manager.dictionary
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn analog_mode(&self) -> AnalogMode {
        self.analog_mode
    }

    /// Existing group, or a new one with the next free id.
    pub fn get_create(&mut self, name: &str) -> Result<&mut Group, C3dError> {
        self.manager.dictionary.get_create(name)
    }

    // ── Frames ───────────────────────────────────────────────────────────────

    /// Add frames at the end, or insert them at `index` (0-based).
    ///
    /// Every frame must have the shape of the frames already buffered. An
    /// index past the end first pads the buffer with empty frames: invalid
    /// points and zero analog samples.
    pub fn add_frames<I>(&mut self, frames: I, index: Option<usize>) -> Result<(), C3dError>
    where
        I: IntoIterator<Item = Frame>,
    {
        let frames: Vec<Frame> = frames.into_iter().collect();
        let Some(reference) = self.frames.first().or(frames.first()) else {
            return Ok(());
        };
        let shape = reference.shape();
        if let Some(bad) = frames.iter().find(|f| f.shape() != shape) {
            return Err(C3dError::Shape(format!(
                "frame shape {:?} (points, sub-samples, channels) does not match {:?}",
                bad.shape(),
                shape
            )));
        }

        match index {
            None => self.frames.extend(frames),
            Some(i) if i <= self.frames.len() => {
                self.frames.splice(i..i, frames);
            }
            Some(i) => {
                let (points, sub_samples, channels) = shape;
                self.frames.resize(i, Frame::empty(points, sub_samples, channels));
                self.frames.extend(frames);
            }
        }
        Ok(())
    }

    pub fn clear_frames(&mut self) {
        self.frames.clear();
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    /// Whether buffered analog values are physical (the default) or raw
    /// stored words.
    pub fn set_analog_mode(&mut self, mode: AnalogMode) {
        self.analog_mode = mode;
    }

    /// Analog rate as a whole multiple of the point rate; 0 leaves it to be
    /// derived from the frames.
    pub fn set_analog_rate(&mut self, rate: f32) -> Result<(), C3dError> {
        let point_rate = self.manager.point_rate();
        let per_frame = if rate == 0.0 {
            0.0
        } else if point_rate > 0.0 {
            rate / point_rate
        } else {
            f32::NAN
        };
        if per_frame.fract() != 0.0 || per_frame < 0.0 || per_frame > f32::from(u16::MAX) {
            return Err(C3dError::Shape(format!(
                "analog rate {rate} is not a whole multiple of the point rate {point_rate}"
            )));
        }
        self.manager.header.analog_per_frame = per_frame as u16;
        if let Some(group) = self.manager.dictionary.group_mut("ANALOG") {
            if group.contains("RATE") {
                group.set_f32("RATE", "Analog samples per second", rate)?;
            }
        }
        Ok(())
    }

    pub fn set_point_labels<S: AsRef<str>>(&mut self, labels: &[S]) -> Result<(), C3dError> {
        set_labels(self.get_create("POINT")?, labels, "Point labels.")
    }

    pub fn set_analog_labels<S: AsRef<str>>(&mut self, labels: &[S]) -> Result<(), C3dError> {
        set_labels(self.get_create("ANALOG")?, labels, "Analog labels.")
    }

    pub fn set_analog_general_scale(&mut self, value: f32) -> Result<(), C3dError> {
        self.get_create("ANALOG")?.set_f32("GEN_SCALE", "Analog general scale factor", value)
    }

    /// Per-channel scale factors; an empty slice stores an empty array.
    pub fn set_analog_scales(&mut self, values: &[f32]) -> Result<(), C3dError> {
        let group = self.get_create("ANALOG")?;
        if values.is_empty() {
            group.set_empty_array("SCALE", "Analog channel scale factors", DataType::Float32)
        } else {
            group.set_f32_array("SCALE", "Analog channel scale factors", values)
        }
    }

    /// Per-channel offsets; an empty slice stores an empty array.
    pub fn set_analog_offsets(&mut self, values: &[i16]) -> Result<(), C3dError> {
        let group = self.get_create("ANALOG")?;
        if values.is_empty() {
            group.set_empty_array("OFFSET", "Analog channel offsets", DataType::Int16)
        } else {
            group.set_i16_array("OFFSET", "Analog channel offsets", values)
        }
    }

    /// Trial frame number of the first buffered frame.
    pub fn set_start_frame(&mut self, frame: u32) -> Result<(), C3dError> {
        self.get_create("TRIAL")?.set("ACTUAL_START_FIELD", "Actual start frame", ParamValue::u32_words(frame))?;
        self.manager.header.first_frame = frame.min(u32::from(u16::MAX)) as u16;
        Ok(())
    }

    fn set_last_frame(&mut self, frame: u32) -> Result<(), C3dError> {
        self.get_create("TRIAL")?.set("ACTUAL_END_FIELD", "Actual end frame", ParamValue::u32_words(frame))?;
        self.manager.header.last_frame = frame.min(u32::from(u16::MAX)) as u16;
        Ok(())
    }

    /// `POINT:X_SCREEN` / `POINT:Y_SCREEN`, each a sign and an axis such as
    /// `"+X"` or `"-Z"`.
    pub fn set_screen_axis(&mut self, x: &str, y: &str) -> Result<(), C3dError> {
        for axis in [x, y] {
            if axis.len() != 2 {
                return Err(C3dError::Shape(format!("screen axis {axis:?} is not two characters")));
            }
        }
        let group = self.get_create("POINT")?;
        group.set_str("X_SCREEN", "X_SCREEN parameter", x)?;
        group.set_str("Y_SCREEN", "Y_SCREEN parameter", y)
    }

    /// Header events as `(seconds, label)`.
    pub fn set_events(&mut self, events: &[(f32, &str)]) {
        self.manager.header.encode_events(events);
    }

    // ── Output ───────────────────────────────────────────────────────────────

    /// Write the complete file to `sink`, starting at offset 0.
    pub fn write<W: Write + Seek>(&mut self, sink: &mut W) -> Result<(), C3dError> {
        let (points, sub_samples, channels) = self.frames.first().ok_or(C3dError::EmptyWriter)?.shape();
        self.sync_parameters(points, sub_samples, channels)?;

        let (dictionary, blocks) = self.manager.dictionary.encode()?;
        self.manager.check_metadata()?;
        let header = &self.manager.header;
        tracing::debug!(
            "writing {} frames, {} parameter blocks, data at block {}",
            self.frames.len(),
            blocks,
            header.data_block
        );

        header.write(sink)?;
        zero_fill_to(sink, block_offset(u16::from(header.parameter_block)))?;
        sink.write_all(&dictionary)?;
        zero_fill_to(sink, block_offset(header.data_block))?;

        let codec = self.manager.frame_codec();
        let mut buf = Vec::with_capacity(codec.frame_size());
        for frame in &self.frames {
            buf.clear();
            codec.encode(frame, self.analog_mode, &mut buf)?;
            sink.write_all(&buf)?;
        }
        pad_to_block(sink)?;
        sink.flush()?;
        Ok(())
    }

    pub fn write_path<P: AsRef<Path>>(&mut self, path: P) -> Result<(), C3dError> {
        let mut sink = BufWriter::new(File::create(path)?);
        self.write(&mut sink)
    }

    /// Bring header and parameters in line with the buffered frames.
    fn sync_parameters(&mut self, points: usize, sub_samples: usize, channels: usize) -> Result<(), C3dError> {
        let nframes = self.frames.len();
        let used_points = u16::try_from(points)
            .map_err(|_| C3dError::Shape(format!("{points} points do not fit a 16-bit count")))?;
        let used_channels = u16::try_from(channels)
            .map_err(|_| C3dError::Shape(format!("{channels} analog channels do not fit a 16-bit count")))?;

        // Samples per channel per frame come from the frames themselves.
        if channels > 0 {
            let declared = self.manager.header.analog_per_frame;
            if declared != 0 && usize::from(declared) != sub_samples {
                return Err(C3dError::Shape(format!(
                    "frames carry {sub_samples} analog samples per frame, the analog rate implies {declared}"
                )));
            }
            self.manager.header.analog_per_frame = u16::try_from(sub_samples)
                .map_err(|_| C3dError::Shape(format!("{sub_samples} analog samples per frame")))?;
        }
        let analog_count = u16::try_from(channels * usize::from(self.manager.header.analog_per_frame))
            .map_err(|_| C3dError::Shape("analog words per frame exceed a 16-bit count".into()))?;

        let first_frame = self.manager.first_frame().max(1);
        let last_frame = u32::try_from(nframes - 1)
            .ok()
            .and_then(|n| first_frame.checked_add(n))
            .ok_or_else(|| {
                C3dError::Shape(format!("{nframes} frames starting at frame {first_frame} overflow the frame counter"))
            })?;
        let point_scale = self.manager.point_scale();
        let point_rate = self.manager.point_rate();
        let analog_rate = f32::from(self.manager.header.analog_per_frame) * point_rate;

        let group = self.get_create("POINT")?;
        group.set_u16("USED", "Number of point samples", used_points)?;
        group.set_u16("FRAMES", "Total frame count", nframes.min(FRAME_COUNTER_MAX) as u16)?;
        if nframes >= FRAME_COUNTER_MAX {
            group.set_f32("LONG_FRAMES", "Total frame count", nframes as f32)?;
        } else {
            group.remove("LONG_FRAMES");
        }
        group.set_u16("DATA_START", "First data block containing frame samples.", 0)?;
        group.set_f32("SCALE", "Point data scaling factor", point_scale)?;
        group.set_f32("RATE", "Point data sample rate", point_rate)?;
        if !group.contains("UNITS") {
            group.set_str("UNITS", "Units used for point data measurements.", "mm")?;
        }
        if !group.contains("DESCRIPTIONS") {
            group.set_str_array("DESCRIPTIONS", "Channel descriptions.", &vec!["  "; points][..])?;
        }

        let group = self.get_create("ANALOG")?;
        group.set_u16("USED", "Analog channel count", used_channels)?;
        group.set_f32("RATE", "Analog samples per second", analog_rate)?;
        if !group.contains("GEN_SCALE") {
            group.set_f32("GEN_SCALE", "Analog general scale factor", 1.0)?;
        }
        if !group.contains("SCALE") {
            group.set_empty_array("SCALE", "Analog channel scale factors", DataType::Float32)?;
        }
        if !group.contains("OFFSET") {
            group.set_empty_array("OFFSET", "Analog channel offsets", DataType::Int16)?;
        }
        if !group.contains("DESCRIPTIONS") {
            group.set_str_array("DESCRIPTIONS", "Channel descriptions.", &vec!["  "; channels][..])?;
        }

        self.set_start_frame(first_frame)?;
        self.set_last_frame(last_frame)?;

        let header = &mut self.manager.header;
        if header.parameter_block == 0 {
            header.parameter_block = 2;
        }
        header.point_count = used_points;
        header.analog_count = analog_count;
        header.scale_factor = point_scale;
        header.frame_rate = point_rate;
        header.data_block = data_start_block(header.parameter_block, self.manager.dictionary.block_count());
        let data_block = header.data_block;
        self.get_create("POINT")?
            .set_u16("DATA_START", "First data block containing frame samples.", data_block)?;
        Ok(())
    }
}

fn set_labels<S: AsRef<str>>(group: &mut Group, labels: &[S], desc: &str) -> Result<(), C3dError> {
    if labels.is_empty() {
        group.set_empty_array("LABELS", desc, DataType::Char)
    } else {
        group.set_str_array("LABELS", desc, labels)
    }
}
