//! Quantities derived from the header and the parameter dictionary.
//!
//! Most values exist twice: once in the header and once as a parameter.
//! Parameters win when present; the header is the fallback. Nothing here is
//! cached, so edits to either side are seen immediately.

use crate::error::C3dError;
use crate::frame::{AnalogFormat, AnalogTransform, FrameCodec, PointEncoding};
use crate::header::Header;
use crate::params::{DataType, Dictionary, Parameter};

/// Header and dictionary of one file, plus everything computed from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manager {
    pub header:     Header,
    pub dictionary: Dictionary,
}

/// Header frame counters saturate at this value; longer trials store the
/// real count in parameters.
const FRAME_COUNTER_MAX: u16 = u16::MAX;

impl Manager {
    pub fn new(header: Header, dictionary: Dictionary) -> Self {
        Self { header, dictionary }
    }

    pub fn get(&self, path: &str) -> Option<&Parameter> {
        self.dictionary.get(path)
    }

    pub fn get_i16(&self, path: &str) -> Option<i16> {
        self.get(path).and_then(Parameter::as_i16)
    }

    pub fn get_u16(&self, path: &str) -> Option<u16> {
        self.get(path).and_then(Parameter::as_u16)
    }

    pub fn get_u32(&self, path: &str) -> Option<u32> {
        self.get(path).and_then(Parameter::as_u32)
    }

    pub fn get_f32(&self, path: &str) -> Option<f32> {
        self.get(path).and_then(Parameter::as_f32)
    }

    pub fn get_string(&self, path: &str) -> Option<String> {
        self.get(path).map(Parameter::as_string)
    }

    /// Blocks the encoded dictionary occupies.
    pub fn parameter_blocks(&self) -> usize {
        self.dictionary.block_count()
    }

    // ── Point geometry ───────────────────────────────────────────────────────

    pub fn point_used(&self) -> usize {
        usize::from(self.get_u16("POINT:USED").unwrap_or(self.header.point_count))
    }

    /// Signed: the sign selects float or integer storage.
    pub fn point_scale(&self) -> f32 {
        self.get_f32("POINT:SCALE").unwrap_or(self.header.scale_factor)
    }

    pub fn point_encoding(&self) -> PointEncoding {
        PointEncoding::from_scale(self.point_scale())
    }

    pub fn point_rate(&self) -> f32 {
        self.get_f32("POINT:RATE").unwrap_or(self.header.frame_rate)
    }

    // ── Analog geometry ──────────────────────────────────────────────────────

    /// Number of analog channels.
    pub fn analog_used(&self) -> usize {
        match self.get_u16("ANALOG:USED") {
            Some(used) => usize::from(used),
            None if self.header.analog_per_frame > 0 => {
                usize::from(self.header.analog_count / self.header.analog_per_frame)
            }
            None => 0,
        }
    }

    pub fn analog_rate(&self) -> f32 {
        self.get_f32("ANALOG:RATE")
            .unwrap_or_else(|| f32::from(self.header.analog_per_frame) * self.point_rate())
    }

    /// Analog samples per channel in one point frame: the ratio of the two
    /// rates when it is a whole number, else the header field.
    pub fn analog_per_frame(&self) -> usize {
        let point_rate = self.point_rate();
        if point_rate > 0.0 {
            let ratio = self.analog_rate() / point_rate;
            if ratio >= 1.0 && ratio.fract() == 0.0 {
                return ratio as usize;
            }
        }
        usize::from(self.header.analog_per_frame)
    }

    pub fn analog_format(&self) -> AnalogFormat {
        if self.point_encoding().is_float() {
            return AnalogFormat::Float;
        }
        let unsigned = self
            .get("ANALOG:FORMAT")
            .map(|p| p.as_string().trim().eq_ignore_ascii_case("UNSIGNED"))
            .unwrap_or(false);
        if let Some(bits) = self.get_i16("ANALOG:BITS") {
            if bits > 16 {
                tracing::warn!("ANALOG:BITS is {}, analog words are read as 16 bits", bits);
            }
        }
        if unsigned { AnalogFormat::Unsigned } else { AnalogFormat::Signed }
    }

    /// `(gen_scale, scales, offsets)` with one scale and offset per channel.
    ///
    /// Channels missing from `ANALOG:SCALE` / `ANALOG:OFFSET` get scale 1 and
    /// offset 0.
    pub fn analog_transform_parameters(&self) -> (f32, Vec<f32>, Vec<i16>) {
        let channels = self.analog_used();
        let gen_scale = self.get_f32("ANALOG:GEN_SCALE").unwrap_or(1.0);

        let mut scales = vec![1.0f32; channels];
        if let Some(p) = self.get("ANALOG:SCALE").filter(|p| p.num_elements() > 0) {
            let stored = p.f32_array();
            if stored.len() < channels {
                tracing::warn!(
                    "ANALOG:SCALE holds {} values for {} channels, missing channels use 1.0",
                    stored.len(),
                    channels
                );
            }
            for (dst, src) in scales.iter_mut().zip(stored) {
                *dst = src;
            }
        }

        let mut offsets = vec![0i16; channels];
        if let Some(p) = self.get("ANALOG:OFFSET").filter(|p| p.num_elements() > 0) {
            let stored = match p.data_type {
                DataType::Int16 => p.i16_array(),
                DataType::Float32 => p.f32_array().into_iter().map(|v| v as i16).collect(),
                DataType::Byte | DataType::Char => p.i8_array().into_iter().map(i16::from).collect(),
            };
            if stored.len() < channels {
                tracing::warn!(
                    "ANALOG:OFFSET holds {} values for {} channels, missing channels use 0",
                    stored.len(),
                    channels
                );
            }
            for (dst, src) in offsets.iter_mut().zip(stored) {
                *dst = src;
            }
        }
        (gen_scale, scales, offsets)
    }

    /// Per-channel transform with the general scale folded into each scale.
    pub fn analog_transform(&self) -> AnalogTransform {
        let (gen_scale, scales, offsets) = self.analog_transform_parameters();
        AnalogTransform {
            scales:  scales.into_iter().map(|s| s * gen_scale).collect(),
            offsets: offsets.into_iter().map(f32::from).collect(),
        }
    }

    pub fn frame_codec(&self) -> FrameCodec {
        FrameCodec {
            encoding:         self.point_encoding(),
            analog_format:    self.analog_format(),
            point_count:      self.point_used(),
            analog_channels:  self.analog_used(),
            analog_per_frame: self.analog_per_frame(),
            transform:        self.analog_transform(),
        }
    }

    // ── Frame range ──────────────────────────────────────────────────────────

    /// Trial frame number of the first stored frame.
    pub fn first_frame(&self) -> u32 {
        self.get_u32("TRIAL:ACTUAL_START_FIELD")
            .unwrap_or_else(|| u32::from(self.header.first_frame))
    }

    /// Trial frame number of the last stored frame (inclusive).
    ///
    /// The header counter is trusted only when it is above the first frame
    /// and not saturated. Otherwise the largest of the counters kept in
    /// parameters wins.
    pub fn last_frame(&self) -> u32 {
        let h = &self.header;
        if h.first_frame < h.last_frame && h.last_frame != FRAME_COUNTER_MAX {
            return u32::from(h.last_frame);
        }
        let candidates = [
            Some(u32::from(h.last_frame)),
            self.get_u32("TRIAL:ACTUAL_END_FIELD"),
            self.get("POINT:LONG_FRAMES").and_then(frame_counter),
            self.get("POINT:FRAMES").and_then(frame_counter),
        ];
        candidates.into_iter().flatten().max().unwrap_or(0)
    }

    /// Frames declared by the metadata, `None` when the range is empty or
    /// inverted.
    pub fn frame_count(&self) -> Option<usize> {
        let (first, last) = (self.first_frame(), self.last_frame());
        (last >= first).then(|| (last - first) as usize + 1)
    }

    // ── Labels and axes ──────────────────────────────────────────────────────

    pub fn point_labels(&self) -> Vec<String> {
        self.get("POINT:LABELS").map(Parameter::string_array).unwrap_or_default()
    }

    pub fn analog_labels(&self) -> Vec<String> {
        self.get("ANALOG:LABELS").map(Parameter::string_array).unwrap_or_default()
    }

    pub fn point_units(&self) -> Option<String> {
        self.get_string("POINT:UNITS").map(|s| s.trim().to_owned())
    }

    pub fn screen_axis_strings(&self) -> Option<(String, String)> {
        let x = self.get_string("POINT:X_SCREEN")?;
        let y = self.get_string("POINT:Y_SCREEN")?;
        Some((x.trim().to_owned(), y.trim().to_owned()))
    }

    /// `POINT:X_SCREEN` and `POINT:Y_SCREEN` as unit vectors.
    pub fn screen_axes(&self) -> Option<([f32; 3], [f32; 3])> {
        let (x, y) = self.screen_axis_strings()?;
        Some((parse_axis(&x)?, parse_axis(&y)?))
    }

    // ── Consistency ──────────────────────────────────────────────────────────

    /// Cross-check header fields against parameters.
    ///
    /// Disagreements are logged. Only two problems are errors: an analog
    /// sample count that the per-frame ratio does not divide, and a data
    /// section that cannot be located.
    pub fn check_metadata(&self) -> Result<(), C3dError> {
        let h = &self.header;

        if h.data_block == 0 || h.data_block <= u16::from(h.parameter_block) {
            return Err(C3dError::InconsistentMetadata(format!(
                "data section at block {} does not follow the parameter section at block {}",
                h.data_block, h.parameter_block
            )));
        }
        if h.analog_per_frame > 0 && h.analog_count % h.analog_per_frame != 0 {
            return Err(C3dError::InconsistentMetadata(format!(
                "{} analog samples per frame are not a multiple of {} samples per channel",
                h.analog_count, h.analog_per_frame
            )));
        }

        if usize::from(h.point_count) != self.point_used() {
            tracing::warn!("inconsistent point count: header {} != POINT:USED {}", h.point_count, self.point_used());
        }
        if h.scale_factor != self.point_scale() {
            tracing::warn!("inconsistent scale factor: header {} != POINT:SCALE {}", h.scale_factor, self.point_scale());
        }
        if h.frame_rate != self.point_rate() {
            tracing::warn!("inconsistent frame rate: header {} != POINT:RATE {}", h.frame_rate, self.point_rate());
        }
        let point_rate = self.point_rate();
        if point_rate > 0.0 {
            let ratio = self.analog_rate() / point_rate;
            if f32::from(h.analog_per_frame) != ratio {
                tracing::warn!(
                    "inconsistent analog rate: header {} per frame != {} / {}",
                    h.analog_per_frame,
                    self.analog_rate(),
                    point_rate
                );
            }
        }
        let count = self.analog_used() * usize::from(h.analog_per_frame);
        if usize::from(h.analog_count) != count {
            tracing::warn!(
                "inconsistent analog count: header {} != {} channels * {} per frame",
                h.analog_count,
                self.analog_used(),
                h.analog_per_frame
            );
        }
        match self.get_u16("POINT:DATA_START") {
            Some(start) if start != h.data_block => {
                tracing::warn!("inconsistent data block: header {} != POINT:DATA_START {}", h.data_block, start);
            }
            Some(_) => {}
            None => tracing::warn!("no POINT:DATA_START, using the header data block"),
        }

        self.check_labels("POINT", self.point_used());
        self.check_labels("ANALOG", self.analog_used());
        Ok(())
    }

    fn check_labels(&self, group: &str, used: usize) {
        let labels = self.get(&format!("{group}:LABELS"));
        if used > 0 {
            for name in ["LABELS", "DESCRIPTIONS"] {
                if self.get(&format!("{group}:{name}")).is_none() {
                    tracing::warn!("missing parameter {}:{}", group, name);
                }
            }
        } else {
            match labels {
                None => tracing::debug!("no {} data in file", group),
                Some(p) if p.num_elements() > 0 => {
                    tracing::warn!("no {} data in file, but {}:LABELS has entries", group, group)
                }
                Some(_) => {}
            }
        }
    }
}

/// A frame counter stored as float, 16-bit word or 32-bit word.
fn frame_counter(p: &Parameter) -> Option<u32> {
    match p.data_type {
        DataType::Float32 => p.as_f32().map(|v| v.max(0.0) as u32),
        DataType::Int16 if p.num_elements() >= 2 => p.as_u32(),
        _ => p.any_uint(),
    }
}

fn parse_axis(s: &str) -> Option<[f32; 3]> {
    let s = s.trim().to_ascii_uppercase();
    let (sign, axis) = match s.as_bytes() {
        [b'-', a] => (-1.0, *a),
        [b'+', a] | [a] => (1.0, *a),
        _ => return None,
    };
    match axis {
        b'X' => Some([sign, 0.0, 0.0]),
        b'Y' => Some([0.0, sign, 0.0]),
        b'Z' => Some([0.0, 0.0, sign]),
        _ => None,
    }
}
