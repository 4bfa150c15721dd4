//! Per-frame point and analog payloads. Invalid points (negative residual
//! word, `i16::MIN` coordinate or `NaN`) all decode to [`Point::invalid`].

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{C3dError, TruncatedFrame};

/// Storage of point coordinates, chosen by the sign of the point scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointEncoding {
    /// Coordinates stored as `f32` in final units. `scale` is the magnitude
    /// and only applies to the residual.
    Float { scale: f32 },
    /// Coordinates stored as `i16`; real value = word × `scale`.
    Integer { scale: f32 },
}

impl PointEncoding {
    /// Resolve from a signed scale factor. A zero scale is read as 1.
    pub fn from_scale(scale: f32) -> Self {
        let magnitude = if scale == 0.0 || !scale.is_finite() { 1.0 } else { scale.abs() };
        if scale < 0.0 {
            PointEncoding::Float { scale: magnitude }
        } else {
            PointEncoding::Integer { scale: magnitude }
        }
    }

    pub fn scale(self) -> f32 {
        match self {
            PointEncoding::Float { scale } | PointEncoding::Integer { scale } => scale,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, PointEncoding::Float { .. })
    }

    /// Bytes per stored word.
    pub fn word_size(self) -> usize {
        if self.is_float() { 4 } else { 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogFormat {
    Float,
    Signed,
    Unsigned,
}

impl AnalogFormat {
    pub fn word_size(self) -> usize {
        match self {
            AnalogFormat::Float => 4,
            AnalogFormat::Signed | AnalogFormat::Unsigned => 2,
        }
    }
}

/// Whether analog samples pass through the channel scale/offset transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalogMode {
    /// `(raw - offset) * scale * gen_scale`
    #[default]
    Transformed,
    /// Stored values, untouched. Needed for exact round trips.
    Raw,
}

// ── Points ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Negative for an invalid point.
    pub residual: f32,
    /// One bit per camera that saw the marker (7 cameras).
    pub cameras: u8,
}

impl Point {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, residual: 0.0, cameras: 0 }
    }

    pub const fn invalid() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, residual: -1.0, cameras: 0 }
    }

    pub fn with_residual(mut self, residual: f32, cameras: u8) -> Self {
        self.residual = residual;
        self.cameras = cameras;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.residual >= 0.0 && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// `[x, y, z, residual, cameras]`; invalid points read `[0, 0, 0, -1, -1]`.
    pub fn to_row(&self) -> [f32; 5] {
        if self.is_valid() {
            [self.x, self.y, self.z, self.residual, f32::from(self.cameras)]
        } else {
            [0.0, 0.0, 0.0, -1.0, -1.0]
        }
    }

    /// Inverse of [`to_row`](Self::to_row). A negative residual gives an invalid point.
    pub fn from_row(row: [f32; 5]) -> Self {
        if row[3] < 0.0 {
            return Self::invalid();
        }
        Self { x: row[0], y: row[1], z: row[2], residual: row[3], cameras: row[4].max(0.0) as u8 }
    }

    /// Number of cameras that observed the marker.
    pub fn camera_count(&self) -> u32 {
        (self.cameras & 0x7f).count_ones()
    }
}

// ── Analog ───────────────────────────────────────────────────────────────────

/// Analog samples of one frame, `sub_samples` rows of `channels` values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalogBlock {
    sub_samples: usize,
    channels:    usize,
    data:        Vec<f32>,
}

impl AnalogBlock {
    /// `data` is row-major: all channels of sample 0, then sample 1, ...
    pub fn new(sub_samples: usize, channels: usize, data: Vec<f32>) -> Result<Self, C3dError> {
        if data.len() != sub_samples * channels {
            return Err(C3dError::Shape(format!(
                "{} analog values do not fill {sub_samples} samples of {channels} channels",
                data.len()
            )));
        }
        Ok(Self { sub_samples, channels, data })
    }

    pub fn zeros(sub_samples: usize, channels: usize) -> Self {
        Self { sub_samples, channels, data: vec![0.0; sub_samples * channels] }
    }

    pub fn sub_samples(&self) -> usize {
        self.sub_samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.sub_samples, self.channels)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, sample: usize) -> Option<&[f32]> {
        let start = sample.checked_mul(self.channels)?;
        self.data.get(start..start + self.channels).filter(|_| sample < self.sub_samples)
    }

    pub fn get(&self, sample: usize, channel: usize) -> Option<f32> {
        if channel >= self.channels {
            return None;
        }
        self.row(sample).map(|r| r[channel])
    }

    /// Samples of one channel across the frame.
    pub fn channel(&self, channel: usize) -> Vec<f32> {
        (0..self.sub_samples).filter_map(|s| self.get(s, channel)).collect()
    }
}

// ── Frame ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub points: Vec<Point>,
    pub analog: AnalogBlock,
}

impl Frame {
    pub fn new(points: Vec<Point>, analog: AnalogBlock) -> Self {
        Self { points, analog }
    }

    /// All points invalid, all analog samples zero.
    pub fn empty(point_count: usize, sub_samples: usize, channels: usize) -> Self {
        Self {
            points: vec![Point::invalid(); point_count],
            analog: AnalogBlock::zeros(sub_samples, channels),
        }
    }

    /// `(point count, analog sub-samples, analog channels)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.points.len(), self.analog.sub_samples, self.analog.channels)
    }

    pub fn point_rows(&self) -> Vec<[f32; 5]> {
        self.points.iter().map(Point::to_row).collect()
    }
}

/// Per-channel analog scale (general scale folded in) and offset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalogTransform {
    pub scales:  Vec<f32>,
    pub offsets: Vec<f32>,
}

impl AnalogTransform {
    pub fn identity(channels: usize) -> Self {
        Self { scales: vec![1.0; channels], offsets: vec![0.0; channels] }
    }

    fn apply(&self, channel: usize, raw: f32) -> f32 {
        let scale = self.scales.get(channel).copied().unwrap_or(1.0);
        let offset = self.offsets.get(channel).copied().unwrap_or(0.0);
        (raw - offset) * scale
    }

    fn invert(&self, channel: usize, value: f32) -> f32 {
        let scale = self.scales.get(channel).copied().unwrap_or(1.0);
        let offset = self.offsets.get(channel).copied().unwrap_or(0.0);
        if scale == 0.0 { offset } else { value / scale + offset }
    }
}

// ── Codec ────────────────────────────────────────────────────────────────────

/// Everything needed to move one frame between bytes and [`Frame`].
#[derive(Debug, Clone, PartialEq)]
pub struct FrameCodec {
    pub encoding:         PointEncoding,
    pub analog_format:    AnalogFormat,
    pub point_count:      usize,
    pub analog_channels:  usize,
    pub analog_per_frame: usize,
    pub transform:        AnalogTransform,
}

impl FrameCodec {
    pub fn point_bytes(&self) -> usize {
        self.point_count * 4 * self.encoding.word_size()
    }

    pub fn analog_bytes(&self) -> usize {
        self.analog_channels * self.analog_per_frame * self.analog_format.word_size()
    }

    pub fn frame_size(&self) -> usize {
        self.point_bytes() + self.analog_bytes()
    }

    pub fn decode(&self, buf: &[u8], mode: AnalogMode) -> Result<Frame, TruncatedFrame> {
        let expected = self.frame_size();
        if buf.len() < expected {
            return Err(TruncatedFrame { expected, available: buf.len() });
        }
        let (point_buf, analog_buf) = buf[..expected].split_at(self.point_bytes());

        let points = match self.encoding {
            PointEncoding::Float { scale } => point_buf
                .chunks_exact(16)
                .map(|w| {
                    let coords = [
                        LittleEndian::read_f32(&w[0..4]),
                        LittleEndian::read_f32(&w[4..8]),
                        LittleEndian::read_f32(&w[8..12]),
                    ];
                    let word = LittleEndian::read_f32(&w[12..16]);
                    let finite = coords.iter().all(|c| c.is_finite()) && word.is_finite();
                    decode_point(coords, word as i32, scale, !finite)
                })
                .collect(),
            PointEncoding::Integer { scale } => point_buf
                .chunks_exact(8)
                .map(|w| {
                    let ints = [
                        LittleEndian::read_i16(&w[0..2]),
                        LittleEndian::read_i16(&w[2..4]),
                        LittleEndian::read_i16(&w[4..6]),
                    ];
                    let word = LittleEndian::read_i16(&w[6..8]);
                    let sentinel = ints.contains(&i16::MIN);
                    let coords = ints.map(|i| f32::from(i) * scale);
                    decode_point(coords, i32::from(word), scale, sentinel)
                })
                .collect(),
        };

        let channels = self.analog_channels;
        let width = self.analog_format.word_size();
        let data = analog_buf
            .chunks_exact(width)
            .enumerate()
            .map(|(k, w)| {
                let raw = match self.analog_format {
                    AnalogFormat::Float    => LittleEndian::read_f32(w),
                    AnalogFormat::Signed   => f32::from(LittleEndian::read_i16(w)),
                    AnalogFormat::Unsigned => f32::from(LittleEndian::read_u16(w)),
                };
                match mode {
                    AnalogMode::Raw         => raw,
                    AnalogMode::Transformed => self.transform.apply(k % channels, raw),
                }
            })
            .collect();
        let sub_samples = if channels == 0 { 0 } else { self.analog_per_frame };

        Ok(Frame { points, analog: AnalogBlock { sub_samples, channels, data } })
    }

    /// Append the encoded frame to `out`. `mode` states whether the frame's
    /// analog values are physical (and need the inverse transform) or raw.
    pub fn encode(&self, frame: &Frame, mode: AnalogMode, out: &mut Vec<u8>) -> Result<(), C3dError> {
        if frame.points.len() != self.point_count {
            return Err(C3dError::Shape(format!(
                "frame has {} points, expected {}",
                frame.points.len(),
                self.point_count
            )));
        }
        let sub_samples = if self.analog_channels == 0 { 0 } else { self.analog_per_frame };
        if frame.analog.shape() != (sub_samples, self.analog_channels) && !frame.analog.is_empty() {
            return Err(C3dError::Shape(format!(
                "analog block is {:?}, expected {:?}",
                frame.analog.shape(),
                (sub_samples, self.analog_channels)
            )));
        }
        out.reserve(self.frame_size());

        for p in &frame.points {
            let valid = p.is_valid();
            match self.encoding {
                PointEncoding::Float { scale } => {
                    if valid {
                        out.write_f32::<LittleEndian>(p.x)?;
                        out.write_f32::<LittleEndian>(p.y)?;
                        out.write_f32::<LittleEndian>(p.z)?;
                        out.write_f32::<LittleEndian>(f32::from(residual_word(p, scale)))?;
                    } else {
                        out.write_f32::<LittleEndian>(0.0)?;
                        out.write_f32::<LittleEndian>(0.0)?;
                        out.write_f32::<LittleEndian>(0.0)?;
                        out.write_f32::<LittleEndian>(-1.0)?;
                    }
                }
                PointEncoding::Integer { scale } => {
                    if valid {
                        out.write_i16::<LittleEndian>(quantize(p.x / scale))?;
                        out.write_i16::<LittleEndian>(quantize(p.y / scale))?;
                        out.write_i16::<LittleEndian>(quantize(p.z / scale))?;
                        out.write_i16::<LittleEndian>(residual_word(p, scale) as i16)?;
                    } else {
                        out.write_i16::<LittleEndian>(0)?;
                        out.write_i16::<LittleEndian>(0)?;
                        out.write_i16::<LittleEndian>(0)?;
                        out.write_i16::<LittleEndian>(-1)?;
                    }
                }
            }
        }

        if frame.analog.is_empty() {
            // A frame without samples gets zeroed analog words.
            out.resize(out.len() + self.analog_bytes(), 0);
            return Ok(());
        }
        let channels = self.analog_channels;
        for (k, &v) in frame.analog.data.iter().enumerate() {
            let stored = match mode {
                AnalogMode::Raw         => v,
                AnalogMode::Transformed => self.transform.invert(k % channels, v),
            };
            match self.analog_format {
                AnalogFormat::Float    => out.write_f32::<LittleEndian>(stored)?,
                AnalogFormat::Signed   => out.write_i16::<LittleEndian>(quantize(stored))?,
                AnalogFormat::Unsigned => {
                    out.write_u16::<LittleEndian>(stored.round().clamp(0.0, f32::from(u16::MAX)) as u16)?
                }
            }
        }
        Ok(())
    }
}

fn decode_point(coords: [f32; 3], word: i32, scale: f32, marked_invalid: bool) -> Point {
    if word < 0 || marked_invalid {
        return Point::invalid();
    }
    Point {
        x: coords[0],
        y: coords[1],
        z: coords[2],
        residual: (word & 0xff) as f32 * scale,
        cameras: ((word & 0x7f00) >> 8) as u8,
    }
}

/// Low byte residual / |scale|, high byte camera mask. Always non-negative.
fn residual_word(p: &Point, scale: f32) -> u16 {
    let residual = (p.residual / scale).round().clamp(0.0, 255.0) as u16;
    residual | (u16::from(p.cameras & 0x7f) << 8)
}

/// Round to the nearest integer word; `i16::MIN` is reserved.
fn quantize(v: f32) -> i16 {
    let limit = f32::from(i16::MAX);
    v.round().clamp(-limit, limit) as i16
}
