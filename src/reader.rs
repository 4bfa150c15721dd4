//! Reading C3D files.
//!
//! ```text
//! Closed ─open─► HeaderParsed ─► DictionaryParsed ─read_frames─► Streaming ─► Exhausted
//! ```
//!
//! [`Reader::open`] walks the first three states and fails at whichever
//! stage breaks. Frames are pulled lazily through [`FrameIter`]; a file that
//! ends early stops the iterator cleanly and leaves a
//! [`ReadStatus::Truncated`] behind instead of an error.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::C3dError;
use crate::frame::{AnalogMode, Frame, FrameCodec};
use crate::header::Header;
use crate::layout::{block_offset, BLOCK_SIZE};
use crate::manager::Manager;
use crate::params::{Dictionary, Parameter};
use crate::writer::{ConversionMode, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Closed,
    HeaderParsed,
    DictionaryParsed,
    Streaming,
    Exhausted,
}

/// How the last frame iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    InProgress { read: usize },
    /// Every declared frame was read.
    Complete { frames: usize },
    /// The source ended before `expected` frames; `read` were complete.
    Truncated { expected: usize, read: usize },
    /// An I/O error other than end-of-file stopped iteration.
    Interrupted { read: usize, kind: io::ErrorKind },
}

impl ReadStatus {
    pub fn frames_read(&self) -> usize {
        match *self {
            ReadStatus::InProgress { read }
            | ReadStatus::Truncated { read, .. }
            | ReadStatus::Interrupted { read, .. } => read,
            ReadStatus::Complete { frames } => frames,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ReadStatus::Complete { .. })
    }
}

/// Per-call options for [`Reader::read_frames`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub analog: AnalogMode,
}

impl ReadOptions {
    pub fn raw() -> Self {
        Self { analog: AnalogMode::Raw }
    }
}

pub struct Reader<R> {
    inner:       R,
    manager:     Manager,
    state:       ReaderState,
    frame_count: usize,
    last_status: Option<ReadStatus>,
}

impl Reader<BufReader<File>> {
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, C3dError> {
        Self::open(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> Reader<R> {
    /// Parse the header and the parameter dictionary.
    ///
    /// A source whose metadata does not declare a usable frame range gets
    /// its frame count from the length of the data section.
    pub fn open(mut inner: R) -> Result<Self, C3dError> {
        let header = Header::read(&mut inner)?;
        tracing::debug!(
            "header: {} points, {} analog words/frame, data at block {}",
            header.point_count,
            header.analog_count,
            header.data_block
        );
        let dictionary = Dictionary::read(&mut inner, header.parameter_block)?;
        let manager = Manager::new(header, dictionary);
        manager.check_metadata()?;

        let end = inner.seek(SeekFrom::End(0))?;
        let data_start = block_offset(manager.header.data_block);
        let frame_size = manager.frame_codec().frame_size() as u64;
        let frame_count = match manager.frame_count() {
            Some(n) => n,
            None if frame_size > 0 => {
                let n = (end.saturating_sub(data_start) / frame_size) as usize;
                tracing::warn!("frame range not declared, {} frames derived from data length", n);
                n
            }
            None => 0,
        };

        Ok(Self {
            inner,
            manager,
            state: ReaderState::DictionaryParsed,
            frame_count,
            last_status: None,
        })
    }

    /// Iterate frames from the start of the data section.
    ///
    /// Each call seeks back to the first frame, so the reader can be
    /// iterated any number of times.
    pub fn read_frames(&mut self, options: ReadOptions) -> Result<FrameIter<'_, R>, C3dError> {
        let codec = self.manager.frame_codec();
        self.inner.seek(SeekFrom::Start(block_offset(self.manager.header.data_block)))?;
        self.state = ReaderState::Streaming;
        self.last_status = Some(ReadStatus::InProgress { read: 0 });
        let buf = vec![0u8; codec.frame_size()];
        let first_frame = self.manager.first_frame();
        Ok(FrameIter {
            total: self.frame_count,
            reader: self,
            codec,
            mode: options.analog,
            buf,
            first_frame,
            index: 0,
            status: ReadStatus::InProgress { read: 0 },
        })
    }

    /// Read every frame into memory.
    pub fn read_all(&mut self, options: ReadOptions) -> Result<(Vec<Frame>, ReadStatus), C3dError> {
        let mut iter = self.read_frames(options)?;
        let frames: Vec<Frame> = iter.by_ref().map(|(_, frame)| frame).collect();
        let status = iter.status();
        Ok((frames, status))
    }

    /// A writer holding a deep copy of this file's metadata and, depending
    /// on `mode`, its frames.
    pub fn to_writer(&mut self, mode: ConversionMode) -> Result<Writer, C3dError> {
        Writer::from_reader(self, mode)
    }

    /// Like [`to_writer`](Self::to_writer), consuming the reader.
    pub fn into_writer(mut self, mode: ConversionMode) -> Result<Writer, C3dError> {
        self.to_writer(mode)
    }
}

impl<R> Reader<R> {
    pub fn header(&self) -> &Header {
        &self.manager.header
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.manager.dictionary
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    /// Look up `"GROUP:PARAMETER"`.
    pub fn get(&self, path: &str) -> Option<&Parameter> {
        self.manager.get(path)
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Frames the file declares (or that fit in its data section).
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn first_frame(&self) -> u32 {
        self.manager.first_frame()
    }

    pub fn last_frame(&self) -> u32 {
        self.manager.last_frame()
    }

    pub fn point_count(&self) -> usize {
        self.manager.point_used()
    }

    pub fn analog_channels(&self) -> usize {
        self.manager.analog_used()
    }

    pub fn point_labels(&self) -> Vec<String> {
        self.manager.point_labels()
    }

    pub fn analog_labels(&self) -> Vec<String> {
        self.manager.analog_labels()
    }

    /// Outcome of the most recent frame iteration, if any.
    pub fn last_status(&self) -> Option<ReadStatus> {
        self.last_status
    }

    /// Hand back the source. The reader never closes it.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Lazy frame iterator yielding `(frame_number, frame)`.
///
/// Frame numbers start at the file's first frame. Iteration ends after the
/// declared frame count or at the first incomplete frame.
pub struct FrameIter<'a, R> {
    reader:      &'a mut Reader<R>,
    codec:       FrameCodec,
    mode:        AnalogMode,
    buf:         Vec<u8>,
    first_frame: u32,
    total:       usize,
    index:       usize,
    status:      ReadStatus,
}

impl<R: Read + Seek> FrameIter<'_, R> {
    pub fn status(&self) -> ReadStatus {
        self.status
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    fn finish(&mut self, status: ReadStatus) {
        self.status = status;
        self.reader.last_status = Some(status);
        self.reader.state = ReaderState::Exhausted;
        if status.is_complete() {
            self.warn_on_trailing_data();
        }
    }

    fn warn_on_trailing_data(&mut self) {
        let inner = &mut self.reader.inner;
        let remaining = inner
            .stream_position()
            .and_then(|pos| inner.seek(SeekFrom::End(0)).map(|end| end.saturating_sub(pos)));
        if let Ok(remaining) = remaining {
            if remaining >= BLOCK_SIZE as u64 {
                tracing::warn!("{} bytes remain after the last declared frame", remaining);
            }
        }
    }
}

impl<R: Read + Seek> Iterator for FrameIter<'_, R> {
    type Item = (u32, Frame);

    fn next(&mut self) -> Option<Self::Item> {
        if !matches!(self.status, ReadStatus::InProgress { .. }) {
            return None;
        }
        if self.index >= self.total {
            self.finish(ReadStatus::Complete { frames: self.index });
            return None;
        }

        let filled = match read_full(&mut self.reader.inner, &mut self.buf) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("read failed at frame index {}: {}", self.index, e);
                self.finish(ReadStatus::Interrupted { read: self.index, kind: e.kind() });
                return None;
            }
        };
        match self.codec.decode(&self.buf[..filled], self.mode) {
            Ok(frame) => {
                let number = self.first_frame.saturating_add(self.index as u32);
                self.index += 1;
                self.status = ReadStatus::InProgress { read: self.index };
                self.reader.last_status = Some(self.status);
                Some((number, frame))
            }
            Err(short) => {
                tracing::warn!(
                    "end of data at frame index {} ({} of {} bytes), expected {} frames",
                    self.index,
                    short.available,
                    short.expected,
                    self.total
                );
                self.finish(ReadStatus::Truncated { expected: self.total, read: self.index });
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.total.saturating_sub(self.index)))
    }
}

/// Fill `buf` as far as the source allows; returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
