//! Reader and writer for C3D motion-capture files.
//!
//! A file is a sequence of 512-byte blocks:
//!
//! ```text
//! [header][parameter dictionary ...][frame 0][frame 1]...[frame N-1][padding]
//! ```
//!
//! ```no_run
//! use c3dio::{ConversionMode, ReadOptions, Reader};
//!
//! let mut reader = Reader::open_path("walk.c3d")?;
//! for (number, frame) in reader.read_frames(ReadOptions::default())? {
//!     println!("{number}: {:?}", frame.points[0].to_row());
//! }
//! let mut writer = reader.to_writer(ConversionMode::Copy)?;
//! writer.write_path("copy.c3d")?;
//! # Ok::<(), c3dio::C3dError>(())
//! ```

pub mod error;
pub mod layout;
pub mod header;
pub mod params;
pub mod frame;
pub mod manager;
pub mod reader;
pub mod writer;

pub use error::{C3dError, CorruptionError, ErrorKind, FormatError, Result, TruncatedFrame};
pub use header::{Event, Header};
pub use params::{DataType, Dictionary, Group, ParamValue, Parameter};
pub use frame::{AnalogBlock, AnalogFormat, AnalogMode, AnalogTransform, Frame, FrameCodec, Point, PointEncoding};
pub use manager::Manager;
pub use reader::{FrameIter, ReadOptions, ReadStatus, Reader, ReaderState};
pub use writer::{ConversionMode, Writer, WriterOptions};
