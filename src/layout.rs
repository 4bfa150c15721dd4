//! Block arithmetic for the C3D container.
//!
//! Every section starts on a 512-byte block boundary and block indices are
//! 1-based: block `n` covers bytes `(n - 1) * 512 .. n * 512`. The header
//! always occupies block 1.

use std::io::{self, Seek, SeekFrom, Write};

/// Unit of allocation for every section of the file.
pub const BLOCK_SIZE: usize = 512;

/// Byte offset of the first byte of 1-based block `block`.
///
/// Block 0 is not a valid index; it is treated as block 1 so that a zeroed
/// pointer still resolves to the start of the buffer.
pub fn block_offset(block: u16) -> u64 {
    u64::from(block.saturating_sub(1)) * BLOCK_SIZE as u64
}

/// Number of whole blocks needed to hold `bytes`.
pub fn blocks_for(bytes: usize) -> usize {
    bytes.div_ceil(BLOCK_SIZE)
}

/// Zero bytes needed after `len` bytes to reach the next block boundary.
pub fn padding_for(len: u64) -> usize {
    let rem = (len % BLOCK_SIZE as u64) as usize;
    if rem == 0 { 0 } else { BLOCK_SIZE - rem }
}

/// Block index at which the data section starts, given where the parameter
/// section starts and how many blocks it spans.
pub fn data_start_block(parameter_block: u8, parameter_blocks: usize) -> u16 {
    (usize::from(parameter_block) + parameter_blocks).min(usize::from(u16::MAX)) as u16
}

/// Pad the sink with zeros up to the next block boundary.
pub fn pad_to_block<W: Write + Seek>(writer: &mut W) -> io::Result<()> {
    let pos = writer.stream_position()?;
    let pad = padding_for(pos);
    if pad > 0 {
        writer.write_all(&[0u8; BLOCK_SIZE][..pad])?;
    }
    Ok(())
}

/// Write zeros from the current position until `offset` is reached.
///
/// Fails if the sink is already past `offset`: sections must be emitted in
/// file order.
pub fn zero_fill_to<W: Write + Seek>(writer: &mut W, offset: u64) -> io::Result<()> {
    let pos = writer.stream_position()?;
    if pos > offset {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("section overlap: at byte {pos}, next section starts at {offset}"),
        ));
    }
    let mut remaining = offset - pos;
    let zeros = [0u8; BLOCK_SIZE];
    while remaining > 0 {
        let n = remaining.min(BLOCK_SIZE as u64) as usize;
        writer.write_all(&zeros[..n])?;
        remaining -= n as u64;
    }
    writer.seek(SeekFrom::Start(offset))?;
    Ok(())
}
