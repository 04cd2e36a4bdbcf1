use crate::byteutils::{decode_fixed32, put_fixed32, put_fixed64, Decoder};
use crate::crc;
use crate::env::{RandomAccessFile, WritableFile};
use crate::error::KVStoneError;
use crate::Result;
use std::convert::TryFrom;

/// Encoded length of a [`BlockHandle`].
pub const BLOCK_HANDLE_LENGTH: usize = 16;

/// Encoded length of a [`Footer`]: the index handle, padding and the magic number.
pub const FOOTER_LENGTH: usize = BLOCK_HANDLE_LENGTH + 8 + 8;

/// Key of the index entry holding the filter block handle. It is always the last
/// entry of the index block. Its handle is all zero when the table has no filter.
pub const FILTER_HANDLE_KEY: &[u8] = b"filter.handle";

pub const TABLE_MAGIC_NUMBER: u64 = 0xdb991122_5eed5eed;

/// 4-byte masked crc after each block.
pub const BLOCK_TRAILER_SIZE: usize = 4;

/// Type byte covered by each block checksum. Blocks are never compressed.
pub const NO_COMPRESSION: u8 = 0;

/// Location of a block inside a table file.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    /// Size of the block contents, excluding the trailer.
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> BlockHandle {
        BlockHandle { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_fixed64(dst, self.offset);
        put_fixed64(dst, self.size);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(BLOCK_HANDLE_LENGTH);
        self.encode_to(&mut dst);
        dst
    }

    pub fn decode_from(decoder: &mut Decoder) -> Result<BlockHandle> {
        let offset = decoder.read_u64()?;
        let size = decoder.read_u64()?;
        Ok(BlockHandle { offset, size })
    }

    pub fn decode(data: &[u8]) -> Result<BlockHandle> {
        BlockHandle::decode_from(&mut Decoder::new(data))
    }

    /// Offset just past the block trailer, `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.offset
            .checked_add(self.size)?
            .checked_add(BLOCK_TRAILER_SIZE as u64)
    }

    /// Check that the block and its trailer end at or before `limit`.
    pub fn check_within(&self, limit: u64) -> Result<()> {
        match self.end() {
            Some(end) if end <= limit => Ok(()),
            _ => Err(KVStoneError::Corruption(format!(
                "block handle {:?} points past offset {}",
                self, limit
            ))),
        }
    }
}

/// Fixed-size tail of every table file.
///
/// ```text
/// +--------------+---------+--------------+
/// | index handle | padding | magic number |
/// +--------------+---------+--------------+
///       16            8           8
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Footer {
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let original_size = dst.len();
        self.index_handle.encode_to(dst);
        put_fixed64(dst, 0);
        put_fixed64(dst, TABLE_MAGIC_NUMBER);
        debug_assert_eq!(dst.len(), original_size + FOOTER_LENGTH);
    }

    pub fn decode(data: &[u8]) -> Result<Footer> {
        if data.len() != FOOTER_LENGTH {
            return Err(KVStoneError::Corruption(format!(
                "footer must be {} bytes, got {}",
                FOOTER_LENGTH,
                data.len()
            )));
        }
        let mut decoder = Decoder::new(data);
        let index_handle = BlockHandle::decode_from(&mut decoder)?;
        decoder.read_u64()?;
        let magic = decoder.read_u64()?;
        if magic != TABLE_MAGIC_NUMBER {
            return Err(KVStoneError::Corruption(
                "not an sstable (bad magic number)".into(),
            ));
        }
        Ok(Footer { index_handle })
    }
}

fn block_checksum(contents: &[u8]) -> u32 {
    crc::extend(crc::value(contents), &[NO_COMPRESSION])
}

/// Append `contents` and its checksum trailer to `file` at `*offset`, advancing the offset.
pub fn write_block<W: WritableFile + ?Sized>(
    file: &mut W,
    contents: &[u8],
    offset: &mut u64,
) -> Result<BlockHandle> {
    let handle = BlockHandle::new(*offset, contents.len() as u64);
    file.append(contents)?;
    let mut trailer = Vec::with_capacity(BLOCK_TRAILER_SIZE);
    put_fixed32(&mut trailer, crc::mask(block_checksum(contents)));
    file.append(&trailer)?;
    *offset += (contents.len() + BLOCK_TRAILER_SIZE) as u64;
    Ok(handle)
}

/// Read the block identified by `handle`, verifying its checksum if asked to.
pub fn read_block(
    file: &dyn RandomAccessFile,
    verify_checksums: bool,
    handle: &BlockHandle,
) -> Result<Vec<u8>> {
    let too_large = || {
        KVStoneError::Corruption(format!("block handle {:?} is too large", handle))
    };
    let n = usize::try_from(handle.size).map_err(|_| too_large())?;
    let total = n.checked_add(BLOCK_TRAILER_SIZE).ok_or_else(too_large)?;
    let mut buf = file.read(handle.offset, total)?;
    if buf.len() != total {
        return Err(KVStoneError::Corruption(format!(
            "truncated block read at offset {}",
            handle.offset
        )));
    }

    if verify_checksums {
        let expected = crc::unmask(decode_fixed32(&buf[n..]));
        let actual = block_checksum(&buf[..n]);
        if actual != expected {
            warn!(
                "block checksum mismatch at offset {}: expected {:#x}, actual {:#x}",
                handle.offset, expected, actual
            );
            return Err(KVStoneError::Corruption("block checksum mismatch".into()));
        }
    }
    buf.truncate(n);
    Ok(buf)
}
