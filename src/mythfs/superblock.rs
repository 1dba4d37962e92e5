//! The bootstrap chunk and the volume superblock (`FsMeta`).

use std::mem::size_of;
use std::slice;

use crate::crc32;
use crate::error::FormatError;
use crate::volume::Volume;

/// Tail marker every superblock ends with, just before its checksum.
pub const TAIL_MAGIC: u32 = 0xb10f5cc7;

/// The bootstrap chunk's header.
pub const BOOTSTRAP_HEADER: [u8; 4] = *b"MYTH";

/// The superblock's header.
pub const SUPERBLOCK_HEADER: [u8; 6] = *b"FSMETA";

/// Byte offset of the bootstrap chunk within the image.
pub const BOOTSTRAP_OFFSET: u64 = 2;

/// `CreatorID` value stamped by this tool when formatting a volume or
/// creating a node on behalf of the system.
pub const CREATOR_ID_MYTH_TOOL: u8 = 1;
/// `CreatorID` value stamped on a node created on behalf of an ordinary
/// (non-system) caller, e.g. via `myth createonroot` without `--system`.
pub const CREATOR_ID_USER: u8 = 0;

/// Filesystem error state: clean.
pub const ERROR_STATE_NORMAL: u8 = 0;
/// Filesystem error action: take no special action.
pub const ERROR_ACTION_NONE: u8 = 0;

/// The number of inline bytes stored directly in a node record.
pub const INLINE_DATA_SIZE: usize = 64;
/// The number of direct block pointers stored in a node record.
pub const DIRECT_BLOCK_COUNT: usize = 12;

/// The 14-byte bootstrap chunk written at byte offset 2 of the image.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct BootstrapChunk {
    pub header: [u8; 4],
    pub bytes_per_block: u16,
    pub file_system_offset: u64,
}

impl BootstrapChunk {
    /// Reads the bootstrap chunk from the image.
    pub fn read(volume: &mut Volume) -> Result<Self, FormatError> {
        let mut chunk: Self = unsafe { std::mem::zeroed() };
        let buf = unsafe {
            slice::from_raw_parts_mut(&mut chunk as *mut _ as *mut u8, size_of::<Self>())
        };
        volume.read_at(BOOTSTRAP_OFFSET, buf)?;
        if chunk.header != BOOTSTRAP_HEADER {
            return Err(FormatError::InvalidConfigHeader);
        }
        Ok(chunk)
    }

    /// Writes the bootstrap chunk to the image.
    pub fn write(&self, volume: &mut Volume) -> Result<(), FormatError> {
        let buf =
            unsafe { slice::from_raw_parts(self as *const _ as *const u8, size_of::<Self>()) };
        volume.write_at(BOOTSTRAP_OFFSET, buf)?;
        Ok(())
    }
}

/// The volume's superblock (`FsMeta`). Declaration order matches the on-disk
/// layout exactly; this type is `repr(C, packed)` so no implicit padding is
/// introduced.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct FsMeta {
    pub header: [u8; 6],
    pub flags: u32,
    pub fs_major: u16,
    pub revision: u16,
    pub vendor_id: [u8; 12],
    pub block_size: u16,
    pub size: u64,
    pub node_capacity: u32,
    pub origin: u64,
    pub num_allocated_blocks: u64,
    pub num_allocated_nodes: u32,
    pub volume_name: [u8; 32],
    pub creator_id: u8,
    pub ts_created: u64,
    pub ts_mounted: u64,
    pub unique_id: [u8; 16],
    pub error_state: u8,
    pub error_action: u8,
    pub addr_bitmap: u64,
    pub addr_node_table: u64,
    pub addr_data: u64,
    pub addr_extension: u64,
    pub last_allocated_node_id: u32,
    pub last_allocated_data_block: u64,
    pub tail: u32,
    pub checksum: u32,
}

impl FsMeta {
    /// Byte offset, from the start of the superblock, of the `checksum`
    /// field. Everything before this offset is covered by the checksum.
    const CHECKSUM_OFFSET: usize = size_of::<Self>() - size_of::<u32>();

    /// Returns the byte offset of the superblock within the image.
    pub fn disk_offset(&self) -> u64 {
        self.origin * self.block_size as u64
    }

    fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self as *const _ as *const u8, size_of::<Self>()) }
    }

    /// Recomputes and stores this superblock's checksum.
    pub fn update_checksum(&mut self) {
        self.checksum = crc32::checksum(&self.as_bytes()[..Self::CHECKSUM_OFFSET]);
    }

    /// Number of bytes per node-table slot.
    pub const NODE_SIZE: u64 = 256;

    /// Writes the superblock to its block, zero-padding the remainder of the
    /// block.
    pub fn write(&mut self, volume: &mut Volume) -> Result<(), FormatError> {
        self.update_checksum();
        let off = self.disk_offset();
        volume.write_at(off, self.as_bytes())?;
        let remaining = self.block_size as u64 - size_of::<Self>() as u64;
        if remaining > 0 {
            let zeros = vec![0u8; remaining as usize];
            volume.write_at(off + size_of::<Self>() as u64, &zeros)?;
        }
        Ok(())
    }

    /// Reads and validates the superblock located by the bootstrap chunk.
    pub fn read(volume: &mut Volume) -> Result<Self, FormatError> {
        let chunk = BootstrapChunk::read(volume)?;
        let off = chunk.file_system_offset * chunk.bytes_per_block as u64;
        let mut meta: Self = unsafe { std::mem::zeroed() };
        let buf =
            unsafe { slice::from_raw_parts_mut(&mut meta as *mut _ as *mut u8, size_of::<Self>()) };
        volume.read_at(off, buf)?;
        if meta.header != SUPERBLOCK_HEADER {
            return Err(FormatError::InvalidHeader);
        }
        if meta.tail != TAIL_MAGIC {
            return Err(FormatError::InvalidTail);
        }
        let expected = crc32::checksum(&meta.as_bytes()[..Self::CHECKSUM_OFFSET]);
        if expected != meta.checksum {
            return Err(FormatError::InvalidChecksum);
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_meta() -> FsMeta {
        let mut m = FsMeta {
            header: SUPERBLOCK_HEADER,
            flags: 0,
            fs_major: 1,
            revision: 0,
            vendor_id: [0; 12],
            block_size: 512,
            size: 1024,
            node_capacity: 30,
            origin: 0,
            num_allocated_blocks: 2,
            num_allocated_nodes: 0,
            volume_name: [0; 32],
            creator_id: CREATOR_ID_MYTH_TOOL,
            ts_created: 1,
            ts_mounted: 0,
            unique_id: [b'a'; 16],
            error_state: ERROR_STATE_NORMAL,
            error_action: ERROR_ACTION_NONE,
            addr_bitmap: 1,
            addr_node_table: 2,
            addr_data: 17,
            addr_extension: 0,
            last_allocated_node_id: 0,
            last_allocated_data_block: 17,
            tail: TAIL_MAGIC,
            checksum: 0,
        };
        m.update_checksum();
        m
    }

    #[test]
    fn checksum_excludes_itself() {
        let m = sample_meta();
        let bytes = m.as_bytes();
        let expected = crc32::checksum(&bytes[..FsMeta::CHECKSUM_OFFSET]);
        let checksum = m.checksum;
        assert_eq!(checksum, expected);
    }

    #[test]
    fn size_is_tight() {
        // No implicit padding: every declared field contributes exactly its
        // own width.
        assert_eq!(
            size_of::<FsMeta>(),
            6 + 4 + 2 + 2 + 12 + 2 + 8 + 4 + 8 + 8 + 4 + 32 + 1 + 8 + 8 + 16 + 1 + 1 + 8 + 8 + 8
                + 8
                + 4
                + 8
                + 4
                + 4
        );
    }

    #[test]
    fn tampering_breaks_checksum() {
        let mut m = sample_meta();
        let good = m.checksum;
        m.num_allocated_nodes += 1;
        m.checksum = good;
        let bytes = m.as_bytes();
        let recomputed = crc32::checksum(&bytes[..FsMeta::CHECKSUM_OFFSET]);
        assert_ne!(recomputed, good);
    }
}
