//! The free-block bitmap: one bit per block in `[AddrNodeTable, Size)`.

use crate::superblock::FsMeta;
use crate::volume::Volume;

/// The state of a single block, as reported by the bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitState {
    Free,
    Allocated,
    /// The queried block is below `AddrNodeTable` and is not tracked by the
    /// bitmap at all (permanently allocated).
    Invalid,
}

/// The resolved position of a block's bit within the bitmap region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitPos {
    pub bitmap_block: u64,
    pub byte_offset: u64,
    pub bit_offset: u8,
}

/// Number of blocks tracked by one bitmap block.
fn tracked_per_block(block_size: u16) -> u64 {
    block_size as u64 * 8
}

/// Resolves the block's position within the bitmap.
///
/// `block` must be `>= meta.addr_node_table`; callers are expected to have
/// already rejected out-of-range blocks via [`check_block`]/[`set_block`].
pub fn resolve_from_block(meta: &FsMeta, block: u64) -> BitPos {
    let tracked = block - meta.addr_node_table;
    let per_block = tracked_per_block(meta.block_size);
    BitPos {
        bitmap_block: meta.addr_bitmap + tracked / per_block,
        byte_offset: (tracked % per_block) / 8,
        bit_offset: (tracked % 8) as u8,
    }
}

/// Inverse of [`resolve_from_block`].
pub fn resolve_to_block(meta: &FsMeta, pos: BitPos) -> u64 {
    let per_block = tracked_per_block(meta.block_size);
    meta.addr_node_table
        + (pos.bitmap_block - meta.addr_bitmap) * per_block
        + pos.byte_offset * 8
        + pos.bit_offset as u64
}

/// Checks the allocation state of a single block.
pub fn check_block(meta: &FsMeta, volume: &mut Volume, block: u64) -> std::io::Result<BitState> {
    if block < meta.addr_node_table {
        return Ok(BitState::Invalid);
    }
    let pos = resolve_from_block(meta, block);
    let byte_off = pos.bitmap_block * meta.block_size as u64 + pos.byte_offset;
    let byte = volume.read_byte_at(byte_off)?;
    if byte & (1 << pos.bit_offset) != 0 {
        Ok(BitState::Allocated)
    } else {
        Ok(BitState::Free)
    }
}

/// Sets the allocation state of a single block.
///
/// Refuses `block == 0` and `block < AddrNodeTable`, reporting them as
/// [`BitState::Invalid`] rather than performing the write.
pub fn set_block(
    meta: &FsMeta,
    volume: &mut Volume,
    block: u64,
    state: BitState,
) -> std::io::Result<BitState> {
    if block == 0 || block < meta.addr_node_table {
        return Ok(BitState::Invalid);
    }
    let pos = resolve_from_block(meta, block);
    let byte_off = pos.bitmap_block * meta.block_size as u64 + pos.byte_offset;
    let mut byte = volume.read_byte_at(byte_off)?;
    match state {
        BitState::Allocated => byte |= 1 << pos.bit_offset,
        BitState::Free => byte &= !(1 << pos.bit_offset),
        BitState::Invalid => unreachable!("cannot set a block to the Invalid state"),
    }
    volume.write_byte_at(byte_off, byte)?;
    Ok(state)
}

/// Loads the entire bitmap region into memory as a flat byte buffer.
pub fn load_bitmap(meta: &FsMeta, volume: &mut Volume) -> std::io::Result<Vec<u8>> {
    let len = (meta.addr_node_table - meta.addr_bitmap) * meta.block_size as u64;
    let mut buf = vec![0u8; len as usize];
    volume.read_at(meta.addr_bitmap * meta.block_size as u64, &mut buf)?;
    Ok(buf)
}

/// Tests the bit for `block` within an in-memory bitmap snapshot loaded by
/// [`load_bitmap`].
pub fn snapshot_check(meta: &FsMeta, snapshot: &[u8], block: u64) -> bool {
    let pos = resolve_from_block(meta, block);
    let idx = (pos.bitmap_block - meta.addr_bitmap) * meta.block_size as u64 + pos.byte_offset;
    snapshot[idx as usize] & (1 << pos.bit_offset) != 0
}

/// Sets the bit for `block` within an in-memory bitmap snapshot.
pub fn snapshot_set(meta: &FsMeta, snapshot: &mut [u8], block: u64, allocated: bool) {
    let pos = resolve_from_block(meta, block);
    let idx = (pos.bitmap_block - meta.addr_bitmap) * meta.block_size as u64 + pos.byte_offset;
    if allocated {
        snapshot[idx as usize] |= 1 << pos.bit_offset;
    } else {
        snapshot[idx as usize] &= !(1 << pos.bit_offset);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn meta() -> FsMeta {
        FsMeta {
            header: *b"FSMETA",
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
            creator_id: 1,
            ts_created: 0,
            ts_mounted: 0,
            unique_id: [0; 16],
            error_state: 0,
            error_action: 0,
            addr_bitmap: 1,
            addr_node_table: 2,
            addr_data: 17,
            addr_extension: 0,
            last_allocated_node_id: 0,
            last_allocated_data_block: 17,
            tail: 0xb10f5cc7,
            checksum: 0,
        }
    }

    #[test]
    fn resolve_roundtrip_from_block() {
        let m = meta();
        for b in m.addr_node_table..m.addr_data {
            let pos = resolve_from_block(&m, b);
            assert_eq!(resolve_to_block(&m, pos), b);
        }
    }

    #[test]
    fn resolve_roundtrip_from_pos() {
        let m = meta();
        let per_block = tracked_per_block(m.block_size);
        for byte_offset in 0..(m.block_size as u64 / 8) {
            for bit_offset in 0..8u8 {
                let pos = BitPos {
                    bitmap_block: m.addr_bitmap,
                    byte_offset,
                    bit_offset,
                };
                let block = resolve_to_block(&m, pos);
                assert!(block < m.addr_bitmap + per_block);
                assert_eq!(resolve_from_block(&m, block), pos);
            }
        }
    }

    #[test]
    fn first_tracked_block_is_node_table_start() {
        let m = meta();
        let pos = resolve_from_block(&m, m.addr_node_table);
        assert_eq!(
            pos,
            BitPos {
                bitmap_block: m.addr_bitmap,
                byte_offset: 0,
                bit_offset: 0,
            }
        );
    }
}
