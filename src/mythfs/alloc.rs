//! Block-budget accounting and the free-block allocator.
//!
//! Every data block, and every indirect index block needed to address it,
//! comes from the same pool tracked by the bitmap in `bitmap.rs`. This
//! module answers two questions: "how many blocks does N bytes of content
//! need, counting indirection overhead" and "which blocks are free".

use crate::bitmap::{self, BitState};
use crate::math::ceil_division;
use crate::superblock::{DIRECT_BLOCK_COUNT, FsMeta, INLINE_DATA_SIZE};
use crate::volume::Volume;

/// A fully resolved block budget: how many data blocks a write of a given
/// size needs, broken down by indirection tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockBudget {
    pub direct: u64,
    pub singly_indirect_index: u64,
    pub doubly_indirect_index: u64,
    pub triply_indirect_index: u64,
    /// Leaf data blocks addressed through the singly indirect tier.
    pub singly_data: u64,
    /// Leaf data blocks addressed through the doubly indirect tier.
    pub doubly_data: u64,
    /// Leaf data blocks addressed through the triply indirect tier.
    pub triply_data: u64,
    pub data: u64,
}

impl BlockBudget {
    /// Total blocks this budget needs, index blocks included.
    pub fn total(&self) -> u64 {
        self.direct
            + self.singly_indirect_index
            + self.doubly_indirect_index
            + self.triply_indirect_index
            + self.data
    }
}

/// Returned when `len` exceeds what triply indirect addressing can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TooBig;

/// Number of `u64` block pointers that fit in one index block.
fn pointers_per_block(block_size: u16) -> u64 {
    block_size as u64 / 8
}

/// Computes the block budget for storing `len` bytes of node content.
///
/// Bytes `<= INLINE_DATA_SIZE` cost zero data blocks (they live in the node
/// record's `inline_data`). Beyond that, content is addressed by up to
/// [`DIRECT_BLOCK_COUNT`] direct blocks, then a singly, doubly, and triply
/// indirect tree, each tier adding its own index-block overhead.
pub fn block_budget(block_size: u16, len: u64) -> Result<BlockBudget, TooBig> {
    if len <= INLINE_DATA_SIZE as u64 {
        return Ok(BlockBudget::default());
    }

    let block_size = block_size as u64;
    let remaining_after_inline = len - INLINE_DATA_SIZE as u64;
    let total_data_blocks = ceil_division(remaining_after_inline, block_size);

    let direct = total_data_blocks.min(DIRECT_BLOCK_COUNT as u64);
    let mut budget = BlockBudget {
        direct,
        data: direct,
        ..Default::default()
    };
    let mut remaining_blocks = total_data_blocks - direct;
    if remaining_blocks == 0 {
        return Ok(budget);
    }

    let p = pointers_per_block(block_size as u16);

    // Singly indirect: one index block addressing up to P data blocks.
    let singly_capacity = p;
    let singly = remaining_blocks.min(singly_capacity);
    budget.singly_indirect_index = 1;
    budget.singly_data = singly;
    budget.data += singly;
    remaining_blocks -= singly;
    if remaining_blocks == 0 {
        return Ok(budget);
    }

    // Doubly indirect: up to P singly-indirect subtrees, each P data blocks.
    let doubly_capacity = p * p;
    let doubly_data = remaining_blocks.min(doubly_capacity);
    let doubly_index_blocks = 1 + ceil_division(doubly_data, p);
    budget.doubly_indirect_index = doubly_index_blocks;
    budget.doubly_data = doubly_data;
    budget.data += doubly_data;
    remaining_blocks -= doubly_data;
    if remaining_blocks == 0 {
        return Ok(budget);
    }

    // Triply indirect: up to P doubly-indirect subtrees.
    let triply_capacity = p * p * p;
    let triply_data = remaining_blocks.min(triply_capacity);
    if triply_data < remaining_blocks {
        return Err(TooBig);
    }
    let doubly_subtrees = ceil_division(triply_data, p * p);
    let mut triply_index_blocks = 1 + doubly_subtrees;
    let mut data_left = triply_data;
    for _ in 0..doubly_subtrees {
        let this_subtree = data_left.min(p * p);
        triply_index_blocks += ceil_division(this_subtree, p);
        data_left -= this_subtree;
    }
    budget.triply_indirect_index = triply_index_blocks;
    budget.triply_data = triply_data;
    budget.data += triply_data;
    remaining_blocks -= triply_data;
    debug_assert_eq!(remaining_blocks, 0);

    Ok(budget)
}

/// Allocates `count` free blocks by scanning the bitmap in one linear pass
/// from `AddrData` upward, with no wraparound: blocks below `AddrData` are
/// the node table and must never be selected as data, so the scan starts
/// there rather than at a stateful hint. Loads a snapshot of the whole
/// bitmap region first, so repeated selections within the same call see
/// each other without re-reading the disk.
pub fn allocate_blocks(
    meta: &mut FsMeta,
    volume: &mut Volume,
    count: u64,
) -> std::io::Result<Option<Vec<u64>>> {
    if count == 0 {
        return Ok(Some(Vec::new()));
    }
    let snapshot = bitmap::load_bitmap(meta, volume)?;
    let mut selected = Vec::with_capacity(count as usize);
    for block in meta.addr_data..meta.size {
        if selected.len() as u64 == count {
            break;
        }
        if !bitmap::snapshot_check(meta, &snapshot, block) {
            selected.push(block);
        }
    }
    if selected.len() as u64 != count {
        return Ok(None);
    }
    for &block in &selected {
        bitmap::set_block(meta, volume, block, BitState::Allocated)?;
    }
    meta.last_allocated_data_block = *selected.last().expect("count > 0 checked by caller");
    Ok(Some(selected))
}

/// Frees a single data block (leaf, not an index block).
pub fn free_block(meta: &FsMeta, volume: &mut Volume, block: u64) -> std::io::Result<()> {
    if block != 0 {
        bitmap::set_block(meta, volume, block, BitState::Free)?;
    }
    Ok(())
}

/// Reads a singly indirect index block's pointer array.
fn read_pointers(meta: &FsMeta, volume: &mut Volume, block: u64) -> std::io::Result<Vec<u64>> {
    let mut raw = vec![0u8; meta.block_size as usize];
    volume.read_at(block * meta.block_size as u64, &mut raw)?;
    Ok(raw
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

/// Tears down a singly indirect tree rooted at `block`: frees every
/// non-zero data pointer, then frees `block` itself. Stops early (without
/// error) if `block` is already 0 — tolerates a partially-built or
/// already-torn-down tree.
pub fn singly_free(meta: &FsMeta, volume: &mut Volume, block: u64) -> std::io::Result<()> {
    if block == 0 {
        return Ok(());
    }
    for ptr in read_pointers(meta, volume, block)? {
        free_block(meta, volume, ptr)?;
    }
    free_block(meta, volume, block)
}

/// Tears down a doubly indirect tree rooted at `block`: recursively tears
/// down every non-zero singly indirect subtree, then frees `block` itself.
pub fn doubly_free(meta: &FsMeta, volume: &mut Volume, block: u64) -> std::io::Result<()> {
    if block == 0 {
        return Ok(());
    }
    for ptr in read_pointers(meta, volume, block)? {
        singly_free(meta, volume, ptr)?;
    }
    free_block(meta, volume, block)
}

/// Tears down a triply indirect tree rooted at `block`: recursively tears
/// down every non-zero doubly indirect subtree, then frees `block` itself.
pub fn triply_free(meta: &FsMeta, volume: &mut Volume, block: u64) -> std::io::Result<()> {
    if block == 0 {
        return Ok(());
    }
    for ptr in read_pointers(meta, volume, block)? {
        doubly_free(meta, volume, ptr)?;
    }
    free_block(meta, volume, block)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn budget_fits_in_inline() {
        let b = block_budget(512, 64).unwrap();
        assert_eq!(b.total(), 0);
    }

    #[test]
    fn budget_one_direct_block() {
        let b = block_budget(512, 65).unwrap();
        assert_eq!(b.direct, 1);
        assert_eq!(b.data, 1);
        assert_eq!(b.total(), 1);
    }

    #[test]
    fn budget_all_direct_blocks() {
        // Exactly fills the 12 direct slots: INLINE + 12*block_size bytes.
        let len = INLINE_DATA_SIZE as u64 + 12 * 512;
        let b = block_budget(512, len).unwrap();
        assert_eq!(b.direct, 12);
        assert_eq!(b.singly_indirect_index, 0);
        assert_eq!(b.total(), 12);
    }

    #[test]
    fn budget_spills_into_singly_indirect() {
        let len = INLINE_DATA_SIZE as u64 + 13 * 512;
        let b = block_budget(512, len).unwrap();
        assert_eq!(b.direct, 12);
        assert_eq!(b.singly_indirect_index, 1);
        assert_eq!(b.data, 13);
        assert_eq!(b.total(), 14);
    }

    #[test]
    fn budget_spills_into_doubly_indirect() {
        let p = 512u64 / 8;
        let direct_and_singly_capacity = 12 + p;
        let len = INLINE_DATA_SIZE as u64 + (direct_and_singly_capacity + 1) * 512;
        let b = block_budget(512, len).unwrap();
        assert_eq!(b.direct, 12);
        assert_eq!(b.singly_indirect_index, 1);
        assert_eq!(b.doubly_indirect_index, 2); // one top index + one subtree index
    }

    #[test]
    fn budget_rejects_absurd_size() {
        let p = 512u64 / 8;
        let max_reachable =
            INLINE_DATA_SIZE as u64 + (12 + p + p * p + p * p * p) * 512;
        assert!(block_budget(512, max_reachable + 512).is_err());
    }
}
