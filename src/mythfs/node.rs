//! The node table: node records (`FsNode`) and the node-id ↔ (block, slot)
//! mapping.

use std::mem::size_of;
use std::slice;

use crate::superblock::{DIRECT_BLOCK_COUNT, FsMeta, INLINE_DATA_SIZE};
use crate::volume::Volume;

/// Reserved node id: sentinel for "no node" / invalid.
pub const NODE_ID_INVALID: u32 = 0;
/// Reserved node id: journal root (reserved, unused by this implementation).
pub const NODE_ID_JOURNAL: u32 = 1;
/// Reserved node id: the file-system root directory.
pub const NODE_ID_ROOT: u32 = 2;

/// The type tag stored in a node's `kind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NodeKind {
    File = 1,
    Directory = 2,
    SoftLink = 3,
    /// Reserved; hard links are a non-goal of this implementation.
    HardLink = 4,
}

impl NodeKind {
    /// Converts a raw on-disk type tag, returning `None` for any value not
    /// in `{1, 2, 3}` — the set of types [`crate::writer::make_node`]
    /// accepts.
    pub fn from_raw_creatable(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Self::File),
            2 => Some(Self::Directory),
            3 => Some(Self::SoftLink),
            _ => None,
        }
    }
}

/// The 256-byte on-disk node record (`FsNode`).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct FsNode {
    pub id: u32,
    pub kind: u16,
    pub flags: u32,
    pub size: u64,
    pub creator_id: u8,
    pub ts_created: u64,
    pub ts_accessed: u64,
    pub ts_modified: u64,
    pub owner: i32,
    pub hard_link_count: u32,
    pub inline_data: [u8; INLINE_DATA_SIZE],
    pub direct_data: [u64; DIRECT_BLOCK_COUNT],
    pub addr_singly_indirect: u64,
    pub addr_doubly_indirect: u64,
    pub addr_triply_indirect: u64,
    pub padding: [u8; 21],
}

impl FsNode {
    /// An all-zero, id-0 node: the sentinel value returned when a slot is
    /// empty or unreadable.
    pub fn invalid() -> Self {
        unsafe { std::mem::zeroed() }
    }

    /// Tells whether this record represents an absent/invalid node.
    pub fn is_invalid(&self) -> bool {
        self.id == NODE_ID_INVALID
    }

    fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self as *const _ as *const u8, size_of::<Self>()) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self as *mut _ as *mut u8, size_of::<Self>()) }
    }
}

/// A node's resolved position within the node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePos {
    pub table_block: u64,
    pub slot: u32,
    pub raw_byte_offset: u64,
}

/// Number of node slots per node-table block.
fn nodes_per_block(block_size: u16) -> u32 {
    block_size as u32 / FsMeta::NODE_SIZE as u32
}

/// Resolves a node id to its table block, slot, and raw byte offset.
pub fn resolve_pos(meta: &FsMeta, node_id: u32) -> NodePos {
    let per_block = nodes_per_block(meta.block_size);
    let table_block = meta.addr_node_table + (node_id / per_block) as u64;
    let slot = node_id % per_block;
    let raw_byte_offset = table_block * meta.block_size as u64 + slot as u64 * FsMeta::NODE_SIZE;
    NodePos {
        table_block,
        slot,
        raw_byte_offset,
    }
}

/// Inverse of [`resolve_pos`].
pub fn resolve_id(meta: &FsMeta, pos: NodePos) -> u32 {
    let per_block = nodes_per_block(meta.block_size);
    (pos.table_block - meta.addr_node_table) as u32 * per_block + pos.slot
}

/// Scans every slot of `table_block` and returns the first empty one
/// (`id == 0`), skipping slot 0 of the very first node-table block since
/// the id-0 sentinel must remain empty there.
pub fn find_node_slot(
    meta: &FsMeta,
    volume: &mut Volume,
    table_block: u64,
) -> std::io::Result<Option<u32>> {
    let per_block = nodes_per_block(meta.block_size);
    let first_slot = if table_block == meta.addr_node_table {
        1
    } else {
        0
    };
    for slot in first_slot..per_block {
        let off = table_block * meta.block_size as u64 + slot as u64 * FsMeta::NODE_SIZE;
        let id = read_raw_id(volume, off)?;
        if id == NODE_ID_INVALID {
            return Ok(Some(slot));
        }
    }
    Ok(None)
}

/// Reads just the `id` field of a node record at a raw byte offset, without
/// materializing the whole 256-byte record.
fn read_raw_id(volume: &mut Volume, raw_byte_offset: u64) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    volume.read_at(raw_byte_offset, &mut buf)?;
    Ok(u32::from_ne_bytes(buf))
}

/// Tells whether a node with the given id exists on disk.
pub fn node_exists(meta: &FsMeta, volume: &mut Volume, node_id: u32) -> std::io::Result<bool> {
    let pos = resolve_pos(meta, node_id);
    Ok(read_raw_id(volume, pos.raw_byte_offset)? != NODE_ID_INVALID)
}

/// Reads the node at `node_id`'s resolved slot. Returns
/// [`FsNode::invalid`] (not an error) if the slot's `id` is 0 — the caller
/// cannot distinguish "never allocated" from "read failed" this way, which
/// matches the distilled behavior of treating both as "no node here".
pub fn get_node(meta: &FsMeta, volume: &mut Volume, node_id: u32) -> FsNode {
    let pos = resolve_pos(meta, node_id);
    let mut node = FsNode::invalid();
    if volume
        .read_at(pos.raw_byte_offset, node.as_bytes_mut())
        .is_err()
    {
        return FsNode::invalid();
    }
    if node.is_invalid() { FsNode::invalid() } else { node }
}

/// Writes a node record back to its resolved slot.
pub fn put_node(meta: &FsMeta, volume: &mut Volume, node: &FsNode) -> std::io::Result<()> {
    let pos = resolve_pos(meta, node.id);
    volume.write_at(pos.raw_byte_offset, node.as_bytes())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::superblock::{CREATOR_ID_MYTH_TOOL, ERROR_ACTION_NONE, ERROR_STATE_NORMAL, TAIL_MAGIC};

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
            creator_id: CREATOR_ID_MYTH_TOOL,
            ts_created: 0,
            ts_mounted: 0,
            unique_id: [0; 16],
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
        }
    }

    #[test]
    fn node_record_is_256_bytes() {
        assert_eq!(size_of::<FsNode>(), 256);
    }

    #[test]
    fn resolve_pos_id_roundtrip() {
        let m = meta();
        let per_block = nodes_per_block(m.block_size);
        for id in 0..(per_block * 3) {
            let pos = resolve_pos(&m, id);
            assert_eq!(resolve_id(&m, pos), id);
        }
    }

    #[test]
    fn slot_zero_of_first_block_is_reserved() {
        let m = meta();
        // id 0 always resolves into slot 0 of the first table block.
        let pos = resolve_pos(&m, 0);
        let addr_node_table = m.addr_node_table;
        assert_eq!(pos.table_block, addr_node_table);
        assert_eq!(pos.slot, 0);
    }
}
