//! End-to-end node creation and data writing, plus volume format/read.

use rand_core::{OsRng, RngCore};

use crate::alloc::{self, BlockBudget};
use crate::clock;
use crate::error::{FormatError, MakeNodeError, WriteNodeError};
use crate::math::ceil_division;
use crate::node::{self, FsNode, NodeKind, NODE_ID_INVALID, NODE_ID_ROOT};
use crate::superblock::{
    BootstrapChunk, FsMeta, CREATOR_ID_MYTH_TOOL, ERROR_ACTION_NONE, ERROR_STATE_NORMAL,
    SUPERBLOCK_HEADER, TAIL_MAGIC,
};
use crate::volume::Volume;

/// Base-62 alphabet `UniqueID` characters are drawn from.
const UNIQUE_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const UNIQUE_ID_LEN: usize = 16;

fn random_unique_id() -> [u8; 16] {
    let mut id = [0u8; UNIQUE_ID_LEN];
    let mut rng = OsRng;
    for slot in id.iter_mut() {
        *slot = UNIQUE_ID_ALPHABET[(rng.next_u32() as usize) % UNIQUE_ID_ALPHABET.len()];
    }
    id
}

/// Parameters describing the layout a new volume should have.
pub struct FormatParams {
    pub block_size: u16,
    pub size_blocks: u64,
    pub origin: u64,
    pub volume_name: String,
    pub bytes_per_node_ratio: u64,
}

/// Formats `volume` as a fresh Myth file system and returns its superblock.
/// Does not create the root node — the caller does that via [`make_node`].
pub fn make_file_system(volume: &mut Volume, params: FormatParams) -> Result<FsMeta, FormatError> {
    if params.bytes_per_node_ratio < 512 {
        return Err(FormatError::InvalidParameter);
    }
    if params.block_size == 0 || params.block_size as u64 % 512 != 0 {
        return Err(FormatError::InsaneBlockSize);
    }

    volume.set_len(params.size_blocks * params.block_size as u64)?;

    let addr_bitmap = params.origin + 1;
    let tracked_per_bitmap_block = params.block_size as u64 * 8;
    // Bitmap size is a two-step calculation: first size it against every
    // block from addr_bitmap to the end of the disk, then cut off the
    // excess caused by the bitmap's own blocks being counted in that span.
    let mut bitmap_blocks = ceil_division(
        params.size_blocks.saturating_sub(addr_bitmap),
        tracked_per_bitmap_block,
    );
    bitmap_blocks -= bitmap_blocks / tracked_per_bitmap_block;
    let addr_node_table = addr_bitmap + bitmap_blocks;

    let total_bytes = params.size_blocks * params.block_size as u64;
    // NodeCapacity before the node-id-0 reservation is subtracted: this is
    // the value node_table_blocks must be sized against. The `-1` is
    // applied afterward, once layout math no longer needs the raw value.
    let node_capacity_raw = (total_bytes / params.bytes_per_node_ratio) as u32;
    let node_table_blocks =
        node_capacity_raw as u64 / (params.block_size as u64 / FsMeta::NODE_SIZE);
    let addr_data = addr_node_table + node_table_blocks;
    let node_capacity = node_capacity_raw.saturating_sub(1);

    if addr_data >= params.size_blocks {
        return Err(FormatError::InsufficientDiskSize);
    }

    let mut volume_name = [0u8; 32];
    let bytes = params.volume_name.as_bytes();
    let n = bytes.len().min(32);
    volume_name[..n].copy_from_slice(&bytes[..n]);

    let mut meta = FsMeta {
        header: SUPERBLOCK_HEADER,
        flags: 0,
        fs_major: 1,
        revision: 0,
        vendor_id: [0; 12],
        block_size: params.block_size,
        size: params.size_blocks,
        node_capacity,
        origin: params.origin,
        num_allocated_blocks: addr_node_table,
        num_allocated_nodes: 0,
        volume_name,
        creator_id: CREATOR_ID_MYTH_TOOL,
        ts_created: clock::now(),
        ts_mounted: 0,
        unique_id: random_unique_id(),
        error_state: ERROR_STATE_NORMAL,
        error_action: ERROR_ACTION_NONE,
        addr_bitmap,
        addr_node_table,
        addr_data,
        addr_extension: 0,
        last_allocated_node_id: 0,
        last_allocated_data_block: addr_data,
        tail: TAIL_MAGIC,
        checksum: 0,
    };

    // Zero the bitmap region.
    let bitmap_bytes = (addr_node_table - addr_bitmap) * params.block_size as u64;
    let zeros = vec![0u8; bitmap_bytes as usize];
    volume.write_at(addr_bitmap * params.block_size as u64, &zeros)?;

    meta.write(volume)?;

    let chunk = BootstrapChunk {
        header: crate::superblock::BOOTSTRAP_HEADER,
        bytes_per_block: params.block_size,
        file_system_offset: params.origin,
    };
    chunk.write(volume)?;

    Ok(meta)
}

/// Reads and validates the superblock of an existing Myth volume.
pub fn read_file_system(volume: &mut Volume) -> Result<FsMeta, FormatError> {
    FsMeta::read(volume)
}

/// Scans the node table for the first unused node id, skipping the
/// reserved ids `{0, 1, 2}`.
pub fn find_node_id(meta: &FsMeta, volume: &mut Volume) -> Result<u32, WriteNodeError> {
    for table_block in meta.addr_node_table..meta.addr_data {
        if let Some(slot) = node::find_node_slot(meta, volume, table_block)? {
            let pos = node::NodePos {
                table_block,
                slot,
                raw_byte_offset: 0,
            };
            let id = node::resolve_id(meta, pos);
            if id == NODE_ID_INVALID || id == 1 || id == NODE_ID_ROOT {
                continue;
            }
            return Ok(id);
        }
    }
    Err(WriteNodeError::NodeTableFull)
}

/// Creates a new node with id `node.id` and content `data`.
///
/// `node.id` must be nonzero and unused; `node.kind` must be one of the
/// creatable kinds. Reserves the node's slot before delegating to
/// [`write_node_data`] so a racing existence check (there is none, since
/// this crate is single-threaded, but the ordering still matters for a
/// failure partway through) observes the node as present.
pub fn make_node(
    meta: &mut FsMeta,
    volume: &mut Volume,
    mut node: FsNode,
    data: &[u8],
) -> Result<(), MakeNodeError> {
    if node.id == NODE_ID_INVALID {
        return Err(MakeNodeError::InvalidId);
    }
    if node::node_exists(meta, volume, node.id).map_err(MakeNodeError::Disk)? {
        return Err(MakeNodeError::Exists);
    }
    if NodeKind::from_raw_creatable(node.kind).is_none() {
        return Err(MakeNodeError::InvalidType);
    }

    node.size = 0;
    node.inline_data = [0; crate::superblock::INLINE_DATA_SIZE];
    node.direct_data = [0; crate::superblock::DIRECT_BLOCK_COUNT];
    node.addr_singly_indirect = 0;
    node.addr_doubly_indirect = 0;
    node.addr_triply_indirect = 0;
    node.padding = [0; 21];
    node.ts_created = clock::now();
    node::put_node(meta, volume, &node).map_err(MakeNodeError::Disk)?;

    write_node_data(meta, volume, node.id, data, true)?;
    Ok(())
}

/// Rewrites a node's content, replacing whatever it held before.
///
/// `is_creation` distinguishes a brand-new node (bumps `NumAllocatedNodes`
/// and leaves `TsCreated` as already stamped by [`make_node`]) from an
/// in-place rewrite of an existing node (preserves `TsCreated`, does not
/// touch `NumAllocatedNodes`).
pub fn write_node_data(
    meta: &mut FsMeta,
    volume: &mut Volume,
    node_id: u32,
    data: &[u8],
    is_creation: bool,
) -> Result<(), WriteNodeError> {
    let mut n = node::get_node(meta, volume, node_id);
    if n.is_invalid() {
        return Err(WriteNodeError::NodeDoesNotExist);
    }

    let old_budget = alloc::block_budget(meta.block_size, n.size).unwrap_or_default();
    meta.num_allocated_blocks = meta
        .num_allocated_blocks
        .saturating_sub(old_budget.total());

    for ptr in n.direct_data {
        alloc::free_block(meta, volume, ptr)?;
    }
    alloc::singly_free(meta, volume, n.addr_singly_indirect)?;
    alloc::doubly_free(meta, volume, n.addr_doubly_indirect)?;
    alloc::triply_free(meta, volume, n.addr_triply_indirect)?;

    n.inline_data = [0; crate::superblock::INLINE_DATA_SIZE];
    n.direct_data = [0; crate::superblock::DIRECT_BLOCK_COUNT];
    n.addr_singly_indirect = 0;
    n.addr_doubly_indirect = 0;
    n.addr_triply_indirect = 0;

    let inline_len = data.len().min(crate::superblock::INLINE_DATA_SIZE);
    n.inline_data[..inline_len].copy_from_slice(&data[..inline_len]);

    let mut new_total_blocks = 0;
    if data.len() > crate::superblock::INLINE_DATA_SIZE {
        let rest = &data[crate::superblock::INLINE_DATA_SIZE..];
        let budget = alloc::block_budget(meta.block_size, data.len() as u64)
            .map_err(|_| WriteNodeError::TooBig)?;
        let blocks = alloc::allocate_blocks(meta, volume, budget.total())?
            .ok_or(WriteNodeError::InsufficientDiskSpace)?;
        fill_tiers(meta, volume, &mut n, &budget, &blocks, rest)?;
        new_total_blocks = budget.total();
    }

    // TsCreated is left untouched here; make_node stamps it once, up front.
    n.size = data.len() as u64;
    n.ts_modified = clock::now();
    n.ts_accessed = n.ts_modified;

    node::put_node(meta, volume, &n)?;

    meta.num_allocated_blocks += new_total_blocks;
    if is_creation {
        meta.num_allocated_nodes += 1;
    }
    meta.last_allocated_node_id = node_id;

    meta.write(volume).map_err(|e| match e {
        FormatError::Disk(e) => WriteNodeError::Disk(e),
        _ => WriteNodeError::Disk(std::io::Error::other("superblock rewrite failed")),
    })?;

    Ok(())
}

/// Distributes `blocks` (already allocated and bitmap-marked) across the
/// direct slots and the singly/doubly/triply indirect tiers, writing
/// payload bytes from `rest` as it goes. `blocks` is ordered: the direct
/// leaves first, then (for each non-empty tier) its index block(s)
/// interleaved with leaves in tree order, matching how
/// [`crate::alloc::singly_free`]/`doubly_free`/`triply_free` read them
/// back.
fn fill_tiers(
    meta: &FsMeta,
    volume: &mut Volume,
    n: &mut FsNode,
    budget: &BlockBudget,
    blocks: &[u64],
    rest: &[u8],
) -> Result<(), WriteNodeError> {
    let block_size = meta.block_size as usize;
    let pointers_per_block = block_size / 8;
    let mut cursor = 0usize;
    let mut byte_cursor = 0usize;

    // Built as a plain local array, then assigned to the packed field in
    // one move: a packed struct's multi-byte-aligned fields cannot be
    // borrowed (`&mut n.direct_data`), only read or overwritten wholesale.
    let mut direct = [0u64; crate::superblock::DIRECT_BLOCK_COUNT];
    let direct_count = budget.direct as usize;
    for slot in direct.iter_mut().take(direct_count) {
        let block = blocks[cursor];
        cursor += 1;
        write_leaf(volume, block, block_size, rest, &mut byte_cursor)?;
        *slot = block;
    }
    n.direct_data = direct;

    if budget.singly_data > 0 {
        n.addr_singly_indirect = fill_index_tree(
            volume,
            blocks,
            &mut cursor,
            rest,
            &mut byte_cursor,
            block_size,
            pointers_per_block,
            1,
            budget.singly_data as usize,
        )?;
    }
    if budget.doubly_data > 0 {
        n.addr_doubly_indirect = fill_index_tree(
            volume,
            blocks,
            &mut cursor,
            rest,
            &mut byte_cursor,
            block_size,
            pointers_per_block,
            2,
            budget.doubly_data as usize,
        )?;
    }
    if budget.triply_data > 0 {
        n.addr_triply_indirect = fill_index_tree(
            volume,
            blocks,
            &mut cursor,
            rest,
            &mut byte_cursor,
            block_size,
            pointers_per_block,
            3,
            budget.triply_data as usize,
        )?;
    }

    debug_assert_eq!(cursor, blocks.len());
    Ok(())
}

/// Writes one leaf block's worth of payload, taking up to `block_size`
/// bytes from `rest` starting at `*byte_cursor` and zero-padding the rest.
fn write_leaf(
    volume: &mut Volume,
    block: u64,
    block_size: usize,
    rest: &[u8],
    byte_cursor: &mut usize,
) -> std::io::Result<()> {
    let end = (*byte_cursor + block_size).min(rest.len());
    let mut buf = vec![0u8; block_size];
    buf[..end - *byte_cursor].copy_from_slice(&rest[*byte_cursor..end]);
    volume.write_at(block * block_size as u64, &buf)?;
    *byte_cursor = end;
    Ok(())
}

/// Recursively builds one indirection tier as a tree of pointer blocks,
/// consuming `leaves` total data blocks from `blocks`/`rest`. `depth == 1`
/// is a singly indirect tier (children are leaves); `depth == 2` and `3`
/// nest one and two further levels of pointer blocks respectively.
fn fill_index_tree(
    volume: &mut Volume,
    blocks: &[u64],
    cursor: &mut usize,
    rest: &[u8],
    byte_cursor: &mut usize,
    block_size: usize,
    pointers_per_block: usize,
    depth: u8,
    leaves: usize,
) -> Result<u64, WriteNodeError> {
    let index_block = blocks[*cursor];
    *cursor += 1;
    let mut pointers = vec![0u64; pointers_per_block];

    if depth == 1 {
        for p in pointers.iter_mut().take(leaves) {
            let block = blocks[*cursor];
            *cursor += 1;
            write_leaf(volume, block, block_size, rest, byte_cursor)?;
            *p = block;
        }
    } else {
        let child_capacity = pointers_per_block.pow(depth as u32 - 1);
        let mut remaining = leaves;
        for p in pointers.iter_mut() {
            if remaining == 0 {
                break;
            }
            let this = remaining.min(child_capacity);
            *p = fill_index_tree(
                volume,
                blocks,
                cursor,
                rest,
                byte_cursor,
                block_size,
                pointers_per_block,
                depth - 1,
                this,
            )?;
            remaining -= this;
        }
    }

    write_pointer_block(volume, index_block, &pointers, block_size)?;
    Ok(index_block)
}

fn write_pointer_block(
    volume: &mut Volume,
    block: u64,
    pointers: &[u64],
    block_size: usize,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; block_size];
    for (i, p) in pointers.iter().enumerate() {
        buf[i * 8..i * 8 + 8].copy_from_slice(&p.to_le_bytes());
    }
    volume.write_at(block * block_size as u64, &buf)
}

#[cfg(test)]
mod test {
    use super::*;

    fn fresh_volume() -> (Volume, FsMeta) {
        let path = std::env::temp_dir().join(format!(
            "mythfs-test-{}-{}.img",
            std::process::id(),
            rand_core::OsRng.next_u64()
        ));
        let mut volume = Volume::open(&path, true).unwrap();
        let meta = make_file_system(
            &mut volume,
            FormatParams {
                block_size: 512,
                size_blocks: 4096,
                origin: 0,
                volume_name: "test".into(),
                bytes_per_node_ratio: 16384,
            },
        )
        .unwrap();
        (volume, meta)
    }

    fn blank_node(id: u32, kind: u16) -> FsNode {
        let mut n = FsNode::invalid();
        n.id = id;
        n.kind = kind;
        n.owner = 0;
        n.creator_id = CREATOR_ID_MYTH_TOOL;
        n.hard_link_count = 1;
        n
    }

    #[test]
    fn format_then_read_roundtrips_layout() {
        let (mut volume, meta) = fresh_volume();
        let read_back = read_file_system(&mut volume).unwrap();
        let (addr_bitmap, addr_node_table, addr_data, size) =
            (read_back.addr_bitmap, read_back.addr_node_table, read_back.addr_data, read_back.size);
        let (meta_addr_bitmap, meta_addr_node_table, meta_addr_data, meta_size) =
            (meta.addr_bitmap, meta.addr_node_table, meta.addr_data, meta.size);
        assert_eq!(addr_bitmap, meta_addr_bitmap);
        assert_eq!(addr_node_table, meta_addr_node_table);
        assert_eq!(addr_data, meta_addr_data);
        assert_eq!(size, meta_size);
    }

    #[test]
    fn make_node_rejects_id_zero() {
        let (mut volume, mut meta) = fresh_volume();
        let err = make_node(&mut meta, &mut volume, blank_node(0, 1), b"x").unwrap_err();
        assert!(matches!(err, MakeNodeError::InvalidId));
    }

    #[test]
    fn make_node_rejects_bad_type() {
        let (mut volume, mut meta) = fresh_volume();
        let err = make_node(&mut meta, &mut volume, blank_node(NODE_ID_ROOT, 99), b"x").unwrap_err();
        assert!(matches!(err, MakeNodeError::InvalidType));
    }

    #[test]
    fn make_node_small_data_stays_inline() {
        let (mut volume, mut meta) = fresh_volume();
        let data = b"hello world";
        make_node(&mut meta, &mut volume, blank_node(NODE_ID_ROOT, 2), data).unwrap();
        let n = node::get_node(&meta, &mut volume, NODE_ID_ROOT);
        let size = n.size;
        assert_eq!(size, data.len() as u64);
        assert_eq!(&n.inline_data[..data.len()], data);
        let direct_data = n.direct_data;
        assert!(direct_data.iter().all(|&b| b == 0));
    }

    #[test]
    fn make_node_rejects_duplicate_id() {
        let (mut volume, mut meta) = fresh_volume();
        make_node(&mut meta, &mut volume, blank_node(NODE_ID_ROOT, 2), b"a").unwrap();
        let err = make_node(&mut meta, &mut volume, blank_node(NODE_ID_ROOT, 2), b"b").unwrap_err();
        assert!(matches!(err, MakeNodeError::Exists));
    }

    #[test]
    fn make_node_large_data_uses_direct_blocks() {
        let (mut volume, mut meta) = fresh_volume();
        let data = vec![0xABu8; 512 * 3 + 10];
        make_node(&mut meta, &mut volume, blank_node(NODE_ID_ROOT, 1), &data).unwrap();
        let n = node::get_node(&meta, &mut volume, NODE_ID_ROOT);
        let size = n.size;
        assert_eq!(size, data.len() as u64);
        let direct_data = n.direct_data;
        assert!(direct_data[0] != 0);
        let addr_singly_indirect = n.addr_singly_indirect;
        assert_eq!(addr_singly_indirect, 0);
    }

    #[test]
    fn find_node_id_skips_reserved_ids() {
        let (mut volume, meta) = fresh_volume();
        let id = find_node_id(&meta, &mut volume).unwrap();
        assert!(id > NODE_ID_ROOT);
    }
}
