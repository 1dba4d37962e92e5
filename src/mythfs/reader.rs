//! Reassembling a node's full content from inline, direct, and indirect
//! block data.
//!
//! This is the read-side counterpart to [`crate::writer::fill_tiers`]:
//! content is walked back in the exact order it was laid down — inline
//! bytes, then direct blocks in slot order, then the singly/doubly/triply
//! indirect trees — per the "Inline-data overlap" design note: readers
//! reassemble content as `InlineData[0..min(Size,64)] ++ DirectData-bytes
//! ++ indirect-bytes` up to `Size` total bytes.

use crate::node::FsNode;
use crate::superblock::{FsMeta, INLINE_DATA_SIZE};
use crate::volume::Volume;

/// Reassembles `n`'s full byte content by reading inline data, direct
/// blocks, and the indirect trees, stopping once `n.size` bytes have been
/// collected.
pub fn read_node_content(meta: &FsMeta, volume: &mut Volume, n: &FsNode) -> std::io::Result<Vec<u8>> {
    let size = n.size as usize;
    let mut out = Vec::with_capacity(size);

    let inline_len = size.min(INLINE_DATA_SIZE);
    out.extend_from_slice(&n.inline_data[..inline_len]);
    if size <= INLINE_DATA_SIZE {
        return Ok(out);
    }

    let block_size = meta.block_size as usize;
    for block in n.direct_data {
        if out.len() >= size {
            break;
        }
        if block != 0 {
            read_leaf_into(volume, block, block_size, size, &mut out)?;
        }
    }
    read_index_tree(meta, volume, n.addr_singly_indirect, 1, size, &mut out)?;
    read_index_tree(meta, volume, n.addr_doubly_indirect, 2, size, &mut out)?;
    read_index_tree(meta, volume, n.addr_triply_indirect, 3, size, &mut out)?;

    out.truncate(size);
    Ok(out)
}

/// Reads up to `block_size` bytes of a leaf block, appending only as many
/// as are still needed to reach `size` total bytes in `out`.
fn read_leaf_into(
    volume: &mut Volume,
    block: u64,
    block_size: usize,
    size: usize,
    out: &mut Vec<u8>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; block_size];
    volume.read_at(block * block_size as u64, &mut buf)?;
    let take = (size - out.len()).min(block_size);
    out.extend_from_slice(&buf[..take]);
    Ok(())
}

/// Walks an indirection tree rooted at `block`, `depth` levels deep
/// (1 = singly, 2 = doubly, 3 = triply indirect), appending leaf bytes to
/// `out` in tree order until `size` bytes have been collected.
fn read_index_tree(
    meta: &FsMeta,
    volume: &mut Volume,
    block: u64,
    depth: u8,
    size: usize,
    out: &mut Vec<u8>,
) -> std::io::Result<()> {
    if block == 0 || out.len() >= size {
        return Ok(());
    }
    let block_size = meta.block_size as usize;
    let mut raw = vec![0u8; block_size];
    volume.read_at(block * block_size as u64, &mut raw)?;
    for chunk in raw.chunks_exact(8) {
        if out.len() >= size {
            break;
        }
        let ptr = u64::from_le_bytes(chunk.try_into().unwrap());
        if ptr == 0 {
            continue;
        }
        if depth == 1 {
            read_leaf_into(volume, ptr, block_size, size, out)?;
        } else {
            read_index_tree(meta, volume, ptr, depth - 1, size, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::{self, FsNode, NODE_ID_ROOT};
    use crate::superblock::{CREATOR_ID_MYTH_TOOL, INLINE_DATA_SIZE};
    use crate::volume::Volume;
    use crate::writer::{self, FormatParams};
    use rand_core::{OsRng, RngCore};

    fn fresh_volume(size_blocks: u64) -> (Volume, FsMeta) {
        let path = std::env::temp_dir().join(format!(
            "mythfs-reader-test-{}-{}.img",
            std::process::id(),
            OsRng.next_u64()
        ));
        let mut volume = Volume::open(&path, true).unwrap();
        let meta = writer::make_file_system(
            &mut volume,
            FormatParams {
                block_size: 512,
                size_blocks,
                origin: 0,
                volume_name: "test".into(),
                bytes_per_node_ratio: 16384,
            },
        )
        .unwrap();
        (volume, meta)
    }

    fn blank_node(id: u32) -> FsNode {
        let mut n = FsNode::invalid();
        n.id = id;
        n.kind = 1;
        n.owner = 0;
        n.creator_id = CREATOR_ID_MYTH_TOOL;
        n.hard_link_count = 1;
        n
    }

    fn roundtrip(size_blocks: u64, data: &[u8]) -> Vec<u8> {
        let (mut volume, mut meta) = fresh_volume(size_blocks);
        writer::make_node(&mut meta, &mut volume, blank_node(NODE_ID_ROOT), data).unwrap();
        let n = node::get_node(&meta, &mut volume, NODE_ID_ROOT);
        read_node_content(&meta, &mut volume, &n).unwrap()
    }

    #[test]
    fn reads_back_inline_only_content() {
        let data = b"short and sweet";
        assert_eq!(roundtrip(4096, data), data);
    }

    #[test]
    fn reads_back_exactly_inline_boundary() {
        let data = vec![0x5Au8; INLINE_DATA_SIZE];
        assert_eq!(roundtrip(4096, &data), data);
    }

    #[test]
    fn reads_back_direct_blocks() {
        let data = vec![0x7Eu8; INLINE_DATA_SIZE + 3 * 512 + 17];
        assert_eq!(roundtrip(4096, &data), data);
    }

    #[test]
    fn reads_back_singly_indirect_tier() {
        let p = 512 / 8;
        let len = INLINE_DATA_SIZE + (12 + p + 1) * 512;
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        assert_eq!(roundtrip(4096, &data), data);
    }
}
