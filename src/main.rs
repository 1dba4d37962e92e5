//! `myth` is a utility command used to create, inspect, and mutate a Myth
//! volume stored inside a backing disk image.

use std::env;
use std::env::ArgsOs;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::exit;

use mythfs::node::{self, FsNode, NodeKind, NODE_ID_ROOT};
use mythfs::reader;
use mythfs::superblock::{CREATOR_ID_MYTH_TOOL, CREATOR_ID_USER};
use mythfs::volume::Volume;
use mythfs::writer::{self, FormatParams};

/// Writes an error to stderr, then exits with status 1.
fn error<M: fmt::Display>(bin: &str, msg: M) -> ! {
    eprintln!("{bin}: error: {msg}");
    exit(1);
}

/// Returns the command's name along with an iterator over its arguments.
fn args() -> (String, ArgsOs) {
    let mut args = env::args_os();
    let bin = args
        .next()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| error("myth", "missing binary name"));
    (bin, args)
}

fn print_usage(bin: &str) {
    eprintln!("{bin}: bad usage");
    eprintln!("Try '{bin} --help' for more information.");
}

fn print_help(bin: &str) {
    println!();
    println!("Usage:");
    println!(" {bin} makefs <disk> <block-size> <fs-offset> <volume-name> [bytes-per-node-ratio]");
    println!(" {bin} readfs <disk>");
    println!(" {bin} readnode <disk> <node-id>");
    println!(" {bin} createonroot <disk> <source-file> [--system]");
    println!();
    println!("Creates, inspects, and mutates a Myth volume stored in a disk image.");
    println!();
    println!("Options:");
    println!(" -h, --help\tPrints this help.");
}

fn main() {
    let (bin, mut argv) = args();
    match argv.next().and_then(|s| s.into_string().ok()).as_deref() {
        Some("makefs") => cmd_makefs(&bin, argv),
        Some("readfs") => cmd_readfs(&bin, argv),
        Some("readnode") => cmd_readnode(&bin, argv),
        Some("createonroot") => cmd_createonroot(&bin, argv),
        Some("-h" | "--help") | None => print_help(&bin),
        Some(_) => {
            print_usage(&bin);
            exit(1);
        }
    }
}

/// Parses the next positional argument as a string, exiting with usage
/// text if none remains.
fn next_str(bin: &str, argv: &mut ArgsOs, what: &str) -> String {
    argv.next()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| {
            print_usage(bin);
            error(bin, format_args!("missing {what}"))
        })
}

fn next_path(bin: &str, argv: &mut ArgsOs, what: &str) -> PathBuf {
    argv.next().map(PathBuf::from).unwrap_or_else(|| {
        print_usage(bin);
        error(bin, format_args!("missing {what}"))
    })
}

fn parse_int<T: std::str::FromStr>(bin: &str, what: &str, raw: &str) -> T {
    raw.parse()
        .unwrap_or_else(|_| error(bin, format_args!("invalid {what}: `{raw}`")))
}

fn open_volume(bin: &str, path: &Path, create: bool) -> Volume {
    Volume::open(path, create)
        .unwrap_or_else(|e| error(bin, format_args!("{}: {e}", path.display())))
}

fn cmd_makefs(bin: &str, mut argv: ArgsOs) {
    let disk_path = next_path(bin, &mut argv, "disk path");
    let block_size: u16 = parse_int(bin, "block size", &next_str(bin, &mut argv, "block size"));
    let origin: u64 = parse_int(
        bin,
        "filesystem offset",
        &next_str(bin, &mut argv, "filesystem offset (blocks)"),
    );
    let volume_name = next_str(bin, &mut argv, "volume name");
    let bytes_per_node_ratio: u64 = match argv.next() {
        Some(raw) => {
            let raw = raw.into_string().unwrap_or_else(|_| {
                error(bin, "invalid bytes-per-node ratio")
            });
            parse_int(bin, "bytes-per-node ratio", &raw)
        }
        None => 16384,
    };

    let size_blocks = disk_size_in_blocks(bin, &disk_path, block_size);

    let mut volume = open_volume(bin, &disk_path, false);
    let mut meta = writer::make_file_system(
        &mut volume,
        FormatParams {
            block_size,
            size_blocks,
            origin,
            volume_name,
            bytes_per_node_ratio,
        },
    )
    .unwrap_or_else(|e| error(bin, format_args!("format failed: {e}")));

    let mut root = FsNode::invalid();
    root.id = NODE_ID_ROOT;
    root.kind = NodeKind::Directory as u16;
    root.owner = 0;
    root.creator_id = CREATOR_ID_MYTH_TOOL;
    root.hard_link_count = 1;
    writer::make_node(&mut meta, &mut volume, root, &[])
        .unwrap_or_else(|e| error(bin, format_args!("failed to create root node: {e}")));

    let (size, block_size, node_capacity) = (meta.size, meta.block_size, meta.node_capacity);
    println!(
        "{}: filesystem created ({size} blocks of {block_size} bytes, {node_capacity} nodes capacity)",
        disk_path.display(),
    );
}

/// If the backing file already exists, uses its current size; otherwise
/// the caller must have pre-sized it (this tool never grows a disk image
/// implicitly beyond what `Volume::set_len` does during formatting, and a
/// missing file has no prior size to infer the request from).
fn disk_size_in_blocks(bin: &str, path: &Path, block_size: u16) -> u64 {
    let metadata = fs::metadata(path);
    let current_len = metadata.map(|m| m.len()).unwrap_or(0);
    if current_len == 0 {
        error(
            bin,
            format_args!(
                "{}: pre-size the image file before formatting it (e.g. with `truncate`)",
                path.display()
            ),
        );
    }
    current_len / block_size as u64
}

fn cmd_readfs(bin: &str, mut argv: ArgsOs) {
    let disk_path = next_path(bin, &mut argv, "disk path");
    let mut volume = open_volume(bin, &disk_path, false);
    let meta = writer::read_file_system(&mut volume)
        .unwrap_or_else(|e| error(bin, format_args!("{}: {e}", disk_path.display())));

    let header = meta.header;
    let vendor_id = meta.vendor_id;
    let block_size = meta.block_size;
    let size = meta.size;
    let node_capacity = meta.node_capacity;
    let origin = meta.origin;
    let num_allocated_blocks = meta.num_allocated_blocks;
    let num_allocated_nodes = meta.num_allocated_nodes;
    let volume_name = meta.volume_name;
    let creator_id = meta.creator_id;
    let ts_created = meta.ts_created;
    let ts_mounted = meta.ts_mounted;
    let unique_id = meta.unique_id;
    let addr_bitmap = meta.addr_bitmap;
    let addr_node_table = meta.addr_node_table;
    let addr_data = meta.addr_data;
    let last_allocated_node_id = meta.last_allocated_node_id;
    let last_allocated_data_block = meta.last_allocated_data_block;
    let tail = meta.tail;
    let checksum = meta.checksum;

    println!("Header:               {}", display_bytes(&header));
    println!("VendorID:              {}", display_bytes(&vendor_id));
    println!("BlockSize:             {block_size}");
    println!("Size (blocks):         {size}");
    println!("NodeCapacity:          {node_capacity}");
    println!("Origin:                {origin}");
    println!("NumAllocatedBlocks:    {num_allocated_blocks}");
    println!("NumAllocatedNodes:     {num_allocated_nodes}");
    println!("VolumeName:            {}", display_bytes(&volume_name));
    println!("CreatorID:             {creator_id}");
    println!("TsCreated (Myth epoch):{ts_created}");
    println!("TsMounted (Myth epoch):{ts_mounted}");
    println!("UniqueID:              {}", display_bytes(&unique_id));
    println!("AddrBitmap:            {addr_bitmap}");
    println!("AddrNodeTable:         {addr_node_table}");
    println!("AddrData:              {addr_data}");
    println!("LastAllocatedNodeID:   {last_allocated_node_id}");
    println!("LastAllocatedDataBlock:{last_allocated_data_block}");
    println!("Tail:                  {tail:#x}");
    println!("Checksum:              {checksum:#x}");
}

fn cmd_readnode(bin: &str, mut argv: ArgsOs) {
    let disk_path = next_path(bin, &mut argv, "disk path");
    let node_id: u32 = parse_int(bin, "node id", &next_str(bin, &mut argv, "node id"));

    let mut volume = open_volume(bin, &disk_path, false);
    let meta = writer::read_file_system(&mut volume)
        .unwrap_or_else(|e| error(bin, format_args!("{}: {e}", disk_path.display())));

    let n = node::get_node(&meta, &mut volume, node_id);
    if n.is_invalid() {
        error(bin, format_args!("node {node_id} does not exist"));
    }

    let id = n.id;
    let kind = n.kind;
    let flags = n.flags;
    let size = n.size;
    let creator_id = n.creator_id;
    let ts_created = n.ts_created;
    let ts_accessed = n.ts_accessed;
    let ts_modified = n.ts_modified;
    let owner = n.owner;
    let hard_link_count = n.hard_link_count;
    let direct_data = n.direct_data;
    let addr_singly_indirect = n.addr_singly_indirect;
    let addr_doubly_indirect = n.addr_doubly_indirect;
    let addr_triply_indirect = n.addr_triply_indirect;

    println!("ID:                  {id}");
    println!("Type:                {} ({})", kind, kind_name(kind));
    println!("Flags:               {flags:#x}");
    println!("Size:                {size}");
    println!("CreatorID:           {creator_id}");
    println!("TsCreated:           {ts_created}");
    println!("TsAccessed:          {ts_accessed}");
    println!("TsModified:          {ts_modified}");
    println!("Owner:               {owner}");
    println!("HardLinkCount:       {hard_link_count}");
    println!("DirectData:          {direct_data:?}");
    println!("AddrSinglyIndirect:  {addr_singly_indirect}");
    println!("AddrDoublyIndirect:  {addr_doubly_indirect}");
    println!("AddrTriplyIndirect:  {addr_triply_indirect}");

    match reader::read_node_content(&meta, &mut volume, &n) {
        Ok(content) => {
            const PREVIEW_LEN: usize = 256;
            let preview = &content[..content.len().min(PREVIEW_LEN)];
            println!("Content preview ({} of {} bytes):", preview.len(), size);
            println!("{}", String::from_utf8_lossy(preview));
        }
        Err(e) => eprintln!("{bin}: warning: failed to read node content: {e}"),
    }
}

/// Human-readable name for a node's on-disk type tag, including tags this
/// tool never creates itself (e.g. the reserved hard-link type).
fn kind_name(kind: u16) -> &'static str {
    match kind {
        1 => "file",
        2 => "directory",
        3 => "soft-link",
        4 => "hard-link (reserved)",
        _ => "unknown",
    }
}

fn cmd_createonroot(bin: &str, mut argv: ArgsOs) {
    let disk_path = next_path(bin, &mut argv, "disk path");
    let source_path = next_path(bin, &mut argv, "source file");
    let is_system = match argv.next() {
        Some(flag) => match flag.to_str() {
            Some("--system") => true,
            Some(other) => error(bin, format_args!("unknown option `{other}`")),
            None => error(bin, "invalid option"),
        },
        None => false,
    };

    let data = fs::read(&source_path)
        .unwrap_or_else(|e| error(bin, format_args!("{}: {e}", source_path.display())));

    let mut volume = open_volume(bin, &disk_path, false);
    let mut meta = writer::read_file_system(&mut volume)
        .unwrap_or_else(|e| error(bin, format_args!("{}: {e}", disk_path.display())));

    let node_id = writer::find_node_id(&meta, &mut volume)
        .unwrap_or_else(|e| error(bin, format_args!("cannot allocate a node id: {e}")));

    let mut n = FsNode::invalid();
    n.id = node_id;
    n.kind = NodeKind::File as u16;
    n.owner = 0;
    n.creator_id = if is_system {
        CREATOR_ID_MYTH_TOOL
    } else {
        CREATOR_ID_USER
    };
    n.hard_link_count = 1;

    writer::make_node(&mut meta, &mut volume, n, &data)
        .unwrap_or_else(|e| error(bin, format_args!("failed to create node: {e}")));

    // Not inserted into the root directory's entry stream: directory
    // insertion has no implementation to target (see DESIGN.md). The
    // caller cross-references this id with `readnode`.
    println!(
        "{}: created node {node_id} ({} bytes) from {}",
        disk_path.display(),
        data.len(),
        source_path.display()
    );
}

/// Trims trailing NUL bytes and renders the rest as a (possibly lossy)
/// UTF-8 string, for printing fixed-size byte-array superblock fields.
fn display_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
