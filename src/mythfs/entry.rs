//! Directory entry (`FsEntry`) wire-format codec.
//!
//! Only encode/decode of a single entry is implemented. Insertion, lookup
//! by name, and removal within a directory's data stream are out of scope:
//! they need a directory-stream abstraction this crate does not define.

/// Fixed header size, in bytes, before the variable-length name.
const HEADER_SIZE: usize = 4 + 2 + 2 + 1;

/// A decoded directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub node_id: u32,
    pub node_type: u16,
    pub entry_size: u16,
    pub name: Vec<u8>,
}

/// Errors from decoding a directory entry from a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer too short to contain an entry header")]
    BufferTooShort,
    #[error("entry_size is smaller than the header plus name length")]
    EntrySizeTooSmall,
    #[error("entry extends past the end of the supplied buffer")]
    Truncated,
}

impl FsEntry {
    /// Encodes this entry as `NodeID:u32, NodeType:u16, EntrySize:u16,
    /// NameLength:u8, Name[NameLength]`, little-endian, padded with zero
    /// bytes out to `entry_size` (a multiple of 4).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.entry_size as usize);
        buf.extend_from_slice(&self.node_id.to_le_bytes());
        buf.extend_from_slice(&self.node_type.to_le_bytes());
        buf.extend_from_slice(&self.entry_size.to_le_bytes());
        buf.push(self.name.len() as u8);
        buf.extend_from_slice(&self.name);
        buf.resize(self.entry_size as usize, 0);
        buf
    }

    /// Decodes a single entry from the start of `buf`. Does not consume
    /// `buf`; callers advance by `entry_size` themselves to step through a
    /// directory's data stream.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_SIZE {
            return Err(DecodeError::BufferTooShort);
        }
        let node_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let node_type = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        let entry_size = u16::from_le_bytes(buf[6..8].try_into().unwrap());
        let name_length = buf[8] as usize;

        if (entry_size as usize) < HEADER_SIZE + name_length {
            return Err(DecodeError::EntrySizeTooSmall);
        }
        if buf.len() < HEADER_SIZE + name_length {
            return Err(DecodeError::Truncated);
        }

        let name = buf[HEADER_SIZE..HEADER_SIZE + name_length].to_vec();
        Ok(Self {
            node_id,
            node_type,
            entry_size,
            name,
        })
    }

    /// Rounds `name_length` up to the entry size an encoder should use: the
    /// fixed header plus the name, rounded up to a multiple of 4.
    pub fn padded_entry_size(name_length: usize) -> u16 {
        let raw = HEADER_SIZE + name_length;
        (raw.div_ceil(4) * 4) as u16
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let e = FsEntry {
            node_id: 42,
            node_type: 2,
            entry_size: FsEntry::padded_entry_size(5),
            name: b"hello".to_vec(),
        };
        let bytes = e.encode();
        let decoded = FsEntry::decode(&bytes).unwrap();
        assert_eq!(decoded, e);
    }

    #[test]
    fn entry_size_is_multiple_of_four() {
        for name_len in 0..20usize {
            assert_eq!(FsEntry::padded_entry_size(name_len) % 4, 0);
        }
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let err = FsEntry::decode(&[0u8; 3]).unwrap_err();
        assert_eq!(err, DecodeError::BufferTooShort);
    }

    #[test]
    fn decode_rejects_inconsistent_entry_size() {
        let mut buf = vec![0u8; HEADER_SIZE + 3];
        buf[6..8].copy_from_slice(&2u16.to_le_bytes()); // smaller than header
        buf[8] = 3;
        let err = FsEntry::decode(&buf).unwrap_err();
        assert_eq!(err, DecodeError::EntrySizeTooSmall);
    }

    #[test]
    fn decode_rejects_truncated_name() {
        let mut buf = vec![0u8; HEADER_SIZE + 1];
        buf[6..8].copy_from_slice(&16u16.to_le_bytes());
        buf[8] = 5; // claims 5 name bytes, buffer has 1
        let err = FsEntry::decode(&buf).unwrap_err();
        assert_eq!(err, DecodeError::Truncated);
    }
}
