//! # Node Serialization
//!
//! Tree nodes persist as records; this module defines the byte codecs for
//! keys and values and the node wire format.
//!
//! ## Wire Format
//!
//! Every serialized node starts with a 12-byte little-endian prefix:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ------------
//! 0       4     parent_id
//! 4       4     entry_count
//! 8       4     child_count
//! ```
//!
//! followed by the entries and then the child ids as `u32`s. Two entry
//! encodings exist:
//!
//! - **Fixed key, fixed value**: each entry is `key_bytes || value_bytes`.
//! - **Variable key, fixed value**: each entry is
//!   `key_len: i32 | key_bytes | value_bytes`.
//!
//! Variable-length *values* are not supported; the codec refuses them at
//! construction. A serialized node must stay under 64 KiB.
//!
//! The node id is not part of the body — it lives in the record chain's
//! head block — so deserialization receives the id from the caller.

use eyre::{bail, ensure, eyre, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::node::TreeNode;
use crate::config::MAX_NODE_SIZE;
use crate::encoding::{read_u32_le, write_u32_le};

/// Byte codec for a key or value type.
///
/// `fixed_len` returns the exact encoded size for fixed-size types and
/// `None` for variable-size ones. `encode` appends to `out`; `decode`
/// consumes exactly the bytes it is given.
pub trait Codec<T> {
    fn fixed_len(&self) -> Option<usize>;
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<()>;
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// Fixed 4-byte codec for `u32` (little-endian).
#[derive(Debug, Clone, Copy, Default)]
pub struct U32Codec;

impl Codec<u32> for U32Codec {
    fn fixed_len(&self) -> Option<usize> {
        Some(4)
    }

    fn encode(&self, value: &u32, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<u32> {
        read_u32_le(bytes, 0)
    }
}

/// Fixed 4-byte codec for `i32` (little-endian).
#[derive(Debug, Clone, Copy, Default)]
pub struct I32Codec;

impl Codec<i32> for I32Codec {
    fn fixed_len(&self) -> Option<usize> {
        Some(4)
    }

    fn encode(&self, value: &i32, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<i32> {
        Ok(read_u32_le(bytes, 0)? as i32)
    }
}

/// Fixed 16-byte codec for opaque ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bytes16Codec;

impl Codec<[u8; 16]> for Bytes16Codec {
    fn fixed_len(&self) -> Option<usize> {
        Some(16)
    }

    fn encode(&self, value: &[u8; 16], out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(value);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<[u8; 16]> {
        ensure!(
            bytes.len() >= 16,
            "16-byte key truncated to {} bytes",
            bytes.len()
        );
        let mut value = [0u8; 16];
        value.copy_from_slice(&bytes[..16]);
        Ok(value)
    }
}

pub const NODE_HEADER_SIZE: usize = 12;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct NodeHeader {
    parent_id: U32,
    entry_count: U32,
    child_count: U32,
}

const _: () = assert!(size_of::<NodeHeader>() == NODE_HEADER_SIZE);

impl NodeHeader {
    fn new(parent_id: u32, entry_count: u32, child_count: u32) -> Self {
        Self {
            parent_id: U32::new(parent_id),
            entry_count: U32::new(entry_count),
            child_count: U32::new(child_count),
        }
    }

    fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= NODE_HEADER_SIZE,
            "buffer too small for NodeHeader: {} < {}",
            bytes.len(),
            NODE_HEADER_SIZE
        );
        Self::ref_from_bytes(&bytes[..NODE_HEADER_SIZE])
            .map_err(|e| eyre!("failed to read NodeHeader: {:?}", e))
    }

    zerocopy_accessors! {
        parent_id: u32,
        entry_count: u32,
        child_count: u32,
    }
}

/// Serializer for `TreeNode<K, V>` using the caller's key/value codecs.
pub struct NodeCodec<K, V> {
    key: Box<dyn Codec<K>>,
    value: Box<dyn Codec<V>>,
    value_len: usize,
}

impl<K, V> NodeCodec<K, V>
where
    K: Ord,
{
    /// Builds a node codec. Variable-length values are refused here, so
    /// every later serialize call can assume a fixed value width.
    pub fn new(key: Box<dyn Codec<K>>, value: Box<dyn Codec<V>>) -> Result<Self> {
        let Some(value_len) = value.fixed_len() else {
            bail!("variable-length values are not supported by the node serializer");
        };
        Ok(Self {
            key,
            value,
            value_len,
        })
    }

    pub fn serialize(&self, node: &TreeNode<K, V>) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(NODE_HEADER_SIZE + node.entry_count() * 16);
        let header = NodeHeader::new(
            node.parent_id(),
            node.entry_count() as u32,
            node.children().len() as u32,
        );
        out.extend_from_slice(header.as_bytes());

        let fixed_key = self.key.fixed_len();
        for (key, value) in node.entries() {
            match fixed_key {
                Some(expected) => {
                    let start = out.len();
                    self.key.encode(key, &mut out)?;
                    ensure!(
                        out.len() - start == expected,
                        "fixed-size key codec produced {} bytes, expected {}",
                        out.len() - start,
                        expected
                    );
                }
                None => {
                    // Length-prefixed key: reserve the i32, encode, patch.
                    let len_at = out.len();
                    out.extend_from_slice(&[0u8; 4]);
                    self.key.encode(key, &mut out)?;
                    let key_len = out.len() - len_at - 4;
                    ensure!(
                        key_len <= i32::MAX as usize,
                        "serialized key of {} bytes overflows the length prefix",
                        key_len
                    );
                    write_u32_le(&mut out, len_at, key_len as u32)?;
                }
            }

            let start = out.len();
            self.value.encode(value, &mut out)?;
            ensure!(
                out.len() - start == self.value_len,
                "fixed-size value codec produced {} bytes, expected {}",
                out.len() - start,
                self.value_len
            );
        }

        for &child in node.children() {
            out.extend_from_slice(&child.to_le_bytes());
        }

        ensure!(
            out.len() < MAX_NODE_SIZE,
            "serialized node of {} bytes exceeds the {}-byte limit",
            out.len(),
            MAX_NODE_SIZE
        );
        Ok(out)
    }

    /// Rebuilds a node from its serialized body. The id comes from the
    /// record that stored the body.
    pub fn deserialize(&self, id: u32, bytes: &[u8]) -> Result<TreeNode<K, V>> {
        let header = NodeHeader::from_bytes(bytes)?;
        let entry_count = header.entry_count() as usize;
        let child_count = header.child_count() as usize;

        let mut offset = NODE_HEADER_SIZE;
        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let key_len = match self.key.fixed_len() {
                Some(len) => len,
                None => {
                    let len = read_u32_le(bytes, offset)? as i32;
                    ensure!(
                        len >= 0,
                        "node {} declares negative key length {}",
                        id,
                        len
                    );
                    offset += 4;
                    len as usize
                }
            };
            ensure!(
                offset + key_len + self.value_len <= bytes.len(),
                "node {} body truncated at entry offset {}",
                id,
                offset
            );

            let key = self.key.decode(&bytes[offset..offset + key_len])?;
            offset += key_len;
            let value = self.value.decode(&bytes[offset..offset + self.value_len])?;
            offset += self.value_len;
            entries.push((key, value));
        }

        let mut children = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            children.push(read_u32_le(bytes, offset)?);
            offset += 4;
        }

        ensure!(
            offset == bytes.len(),
            "node {} body has {} trailing bytes",
            id,
            bytes.len() - offset
        );
        Ok(TreeNode::new(id, header.parent_id(), entries, children))
    }
}

impl<K, V> std::fmt::Debug for NodeCodec<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCodec")
            .field("fixed_key", &self.key.fixed_len())
            .field("value_len", &self.value_len)
            .finish()
    }
}

/// Variable-length string codec used by composite keys; the node format
/// length-prefixes it, so the encoding is the raw UTF-8 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn fixed_len(&self) -> Option<usize> {
        None
    }

    fn encode(&self, value: &String, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}
