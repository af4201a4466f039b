//! Reassembly of chunked content replies.
//!
//! A reply of `items_count` documents arrives as independent chunks, each
//! tagged with its item index, chunk index and the chunk count of its item.
//! Chunks may arrive in any order and interleave across items.

use std::collections::BTreeMap;

use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("item index {item_index} out of range for {items_count} items")]
    ItemOutOfRange { item_index: u32, items_count: u32 },
    #[error("chunk index {chunk_index} out of range for {chunks_count} chunks")]
    ChunkOutOfRange { chunk_index: u32, chunks_count: u32 },
    #[error("item {item_index} announced {announced} chunks, previously {expected}")]
    ChunkCountMismatch {
        item_index: u32,
        expected: u32,
        announced: u32,
    },
}

/// Position of one chunk within a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPosition {
    pub item_index: u32,
    pub items_count: u32,
    pub chunk_index: u32,
    pub chunks_count: u32,
}

/// Partially received reply: item index to chunk slots.
#[derive(Debug, Default)]
struct ChunkBuffer {
    items: BTreeMap<u32, Vec<Option<String>>>,
}

impl ChunkBuffer {
    fn is_complete(&self, items_count: u32) -> bool {
        self.items.len() == items_count as usize
            && self.items.values().all(|slots| slots.iter().all(Option::is_some))
    }

    fn assemble(&self) -> Vec<String> {
        self.items
            .values()
            .map(|slots| slots.iter().flatten().map(String::as_str).collect())
            .collect()
    }
}

/// Per-request chunk buffers.
///
/// Buffers are created lazily on the first chunk and removed by
/// [`ChunkReassembler::discard`] when the owning request is evicted.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    buffers: DashMap<Uuid, ChunkBuffer>,
}

impl ChunkReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one chunk. Returns the assembled items, in item order, once every
    /// chunk of every item has arrived. Duplicate chunks overwrite.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError`] if the position is out of range or disagrees with
    /// earlier chunks of the same item.
    pub fn feed(
        &self,
        request_id: Uuid,
        position: ChunkPosition,
        data: String,
    ) -> Result<Option<Vec<String>>, ChunkError> {
        let ChunkPosition {
            item_index,
            items_count,
            chunk_index,
            chunks_count,
        } = position;

        if item_index >= items_count {
            return Err(ChunkError::ItemOutOfRange {
                item_index,
                items_count,
            });
        }
        if chunk_index >= chunks_count {
            return Err(ChunkError::ChunkOutOfRange {
                chunk_index,
                chunks_count,
            });
        }

        let mut buffer = self.buffers.entry(request_id).or_default();
        let slots = buffer
            .items
            .entry(item_index)
            .or_insert_with(|| vec![None; chunks_count as usize]);

        #[allow(clippy::cast_possible_truncation)]
        let expected = slots.len() as u32;
        if expected != chunks_count {
            return Err(ChunkError::ChunkCountMismatch {
                item_index,
                expected,
                announced: chunks_count,
            });
        }
        slots[chunk_index as usize] = Some(data);

        if buffer.is_complete(items_count) {
            Ok(Some(buffer.assemble()))
        } else {
            Ok(None)
        }
    }

    /// Drop the buffer of `request_id`. Returns `true` if one existed.
    pub fn discard(&self, request_id: Uuid) -> bool {
        self.buffers.remove(&request_id).is_some()
    }

    #[must_use]
    pub fn contains(&self, request_id: Uuid) -> bool {
        self.buffers.contains_key(&request_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Split `text` into chunks of at most `chunk_size` characters.
///
/// Always yields at least one chunk, so empty text is sent as a single
/// empty chunk.
#[must_use]
pub fn split_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut chars = 0;
    for ch in text.chars() {
        current.push(ch);
        chars += 1;
        if chars == chunk_size {
            chunks.push(std::mem::take(&mut current));
            chars = 0;
        }
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn pos(item_index: u32, items_count: u32, chunk_index: u32, chunks_count: u32) -> ChunkPosition {
        ChunkPosition {
            item_index,
            items_count,
            chunk_index,
            chunks_count,
        }
    }

    #[test]
    fn single_item_completes_on_last_chunk() {
        let reassembler = ChunkReassembler::new();
        let id = Uuid::new_v4();
        assert_eq!(reassembler.feed(id, pos(0, 1, 1, 2), "lo".into()).unwrap(), None);
        let done = reassembler.feed(id, pos(0, 1, 0, 2), "hel".into()).unwrap();
        assert_eq!(done, Some(vec!["hello".to_string()]));
    }

    #[test]
    fn items_are_returned_in_item_order() {
        let reassembler = ChunkReassembler::new();
        let id = Uuid::new_v4();
        assert!(reassembler.feed(id, pos(1, 2, 0, 1), "b".into()).unwrap().is_none());
        let done = reassembler.feed(id, pos(0, 2, 0, 1), "a".into()).unwrap();
        assert_eq!(done, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn buffers_are_isolated_per_request() {
        let reassembler = ChunkReassembler::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(reassembler.feed(a, pos(0, 1, 0, 2), "x".into()).unwrap().is_none());
        assert!(reassembler.feed(b, pos(0, 1, 1, 2), "y".into()).unwrap().is_none());
        assert_eq!(reassembler.len(), 2);
        assert!(reassembler.discard(a));
        assert!(!reassembler.discard(a));
        assert!(reassembler.contains(b));
    }

    #[test]
    fn out_of_range_positions_are_rejected() {
        let reassembler = ChunkReassembler::new();
        let id = Uuid::new_v4();
        assert_eq!(
            reassembler.feed(id, pos(2, 2, 0, 1), String::new()),
            Err(ChunkError::ItemOutOfRange {
                item_index: 2,
                items_count: 2
            })
        );
        assert_eq!(
            reassembler.feed(id, pos(0, 1, 3, 3), String::new()),
            Err(ChunkError::ChunkOutOfRange {
                chunk_index: 3,
                chunks_count: 3
            })
        );
    }

    #[test]
    fn conflicting_chunk_counts_are_rejected() {
        let reassembler = ChunkReassembler::new();
        let id = Uuid::new_v4();
        reassembler.feed(id, pos(0, 1, 0, 3), "a".into()).unwrap();
        assert!(matches!(
            reassembler.feed(id, pos(0, 1, 1, 2), "b".into()),
            Err(ChunkError::ChunkCountMismatch { .. })
        ));
    }

    #[test]
    fn split_respects_char_boundaries() {
        assert_eq!(split_chunks("", 4), vec![String::new()]);
        assert_eq!(split_chunks("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(split_chunks("ééééé", 2), vec!["éé", "éé", "é"]);
        assert_eq!(split_chunks("abcd", 4), vec!["abcd"]);
    }

    proptest! {
        #[test]
        fn any_arrival_order_reassembles_the_same_items(
            items in prop::collection::vec("[a-z0-9]{0,40}", 1..5),
            chunk_size in 1usize..8,
            seed in any::<u64>(),
        ) {
            let reassembler = ChunkReassembler::new();
            let id = Uuid::new_v4();
            #[allow(clippy::cast_possible_truncation)]
            let items_count = items.len() as u32;

            let mut chunks: Vec<(ChunkPosition, String)> = Vec::new();
            for (item_index, item) in items.iter().enumerate() {
                let parts = split_chunks(item, chunk_size);
                #[allow(clippy::cast_possible_truncation)]
                let chunks_count = parts.len() as u32;
                for (chunk_index, part) in parts.into_iter().enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    chunks.push((
                        pos(item_index as u32, items_count, chunk_index as u32, chunks_count),
                        part,
                    ));
                }
            }

            // Deterministic shuffle driven by the seed.
            let mut state = seed | 1;
            for i in (1..chunks.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                #[allow(clippy::cast_possible_truncation)]
                let j = (state % (i as u64 + 1)) as usize;
                chunks.swap(i, j);
            }

            let total = chunks.len();
            let mut assembled = None;
            for (n, (position, data)) in chunks.into_iter().enumerate() {
                let out = reassembler.feed(id, position, data).unwrap();
                if n + 1 < total {
                    prop_assert!(out.is_none());
                } else {
                    assembled = out;
                }
            }
            prop_assert_eq!(assembled, Some(items));
        }
    }
}
