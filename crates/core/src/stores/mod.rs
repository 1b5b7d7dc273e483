pub mod memory;
pub mod qdrant;

pub use memory::InMemoryVectorStore;
pub use qdrant::QdrantStore;

use crate::Chunk;
use std::collections::BTreeMap;

/// Highest chunk id each file in the batch may keep. Anything numbered above
/// it is left over from an earlier, longer ingest of the same file.
fn batch_totals(chunks: &[Chunk]) -> BTreeMap<&str, u32> {
    let mut totals = BTreeMap::new();
    for chunk in chunks {
        let total = chunk.total_chunks.max(chunk.chunk_id);
        totals
            .entry(chunk.source_file.as_str())
            .and_modify(|current: &mut u32| *current = (*current).max(total))
            .or_insert(total);
    }
    totals
}
