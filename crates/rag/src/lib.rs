pub mod embedding;
pub mod indexer;
pub mod retriever;
pub mod store;

pub use embedding::{Embed, EmbeddingBackend, EmbeddingClient};
pub use indexer::{IngestOutcome, IngestRequest, Indexer};
pub use retriever::{
    rrf_fuse, HybridRetriever, Passage, Provenance, RankSource, Retrieval, RetrievalQuery, RRF_K,
};
pub use store::{
    ChunkInsert, DocumentInsert, DocumentRow, RagStore, RankedChunk, SearchFilters,
    StoreCapabilities, StoredDocument,
};
