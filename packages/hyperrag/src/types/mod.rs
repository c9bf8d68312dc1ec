//! Data model for the hypergraph and its pipeline.

pub mod batch;
pub mod config;
pub mod context;
pub mod document;
pub mod entity;
pub mod hyperedge;
pub mod key;

pub use batch::{ExtractionBatch, ParseWarning};
pub use config::{
    DocumentFormat, ExtractionDelimiters, GovernorConfig, HyperRagConfig, QueryParam, RetryConfig,
};
pub use context::ContextTable;
pub use document::{Chunk, FormattedDocument, RawDocument};
pub use entity::{Entity, PropertyMap};
pub use hyperedge::{HighOrderHyperedge, LowOrderHyperedge};
pub use key::{PairKey, RecordKey, SetKey};
