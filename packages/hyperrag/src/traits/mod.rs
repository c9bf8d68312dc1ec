//! Core trait abstractions for the hyperrag library.
//!
//! These traits define the interfaces that applications implement
//! to provide language models, embeddings, tokenization and storage.

pub mod embedding;
pub mod llm;
pub mod store;
pub mod tokenizer;
