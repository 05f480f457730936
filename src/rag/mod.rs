// src/rag/mod.rs

//! Retrieval-augmented context assembly: cost gate, hybrid ranking, and the
//! formatted context block handed to the prompt composer.

pub mod gate;
pub mod ranker;

pub use gate::{is_personal_query, should_use_rag};
pub use ranker::{RagContext, RagRanker};
