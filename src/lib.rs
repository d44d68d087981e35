//! # Support KB
//!
//! The knowledge retrieval core of a customer-support chat backend: a small,
//! fully in-memory knowledge base with dual-strategy ranking and graceful
//! degradation when embeddings are unavailable.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌───────────────────┐
//! │ JSON sources │──▶│ Document Store │──▶│ Retrieval Engine  │
//! │ FAQ/categories│  │ (append-only)  │   │ semantic │ lexical│
//! └──────────────┘   └────────────────┘   └─────────┬─────────┘
//!                                                    │
//!                                          search / get_context
//!                                                    │
//!                                                    ▼
//!                                          downstream LLM prompt
//! ```
//!
//! ## Data Flow
//!
//! 1. The **store** ([`store`]) loads FAQ and category JSON sources into
//!    [`models::Document`]s with deterministic flattened `content`.
//! 2. The **engine** ([`engine`]) is built over the store; with an embedding
//!    capability ([`embedding`]) it precomputes a vector index, otherwise it
//!    runs in lexical mode.
//! 3. `search` ranks documents by cosine similarity or token overlap; every
//!    failure path degrades to lexical scoring instead of surfacing an error.
//! 4. `get_context` assembles a length-bounded context string for the prompt
//!    layer.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | `Document` sum type and `ScoredDocument` |
//! | [`store`] | In-memory store: ingestion, custom additions, snapshots |
//! | [`embedding`] | `Embedder` trait and OpenAI-compatible provider |
//! | [`engine`] | Dual-strategy retrieval and context assembly |

pub mod config;
pub mod embedding;
pub mod engine;
pub mod models;
pub mod store;

pub use engine::RetrievalEngine;
pub use models::{Document, ScoredDocument};
pub use store::DocumentStore;
