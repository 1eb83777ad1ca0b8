//! primetime: a search-ingest-score pipeline for medical literature.
//!
//! Given a research idea distilled to a keyword list, the pipeline pulls
//! matching articles from a bibliographic corpus, enriches them with
//! citation counts and embeddings, maintains clusters over the embedding
//! space, forecasts per-article citation trajectories, and condenses
//! novelty, citation velocity, and recency into one opportunity score
//! normalized against the history of previous searches.
//!
//! The [`pipeline::Coordinator`] is the public entry point; everything
//! external (PubMed, CrossRef, OpenAlex, MeSH, the embedding model, the
//! database) sits behind the capability traits in [`adapters`],
//! [`embeddings`], and [`store`].

pub mod adapters;
pub mod cluster;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod scoring;
pub mod store;
pub mod trajectory;

pub use config::AppConfig;
pub use errors::{EmbedError, PipelineError, RemoteError, StoreError};
pub use ingest::IngestOutcome;
pub use pipeline::{Coordinator, ScoreStatus};
pub use store::{memory::MemoryStore, postgres::PostgresStore, Store};
