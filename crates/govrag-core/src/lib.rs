//! Retrieval-augmented query engine with grounded citations over a private
//! corpus of Korean government documents.
//!
//! Module layout mirrors the dependency order of the pipeline, leaves
//! first: index adapters, then hybrid retrieval, reranking, evidence
//! assembly, prompting, generation, enforcement, citation tracking,
//! formatting, session storage, query rewriting, topic/scope resolution,
//! and finally the orchestrator that wires all of the above per request.

pub mod citation;
pub mod config;
pub mod docscope;
pub mod enforcer;
pub mod error;
pub mod evidence;
pub mod formatter;
pub mod generator;
pub mod http;
pub mod index;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod reranking;
pub mod rewriter;
pub mod search;
pub mod session;
pub mod summarizer;
pub mod topic;
pub mod types;

pub use config::GovRagConfig;
pub use error::GovRagError;
pub use orchestrator::{ChatOrchestrator, ChatTurnRequest, ChatTurnResponse, StreamEvent};
pub use session::{SessionStore, SessionStoreConfig};
pub use types::{Chunk, ChunkKind, CitationMap, Evidence, Locator, Session, Turn};
