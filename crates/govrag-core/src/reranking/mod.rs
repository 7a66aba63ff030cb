pub mod cross_encoder;
pub mod reranker;

pub use cross_encoder::CrossEncoderReranker;
pub use reranker::{RerankOutcome, Reranker};
