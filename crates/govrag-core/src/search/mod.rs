pub mod hybrid;

pub use hybrid::{HybridRetriever, RetrievalOutcome};
