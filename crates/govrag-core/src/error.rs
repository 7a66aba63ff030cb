//! Crate-wide error kinds.
//!
//! Library code returns `Result<T, GovRagError>`; glue code at the outer
//! boundaries (HTTP handlers, the binary entry point) uses `anyhow` the way
//! the rest of this crate already does.

use thiserror::Error;

use crate::orchestrator::OrchestratorState;

#[derive(Debug, Error)]
pub enum GovRagError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("session {session_id} has a turn already in flight")]
    SessionBusy { session_id: String },

    #[error("session {session_id} not found")]
    SessionNotFound { session_id: String },

    #[error("retrieval backend unavailable: {reason}")]
    RetrievalUnavailable { reason: String },

    #[error("model backend unavailable: {reason}")]
    ModelUnavailable { reason: String },

    #[error("turn cancelled")]
    Cancelled,

    #[error("state {state:?} exceeded its deadline")]
    Timeout { state: OrchestratorState },

    #[error("insufficient evidence")]
    InsufficientEvidence,

    #[error("backend overloaded")]
    Overloaded,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GovRagError {
    /// Stable machine-readable client code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::SessionBusy { .. } => "session_busy",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::RetrievalUnavailable { .. } => "retrieval_unavailable",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::Cancelled => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::InsufficientEvidence => "insufficient_evidence",
            Self::Overloaded => "overloaded",
            Self::Internal(_) => "internal",
        }
    }

    /// Korean user-facing message.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput { .. } => "입력값이 올바르지 않습니다.".to_string(),
            Self::SessionBusy { .. } => "이전 요청을 처리 중입니다. 잠시 후 다시 시도해 주세요.".to_string(),
            Self::SessionNotFound { .. } => "해당 세션을 찾을 수 없습니다.".to_string(),
            Self::RetrievalUnavailable { .. } => "검색 엔진에 연결할 수 없습니다.".to_string(),
            Self::ModelUnavailable { .. } => "응답 생성 모델에 연결할 수 없습니다.".to_string(),
            Self::Cancelled => "요청이 취소되었습니다.".to_string(),
            Self::Timeout { .. } => "요청 처리 시간이 초과되었습니다.".to_string(),
            Self::InsufficientEvidence => "제공된 문서에서 해당 정보를 찾을 수 없습니다".to_string(),
            Self::Overloaded => "서버가 혼잡합니다. 잠시 후 다시 시도해 주세요.".to_string(),
            Self::Internal(_) => "내부 오류가 발생했습니다.".to_string(),
        }
    }

    /// True for error kinds that are recovered locally rather than
    /// surfaced verbatim to the client (callers still decide what to do).
    pub fn is_recoverable_locally(&self) -> bool {
        matches!(self, Self::RetrievalUnavailable { .. })
    }
}

impl From<tantivy::TantivyError> for GovRagError {
    fn from(e: tantivy::TantivyError) -> Self {
        Self::RetrievalUnavailable {
            reason: e.to_string(),
        }
    }
}

impl From<lancedb::Error> for GovRagError {
    fn from(e: lancedb::Error) -> Self {
        Self::RetrievalUnavailable {
            reason: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for GovRagError {
    fn from(e: reqwest::Error) -> Self {
        Self::ModelUnavailable {
            reason: e.to_string(),
        }
    }
}

impl From<std::io::Error> for GovRagError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for GovRagError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("json: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_evidence_is_success_shaped_message() {
        let err = GovRagError::InsufficientEvidence;
        assert_eq!(err.user_message(), "제공된 문서에서 해당 정보를 찾을 수 없습니다");
        assert_eq!(err.code(), "insufficient_evidence");
    }

    #[test]
    fn retrieval_unavailable_recovers_locally() {
        let err = GovRagError::RetrievalUnavailable {
            reason: "vector index down".into(),
        };
        assert!(err.is_recoverable_locally());
        assert!(!GovRagError::Overloaded.is_recoverable_locally());
    }
}
