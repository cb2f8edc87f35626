use thiserror::Error;

/// Everything that can go wrong between a diagnostic and an applied patch.
///
/// Analyzer and inference failures, plus structural and semantic patch
/// failures, are retried by the coordinator up to its bounded limit.
/// `StaleContext` and `RetriesExhausted` are terminal and always surfaced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FixError {
    #[error("static analyzer unavailable: {0}")]
    AnalysisUnavailable(String),

    #[error("static analysis timed out after {0}s")]
    AnalysisTimeout(u64),

    #[error("inference backend unavailable: {0}")]
    InferenceUnavailable(String),

    #[error("inference timed out after {0}s")]
    InferenceTimeout(u64),

    #[error("inference returned an empty completion")]
    InferenceEmptyResponse,

    #[error("no usable patch in model output: {0}")]
    MalformedPatch(String),

    #[error("patch touches a file other than the target: {0}")]
    MultiFileDiff(String),

    #[error("hunk {hunk} spans lines {start}..={end} outside a {file_lines}-line file")]
    PatchOutOfBounds {
        hunk: usize,
        start: u32,
        end: u32,
        file_lines: u32,
    },

    #[error("hunks {first} and {second} overlap")]
    PatchOverlap { first: usize, second: usize },

    #[error("source file changed since the task snapshot was taken")]
    StaleContext,

    #[error("gave up after {attempts} attempts, last failure: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl FixError {
    /// Whether the coordinator may spend another attempt on this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FixError::StaleContext | FixError::RetriesExhausted { .. }
        )
    }
}
