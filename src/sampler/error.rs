use std::io;

use thiserror::Error;

use crate::metric_set::StorageError;
use crate::source::parse::ParseError;

/// Errors reported by configuration and sampling.
///
/// None are retried internally; the caller decides what to do next.
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("source {source_name} unavailable: {error}")]
    SourceUnavailable {
        source_name: String,
        #[source]
        error: io::Error,
    },

    #[error("sizing metric {name:?}: {source}")]
    Sizing {
        name: String,
        #[source]
        source: StorageError,
    },

    #[error("building metric set: {source}")]
    Allocation {
        #[source]
        source: StorageError,
    },

    #[error("sampler is not configured")]
    NotConfigured,

    #[error("sampler is already configured with set {set:?}")]
    AlreadyConfigured { set: String },

    #[error("sampler has been terminated")]
    Terminated,

    #[error("line {line}: {detail}")]
    FormatMismatch { line: usize, detail: FormatDetail },

    #[error("line {line}: metric {name:?} does not match the discovered schema")]
    SchemaMismatch { line: usize, name: String },

    #[error("line {line}: duplicate metric {name:?}")]
    DuplicateMetric { name: String, line: usize },

    #[error("invalid option {key:?}: {reason}")]
    InvalidOption { key: String, reason: String },
}

/// Why a sampling pass found no value where one was expected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatDetail {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("source ended after {found} of {expected} metrics")]
    Truncated { found: usize, expected: usize },
}

impl SamplerError {
    pub(crate) fn source_unavailable(source_name: &str, error: io::Error) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.to_string(),
            error,
        }
    }

    /// Stable label for logs and error counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::Sizing { .. } => "sizing",
            Self::Allocation { .. } => "allocation",
            Self::NotConfigured => "not_configured",
            Self::AlreadyConfigured { .. } => "already_configured",
            Self::Terminated => "terminated",
            Self::FormatMismatch { .. } => "format_mismatch",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::DuplicateMetric { .. } => "duplicate_metric",
            Self::InvalidOption { .. } => "invalid_option",
        }
    }
}
