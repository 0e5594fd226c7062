//! Crate-wide error type for failures that are *not* part of the
//! client-visible 5xx taxonomy (§7) — those are represented as [`crate::message::Status`]
//! values routed through the normal response path instead of as `Result::Err`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport send failed on connection {conn}: {source}")]
    Send {
        conn: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no live connection available for server group '{group}'")]
    NoLiveConnection { group: String },

    #[error("rule chain '{0}' is not defined")]
    UnknownChain(String),

    #[error("rule chain cycle detected: '{0}' is reachable from itself")]
    ChainCycle(String),

    #[error("scheduler group '{0}' is already registered")]
    DuplicateGroup(String),

    #[error("scheduler group '{0}' is not registered")]
    UnknownGroup(String),

    #[error("rule grammar error at line {line}: {reason}")]
    RuleGrammar { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
