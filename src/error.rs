//! Error taxonomy shared by every layer of the client.

use std::fmt;

use crate::model::Round;

/// Opaque transport failure from a concrete endpoint implementation
/// (HTTP, gRPC, gossip, ...). The core never inspects this beyond
/// logging and treating it as "this endpoint failed".
pub type BoxTransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by [`crate::client::Client`] implementations and the
/// wrappers in this crate.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// The requested round has not been produced yet, or does not exist.
    #[error("round {round:?} not available")]
    NoResult { round: Option<Round> },

    /// Network/IO failure talking to an endpoint.
    #[error("transport error: {source}")]
    Transport {
        #[source]
        source: BoxTransportError,
    },

    /// A beacon failed cryptographic or chain-continuity verification.
    #[error("verification failed for round {round}: {reason}")]
    VerificationFailed { round: Round, reason: String },

    /// The calling context/token was cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,

    /// The client (or one of its layers) has already been closed.
    #[error("client closed")]
    Closed,

    /// Invalid configuration detected at construction time.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The configured `chain_hash` and `chain_info` disagree, or no root
    /// of trust was supplied and `insecure` was not set.
    #[error("root of trust mismatch: {0}")]
    RootOfTrustMismatch(String),
}

impl ClientError {
    pub fn transport(source: impl Into<BoxTransportError>) -> Self {
        ClientError::Transport {
            source: source.into(),
        }
    }

    /// `true` for errors considered local to a single endpoint attempt,
    /// i.e. the kind [`crate::optimizing::OptimizingClient`] treats as an
    /// "infinite RTT" sample rather than surfacing immediately.
    pub fn is_endpoint_local(&self) -> bool {
        matches!(self, ClientError::NoResult { .. } | ClientError::Transport { .. })
    }
}

/// Helper for error variants that want a short, loggable label without
/// pulling in the full `Display` formatting (used in structured `tracing`
/// fields).
pub(crate) struct Kind<'a>(pub &'a ClientError);

impl fmt::Display for Kind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.0 {
            ClientError::NoResult { .. } => "no_result",
            ClientError::Transport { .. } => "transport",
            ClientError::VerificationFailed { .. } => "verification_failed",
            ClientError::Cancelled => "cancelled",
            ClientError::Closed => "closed",
            ClientError::ConfigInvalid(_) => "config_invalid",
            ClientError::RootOfTrustMismatch(_) => "root_of_trust_mismatch",
        };
        f.write_str(label)
    }
}
