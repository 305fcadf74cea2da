use std::error::Error as StdError;
use thiserror::Error;

/// Errors raised by the persistent key-value store (the account snapshot and
/// the channel-id uniqueness registry). The store itself is an external
/// collaborator; this enum only distinguishes what the engine needs to react
/// to differently.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("{0}")]
    Other(#[from] Box<dyn StdError + Send + Sync + 'static>),
}

/// Errors raised by the peer message transport.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    #[error("peer did not respond before the transport's timeout")]
    Timeout,
    #[error("{0}")]
    Other(#[from] Box<dyn StdError + Send + Sync + 'static>),
}

/// Errors raised by the on-chain adapter (read, build/estimate/submit, gas price).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChainError {
    #[error("channel {0:?} was not found on-chain")]
    ChannelNotFound(crate::channel::ChannelId),
    #[error("transaction submission failed: {0}")]
    SubmissionFailed(String),
    #[error("timed out waiting for on-chain state to satisfy the expected condition")]
    RefreshTimedOut,
    #[error("{0}")]
    Other(#[from] Box<dyn StdError + Send + Sync + 'static>),
}

/// Returned by an `authorize` callback when the caller declines to pay the
/// estimated fee. Not logged as an error (§7).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("authorization declined")]
pub struct AuthorizationDeclined;

/// Failure modes of the reducer queue itself, as opposed to domain-level
/// claim rejections (which are represented as an unchanged `Ok` state, see
/// `incoming::validate_claim`).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum QueueError {
    #[error("queue is draining or has been torn down")]
    Closed,
    #[error("reducer reply channel was dropped")]
    Cancelled,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Top-level error type a reducer can fail with. Aggregates the external
/// boundaries so `outgoing`/`incoming`/`watcher` reducers can use `?`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationDeclined),
}
