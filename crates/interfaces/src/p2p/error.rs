use crate::consensus::ConsensusError;
use rbtp_primitives::{BlockNumber, GotExpected, GotExpectedBoxed, WithPeerId, B256};
use tokio::sync::{mpsc, oneshot};

/// Result alias for the outcome of a request.
pub type RequestResult<T> = Result<T, RequestError>;

/// Result alias for a request answered by a peer.
pub type PeerRequestResult<T> = RequestResult<WithPeerId<T>>;

/// Error variants that can happen when sending requests to a session.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Closed channel to the peer.
    #[error("closed channel to the peer")]
    ChannelClosed,
    /// Not connected to the peer.
    #[error("not connected to the peer")]
    NotConnected,
    /// Connection to a peer dropped while handling the request.
    #[error("connection to a peer dropped while handling the request")]
    ConnectionDropped,
    /// Request timed out while awaiting response.
    #[error("request timed out while awaiting response")]
    Timeout,
    /// Received bad response.
    #[error("received bad response")]
    BadResponse,
}

impl<T> From<mpsc::error::SendError<T>> for RequestError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}

impl From<oneshot::error::RecvError> for RequestError {
    fn from(_: oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}

/// Result alias for downloader outcomes.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that can terminate or restart a download.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// A peer answered with no data.
    #[error("received an empty response")]
    EmptyResponse,

    /// A downloaded header failed validation.
    #[error("header {hash} failed validation: {error}")]
    HeaderValidation {
        /// Hash of the offending header.
        hash: B256,
        /// The validation failure.
        error: ConsensusError,
    },

    /// A downloaded body does not match its header.
    #[error("body for {hash} failed validation: {error}")]
    BodyValidation {
        /// Hash of the block the body was requested for.
        hash: B256,
        /// The validation failure.
        error: ConsensusError,
    },

    /// Response headers did not land on the expected block number.
    #[error("mismatched header block number: {0}")]
    MismatchedBlockNumber(GotExpected<BlockNumber>),

    /// The first header of a sync does not attach to the requested tip.
    #[error("invalid sync tip: {0}")]
    InvalidTip(GotExpectedBoxed<B256>),

    /// The skeleton filler found a gap that does not link up.
    #[error("headers do not link at block {block_number}")]
    BrokenLinkage {
        /// The block number where linkage failed.
        block_number: BlockNumber,
    },

    /// A header needed for scheduling is missing locally.
    #[error("missing header for block {block_number}")]
    MissingHeader {
        /// The missing block number.
        block_number: BlockNumber,
    },

    /// A requested state node was not delivered.
    #[error("missing state node {hash}")]
    MissingStateNode {
        /// Hash of the missing node.
        hash: B256,
    },

    /// A peer delivered a state node whose hash does not match.
    #[error("state node hash mismatch: {0}")]
    StateNodeMismatch(GotExpectedBoxed<B256>),

    /// The sync was cancelled.
    #[error("download cancelled")]
    Cancelled,

    /// A downloaded block failed to import locally.
    #[error("block import failed: {0}")]
    Import(String),

    /// The underlying request failed.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Reading from local storage failed while scheduling.
    #[error(transparent)]
    Provider(#[from] crate::provider::ProviderError),
}
