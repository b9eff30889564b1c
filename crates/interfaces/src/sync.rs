use rbtp_primitives::BlockNumber;

/// The node's synchronization status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Caught up with the network.
    #[default]
    Idle,
    /// Bulk-downloading towards a target.
    Syncing {
        /// The highest block the sync is aiming for.
        target: BlockNumber,
    },
}

impl SyncState {
    /// Whether a bulk sync is running.
    pub const fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing { .. })
    }
}

/// Receives sync status transitions, e.g. to pause local mining or tx
/// propagation while bulk downloading.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait SyncStateUpdater: Send + Sync + std::fmt::Debug {
    /// Notifies about a status change.
    fn update_sync_state(&self, state: SyncState);
}

/// A [`SyncStateUpdater`] that does nothing.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct NoopSyncStateUpdater;

impl SyncStateUpdater for NoopSyncStateUpdater {
    fn update_sync_state(&self, _: SyncState) {}
}
