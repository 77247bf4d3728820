//! # ViewSwap Storage
//!
//! Durable state for the ViewSwap exchange.
//!
//! The exchange engine only sees three narrow contracts, each with a
//! persistent and an in-memory implementation:
//!
//! - **[`LinkLedger`]**: append-only link listing with base-26 identifiers
//!   ([`SegmentedLinkLog`] on disk, [`InMemoryLinkLedger`] for tests)
//! - **[`PointLedger`]**: participant records and atomic balance changes
//!   ([`ParticipantStore`] in redb, [`InMemoryPointLedger`])
//! - **[`ViewedSetStore`]**: which links each participant already viewed
//!   ([`ViewedStore`] in redb, [`InMemoryViewedSet`])
//!
//! [`ExchangeStorage`] opens the persistent implementations under one data
//! directory and prepares backup copies.
//!
//! ## Example
//!
//! ```rust,ignore
//! use viewswap_storage::{ExchangeStorage, ExchangeStorageConfig, PointLedger};
//! use viewswap_core::{ParticipantId, Points};
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = ExchangeStorage::open(ExchangeStorageConfig::with_base_dir("./data"))
//!         .await
//!         .unwrap();
//!     let alice = ParticipantId::new(1);
//!
//!     let points = storage.participants();
//!     points.ensure_participant(alice, None, false).await.unwrap();
//!     points.adjust(alice, Points::TENTH).await.unwrap();
//! }
//! ```

pub mod append_log;
pub mod composite;
pub mod error;
pub mod memory;
pub mod retry;
pub mod structured;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use viewswap_core::{Link, LinkId, NewLink, ParticipantId, Points};

// Re-exports
pub use append_log::{LinkLogConfig, SegmentInfo, SegmentedLinkLog};
pub use composite::{
    BackupFile, ExchangeStorage, ExchangeStorageConfig, SNAPSHOT_FILE_NAME, StorageSnapshot,
};
pub use error::StorageError;
pub use memory::{InMemoryLinkLedger, InMemoryPointLedger, InMemoryViewedSet};
pub use retry::RetryPolicy;
pub use structured::{ParticipantStore, PaymentRecord, RedbStorage, RedbStorageConfig, ViewedStore};

/// A verified participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    /// Display handle reported by the transport at creation
    pub handle: Option<String>,
    pub balance: Points,
    /// Unlimited submission, exempt from the submission cost
    pub privileged: bool,
    pub created_at_millis: i64,
}

impl ParticipantRecord {
    pub fn new(id: ParticipantId, handle: Option<String>, privileged: bool) -> Self {
        Self {
            id,
            handle,
            balance: Points::ZERO,
            privileged,
            created_at_millis: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Result of [`PointLedger::debit_if_at_least`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The amount was taken; `balance` is what remains
    Debited { balance: Points },
    /// Nothing was taken
    Insufficient { balance: Points },
}

/// Result of [`PointLedger::credit_payment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Credited { balance: Points },
    /// The charge id was already credited; nothing changed
    Duplicate,
}

/// Append-only collection of submitted links
///
/// Implementations assign identifiers and append under one writer lock,
/// so two concurrent submissions never receive the same identifier.
#[async_trait]
pub trait LinkLedger: Send + Sync {
    /// Normalize, assign the next identifier, and append
    async fn submit(&self, link: NewLink) -> Result<Link, StorageError>;

    /// Every link in insertion order
    async fn list_all(&self) -> Result<Vec<Link>, StorageError>;

    /// Number of links
    async fn count(&self) -> Result<usize, StorageError>;
}

/// Participant records and credit balances
///
/// Every method is atomic on its own. Adjustments of an unknown participant
/// fail with [`StorageError::NotFound`] and change nothing.
#[async_trait]
pub trait PointLedger: Send + Sync {
    /// Create the participant unless it already exists
    ///
    /// Returns the stored record and whether this call created it. An
    /// existing record is returned unchanged.
    async fn ensure_participant(
        &self,
        participant: ParticipantId,
        handle: Option<String>,
        privileged: bool,
    ) -> Result<(ParticipantRecord, bool), StorageError>;

    async fn get(&self, participant: ParticipantId)
    -> Result<Option<ParticipantRecord>, StorageError>;

    /// Current balance, or `None` for an unknown participant
    async fn balance(&self, participant: ParticipantId) -> Result<Option<Points>, StorageError> {
        Ok(self.get(participant).await?.map(|r| r.balance))
    }

    /// Whether the participant is privileged (unknown participants are not)
    async fn is_privileged(&self, participant: ParticipantId) -> Result<bool, StorageError> {
        Ok(self.get(participant).await?.is_some_and(|r| r.privileged))
    }

    /// Add `delta` (possibly negative) and return the new balance
    ///
    /// Never clamps.
    async fn adjust(&self, participant: ParticipantId, delta: Points) -> Result<Points, StorageError>;

    /// Subtract `amount` only if the balance covers it, in one step
    async fn debit_if_at_least(
        &self,
        participant: ParticipantId,
        amount: Points,
    ) -> Result<DebitOutcome, StorageError>;

    /// Credit a captured payment once per charge id
    async fn credit_payment(
        &self,
        participant: ParticipantId,
        charge_id: &str,
        amount: Points,
    ) -> Result<PaymentOutcome, StorageError>;
}

/// Set of (participant, link) pairs already viewed
#[async_trait]
pub trait ViewedSetStore: Send + Sync {
    /// Record a view; returns `true` only for the call that created it
    async fn record(&self, participant: ParticipantId, link: &LinkId) -> Result<bool, StorageError>;

    /// Every link the participant has viewed
    async fn viewed_by(&self, participant: ParticipantId) -> Result<HashSet<LinkId>, StorageError>;

    async fn contains(&self, participant: ParticipantId, link: &LinkId) -> Result<bool, StorageError>;

    /// Undo a view whose credit could not be applied; returns `true` if one was removed
    async fn forget(&self, participant: ParticipantId, link: &LinkId) -> Result<bool, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The engine holds these behind `Arc<dyn _>`
    fn _assert_object_safe(
        _: &dyn LinkLedger,
        _: &dyn PointLedger,
        _: &dyn ViewedSetStore,
    ) {
    }

    #[tokio::test]
    async fn test_default_balance_helpers() {
        let ledger = InMemoryPointLedger::new();
        let admin = ParticipantId::new(10);

        assert!(!ledger.is_privileged(admin).await.unwrap());
        ledger.ensure_participant(admin, None, true).await.unwrap();
        assert!(ledger.is_privileged(admin).await.unwrap());
        assert_eq!(ledger.balance(admin).await.unwrap(), Some(Points::ZERO));
    }
}
