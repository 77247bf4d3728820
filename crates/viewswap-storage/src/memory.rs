//! In-memory storage implementations
//!
//! This module provides in-memory implementations of the ledger traits,
//! suitable for testing and dev-mode runs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use viewswap_core::{Link, LinkId, NewLink, ParticipantId, Points, normalize_url};

use crate::error::StorageError;
use crate::{DebitOutcome, LinkLedger, ParticipantRecord, PaymentOutcome, PointLedger, ViewedSetStore};

/// In-memory link ledger
///
/// Segmentation only matters on disk, so this keeps one flat list.
#[derive(Debug, Default)]
pub struct InMemoryLinkLedger {
    links: RwLock<Vec<Link>>,
    fail_appends: AtomicBool,
}

impl InMemoryLinkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent submissions fail with an I/O error
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LinkLedger for InMemoryLinkLedger {
    async fn submit(&self, link: NewLink) -> Result<Link, StorageError> {
        let mut links = self.links.write().await;
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StorageError::io("append rejected"));
        }

        let id = links
            .last()
            .map(|last| last.id.next())
            .unwrap_or_else(LinkId::first);
        let record = Link {
            id,
            url: normalize_url(&link.url),
            submitter: link.submitter,
            submitted_at_millis: chrono::Utc::now().timestamp_millis(),
            privileged_origin: link.privileged_origin,
        };
        trace!(link_id = %record.id, "Appended link");
        links.push(record.clone());
        Ok(record)
    }

    async fn list_all(&self) -> Result<Vec<Link>, StorageError> {
        Ok(self.links.read().await.clone())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.links.read().await.len())
    }
}

/// In-memory point ledger
///
/// Each participant entry is updated under its DashMap shard lock, which
/// makes every adjustment atomic.
#[derive(Debug, Default)]
pub struct InMemoryPointLedger {
    participants: DashMap<ParticipantId, ParticipantRecord>,
    payments: DashMap<String, ParticipantId>,
    fail_adjustments: AtomicBool,
}

impl InMemoryPointLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known participants
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Make subsequent `adjust` calls fail with an I/O error
    pub fn fail_adjustments(&self, fail: bool) {
        self.fail_adjustments.store(fail, Ordering::SeqCst);
    }

    fn not_found(participant: ParticipantId) -> StorageError {
        StorageError::not_found(format!("participant {participant}"))
    }
}

#[async_trait]
impl PointLedger for InMemoryPointLedger {
    async fn ensure_participant(
        &self,
        participant: ParticipantId,
        handle: Option<String>,
        privileged: bool,
    ) -> Result<(ParticipantRecord, bool), StorageError> {
        match self.participants.entry(participant) {
            Entry::Occupied(existing) => Ok((existing.get().clone(), false)),
            Entry::Vacant(slot) => {
                let record = ParticipantRecord::new(participant, handle, privileged);
                slot.insert(record.clone());
                debug!(participant = %participant, privileged, "Created participant");
                Ok((record, true))
            }
        }
    }

    async fn get(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<ParticipantRecord>, StorageError> {
        Ok(self.participants.get(&participant).map(|r| r.clone()))
    }

    async fn adjust(&self, participant: ParticipantId, delta: Points) -> Result<Points, StorageError> {
        if self.fail_adjustments.load(Ordering::SeqCst) {
            return Err(StorageError::io("adjustment rejected"));
        }
        let mut record = self
            .participants
            .get_mut(&participant)
            .ok_or_else(|| Self::not_found(participant))?;
        record.balance = record
            .balance
            .checked_add(delta)
            .ok_or_else(|| StorageError::balance_overflow(participant))?;
        Ok(record.balance)
    }

    async fn debit_if_at_least(
        &self,
        participant: ParticipantId,
        amount: Points,
    ) -> Result<DebitOutcome, StorageError> {
        let mut record = self
            .participants
            .get_mut(&participant)
            .ok_or_else(|| Self::not_found(participant))?;
        if record.balance >= amount {
            record.balance = record
                .balance
                .checked_sub(amount)
                .ok_or_else(|| StorageError::balance_overflow(participant))?;
            Ok(DebitOutcome::Debited {
                balance: record.balance,
            })
        } else {
            Ok(DebitOutcome::Insufficient {
                balance: record.balance,
            })
        }
    }

    async fn credit_payment(
        &self,
        participant: ParticipantId,
        charge_id: &str,
        amount: Points,
    ) -> Result<PaymentOutcome, StorageError> {
        // Hold the participant entry while claiming the charge id so the
        // claim and the credit land together
        let mut record = self
            .participants
            .get_mut(&participant)
            .ok_or_else(|| Self::not_found(participant))?;
        match self.payments.entry(charge_id.to_string()) {
            Entry::Occupied(_) => Ok(PaymentOutcome::Duplicate),
            Entry::Vacant(slot) => {
                record.balance = record
                    .balance
                    .checked_add(amount)
                    .ok_or_else(|| StorageError::balance_overflow(participant))?;
                slot.insert(participant);
                Ok(PaymentOutcome::Credited {
                    balance: record.balance,
                })
            }
        }
    }
}

/// In-memory viewed set
#[derive(Debug, Default)]
pub struct InMemoryViewedSet {
    viewed: DashMap<ParticipantId, HashSet<LinkId>>,
    fail_reads: AtomicBool,
}

impl InMemoryViewedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `viewed_by` calls fail with an I/O error
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Total number of viewed records across participants
    pub fn total(&self) -> usize {
        self.viewed.iter().map(|entry| entry.len()).sum()
    }
}

#[async_trait]
impl ViewedSetStore for InMemoryViewedSet {
    async fn record(&self, participant: ParticipantId, link: &LinkId) -> Result<bool, StorageError> {
        Ok(self
            .viewed
            .entry(participant)
            .or_default()
            .insert(link.clone()))
    }

    async fn viewed_by(&self, participant: ParticipantId) -> Result<HashSet<LinkId>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::io("viewed set unavailable"));
        }
        Ok(self
            .viewed
            .get(&participant)
            .map(|set| set.clone())
            .unwrap_or_default())
    }

    async fn contains(&self, participant: ParticipantId, link: &LinkId) -> Result<bool, StorageError> {
        Ok(self
            .viewed
            .get(&participant)
            .is_some_and(|set| set.contains(link)))
    }

    async fn forget(&self, participant: ParticipantId, link: &LinkId) -> Result<bool, StorageError> {
        Ok(self
            .viewed
            .get_mut(&participant)
            .is_some_and(|mut set| set.remove(link)))
    }
}
