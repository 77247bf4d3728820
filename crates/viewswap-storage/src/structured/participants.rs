//! Participant balances
//!
//! Every balance change is a read-modify-write inside one redb write
//! transaction. redb allows a single writer at a time, so concurrent
//! adjustments for the same participant serialize instead of losing updates.

use std::sync::Arc;

use async_trait::async_trait;
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use viewswap_core::{ParticipantId, Points};

use super::tables::{PARTICIPANTS, PAYMENTS, RedbStorage};
use crate::error::StorageError;
use crate::{DebitOutcome, ParticipantRecord, PaymentOutcome, PointLedger};

/// A captured payment, kept so a replayed confirmation credits nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub charge_id: String,
    pub participant: ParticipantId,
    pub amount: Points,
    pub credited_at_millis: i64,
}

/// redb-backed point ledger
pub struct ParticipantStore {
    storage: Arc<RedbStorage>,
}

impl ParticipantStore {
    /// Create a new participant store
    pub fn new(storage: Arc<RedbStorage>) -> Self {
        Self { storage }
    }

    /// Get all participant records
    pub fn all(&self) -> Result<Vec<ParticipantRecord>, StorageError> {
        let entries = self.storage.scan_prefix(PARTICIPANTS, &[])?;
        entries
            .into_iter()
            .map(|(_key, value)| decode_record(&value))
            .collect()
    }

    /// Count all participants
    pub fn count(&self) -> Result<usize, StorageError> {
        self.storage.count_prefix(PARTICIPANTS, &[])
    }

    /// Look up a recorded payment
    pub fn payment(&self, charge_id: &str) -> Result<Option<PaymentRecord>, StorageError> {
        match self.storage.get(PAYMENTS, charge_id.as_bytes())? {
            Some(value) => Ok(Some(postcard::from_bytes(&value)?)),
            None => Ok(None),
        }
    }

    fn load(&self, participant: ParticipantId) -> Result<Option<ParticipantRecord>, StorageError> {
        match self.storage.get(PARTICIPANTS, &participant.as_bytes())? {
            Some(value) => Ok(Some(decode_record(&value)?)),
            None => Ok(None),
        }
    }
}

pub(crate) fn decode_record(bytes: &[u8]) -> Result<ParticipantRecord, StorageError> {
    postcard::from_bytes(bytes).map_err(|e| StorageError::Deserialization(e.to_string()))
}

/// Add `delta` to the balance, refusing results outside the `i64` range
fn apply_delta(record: &mut ParticipantRecord, delta: Points) -> Result<(), StorageError> {
    record.balance = record
        .balance
        .checked_add(delta)
        .ok_or_else(|| StorageError::balance_overflow(record.id))?;
    Ok(())
}

fn encode_record(record: &ParticipantRecord) -> Result<Vec<u8>, StorageError> {
    postcard::to_allocvec(record).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Apply `update` to a participant row inside an open write transaction
///
/// An error from `update` leaves the row untouched and aborts the transaction.
fn update_in<T>(
    txn: &WriteTransaction,
    participant: ParticipantId,
    update: impl FnOnce(&mut ParticipantRecord) -> Result<T, StorageError>,
) -> Result<(ParticipantRecord, T), StorageError> {
    let key = participant.as_bytes();
    let mut table = txn.open_table(PARTICIPANTS)?;
    let current = table.get(key.as_slice())?.map(|v| v.value().to_vec());
    let mut record = match current {
        Some(bytes) => decode_record(&bytes)?,
        None => return Err(StorageError::not_found(format!("participant {participant}"))),
    };
    let out = update(&mut record)?;
    table.insert(key.as_slice(), encode_record(&record)?.as_slice())?;
    Ok((record, out))
}

#[async_trait]
impl PointLedger for ParticipantStore {
    #[instrument(skip(self, handle), fields(participant = %participant))]
    async fn ensure_participant(
        &self,
        participant: ParticipantId,
        handle: Option<String>,
        privileged: bool,
    ) -> Result<(ParticipantRecord, bool), StorageError> {
        let key = participant.as_bytes();
        self.storage.write(|txn| {
            let mut table = txn.open_table(PARTICIPANTS)?;
            let existing = table.get(key.as_slice())?.map(|v| v.value().to_vec());
            if let Some(bytes) = existing {
                return Ok((decode_record(&bytes)?, false));
            }

            let record = ParticipantRecord::new(participant, handle, privileged);
            table.insert(key.as_slice(), encode_record(&record)?.as_slice())?;
            debug!(privileged, "Created participant");
            Ok((record, true))
        })
    }

    async fn get(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<ParticipantRecord>, StorageError> {
        self.load(participant)
    }

    #[instrument(skip(self), fields(participant = %participant, delta = %delta))]
    async fn adjust(&self, participant: ParticipantId, delta: Points) -> Result<Points, StorageError> {
        let (record, ()) = self
            .storage
            .write(|txn| update_in(txn, participant, |r| apply_delta(r, delta)))?;
        debug!(balance = %record.balance, "Adjusted balance");
        Ok(record.balance)
    }

    #[instrument(skip(self), fields(participant = %participant, amount = %amount))]
    async fn debit_if_at_least(
        &self,
        participant: ParticipantId,
        amount: Points,
    ) -> Result<DebitOutcome, StorageError> {
        let (_, outcome) = self.storage.write(|txn| {
            update_in(txn, participant, |r| {
                if r.balance >= amount {
                    r.balance = r
                        .balance
                        .checked_sub(amount)
                        .ok_or_else(|| StorageError::balance_overflow(participant))?;
                    Ok(DebitOutcome::Debited { balance: r.balance })
                } else {
                    Ok(DebitOutcome::Insufficient { balance: r.balance })
                }
            })
        })?;
        debug!(?outcome, "Debit attempted");
        Ok(outcome)
    }

    #[instrument(skip(self), fields(participant = %participant, charge_id = %charge_id))]
    async fn credit_payment(
        &self,
        participant: ParticipantId,
        charge_id: &str,
        amount: Points,
    ) -> Result<PaymentOutcome, StorageError> {
        let outcome = self.storage.write(|txn| {
            {
                let payments = txn.open_table(PAYMENTS)?;
                if payments.get(charge_id.as_bytes())?.is_some() {
                    return Ok(PaymentOutcome::Duplicate);
                }
            }

            let (record, ()) = update_in(txn, participant, |r| apply_delta(r, amount))?;

            let payment = PaymentRecord {
                charge_id: charge_id.to_string(),
                participant,
                amount,
                credited_at_millis: chrono::Utc::now().timestamp_millis(),
            };
            let value = postcard::to_allocvec(&payment)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            let mut payments = txn.open_table(PAYMENTS)?;
            payments.insert(charge_id.as_bytes(), value.as_slice())?;

            Ok(PaymentOutcome::Credited {
                balance: record.balance,
            })
        })?;
        debug!(?outcome, "Payment processed");
        Ok(outcome)
    }
}
