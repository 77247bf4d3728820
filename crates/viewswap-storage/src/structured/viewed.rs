//! Viewed-set storage
//!
//! One empty-valued row per (participant, link) pair. Keys start with the
//! participant's big-endian id, so one prefix scan yields a participant's
//! whole viewed set.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use viewswap_core::{LinkId, ParticipantId};

use super::tables::{RedbStorage, VIEWED};
use crate::ViewedSetStore;
use crate::error::StorageError;

/// Build the composite key for a viewed record
pub fn viewed_key(participant: ParticipantId, link: &LinkId) -> Vec<u8> {
    let mut key = Vec::with_capacity(ParticipantId::ENCODED_LEN + link.as_str().len());
    key.extend_from_slice(&participant.as_bytes());
    key.extend_from_slice(link.as_str().as_bytes());
    key
}

/// Split a composite key back into its parts
pub fn split_viewed_key(key: &[u8]) -> Result<(ParticipantId, LinkId), StorageError> {
    if key.len() <= ParticipantId::ENCODED_LEN {
        return Err(StorageError::deserialization("viewed key too short"));
    }
    let (participant, link) = key.split_at(ParticipantId::ENCODED_LEN);
    let participant = ParticipantId::from_bytes(participant)?;
    let link = std::str::from_utf8(link)
        .map_err(|e| StorageError::Deserialization(e.to_string()))?;
    Ok((participant, LinkId::new(link)))
}

/// redb-backed viewed set
pub struct ViewedStore {
    storage: Arc<RedbStorage>,
}

impl ViewedStore {
    pub fn new(storage: Arc<RedbStorage>) -> Self {
        Self { storage }
    }

    /// Total number of viewed records
    pub fn count(&self) -> Result<usize, StorageError> {
        self.storage.count_prefix(VIEWED, &[])
    }
}

#[async_trait]
impl ViewedSetStore for ViewedStore {
    #[instrument(skip(self), fields(participant = %participant, link_id = %link))]
    async fn record(&self, participant: ParticipantId, link: &LinkId) -> Result<bool, StorageError> {
        let inserted = self
            .storage
            .insert_if_absent(VIEWED, &viewed_key(participant, link), &[])?;
        if !inserted {
            debug!("View already recorded");
        }
        Ok(inserted)
    }

    async fn viewed_by(&self, participant: ParticipantId) -> Result<HashSet<LinkId>, StorageError> {
        let entries = self.storage.scan_prefix(VIEWED, &participant.as_bytes())?;
        entries
            .into_iter()
            .map(|(key, _)| split_viewed_key(&key).map(|(_, link)| link))
            .collect()
    }

    async fn contains(&self, participant: ParticipantId, link: &LinkId) -> Result<bool, StorageError> {
        Ok(self
            .storage
            .get(VIEWED, &viewed_key(participant, link))?
            .is_some())
    }

    #[instrument(skip(self), fields(participant = %participant, link_id = %link))]
    async fn forget(&self, participant: ParticipantId, link: &LinkId) -> Result<bool, StorageError> {
        self.storage.remove(VIEWED, &viewed_key(participant, link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::structured::tables::RedbStorageConfig;

    fn create_test_store() -> (ViewedStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = RedbStorageConfig {
            db_path: temp_dir.path().join("test.redb"),
        };
        let storage = Arc::new(RedbStorage::open(config).unwrap());
        (ViewedStore::new(storage), temp_dir)
    }

    #[test]
    fn test_key_split() {
        let key = viewed_key(ParticipantId::new(77), &LinkId::new("abc"));
        let (participant, link) = split_viewed_key(&key).unwrap();
        assert_eq!(participant, ParticipantId::new(77));
        assert_eq!(link, LinkId::new("abc"));
        assert!(split_viewed_key(&key[..4]).is_err());
    }

    #[tokio::test]
    async fn test_record_once() {
        let (store, _temp) = create_test_store();
        let alice = ParticipantId::new(1);
        let link = LinkId::new("b");

        assert!(store.record(alice, &link).await.unwrap());
        assert!(!store.record(alice, &link).await.unwrap());
        assert!(store.contains(alice, &link).await.unwrap());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_forget_removes_record() {
        let (store, _temp) = create_test_store();
        let alice = ParticipantId::new(1);
        let link = LinkId::new("c");

        store.record(alice, &link).await.unwrap();
        assert!(store.forget(alice, &link).await.unwrap());
        assert!(!store.forget(alice, &link).await.unwrap());
        assert!(!store.contains(alice, &link).await.unwrap());

        // A forgotten view can be recorded again
        assert!(store.record(alice, &link).await.unwrap());
    }

    #[tokio::test]
    async fn test_viewed_sets_are_per_participant() {
        let (store, _temp) = create_test_store();
        let alice = ParticipantId::new(1);
        let bob = ParticipantId::new(256);

        store.record(alice, &LinkId::new("a")).await.unwrap();
        store.record(alice, &LinkId::new("z")).await.unwrap();
        store.record(bob, &LinkId::new("a")).await.unwrap();

        let alice_set = store.viewed_by(alice).await.unwrap();
        assert_eq!(alice_set.len(), 2);
        assert!(alice_set.contains(&LinkId::new("z")));

        let bob_set = store.viewed_by(bob).await.unwrap();
        assert_eq!(bob_set, HashSet::from([LinkId::new("a")]));

        assert!(store.viewed_by(ParticipantId::new(3)).await.unwrap().is_empty());
    }
}
