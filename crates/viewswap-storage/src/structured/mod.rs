//! Structured storage using redb
//!
//! This module provides transactional storage for:
//! - Participants and their point balances
//! - Viewed (participant, link) pairs
//! - Captured payments
//!
//! Unlike the link segments, these tables are updated in place.

mod participants;
mod tables;
mod viewed;

pub(crate) use participants::decode_record;
pub use participants::{ParticipantStore, PaymentRecord};
pub use tables::{PARTICIPANTS, PAYMENTS, RedbStorage, RedbStorageConfig, VIEWED, scan_prefix_in};
pub use viewed::{ViewedStore, split_viewed_key, viewed_key};
