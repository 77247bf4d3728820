//! # ViewSwap Core
//!
//! Core types, traits, and errors shared by every ViewSwap crate.
//!
//! The exchange engine talks to the outside world only through the
//! collaborator traits defined here, so the same session logic runs against
//! the HTTP adapter in production and against the recording mocks in tests.
//!
//! ## Key Traits
//!
//! - [`Renderer`]: Sends text/keyboards to a participant and retracts stale messages
//! - [`MembershipOracle`]: Confirms community membership during onboarding
//! - [`IdentityVerifier`]: Classifies an uploaded screenshot as verified or not
//! - [`BackupSink`]: Mirrors persisted files to an external location
//! - [`Clock`]: Time abstraction for testability
//!
//! ## Key Types
//!
//! - [`ParticipantId`]: Stable participant identity
//! - [`Points`]: Fixed-point credit balance (tenths of a point)
//! - [`LinkId`] / [`Link`]: Submitted links and their base-26 identifiers
//! - [`ParticipantAction`]: Typed actions delivered by the transport

pub mod action;
pub mod collaborator;
pub mod error;
pub mod identity;
pub mod link;
pub mod mock_transport;
pub mod points;
pub mod traits;

// Re-export main types
pub use action::*;
pub use collaborator::*;
pub use error::*;
pub use identity::*;
pub use link::*;
pub use mock_transport::*;
pub use points::*;
pub use traits::*;
