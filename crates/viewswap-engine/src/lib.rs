//! # ViewSwap Engine
//!
//! The engagement exchange: participants view each other's links to earn
//! points and spend points to have their own links viewed.
//!
//! ## Components
//!
//! - **[`ExchangeEngine`]**: the per-participant session state machine
//! - **[`SessionManager`]**: one async mutex per participant session
//! - **[`allocator`]**: operator and participant pools, alternating delivery
//! - **[`DwellTimer`]**: required viewing time, drawn once per link
//! - **[`BackupTrigger`]**: asks the backup task for a mirror
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use viewswap_core::*;
//! use viewswap_engine::{Collaborators, EngineConfig, ExchangeEngine, Ledgers};
//!
//! let engine = ExchangeEngine::new(
//!     EngineConfig::default().with_channel_link("https://t.me/viewswap"),
//!     Ledgers::in_memory(),
//!     Collaborators {
//!         renderer: Arc::new(RecordingRenderer::new()),
//!         membership: Arc::new(StaticMembership::new()),
//!         verifier: Arc::new(StaticVerifier::accepting()),
//!     },
//! )?;
//! engine
//!     .handle(ActionEnvelope::new(ParticipantId::new(1), ParticipantAction::Start))
//!     .await?;
//! ```

pub mod allocator;
pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod messages;
pub mod session;
pub mod timer;
pub mod trigger;

pub use allocator::LinkPools;
pub use config::EngineConfig;
pub use engine::{Collaborators, ExchangeEngine, Ledgers};
pub use error::{EngineError, EngineResult};
pub use manager::{SessionManager, SessionSlot};
pub use session::{ActiveView, Session, SessionState};
pub use timer::DwellTimer;
pub use trigger::{BackupReason, BackupTrigger};
