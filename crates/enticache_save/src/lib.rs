//! # EntiCache Save
//!
//! Serialized saves for an EntiCache entity manager.
//!
//! This crate provides:
//! - A save coordinator that keeps at most one save in flight per cache
//! - Queuing of concurrent save requests into follow-up rounds
//! - Save memos that replay edits made while a save was in flight
//! - Temporary-to-real key fixup across entities, memos and foreign keys
//! - A transport trait plus a mock transport for testing
//!
//! ## State machine
//!
//! ```text
//! Idle --request--> Saving --request--> SavingWithQueue
//!   ^                 |                        |
//!   +---- finished ---+---- follow-up round ---+
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use enticache_save::{SaveConfig, SaveCoordinator, SaveOptions};
//!
//! let coordinator = SaveCoordinator::new(manager.clone(), transport, SaveConfig::default());
//! let outcome = coordinator.request_save(None, SaveOptions::default()).await?;
//! println!("saved {} entities", outcome.entities.len());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bundle;
mod config;
mod coordinator;
mod error;
mod memo;
mod transport;
mod validator;

pub use bundle::{BundleEntity, KeyMapping, RawSaveResponse, SaveBundle};
pub use config::{SaveConfig, SaveOptions};
pub use coordinator::{SaveCoordinator, SaveOutcome, SaveState, SaveStats};
pub use error::{FailureCause, QueuedSaveFailure, SaveError, SaveResult};
pub use memo::{EntityMemo, SaveMemo};
pub use transport::{MockTransport, SaveTransport};
pub use validator::{EntityValidator, RequiredPropertiesValidator};
