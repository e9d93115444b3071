//! # EntiCache Testkit
//!
//! Test utilities for EntiCache.
//!
//! This crate provides:
//! - A shared Customer/Order/OrderLine/Address model and manager helpers
//! - Property-based generators for server payloads using proptest
//! - In-memory save servers: an echo server and a hand-driven channel
//!
//! ## Usage
//!
//! ```rust,ignore
//! use enticache_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn saves_new_customer() {
//!     let manager = shop_manager();
//!     let transport = EchoTransport::new(shop_metadata()).with_next_id(7);
//!     let coordinator = SaveCoordinator::new(manager.clone(), transport, SaveConfig::default());
//!     add_customer(&manager, "ACME");
//!     coordinator.save_all().await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
    pub use enticache_core::*;
    pub use enticache_save::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
