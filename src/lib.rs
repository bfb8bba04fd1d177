//! Portal Session Core Library
//!
//! Session/profile bootstrap and referral attribution for a local-services
//! marketplace client: the authentication state machine, bounded-time
//! profile/subscription hydration, and at-most-once referral crediting
//! against a hosted backend.
//!
//! # Modules
//!
//! - `config`: Configuration management.
//! - `controller`: Session controller (composition root and public surface).
//! - `errors`: Error handling types.
//! - `hydrator`: Profile and subscription hydration with fallbacks.
//! - `models`: Core data models.
//! - `obs`: Observability and logging.
//! - `portal_client`: HTTP binding for the hosted backend.
//! - `referral`: Referral attempt storage and attribution pipeline.
//! - `remote`: Remote data service contract and degraded-mode service.
//! - `session_store`: Session state ownership and stale-result suppression.
//! - `storage`: Client-local key/value capability.

pub mod config;
pub mod controller;
pub mod errors;
pub mod hydrator;
pub mod models;
pub mod obs;
pub mod portal_client;
pub mod referral;
pub mod remote;
pub mod session_store;
pub mod storage;

pub use config::PortalConfig;
pub use controller::SessionController;
pub use errors::PortalError;
pub use portal_client::HttpPortalService;
pub use remote::{RemoteDataService, UnconfiguredService};
pub use storage::{KeyValueStore, MemoryStore};
