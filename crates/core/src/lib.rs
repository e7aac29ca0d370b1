//! IdSync core library.
//!
//! This crate provides the components for one-way provisioning of cloud
//! directory users into a FreeIPA directory: configuration, the reconciliation
//! engine, the Microsoft Graph and LDAP clients, and report delivery.

pub mod config;
pub mod errors;
pub mod models;
pub mod notify;
pub mod reconcile;
pub mod report;
pub mod source;
pub mod sync_engine;
pub mod target;

// Re-exports for convenience.
pub use config::AppConfig;
pub use reconcile::Reconciler;
pub use sync_engine::{CycleReport, DirectorySyncEngine, SyncEngine};
