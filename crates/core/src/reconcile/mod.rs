//! Reconciliation engine: decides which source identities are missing from
//! the target directory and creates them with collision-free identifiers.
//!
//! Components, leaves first:
//! 1. [`IdentifierPool`]: next free UID/GID from the directory snapshot
//! 2. [`ExistenceChecker`]: exact-match login lookup
//! 3. [`RecordMapper`]: source identity to target account
//! 4. [`Reconciler`]: the per-pass driver

pub mod allocator;
pub mod driver;
pub mod existence;
pub mod mapper;

pub use allocator::IdentifierPool;
pub use driver::Reconciler;
pub use existence::ExistenceChecker;
pub use mapper::RecordMapper;
