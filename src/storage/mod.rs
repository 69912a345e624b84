//! Record storage for KyroFacts.
//!
//! [`RecordStore`] is the abstract interface the engine talks to. Two
//! backends implement it over a shared lineage index:
//! - [`InMemoryRecordStore`] for tests and ephemeral agents
//! - `persistent::PersistentRecordStore` (feature `persistent`) for durable,
//!   WAL-backed storage

mod index;
mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryRecordStore;
pub use traits::{RecordStore, Retirement, StorageError, WriteCondition};
