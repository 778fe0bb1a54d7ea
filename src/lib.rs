//! # EmberDB — in-memory, eventually-persistent key/value engine core
//!
//! EmberDB is the storage-engine core of a distributed document database
//! node. The keyspace is partitioned into a fixed number of virtual
//! buckets (vbuckets), each independently replicated, checkpointed and
//! evicted. This crate covers the in-memory core; the on-disk format, the
//! flusher and the replication wire protocol are external collaborators
//! that consume the interfaces exposed here.
//!
//! ## Architecture
//!
//! Each vbucket owns:
//!
//! - a **hash table** of stored values under striped locks, where the
//!   mutation state machine (CAS, locking, expiry, tombstones, temp items)
//!   is decided,
//! - a **checkpoint manager** appending mutations to an ordered log
//!   consumed by persistence and replication,
//! - a **durability monitor** tracking synchronous writes across the
//!   replication chain until commit or timeout,
//! - a **collections manifest** tracking logical collection lifecycles and
//!   answering the logical-deletion gate,
//! - a **failover table**, an **HLC** issuing CAS values, and an optional
//!   **bloom filter** used under full eviction.
//!
//! A process-wide **item pager** reclaims memory between the configured
//! watermarks using a frequency histogram (or a two-phase 2-bit LRU walk),
//! and an **expiry pager** sweeps expired values.
//!
//! ## Quick start
//!
//! ```rust
//! use emberdb::{DocKey, EmberEngine, GetOptions, Item, VBucketState};
//!
//! # fn main() -> emberdb::Result<()> {
//! let engine = EmberEngine::builder().num_vbuckets(16).build()?;
//! let vb = engine.set_vbucket_state(0, VBucketState::Active)?;
//!
//! let mut item = Item::new(DocKey::plain("greeting"), "hello");
//! vb.set(&mut item)?;
//! assert!(item.meta.cas != 0);
//!
//! let fetched = vb.get(&DocKey::plain("greeting"), GetOptions::default())?;
//! assert_eq!(fetched.value.as_deref(), Some(&b"hello"[..]));
//! # Ok(())
//! # }
//! ```
//!
//! ## Synchronous writes
//!
//! ```rust
//! use emberdb::{DocKey, DurabilityRequirements, EmberEngine, Item, VBucketState};
//!
//! # fn main() -> emberdb::Result<()> {
//! let engine = EmberEngine::builder().num_vbuckets(16).build()?;
//! let vb = engine.set_vbucket_state(0, VBucketState::Active)?;
//! vb.set_replication_topology(vec!["active".into(), "replica".into()]);
//!
//! let mut item = Item::new(DocKey::plain("key"), "value");
//! vb.set_sync_write(&mut item, DurabilityRequirements::majority())?;
//! assert_eq!(vb.durability_monitor().num_tracked(), 1);
//!
//! // The replica acknowledges; majority is reached and the write commits.
//! let committed = vb.seqno_ack_received("replica", item.by_seqno as u64, 0);
//! assert_eq!(committed.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod core;
pub mod error;
pub mod stats;
pub mod utils;

pub use crate::core::checkpoint::{GenerateBySeqno, GenerateCas};
pub use crate::core::collections::CollectionsManifest;
pub use crate::core::conflict::ConflictResolutionMode;
pub use crate::core::engine::{EmberEngine, EngineBuilder, EngineConfig};
pub use crate::core::hash_table::EvictionPolicy;
pub use crate::core::item::{
    CollectionId, DocKey, DurabilityLevel, DurabilityRequirements, Item, ItemMeta,
};
pub use crate::core::pager::PagerAlgorithm;
pub use crate::core::vbucket::{BgFetchResult, GetOptions, KeyStats, VBucket, VBucketState};
pub use crate::error::{EmberError, Result};
pub use crate::stats::Statistics;

#[cfg(test)]
mod tests;
