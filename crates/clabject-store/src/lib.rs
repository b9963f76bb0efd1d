//! # clabject-store
//!
//! Storage layer for clabject models.
//!
//! This crate provides:
//! - `FragmentRecord` / `InstanceRecord` (the persisted forms)
//! - `MemoryRegistry`, an in-memory implementation of the kernel's
//!   `Registry` boundary
//! - JSONL snapshot read/write
//!
//! ## Data model
//!
//! ```text
//! JSONL (on disk, one record per line)
//!     ↕  load_jsonl / save_jsonl
//! MemoryRegistry (records keyed by (name, identity) and instance id)
//!     ↕  rehydrate on every lookup
//! Fragment / DeepInstance (kernel)
//! ```

pub mod jsonl;
pub mod memory;
pub mod record;

pub use jsonl::{
    JsonlError, Record, read_records, read_records_from_path, write_records,
    write_records_to_path,
};
pub use memory::MemoryRegistry;
pub use record::{FragmentRecord, InstanceRecord};
