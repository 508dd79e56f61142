//! Storage backends
//!
//! Two implementations of the [`StorageBackend`] port: directory-per-kind
//! file storage and a Redis-backed KV layout. Both are reconstructible in a
//! fresh process from their [`StorageAccess`](codemode_domain::StorageAccess)
//! descriptor.

mod file;
mod kv;

pub use file::FileStorage;
pub use kv::KvStorage;
