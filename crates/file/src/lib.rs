//! Persistent, one-file-per-entry cache backend (C4) with a key-mapping index.

mod file_backend;
mod index;

pub use file_backend::FileBackend;
pub use index::{IndexRecord, SIDECAR_FILE_NAME};
