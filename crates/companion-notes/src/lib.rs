//! Async client for the SiYuan kernel HTTP API.
//!
//! Exposes the SQL block queries, markdown export and workspace file
//! operations the companion builds on. All operations go through the
//! kernel's `{code, msg, data}` envelope and surface failures as
//! [`NotesError`] values carrying the upstream message and HTTP status.

mod block;
mod client;
mod error;

pub use block::{sort_blocks, Block};
pub use client::{format_siyuan_timestamp, DirEntry, NotesClient};
pub use error::{NotesError, Result};
