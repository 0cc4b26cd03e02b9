//! Immutable columnar frames for the annomatrix proxy cache.
//!
//! This crate focuses on:
//! - Label-addressed columns backed by `Arc` slices, so clones share payloads.
//! - Persistent updates: every add/drop/rename/replace returns a new [`Dataframe`].
//! - Column and row sub-selection (the latter by row label, for derived views).
//! - Optional Arrow IPC decoding of remote column buffers (`arrow` feature).

#![forbid(unsafe_code)]

mod column;
mod error;
mod frame;
mod index;
mod types;

#[cfg(feature = "arrow")]
pub mod arrow;

pub use crate::column::Column;
pub use crate::error::{FrameError, Result};
pub use crate::frame::Dataframe;
pub use crate::index::RowIndex;
pub use crate::types::{ColumnType, Value};
