//! rcsfast-rs - Import fast-export streams into a tree of RCS master files.
//!
//! The importer reads a fast-import stream on standard input, assembles an
//! in-memory event graph (blobs, commits, resets, tags, passthroughs), and
//! replays it through the external RCS toolchain, translating the stream's
//! branch-and-DAG model into per-file dotted-number revision trees.

pub mod cli;
pub mod config;
pub mod model;
pub mod parser;
pub mod replay;
pub mod scratch;
pub mod stream;

pub use model::{Event, Repository, RevId};
pub use scratch::{ScratchDir, WorkDir};
