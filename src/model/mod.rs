//! Data model joining the parser and the replay engine.

pub mod event;
pub mod repository;
pub mod revision;

pub use event::{
    Attribution, Blob, BlobRef, Commit, Event, FileMode, FileOp, Mark, Passthrough, Reset, Tag,
    When,
};
pub use repository::{Repository, ResolveError};
pub use revision::{RevId, RevIdError};
