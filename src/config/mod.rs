//! Process-wide run options.
//!
//! The verbosity level is set exactly once at startup and read from
//! anywhere in the core; it is the only module-level mutable state in the
//! program.

use std::sync::atomic::{AtomicU8, Ordering};

// =============================================================================
// Verbosity Levels
// =============================================================================

/// Progress baton: one line per replayed commit.
pub const VERBOSE_BATON: u8 = 1;

/// File-op tracing: one line per file operation.
pub const VERBOSE_OPS: u8 = 2;

/// Command echo: every synthesized RCS command, with child output forwarded.
pub const VERBOSE_COMMANDS: u8 = 3;

/// Shuffle tracing: the working-file moves behind copies and renames.
pub const VERBOSE_SHUFFLE: u8 = 4;

/// Delete tracing: the per-path expansion of deleteall.
pub const VERBOSE_DELETES: u8 = 5;

static VERBOSITY: AtomicU8 = AtomicU8::new(0);

/// Set the process-wide verbosity level. Called once, at startup.
pub fn set_verbosity(level: u8) {
    VERBOSITY.store(level, Ordering::Relaxed);
}

/// The current verbosity level.
pub fn verbosity() -> u8 {
    VERBOSITY.load(Ordering::Relaxed)
}

/// Whether output gated at `level` should be emitted.
pub fn chatter(level: u8) -> bool {
    verbosity() >= level
}

// =============================================================================
// Checkout Mode
// =============================================================================

/// What to do with working files once the import completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckoutMode {
    /// Leave masters as the check-ins left them; just drop the locks.
    #[default]
    None,
    /// Keep the masters locked.
    Locked,
    /// Unlock the masters and check out unlocked working copies.
    Unlocked,
}
