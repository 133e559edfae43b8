//! State module for tracking collection progress
//!
//! This module provides the in-memory state a collection session works on.
//!
//! # Components
//!
//! - `Accumulator`: Identity-keyed record set with upsert merge
//! - `SessionPhase`: The session state machine's phases and legal transitions
//! - `SessionState`: Cursor, counters and phase for one running session

mod accumulator;
mod phase;
mod session_state;

// Re-export main types
pub use accumulator::{Accumulator, MergeStats};
pub use phase::SessionPhase;
pub use session_state::SessionState;
