//! Session orchestrator
//!
//! Drives one end-to-end run: collect findings on the main tree, fan files
//! out to sub-workflows under a bounded-concurrency policy, serialize patch
//! application through a shared lock, aggregate results deterministically,
//! tear down.

mod orchestrator;
mod reporter;

pub use orchestrator::{Session, SessionConfig};
pub use reporter::{Reporter, TracingReporter};
