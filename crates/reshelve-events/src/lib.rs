#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Event bus connecting the pipeline engine to whatever presents its state.
//!
//! The bus carries log lines, scan/analysis/execution progress and per-record
//! status changes. Internally it uses `tokio::broadcast` with a bounded
//! buffer plus a replay ring so late subscribers can catch up from an id.
//!
//! Layout: payloads.rs (event types), routing.rs (bus), error.rs (publish errors).

pub mod error;
pub mod payloads;
pub mod routing;

pub use error::{EventBusError, EventBusResult};
pub use payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId, LogLevel};
pub use routing::{EventBus, EventStream};
