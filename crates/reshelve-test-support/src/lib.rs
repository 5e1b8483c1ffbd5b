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

//! Shared test helpers used across the workspace's unit suites.
//! Layout: fixtures.rs (environment checks and stand-in programs), tree.rs (temporary directory trees).

pub mod fixtures;
pub mod tree;

pub use fixtures::program_available;
#[cfg(unix)]
pub use fixtures::scripted_encoder;
pub use tree::TreeFixture;
