//! Default values for profile sections and persisted pipelines.
//!
//! # Design
//! - Keep defaults in one place so serde defaults and validation agree.
//! - Key names of the persisted pipeline layout are part of the file format.

/// Depth of the first entries below a scan root.
pub(crate) const MIN_DEPTH: usize = 1;
/// Log level used when the profile does not name one.
pub(crate) const LOG_LEVEL: &str = "info";
/// Prefix for the persisted strategy chain.
pub(crate) const PIPELINE_PREFIX: &str = "pipeline";
/// Key holding the number of persisted strategies.
pub(crate) const PIPELINE_COUNT_KEY: &str = "pipeline.count";
