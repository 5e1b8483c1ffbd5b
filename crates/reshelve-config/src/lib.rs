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
#![allow(clippy::redundant_pub_crate)]

//! Profile loading and flat property persistence for the pipeline engine.
//!
//! Layout:
//! - `model.rs`: typed profile sections (roots, scan, execution, logging, pipeline)
//! - `properties.rs`: flat string key/value sets with typed, forgiving getters
//! - `loader.rs`: YAML profile and `key=value` property file IO
//! - `validate.rs`: normalisation and guard rails with warnings
//! - `defaults.rs`: default values shared by the model and validation
//! - `error.rs`: configuration error type

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod properties;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_profile, load_properties, parse_profile, save_properties};
pub use model::{
    EngineProfile, ExecutionSettings, LogFormatSetting, LoggingSettings, PipelineEntry,
    ScanSettings,
};
pub use properties::{PropertySet, pipeline_from_properties, pipeline_to_properties};
pub use validate::{ValidatedProfile, validate_profile};
