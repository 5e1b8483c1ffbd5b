//! Batch transformation pipeline engine: scan, analyse, preview and execute.
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
#![allow(clippy::module_name_repetitions, clippy::redundant_pub_crate)]

//! A run walks one or more roots into a [`RecordSet`] of PENDING
//! [`ChangeRecord`]s, threads them through an ordered chain of strategies to
//! compute the virtual end state (the preview), then executes the changed
//! records concurrently with dependency-safe ordering.
//!
//! Layout:
//! - error.rs: `EngineError` taxonomy.
//! - cancel.rs / report.rs: cooperative cancellation and event/metric fan-out.
//! - condition.rs: rule conditions, groups and sets.
//! - record.rs: change records, record arena and id allocation.
//! - scanner.rs: constrained directory walk.
//! - strategy/: strategy contract plus the built-in strategies.
//! - registry.rs: strategy lookup and pipeline (de)serialisation.
//! - analyzer.rs / preview.rs: stage-by-stage analysis and the preview tree.
//! - executor.rs / estimator.rs: concurrent execution and progress estimation.
//! - encoder.rs / fsops.rs: external encoder wrapper and filesystem helpers.

pub mod analyzer;
pub mod cancel;
pub mod condition;
pub mod encoder;
pub mod error;
pub mod estimator;
pub mod executor;
pub mod fsops;
pub mod preview;
pub mod record;
pub mod registry;
pub mod report;
pub mod scanner;
pub mod strategy;

pub use analyzer::{AnalysisOutcome, Analyzer, StageReport};
pub use cancel::CancelFlag;
pub use condition::{ConditionGroup, ConditionKind, ConditionSet, RuleCondition, Subject};
pub use encoder::{EncodeJob, Encoder, EncoderSettings};
pub use error::{EngineError, EngineResult};
pub use estimator::{TaskEstimator, format_hms};
pub use executor::{ExecutionSettings, ExecutionSummary, Executor, RootSummary};
pub use preview::{PreviewNode, PreviewTree};
pub use record::{
    ChangeRecord, EntryAttrs, IdAllocator, OperationKind, RecordId, RecordSet, RecordStatus,
};
pub use registry::{Pipeline, STRATEGY_IDS, config_from_entry};
pub use report::Reporter;
pub use scanner::{ScanEntry, ScanOptions, ScanReport, Scanner};
pub use strategy::{
    AnalyzeContext, ExecuteContext, ExecuteOutcome, Strategy, StrategyConfig, TargetType,
};
