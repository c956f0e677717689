//! # rulesengine-core
//!
//! A composable business rules engine: boolean rule trees (`AND`/`OR`/`NOT`)
//! evaluated over fields that may be supplied statically, fetched from a
//! GraphQL/REST data service, or calculated from other fields.
//!
//! A typical embedding wires a [`stores::RuleStore`] and
//! [`stores::FieldConfigStore`] to its own persistence layer, builds a
//! [`resolution::ResolutionEngine`] with a [`data_service::DataServiceClient`],
//! and drives both through an [`orchestrator::Orchestrator`].

pub mod calculator;
pub mod comparator;
pub mod config;
pub mod data_service;
pub mod dependency;
pub mod error;
pub mod field;
pub mod mapper;
pub mod metrics;
pub mod operator;
pub mod orchestrator;
pub mod resolution;
pub mod rule;
pub mod stores;
pub mod value;

pub use error::EngineError;
pub use field::{FieldConfig, FieldName};
pub use operator::OperatorCode;
pub use orchestrator::Orchestrator;
pub use resolution::{EntityRef, ResolutionEngine};
pub use rule::{Combinator, Condition, Rule, RuleItem};
pub use value::{DataType, Value};

/// Initialize a `tracing` subscriber reading its filter from `RUST_LOG`,
/// falling back to `info`. Intended for binaries embedding this crate;
/// library code never installs a global subscriber on its own.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).try_init().ok();
}
