//! # Rule Execution Orchestrator (C8)
//!
//! Loads a rule and its field configs, drives them through the Field
//! Resolution Engine and the Rule Evaluator, and reports the outcome.
//! Tracks an explicit state per execution (`LOADED` → `RESOLVING` →
//! `EVALUATING` → `DONE`/`ERRORED`) purely for observability — the state
//! never gates control flow, it's recorded into the trace and metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{EngineError, ErrorKind};
use crate::field::FieldName;
use crate::metrics::Metrics;
use crate::resolution::{EntityRef, ResolutionEngine};
use crate::rule::evaluator::{self, Trace};
use crate::rule::Rule;
use crate::stores::{FieldConfigStore, RuleStore};
use crate::value::Value;

/// Where a single execution is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Loaded,
    Resolving,
    Evaluating,
    Done,
    Errored,
}

/// A failure surfaced on an [`ExecutionResult`] rather than propagated as an
/// `Err` — field resolution failing is still a completed execution, just one
/// whose outcome is `false` (§7).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&EngineError> for ExecutionError {
    fn from(err: &EngineError) -> Self {
        ExecutionError { kind: err.kind(), message: err.to_string() }
    }
}

/// Result of one `execute_rule` call. §3 `RuleExecutionResult`: when `error`
/// is set, `outcome` is always `false`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionResult {
    pub rule_id: Option<String>,
    pub rule_name: Option<String>,
    pub outcome: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub duration_ms: u64,
    pub state: ExecutionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces: Option<Vec<Trace>>,
    pub resolved_field_values: HashMap<FieldName, Value>,
}

/// One item in a batch request (§4.7 `execute_batch`).
pub struct BatchItem {
    pub rule_id: String,
    pub entity: EntityRef,
    pub context: HashMap<FieldName, Value>,
}

/// Batch execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    pub stop_on_first_failure: bool,
    pub include_traces: bool,
}

/// One item's outcome within a batch, preserving input order (§4.7
/// batch-equivalence: running a batch produces the same per-item outcomes
/// as running each item individually).
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchResult {
    pub rule_id: String,
    pub result: Result<ExecutionResult, String>,
}

pub struct Orchestrator {
    rule_store: Arc<dyn RuleStore>,
    field_store: Arc<dyn FieldConfigStore>,
    resolution: Arc<ResolutionEngine>,
    metrics: Metrics,
}

impl Orchestrator {
    pub fn new(
        rule_store: Arc<dyn RuleStore>,
        field_store: Arc<dyn FieldConfigStore>,
        resolution: Arc<ResolutionEngine>,
    ) -> Self {
        Orchestrator { rule_store, field_store, resolution, metrics: Metrics::new() }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Load rule `rule_id`, resolve its referenced fields against `entity`
    /// and `context`, and evaluate it. §4.8 `execute_rule`.
    pub async fn execute_rule(
        &self,
        rule_id: &str,
        entity: &EntityRef,
        context: &HashMap<FieldName, Value>,
        include_trace: bool,
    ) -> Result<ExecutionResult, EngineError> {
        let rule = self
            .rule_store
            .get_rule_by_id(rule_id)
            .await
            .map_err(EngineError::ValidationFailure)?
            .ok_or_else(|| EngineError::RuleNotFound(rule_id.to_string()))?;

        self.execute_with_definition(&rule, entity, context, include_trace).await
    }

    /// Evaluate an already-loaded rule definition — used by `execute_rule`
    /// and directly by callers validating an unsaved draft (§4.8).
    pub async fn execute_with_definition(
        &self,
        rule: &Rule,
        entity: &EntityRef,
        context: &HashMap<FieldName, Value>,
        include_trace: bool,
    ) -> Result<ExecutionResult, EngineError> {
        let start = Instant::now();
        let rule_id = rule.id.clone();
        let rule_name = rule.name.clone();

        rule.validate_structure().map_err(EngineError::ValidationFailure)?;

        let field_names: Vec<String> =
            rule.referenced_fields().into_iter().map(|f| f.as_str().to_string()).collect();
        let configs =
            self.field_store.list_by_names(&field_names).await.map_err(EngineError::ValidationFailure)?;

        // A resolution failure (e.g. a required field's data service never
        // recovers) still produces a completed execution: outcome=false,
        // error set, traces reflecting how far evaluation got (§7).
        let result = match self.resolution.resolve(&configs, context, entity).await {
            Ok(values) => {
                let (outcome, traces) = if include_trace {
                    let (outcome, traces) = evaluator::evaluate_with_trace(Some(rule), &values);
                    (outcome, Some(traces))
                } else {
                    (evaluator::evaluate(Some(rule), &values), None)
                };

                ExecutionResult {
                    rule_id: rule_id.clone(),
                    rule_name: rule_name.clone(),
                    outcome,
                    error: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    state: ExecutionState::Done,
                    traces,
                    resolved_field_values: values,
                }
            }
            Err(err) => {
                tracing::error!(rule_id = ?rule_id, error = %err, "field resolution failed");
                ExecutionResult {
                    rule_id: rule_id.clone(),
                    rule_name: rule_name.clone(),
                    outcome: false,
                    error: Some(ExecutionError::from(&err)),
                    duration_ms: start.elapsed().as_millis() as u64,
                    state: ExecutionState::Errored,
                    traces: None,
                    resolved_field_values: HashMap::new(),
                }
            }
        };

        if let Some(id) = &rule_id {
            self.metrics.record_rule_execution(id, start.elapsed(), result.error.is_none());
        }

        Ok(result)
    }

    /// Execute every item in `items`, preserving order. With
    /// `stop_on_first_failure`, the first `Err` short-circuits the
    /// remainder; otherwise every item runs regardless of earlier failures
    /// (§4.7).
    pub async fn execute_batch(&self, items: Vec<BatchItem>, options: BatchOptions) -> Vec<BatchResult> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let outcome = self
                .execute_rule(&item.rule_id, &item.entity, &item.context, options.include_traces)
                .await
                .map_err(|e| e.to_string());
            let failed = outcome.is_err();
            results.push(BatchResult { rule_id: item.rule_id, result: outcome });
            if failed && options.stop_on_first_failure {
                break;
            }
        }
        results
    }

    /// Structural + field-config validation without fetching or evaluating
    /// anything (§4.8 `validate`).
    pub async fn validate(&self, rule: &Rule) -> Result<(), EngineError> {
        rule.validate_structure().map_err(EngineError::ValidationFailure)?;

        let field_names: Vec<String> =
            rule.referenced_fields().into_iter().map(|f| f.as_str().to_string()).collect();
        let configs =
            self.field_store.list_by_names(&field_names).await.map_err(EngineError::ValidationFailure)?;

        if configs.len() != field_names.len() {
            let found: std::collections::HashSet<&str> =
                configs.iter().map(|c| c.name.as_str()).collect();
            if let Some(missing) = field_names.iter().find(|n| !found.contains(n.as_str())) {
                return Err(EngineError::FieldConfigNotFound(missing.clone()));
            }
        }
        for cfg in &configs {
            cfg.validate().map_err(EngineError::ValidationFailure)?;
        }

        let empty_context = HashMap::new();
        self.resolution.build_plan(&configs, &empty_context)?;
        Ok(())
    }
}
