//! # Field Resolution Engine (C7)
//!
//! Turns a [`dependency::Plan`] into concrete field values: seeds static
//! defaults, dispatches the parallel group and sequential chains through a
//! semaphore-bounded worker pool, then evaluates calculated fields once
//! every fetch has landed. A field the caller already supplied in the
//! execution context is never fetched or recalculated (§4.4).

pub mod cache;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::calculator::{self, CustomCalculatorLoader};
use crate::data_service::DataServiceClient;
use crate::dependency::{self, Plan};
use crate::error::{DataServiceError, EngineError};
use crate::field::{FieldConfig, FieldName};
use crate::metrics::Metrics;
use crate::value::Value;

pub use cache::EntityRef;
use cache::ResolutionCache;

const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Stateless (per the contract in §5) apart from the shared cache, which is
/// scoped to one engine instance and keyed per-entity — concurrent
/// `resolve` calls for different entities never interfere.
pub struct ResolutionEngine {
    client: DataServiceClient,
    cache: Arc<ResolutionCache>,
    custom_loader: Option<Arc<dyn CustomCalculatorLoader>>,
    max_concurrency: usize,
    metrics: Metrics,
}

impl ResolutionEngine {
    pub fn new(client: DataServiceClient, cache_bucket_width: Duration) -> Self {
        ResolutionEngine {
            client,
            cache: Arc::new(ResolutionCache::new(cache_bucket_width)),
            custom_loader: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            metrics: Metrics::new(),
        }
    }

    pub fn with_custom_loader(mut self, loader: Arc<dyn CustomCalculatorLoader>) -> Self {
        self.custom_loader = Some(loader);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Per-field fetch counters (§6) — count, duration, and cache-hit ratio
    /// for every field this engine has fetched.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// §4.4 `resolve`: build a plan, then execute it to completion.
    pub async fn resolve(
        &self,
        configs: &[FieldConfig],
        context: &HashMap<FieldName, Value>,
        entity: &EntityRef,
    ) -> Result<HashMap<FieldName, Value>, EngineError> {
        for cfg in configs {
            cfg.validate().map_err(EngineError::ValidationFailure)?;
        }

        let available: HashSet<FieldName> = context
            .keys()
            .cloned()
            .chain(configs.iter().filter(|c| c.is_static()).map(|c| c.name.clone()))
            .collect();
        let plan = dependency::build_plan(configs, &available)?;

        let by_name: HashMap<FieldName, FieldConfig> =
            configs.iter().map(|c| (c.name.clone(), c.clone())).collect();

        let mut values = self.seed_static_values(configs, context)?;
        self.execute_plan(&plan, &by_name, context, entity, &mut values).await?;
        self.evaluate_calculated(&plan, &by_name, &mut values)?;

        Ok(values)
    }

    /// Build the resolution plan without executing it — exposed for the
    /// orchestrator (C8) to validate a rule's field configs up front.
    pub fn build_plan(
        &self,
        configs: &[FieldConfig],
        context: &HashMap<FieldName, Value>,
    ) -> Result<Plan, EngineError> {
        let available: HashSet<FieldName> = context
            .keys()
            .cloned()
            .chain(configs.iter().filter(|c| c.is_static()).map(|c| c.name.clone()))
            .collect();
        dependency::build_plan(configs, &available)
    }

    fn seed_static_values(
        &self,
        configs: &[FieldConfig],
        context: &HashMap<FieldName, Value>,
    ) -> Result<HashMap<FieldName, Value>, EngineError> {
        let mut values = HashMap::new();
        for cfg in configs.iter().filter(|c| c.is_static()) {
            match context.get(&cfg.name) {
                Some(v) => {
                    values.insert(cfg.name.clone(), v.clone());
                }
                None => match &cfg.default_value {
                    Some(default) => {
                        values.insert(cfg.name.clone(), default.clone());
                    }
                    None if cfg.is_required => {
                        return Err(EngineError::ValidationFailure(format!(
                            "required field '{}' was not supplied and has no default value",
                            cfg.name
                        )));
                    }
                    None => {
                        values.insert(cfg.name.clone(), Value::Null);
                    }
                },
            }
        }
        // Fields the caller supplied directly, whether or not they're
        // otherwise fetched or calculated, always win and need no further
        // work (§4.4).
        for (name, value) in context {
            values.insert(name.clone(), value.clone());
        }
        Ok(values)
    }

    async fn execute_plan(
        &self,
        plan: &Plan,
        by_name: &HashMap<FieldName, FieldConfig>,
        context: &HashMap<FieldName, Value>,
        entity: &EntityRef,
        values: &mut HashMap<FieldName, Value>,
    ) -> Result<(), EngineError> {
        let snapshot: Arc<BTreeMap<FieldName, Value>> =
            Arc::new(values.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = tokio::task::JoinSet::new();

        for name in &plan.parallel_group {
            if context.contains_key(name) {
                continue;
            }
            let cfg = by_name
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::FieldConfigNotFound(name.to_string()))?;
            let client = self.client.clone();
            let cache = self.cache.clone();
            let metrics = self.metrics.clone();
            let entity = entity.clone();
            let sem = semaphore.clone();
            let snap = snapshot.clone();
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore never closed");
                fetch_one(&client, &cache, &metrics, &entity, &cfg, &snap)
                    .await
                    .map(|v| Produced::One((cfg.name.clone(), v)))
            });
        }

        // Fields not already supplied by the caller; a chain's waves are
        // resolved against this view, not against `by_name` directly, so a
        // context-supplied field never gets fetched even mid-chain.
        let context_keys: HashSet<FieldName> = context.keys().cloned().collect();

        for chain in &plan.chains {
            let waves: Vec<Vec<FieldConfig>> = chain
                .waves
                .iter()
                .map(|wave| {
                    wave.iter()
                        .filter(|n| !context_keys.contains(*n))
                        .map(|n| {
                            by_name.get(n).cloned().ok_or_else(|| EngineError::FieldConfigNotFound(n.to_string()))
                        })
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<_, _>>()?;
            let client = self.client.clone();
            let cache = self.cache.clone();
            let metrics = self.metrics.clone();
            let entity = entity.clone();
            let sem = semaphore.clone();
            let mut local = (*snapshot).clone();
            join_set.spawn(async move {
                let mut produced = Vec::new();
                for wave in waves {
                    // Fields within a wave are mutually independent (§4.4) —
                    // fetch them concurrently, then fold the results into
                    // `local` before the next wave starts.
                    let mut inner = tokio::task::JoinSet::new();
                    for cfg in wave {
                        let client = client.clone();
                        let cache = cache.clone();
                        let metrics = metrics.clone();
                        let entity = entity.clone();
                        let sem = sem.clone();
                        let snap = local.clone();
                        inner.spawn(async move {
                            let _permit = sem.acquire_owned().await.expect("semaphore never closed");
                            fetch_one(&client, &cache, &metrics, &entity, &cfg, &snap)
                                .await
                                .map(|v| (cfg.name.clone(), v))
                        });
                    }
                    while let Some(joined) = inner.join_next().await {
                        let (name, value) = joined.expect("resolution task panicked")?;
                        local.insert(name.clone(), value.clone());
                        produced.push((name, value));
                    }
                }
                Ok(Produced::Many(produced))
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined.expect("resolution task panicked") {
                Ok(produced) => apply_produced(values, produced),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn evaluate_calculated(
        &self,
        plan: &Plan,
        by_name: &HashMap<FieldName, FieldConfig>,
        values: &mut HashMap<FieldName, Value>,
    ) -> Result<(), EngineError> {
        for name in &plan.calculated_order {
            let cfg = by_name
                .get(name)
                .ok_or_else(|| EngineError::FieldConfigNotFound(name.to_string()))?;
            let calc_config = cfg
                .calculator_config
                .as_ref()
                .ok_or_else(|| EngineError::ValidationFailure(format!("field '{name}' has no calculatorConfig")))?;
            let bindings: BTreeMap<FieldName, Value> =
                values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let result = calculator::calculate(
                calc_config,
                name,
                cfg.data_type,
                &bindings,
                self.custom_loader.as_deref(),
            )
            .map_err(|message| EngineError::CalculationFailure { field: name.clone(), message })?;
            values.insert(name.clone(), result);
        }
        Ok(())
    }
}

/// Some produced values come in singly (parallel group), some as an ordered
/// batch (one chain's results) — either way, last write wins is never
/// ambiguous because each field is produced by exactly one plan element.
enum Produced {
    One((FieldName, Value)),
    Many(Vec<(FieldName, Value)>),
}

fn apply_produced(values: &mut HashMap<FieldName, Value>, produced: Produced) {
    match produced {
        Produced::One((name, value)) => {
            values.insert(name, value);
        }
        Produced::Many(pairs) => {
            for (name, value) in pairs {
                values.insert(name, value);
            }
        }
    }
}

async fn fetch_one(
    client: &DataServiceClient,
    cache: &ResolutionCache,
    metrics: &Metrics,
    entity: &EntityRef,
    cfg: &FieldConfig,
    bindings: &BTreeMap<FieldName, Value>,
) -> Result<Value, EngineError> {
    let start = Instant::now();

    if let Some(cached) = cache.get(entity, &cfg.name) {
        metrics.record_field_fetch(cfg.name.as_str(), start.elapsed(), true);
        return Ok(cached);
    }

    let service_config = cfg
        .data_service_config
        .as_ref()
        .expect("fetch_one is only called for fields with is_fetched() == true");
    let raw = client.fetch(service_config, bindings).await.map_err(|source| map_fetch_error(cfg, source))?;

    let mapper_expr = cfg
        .mapper_expression
        .as_deref()
        .expect("FieldConfig::validate rejects a fetched field without a mapper expression");
    let extracted = crate::mapper::extract(&raw, mapper_expr).map_err(|(sub_path, message)| {
        EngineError::FieldMappingFailure { field: cfg.name.clone(), sub_path, message }
    })?;
    let converted = extracted
        .convert_type(cfg.data_type)
        .map_err(|message| EngineError::FieldMappingFailure { field: cfg.name.clone(), sub_path: String::new(), message })?;

    cache.put(entity, &cfg.name, converted.clone());
    metrics.record_field_fetch(cfg.name.as_str(), start.elapsed(), false);
    Ok(converted)
}

fn map_fetch_error(cfg: &FieldConfig, source: DataServiceError) -> EngineError {
    match &source {
        DataServiceError::ClientError { status, body } if *status == 401 || *status == 403 => {
            EngineError::AuthFailure { field: cfg.name.clone(), message: body.clone() }
        }
        _ => EngineError::DataServiceFailure { field: cfg.name.clone(), source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::CalculatorConfig;
    use crate::data_service::{PreparedRequest, RawResponse, Transport};
    use crate::field::{AuthConfig, DataServiceConfig, HttpMethod};
    use crate::value::DataType;
    use async_trait::async_trait;

    fn static_field(name: &str, default: Option<Value>) -> FieldConfig {
        FieldConfig {
            name: name.into(),
            data_type: DataType::Number,
            description: None,
            data_service_config: None,
            mapper_expression: None,
            is_calculated: false,
            calculator_config: None,
            dependencies: vec![],
            default_value: default,
            is_required: false,
        }
    }

    fn calculated_field(name: &str, expr: &str, deps: &[&str]) -> FieldConfig {
        FieldConfig {
            is_calculated: true,
            calculator_config: Some(CalculatorConfig::Expression { expression: expr.to_string() }),
            dependencies: deps.iter().map(|d| (*d).into()).collect(),
            ..static_field(name, None)
        }
    }

    fn engine() -> ResolutionEngine {
        ResolutionEngine::new(DataServiceClient::new(), Duration::from_secs(60))
    }

    fn fetched_field(name: &str, depends_on: &[&str]) -> FieldConfig {
        FieldConfig {
            data_service_config: Some(DataServiceConfig::Rest {
                endpoint: format!("http://svc/{name}"),
                method: HttpMethod::Get,
                headers: vec![],
                query_params: vec![],
                request_body: None,
                auth: AuthConfig::None,
                timeout_ms: 5_000,
                max_retries: 1,
                depends_on: depends_on.iter().map(|d| (*d).into()).collect(),
            }),
            mapper_expression: Some("value".to_string()),
            ..static_field(name, None)
        }
    }

    /// Returns `{"value": 1}` for every call, regardless of the request.
    struct StubTransport {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn send(&self, _request: PreparedRequest) -> Result<RawResponse, DataServiceError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(RawResponse { status: 200, body: r#"{"value":1}"#.to_string() })
        }
    }

    #[tokio::test]
    async fn a_fetched_field_records_a_metrics_entry_on_miss_and_on_hit() {
        let transport = Arc::new(StubTransport { calls: std::sync::atomic::AtomicU32::new(0) });
        let client = DataServiceClient::with_transport(transport);
        let engine = ResolutionEngine::new(client, Duration::from_secs(60));
        let entity = EntityRef { entity_type: "customer".into(), entity_id: "c1".into() };
        let configs = vec![fetched_field("score", &[])];

        engine.resolve(&configs, &HashMap::new(), &entity).await.unwrap();
        engine.resolve(&configs, &HashMap::new(), &entity).await.unwrap();

        let snapshot = engine.metrics().field_snapshot("score").expect("field fetch must be recorded");
        assert_eq!(snapshot.fetches, 2);
        assert_eq!(snapshot.cache_hits, 1);
    }

    #[tokio::test]
    async fn a_diamond_chain_fetches_the_independent_wave_members_concurrently() {
        let transport = Arc::new(StubTransport { calls: std::sync::atomic::AtomicU32::new(0) });
        let client = DataServiceClient::with_transport(transport.clone());
        let engine = ResolutionEngine::new(client, Duration::from_secs(60));
        let entity = EntityRef { entity_type: "customer".into(), entity_id: "c1".into() };
        let configs = vec![
            fetched_field("customerId", &[]),
            fetched_field("creditScore", &["customerId"]),
            fetched_field("riskScore", &["customerId"]),
        ];

        let values = engine.resolve(&configs, &HashMap::new(), &entity).await.unwrap();
        assert!(values.contains_key(&FieldName::from("creditScore")));
        assert!(values.contains_key(&FieldName::from("riskScore")));
        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn static_field_uses_context_over_default() {
        let configs = vec![static_field("plan", Some(Value::from("bronze")))];
        let mut context = HashMap::new();
        context.insert(FieldName::from("plan"), Value::from("gold"));
        let entity = EntityRef { entity_type: "customer".into(), entity_id: "c1".into() };
        let values = engine().resolve(&configs, &context, &entity).await.unwrap();
        assert_eq!(values.get(&FieldName::from("plan")), Some(&Value::from("gold")));
    }

    #[tokio::test]
    async fn static_field_falls_back_to_default() {
        let configs = vec![static_field("plan", Some(Value::from("bronze")))];
        let entity = EntityRef { entity_type: "customer".into(), entity_id: "c1".into() };
        let values = engine().resolve(&configs, &HashMap::new(), &entity).await.unwrap();
        assert_eq!(values.get(&FieldName::from("plan")), Some(&Value::from("bronze")));
    }

    #[tokio::test]
    async fn required_static_field_without_default_is_a_validation_failure() {
        let mut cfg = static_field("ssn", None);
        cfg.is_required = true;
        let entity = EntityRef { entity_type: "customer".into(), entity_id: "c1".into() };
        let err = engine().resolve(&[cfg], &HashMap::new(), &entity).await.unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn calculated_field_runs_after_its_dependencies() {
        let configs = vec![
            static_field("subtotal", Some(Value::from(80.0))),
            static_field("taxRate", Some(Value::from(0.10))),
            calculated_field("total", "subtotal * (1 + taxRate)", &["subtotal", "taxRate"]),
        ];
        let entity = EntityRef { entity_type: "order".into(), entity_id: "o1".into() };
        let values = engine().resolve(&configs, &HashMap::new(), &entity).await.unwrap();
        let total = values.get(&FieldName::from("total")).unwrap().as_decimal().unwrap();
        assert_eq!(total.round_dp(2).to_string(), "88.00");
    }

    #[tokio::test]
    async fn resolution_is_idempotent_for_the_same_context() {
        let configs = vec![static_field("plan", Some(Value::from("gold")))];
        let entity = EntityRef { entity_type: "customer".into(), entity_id: "c1".into() };
        let e = engine();
        let first = e.resolve(&configs, &HashMap::new(), &entity).await.unwrap();
        let second = e.resolve(&configs, &HashMap::new(), &entity).await.unwrap();
        assert_eq!(first.get(&FieldName::from("plan")), second.get(&FieldName::from("plan")));
    }
}
