//! End-to-end scenario tests driving the orchestrator against in-memory
//! store and transport doubles — no real network or persistence involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use rulesengine_core::calculator::CalculatorConfig;
use rulesengine_core::data_service::{DataServiceClient, PreparedRequest, RawResponse, Transport};
use rulesengine_core::error::{DataServiceError, EngineError};
use rulesengine_core::field::{AuthConfig, DataServiceConfig, FieldConfig, HttpMethod};
use rulesengine_core::operator::OperatorCode;
use rulesengine_core::orchestrator::{BatchItem, BatchOptions, Orchestrator};
use rulesengine_core::resolution::{EntityRef, ResolutionEngine};
use rulesengine_core::rule::{Combinator, Condition, Rule, RuleItem};
use rulesengine_core::stores::memory::{InMemoryFieldConfigStore, InMemoryRuleStore};
use rulesengine_core::value::{DataType, Value};
use rulesengine_core::{dependency, FieldName};

/// Returns a fixed status/body for every call, regardless of the request.
struct FixedTransport {
    status: u16,
    body: String,
    calls: AtomicU32,
}

impl FixedTransport {
    fn ok(body: &str) -> Self {
        FixedTransport { status: 200, body: body.to_string(), calls: AtomicU32::new(0) }
    }

    fn failing(status: u16) -> Self {
        FixedTransport { status, body: "unavailable".to_string(), calls: AtomicU32::new(0) }
    }
}

#[async_trait]
impl Transport for FixedTransport {
    async fn send(&self, _request: PreparedRequest) -> Result<RawResponse, DataServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawResponse { status: self.status, body: self.body.clone() })
    }
}

/// Returns a different fixed response per endpoint URL, keyed by a substring
/// match — used where a scenario fetches more than one distinct field.
struct RoutingTransport {
    routes: Vec<(&'static str, &'static str)>,
    calls: AtomicU32,
}

#[async_trait]
impl Transport for RoutingTransport {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, DataServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = self
            .routes
            .iter()
            .find(|(needle, _)| request.url.contains(needle) || request.body.as_deref().unwrap_or("").contains(needle))
            .map(|(_, body)| *body)
            .unwrap_or("{}");
        Ok(RawResponse { status: 200, body: body.to_string() })
    }
}

fn number_field(name: &str) -> FieldConfig {
    FieldConfig {
        name: name.into(),
        data_type: DataType::Number,
        description: None,
        data_service_config: None,
        mapper_expression: None,
        is_calculated: false,
        calculator_config: None,
        dependencies: vec![],
        default_value: None,
        is_required: false,
    }
}

fn harness(
    transport: Arc<dyn Transport>,
) -> (Orchestrator, Arc<InMemoryRuleStore>, Arc<InMemoryFieldConfigStore>) {
    let rule_store = Arc::new(InMemoryRuleStore::default());
    let field_store = Arc::new(InMemoryFieldConfigStore::default());
    let client = DataServiceClient::with_transport(transport);
    let resolution = Arc::new(ResolutionEngine::new(client, Duration::from_secs(60)));
    let orch = Orchestrator::new(rule_store.clone(), field_store.clone(), resolution);
    (orch, rule_store, field_store)
}

fn entity(id: &str) -> EntityRef {
    EntityRef { entity_type: "customer".into(), entity_id: id.into() }
}

/// S1 — single arithmetic rule, all static fields, no data-service calls.
#[tokio::test]
async fn s1_single_static_rule() {
    let transport = Arc::new(FixedTransport::ok("{}"));
    let (orch, rule_store, field_store) = harness(transport.clone());
    field_store.insert(number_field("age"));

    let mut rule = Rule::group(
        Combinator::And,
        vec![RuleItem::Condition(Condition {
            field: "age".into(),
            operator: OperatorCode::Gt,
            value: Value::from(18i64),
            not: false,
        })],
    );
    rule.id = Some("adult".into());
    rule_store.insert(rule);

    let mut context = HashMap::new();
    context.insert(FieldName::from("age"), Value::from(25i64));

    let result = orch.execute_rule("adult", &entity("c1"), &context, false).await.unwrap();
    assert!(result.outcome);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

/// S2 — AND short-circuits: the second condition is never compared once
/// the first is false, visible as a single trace entry.
#[tokio::test]
async fn s2_short_circuit_with_mixed_operators() {
    let transport = Arc::new(FixedTransport::ok("{}"));
    let (orch, rule_store, field_store) = harness(transport);
    field_store.insert(number_field("age"));
    let mut country = number_field("country");
    country.data_type = DataType::String;
    field_store.insert(country);

    let mut rule = Rule::group(
        Combinator::And,
        vec![
            RuleItem::Condition(Condition {
                field: "country".into(),
                operator: OperatorCode::Eq,
                value: Value::from("US"),
                not: false,
            }),
            RuleItem::Condition(Condition {
                field: "age".into(),
                operator: OperatorCode::Ge,
                value: Value::from(21i64),
                not: false,
            }),
        ],
    );
    rule.id = Some("eligible".into());
    rule_store.insert(rule);

    let mut context = HashMap::new();
    context.insert(FieldName::from("country"), Value::from("CA"));
    context.insert(FieldName::from("age"), Value::from(30i64));

    let result = orch.execute_rule("eligible", &entity("c1"), &context, true).await.unwrap();
    assert!(!result.outcome);
    assert_eq!(result.traces.unwrap().len(), 1, "age condition must not be visited");
}

/// S3 — a GraphQL-fetched field flows through the mapper and into the rule,
/// issuing exactly one fetch.
#[tokio::test]
async fn s3_dynamic_field_via_graphql() {
    let transport = Arc::new(FixedTransport::ok(r#"{"data":{"customer":{"creditScore":720}}}"#));
    let (orch, rule_store, field_store) = harness(transport.clone());

    let mut credit_score = number_field("creditScore");
    credit_score.mapper_expression = Some("data.customer.creditScore".to_string());
    credit_score.data_service_config = Some(DataServiceConfig::Graphql {
        endpoint: "https://svc/graphql".into(),
        query: "query($id: ID!) { customer(id: $id) { creditScore } }".into(),
        operation_name: None,
        auth: AuthConfig::None,
        timeout_ms: 5_000,
        max_retries: 2,
        depends_on: vec![],
    });
    field_store.insert(credit_score);

    let mut rule = Rule::group(
        Combinator::And,
        vec![RuleItem::Condition(Condition {
            field: "creditScore".into(),
            operator: OperatorCode::Ge,
            value: Value::from(700i64),
            not: false,
        })],
    );
    rule.id = Some("credit-check".into());
    rule_store.insert(rule);

    let result = orch.execute_rule("credit-check", &entity("c1"), &HashMap::new(), false).await.unwrap();
    assert!(result.outcome);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
}

/// S4 — a calculated field depends on two independently-fetched fields;
/// both land in one parallel group and the calculation runs after both.
#[tokio::test]
async fn s4_calculated_field_depends_on_two_fetched_fields() {
    let transport = Arc::new(RoutingTransport {
        routes: vec![("subtotal", r#"{"value":80}"#), ("taxRate", r#"{"value":0.10}"#)],
        calls: AtomicU32::new(0),
    });
    let (orch, rule_store, field_store) = harness(transport.clone());

    let mut subtotal = number_field("subtotal");
    subtotal.mapper_expression = Some("value".to_string());
    subtotal.data_service_config = Some(DataServiceConfig::Rest {
        endpoint: "https://svc/subtotal".into(),
        method: HttpMethod::Get,
        headers: vec![],
        query_params: vec![],
        request_body: None,
        auth: AuthConfig::None,
        timeout_ms: 5_000,
        max_retries: 2,
        depends_on: vec![],
    });
    field_store.insert(subtotal);

    let mut tax_rate = number_field("taxRate");
    tax_rate.mapper_expression = Some("value".to_string());
    tax_rate.data_service_config = Some(DataServiceConfig::Graphql {
        endpoint: "https://svc/taxRate".into(),
        query: "{ taxRate }".into(),
        operation_name: None,
        auth: AuthConfig::None,
        timeout_ms: 5_000,
        max_retries: 2,
        depends_on: vec![],
    });
    field_store.insert(tax_rate);

    let total = FieldConfig {
        is_calculated: true,
        calculator_config: Some(CalculatorConfig::Expression {
            expression: "subtotal * (1 + taxRate)".to_string(),
        }),
        dependencies: vec!["subtotal".into(), "taxRate".into()],
        ..number_field("total")
    };
    field_store.insert(total);

    let mut rule = Rule::group(
        Combinator::And,
        vec![RuleItem::Condition(Condition {
            field: "total".into(),
            operator: OperatorCode::Le,
            value: Value::from(100.0),
            not: false,
        })],
    );
    rule.id = Some("order-total".into());
    rule_store.insert(rule);

    let result = orch.execute_rule("order-total", &entity("o1"), &HashMap::new(), false).await.unwrap();
    assert!(result.outcome);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

/// S5 — a dependency cycle among three calculated fields is rejected.
#[tokio::test]
async fn s5_cycle_detection() {
    let a = FieldConfig {
        is_calculated: true,
        calculator_config: Some(CalculatorConfig::Expression { expression: "b".to_string() }),
        dependencies: vec!["b".into()],
        ..number_field("a")
    };
    let b = FieldConfig {
        is_calculated: true,
        calculator_config: Some(CalculatorConfig::Expression { expression: "c".to_string() }),
        dependencies: vec!["c".into()],
        ..number_field("b")
    };
    let c = FieldConfig {
        is_calculated: true,
        calculator_config: Some(CalculatorConfig::Expression { expression: "a".to_string() }),
        dependencies: vec!["a".into()],
        ..number_field("c")
    };

    let err = dependency::build_plan(&[a, b, c], &Default::default()).unwrap_err();
    match err {
        EngineError::CircularDependency(cycle) => assert!(!cycle.is_empty()),
        other => panic!("expected CircularDependency, got {other:?}"),
    }
}

/// S6 — a required fetched field whose data service always fails surfaces
/// on the execution result as a `DataServiceFailure`, with `outcome=false`,
/// after the configured retry budget is spent.
#[tokio::test]
async fn s6_required_field_fetch_failure() {
    let transport = Arc::new(FixedTransport::failing(500));
    let (orch, rule_store, field_store) = harness(transport.clone());

    let mut kyc = number_field("kyc");
    kyc.is_required = true;
    kyc.mapper_expression = Some("value".to_string());
    kyc.data_service_config = Some(DataServiceConfig::Rest {
        endpoint: "https://svc/kyc".into(),
        method: HttpMethod::Get,
        headers: vec![],
        query_params: vec![],
        request_body: None,
        auth: AuthConfig::None,
        timeout_ms: 5_000,
        max_retries: 2,
        depends_on: vec![],
    });
    field_store.insert(kyc);

    let mut rule = Rule::group(
        Combinator::And,
        vec![RuleItem::Condition(Condition {
            field: "kyc".into(),
            operator: OperatorCode::Eq,
            value: Value::from("passed"),
            not: false,
        })],
    );
    rule.id = Some("kyc-check".into());
    rule_store.insert(rule);

    let result = orch.execute_rule("kyc-check", &entity("c1"), &HashMap::new(), true).await.unwrap();
    assert!(!result.outcome);
    let error = result.error.expect("resolution failure must populate ExecutionResult.error");
    assert_eq!(error.kind, rulesengine_core::error::ErrorKind::DataServiceFailure);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3); // initial try + 2 retries
}

/// Property #10 — batch equivalence: running items through `execute_batch`
/// yields the same per-item outcomes as calling `execute_rule` individually.
#[tokio::test]
async fn batch_equivalence_with_individual_execution() {
    let transport = Arc::new(FixedTransport::ok("{}"));
    let (orch, rule_store, field_store) = harness(transport);
    field_store.insert(number_field("age"));

    let mut adult = Rule::group(
        Combinator::And,
        vec![RuleItem::Condition(Condition {
            field: "age".into(),
            operator: OperatorCode::Ge,
            value: Value::from(18i64),
            not: false,
        })],
    );
    adult.id = Some("adult".into());
    rule_store.insert(adult);

    let mut young_context = HashMap::new();
    young_context.insert(FieldName::from("age"), Value::from(10i64));
    let mut old_context = HashMap::new();
    old_context.insert(FieldName::from("age"), Value::from(40i64));

    let individual_young =
        orch.execute_rule("adult", &entity("c1"), &young_context, false).await.unwrap().outcome;
    let individual_old = orch.execute_rule("adult", &entity("c2"), &old_context, false).await.unwrap().outcome;

    let items = vec![
        BatchItem { rule_id: "adult".into(), entity: entity("c1"), context: young_context },
        BatchItem { rule_id: "adult".into(), entity: entity("c2"), context: old_context },
    ];
    let batch = orch.execute_batch(items, BatchOptions::default()).await;

    assert_eq!(batch[0].result.as_ref().unwrap().outcome, individual_young);
    assert_eq!(batch[1].result.as_ref().unwrap().outcome, individual_old);
}
