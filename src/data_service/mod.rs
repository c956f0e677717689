//! # Data Service Client (C6)
//!
//! Fetches a fetched field's raw response document over REST or GraphQL.
//! Extraction via a mapper expression and type coercion happen one layer up
//! in [`crate::resolution`] — this module's only job is "get the JSON back,
//! retried and authenticated correctly."
//!
//! The actual wire call sits behind [`Transport`] so tests substitute an
//! in-memory double instead of reaching the network (§10).

pub mod retry;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DataServiceError;
use crate::field::{AuthConfig, DataServiceConfig, FieldName, HttpMethod};
use crate::value::Value;

/// A fully-prepared outbound request: placeholders substituted, auth
/// applied, ready to send.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

/// A raw, unparsed response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// The wire boundary. Production code talks to [`ReqwestTransport`]; tests
/// substitute an in-memory fake that returns canned responses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, DataServiceError>;
}

/// Default [`Transport`] backed by a shared [`reqwest::Client`].
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, DataServiceError> {
        use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(&request.url),
            HttpMethod::Post => self.http.post(&request.url),
            HttpMethod::Put => self.http.put(&request.url),
            HttpMethod::Delete => self.http.delete(&request.url),
            HttpMethod::Head => self.http.head(&request.url),
        };
        builder = builder.timeout(request.timeout);

        let mut header_map = HeaderMap::new();
        for (key, value) in &request.headers {
            if let (Ok(name), Ok(val)) = (HeaderName::try_from(key.as_str()), HeaderValue::from_str(value)) {
                header_map.insert(name, val);
            }
        }
        builder = builder.headers(header_map);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(DataServiceError::Transport)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(DataServiceError::Transport)?;
        Ok(RawResponse { status, body })
    }
}

/// Fetches and retries data-service calls against an injected [`Transport`].
/// Cheap to clone (the transport is behind an `Arc`), safe to share across
/// concurrently-resolving fields (§5 reentrancy).
#[derive(Clone)]
pub struct DataServiceClient {
    transport: Arc<dyn Transport>,
}

impl Default for DataServiceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DataServiceClient {
    pub fn new() -> Self {
        DataServiceClient { transport: Arc::new(ReqwestTransport::default()) }
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        DataServiceClient { transport }
    }

    /// Fetch and parse the response document for a field using `config`,
    /// substituting `bindings` into REST URL/body templates and GraphQL
    /// variables. Retries per [`retry::with_retry`].
    pub async fn fetch(
        &self,
        config: &DataServiceConfig,
        bindings: &BTreeMap<FieldName, Value>,
    ) -> Result<Value, DataServiceError> {
        let max_retries = config.max_retries();
        retry::with_retry(max_retries, || self.attempt(config, bindings)).await
    }

    /// A single attempt, no retry. Exposed separately so
    /// [`Self::validate_connection`] can probe a config without waiting out
    /// a full retry budget on failure.
    async fn attempt(
        &self,
        config: &DataServiceConfig,
        bindings: &BTreeMap<FieldName, Value>,
    ) -> Result<Value, DataServiceError> {
        let prepared = match config {
            DataServiceConfig::Rest { .. } => prepare_rest(config, bindings),
            DataServiceConfig::Graphql { .. } => prepare_graphql(config, bindings),
        };
        let response = self.transport.send(prepared).await?;
        parse_response(response)
    }

    /// Lightweight reachability probe used by configuration-time validation
    /// (no retries, discarded body).
    pub async fn validate_connection(&self, config: &DataServiceConfig) -> Result<(), DataServiceError> {
        self.attempt(config, &BTreeMap::new()).await.map(|_| ())
    }
}

fn prepare_rest(config: &DataServiceConfig, bindings: &BTreeMap<FieldName, Value>) -> PreparedRequest {
    let DataServiceConfig::Rest { endpoint, method, headers, query_params, request_body, auth, timeout_ms, .. } =
        config
    else {
        unreachable!("prepare_rest invoked with a non-REST config")
    };

    let mut url = substitute_placeholders(endpoint, bindings);
    if !query_params.is_empty() {
        let pairs: Vec<String> = query_params
            .iter()
            .map(|(k, v)| format!("{k}={}", substitute_placeholders(v, bindings)))
            .collect();
        let separator = if url.contains('?') { '&' } else { '?' };
        url = format!("{url}{separator}{}", pairs.join("&"));
    }

    let mut resolved_headers: Vec<(String, String)> =
        headers.iter().map(|(k, v)| (k.clone(), substitute_placeholders(v, bindings))).collect();
    apply_auth(&mut resolved_headers, auth);

    PreparedRequest {
        method: *method,
        url,
        headers: resolved_headers,
        body: request_body.as_ref().map(|b| substitute_placeholders(b, bindings)),
        timeout: Duration::from_millis(*timeout_ms),
    }
}

fn prepare_graphql(config: &DataServiceConfig, bindings: &BTreeMap<FieldName, Value>) -> PreparedRequest {
    let DataServiceConfig::Graphql { endpoint, query, operation_name, auth, timeout_ms, depends_on, .. } =
        config
    else {
        unreachable!("prepare_graphql invoked with a non-GraphQL config")
    };

    let variables: serde_json::Map<String, serde_json::Value> = depends_on
        .iter()
        .filter_map(|name| {
            bindings
                .get(name)
                .map(|v| (name.as_str().to_string(), serde_json::to_value(v).unwrap_or(serde_json::Value::Null)))
        })
        .collect();

    let mut body = serde_json::json!({
        "query": query,
        "variables": serde_json::Value::Object(variables),
    });
    if let Some(op) = operation_name {
        body["operationName"] = serde_json::Value::String(op.clone());
    }

    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
    apply_auth(&mut headers, auth);

    PreparedRequest {
        method: HttpMethod::Post,
        url: endpoint.clone(),
        headers,
        body: Some(body.to_string()),
        timeout: Duration::from_millis(*timeout_ms),
    }
}

fn apply_auth(headers: &mut Vec<(String, String)>, auth: &AuthConfig) {
    match auth {
        AuthConfig::None => {}
        AuthConfig::ApiKey { header, value } => headers.push((header.clone(), value.clone())),
        AuthConfig::Bearer { token } => headers.push(("authorization".to_string(), format!("Bearer {token}"))),
        AuthConfig::Basic { user, pass } => {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
            headers.push(("authorization".to_string(), format!("Basic {encoded}")));
        }
        AuthConfig::OAuth { token, token_type } => {
            headers.push(("authorization".to_string(), format!("{token_type} {token}")));
        }
    }
}

fn parse_response(response: RawResponse) -> Result<Value, DataServiceError> {
    if (400..500).contains(&response.status) {
        return Err(DataServiceError::ClientError { status: response.status, body: response.body });
    }
    if response.status >= 500 {
        return Err(DataServiceError::ServerError { status: response.status, body: response.body });
    }
    let json: serde_json::Value = serde_json::from_str(&response.body).map_err(DataServiceError::ParseFailure)?;
    Ok(Value::from_json(json))
}

/// Replace every `{name}` placeholder in `template` with the canonical
/// string form of `bindings[name]`. Placeholders with no matching binding
/// are left untouched.
fn substitute_placeholders(template: &str, bindings: &BTreeMap<FieldName, Value>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            let mut name = String::new();
            let mut closed = false;
            for inner in chars.by_ref() {
                if inner == '}' {
                    closed = true;
                    break;
                }
                name.push(inner);
            }
            if closed {
                match bindings.iter().find(|(k, _)| k.as_str() == name) {
                    Some((_, value)) => result.push_str(&value.canonical_string()),
                    None => {
                        result.push('{');
                        result.push_str(&name);
                        result.push('}');
                    }
                }
            } else {
                result.push('{');
                result.push_str(&name);
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn bindings(pairs: &[(&str, Value)]) -> BTreeMap<FieldName, Value> {
        pairs.iter().map(|(k, v)| (FieldName::new_unchecked(*k), v.clone())).collect()
    }

    #[test]
    fn substitutes_known_placeholder() {
        let bound = bindings(&[("customerId", Value::from("abc123"))]);
        let url = substitute_placeholders("https://svc/customers/{customerId}", &bound);
        assert_eq!(url, "https://svc/customers/abc123");
    }

    #[test]
    fn leaves_unknown_placeholder_untouched() {
        let url = substitute_placeholders("https://svc/{missing}", &BTreeMap::new());
        assert_eq!(url, "https://svc/{missing}");
    }

    #[test]
    fn substitutes_multiple_placeholders() {
        let bound = bindings(&[("a", Value::from("1")), ("b", Value::from("2"))]);
        let url = substitute_placeholders("/x/{a}/y/{b}", &bound);
        assert_eq!(url, "/x/1/y/2");
    }

    struct StubTransport {
        status: u16,
        body: String,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn send(&self, _request: PreparedRequest) -> Result<RawResponse, DataServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawResponse { status: self.status, body: self.body.clone() })
        }
    }

    #[tokio::test]
    async fn fetch_parses_a_successful_json_body() {
        let stub = Arc::new(StubTransport {
            status: 200,
            body: r#"{"data":{"customer":{"creditScore":720}}}"#.to_string(),
            calls: AtomicU32::new(0),
        });
        let client = DataServiceClient::with_transport(stub.clone());
        let config = DataServiceConfig::Rest {
            endpoint: "https://svc/credit".into(),
            method: HttpMethod::Get,
            headers: vec![],
            query_params: vec![],
            request_body: None,
            auth: AuthConfig::None,
            timeout_ms: 1000,
            max_retries: 3,
            depends_on: vec![],
        };
        let value = client.fetch(&config, &BTreeMap::new()).await.unwrap();
        assert_eq!(
            crate::mapper::extract(&value, "data.customer.creditScore").unwrap(),
            Value::from(720i64)
        );
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_error_is_retried_up_to_max_retries() {
        let stub = Arc::new(StubTransport { status: 500, body: "oops".into(), calls: AtomicU32::new(0) });
        let client = DataServiceClient::with_transport(stub.clone());
        let config = DataServiceConfig::Rest {
            endpoint: "https://svc/kyc".into(),
            method: HttpMethod::Get,
            headers: vec![],
            query_params: vec![],
            request_body: None,
            auth: AuthConfig::None,
            timeout_ms: 1000,
            max_retries: 2,
            depends_on: vec![],
        };
        let err = client.fetch(&config, &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, DataServiceError::ServerError { .. }));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
    }
}
