//! # Field Configuration (§3 `FieldConfig`, `DataServiceConfig`)
//!
//! Metadata describing how a single field's value comes to be: supplied
//! statically by the caller, fetched from a GraphQL/REST data service and
//! extracted with a mapper expression, or calculated from other fields.
//! These are read-only snapshots for the lifetime of one execution — see
//! the store traits in [`crate::stores`] for how they are loaded.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::calculator::CalculatorConfig;
use crate::value::{DataType, Value};

fn field_name_re() -> &'static Regex {
    static FIELD_NAME: OnceLock<Regex> = OnceLock::new();
    FIELD_NAME.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("static regex"))
}

/// A validated field name (`^[A-Za-z][A-Za-z0-9_]*$`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldName(String);

impl FieldName {
    /// Construct without validation, for names already known to be valid
    /// (e.g. deserialized from a trusted store). Prefer [`FieldName::parse`]
    /// at the data model's boundary.
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn parse(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        if field_name_re().is_match(&name) {
            Ok(Self(name))
        } else {
            Err(format!("invalid field name '{name}': must match ^[A-Za-z][A-Za-z0-9_]*$"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldName {
    fn from(s: &str) -> Self {
        Self::new_unchecked(s)
    }
}

impl std::borrow::Borrow<str> for FieldName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// HTTP method for a REST data service (§3 `DataServiceConfig`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

/// Authentication to apply to a data-service request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum AuthConfig {
    None,
    ApiKey { header: String, value: String },
    Bearer { token: String },
    Basic { user: String, pass: String },
    OAuth {
        token: String,
        #[serde(default = "default_token_type")]
        token_type: String,
    },
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::None
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

/// Data-service configuration: either a GraphQL endpoint or a REST endpoint.
/// The `serviceType` discriminator is preserved verbatim for wire
/// compatibility with existing stored configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "serviceType", rename_all = "UPPERCASE")]
pub enum DataServiceConfig {
    Graphql {
        endpoint: String,
        query: String,
        #[serde(default)]
        operation_name: Option<String>,
        #[serde(default)]
        auth: AuthConfig,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
        /// Other field names this fetch's parameters depend on.
        #[serde(default)]
        depends_on: Vec<FieldName>,
    },
    Rest {
        endpoint: String,
        method: HttpMethod,
        #[serde(default)]
        headers: Vec<(String, String)>,
        #[serde(default)]
        query_params: Vec<(String, String)>,
        #[serde(default)]
        request_body: Option<String>,
        #[serde(default)]
        auth: AuthConfig,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
        #[serde(default)]
        depends_on: Vec<FieldName>,
    },
}

impl DataServiceConfig {
    pub fn timeout_ms(&self) -> u64 {
        match self {
            DataServiceConfig::Graphql { timeout_ms, .. }
            | DataServiceConfig::Rest { timeout_ms, .. } => *timeout_ms,
        }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            DataServiceConfig::Graphql { max_retries, .. }
            | DataServiceConfig::Rest { max_retries, .. } => *max_retries,
        }
    }

    pub fn auth(&self) -> &AuthConfig {
        match self {
            DataServiceConfig::Graphql { auth, .. } | DataServiceConfig::Rest { auth, .. } => auth,
        }
    }

    pub fn depends_on(&self) -> &[FieldName] {
        match self {
            DataServiceConfig::Graphql { depends_on, .. }
            | DataServiceConfig::Rest { depends_on, .. } => depends_on,
        }
    }
}

/// A field's full configuration: type, how it's populated, and what it
/// depends on. See the invariants documented on each variant of
/// [`FieldConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: FieldName,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub data_service_config: Option<DataServiceConfig>,
    #[serde(default)]
    pub mapper_expression: Option<String>,
    #[serde(default)]
    pub is_calculated: bool,
    #[serde(default)]
    pub calculator_config: Option<CalculatorConfig>,
    #[serde(default)]
    pub dependencies: Vec<FieldName>,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub is_required: bool,
}

impl FieldConfig {
    /// §3 invariants: `isCalculated ⇒ calculatorConfig` present;
    /// non-calculated fields with a data service must also carry a mapper
    /// expression; the name must already be a valid [`FieldName`].
    pub fn validate(&self) -> Result<(), String> {
        if self.is_calculated && self.calculator_config.is_none() {
            return Err(format!(
                "field '{}' is calculated but has no calculatorConfig",
                self.name
            ));
        }
        if !self.is_calculated && self.data_service_config.is_some() && self.mapper_expression.is_none()
        {
            return Err(format!(
                "field '{}' has a data service but no mapperExpression",
                self.name
            ));
        }
        Ok(())
    }

    pub fn is_static(&self) -> bool {
        !self.is_calculated && self.data_service_config.is_none()
    }

    pub fn is_fetched(&self) -> bool {
        !self.is_calculated && self.data_service_config.is_some()
    }

    /// All fields this one must wait on: explicit `dependencies` plus
    /// whatever its data-service config's `dependsOn` adds.
    pub fn all_dependencies(&self) -> Vec<FieldName> {
        let mut deps = self.dependencies.clone();
        if let Some(service) = &self.data_service_config {
            for dep in service.depends_on() {
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            }
        }
        deps
    }
}
