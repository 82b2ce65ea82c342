//! Job parameters: the typed launch inputs that also define job instance identity.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chunkflow_core::{DomainError, DomainResult, ValueObject};

/// A typed scalar parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
    Date(DateTime<Utc>),
}

impl ParameterValue {
    fn type_tag(&self) -> &'static str {
        match self {
            ParameterValue::String(_) => "string",
            ParameterValue::Long(_) => "long",
            ParameterValue::Double(_) => "double",
            ParameterValue::Bool(_) => "bool",
            ParameterValue::Date(_) => "date",
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(v) => f.write_str(v),
            ParameterValue::Long(v) => write!(f, "{v}"),
            ParameterValue::Double(v) => write!(f, "{v}"),
            ParameterValue::Bool(v) => write!(f, "{v}"),
            ParameterValue::Date(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for ParameterValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

/// A parameter value plus whether it takes part in job instance identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParameterValue,
    pub identifying: bool,
}

/// Immutable launch parameters.
///
/// Entries are kept sorted by name so the identity key is independent of the
/// order parameters were added in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
    entries: BTreeMap<String, JobParameter>,
}

impl ValueObject for JobParameters {}

impl JobParameters {
    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.entries.get(name).map(|p| &p.value)
    }

    pub fn is_identifying(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|p| p.identifying)
    }

    /// String view of a parameter, whatever its type.
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name).map(ToString::to_string)
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            ParameterValue::Long(v) => Some(*v),
            ParameterValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            ParameterValue::Double(v) => Some(*v),
            ParameterValue::Long(v) => Some(*v as f64),
            ParameterValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean view of a parameter. String values `"true"`/`"false"` are
    /// accepted case-insensitively; anything else is `None`.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            ParameterValue::Bool(v) => Some(*v),
            ParameterValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_date(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.get(name)? {
            ParameterValue::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The identifying subset of these parameters.
    pub fn identifying(&self) -> JobParameters {
        JobParameters {
            entries: self
                .entries
                .iter()
                .filter(|(_, p)| p.identifying)
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect(),
        }
    }

    /// Canonical encoding of the identifying parameters.
    ///
    /// Two parameter sets produce the same key iff their identifying entries
    /// have the same names, types and values.
    pub fn job_key(&self) -> String {
        self.entries
            .iter()
            .filter(|(_, p)| p.identifying)
            .map(|(name, p)| format!("{name}={}({})", p.value, p.value.type_tag()))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Builder for [`JobParameters`]. Parameters are identifying unless added
/// through one of the `*_non_identifying` methods.
#[derive(Debug, Clone, Default)]
pub struct JobParametersBuilder {
    entries: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    /// Add an identifying parameter.
    pub fn add(self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.add_with(name, value, true)
    }

    /// Add a parameter that does not contribute to instance identity.
    pub fn add_non_identifying(
        self,
        name: impl Into<String>,
        value: impl Into<ParameterValue>,
    ) -> Self {
        self.add_with(name, value, false)
    }

    pub fn add_with(
        mut self,
        name: impl Into<String>,
        value: impl Into<ParameterValue>,
        identifying: bool,
    ) -> Self {
        self.entries.insert(
            name.into(),
            JobParameter {
                value: value.into(),
                identifying,
            },
        );
        self
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            entries: self.entries,
        }
    }
}

/// Checks launch parameters before a job instance is resolved.
pub trait JobParametersValidator: Send + Sync {
    fn validate(&self, parameters: &JobParameters) -> DomainResult<()>;
}

/// Requires a set of keys and, when optional keys are declared, rejects any
/// key that is neither required nor optional.
#[derive(Debug, Clone, Default)]
pub struct DefaultJobParametersValidator {
    required: BTreeSet<String>,
    optional: BTreeSet<String>,
}

impl DefaultJobParametersValidator {
    pub fn new<R, O>(required: R, optional: O) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            optional: optional.into_iter().map(Into::into).collect(),
        }
    }
}

impl JobParametersValidator for DefaultJobParametersValidator {
    fn validate(&self, parameters: &JobParameters) -> DomainResult<()> {
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|k| parameters.get(k).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(DomainError::validation(format!(
                "missing required parameters: {}",
                missing.join(", ")
            )));
        }

        if !self.optional.is_empty() {
            let unexpected: Vec<&str> = parameters
                .names()
                .filter(|k| !self.required.contains(*k) && !self.optional.contains(*k))
                .collect();
            if !unexpected.is_empty() {
                return Err(DomainError::validation(format!(
                    "unexpected parameters: {}",
                    unexpected.join(", ")
                )));
            }
        }

        Ok(())
    }
}
