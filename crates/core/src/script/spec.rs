//! Strongly-typed job specification submitted to the rendering engine.
//!
//! Only the fields the orchestrator reads are typed; everything else rides
//! along in the flattened `extra` maps so the engine sees the script as the
//! user wrote it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Root of a resolved script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpecification {
    pub tasks: Vec<TaskSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub reports: Vec<ReportSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub template: TemplateSpec,
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,
    /// Delivery targets, kept opaque for the distribution service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribute: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    /// Template file name, or an `artifact://` reference once uploaded.
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobSpecification {
    pub fn reports(&self) -> impl Iterator<Item = &ReportSpec> {
        self.tasks.iter().flat_map(|task| task.reports.iter())
    }

    pub fn reports_mut(&mut self) -> impl Iterator<Item = &mut ReportSpec> {
        self.tasks.iter_mut().flat_map(|task| task.reports.iter_mut())
    }

    /// JSON form sent to the rendering engine.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
