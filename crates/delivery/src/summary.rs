//! Formatting of distribution results for the `result` operation.

use serde::Deserialize;

/// One delivery outcome as reported by the distribution service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub report_name: Option<String>,
}

impl DistributionEntry {
    fn line(&self) -> String {
        let outcome = if self.success { "ok" } else { "failed" };
        let mut line = self.kind.clone();
        if let Some(name) = self.report_name.as_deref().filter(|n| !n.is_empty()) {
            line.push_str(&format!(" [{name}]"));
        }
        line.push_str(&format!(": {outcome}"));
        if !self.message.is_empty() {
            line.push_str(&format!(" - {}", self.message));
        }
        line
    }
}

/// Render the stored distribution text for callers.
///
/// A JSON array of [`DistributionEntry`] becomes one line per entry; any
/// other text is returned verbatim.
pub fn format_summary(raw: &str) -> String {
    match serde_json::from_str::<Vec<DistributionEntry>>(raw) {
        Ok(entries) => entries
            .iter()
            .map(DistributionEntry::line)
            .collect::<Vec<_>>()
            .join("\n"),
        Err(_) => raw.to_string(),
    }
}
