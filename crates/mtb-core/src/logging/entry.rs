//! Log line and run manifest records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event of a campaign log, written as a single JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignLogEntry {
    /// RFC 3339 timestamp with milliseconds
    pub ts: String,
    pub level: String,
    /// Project the campaign runs against
    pub project: String,
    /// Module path of the event
    pub target: String,
    pub msg: String,
    /// Structured event fields (`rank`, `case`, `state`...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
    /// Enclosing spans, outermost first, joined with ` > `
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl CampaignLogEntry {
    pub fn new(
        level: impl Into<String>,
        project: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            project: project.into(),
            target: target.into(),
            msg: msg.into(),
            fields: None,
            span: None,
        }
    }

    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Manifest written once a campaign run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// Timestamp-based identifier, also the file stem
    pub session_id: String,
    pub written_at: String,
    pub project: String,
    pub cwd: Option<String>,
    /// Campaign report: contexts, ranks and export paths
    pub report: Value,
}

impl RunManifest {
    pub fn new(project: impl Into<String>, report: Value) -> Self {
        let now = chrono::Utc::now();
        Self {
            session_id: now.format("%Y-%m-%dT%H-%M-%S").to_string(),
            written_at: now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            project: project.into(),
            cwd: std::env::current_dir().ok().map(|p| p.display().to_string()),
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_json_line() {
        let entry = CampaignLogEntry::new("info", "Plant", "mtb_core::campaign", "Case provisioned")
            .with_fields(serde_json::json!({ "rank": 3, "case": "03_FRT" }));

        let json = entry.to_json_line().unwrap();
        assert!(!json.contains('\n'));
        assert!(json.contains("\"project\":\"Plant\""));
        assert!(json.contains("\"rank\":3"));
        assert!(!json.contains("\"span\""));

        let parsed = CampaignLogEntry::from_json_line(&json).unwrap();
        assert_eq!(parsed.msg, "Case provisioned");
        assert_eq!(parsed.fields.unwrap()["case"], "03_FRT");
    }

    #[test]
    fn test_manifest_session_id_is_file_safe() {
        let manifest = RunManifest::new("Plant", serde_json::json!({ "contexts": [] }));
        assert!(!manifest.session_id.contains(':'));
        assert_eq!(manifest.report["contexts"], serde_json::json!([]));
    }
}
