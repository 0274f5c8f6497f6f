use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::now_utc_iso;
use crate::state::BatchResultEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub session_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub total: u64,
    pub resolved: u64,
    pub failed: u64,
    pub pending: u64,
    pub aborted: Option<String>,
    pub entries: Vec<Map<String, Value>>,
}

impl BatchSummary {
    /// Tallies `results` into a summary. `exported` pairs an entry index with
    /// the file it was written to.
    pub fn from_results(
        session_id: &str,
        started_at: String,
        results: &[BatchResultEntry],
        aborted: Option<String>,
        exported: &[(usize, String)],
    ) -> Self {
        let mut summary = Self {
            session_id: session_id.to_string(),
            started_at,
            finished_at: now_utc_iso(),
            total: results.len() as u64,
            resolved: 0,
            failed: 0,
            pending: 0,
            aborted,
            entries: Vec::with_capacity(results.len()),
        };
        for (index, entry) in results.iter().enumerate() {
            match entry.status() {
                "resolved" => summary.resolved += 1,
                "failed" => summary.failed += 1,
                _ => summary.pending += 1,
            }
            let mut row = Map::new();
            row.insert("index".to_string(), Value::from(index as u64));
            row.insert("name".to_string(), Value::String(entry.original_name.clone()));
            row.insert("status".to_string(), Value::String(entry.status().to_string()));
            if let Some(payload) = entry.result() {
                row.insert("kind".to_string(), Value::String(payload.kind().to_string()));
            }
            if let Some(message) = entry.error_message() {
                row.insert("error".to_string(), Value::String(message.to_string()));
            }
            if let Some((_, path)) = exported.iter().find(|(at, _)| *at == index) {
                row.insert("path".to_string(), Value::String(path.clone()));
            }
            summary.entries.push(row);
        }
        summary
    }
}

pub fn write_summary(
    path: &Path,
    summary: &BatchSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Map, Value};

    use super::{write_summary, BatchSummary};
    use crate::images::DisplayRef;
    use crate::state::{BatchResultEntry, EntryOutcome, ResultPayload};

    fn entry(name: &str, outcome: EntryOutcome) -> BatchResultEntry {
        BatchResultEntry {
            original: DisplayRef::new(format!("blob:test/{name}")),
            original_name: name.to_string(),
            outcome,
        }
    }

    #[test]
    fn write_summary_counts_statuses() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("summary.json");

        let results = vec![
            entry(
                "a.png",
                EntryOutcome::Resolved(ResultPayload::Image {
                    bytes: Arc::from(&b"png"[..]),
                    mime_type: "image/png".to_string(),
                }),
            ),
            entry("b.png", EntryOutcome::Failed("Access denied. Check the API key.".to_string())),
            entry("c.png", EntryOutcome::Pending),
        ];
        let summary = BatchSummary::from_results(
            "session-1",
            "2026-10-19T00:00:00+00:00".to_string(),
            &results,
            Some("access_denied".to_string()),
            &[(0, "out/edited-a.jpg".to_string())],
        );
        let mut extra = Map::new();
        extra.insert("provider".to_string(), Value::String("dryrun".to_string()));
        write_summary(&path, &summary, Some(&extra))?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["total"], json!(3));
        assert_eq!(parsed["resolved"], json!(1));
        assert_eq!(parsed["failed"], json!(1));
        assert_eq!(parsed["pending"], json!(1));
        assert_eq!(parsed["aborted"], json!("access_denied"));
        assert_eq!(parsed["entries"][0]["path"], json!("out/edited-a.jpg"));
        assert_eq!(parsed["entries"][0]["kind"], json!("image"));
        assert_eq!(parsed["entries"][1]["error"], json!("Access denied. Check the API key."));
        assert_eq!(parsed["provider"], json!("dryrun"));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
