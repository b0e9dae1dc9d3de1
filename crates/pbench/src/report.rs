//! Run summary formatting.

use serde::Serialize;

use crate::executor::PBenchExecutor;
use crate::lifecycle::{RunFailure, RunState};

/// What happened during one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub timestamp: String,
    pub state: RunState,
    pub target: String,
    pub concurrency: u32,
    pub throughput: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_requests: Option<u64>,
    pub elapsed_secs: f64,
    pub artifacts_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn new(executor: &PBenchExecutor, state: RunState, failure: Option<&RunFailure>) -> Self {
        let profile = executor.load_profile();
        let progress = executor.progress();
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            state,
            target: progress.target,
            concurrency: profile.concurrency,
            throughput: profile.throughput,
            duration_secs: profile.duration().map(|d| d.as_secs_f64()),
            planned_requests: executor.planned_items(),
            elapsed_secs: progress.elapsed.as_secs_f64(),
            artifacts_dir: executor.artifacts().dir.display().to_string(),
            failed_stage: failure.map(|f| f.stage.to_string()),
            error: failure.map(|f| f.source.to_string()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done
    }
}

/// Formats run summaries for output.
pub struct RunReport;

impl RunReport {
    /// Format summary as a console table.
    pub fn format_table(summary: &RunSummary) -> String {
        use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![format!("PBench Run: {}", summary.target)]);

        table.add_row(vec!["State:", &format!("{:?}", summary.state)]);
        table.add_row(vec![
            "Load:",
            &format!(
                "{:.1} req/s x {} connections",
                summary.throughput, summary.concurrency
            ),
        ]);
        table.add_row(vec![
            "Planned duration:",
            &summary
                .duration_secs
                .map(|d| format!("{:.1}s", d))
                .unwrap_or_else(|| "unbounded".to_string()),
        ]);
        table.add_row(vec![
            "Scheduled requests:",
            &summary
                .planned_requests
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
        table.add_row(vec!["Elapsed:", &format!("{:.1}s", summary.elapsed_secs)]);
        table.add_row(vec!["Artifacts:", &summary.artifacts_dir]);

        if let (Some(stage), Some(error)) = (&summary.failed_stage, &summary.error) {
            table.add_row(vec!["", ""]);
            table.add_row(vec![format!("Failed in {}:", stage), error.clone()]);
        }

        table.to_string()
    }

    /// Format summary as JSON.
    pub fn format_json(summary: &RunSummary) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(summary)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::error::PbenchError;
    use crate::lifecycle::Stage;

    fn executor() -> PBenchExecutor {
        let config = RunConfig::from_yaml_str(
            "execution:\n  throughput: 10\n  hold-for: 30\n  scenario:\n    default-address: http://blazedemo.com/\n    requests: [/]\n",
        )
        .unwrap();
        PBenchExecutor::new(config)
    }

    #[test]
    fn test_summary_reports_failure() {
        let failure = RunFailure {
            stage: Stage::Prepare,
            source: std::sync::Arc::new(PbenchError::MissingTool {
                path: "/notexistent".to_string(),
            }),
        };
        let summary = RunSummary::new(&executor(), RunState::Failed, Some(&failure));
        assert!(!summary.succeeded());
        assert_eq!(summary.failed_stage.as_deref(), Some("prepare"));
        assert!(summary.error.as_deref().unwrap().contains("/notexistent"));

        let table = RunReport::format_table(&summary);
        assert!(table.contains("Failed in prepare:"));
    }

    #[test]
    fn test_summary_json() {
        let summary = RunSummary::new(&executor(), RunState::Done, None);
        let json = RunReport::format_json(&summary).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["state"], "DONE");
        assert_eq!(value["duration_secs"], 30.0);
        assert!(value.get("error").is_none());
    }
}
