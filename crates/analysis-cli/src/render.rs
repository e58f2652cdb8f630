use analysis_stream::{AnalysisSummary, ViewModel};

/// Turns successive view snapshots into new terminal lines.
#[derive(Debug, Default)]
pub struct ViewPrinter {
    printed_logs: usize,
    last_progress: Option<(String, i32)>,
    connected: Option<bool>,
}

impl ViewPrinter {
    /// Lines not yet shown for `view`.
    pub fn lines(&mut self, view: &ViewModel) -> Vec<String> {
        let mut out = Vec::new();

        if self.connected != Some(view.is_connected) {
            if self.connected.is_some() || view.is_connected {
                out.push(if view.is_connected {
                    "-- connected".to_string()
                } else {
                    "-- disconnected".to_string()
                });
            }
            self.connected = Some(view.is_connected);
        }

        // The view was reset; start over.
        if view.logs.len() < self.printed_logs {
            self.printed_logs = 0;
            self.last_progress = None;
        }

        let progress = (view.step.clone(), view.progress);
        if !view.step.is_empty() && self.last_progress.as_ref() != Some(&progress) {
            out.push(format!("{:>4}%  {}", view.progress, view.step));
            self.last_progress = Some(progress);
        }

        out.extend(view.logs[self.printed_logs..].iter().cloned());
        self.printed_logs = view.logs.len();
        out
    }
}

/// Short human summary of a finished analysis.
pub fn summary_lines(summary: &AnalysisSummary) -> Vec<String> {
    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "unknown".into());
    let mut out = vec![
        format!("session:      {}", summary.session_id),
        format!("language:     {}", field(&summary.language)),
        format!("framework:    {}", field(&summary.framework)),
        format!("build system: {}", field(&summary.build_system)),
        format!(
            "features:     {} ({} tests)",
            summary.features.len(),
            summary.test_count()
        ),
        format!("files:        {}", summary.dependency_graph.len()),
    ];
    for feature in &summary.features {
        out.push(format!(
            "  - {} [{} tests] {}",
            feature.feature_name,
            feature.tests.len(),
            feature.file_path
        ));
    }
    out
}
