use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;

use crate::ledger::{RunStats, Stage};

/// Human-readable duration with at most two units, e.g. `250ms`,
/// `4sec 120ms`, `1min 3sec`.
pub fn pretty_duration(delta: Duration) -> String {
    const UNITS: [(u128, &str); 5] = [
        (86_400_000, "days"),
        (3_600_000, "hr"),
        (60_000, "min"),
        (1_000, "sec"),
        (1, "ms"),
    ];
    let ms = delta.as_millis();
    let Some(major) = UNITS.iter().position(|(size, _)| ms >= *size) else {
        return "0ms".to_string();
    };
    let (size, unit) = UNITS[major];
    let mut out = format!("{}{}", ms / size, unit);
    if let Some((minor_size, minor_unit)) = UNITS.get(major + 1) {
        out.push_str(&format!(" {}{}", (ms % size) / minor_size, minor_unit));
    }
    out
}

fn stage_heading(stage: Stage) -> &'static str {
    match stage {
        Stage::Generation => "First stage",
        Stage::StaticRepair => "Second stage",
        Stage::DynamicRepair => "Third stage",
    }
}

/// Render the `stats.md` report.
pub fn render_stats_md(stats: &RunStats, generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("# Stats\n\n");
    out.push_str(&format!("Generated at: {}\n\n", generated_at.to_rfc3339()));
    for stage in Stage::ALL {
        let s = stats.stage(stage);
        out.push_str(&format!(
            "## {} ({})\nTotal time: {}\nTotal calls: {}\nTotal cost: {:.6}\n\n",
            stage_heading(stage),
            stage,
            pretty_duration(s.total_time),
            s.total_calls,
            s.total_cost()
        ));
    }
    out.push_str(&format!(
        "## Total\nTotal time: {}\nTotal calls: {}\nAttempts: {}\nTotal cost: {:.6}\n",
        pretty_duration(stats.total_time),
        stats.total_calls,
        stats.attempts,
        stats.total_cost
    ));
    out
}

impl RunStats {
    pub fn to_markdown(&self) -> String {
        render_stats_md(self, Utc::now())
    }
}

/// Write the stats report to `path`.
pub fn write_stats_md(path: &Path, stats: &RunStats) -> Result<()> {
    std::fs::write(path, stats.to_markdown()).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Usage;
    use crate::ledger::CostLedger;

    #[test]
    fn test_pretty_duration() {
        assert_eq!(pretty_duration(Duration::ZERO), "0ms");
        assert_eq!(pretty_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(pretty_duration(Duration::from_millis(4_120)), "4sec 120ms");
        assert_eq!(pretty_duration(Duration::from_millis(63_500)), "1min 3sec");
        assert_eq!(pretty_duration(Duration::from_secs(7_260)), "2hr 1min");
        assert_eq!(pretty_duration(Duration::from_secs(90_000)), "1days 1hr");
    }

    #[test]
    fn test_stats_md_sections() {
        let ledger = CostLedger::default();
        ledger.record_usage(
            Stage::Generation,
            &Usage {
                model: "gpt-3.5-turbo".into(),
                prompt_tokens: 1024,
                completion_tokens: 0,
            },
        );
        let stats = ledger.snapshot(1, Duration::from_millis(1_500));
        let md = render_stats_md(&stats, Utc::now());

        assert!(md.starts_with("# Stats\n"));
        assert!(md.contains("## First stage (generation)\n"));
        assert!(md.contains("## Second stage (static repair)\n"));
        assert!(md.contains("## Third stage (dynamic repair)\n"));
        assert!(md.contains("Total cost: 0.001500"));
        assert!(md.contains("Total time: 1sec 500ms"));
        assert!(md.contains("Attempts: 1"));
    }

    #[test]
    fn test_write_stats_md() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.md");
        write_stats_md(&path, &RunStats::default()).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("## Total"));
    }
}
