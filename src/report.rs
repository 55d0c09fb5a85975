//! Markdown report rendering.
//!
//! A report is written for every run, success or failure; the orchestrator
//! treats "no report" as an invariant violation, so this module keeps no
//! preconditions beyond a writable reports directory.

use crate::error::Result;
use crate::llm::{CaseType, ImpactAnalysis, ImpactLevel};
use crate::schema::TestCase;
use chrono::Local;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// An updated case plus the provenance attached for reporting only.
#[derive(Debug, Clone)]
pub struct UpdatedCase {
    pub case: TestCase,
    pub original_file: String,
    pub impact_level: ImpactLevel,
    pub reasoning: String,
}

/// A newly created case plus its reporting provenance.
#[derive(Debug, Clone)]
pub struct CreatedCase {
    pub case: TestCase,
    pub case_type: CaseType,
    pub generated_for: String,
}

/// Run-level execution summary embedded in the report.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub status: String,
    pub errors: Vec<String>,
    pub total_analyzed: usize,
    pub total_updated: usize,
    pub total_created: usize,
    pub execution_time_secs: f64,
}

pub struct ReportGenerator {
    reports_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    /// Render and write the report, returning its path.
    pub fn generate(
        &self,
        change_request: &str,
        analysis: Option<&ImpactAnalysis>,
        updated: &[UpdatedCase],
        created: &[CreatedCase],
        summary: &RunSummary,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.reports_dir)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self
            .reports_dir
            .join(format!("change_request_report_{timestamp}.md"));
        let body = render(change_request, analysis, updated, created, summary);
        fs::write(&path, body)?;
        Ok(path)
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }
}

fn render(
    change_request: &str,
    analysis: Option<&ImpactAnalysis>,
    updated: &[UpdatedCase],
    created: &[CreatedCase],
    summary: &RunSummary,
) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# QA Copilot - Change Request Report\n");
    let _ = writeln!(
        out,
        "**Generated:** {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "## Change Request\n");
    let _ = writeln!(out, "```\n{}\n```\n", change_request.trim_end());
    out.push_str("---\n\n");

    let _ = writeln!(out, "## Execution Summary\n");
    let _ = writeln!(out, "- **Test cases analyzed:** {}", summary.total_analyzed);
    let _ = writeln!(out, "- **Test cases updated:** {}", summary.total_updated);
    let _ = writeln!(out, "- **New test cases created:** {}", summary.total_created);
    let _ = writeln!(
        out,
        "- **Execution time:** {:.2} seconds",
        summary.execution_time_secs
    );
    let _ = writeln!(out, "- **Status:** {}\n", summary.status);

    if !summary.errors.is_empty() {
        let _ = writeln!(out, "### Errors And Warnings\n");
        for error in &summary.errors {
            let _ = writeln!(out, "- {error}");
        }
        out.push('\n');
    }
    out.push_str("---\n\n");

    let _ = writeln!(out, "## Analysis Summary\n");
    match analysis {
        Some(analysis) => {
            if !analysis.summary.is_empty() {
                let _ = writeln!(out, "{}\n", analysis.summary);
            }
            let _ = writeln!(out, "### Impact Assessment\n");
            if analysis.impacted.is_empty() {
                out.push_str("No existing test cases impacted.\n\n");
            } else {
                out.push_str("| Test Case | Impact | Reasoning |\n");
                out.push_str("| --- | --- | --- |\n");
                for item in &analysis.impacted {
                    let _ = writeln!(
                        out,
                        "| {} | {} | {} |",
                        item.test_case_id,
                        item.impact_level.as_str(),
                        item.reasoning.replace('|', "\\|")
                    );
                }
                out.push('\n');
            }
        }
        None => out.push_str("Analysis did not complete.\n\n"),
    }
    out.push_str("---\n\n");

    let _ = writeln!(out, "## Updated Test Cases\n");
    if updated.is_empty() {
        out.push_str("None.\n\n");
    }
    for item in updated {
        let _ = writeln!(
            out,
            "### {} ({})\n",
            item.case.title, item.case.id
        );
        let _ = writeln!(out, "- **Original file:** {}", item.original_file);
        let _ = writeln!(out, "- **Impact level:** {}", item.impact_level.as_str());
        let _ = writeln!(out, "- **Reasoning:** {}\n", item.reasoning);
        write_case_body(&mut out, &item.case);
    }
    out.push_str("---\n\n");

    let _ = writeln!(out, "## New Test Cases\n");
    if created.is_empty() {
        out.push_str("None.\n\n");
    }
    for item in created {
        let _ = writeln!(out, "### {} ({})\n", item.case.title, item.case.id);
        let _ = writeln!(out, "- **Case type:** {}", item.case_type.as_str());
        let _ = writeln!(out, "- **Generated for:** {}\n", item.generated_for);
        write_case_body(&mut out, &item.case);
    }
    let _ = writeln!(out, "## Assumptions And Open Questions\n");
    let assumptions = collect_assumptions(analysis);
    if assumptions.is_empty() {
        out.push_str("No specific assumptions or open questions identified during this analysis.\n\n");
    } else {
        for assumption in assumptions {
            let _ = writeln!(out, "- {assumption}");
        }
        out.push('\n');
    }
    out.push_str("---\n\n");
    out.push_str("*Generated by qa-copilot. Review all changes before merging.*\n");

    out
}

/// Surface the places where the analysis admitted to guessing, so a
/// reviewer knows which conclusions to double-check.
fn collect_assumptions(analysis: Option<&ImpactAnalysis>) -> Vec<String> {
    let mut found = Vec::new();
    let Some(analysis) = analysis else {
        return found;
    };
    if analysis.summary.to_lowercase().contains("assum") {
        found.push("The analysis summary notes assumptions made from the available context.".to_string());
    }
    for item in &analysis.impacted {
        if item.reasoning.to_lowercase().contains("assum") {
            found.push(format!(
                "Assumptions made for {}: {}",
                item.test_case_id, item.reasoning
            ));
        }
    }
    found
}

fn write_case_body(out: &mut String, case: &TestCase) {
    let _ = writeln!(out, "- **Kind:** {}", case.kind.as_str());
    let _ = writeln!(out, "- **Priority:** {}", case.priority.as_str());
    if let Some(pre) = &case.preconditions {
        let _ = writeln!(out, "- **Preconditions:** {pre}");
    }
    let _ = writeln!(out, "\n| # | Action | Expected Outcome |");
    let _ = writeln!(out, "| --- | --- | --- |");
    for (i, step) in case.steps.iter().enumerate() {
        let _ = writeln!(
            out,
            "| {} | {} | {} |",
            i + 1,
            step.action.replace('|', "\\|"),
            step.expected_outcome.replace('|', "\\|")
        );
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieve::testutil::case;
    use tempfile::TempDir;

    #[test]
    fn report_written_even_without_analysis() {
        let tmp = TempDir::new().unwrap();
        let generator = ReportGenerator::new(tmp.path().join("reports"));
        let summary = RunSummary {
            status: "error".to_string(),
            errors: vec!["analysis failed: connection refused".to_string()],
            ..RunSummary::default()
        };

        let path = generator
            .generate("Change the clock-in flow", None, &[], &[], &summary)
            .unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.contains("Analysis did not complete."));
        assert!(body.contains("connection refused"));
        assert!(body.contains("**Status:** error"));
    }

    #[test]
    fn report_lists_updated_and_created_cases() {
        let tmp = TempDir::new().unwrap();
        let generator = ReportGenerator::new(tmp.path().join("reports"));
        let analysis = ImpactAnalysis {
            summary: "One case needs a new verification step.".to_string(),
            ..ImpactAnalysis::default()
        };
        let updated = vec![UpdatedCase {
            case: case("tc_001", "Worker clocks in", "Tap clock-in"),
            original_file: "tc_001.json".to_string(),
            impact_level: ImpactLevel::High,
            reasoning: "covers the changed flow".to_string(),
        }];
        let created = vec![CreatedCase {
            case: case("tc_004", "Clock-in rejected offsite", "Attempt clock-in offsite"),
            case_type: CaseType::Negative,
            generated_for: "Clock-in rejected offsite".to_string(),
        }];
        let summary = RunSummary {
            status: "success".to_string(),
            total_analyzed: 3,
            total_updated: 1,
            total_created: 1,
            ..RunSummary::default()
        };

        let path = generator
            .generate("cr", Some(&analysis), &updated, &created, &summary)
            .unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.contains("Worker clocks in (tc_001)"));
        assert!(body.contains("Clock-in rejected offsite (tc_004)"));
        assert!(body.contains("**Case type:** negative"));
        assert!(body.contains("One case needs a new verification step."));
    }

    #[test]
    fn assumption_language_in_reasoning_is_surfaced() {
        let tmp = TempDir::new().unwrap();
        let generator = ReportGenerator::new(tmp.path().join("reports"));
        let analysis = ImpactAnalysis {
            impacted: vec![crate::llm::ImpactedCase {
                test_case_id: "tc_007".to_string(),
                impact_level: ImpactLevel::Low,
                required_changes: vec![],
                reasoning: "Assuming the old flow remains reachable".to_string(),
            }],
            ..ImpactAnalysis::default()
        };

        let path = generator
            .generate("cr", Some(&analysis), &[], &[], &RunSummary::default())
            .unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.contains("Assumptions made for tc_007"));
    }
}
