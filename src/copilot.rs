//! Run orchestration.
//!
//! A processing run walks a fixed state sequence: retrieve relevant cases,
//! analyze the change request, update impacted cases, create new cases,
//! then report. Reporting always executes; a run that fails in any earlier
//! state still closes its session as `error` and still leaves an error
//! report on disk.
//!
//! Per-item fault isolation: a single update or creation failing (model,
//! schema, or store) becomes a recorded warning, never an aborted run.
//! Only the analysis step, which has no per-item scope, is fatal.

use crate::config::Config;
use crate::error::{CopilotError, Result};
use crate::llm::{
    ChatBackend, GenerationClient, GenerationSettings, ImpactAnalysis, OpenRouterBackend,
};
use crate::observability::{MetricsSink, MetricsSummary, SessionRecord, SessionStatus, SessionTotals};
use crate::prompts::PromptLibrary;
use crate::report::{CreatedCase, ReportGenerator, RunSummary, UpdatedCase};
use crate::retrieve::Retriever;
use crate::schema::{SchemaValidator, TestCase};
use crate::store::{StoreValidation, TestCaseStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Current system readiness, for the `status` command.
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub ready: bool,
    pub api_key_configured: bool,
    pub test_case_count: usize,
    pub context_exists: bool,
    pub schema_exists: bool,
    pub reports_dir: PathBuf,
}

pub struct Copilot {
    config: Config,
    store: TestCaseStore,
    generation: GenerationClient,
    retriever: Box<dyn Retriever>,
    sink: Arc<MetricsSink>,
    reports: ReportGenerator,
}

impl Copilot {
    /// Build a copilot from validated config, talking to the real API.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let api_key = config.api_key.clone().ok_or_else(|| {
            CopilotError::Configuration("no API key configured".to_string())
        })?;
        let backend: Arc<dyn ChatBackend> = Arc::new(OpenRouterBackend::new(api_key));
        Self::with_backend(config, backend)
    }

    /// Build a copilot over an arbitrary backend. No API key is required;
    /// used by tests and any future local-model integration.
    pub fn with_backend(config: Config, backend: Arc<dyn ChatBackend>) -> Result<Self> {
        let validator = Arc::new(SchemaValidator::load(&config.schema_file())?);
        let store = TestCaseStore::new(config.cases_dir(), Arc::clone(&validator));
        let sink = Arc::new(MetricsSink::open(config.metrics_file()));
        let reports = ReportGenerator::new(config.reports_path());
        let retriever = config.retriever_backend()?.build();
        let settings = GenerationSettings {
            model: config.model_tier()?,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
            ..GenerationSettings::default()
        };
        let generation = GenerationClient::new(
            backend,
            PromptLibrary::new(config.prompts_path()),
            validator,
            Arc::clone(&sink),
            settings,
        );
        Ok(Self {
            config,
            store,
            generation,
            retriever,
            sink,
            reports,
        })
    }

    /// Process a change request file end to end. Returns the report path;
    /// on failure the error still references the (error) report location.
    pub async fn process_change_request(&mut self, change_request_path: &Path) -> Result<PathBuf> {
        // Input errors surface before any session work begins.
        let change_request =
            std::fs::read_to_string(change_request_path).map_err(|e| {
                CopilotError::Input(format!(
                    "failed to read change request {}: {e}",
                    change_request_path.display()
                ))
            })?;

        let session_id = uuid::Uuid::new_v4().to_string();
        self.sink
            .start_session(&session_id, &change_request_path.to_string_lossy());
        let started = Instant::now();

        let mut summary = RunSummary {
            status: "success".to_string(),
            ..RunSummary::default()
        };
        let mut analysis: Option<ImpactAnalysis> = None;
        let mut updated: Vec<UpdatedCase> = Vec::new();
        let mut created: Vec<CreatedCase> = Vec::new();

        let outcome = self
            .run_pipeline(
                &session_id,
                &change_request,
                &mut summary,
                &mut analysis,
                &mut created,
                &mut updated,
            )
            .await;

        summary.execution_time_secs = started.elapsed().as_secs_f64();
        let totals = SessionTotals {
            test_cases_generated: created.len() as u64,
            test_cases_updated: updated.len() as u64,
        };

        // The session record must close on every terminal path, so the
        // report write happens first and its failure is folded into the
        // session before end_session, never propagated past it.
        match outcome {
            Ok(()) => {
                let report = self.reports.generate(
                    &change_request,
                    analysis.as_ref(),
                    &updated,
                    &created,
                    &summary,
                );
                match report {
                    Ok(report) => {
                        self.sink
                            .end_session(&session_id, SessionStatus::Success, totals);
                        Ok(report)
                    }
                    Err(report_err) => {
                        self.sink.log_warning(
                            &session_id,
                            &format!("failed to write report: {report_err}"),
                        );
                        self.sink
                            .end_session(&session_id, SessionStatus::Error, totals);
                        Err(report_err)
                    }
                }
            }
            Err(err) => {
                summary.status = "error".to_string();
                summary.errors.push(err.to_string());
                self.sink.log_warning(&session_id, &err.to_string());

                let report = self.reports.generate(
                    &change_request,
                    analysis.as_ref(),
                    &updated,
                    &created,
                    &summary,
                );
                if let Err(report_err) = &report {
                    self.sink.log_warning(
                        &session_id,
                        &format!("failed to write error report: {report_err}"),
                    );
                }
                self.sink
                    .end_session(&session_id, SessionStatus::Error, totals);
                match report {
                    Ok(report) => Err(CopilotError::RunFailed {
                        detail: err.to_string(),
                        report,
                    }),
                    // No report artifact exists; surface the run failure
                    // itself rather than a path that was never written.
                    Err(_) => Err(err),
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        &mut self,
        session_id: &str,
        change_request: &str,
        summary: &mut RunSummary,
        analysis_out: &mut Option<ImpactAnalysis>,
        created: &mut Vec<CreatedCase>,
        updated: &mut Vec<UpdatedCase>,
    ) -> Result<()> {
        // retrieving: fit on the current corpus and select the subset the
        // analysis prompt is allowed to see. Prompt size stays bounded no
        // matter how large the corpus grows.
        let corpus = self.store.load_all()?;
        self.retriever.fit(&corpus);
        let relevant = self.retriever.retrieve(change_request, self.config.top_k)?;
        summary.total_analyzed = relevant.len();
        let relevant_cases: Vec<TestCase> = relevant.into_iter().map(|(case, _)| case).collect();

        // analyzing: the one phase with no per-item scope; failure here is
        // fatal to the run (but still reported by the caller).
        let context = std::fs::read_to_string(self.config.context_file()).map_err(|e| {
            CopilotError::Input(format!(
                "failed to read context overview {}: {e}",
                self.config.context_file().display()
            ))
        })?;
        let analysis = self
            .generation
            .analyze(Some(session_id), change_request, &context, &relevant_cases)
            .await?;

        // updating: impacted ids resolve against the full corpus, not the
        // retrieved subset; the analysis may legitimately name a case that
        // scored below the retrieval cutoff.
        for impacted in &analysis.impacted {
            let Some(original) = corpus.iter().find(|c| c.id == impacted.test_case_id) else {
                self.warn(
                    session_id,
                    summary,
                    &format!(
                        "impacted test case {} not found in store, skipping",
                        impacted.test_case_id
                    ),
                );
                continue;
            };

            let result = async {
                self.store.backup(&original.id)?;
                let mut case = self
                    .generation
                    .update_case(
                        Some(session_id),
                        change_request,
                        &context,
                        original,
                        &impacted.required_changes,
                    )
                    .await?;
                case.id = original.id.clone();
                self.store.save(&case.id, &case)?;
                Ok::<TestCase, CopilotError>(case)
            }
            .await;

            match result {
                Ok(case) => updated.push(UpdatedCase {
                    original_file: format!("{}.json", case.id),
                    case,
                    impact_level: impacted.impact_level,
                    reasoning: impacted.reasoning.clone(),
                }),
                Err(err) => self.warn(
                    session_id,
                    summary,
                    &format!("failed to update {}: {err}", impacted.test_case_id),
                ),
            }
        }
        summary.total_updated = updated.len();

        // creating: same per-item fault isolation.
        for spec in &analysis.new_cases_needed {
            let priority = if spec.priority.is_empty() {
                "P3-Medium"
            } else {
                &spec.priority
            };
            let result = async {
                let mut case = self
                    .generation
                    .generate_new_case(
                        Some(session_id),
                        change_request,
                        &context,
                        spec.case_type,
                        &spec.title,
                        priority,
                        &relevant_cases,
                    )
                    .await?;
                case.id = self.store.create(&case)?;
                Ok::<TestCase, CopilotError>(case)
            }
            .await;

            match result {
                Ok(case) => created.push(CreatedCase {
                    case,
                    case_type: spec.case_type,
                    generated_for: spec.title.clone(),
                }),
                Err(err) => self.warn(
                    session_id,
                    summary,
                    &format!("failed to generate new case '{}': {err}", spec.title),
                ),
            }
        }
        summary.total_created = created.len();

        *analysis_out = Some(analysis);
        Ok(())
    }

    fn warn(&self, session_id: &str, summary: &mut RunSummary, message: &str) {
        eprintln!("  Warning: {message}");
        summary.errors.push(message.to_string());
        self.sink.log_warning(session_id, message);
    }

    /// Validate every stored document against the schema.
    pub fn validate_store(&self) -> Result<StoreValidation> {
        self.store.validate_all()
    }

    pub fn list_cases(&self) -> Result<Vec<TestCase>> {
        self.store.load_all()
    }

    pub fn show_case(&self, id: &str) -> Result<TestCase> {
        self.store.load(id)
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.sink.summary()
    }

    pub fn recent_sessions(&self, limit: usize) -> Vec<SessionRecord> {
        self.sink.recent(limit)
    }
}

/// Readiness check for the `status` command. Works without a loadable
/// schema or store so it can diagnose an unconfigured project.
pub fn system_status(config: &Config) -> SystemStatus {
    let test_case_count = std::fs::read_dir(config.cases_dir())
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                .count()
        })
        .unwrap_or(0);
    let context_exists = config.context_file().exists();
    let schema_exists = config.schema_file().exists();
    let api_key_configured = config.api_key.is_some();
    SystemStatus {
        ready: api_key_configured && context_exists && schema_exists,
        api_key_configured,
        test_case_count,
        context_exists,
        schema_exists,
        reports_dir: config.reports_path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatCompletion, CompletionOptions};
    use crate::schema::{CaseKind, Priority, Step};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Backend that pops scripted responses; repeats the last one when the
    /// script runs out.
    struct QueueBackend {
        responses: Mutex<VecDeque<String>>,
        last: Mutex<String>,
    }

    impl QueueBackend {
        fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                last: Mutex::new(String::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatBackend for QueueBackend {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> anyhow::Result<ChatCompletion> {
            let mut queue = self.responses.lock().unwrap();
            let content = match queue.pop_front() {
                Some(next) => {
                    *self.last.lock().unwrap() = next.clone();
                    next
                }
                None => self.last.lock().unwrap().clone(),
            };
            Ok(ChatCompletion {
                content,
                usage: None,
            })
        }
    }

    fn project(tmp: &TempDir) -> Config {
        let root = tmp.path();
        std::fs::write(root.join("OVERVIEW.md"), "Marketplace for hourly shift work.").unwrap();
        std::fs::create_dir_all(root.join("schema")).unwrap();
        std::fs::write(
            root.join("schema/test_case.schema.json"),
            serde_json::to_string_pretty(&crate::schema::test_schema()).unwrap(),
        )
        .unwrap();
        std::fs::create_dir_all(root.join("test_cases")).unwrap();
        std::fs::create_dir_all(root.join("reports")).unwrap();
        let prompts = root.join("prompts");
        std::fs::create_dir_all(&prompts).unwrap();
        for name in ["analyze_change_request", "generate_test_case", "update_test_case"] {
            std::fs::write(prompts.join(format!("{name}.txt")), "{change_request}").unwrap();
        }
        let mut config = Config::load(root).unwrap();
        config.max_retries = 1;
        config
    }

    fn seed_case(root: &Path, id: &str, title: &str) {
        let case = TestCase {
            id: id.to_string(),
            title: title.to_string(),
            kind: CaseKind::Functional,
            priority: Priority::P2High,
            preconditions: None,
            steps: vec![Step {
                action: "Open the application".to_string(),
                expected_outcome: "Application loads".to_string(),
            }],
        };
        std::fs::write(
            root.join("test_cases").join(format!("{id}.json")),
            serde_json::to_string_pretty(&case).unwrap(),
        )
        .unwrap();
    }

    fn case_json(title: &str) -> String {
        format!(
            r#"{{"title": "{title}", "kind": "functional", "priority": "P2-High",
                "steps": [{{"action": "Perform the updated flow", "expected_outcome": "Flow succeeds"}}]}}"#
        )
    }

    fn analysis_json(impacted_ids: &[&str], new_titles: &[&str]) -> String {
        let impacted: Vec<String> = impacted_ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{"test_case_id": "{id}", "impact_level": "high",
                        "required_changes": ["Adjust step one"], "reasoning": "covers changed flow"}}"#
                )
            })
            .collect();
        let new_cases: Vec<String> = new_titles
            .iter()
            .map(|t| format!(r#"{{"case_type": "positive", "title": "{t}", "priority": "P2-High"}}"#))
            .collect();
        format!(
            r#"{{"impacted": [{}], "new_cases_needed": [{}], "summary": "planned"}}"#,
            impacted.join(","),
            new_cases.join(",")
        )
    }

    async fn run(
        config: Config,
        responses: Vec<String>,
        change_request: &str,
    ) -> (Result<PathBuf>, Copilot) {
        let root = config.root.clone();
        std::fs::write(root.join("change.md"), change_request).unwrap();
        let backend = Arc::new(QueueBackend::new(responses));
        let mut copilot = Copilot::with_backend(config, backend).unwrap();
        let result = copilot.process_change_request(&root.join("change.md")).await;
        (result, copilot)
    }

    #[tokio::test]
    async fn full_run_updates_and_creates_cases() {
        let tmp = TempDir::new().unwrap();
        let config = project(&tmp);
        seed_case(tmp.path(), "tc_001", "Worker clocks in for a shift");

        let responses = vec![
            analysis_json(&["tc_001"], &["Worker sees new confirmation dialog"]),
            case_json("Worker clocks in with confirmation"),
            case_json("Worker sees new confirmation dialog"),
        ];
        let (result, copilot) = run(config, responses, "Add a confirmation dialog").await;

        let report_path = result.unwrap();
        assert!(report_path.exists());

        // Update landed under the original id, backup exists.
        let updated = copilot.show_case("tc_001").unwrap();
        assert_eq!(updated.title, "Worker clocks in with confirmation");
        assert!(tmp
            .path()
            .join("test_cases/backups/tc_001_backup.json")
            .exists());

        // New case got the next monotonic id.
        let created = copilot.show_case("tc_002").unwrap();
        assert_eq!(created.title, "Worker sees new confirmation dialog");

        let session = &copilot.recent_sessions(1)[0];
        assert_eq!(session.status, SessionStatus::Success);
        assert_eq!(session.test_cases_updated, 1);
        assert_eq!(session.test_cases_generated, 1);
    }

    #[tokio::test]
    async fn impacted_id_outside_store_is_warned_and_skipped() {
        let tmp = TempDir::new().unwrap();
        let config = project(&tmp);
        seed_case(tmp.path(), "tc_001", "Worker clocks in for a shift");

        let responses = vec![
            analysis_json(&["tc_404"], &[]),
        ];
        let (result, copilot) = run(config, responses, "Tweak something obscure").await;

        let report_path = result.unwrap();
        let body = std::fs::read_to_string(report_path).unwrap();
        assert!(body.contains("tc_404"));

        let session = &copilot.recent_sessions(1)[0];
        assert_eq!(session.status, SessionStatus::Success);
        assert!(session.errors.iter().any(|e| e.contains("tc_404")));
    }

    #[tokio::test]
    async fn one_permanently_invalid_update_does_not_abort_the_run() {
        let tmp = TempDir::new().unwrap();
        let config = project(&tmp);
        seed_case(tmp.path(), "tc_001", "First existing test case");
        seed_case(tmp.path(), "tc_002", "Second existing test case");
        seed_case(tmp.path(), "tc_003", "Third existing test case");

        // max_retries = 1, so the tc_002 update burns 2 attempts of bad
        // output before failing; tc_001 and tc_003 succeed.
        let bad = r#"{"title": "Broken result case", "kind": "nope",
            "priority": "P2-High", "steps": [
            {"action": "Perform the updated flow", "expected_outcome": "ok!"}]}"#;
        let responses = vec![
            analysis_json(&["tc_001", "tc_002", "tc_003"], &[]),
            case_json("First case updated fine"),
            bad.to_string(),
            bad.to_string(),
            case_json("Third case updated fine"),
        ];
        let (result, copilot) = run(config, responses, "Cross-cutting flow change").await;

        let report_path = result.unwrap();
        assert!(report_path.exists());
        assert_eq!(copilot.show_case("tc_001").unwrap().title, "First case updated fine");
        assert_eq!(copilot.show_case("tc_002").unwrap().title, "Second existing test case");
        assert_eq!(copilot.show_case("tc_003").unwrap().title, "Third case updated fine");

        let session = &copilot.recent_sessions(1)[0];
        assert_eq!(session.status, SessionStatus::Success);
        assert_eq!(session.test_cases_updated, 2);
        assert!(session.errors.iter().any(|e| e.contains("tc_002")));
    }

    #[tokio::test]
    async fn analysis_failure_still_emits_report_and_fails_session() {
        let tmp = TempDir::new().unwrap();
        let mut config = project(&tmp);
        // Unresolvable context file makes the analyzing phase fail.
        config.context_path = PathBuf::from("MISSING_OVERVIEW.md");
        seed_case(tmp.path(), "tc_001", "Worker clocks in for a shift");

        let (result, copilot) = run(config, vec![], "Any change at all").await;

        let err = result.unwrap_err();
        let CopilotError::RunFailed { report, .. } = err else {
            panic!("expected RunFailed, got {err}");
        };
        assert!(report.exists());
        let body = std::fs::read_to_string(&report).unwrap();
        assert!(body.contains("**Status:** error"));

        let session = &copilot.recent_sessions(1)[0];
        assert_eq!(session.status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn report_write_failure_still_closes_the_session() {
        let tmp = TempDir::new().unwrap();
        let mut config = project(&tmp);
        // Missing context makes the analyzing phase fail, and a regular
        // file shadowing the reports directory makes the report write
        // fail too.
        config.context_path = PathBuf::from("MISSING_OVERVIEW.md");
        seed_case(tmp.path(), "tc_001", "Worker clocks in for a shift");
        std::fs::remove_dir_all(tmp.path().join("reports")).unwrap();
        std::fs::write(tmp.path().join("reports"), "not a directory").unwrap();

        let (result, copilot) = run(config, vec![], "Any change at all").await;

        let err = result.unwrap_err();
        assert!(
            !matches!(err, CopilotError::RunFailed { .. }),
            "no report was written, so no report path may be surfaced: {err}"
        );

        let session = &copilot.recent_sessions(1)[0];
        assert_eq!(session.status, SessionStatus::Error);
        assert!(session.end_time.is_some());
        assert!(session.errors.iter().any(|e| e.contains("error report")));
    }

    #[tokio::test]
    async fn report_write_failure_after_success_closes_session_as_error() {
        let tmp = TempDir::new().unwrap();
        let config = project(&tmp);
        seed_case(tmp.path(), "tc_001", "Worker clocks in for a shift");
        std::fs::remove_dir_all(tmp.path().join("reports")).unwrap();
        std::fs::write(tmp.path().join("reports"), "not a directory").unwrap();

        let responses = vec![analysis_json(&[], &[])];
        let (result, copilot) = run(config, responses, "Tiny change").await;

        assert!(result.is_err());
        let session = &copilot.recent_sessions(1)[0];
        assert_eq!(session.status, SessionStatus::Error);
        assert!(session.end_time.is_some());
    }

    #[tokio::test]
    async fn missing_change_request_fails_before_session_work() {
        let tmp = TempDir::new().unwrap();
        let config = project(&tmp);
        let backend = Arc::new(QueueBackend::new(vec![]));
        let mut copilot = Copilot::with_backend(config, backend).unwrap();

        let err = copilot
            .process_change_request(Path::new("/definitely/not/here.md"))
            .await
            .unwrap_err();
        assert!(matches!(err, CopilotError::Input(_)));
        assert!(copilot.recent_sessions(10).is_empty());
    }

    #[tokio::test]
    async fn persistent_analysis_garbage_is_generation_failure_with_report() {
        let tmp = TempDir::new().unwrap();
        let config = project(&tmp);
        seed_case(tmp.path(), "tc_001", "Worker clocks in for a shift");

        let responses = vec!["complete nonsense".to_string()];
        let (result, _) = run(config, responses, "Another change").await;

        let err = result.unwrap_err();
        let CopilotError::RunFailed { detail, report } = err else {
            panic!("expected RunFailed");
        };
        assert!(detail.contains("generation failed"), "{detail}");
        assert!(report.exists());
    }
}
