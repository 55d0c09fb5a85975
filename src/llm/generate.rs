//! Schema-validated generation operations.
//!
//! All three operations (analysis, new case, update) share one execution
//! pattern: render the external prompt template, call the model, parse
//! defensively, and for test case outputs validate against the JSON
//! Schema. Parse, schema, and transport failures share one retry budget
//! per operation but carry distinct reason tags so telemetry and backoff
//! policy can differ per cause. Schema retries re-prompt with corrective
//! instructions enumerating the allowed enum values.

use super::client::{ChatBackend, CompletionOptions};
use super::models::ModelTier;
use super::parse::parse_object;
use crate::error::{CopilotError, Result};
use crate::observability::MetricsSink;
use crate::prompts::{PromptLibrary, ANALYZE_TEMPLATE, GENERATE_TEMPLATE, UPDATE_TEMPLATE};
use crate::schema::{strip_transient_fields, SchemaValidator, TestCase};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why an attempt was retried. Tagged so per-cause telemetry stays
/// separable even though all causes share the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    ParseError,
    SchemaInvalid,
    TransportError,
}

impl RetryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryReason::ParseError => "parse_error",
            RetryReason::SchemaInvalid => "schema_invalid",
            RetryReason::TransportError => "transport_error",
        }
    }
}

/// Qualitative severity of an existing case's need for change. Unknown
/// model output degrades to `Medium` rather than failing the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactLevel {
    High,
    Medium,
    Low,
}

impl ImpactLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactLevel::High => "high",
            ImpactLevel::Medium => "medium",
            ImpactLevel::Low => "low",
        }
    }
}

impl<'de> Deserialize<'de> for ImpactLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_lowercase().as_str() {
            "high" => ImpactLevel::High,
            "low" => ImpactLevel::Low,
            _ => ImpactLevel::Medium,
        })
    }
}

/// Kind of new case the analysis asked for. Unknown model output degrades
/// to `Positive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseType {
    Positive,
    Negative,
    Edge,
}

impl CaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseType::Positive => "positive",
            CaseType::Negative => "negative",
            CaseType::Edge => "edge",
        }
    }
}

impl<'de> Deserialize<'de> for CaseType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_lowercase().as_str() {
            "negative" => CaseType::Negative,
            "edge" => CaseType::Edge,
            _ => CaseType::Positive,
        })
    }
}

/// One impacted existing case from the analysis step.
#[derive(Debug, Clone, Deserialize)]
pub struct ImpactedCase {
    pub test_case_id: String,
    #[serde(default = "default_impact")]
    pub impact_level: ImpactLevel,
    #[serde(default)]
    pub required_changes: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

fn default_impact() -> ImpactLevel {
    ImpactLevel::Medium
}

/// Specification for a new case the analysis wants created.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCaseSpec {
    #[serde(default = "default_case_type")]
    pub case_type: CaseType,
    pub title: String,
    #[serde(default)]
    pub priority: String,
}

fn default_case_type() -> CaseType {
    CaseType::Positive
}

/// Model output of the analysis step. Produced once per run, consumed by
/// the orchestrator, never persisted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImpactAnalysis {
    #[serde(default, alias = "impacted_test_cases")]
    pub impacted: Vec<ImpactedCase>,
    #[serde(default, alias = "new_test_cases_needed")]
    pub new_cases_needed: Vec<NewCaseSpec>,
    #[serde(default)]
    pub summary: String,
}

/// Tunables shared by every operation, sourced from config.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub model: ModelTier,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_retries: u32,
    /// Linear backoff step between attempts.
    pub backoff: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: ModelTier::Smart,
            max_tokens: 4000,
            // Structured extraction, not creative writing.
            temperature: 0.1,
            max_retries: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Corrective instructions appended to the prompt after a schema failure.
const CORRECTIVE_SUFFIX: &str = "\n\nIMPORTANT: Your previous response did not conform to the \
required schema. Return ONLY a JSON object with exactly these fields:\n\
- \"title\": string, 5 to 300 characters\n\
- \"kind\": one of \"functional\", \"integration\", \"ui\", \"api\", \"performance\", \
\"security\", \"regression\"\n\
- \"priority\": one of \"P1-Critical\", \"P2-High\", \"P3-Medium\", \"P4-Low\"\n\
- \"preconditions\": optional string\n\
- \"steps\": non-empty array of objects, each with \"action\" (string, at least 5 characters) \
and \"expected_outcome\" (string, at least 3 characters)\n\
No other fields, no markdown, no explanations.";

pub struct GenerationClient {
    backend: Arc<dyn ChatBackend>,
    prompts: PromptLibrary,
    validator: Arc<SchemaValidator>,
    sink: Arc<MetricsSink>,
    settings: GenerationSettings,
}

impl GenerationClient {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        prompts: PromptLibrary,
        validator: Arc<SchemaValidator>,
        sink: Arc<MetricsSink>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            backend,
            prompts,
            validator,
            sink,
            settings,
        }
    }

    /// Analyze a change request against the retrieved subset of the corpus
    /// and plan updates and new cases.
    pub async fn analyze(
        &self,
        session: Option<&str>,
        change_request: &str,
        context: &str,
        relevant_cases: &[TestCase],
    ) -> Result<ImpactAnalysis> {
        let cases_json = cases_to_pretty_json(relevant_cases);
        let prompt = self.prompts.render(
            ANALYZE_TEMPLATE,
            &[
                ("context", context),
                ("change_request", change_request),
                ("existing_cases", &cases_json),
            ],
        )?;

        let (value, attempts) = self.run(session, prompt, false).await?;
        serde_json::from_value(value).map_err(|e| CopilotError::Generation {
            attempts,
            detail: format!("analysis response had unexpected shape: {e}"),
        })
    }

    /// Generate a brand new test case conforming to the schema.
    pub async fn generate_new_case(
        &self,
        session: Option<&str>,
        change_request: &str,
        context: &str,
        case_type: CaseType,
        title: &str,
        priority: &str,
        existing_cases: &[TestCase],
    ) -> Result<TestCase> {
        let cases_json = cases_to_pretty_json(existing_cases);
        let prompt = self.prompts.render(
            GENERATE_TEMPLATE,
            &[
                ("context", context),
                ("change_request", change_request),
                ("case_type", case_type.as_str()),
                ("title", title),
                ("priority", priority),
                ("existing_cases", &cases_json),
            ],
        )?;

        let (value, _) = self.run(session, prompt, true).await?;
        deserialize_case(value)
    }

    /// Rewrite an existing test case to integrate the required changes.
    pub async fn update_case(
        &self,
        session: Option<&str>,
        change_request: &str,
        context: &str,
        original: &TestCase,
        required_changes: &[String],
    ) -> Result<TestCase> {
        let original_json = serde_json::to_string_pretty(&original.prompt_json())
            .unwrap_or_else(|_| "{}".to_string());
        let changes = required_changes
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = self.prompts.render(
            UPDATE_TEMPLATE,
            &[
                ("context", context),
                ("change_request", change_request),
                ("original_case", &original_json),
                ("required_changes", &changes),
            ],
        )?;

        let (value, _) = self.run(session, prompt, true).await?;
        deserialize_case(value)
    }

    /// Shared execution loop: call, parse, optionally schema-validate,
    /// retry with linear backoff until the budget is spent. Returns the
    /// parsed object together with the number of attempts it took.
    ///
    /// Exactly `max_retries + 1` attempts are made in the worst case, and
    /// exactly `max_retries` retry events are logged (a retry event is
    /// only recorded when another attempt follows).
    async fn run(
        &self,
        session: Option<&str>,
        mut prompt: String,
        validate_schema: bool,
    ) -> Result<(Value, u32)> {
        let options = CompletionOptions {
            model: self.settings.model,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };
        let max_attempts = self.settings.max_retries + 1;
        let mut corrected = false;
        let mut last_failure: Option<(RetryReason, String)> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                if let Some((reason, detail)) = &last_failure {
                    self.sink.log_retry(
                        session,
                        &format!("{} (attempt {attempt}/{max_attempts}): {detail}", reason.as_str()),
                    );
                }
                // Linear backoff between attempts.
                tokio::time::sleep(self.settings.backoff * (attempt - 1)).await;
            }

            let started = Instant::now();
            let outcome = self.backend.complete(&prompt, &options).await;
            let latency = started.elapsed().as_secs_f64();

            let completion = match outcome {
                Ok(completion) => {
                    let tokens = completion
                        .usage
                        .as_ref()
                        .map(|u| u.total_tokens)
                        .unwrap_or(0);
                    let cost = self.settings.model.estimate_cost(tokens);
                    self.sink.log_call(session, tokens, cost, latency);
                    completion
                }
                Err(e) => {
                    self.sink.log_call(session, 0, 0.0, latency);
                    last_failure = Some((RetryReason::TransportError, e.to_string()));
                    continue;
                }
            };

            let mut value = match parse_object(&completion.content) {
                Ok(value) => value,
                Err(detail) => {
                    last_failure = Some((RetryReason::ParseError, detail));
                    continue;
                }
            };

            if validate_schema {
                strip_transient_fields(&mut value);
                if let Err(detail) = self.validator.validate(&value) {
                    self.sink.log_validation_failure(session, &detail);
                    if !corrected {
                        prompt.push_str(CORRECTIVE_SUFFIX);
                        corrected = true;
                    }
                    last_failure = Some((RetryReason::SchemaInvalid, detail));
                    continue;
                }
            }

            return Ok((value, attempt));
        }

        let (reason, detail) = last_failure.unwrap_or((
            RetryReason::TransportError,
            "no attempt recorded".to_string(),
        ));
        Err(match reason {
            RetryReason::SchemaInvalid => CopilotError::SchemaValidation {
                attempts: max_attempts,
                detail,
            },
            _ => CopilotError::Generation {
                attempts: max_attempts,
                detail,
            },
        })
    }
}

fn cases_to_pretty_json(cases: &[TestCase]) -> String {
    let values: Vec<Value> = cases.iter().map(TestCase::prompt_json).collect();
    serde_json::to_string_pretty(&values).unwrap_or_else(|_| "[]".to_string())
}

fn deserialize_case(value: Value) -> Result<TestCase> {
    // The value already passed schema validation; a serde failure here
    // would mean the Rust types drifted from the schema file.
    serde_json::from_value(value).map_err(|e| CopilotError::SchemaValidation {
        attempts: 0,
        detail: format!("schema-valid document no longer matches internal types: {e}"),
    })
}
