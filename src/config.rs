//! Configuration for a copilot project directory.
//!
//! Settings come from an optional `copilot.toml` in the project root,
//! with the API key taken from the `OPENROUTER_API_KEY` environment
//! variable (never stored in the file) and `COPILOT_MODEL` overriding the
//! configured model tier. `validate()` fails fast before any session work
//! when a required external is missing.

use crate::error::{CopilotError, Result};
use crate::llm::ModelTier;
use crate::retrieve::RetrieverBackend;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "copilot.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Project overview document given to the model as product context.
    pub context_path: PathBuf,
    pub test_cases_dir: PathBuf,
    pub schema_path: PathBuf,
    pub reports_dir: PathBuf,
    pub prompts_dir: PathBuf,
    /// Model tier name: "speed", "balanced", or "smart".
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// How many relevant cases retrieval hands to the analysis prompt.
    pub top_k: usize,
    pub max_retries: u32,
    /// Retrieval backend: "tfidf" or "hashed".
    pub retriever: String,

    #[serde(skip)]
    pub root: PathBuf,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            context_path: PathBuf::from("OVERVIEW.md"),
            test_cases_dir: PathBuf::from("test_cases"),
            schema_path: PathBuf::from("schema/test_case.schema.json"),
            reports_dir: PathBuf::from("reports"),
            prompts_dir: PathBuf::from("prompts"),
            model: "smart".to_string(),
            max_tokens: 4000,
            temperature: 0.1,
            top_k: 5,
            max_retries: 3,
            retriever: "tfidf".to_string(),
            root: PathBuf::from("."),
            api_key: None,
        }
    }
}

impl Config {
    /// Load config for a project root: `copilot.toml` if present,
    /// defaults otherwise, API key from the environment.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let mut config: Config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str(&raw).map_err(|e| {
                CopilotError::Configuration(format!("invalid {}: {e}", path.display()))
            })?
        } else {
            Self::default()
        };
        config.root = root.to_path_buf();
        config.api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        // Environment beats the file for quick model switches.
        if let Ok(model) = std::env::var("COPILOT_MODEL") {
            if !model.is_empty() {
                config.model = model;
            }
        }
        Ok(config)
    }

    /// Fail fast when a required external is missing. Creates the reports
    /// directory as a side effect.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(CopilotError::Configuration(
                "OPENROUTER_API_KEY environment variable is required".to_string(),
            ));
        }
        if !self.context_file().exists() {
            return Err(CopilotError::Configuration(format!(
                "context overview not found at {}",
                self.context_file().display()
            )));
        }
        if !self.schema_file().exists() {
            return Err(CopilotError::Configuration(format!(
                "schema file not found at {}",
                self.schema_file().display()
            )));
        }
        if !self.cases_dir().is_dir() {
            return Err(CopilotError::Configuration(format!(
                "test cases directory not found at {}",
                self.cases_dir().display()
            )));
        }
        std::fs::create_dir_all(self.reports_path())?;
        Ok(())
    }

    pub fn model_tier(&self) -> Result<ModelTier> {
        ModelTier::parse(&self.model).ok_or_else(|| {
            CopilotError::Configuration(format!(
                "unknown model tier '{}' (expected speed, balanced, or smart)",
                self.model
            ))
        })
    }

    pub fn retriever_backend(&self) -> Result<RetrieverBackend> {
        RetrieverBackend::parse(&self.retriever).ok_or_else(|| {
            CopilotError::Configuration(format!(
                "unknown retriever '{}' (expected tfidf or hashed)",
                self.retriever
            ))
        })
    }

    pub fn context_file(&self) -> PathBuf {
        self.root.join(&self.context_path)
    }

    pub fn cases_dir(&self) -> PathBuf {
        self.root.join(&self.test_cases_dir)
    }

    pub fn schema_file(&self) -> PathBuf {
        self.root.join(&self.schema_path)
    }

    pub fn reports_path(&self) -> PathBuf {
        self.root.join(&self.reports_dir)
    }

    pub fn prompts_path(&self) -> PathBuf {
        self.root.join(&self.prompts_dir)
    }

    pub fn metrics_file(&self) -> PathBuf {
        self.reports_path().join("metrics.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_no_config_file() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(tmp.path()).unwrap();
        assert_eq!(config.top_k, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retriever, "tfidf");
        assert_eq!(config.root, tmp.path());
    }

    #[test]
    fn config_file_overrides_defaults() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "top_k = 8\nretriever = \"hashed\"\nmodel = \"speed\"\n",
        )
        .unwrap();

        let config = Config::load(tmp.path()).unwrap();
        assert_eq!(config.top_k, 8);
        assert_eq!(
            config.retriever_backend().unwrap(),
            RetrieverBackend::Hashed
        );
        assert_eq!(config.model_tier().unwrap(), ModelTier::Speed);
        // Untouched fields keep their defaults.
        assert_eq!(config.max_tokens, 4000);
    }

    #[test]
    fn unknown_config_key_is_rejected() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "typo_key = 1\n").unwrap();
        let err = Config::load(tmp.path()).unwrap_err();
        assert!(matches!(err, CopilotError::Configuration(_)));
    }

    #[test]
    fn validate_requires_externals() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::load(tmp.path()).unwrap();
        config.api_key = Some("sk-test".to_string());

        // Nothing exists yet.
        assert!(matches!(
            config.validate(),
            Err(CopilotError::Configuration(_))
        ));

        std::fs::write(tmp.path().join("OVERVIEW.md"), "product context").unwrap();
        std::fs::create_dir_all(tmp.path().join("schema")).unwrap();
        std::fs::write(tmp.path().join("schema/test_case.schema.json"), "{}").unwrap();
        std::fs::create_dir_all(tmp.path().join("test_cases")).unwrap();

        config.validate().unwrap();
        assert!(tmp.path().join("reports").is_dir());
    }
}
