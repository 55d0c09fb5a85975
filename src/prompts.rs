//! Externally editable prompt templates.
//!
//! Templates live as plain text files under the configured prompts
//! directory and use `{name}` substitution placeholders. Only the
//! placeholders passed by the caller are substituted, so literal braces in
//! JSON examples survive untouched. A missing template is a hard
//! `TemplateNotFound` error with no inline fallback, so an operator
//! editing prompts can never silently run stale built-ins.

use crate::error::{CopilotError, Result};
use std::path::{Path, PathBuf};

pub const ANALYZE_TEMPLATE: &str = "analyze_change_request";
pub const GENERATE_TEMPLATE: &str = "generate_test_case";
pub const UPDATE_TEMPLATE: &str = "update_test_case";

#[derive(Debug, Clone)]
pub struct PromptLibrary {
    dir: PathBuf,
}

impl PromptLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load a template by name and substitute the given placeholders.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String> {
        let path = self.dir.join(format!("{name}.txt"));
        let template = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CopilotError::TemplateNotFound(path));
            }
            Err(e) => return Err(e.into()),
        };

        let mut rendered = template;
        for (key, value) in vars {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }
        Ok(rendered)
    }

    /// Template names available on disk, sorted.
    pub fn available(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let file = entry.file_name().to_string_lossy().into_owned();
                if let Some(name) = file.strip_suffix(".txt") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        names
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
