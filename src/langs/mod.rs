//! Static per-language execution profiles.
//!
//! The registry maps a language tag to everything the pipeline needs to run
//! a job in that language: image, file layout, compile/run argv, resource
//! limits, and the embedded harness template. It is configuration; the
//! agent never mutates it at runtime.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const TEST_CASES_SLOT: &str = "{{TEST_CASES}}";

const PYTHON_HARNESS: &str = include_str!("harness/harness.py");
const JAVASCRIPT_HARNESS: &str = include_str!("harness/harness.js");
const JAVA_HARNESS: &str = include_str!("harness/TestRunner.java");

/// Execution profile for a single language.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageProfile {
    /// Container image reference.
    pub image: String,
    /// Extension of the solution file inside the workspace.
    pub file_extension: String,
    pub solution_filename: String,
    pub test_filename: String,
    /// Argv of the compile pre-pass. Empty means no compile step.
    #[serde(default)]
    pub compile_argv: Vec<String>,
    /// Argv of the main run, completed with [`LanguageProfile::run_target`].
    pub run_argv: Vec<String>,
    pub memory_limit_mib: i64,
    pub cpu_limit_cores: f64,
    pub timeout_millis: u64,
    /// Harness source with the single `{{TEST_CASES}}` substitution slot.
    /// Opaque to the agent apart from that slot.
    pub harness_template: String,
}

impl LanguageProfile {
    /// The final argument appended to `run_argv`: the compiled artifact for
    /// compiled languages, the harness file itself otherwise.
    pub fn run_target(&self) -> String {
        if self.compile_argv.is_empty() {
            self.test_filename.clone()
        } else {
            let suffix = format!(".{}", self.file_extension);
            self.test_filename
                .strip_suffix(&suffix)
                .unwrap_or(&self.test_filename)
                .to_string()
        }
    }

    /// The full run command, for reporting back to the dispatcher.
    pub fn run_command(&self) -> String {
        let mut argv = self.run_argv.clone();
        argv.push(self.run_target());
        argv.join(" ")
    }
}

/// Read-only language tag → profile mapping.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: HashMap<String, LanguageProfile>,
}

impl LanguageRegistry {
    pub fn get(&self, language: &str) -> Option<&LanguageProfile> {
        self.profiles.get(language)
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Replace the built-in table with one loaded from a JSON file mapping
    /// language tag to profile.
    pub fn from_file(path: &Path) -> anyhow::Result<LanguageRegistry> {
        let raw = std::fs::read(path)?;
        let profiles: HashMap<String, LanguageProfile> = serde_json::from_slice(&raw)?;
        for (tag, profile) in &profiles {
            anyhow::ensure!(
                profile.harness_template.contains(TEST_CASES_SLOT),
                "language {} is missing the {} slot in its harness",
                tag,
                TEST_CASES_SLOT
            );
        }
        Ok(LanguageRegistry { profiles })
    }

    pub fn builtin() -> LanguageRegistry {
        let mut profiles = HashMap::new();
        profiles.insert(
            "python".to_string(),
            LanguageProfile {
                image: "python:3.11-slim".into(),
                file_extension: "py".into(),
                solution_filename: "solution.py".into(),
                test_filename: "test.py".into(),
                compile_argv: vec![],
                run_argv: vec!["python3".into()],
                memory_limit_mib: 256,
                cpu_limit_cores: 0.5,
                timeout_millis: 10_000,
                harness_template: PYTHON_HARNESS.into(),
            },
        );
        profiles.insert(
            "javascript".to_string(),
            LanguageProfile {
                image: "node:20-slim".into(),
                file_extension: "js".into(),
                solution_filename: "solution.js".into(),
                test_filename: "test.js".into(),
                compile_argv: vec![],
                run_argv: vec!["node".into()],
                memory_limit_mib: 256,
                cpu_limit_cores: 0.5,
                timeout_millis: 10_000,
                harness_template: JAVASCRIPT_HARNESS.into(),
            },
        );
        profiles.insert(
            "java".to_string(),
            LanguageProfile {
                image: "eclipse-temurin:17".into(),
                file_extension: "java".into(),
                solution_filename: "Solution.java".into(),
                test_filename: "TestRunner.java".into(),
                compile_argv: vec!["javac".into()],
                run_argv: vec!["java".into()],
                memory_limit_mib: 512,
                cpu_limit_cores: 1.0,
                timeout_millis: 15_000,
                harness_template: JAVA_HARNESS.into(),
            },
        );
        LanguageRegistry { profiles }
    }
}
