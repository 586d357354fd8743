use serde::{Deserialize, Serialize};

/// A single execution request, as received from the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Opaque identifier, echoed verbatim in every result message.
    pub id: String,
    /// Tag into the language registry.
    pub language: String,
    /// Solution source. Never interpreted or modified by the agent.
    pub code: String,
    /// Opaque value: serialised once into the harness template, otherwise
    /// passed through untouched.
    pub test_cases: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
    Error,
}

/// Per-case record emitted by the harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    /// 1-based case index.
    pub id: u32,
    pub status: CaseStatus,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub expected: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<serde_json::Value>,
    /// Case wall time in milliseconds.
    #[serde(default)]
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Harness-defined error object (`type`/`message`/`trace` or `stack`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

/// The harness's `final_result` payload. Its `cases` array is the
/// authoritative per-case record for the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    /// Suite wall time in milliseconds.
    pub execution_time: f64,
    #[serde(default)]
    pub cases: Vec<CaseResult>,
}

/// One line of harness output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResultEvent {
    /// Streamed as each case completes; observed but not accumulated.
    TestResult(CaseResult),
    /// Exactly one, after the last case.
    FinalResult(Summary),
}

/// What the executor hands back to the agent on success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub success: bool,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub execution_time: f64,
    pub cases: Vec<CaseResult>,
}

impl From<Summary> for JobOutcome {
    fn from(summary: Summary) -> JobOutcome {
        JobOutcome {
            success: summary.failed == 0,
            total: summary.total,
            passed: summary.passed,
            failed: summary.failed,
            execution_time: summary.execution_time,
            cases: summary.cases,
        }
    }
}
