use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Runtimes the sandbox knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
}

impl Language {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Language::Python),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
        }
    }
}

fn default_language() -> String {
    Language::Python.to_string()
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Text fed to the program's stdin
    #[serde(default)]
    pub input: Option<String>,
    /// Per-request ceiling, bounded by the service maximum
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// How a single sandboxed run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    RuntimeFault,
    TimeoutExceeded,
    ResourceExceeded,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::RuntimeFault => "runtime_fault",
            RunStatus::TimeoutExceeded => "timeout_exceeded",
            RunStatus::ResourceExceeded => "resource_exceeded",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub success: bool,
    pub status: RunStatus,
    pub output: String,
    pub error: Option<String>,
    /// Wall-clock seconds
    pub execution_time: f64,
    /// Peak memory in bytes, when the sandbox could sample it
    pub memory_usage: Option<u64>,
    pub exit_code: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub exercise_id: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub input: Option<String>,
    /// Expression evaluated in the candidate's module scope. Without one the
    /// program's stdout is graded instead.
    #[serde(default)]
    pub expression: Option<String>,
    pub expected: Value,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub passed: bool,
    pub expected: Value,
    pub actual: Option<Value>,
    pub error: Option<String>,
    pub execution_time: f64,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseValidationResult {
    pub exercise_id: String,
    pub success: bool,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub total_tests: usize,
    pub test_results: Vec<TestCaseResult>,
    pub score: u32,
    pub feedback: String,
    pub total_execution_time: f64,
    pub evaluated_at: DateTime<Utc>,
}

/// Exercise record published by the content service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseDefinition {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub memory_limit_mb: Option<u32>,
    #[serde(default)]
    pub solution_code: Option<String>,
    #[serde(default)]
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionComparison {
    pub exercise_id: String,
    pub matches_reference: bool,
    pub submitted_score: u32,
    pub reference_score: u32,
    pub submitted_passed: usize,
    pub reference_passed: usize,
    pub total_tests: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSetupReport {
    pub exercise_id: String,
    pub has_test_cases: bool,
    pub test_case_count: usize,
    pub has_solution: bool,
    pub solution_valid: bool,
    pub solution_score: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HintView {
    pub index: usize,
    pub text: String,
    pub unlocked: bool,
}
