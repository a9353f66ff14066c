/// Test Evaluator - Classification, Comparison and Scoring
///
/// **Core Responsibility:**
/// Turn raw sandbox outputs into `ExecutionResult`s, compare produced values
/// against expectations and aggregate per-test outcomes.
///
/// **Critical Properties:**
/// - Knows nothing about Docker
/// - Knows nothing about Redis
/// - Pure functions: (raw outputs, test definitions) → results
///
/// **Comparison Rules:**
/// - Numbers compare by value: `8 == 8.0`, relative tolerance 1e-9
/// - Object key order is irrelevant
/// - Arrays compare element-wise, lengths must match
/// - Strings compare exactly; stdout-derived strings are trimmed and
///   `\r\n` is folded to `\n` first
/// - Case sensitivity: YES
///
/// **Scoring Rules:**
/// - score = round(100 * passed weight / total weight)
/// - all-zero weights fall back to the passed/total count ratio
/// - zero test cases: score 0 and never successful

use crate::engine::{Limits, SandboxOutput};
use crate::runner::{self, Reported};
use chrono::Utc;
use gradebox_common::types::{
    ExecutionResult, ExerciseValidationResult, RunStatus, TestCase, TestCaseResult,
};
use serde_json::Value;
use uuid::Uuid;

const HIDDEN: &str = "[Hidden]";
const FLOAT_TOLERANCE: f64 = 1e-9;

/// Normalize program text for comparison
///
/// **Normalization Rules:**
/// - `\r\n` becomes `\n`
/// - Trim leading and trailing whitespace
///
/// **Preserves:**
/// - Internal whitespace
/// - Case sensitivity
/// - Empty lines within content
pub fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim().to_string()
}

fn numbers_match(expected: &serde_json::Number, actual: &serde_json::Number) -> bool {
    if let (Some(a), Some(b)) = (expected.as_i64(), actual.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (expected.as_u64(), actual.as_u64()) {
        return a == b;
    }
    match (expected.as_f64(), actual.as_f64()) {
        (Some(a), Some(b)) => {
            let scale = a.abs().max(b.abs()).max(1.0);
            (a - b).abs() <= FLOAT_TOLERANCE * scale
        }
        _ => false,
    }
}

/// Structural equality after representation normalization
pub fn values_match(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => numbers_match(a, b),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_match(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).map_or(false, |y| values_match(x, y)))
        }
        _ => false,
    }
}

/// Derive `actual` from printed output, guided by the shape of `expected`.
///
/// String expectations take the normalized text as-is. Anything else is
/// parsed as JSON, accepting Python's `True`/`False`/`None` spellings.
/// Unparseable text stays a string (and will simply not match).
pub fn actual_from_stdout(stdout: &str, expected: &Value) -> Value {
    let text = normalize_output(stdout);
    if expected.is_string() {
        return Value::String(text);
    }
    if let Ok(value) = serde_json::from_str::<Value>(&text) {
        return value;
    }
    match text.as_str() {
        "True" => Value::Bool(true),
        "False" => Value::Bool(false),
        "None" => Value::Null,
        _ => Value::String(text),
    }
}

fn last_line(text: &str) -> &str {
    text.trim_end().lines().last().unwrap_or("")
}

/// Classify one raw run into the caller-facing result.
///
/// Precedence: timeout, memory exhaustion, runtime fault, success.
pub fn summarize_run(execution_id: Uuid, output: &SandboxOutput, limits: &Limits) -> ExecutionResult {
    let stderr = output.stderr.trim_end();
    let memory_error = last_line(stderr).starts_with("MemoryError");

    let (status, error) = if output.timed_out {
        let secs = limits.timeout.as_secs_f64();
        (
            RunStatus::TimeoutExceeded,
            Some(format!(
                "Execution timed out after {} s (limit: {} s)",
                secs, secs
            )),
        )
    } else if output.oom_killed || memory_error {
        let mut message = format!(
            "Memory limit exceeded (limit: {} MB)",
            limits.memory_limit_mb
        );
        if !stderr.is_empty() {
            message.push('\n');
            message.push_str(stderr);
        }
        (RunStatus::ResourceExceeded, Some(message))
    } else if output.exit_code != Some(0) {
        let message = if !stderr.is_empty() {
            stderr.to_string()
        } else {
            match output.exit_code {
                Some(code) => format!("Process exited with status {}", code),
                None => "Process terminated without an exit status".to_string(),
            }
        };
        (RunStatus::RuntimeFault, Some(message))
    } else {
        (RunStatus::Completed, None)
    };

    // Timeouts report the ceiling itself, not a measurement
    let execution_time = if output.timed_out {
        limits.timeout.as_secs_f64()
    } else {
        output.elapsed.as_secs_f64()
    };

    ExecutionResult {
        execution_id,
        success: status == RunStatus::Completed,
        status,
        output: output.stdout.clone(),
        error,
        execution_time,
        memory_usage: output.peak_memory_bytes,
        exit_code: output.exit_code,
    }
}

/// Evaluate a single test case run
///
/// This function determines the outcome based on:
/// 1. Fault during the run (runtime error, timeout, memory) → failed with error
/// 2. Missing or undecodable reported value → failed with error
/// 3. Value comparison → passed/failed with no error
pub fn evaluate_test(test_case: &TestCase, run: &ExecutionResult, marker: &str) -> TestCaseResult {
    let (program_output, reported) = runner::split_result(&run.output, marker);

    let (passed, actual, error) = if !run.success {
        let fault = run
            .error
            .clone()
            .unwrap_or_else(|| run.status.to_string());
        (false, None, Some(fault))
    } else if test_case.expression.is_some() {
        match reported {
            Reported::Value(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(value) => (values_match(&test_case.expected, &value), Some(value), None),
                Err(e) => (
                    false,
                    None,
                    Some(format!("Could not decode the produced value: {}", e)),
                ),
            },
            Reported::Ambiguous => (
                false,
                None,
                Some("More than one result was reported for this test".to_string()),
            ),
            Reported::Nothing => (
                false,
                None,
                Some("Program finished without producing a result for this test".to_string()),
            ),
        }
    } else {
        let value = actual_from_stdout(program_output, &test_case.expected);
        (values_match(&test_case.expected, &value), Some(value), None)
    };

    let (expected, actual) = if test_case.hidden {
        (
            Value::String(HIDDEN.to_string()),
            actual.map(|_| Value::String(HIDDEN.to_string())),
        )
    } else {
        (test_case.expected.clone(), actual)
    };

    TestCaseResult {
        name: test_case.name.clone(),
        passed,
        expected,
        actual,
        error,
        execution_time: run.execution_time,
        hidden: test_case.hidden,
    }
}

/// Weighted percentage score
pub fn score(test_cases: &[TestCase], results: &[TestCaseResult]) -> u32 {
    let total = test_cases.len();
    if total == 0 {
        return 0;
    }

    let total_weight: u64 = test_cases.iter().map(|tc| u64::from(tc.weight)).sum();
    let (earned, possible) = if total_weight == 0 {
        let passed = results.iter().filter(|r| r.passed).count() as u64;
        (passed, total as u64)
    } else {
        let earned: u64 = test_cases
            .iter()
            .zip(results)
            .filter(|(_, r)| r.passed)
            .map(|(tc, _)| u64::from(tc.weight))
            .sum();
        (earned, total_weight)
    };

    ((earned as f64 / possible as f64) * 100.0).round() as u32
}

/// Deterministic summary derived from the pass ratio
pub fn feedback(passed: usize, total: usize) -> String {
    if total == 0 {
        "No tests configured for this exercise.".to_string()
    } else if passed == total {
        format!("All {} tests passed. Great job!", total)
    } else {
        format!("{} of {} tests passed; {} remaining.", passed, total, total - passed)
    }
}

/// Aggregate per-test results into the exercise outcome
///
/// `results` must be in the same order as `test_cases`.
pub fn aggregate_results(
    exercise_id: &str,
    test_cases: &[TestCase],
    results: Vec<TestCaseResult>,
) -> ExerciseValidationResult {
    let total_tests = results.len();
    let passed_tests = results.iter().filter(|r| r.passed).count();
    let total_execution_time = results.iter().map(|r| r.execution_time).sum();

    ExerciseValidationResult {
        exercise_id: exercise_id.to_string(),
        success: total_tests > 0 && passed_tests == total_tests,
        passed_tests,
        failed_tests: total_tests - passed_tests,
        total_tests,
        score: score(test_cases, &results),
        feedback: feedback(passed_tests, total_tests),
        total_execution_time,
        test_results: results,
        evaluated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    const MARKER: &str = "__m__:";

    /// Helper to create a test case
    fn make_test_case(name: &str, expression: Option<&str>, expected: Value) -> TestCase {
        TestCase {
            name: name.to_string(),
            input: None,
            expression: expression.map(String::from),
            expected,
            hidden: false,
            weight: 1,
        }
    }

    /// Helper to create a successful run
    fn make_run(stdout: &str) -> ExecutionResult {
        ExecutionResult {
            execution_id: Uuid::new_v4(),
            success: true,
            status: RunStatus::Completed,
            output: stdout.to_string(),
            error: None,
            execution_time: 0.05,
            memory_usage: None,
            exit_code: Some(0),
        }
    }

    fn make_output(stdout: &str, stderr: &str, exit_code: Option<i64>) -> SandboxOutput {
        SandboxOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
            elapsed: Duration::from_millis(40),
            ..Default::default()
        }
    }

    fn limits() -> Limits {
        Limits {
            timeout: Duration::from_secs(2),
            memory_limit_mb: 128,
            max_output_bytes: 1024,
        }
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("hello"), "hello");
        assert_eq!(normalize_output("  hello  "), "hello");
        assert_eq!(normalize_output("hello\n"), "hello");
        assert_eq!(normalize_output("line1\r\nline2\r\n"), "line1\nline2");
        assert_eq!(normalize_output("   "), "");
    }

    #[test]
    fn test_numeric_width_is_ignored() {
        assert!(values_match(&json!(8), &json!(8.0)));
        assert!(values_match(&json!(0.1 + 0.2), &json!(0.3)));
        assert!(!values_match(&json!(8), &json!(9)));
        assert!(!values_match(&json!(8), &json!("8")));
    }

    #[test]
    fn test_key_order_is_ignored() {
        let expected: Value = serde_json::from_str(r#"{"a": 1, "b": [1, 2]}"#).unwrap();
        let actual: Value = serde_json::from_str(r#"{"b": [1.0, 2], "a": 1}"#).unwrap();
        assert!(values_match(&expected, &actual));

        let extra = json!({"a": 1, "b": [1, 2], "c": 3});
        assert!(!values_match(&expected, &extra));
    }

    #[test]
    fn test_arrays_compare_in_order() {
        assert!(values_match(&json!([1, 2, 3]), &json!([1, 2, 3])));
        assert!(!values_match(&json!([1, 2, 3]), &json!([3, 2, 1])));
        assert!(!values_match(&json!([1, 2]), &json!([1, 2, 3])));
    }

    #[test]
    fn test_actual_from_stdout() {
        assert_eq!(actual_from_stdout("Hello, World!\n", &json!("Hello, World!")), json!("Hello, World!"));
        assert_eq!(actual_from_stdout("8\n", &json!(8)), json!(8));
        assert_eq!(actual_from_stdout("[1, 2]\n", &json!([1, 2])), json!([1, 2]));
        assert_eq!(actual_from_stdout("True\n", &json!(true)), json!(true));
        assert_eq!(actual_from_stdout("None\n", &Value::Null), Value::Null);
        assert_eq!(actual_from_stdout("{'a': 1}\n", &json!({"a": 1})), json!("{'a': 1}"));
    }

    #[test]
    fn test_summarize_success() {
        let result = summarize_run(Uuid::new_v4(), &make_output("Hello, World!\n", "", Some(0)), &limits());
        assert!(result.success);
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.output, "Hello, World!\n");
        assert!(result.error.is_none());
        assert!((result.execution_time - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_timeout_reports_ceiling() {
        let output = SandboxOutput {
            timed_out: true,
            elapsed: Duration::from_millis(2150),
            ..Default::default()
        };
        let result = summarize_run(Uuid::new_v4(), &output, &limits());
        assert!(!result.success);
        assert_eq!(result.status, RunStatus::TimeoutExceeded);
        assert_eq!(result.execution_time, 2.0);
        assert!(result.error.unwrap().contains("limit: 2 s"));
    }

    #[test]
    fn test_summarize_runtime_fault_keeps_partial_output() {
        let output = make_output(
            "before\n",
            "Traceback (most recent call last):\nZeroDivisionError: division by zero\n",
            Some(1),
        );
        let result = summarize_run(Uuid::new_v4(), &output, &limits());
        assert!(!result.success);
        assert_eq!(result.status, RunStatus::RuntimeFault);
        assert_eq!(result.output, "before\n");
        assert!(result.error.unwrap().contains("ZeroDivisionError"));
    }

    #[test]
    fn test_summarize_silent_nonzero_exit() {
        let result = summarize_run(Uuid::new_v4(), &make_output("", "", Some(3)), &limits());
        assert_eq!(result.status, RunStatus::RuntimeFault);
        assert_eq!(result.error.as_deref(), Some("Process exited with status 3"));
    }

    #[test]
    fn test_summarize_oom_is_distinct_from_runtime_fault() {
        let output = SandboxOutput {
            oom_killed: true,
            exit_code: Some(137),
            ..Default::default()
        };
        let result = summarize_run(Uuid::new_v4(), &output, &limits());
        assert_eq!(result.status, RunStatus::ResourceExceeded);
        assert!(result.error.unwrap().starts_with("Memory limit exceeded (limit: 128 MB)"));
    }

    #[test]
    fn test_summarize_python_memory_error() {
        let output = make_output("", "Traceback (most recent call last):\nMemoryError\n", Some(1));
        let result = summarize_run(Uuid::new_v4(), &output, &limits());
        assert_eq!(result.status, RunStatus::ResourceExceeded);
    }

    #[test]
    fn test_evaluate_expression_match() {
        let tc = make_test_case("t1", Some("add(3, 5)"), json!(8));
        let run = make_run(&format!("\n{}8\n", MARKER));

        let result = evaluate_test(&tc, &run, MARKER);

        assert!(result.passed);
        assert_eq!(result.actual, Some(json!(8)));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_evaluate_expression_mismatch_has_no_error() {
        let tc = make_test_case("t1", Some("add(3, 5)"), json!(8));
        let run = make_run(&format!("debug\n\n{}9\n", MARKER));

        let result = evaluate_test(&tc, &run, MARKER);

        assert!(!result.passed);
        assert_eq!(result.expected, json!(8));
        assert_eq!(result.actual, Some(json!(9)));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_evaluate_missing_result() {
        let tc = make_test_case("t1", Some("add(3, 5)"), json!(8));
        let result = evaluate_test(&tc, &make_run(""), MARKER);

        assert!(!result.passed);
        assert!(result.actual.is_none());
        assert!(result.error.unwrap().contains("without producing a result"));
    }

    #[test]
    fn test_evaluate_forged_result_line_fails() {
        // Submission printed a passing value with the marker, then the
        // harness reported the real one
        let tc = make_test_case("t1", Some("add(3, 5)"), json!(8));
        let run = make_run(&format!("\n{m}8\n\n{m}null\n", m = MARKER));

        let result = evaluate_test(&tc, &run, MARKER);

        assert!(!result.passed);
        assert!(result.actual.is_none());
        assert!(result.error.unwrap().contains("More than one result"));
    }

    #[test]
    fn test_evaluate_non_finite_value_is_a_plain_mismatch() {
        // The harness reports float('nan') as its repr string
        let tc = make_test_case("t1", Some("ratio()"), json!(0.5));
        let run = make_run(&format!("\n{}\"nan\"\n", MARKER));

        let result = evaluate_test(&tc, &run, MARKER);

        assert!(!result.passed);
        assert_eq!(result.actual, Some(json!("nan")));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_evaluate_stdout_mode() {
        let tc = make_test_case("greeting", None, json!("Hello, World!"));
        let result = evaluate_test(&tc, &make_run("Hello, World!\r\n"), MARKER);
        assert!(result.passed);
    }

    #[test]
    fn test_evaluate_runtime_fault() {
        let tc = make_test_case("t1", Some("f()"), json!(1));
        let run = ExecutionResult {
            success: false,
            status: RunStatus::RuntimeFault,
            error: Some("NameError: name 'f' is not defined".to_string()),
            exit_code: Some(1),
            ..make_run("")
        };

        let result = evaluate_test(&tc, &run, MARKER);

        assert!(!result.passed);
        assert!(result.actual.is_none());
        assert!(result.error.unwrap().contains("NameError"));
    }

    #[test]
    fn test_hidden_values_are_masked() {
        let mut tc = make_test_case("secret", Some("f()"), json!(42));
        tc.hidden = true;
        let result = evaluate_test(&tc, &make_run(&format!("\n{}41\n", MARKER)), MARKER);

        assert!(!result.passed);
        assert!(result.hidden);
        assert_eq!(result.expected, json!("[Hidden]"));
        assert_eq!(result.actual, Some(json!("[Hidden]")));
    }

    fn passed(name: &str, passed: bool) -> TestCaseResult {
        TestCaseResult {
            name: name.to_string(),
            passed,
            expected: json!(1),
            actual: Some(json!(1)),
            error: None,
            execution_time: 0.1,
            hidden: false,
        }
    }

    #[test]
    fn test_aggregate_all_pass() {
        let cases = vec![make_test_case("t1", None, json!(8))];
        let result = aggregate_results("ex", &cases, vec![passed("t1", true)]);

        assert!(result.success);
        assert_eq!(result.passed_tests, 1);
        assert_eq!(result.total_tests, 1);
        assert_eq!(result.score, 100);
        assert_eq!(result.feedback, "All 1 tests passed. Great job!");
    }

    #[test]
    fn test_aggregate_partial() {
        let cases: Vec<TestCase> = (1..=3)
            .map(|i| make_test_case(&format!("t{}", i), None, json!(i)))
            .collect();
        let result = aggregate_results(
            "ex",
            &cases,
            vec![passed("t1", true), passed("t2", false), passed("t3", true)],
        );

        assert!(!result.success);
        assert_eq!(result.passed_tests, 2);
        assert_eq!(result.failed_tests, 1);
        assert_eq!(result.score, 67);
        assert_eq!(result.feedback, "2 of 3 tests passed; 1 remaining.");
        let names: Vec<&str> = result.test_results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_aggregate_zero_tests_never_succeeds() {
        let result = aggregate_results("ex", &[], vec![]);
        assert!(!result.success);
        assert_eq!(result.score, 0);
        assert_eq!(result.feedback, "No tests configured for this exercise.");
    }

    #[test]
    fn test_weighted_score() {
        let mut heavy = make_test_case("heavy", None, json!(1));
        heavy.weight = 3;
        let light = make_test_case("light", None, json!(1));
        let cases = vec![heavy, light];

        assert_eq!(score(&cases, &[passed("heavy", true), passed("light", false)]), 75);
        assert_eq!(score(&cases, &[passed("heavy", false), passed("light", true)]), 25);
    }

    #[test]
    fn test_zero_weights_fall_back_to_count() {
        let mut a = make_test_case("a", None, json!(1));
        a.weight = 0;
        let mut b = make_test_case("b", None, json!(1));
        b.weight = 0;

        assert_eq!(score(&[a, b], &[passed("a", true), passed("b", false)]), 50);
    }
}
