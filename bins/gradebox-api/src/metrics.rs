// Prometheus metrics exposed on GET /metrics

use gradebox_common::types::{ExecutionResult, ExerciseValidationResult};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gradebox_executions_total",
        "Completed execute calls by run status",
        &["status"]
    )
    .unwrap();
    pub static ref VALIDATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gradebox_validations_total",
        "Completed validations by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref REQUEST_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gradebox_request_errors_total",
        "Rejected or failed requests by error kind",
        &["kind"]
    )
    .unwrap();
    pub static ref EXECUTION_SECONDS: Histogram = register_histogram!(
        "gradebox_execution_seconds",
        "Wall-clock time of a single sandboxed run",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap();
    pub static ref PEAK_MEMORY_BYTES: Histogram = register_histogram!(
        "gradebox_peak_memory_bytes",
        "Peak sandbox memory per run",
        vec![
            1_048_576.0,
            4_194_304.0,
            16_777_216.0,
            33_554_432.0,
            67_108_864.0,
            134_217_728.0,
            268_435_456.0,
            536_870_912.0
        ]
    )
    .unwrap();
    pub static ref SLOTS_IN_USE: IntGauge = register_int_gauge!(
        "gradebox_sandbox_slots_in_use",
        "Execution pool slots currently held"
    )
    .unwrap();
}

pub fn record_execution(result: &ExecutionResult) {
    let status = result.status.to_string();
    EXECUTIONS_TOTAL.with_label_values(&[status.as_str()]).inc();
    EXECUTION_SECONDS.observe(result.execution_time);
    if let Some(bytes) = result.memory_usage {
        PEAK_MEMORY_BYTES.observe(bytes as f64);
    }
}

pub fn record_validation(result: &ExerciseValidationResult) {
    let outcome = if result.total_tests == 0 {
        "no_tests"
    } else if result.success {
        "passed"
    } else {
        "failed"
    };
    VALIDATIONS_TOTAL.with_label_values(&[outcome]).inc();
    for test in &result.test_results {
        EXECUTION_SECONDS.observe(test.execution_time);
    }
}

pub fn record_error(kind: &str) {
    REQUEST_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn set_slots_in_use(in_use: usize) {
    SLOTS_IN_USE.set(in_use as i64);
}

/// Render the default registry in the text exposition format
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_series() {
        record_error("service_busy");
        set_slots_in_use(3);

        let text = render().unwrap();
        assert!(text.contains("gradebox_request_errors_total{kind=\"service_busy\"}"));
        assert!(text.contains("gradebox_sandbox_slots_in_use"));
    }
}
