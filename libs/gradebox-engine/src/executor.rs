/// Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Coordinate request checks, the execution pool, the sandbox and the
/// evaluator to produce final results.
///
/// **Flow for every operation:**
/// 1. Check the request (validation.rs), no slot taken yet
/// 2. Resolve the exercise from the catalog when one is named
/// 3. Take a pool slot, bounded by the queue timeout
/// 4. Run in the sandbox, retrying infrastructure faults once
/// 5. Classify and score (evaluator.rs)
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How values are compared and scored (evaluator's job)

use crate::catalog::ExerciseCatalog;
use crate::engine::{Limits, Sandbox, SandboxJob, SandboxOutput};
use crate::error::ServiceError;
use crate::evaluator;
use crate::hints;
use crate::pool::ExecutionPool;
use crate::runner;
use crate::validation;
use gradebox_common::config::ServiceConfig;
use gradebox_common::types::{
    ExecutionRequest, ExecutionResult, ExerciseDefinition, ExerciseSetupReport,
    ExerciseValidationResult, HintView, Language, SolutionComparison, ValidationRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// One initial attempt plus one retry, for infrastructure faults only
const SANDBOX_ATTEMPTS: u32 = 2;

#[derive(Clone)]
pub struct Executor {
    sandbox: Arc<dyn Sandbox>,
    catalog: Arc<dyn ExerciseCatalog>,
    pool: ExecutionPool,
    config: Arc<ServiceConfig>,
}

impl Executor {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        catalog: Arc<dyn ExerciseCatalog>,
        config: ServiceConfig,
    ) -> Self {
        let pool = ExecutionPool::new(config.max_concurrent, config.queue_timeout);
        Self {
            sandbox,
            catalog,
            pool,
            config: Arc::new(config),
        }
    }

    pub fn pool(&self) -> &ExecutionPool {
        &self.pool
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Run one program once and report what happened
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ServiceError> {
        let plan = validation::check_execution(request, &self.config)?;

        let _permit = self.pool.acquire().await?;

        let job = SandboxJob {
            language: plan.language,
            source: request.code.clone(),
            stdin: request.input.clone(),
            expression: None,
            marker: runner::new_marker(),
            limits: Limits {
                timeout: plan.timeout,
                memory_limit_mb: self.config.memory_limit_mb,
                max_output_bytes: self.config.max_output_bytes,
            },
        };

        let output = self.run_sandboxed(&job).await?;
        let result = evaluator::summarize_run(Uuid::new_v4(), &output, &job.limits);

        info!(
            execution_id = %result.execution_id,
            language = %job.language,
            status = %result.status,
            execution_ms = (result.execution_time * 1000.0) as u64,
            "Execution finished"
        );

        Ok(result)
    }

    /// Grade `code` against every test case of an exercise
    #[tracing::instrument(skip(self, request), fields(exercise_id = %request.exercise_id))]
    pub async fn validate(
        &self,
        request: &ValidationRequest,
    ) -> Result<ExerciseValidationResult, ServiceError> {
        validation::check_validation(request, &self.config)?;
        let exercise = self.resolve(&request.exercise_id).await?;

        let _permit = self.pool.acquire().await?;
        let result = self.grade(&exercise, &request.code).await?;

        info!(
            passed = result.passed_tests,
            total = result.total_tests,
            score = result.score,
            "Validation finished"
        );

        Ok(result)
    }

    /// Grade both the submission and the exercise's reference solution
    #[tracing::instrument(skip(self, code))]
    pub async fn compare_with_solution(
        &self,
        exercise_id: &str,
        code: &str,
    ) -> Result<SolutionComparison, ServiceError> {
        validation::check_exercise_id(exercise_id)?;
        validation::check_code(code, &self.config)?;
        let exercise = self.resolve(exercise_id).await?;

        let solution = exercise
            .solution_code
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ServiceError::NoReferenceSolution(exercise_id.to_string()))?;

        let _permit = self.pool.acquire().await?;
        let submitted = self.grade(&exercise, code).await?;
        let reference = self.grade(&exercise, solution).await?;

        Ok(SolutionComparison {
            exercise_id: exercise.id.clone(),
            matches_reference: submitted.success
                && reference.success
                && submitted.score == reference.score,
            submitted_score: submitted.score,
            reference_score: reference.score,
            submitted_passed: submitted.passed_tests,
            reference_passed: reference.passed_tests,
            total_tests: submitted.total_tests,
        })
    }

    /// Report whether an exercise is usable: tests present, reference
    /// solution present and passing its own tests.
    #[tracing::instrument(skip(self))]
    pub async fn check_exercise(&self, exercise_id: &str) -> Result<ExerciseSetupReport, ServiceError> {
        validation::check_exercise_id(exercise_id)?;
        let exercise = self.resolve(exercise_id).await?;

        let solution = exercise
            .solution_code
            .as_deref()
            .filter(|s| !s.trim().is_empty());
        let has_test_cases = !exercise.test_cases.is_empty();

        let (solution_valid, solution_score) = match solution {
            Some(solution) if has_test_cases => {
                let _permit = self.pool.acquire().await?;
                let result = self.grade(&exercise, solution).await?;
                if !result.success {
                    warn!(score = result.score, "Reference solution fails its own tests");
                }
                (result.success, Some(result.score))
            }
            _ => (false, None),
        };

        Ok(ExerciseSetupReport {
            exercise_id: exercise.id.clone(),
            has_test_cases,
            test_case_count: exercise.test_cases.len(),
            has_solution: solution.is_some(),
            solution_valid,
            solution_score,
        })
    }

    pub async fn hints(
        &self,
        exercise_id: &str,
        attempts: u32,
        max_hints: Option<usize>,
    ) -> Result<Vec<HintView>, ServiceError> {
        validation::check_exercise_id(exercise_id)?;
        let exercise = self.resolve(exercise_id).await?;
        Ok(hints::reveal(attempts, &exercise.hints, max_hints))
    }

    async fn resolve(&self, exercise_id: &str) -> Result<ExerciseDefinition, ServiceError> {
        self.catalog
            .fetch(exercise_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(exercise_id.to_string()))
    }

    fn exercise_limits(&self, exercise: &ExerciseDefinition) -> Limits {
        let timeout_secs = exercise
            .timeout_secs
            .unwrap_or(self.config.test_timeout_secs)
            .clamp(1, self.config.max_timeout_secs);
        let memory_limit_mb = exercise
            .memory_limit_mb
            .unwrap_or(self.config.memory_limit_mb)
            .clamp(1, self.config.max_memory_limit_mb);

        Limits {
            timeout: Duration::from_secs(timeout_secs),
            memory_limit_mb,
            max_output_bytes: self.config.max_output_bytes,
        }
    }

    /// One sandbox run per test case, in definition order. The caller holds
    /// the pool slot for the whole pass.
    async fn grade(
        &self,
        exercise: &ExerciseDefinition,
        code: &str,
    ) -> Result<ExerciseValidationResult, ServiceError> {
        let limits = self.exercise_limits(exercise);
        let mut results = Vec::with_capacity(exercise.test_cases.len());

        for test_case in &exercise.test_cases {
            let job = SandboxJob {
                language: Language::Python,
                source: code.to_string(),
                stdin: test_case.input.clone(),
                expression: test_case.expression.clone(),
                marker: runner::new_marker(),
                limits: limits.clone(),
            };

            let output = self.run_sandboxed(&job).await?;
            let run = evaluator::summarize_run(Uuid::new_v4(), &output, &job.limits);
            let result = evaluator::evaluate_test(test_case, &run, &job.marker);

            if !run.success {
                warn!(
                    test = %test_case.name,
                    status = %run.status,
                    execution_ms = (run.execution_time * 1000.0) as u64,
                    "Test case run did not complete"
                );
            }

            results.push(result);
        }

        Ok(evaluator::aggregate_results(
            &exercise.id,
            &exercise.test_cases,
            results,
        ))
    }

    async fn run_sandboxed(&self, job: &SandboxJob) -> Result<SandboxOutput, ServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sandbox.run(job).await.map_err(ServiceError::from) {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < SANDBOX_ATTEMPTS => {
                    warn!(attempt, error = %e, "Sandbox fault, retrying once");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
