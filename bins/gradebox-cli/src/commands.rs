// CLI commands for running and managing exercises
use anyhow::{bail, Context, Result};
use gradebox_common::config::ServiceConfig;
use gradebox_common::types::{ExecutionRequest, ExerciseDefinition, ValidationRequest};
use gradebox_engine::catalog::{parse_definitions, StaticCatalog};
use gradebox_engine::config::RuntimeRegistry;
use gradebox_engine::engine::DockerEngine;
use gradebox_engine::executor::Executor;
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn load_definitions(path: &Path) -> Result<Vec<ExerciseDefinition>> {
    let content = read_text(path)?;
    parse_definitions(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Pick the exercise to work on: the named one, or the only one in the file
fn select_exercise(exercises: &[ExerciseDefinition], id: Option<&str>) -> Result<String> {
    match id {
        Some(id) => {
            if exercises.iter().any(|e| e.id == id) {
                Ok(id.to_string())
            } else {
                bail!("Exercise '{}' is not defined in the given file", id)
            }
        }
        None => match exercises {
            [only] => Ok(only.id.clone()),
            [] => bail!("No exercises defined in the given file"),
            _ => bail!(
                "File defines {} exercises, pick one with --id",
                exercises.len()
            ),
        },
    }
}

/// Local executor: Docker sandbox plus an in-memory catalog
async fn local_executor(exercises: Vec<ExerciseDefinition>) -> Result<Executor> {
    let config = ServiceConfig::from_env()?;
    let runtimes = RuntimeRegistry::load_or_default(&config.runtimes_path)?;
    let engine = DockerEngine::connect(runtimes).context("Failed to create Docker client")?;
    engine
        .ping()
        .await
        .context("Docker daemon is not reachable")?;

    Ok(Executor::new(
        Arc::new(engine),
        Arc::new(StaticCatalog::with(exercises)),
        config,
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run a source file once
pub async fn run_file(file: &Path, stdin: Option<&Path>, timeout: Option<u64>) -> Result<()> {
    let request = ExecutionRequest {
        code: read_text(file)?,
        language: "python".to_string(),
        input: stdin.map(read_text).transpose()?,
        timeout_secs: timeout,
    };

    let executor = local_executor(vec![]).await?;
    let result = executor.execute(&request).await?;
    print_json(&result)?;

    if !result.success {
        eprintln!("❌ Run did not complete: {}", result.status);
        std::process::exit(1);
    }
    Ok(())
}

/// Grade a solution file against a local exercise definition
pub async fn validate_file(exercise: &Path, file: &Path, id: Option<&str>) -> Result<()> {
    let exercises = load_definitions(exercise)?;
    let exercise_id = select_exercise(&exercises, id)?;
    let code = read_text(file)?;

    println!("🧪 Validating {} against '{}'", file.display(), exercise_id);

    let executor = local_executor(exercises).await?;
    let result = executor
        .validate(&ValidationRequest { exercise_id, code })
        .await?;

    for test in &result.test_results {
        let mark = if test.passed { "✅" } else { "❌" };
        println!("  {} {} ({:.3}s)", mark, test.name, test.execution_time);
        if let Some(error) = &test.error {
            for line in error.lines() {
                println!("      {}", line);
            }
        } else if !test.passed {
            println!(
                "      expected {}, got {}",
                test.expected,
                test.actual
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "nothing".to_string())
            );
        }
    }
    println!("\n{} (score: {})", result.feedback, result.score);

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Check that an exercise is ready to be published
pub async fn check_exercise(exercise: &Path, id: Option<&str>) -> Result<()> {
    let exercises = load_definitions(exercise)?;
    let exercise_id = select_exercise(&exercises, id)?;

    let executor = local_executor(exercises).await?;
    let report = executor.check_exercise(&exercise_id).await?;
    print_json(&report)?;

    if !report.has_test_cases {
        println!("⚠️  No test cases: submissions can never pass");
    }
    if !report.has_solution {
        println!("⚠️  No reference solution: comparison is unavailable");
    } else if !report.solution_valid {
        println!("❌ Reference solution fails its own tests");
        std::process::exit(1);
    } else {
        println!("✅ Exercise '{}' is ready", exercise_id);
    }
    Ok(())
}

async fn connect_redis(redis_url: Option<&str>) -> Result<(redis::aio::ConnectionManager, String)> {
    let redis_url = match redis_url {
        Some(url) => url.to_string(),
        None => ServiceConfig::from_env()?.redis_url,
    };

    let client = redis::Client::open(redis_url.as_str())
        .with_context(|| format!("Invalid Redis URL: {}", redis_url))?;
    let conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    Ok((conn, redis_url))
}

/// Publish definitions into the Redis catalog
pub async fn publish(exercise: &Path, redis_url: Option<&str>) -> Result<()> {
    let exercises = load_definitions(exercise)?;
    if exercises.is_empty() {
        bail!("No exercises defined in {}", exercise.display());
    }

    let (mut conn, redis_url) = connect_redis(redis_url).await?;

    for definition in &exercises {
        gradebox_common::redis::store_exercise(&mut conn, definition)
            .await
            .with_context(|| format!("Failed to publish '{}'", definition.id))?;
        println!(
            "📤 Published '{}' ({} tests) to {}",
            definition.id,
            definition.test_cases.len(),
            gradebox_common::redis::exercise_key(&definition.id)
        );
    }

    println!("✅ {} exercise(s) published to {}", exercises.len(), redis_url);
    Ok(())
}

/// Remove exercises from the Redis catalog. Unknown ids are reported, not fatal.
pub async fn unpublish(ids: &[String], redis_url: Option<&str>) -> Result<()> {
    if ids.is_empty() {
        bail!("No exercise ids given");
    }

    let (mut conn, redis_url) = connect_redis(redis_url).await?;

    let mut removed = 0;
    for id in ids {
        let existed = gradebox_common::redis::delete_exercise(&mut conn, id)
            .await
            .with_context(|| format!("Failed to unpublish '{}'", id))?;
        if existed {
            removed += 1;
            println!("🗑️  Removed '{}'", id);
        } else {
            println!("⚠️  '{}' was not published", id);
        }
    }

    println!("✅ {} exercise(s) removed from {}", removed, redis_url);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn exercises(ids: &[&str]) -> Vec<ExerciseDefinition> {
        ids.iter()
            .map(|id| serde_json::from_value(serde_json::json!({ "id": id })).unwrap())
            .collect()
    }

    #[test]
    fn test_select_single_exercise() {
        assert_eq!(select_exercise(&exercises(&["only"]), None).unwrap(), "only");
    }

    #[test]
    fn test_select_requires_id_for_many() {
        let many = exercises(&["a", "b"]);
        assert!(select_exercise(&many, None).is_err());
        assert_eq!(select_exercise(&many, Some("b")).unwrap(), "b");
        assert!(select_exercise(&many, Some("c")).is_err());
    }

    #[test]
    fn test_select_empty_file() {
        assert!(select_exercise(&[], None).is_err());
    }

    #[test]
    fn test_load_definitions_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"id": "a"}}, {{"id": "b", "hints": ["x"]}}]"#).unwrap();

        let loaded = load_definitions(file.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].hints, vec!["x".to_string()]);
    }
}
