use crate::types::ExerciseDefinition;
use redis::{AsyncCommands, RedisResult};

/// Redis key scheme for the exercise catalog.
/// The content service writes definitions, Gradebox only reads them per request.

pub const EXERCISE_PREFIX: &str = "gradebox:exercise";

/// Generate deterministic catalog key for an exercise
pub fn exercise_key(exercise_id: &str) -> String {
    format!("{}:{}", EXERCISE_PREFIX, exercise_id)
}

fn serialization_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

/// Publish an exercise definition (no TTL, the content service owns its lifetime)
pub async fn store_exercise(
    conn: &mut redis::aio::ConnectionManager,
    exercise: &ExerciseDefinition,
) -> RedisResult<()> {
    let key = exercise_key(&exercise.id);
    let payload = serde_json::to_string(exercise).map_err(serialization_error)?;

    conn.set(&key, payload).await
}

/// Fetch an exercise definition
pub async fn get_exercise(
    conn: &mut redis::aio::ConnectionManager,
    exercise_id: &str,
) -> RedisResult<Option<ExerciseDefinition>> {
    let key = exercise_key(exercise_id);
    let payload: Option<String> = conn.get(&key).await?;

    match payload {
        Some(data) => {
            let exercise: ExerciseDefinition = serde_json::from_str(&data).map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "deserialization error",
                    e.to_string(),
                ))
            })?;
            Ok(Some(exercise))
        }
        None => Ok(None),
    }
}

/// Remove an exercise from the catalog. Returns whether a key was deleted.
pub async fn delete_exercise(
    conn: &mut redis::aio::ConnectionManager,
    exercise_id: &str,
) -> RedisResult<bool> {
    let removed: u32 = conn.del(exercise_key(exercise_id)).await?;
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exercise_key_format() {
        assert_eq!(exercise_key("sum-two"), "gradebox:exercise:sum-two");
    }

    #[test]
    fn test_exercise_key_deterministic() {
        let id = uuid::Uuid::new_v4().to_string();
        let key1 = exercise_key(&id);
        let key2 = exercise_key(&id);
        assert_eq!(key1, key2);
        assert!(key1.starts_with("gradebox:exercise:"));
        assert!(key1.ends_with(&id));
    }
}
