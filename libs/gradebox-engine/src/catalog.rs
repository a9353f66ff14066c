/// Exercise catalog
///
/// Exercise definitions are owned by the content service. Gradebox reads
/// them once per request and never writes them back (the CLI `publish`
/// command aside).

use crate::error::CatalogError;
use anyhow::Context;
use async_trait::async_trait;
use gradebox_common::redis as catalog_keys;
use gradebox_common::types::ExerciseDefinition;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[async_trait]
pub trait ExerciseCatalog: Send + Sync {
    async fn fetch(&self, exercise_id: &str) -> Result<Option<ExerciseDefinition>, CatalogError>;
}

/// Catalog backed by the shared Redis instance
#[derive(Clone)]
pub struct RedisCatalog {
    conn: ConnectionManager,
}

impl RedisCatalog {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)
            .with_context(|| format!("Invalid Redis URL: {}", redis_url))?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self::new(conn))
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ExerciseCatalog for RedisCatalog {
    async fn fetch(&self, exercise_id: &str) -> Result<Option<ExerciseDefinition>, CatalogError> {
        // ConnectionManager is a cheap handle onto a shared multiplexed connection
        let mut conn = self.conn.clone();
        match catalog_keys::get_exercise(&mut conn, exercise_id).await {
            Ok(found) => {
                debug!(exercise_id = %exercise_id, found = found.is_some(), "Catalog lookup");
                Ok(found)
            }
            Err(e) if e.kind() == redis::ErrorKind::TypeError => {
                Err(CatalogError::Malformed(format!("{}: {}", exercise_id, e)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory catalog for local runs and tests
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    exercises: Arc<RwLock<HashMap<String, ExerciseDefinition>>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(exercises: impl IntoIterator<Item = ExerciseDefinition>) -> Self {
        let catalog = Self::new();
        for exercise in exercises {
            catalog.insert(exercise);
        }
        catalog
    }

    pub fn insert(&self, exercise: ExerciseDefinition) {
        let mut map = match self.exercises.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(exercise.id.clone(), exercise);
    }

    /// Load definitions from a JSON file holding one definition or an array
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let exercises = parse_definitions(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Self::with(exercises))
    }
}

#[async_trait]
impl ExerciseCatalog for StaticCatalog {
    async fn fetch(&self, exercise_id: &str) -> Result<Option<ExerciseDefinition>, CatalogError> {
        let map = self
            .exercises
            .read()
            .map_err(|_| CatalogError::Backend("static catalog lock poisoned".to_string()))?;
        Ok(map.get(exercise_id).cloned())
    }
}

/// Accepts either a single exercise object or an array of them
pub fn parse_definitions(content: &str) -> anyhow::Result<Vec<ExerciseDefinition>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let exercises = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(exercises)
}
