//! Persistence of saved locations.
//!
//! A refresh only ever commits a complete new location, so a store just needs
//! whole-value load and save.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::{Config, Location};

#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Location>>;

    /// Insert or replace the location with the same id.
    async fn save(&self, location: &Location) -> Result<()>;

    async fn list(&self) -> Result<Vec<Location>>;
}

/// All locations in one JSON file, rewritten through a temporary file on every save.
#[derive(Debug, Clone)]
pub struct JsonLocationStore {
    path: PathBuf,
}

impl JsonLocationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform data directory.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Config::locations_file_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, Location>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read locations file: {}", self.path.display()));
            }
        };

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse locations file: {}", self.path.display()))
    }

    async fn write_all(&self, locations: &BTreeMap<String, Location>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create data directory: {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(locations).context("Failed to serialize locations")?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace locations file: {}", self.path.display()))?;

        Ok(())
    }
}

#[async_trait]
impl LocationStore for JsonLocationStore {
    async fn load(&self, id: &str) -> Result<Option<Location>> {
        Ok(self.read_all().await?.remove(id))
    }

    async fn save(&self, location: &Location) -> Result<()> {
        let mut all = self.read_all().await?;
        all.insert(location.id.clone(), location.clone());
        self.write_all(&all).await?;
        debug!(location = %location.id, path = %self.path.display(), "location saved");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Location>> {
        Ok(self.read_all().await?.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Feature, SourceParameters, Weather,
        testing::{MemoryLocationStore, hour, location},
    };
    use std::sync::Arc;

    fn saved_location() -> Location {
        let mut params = SourceParameters::new();
        params.insert("location_id".into(), "2801268".into());

        let weather = Weather {
            current: None,
            daily: Vec::new(),
            hourly: Vec::new(),
            minutely: Vec::new(),
            alerts: Vec::new(),
            normals: None,
            refresh_time: hour(3),
            updates: BTreeMap::new(),
            failures: BTreeMap::new(),
        };

        location("weatherapi")
            .with_override(Feature::Pollen, "openmeteo")
            .with_parameters("weatherapi", params)
            .with_weather(Arc::new(weather))
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLocationStore::new(dir.path().join("locations.json"));

        assert!(store.list().await.unwrap().is_empty());
        assert!(store.load("home").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saved_location_loads_back_whole() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLocationStore::new(dir.path().join("nested/locations.json"));

        let original = saved_location();
        store.save(&original).await.unwrap();

        let loaded = store.load("home").await.unwrap().unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.parameter("weatherapi", "location_id"), Some("2801268"));
        assert!(!dir.path().join("nested/locations.json.tmp").exists());
    }

    #[tokio::test]
    async fn save_replaces_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLocationStore::new(dir.path().join("locations.json"));

        store.save(&location("weatherapi")).await.unwrap();
        let mut work = location("openweather");
        work.id = "work".into();
        store.save(&work).await.unwrap();
        store.save(&location("openweather")).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.load("home").await.unwrap().unwrap().main_source, "openweather");
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locations.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonLocationStore::new(&path).list().await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse locations file"));
    }

    #[tokio::test]
    async fn memory_store_behaves_like_file_store() {
        let store = MemoryLocationStore::default();
        store.save(&saved_location()).await.unwrap();
        assert_eq!(store.load("home").await.unwrap(), Some(saved_location()));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
