//! Saved favorite locations, kept as a JSON array on disk

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;

use carbon_core::LocationSpec;
use tokio::sync::Mutex;
use tracing::warn;

pub struct FavoritesStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FavoritesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Missing or unreadable content is an empty list
    pub async fn load(&self) -> Vec<LocationSpec> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read favorites");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "ignoring corrupt favorites file");
            Vec::new()
        })
    }

    /// Replaces the list; blank entries and case-insensitive repeats are dropped
    pub async fn save(&self, favorites: Vec<LocationSpec>) -> std::io::Result<usize> {
        let cleaned = clean(favorites);
        let body = serde_json::to_vec_pretty(&cleaned)?;
        let _guard = self.write_lock.lock().await;
        tokio::fs::write(&self.path, body).await?;
        Ok(cleaned.len())
    }

    pub async fn clear(&self) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

fn clean(favorites: Vec<LocationSpec>) -> Vec<LocationSpec> {
    let mut seen = HashSet::new();
    favorites
        .into_iter()
        .filter(|f| !f.is_blank())
        .map(|f| LocationSpec::new(f.cloud.trim(), f.region.trim()))
        .filter(|f| seen.insert(f.key()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_dedupes_and_drops_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let store = FavoritesStore::new(dir.path().join("favorites.json"));

        let saved = store
            .save(vec![
                LocationSpec::new("gcp", "us-east1"),
                LocationSpec::new("GCP", "US-EAST1"),
                LocationSpec::new("", "westeurope"),
                LocationSpec::new("azure", " "),
                LocationSpec::new(" azure ", "westeurope"),
            ])
            .await
            .unwrap();
        assert_eq!(saved, 2);

        let loaded = store.load().await;
        assert_eq!(
            loaded,
            vec![
                LocationSpec::new("gcp", "us-east1"),
                LocationSpec::new("azure", "westeurope"),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_files_read_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("favorites.json");
        let store = FavoritesStore::new(&path);
        assert!(store.load().await.is_empty());

        std::fs::write(&path, "{not json").unwrap();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FavoritesStore::new(dir.path().join("favorites.json"));
        store
            .save(vec![LocationSpec::new("aws", "us-east-1")])
            .await
            .unwrap();

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.is_empty());
    }
}
