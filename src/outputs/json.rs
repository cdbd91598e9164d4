//! JSON artifact files.
//!
//! A batch is an ordered JSON array written with two-space indentation so the
//! files stay readable and diffable. Parent directories are created on write.

use crate::error::PipelineError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

fn artifact_error(path: &Path, source: std::io::Error) -> PipelineError {
    PipelineError::Artifact {
        path: path.display().to_string(),
        source,
    }
}

/// Write `items` to `path` as a pretty-printed JSON array.
///
/// # Arguments
///
/// * `items` - The batch to serialize, in order
/// * `path` - Destination file; missing parent directories are created
///
/// # Returns
///
/// `Ok(())` on success, or an error if directory creation, serialization or
/// the write fails.
#[instrument(level = "info", skip_all, fields(path = %path.display(), count = items.len()))]
pub async fn write_batch<T: Serialize>(items: &[T], path: &Path) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(items)?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create artifact dir");
            return Err(artifact_error(dir, e));
        }
    }

    fs::write(path, json).await.map_err(|e| artifact_error(path, e))?;
    info!("Wrote artifact");
    Ok(())
}

/// Read a batch previously written with [`write_batch`].
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn read_batch<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PipelineError> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|e| artifact_error(path, e))?;
    let items: Vec<T> = serde_json::from_str(&text)?;
    info!(count = items.len(), "Read artifact");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::article;
    use crate::models::{Article, CleanedArticle};
    use chrono::Utc;

    #[tokio::test]
    async fn test_batches_survive_a_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/raw_articles.json");
        let batch = vec![article("Kites", "Sky", "Body."), article("Owls", "", "Hoot.")];

        write_batch(&batch, &path).await.unwrap();
        let back: Vec<Article> = read_batch(&path).await.unwrap();
        assert_eq!(back, batch);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[\n  {"));
        assert!(text.contains("\"extraction_method\": \"feed\""));
    }

    #[tokio::test]
    async fn test_cleaned_articles_are_flat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cleaned.json");
        let cleaned = vec![CleanedArticle {
            article: article("Kites", "", "Body text here."),
            word_count: 3,
            is_cleaned: true,
            cleaned_at: Utc::now(),
        }];
        write_batch(&cleaned, &path).await.unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value[0]["title"], "Kites");
        assert_eq!(value[0]["word_count"], 3);
        assert!(value[0].get("article").is_none());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let err = read_batch::<Article>(&path).await.unwrap_err();
        assert!(matches!(err, PipelineError::Artifact { .. }));
        assert!(err.to_string().contains("nope.json"));
    }
}
