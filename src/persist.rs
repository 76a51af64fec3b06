use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::dispatch::JobResult;
use crate::request::Model;

/// Keeps filenames unique when two images land in the same millisecond.
static PERSIST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Only alphanumeric, `-`, `_` survive; everything else becomes `_`.
pub fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Write a delivered image to `{dir}/{timestamp}_{seq}_{model}_{seed}.{ext}`.
/// Written to a temp file and renamed so readers never see a partial image.
pub async fn persist_image(
    dir: &Path,
    model: Model,
    result: &JobResult,
) -> Result<PathBuf, std::io::Error> {
    tokio::fs::create_dir_all(dir).await?;

    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = PERSIST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let filename = format!(
        "{ts}_{seq}_{}_{}.{}",
        sanitize_component(model.as_str()),
        sanitize_component(&result.seed.to_string()),
        result.image_extension()
    );
    let path = dir.join(&filename);

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, &result.image).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    tracing::debug!(path = %path.display(), bytes = result.image.len(), "image persisted");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_path_characters() {
        assert_eq!(sanitize_component("nemu"), "nemu");
        assert_eq!(sanitize_component("-1"), "-1");
        assert_eq!(sanitize_component("../etc"), "___etc");
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
    }

    #[tokio::test]
    async fn persist_writes_image_atomically() {
        let dir = std::env::temp_dir().join(format!("imgen-persist-{}", std::process::id()));
        let result = JobResult {
            seed: 1234,
            image: vec![0x89, b'P', b'N', b'G', 1, 2, 3],
        };

        let a = persist_image(&dir, Model::Aom, &result).await.unwrap();
        let b = persist_image(&dir, Model::Aom, &result).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(tokio::fs::read(&a).await.unwrap(), result.image);

        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_aom_1234.png"), "{name}");
        assert!(!a.with_extension("tmp").exists());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
