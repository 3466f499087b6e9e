use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::lockfile::LockFile;
use crate::now_ms;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Bookkeeping stripped transparently on read. Legacy documents written
/// before the envelope existed are plain content and still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub written_at_ms: u64,
    pub writer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub meta: DocumentMeta,
    pub content: T,
}

/// Reads a small structured document, accepting both enveloped and legacy
/// raw layouts. Malformed content is fatal and names the offending file.
pub async fn read_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()))
        }
    };
    if let Ok(envelope) = serde_json::from_str::<Envelope<T>>(&raw) {
        return Ok(Some(envelope.content));
    }
    let content = serde_json::from_str::<T>(&raw)
        .with_context(|| format!("malformed state document {}", path.display()))?;
    Ok(Some(content))
}

/// Atomic full-document replace: serialize the envelope to a temp sibling,
/// then rename over the target.
pub async fn write_document<T: Serialize>(
    path: &Path,
    content: &T,
    writer: &str,
) -> anyhow::Result<()> {
    let envelope = Envelope {
        meta: DocumentMeta {
            written_at_ms: now_ms(),
            writer: writer.to_string(),
        },
        content,
    };
    let payload = serde_json::to_string_pretty(&envelope)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp, payload)
        .await
        .with_context(|| format!("failed writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed replacing {}", path.display()))?;
    Ok(())
}

/// Lock-guarded read-modify-write over one document. The lock covers
/// exactly this cycle and is released on every exit path.
pub async fn update_document<T, F>(
    path: &Path,
    writer: &str,
    stale_ttl: Duration,
    mutate: F,
) -> anyhow::Result<T>
where
    T: DeserializeOwned + Serialize + Default,
    F: FnOnce(&mut T),
{
    let lock = LockFile::guarding(path, stale_ttl);
    let _guard = lock
        .acquire_with_retry(10, Duration::from_millis(50))
        .await
        .with_context(|| format!("lock contention on {}", path.display()))?;
    let mut doc = read_document::<T>(path).await?.unwrap_or_default();
    mutate(&mut doc);
    write_document(path, &doc, writer).await?;
    Ok(doc)
}

/// Appends one row to a JSONL file, creating it (and its directory) on
/// first use.
pub async fn append_jsonl<T: Serialize>(path: &Path, row: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(row)?;
    line.push('\n');
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed opening {}", path.display()))?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Reads every parseable JSONL row in file order. A torn trailing line
/// from a crashed writer is skipped rather than failing the read.
pub async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()))
        }
    };
    Ok(raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<T>(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        counter: u64,
        note: String,
    }

    #[tokio::test]
    async fn write_then_read_strips_envelope() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.json");
        let doc = Doc {
            counter: 7,
            note: "hello".to_string(),
        };
        write_document(&path, &doc, "leader").await.expect("write");

        let raw = std::fs::read_to_string(&path).expect("raw");
        assert!(raw.contains("written_at_ms"));

        let loaded: Doc = read_document(&path).await.expect("read").expect("some");
        assert_eq!(loaded, doc);
    }

    #[tokio::test]
    async fn legacy_document_without_envelope_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("legacy.json");
        std::fs::write(&path, r#"{"counter": 3, "note": "old"}"#).expect("plant");
        let loaded: Doc = read_document(&path).await.expect("read").expect("some");
        assert_eq!(loaded.counter, 3);
    }

    #[tokio::test]
    async fn malformed_document_is_fatal_and_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").expect("plant");
        let err = read_document::<Doc>(&path).await.expect_err("must fail");
        assert!(format!("{err:#}").contains("broken.json"));
    }

    #[tokio::test]
    async fn update_document_initializes_and_mutates_under_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.json");
        let updated = update_document::<Doc, _>(&path, "leader", DEFAULT_LOCK_TTL, |doc| {
            doc.counter += 1;
        })
        .await
        .expect("update");
        assert_eq!(updated.counter, 1);
        // Lock marker is gone once the cycle finishes.
        assert!(!path.with_file_name("doc.json.lock").exists());
    }

    #[tokio::test]
    async fn jsonl_appends_preserve_order_and_skip_torn_tail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rows.jsonl");
        append_jsonl(&path, &json!({"seq": 1})).await.expect("a1");
        append_jsonl(&path, &json!({"seq": 2})).await.expect("a2");
        // Simulate a crash mid-append.
        {
            use std::io::Write as _;
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .expect("open");
            file.write_all(b"{\"seq\": 3").expect("torn");
        }
        let rows: Vec<serde_json::Value> = read_jsonl(&path).await.expect("read");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["seq"], 1);
        assert_eq!(rows[1]["seq"], 2);
    }
}
