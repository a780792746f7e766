use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::{RenderError, RenderResult};

/// Namespaced file storage rendered images can be written to.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn write_file(&self, namespace: &str, name: &str, bytes: &[u8]) -> RenderResult<()>;
}

/// Stores files under `<root>/<namespace>/<name>`.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, namespace: &str, name: &str) -> RenderResult<PathBuf> {
        let mut path = self.root.clone();
        for part in [namespace, name] {
            let relative = Path::new(part.trim_start_matches('/'));
            if relative.as_os_str().is_empty()
                || relative
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(RenderError::FilesystemWrite(format!(
                    "{namespace}/{name}: not a file inside the namespace"
                )));
            }
            path.push(relative);
        }
        Ok(path)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn write_file(&self, namespace: &str, name: &str, bytes: &[u8]) -> RenderResult<()> {
        let path = self.resolve(namespace, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RenderError::FilesystemWrite(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| RenderError::FilesystemWrite(format!("{}: {e}", path.display())))?;
        tracing::debug!("wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

pub async fn write_on_disk(path: &Path, bytes: &[u8]) -> RenderResult<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| RenderError::FilesystemWrite(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_into_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        store
            .write_file("echarts.0", "charts/heating.svg", b"<svg/>")
            .await
            .unwrap();
        let written = std::fs::read(dir.path().join("echarts.0/charts/heating.svg")).unwrap();
        assert_eq!(written, b"<svg/>");
    }

    #[tokio::test]
    async fn leading_slash_stays_inside_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        store.write_file("echarts.0", "/a.png", b"x").await.unwrap();
        assert!(dir.path().join("echarts.0/a.png").exists());
    }

    #[test]
    fn rejects_escaping_names() {
        let store = LocalFileStore::new("/tmp/files");
        assert!(matches!(
            store.resolve("echarts.0", "../../etc/passwd"),
            Err(RenderError::FilesystemWrite(_))
        ));
        assert!(store.resolve("..", "a.svg").is_err());
    }
}
