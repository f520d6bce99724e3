//! Persistence collaborator for the post set.
//!
//! The document shape is `{"posts": [Post, ...]}`. A missing document loads as
//! an empty set; any other read or write failure is returned to the caller.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::StoreError;
use crate::ingest::types::Post;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostsDocument {
    #[serde(default)]
    pub posts: Vec<Post>,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Vec<Post>, StoreError>;
    async fn save(&self, posts: &[Post]) -> Result<(), StoreError>;
}

/// JSON document on the local filesystem, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "posts.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<Post>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let doc: PostsDocument = serde_json::from_slice(&bytes)?;
                Ok(doc.posts)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, posts: &[Post]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let doc = PostsDocument {
            posts: posts.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        // write to temp, then rename over the live document
        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-process store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    posts: Mutex<Vec<Post>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posts(posts: Vec<Post>) -> Self {
        Self {
            posts: Mutex::new(posts),
            saves: Mutex::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Vec<Post>, StoreError> {
        Ok(self.posts.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    async fn save(&self, posts: &[Post]) -> Result<(), StoreError> {
        *self.posts.lock().unwrap_or_else(|p| p.into_inner()) = posts.to_vec();
        *self.saves.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        Ok(())
    }
}
