//! Parallel file loading for prompt context.
//!
//! Reads a set of files with a bounded number of concurrent reads and
//! reports each file's token estimate.  Results come back in input order
//! regardless of completion order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::tokens::TokenEstimator;

/// Default number of concurrent reads.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// One loaded (or failed) file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileContext {
    pub path: PathBuf,
    /// File text, or the read error rendered as a string.
    pub content: std::result::Result<String, String>,
    /// Estimated tokens of the content (0 on error).
    pub tokens: usize,
}

impl FileContext {
    pub fn is_ok(&self) -> bool {
        self.content.is_ok()
    }
}

/// Bounded worker pool over file reads.
#[derive(Debug, Clone)]
pub struct ContextLoader {
    estimator: Arc<TokenEstimator>,
    concurrency: usize,
}

impl ContextLoader {
    pub fn new(estimator: Arc<TokenEstimator>, concurrency: usize) -> Self {
        Self {
            estimator,
            concurrency: concurrency.max(1),
        }
    }

    /// Read every path in `paths`.  Unreadable files are reported in their
    /// slot rather than failing the whole batch.
    pub async fn load<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<FileContext>> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::channel::<(usize, FileContext)>(self.concurrency * 2);

        let mut handles = Vec::with_capacity(paths.len());
        for (slot, path) in paths.iter().enumerate() {
            let path = path.as_ref().to_path_buf();
            let permits = Arc::clone(&permits);
            let estimator = Arc::clone(&self.estimator);
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| e.to_string());
                let tokens = content.as_deref().map_or(0, |c| estimator.estimate(c));
                if let Err(e) = &content {
                    warn!(path = %path.display(), error = %e, "failed to read context file");
                }
                let _ = tx.send((slot, FileContext { path, content, tokens })).await;
            }));
        }
        drop(tx);

        let mut slots: Vec<Option<FileContext>> = vec![None; paths.len()];
        while let Some((slot, file)) = rx.recv().await {
            slots[slot] = Some(file);
        }
        for handle in handles {
            handle.await?;
        }

        let files: Vec<FileContext> = slots.into_iter().flatten().collect();
        if files.len() != paths.len() {
            return Err(AgentError::Internal(format!(
                "context loader returned {} of {} files",
                files.len(),
                paths.len()
            )));
        }

        debug!(
            files = files.len(),
            tokens = files.iter().map(|f| f.tokens).sum::<usize>(),
            "context files loaded"
        );
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn results_keep_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..10 {
            let path = dir.path().join(format!("f{i}.txt"));
            std::fs::write(&path, "word ".repeat(i * 10 + 1)).unwrap();
            paths.push(path);
        }
        paths.push(dir.path().join("missing.txt"));

        let loader = ContextLoader::new(Arc::new(TokenEstimator::default()), 3);
        let files = loader.load(&paths).await.unwrap();

        assert_eq!(files.len(), 11);
        for (file, path) in files.iter().zip(&paths) {
            assert_eq!(&file.path, path);
        }
        assert!(files[..10].iter().all(FileContext::is_ok));
        assert!(files[9].tokens > files[0].tokens);
        assert!(!files[10].is_ok());
        assert_eq!(files[10].tokens, 0);
    }
}
