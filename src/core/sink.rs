//! Per-line tee between the toolchain, the persistent job log and the live view.

use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::tree::{TreeBuilder, TreeSnapshot};

/// Lines starting with this marker (after trimming) stay out of the live view.
pub const COMMENT_MARKER: char = '#';

pub fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with(COMMENT_MARKER)
}

/// Consumes every output line exactly once.
///
/// Each line is appended to the log and flushed before it is classified, so
/// the log stays complete even for lines the live view suppresses.
pub struct LineSink {
    log: File,
    log_path: PathBuf,
    tree: Option<TreeBuilder>,
    lines_logged: u64,
    write_failures: u64,
}

impl LineSink {
    pub fn new(log: File, log_path: impl Into<PathBuf>) -> Self {
        Self {
            log,
            log_path: log_path.into(),
            tree: None,
            lines_logged: 0,
            write_failures: 0,
        }
    }

    /// Also feed forwarded lines into a tree builder.
    pub fn with_tree(mut self, tree: TreeBuilder) -> Self {
        self.tree = Some(tree);
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn lines_logged(&self) -> u64 {
        self.lines_logged
    }

    /// Log `line` and return it if it belongs in the live view.
    pub async fn accept(&mut self, line: &str) -> Option<String> {
        if !self.append(line).await {
            // Without a durable log entry, skip classification and show the raw line.
            return Some(line.to_string());
        }

        if is_comment(line) {
            return None;
        }

        if let Some(tree) = self.tree.as_mut() {
            tree.feed(line);
        }

        Some(line.to_string())
    }

    /// Append diagnostic text to the log only, without filtering.
    pub async fn record(&mut self, text: &str) {
        self.append(text).await;
    }

    /// Hand back the finished tree, if this sink was building one.
    pub fn take_tree(&mut self) -> Option<TreeSnapshot> {
        self.tree.take().map(TreeBuilder::finish)
    }

    async fn append(&mut self, text: &str) -> bool {
        let mut entry = String::with_capacity(text.len() + 1);
        entry.push_str(text);
        entry.push('\n');

        let result = async {
            self.log.write_all(entry.as_bytes()).await?;
            self.log.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                self.lines_logged += 1;
                true
            }
            Err(e) => {
                self.write_failures += 1;
                // Only the first failure is worth a warning; the rest repeat it.
                if self.write_failures == 1 {
                    warn!(path = %self.log_path.display(), error = %e, "Failed to append to job log");
                }
                false
            }
        }
    }
}
