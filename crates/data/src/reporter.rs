use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rotator_core::traits::Reporter;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Archives one snapshot file per cycle under a report directory.
///
/// How snapshots are displayed or shipped further is outside the
/// core's concern; anything else (a dashboard, a chat webhook) is
/// another [`Reporter`] implementation.
pub struct FileReporter {
    dir: PathBuf,
}

impl FileReporter {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl Reporter for FileReporter {
    async fn publish(&self, text: &str, cycle: u64) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .with_context(|| format!("Failed to create report dir: {}", self.dir.display()))?;
        }

        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S");
        let path = self.dir.join(format!("cycle-{cycle:06}-{stamp}.txt"));
        fs::write(&path, text)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;

        debug!(path = %path.display(), cycle, "Published cycle report");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn publish_writes_one_file_per_cycle() {
        let dir = TempDir::new().unwrap();
        let reporter = FileReporter::new(dir.path().join("reports"));

        reporter.publish("snapshot one", 1).await.unwrap();
        reporter.publish("snapshot two", 2).await.unwrap();

        let mut files: Vec<_> = fs::read_dir(dir.path().join("reports"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        files.sort();
        assert_eq!(files.len(), 2);
        assert!(files[0].starts_with("cycle-000001-"));
        assert!(files[1].starts_with("cycle-000002-"));
    }
}
