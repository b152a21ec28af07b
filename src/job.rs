//! Job records from the download daemon's history and their rename logic
//!
//! A [`JobRecord`] is rebuilt from the daemon on every poll and never
//! persisted. The only derived state is the standardized name (display name
//! with spaces replaced by underscores) and the path the payload was renamed to.

use crate::error::{CollaboratorError, Result};
use crate::utils::is_video_file;
use std::path::{Path, PathBuf};

/// One entry of the daemon's job history or queue
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobRecord {
    /// Daemon-assigned job id
    pub job_id: i32,
    /// Total size
    pub file_size_mb: i32,
    /// Size still to download
    pub remaining_size_mb: i32,
    /// Active download threads
    pub active_downloads: i32,
    /// NZB file the job was created from
    pub nzb_file_name: Option<String>,
    /// Human-readable job name
    pub display_name: Option<String>,
    /// Download directory
    pub dest_dir: Option<String>,
    /// Directory after post-processing moved the files, if any
    pub final_dir: Option<String>,
    /// Daemon status string, e.g. `SUCCESS/UNPACK`
    pub status: Option<String>,
    /// Derived by [`JobRecord::standardize`]
    pub standardized_name: Option<String>,
    /// Set once the payload has been renamed
    pub renamed_path: Option<PathBuf>,
}

impl JobRecord {
    /// Whether this record has what the poll cycle needs to act on it
    pub fn is_actionable(&self) -> bool {
        self.display_name.is_some() && self.status.is_some()
    }

    /// Compute the standardized name from the display name
    ///
    /// Runs at most once per record. Returns false when the name was already
    /// set or there is no display name.
    pub fn standardize(&mut self) -> bool {
        if self.standardized_name.is_some() {
            return false;
        }
        let Some(display) = &self.display_name else {
            return false;
        };
        self.standardized_name = Some(display.replace(' ', "_"));
        true
    }

    /// Whether the status is one of `success_statuses`
    pub fn is_success(&self, success_statuses: &[String]) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| success_statuses.iter().any(|ok| ok == s))
    }

    /// Directory holding the finished payload: final dir when set, else dest dir
    pub fn search_dir(&self) -> Option<&Path> {
        [&self.final_dir, &self.dest_dir]
            .into_iter()
            .flatten()
            .map(|d| d.trim())
            .find(|d| !d.is_empty())
            .map(Path::new)
    }

    /// Standardized name with its trailing `_<suffix>` removed
    ///
    /// `My_Show_S01E02` becomes `My_Show`, which groups episodes of one series
    /// under a single destination folder.
    pub fn remote_folder_name(&self) -> Option<&str> {
        let name = self.standardized_name.as_deref()?;
        Some(match name.rsplit_once('_') {
            Some((folder, _)) if !folder.is_empty() => folder,
            _ => name,
        })
    }

    /// Destination for the renamed payload under `root`
    pub fn remote_destination(&self, root: &Path) -> Option<PathBuf> {
        let file_name = self.renamed_path.as_deref()?.file_name()?;
        Some(root.join(self.remote_folder_name()?).join(file_name))
    }

    /// Find the payload and rename it to `<standardized name><extension>`
    ///
    /// Renaming onto the same path is a successful no-op, so retrying a job
    /// whose transfer failed is harmless.
    pub async fn rename_payload(&mut self) -> Result<PathBuf> {
        self.standardize();
        let name = self
            .standardized_name
            .clone()
            .ok_or_else(|| CollaboratorError::Daemon(format!("job {} has no name", self.job_id)))?;
        let dir = self
            .search_dir()
            .ok_or_else(|| CollaboratorError::VideoNotFound {
                dir: PathBuf::new(),
            })?
            .to_path_buf();

        let source = locate_video_file(&dir).await?;
        let extension = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let target = dir.join(format!("{name}{extension}"));

        if source != target {
            tokio::fs::rename(&source, &target).await?;
            tracing::info!(
                job_id = self.job_id,
                from = %source.display(),
                to = %target.display(),
                "renamed payload"
            );
        } else {
            tracing::debug!(job_id = self.job_id, path = %target.display(), "payload already renamed");
        }

        self.renamed_path = Some(target.clone());
        Ok(target)
    }
}

/// Largest non-sample video file directly inside `dir`
pub async fn locate_video_file(dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|_| CollaboratorError::VideoNotFound {
            dir: dir.to_path_buf(),
        })?;

    let mut best: Option<(u64, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        if !is_video_file(&path) {
            continue;
        }
        let replace = match &best {
            Some((size, current)) => {
                metadata.len() > *size || (metadata.len() == *size && path < *current)
            }
            None => true,
        };
        if replace {
            best = Some((metadata.len(), path));
        }
    }

    best.map(|(_, path)| path).ok_or_else(|| {
        CollaboratorError::VideoNotFound {
            dir: dir.to_path_buf(),
        }
        .into()
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn record(name: &str, dir: &Path) -> JobRecord {
        JobRecord {
            job_id: 7,
            display_name: Some(name.to_string()),
            dest_dir: Some(dir.to_string_lossy().into_owned()),
            status: Some("SUCCESS/UNPACK".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_standardize_runs_once() {
        let mut job = JobRecord {
            display_name: Some("My Show S01E02".into()),
            ..Default::default()
        };
        assert!(job.standardize());
        assert_eq!(job.standardized_name.as_deref(), Some("My_Show_S01E02"));

        job.display_name = Some("Other Name".into());
        assert!(!job.standardize());
        assert_eq!(job.standardized_name.as_deref(), Some("My_Show_S01E02"));
    }

    #[test]
    fn test_standardize_without_display_name() {
        let mut job = JobRecord::default();
        assert!(!job.standardize());
        assert!(job.standardized_name.is_none());
    }

    #[test]
    fn test_is_success() {
        let ok = vec!["SUCCESS/UNPACK".to_string(), "SUCCESS/ALL".to_string()];
        let mut job = JobRecord {
            status: Some("SUCCESS/ALL".into()),
            ..Default::default()
        };
        assert!(job.is_success(&ok));
        job.status = Some("FAILURE/PAR".into());
        assert!(!job.is_success(&ok));
        job.status = None;
        assert!(!job.is_success(&ok));
    }

    #[test]
    fn test_search_dir_prefers_final_dir() {
        let mut job = JobRecord {
            dest_dir: Some("/dl/inter".into()),
            final_dir: Some("".into()),
            ..Default::default()
        };
        assert_eq!(job.search_dir(), Some(Path::new("/dl/inter")));
        job.final_dir = Some("/dl/done".into());
        assert_eq!(job.search_dir(), Some(Path::new("/dl/done")));
    }

    #[test]
    fn test_remote_folder_name_strips_last_suffix() {
        let mut job = JobRecord {
            display_name: Some("My Show S01E02".into()),
            ..Default::default()
        };
        job.standardize();
        assert_eq!(job.remote_folder_name(), Some("My_Show"));

        let mut single = JobRecord {
            display_name: Some("Movie".into()),
            ..Default::default()
        };
        single.standardize();
        assert_eq!(single.remote_folder_name(), Some("Movie"));
    }

    #[tokio::test]
    async fn test_rename_payload() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("raw.mkv"), b"video").await.unwrap();
        tokio::fs::write(dir.path().join("raw-sample.mkv"), b"sample-clip-bigger").await.unwrap();
        tokio::fs::write(dir.path().join("info.nfo"), b"text").await.unwrap();

        let mut job = record("My Show S01E02", dir.path());
        let renamed = job.rename_payload().await.unwrap();

        assert_eq!(renamed, dir.path().join("My_Show_S01E02.mkv"));
        assert!(renamed.exists());
        assert!(!dir.path().join("raw.mkv").exists());
        assert!(dir.path().join("raw-sample.mkv").exists());
        assert_eq!(
            job.remote_destination(Path::new("/media")),
            Some(PathBuf::from("/media/My_Show/My_Show_S01E02.mkv"))
        );
    }

    #[tokio::test]
    async fn test_rename_onto_itself_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("My_Show_S01E02.mkv"), b"video").await.unwrap();

        let mut job = record("My Show S01E02", dir.path());
        let renamed = job.rename_payload().await.unwrap();
        assert_eq!(renamed, dir.path().join("My_Show_S01E02.mkv"));
        assert!(renamed.exists());
    }

    #[tokio::test]
    async fn test_locate_prefers_largest_video() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.avi"), b"12").await.unwrap();
        tokio::fs::write(dir.path().join("b.MKV"), b"123456").await.unwrap();

        let found = locate_video_file(dir.path()).await.unwrap();
        assert_eq!(found, dir.path().join("b.MKV"));
    }

    #[tokio::test]
    async fn test_locate_without_video_fails() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("readme.txt"), b"x").await.unwrap();

        let err = locate_video_file(dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Collaborator(CollaboratorError::VideoNotFound { .. })
        ));
    }
}
