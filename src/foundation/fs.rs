use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::foundation::error::{ClipmarkError, ClipmarkResult};

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> ClipmarkResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Output file that is written under a `.partial` sibling name and only moved to its final
/// location by [`PartialOutput::commit`].
///
/// Dropping an uncommitted guard removes the partial file, so an aborted run never leaves a
/// half-written artifact behind.
#[derive(Debug)]
pub struct PartialOutput {
    final_path: PathBuf,
    partial_path: PathBuf,
    committed: bool,
}

impl PartialOutput {
    pub fn new(final_path: impl Into<PathBuf>) -> ClipmarkResult<Self> {
        let final_path = final_path.into();
        if final_path.file_name().is_none() {
            return Err(ClipmarkError::validation(format!(
                "output path '{}' has no file name",
                final_path.display()
            )));
        }
        ensure_parent_dir(&final_path)?;

        let mut name = final_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".partial");
        let partial_path = final_path.with_file_name(name);

        Ok(Self {
            final_path,
            partial_path,
            committed: false,
        })
    }

    /// Path writers should target while the run is in progress.
    pub fn path(&self) -> &Path {
        &self.partial_path
    }

    /// Move the finished file into place.
    pub fn commit(mut self) -> ClipmarkResult<PathBuf> {
        std::fs::rename(&self.partial_path, &self.final_path).with_context(|| {
            format!(
                "failed to move '{}' to '{}'",
                self.partial_path.display(),
                self.final_path.display()
            )
        })?;
        self.committed = true;
        Ok(self.final_path.clone())
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.partial_path) {
            Ok(()) => tracing::debug!(path = %self.partial_path.display(), "removed partial output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.partial_path.display(),
                error = %e,
                "failed to remove partial output"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "clipmark_fs_{tag}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn dropped_guard_removes_partial_file() {
        let dir = scratch_dir("drop");
        let out = PartialOutput::new(dir.join("out.gif")).unwrap();
        std::fs::write(out.path(), b"half").unwrap();
        let partial = out.path().to_path_buf();
        assert!(partial.exists());
        drop(out);
        assert!(!partial.exists());
        assert!(!dir.join("out.gif").exists());
    }

    #[test]
    fn commit_moves_into_place() {
        let dir = scratch_dir("commit");
        let out = PartialOutput::new(dir.join("out.zip")).unwrap();
        assert!(out.path().to_string_lossy().ends_with("out.zip.partial"));
        std::fs::write(out.path(), b"done").unwrap();
        let final_path = out.commit().unwrap();
        assert_eq!(std::fs::read(&final_path).unwrap(), b"done");
    }
}
