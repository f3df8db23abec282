use crate::config::OutputFormat;
use crate::state::Snapshot;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode snapshot as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to encode snapshot as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write temporary file next to {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to replace {path}: {source}")]
    Replace {
        path: String,
        source: std::io::Error,
    },
}

/// Destination of assembled snapshots.
pub trait SnapshotSink: Send {
    fn publish(&mut self, snapshot: &Snapshot) -> Result<(), PublishError>;
}

/// Replaces a file with the latest snapshot on every publish.
///
/// The document is written to a temporary file in the target directory and
/// renamed over the target, so readers see either the old or the new
/// snapshot, never a partial one.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
    format: OutputFormat,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn render(&self, snapshot: &Snapshot) -> Result<Vec<u8>, PublishError> {
        Ok(match self.format {
            OutputFormat::Yaml => serde_yaml::to_string(snapshot)?.into_bytes(),
            OutputFormat::Json => serde_json::to_vec_pretty(snapshot)?,
        })
    }

    fn write_err(&self, source: std::io::Error) -> PublishError {
        PublishError::Write {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl SnapshotSink for FileSink {
    fn publish(&mut self, snapshot: &Snapshot) -> Result<(), PublishError> {
        let body = self.render(snapshot)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.write_err(e))?;
        tmp.write_all(&body).map_err(|e| self.write_err(e))?;
        tmp.flush().map_err(|e| self.write_err(e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Temp files are created 0600; consumers may run as another user.
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))
                .map_err(|e| self.write_err(e))?;
        }

        tmp.persist(&self.path).map_err(|e| PublishError::Replace {
            path: self.path.display().to_string(),
            source: e.error,
        })?;
        trace!(path = %self.path.display(), bytes = body.len(), "snapshot published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CpuStats, DiskStats, GpuStats, MemoryStats, NetStats};

    fn snapshot(cpu_pct: f64) -> Snapshot {
        Snapshot {
            cpu: CpuStats {
                percentage: cpu_pct,
                ..CpuStats::UNAVAILABLE
            },
            gpu: GpuStats::UNAVAILABLE,
            memory: MemoryStats::from_parts(50.0, 1024, 1024),
            disk: DiskStats::UNAVAILABLE,
            net: NetStats::UNAVAILABLE,
        }
    }

    #[test]
    fn writes_yaml_and_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hardware-stats.yaml");
        let mut sink = FileSink::new(&path, OutputFormat::Yaml);

        sink.publish(&snapshot(10.0)).unwrap();
        sink.publish(&snapshot(20.0)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: Snapshot = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, snapshot(20.0));
        assert!(text.contains("Cpu:"));

        // Only the target remains, no stray temp files.
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn writes_json_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let mut sink = FileSink::new(&path, OutputFormat::Json);
        sink.publish(&snapshot(5.0)).unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["Cpu"]["percentage"], 5.0);
        assert_eq!(value["Memory"]["total"], 2048);
        assert_eq!(value["Gpu"]["is_available"], false);
    }

    #[test]
    fn missing_directory_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path().join("nope/stats.yaml"), OutputFormat::Yaml);
        let err = sink.publish(&snapshot(1.0)).unwrap_err();
        assert!(matches!(err, PublishError::Write { .. }));
    }
}
