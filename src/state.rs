use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::error::StateError;

/// Persisted progress of one download.
///
/// `resume_offset` only moves forward through [`TransferState::advance`], which
/// the engine calls after a chunk has been written to the output file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferState {
    url: String,
    output_path: PathBuf,
    resume_offset: u64,
    #[serde(rename = "contentLength")]
    declared_content_length: u64,
    total_size: u64,
}

impl TransferState {
    pub fn new(url: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output_path: output_path.into(),
            resume_offset: 0,
            declared_content_length: 0,
            total_size: 0,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn resume_offset(&self) -> u64 {
        self.resume_offset
    }

    pub fn declared_content_length(&self) -> u64 {
        self.declared_content_length
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// True once a known total size has been reached.
    pub fn is_complete(&self) -> bool {
        self.total_size > 0 && self.resume_offset >= self.total_size
    }

    /// Records `written` bytes that are already on disk.
    pub fn advance(&mut self, written: u64) {
        self.resume_offset += written;
    }

    pub fn set_declared_content_length(&mut self, length: u64) {
        self.declared_content_length = length;
    }

    pub fn set_total_size(&mut self, total: u64) {
        self.total_size = total;
    }

    /// Drops all progress. Used when the output file is rewritten from byte 0,
    /// which starts a new lifetime for the offset.
    pub fn restart(&mut self) {
        self.resume_offset = 0;
        self.declared_content_length = 0;
        self.total_size = 0;
    }

    fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("url is empty".to_string());
        }
        if self.output_path.as_os_str().is_empty() {
            return Err("outputPath is empty".to_string());
        }
        if self.total_size > 0 && self.resume_offset > self.total_size {
            return Err(format!(
                "resumeOffset {} exceeds totalSize {}",
                self.resume_offset, self.total_size
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn at_offset(mut self, resume_offset: u64, total_size: u64) -> Self {
        self.resume_offset = resume_offset;
        self.total_size = total_size;
        self
    }
}

/// JSON state file for a single transfer. The path is the transfer's identity.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<TransferState, StateError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let state: TransferState =
            serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;
        state.validate().map_err(|reason| self.corrupt(reason))?;
        Ok(state)
    }

    /// Replaces the state file with a complete snapshot of `state`.
    ///
    /// The snapshot goes to a sibling temp file first and is renamed into
    /// place, so a torn write never leaves a half-written state file behind.
    pub async fn save(&self, state: &TransferState) -> Result<(), StateError> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| self.corrupt(format!("failed to serialize state: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = File::create(&temp_path).await.map_err(|e| self.io_error(e))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| self.io_error(e))?;
            file.sync_all().await.map_err(|e| self.io_error(e))?;
        }

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn corrupt(&self, reason: String) -> StateError {
        StateError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }

    fn io_error(&self, source: std::io::Error) -> StateError {
        StateError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
