use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::AppError;

/// Uploaded reference clips and generated outputs, keyed by a random id.
///
/// Files are never tracked or cleaned up by the server.
#[derive(Debug, Clone)]
pub struct JobStore {
    uploads_dir: PathBuf,
    outputs_dir: PathBuf,
}

/// One synthesis request and the two files that belong to it.
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    pub id: Uuid,
    pub reference_path: PathBuf,
    pub output_path: PathBuf,
}

impl JobStore {
    pub fn open(uploads_dir: impl Into<PathBuf>, outputs_dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let store = Self {
            uploads_dir: uploads_dir.into(),
            outputs_dir: outputs_dir.into(),
        };

        std::fs::create_dir_all(&store.uploads_dir)?;
        std::fs::create_dir_all(&store.outputs_dir)?;

        Ok(store)
    }

    pub fn new_job(&self) -> SynthesisJob {
        let id = Uuid::new_v4();
        SynthesisJob {
            id,
            reference_path: self.reference_path(&id),
            output_path: self.output_path(&id),
        }
    }

    pub async fn save_reference(&self, job: &SynthesisJob, audio: &[u8]) -> Result<(), AppError> {
        tokio::fs::write(&job.reference_path, audio).await?;
        tracing::debug!(
            "Saved {} bytes of reference audio to {}",
            audio.len(),
            job.reference_path.display()
        );
        Ok(())
    }

    /// Path of a finished output, if `file_id` names one.
    pub fn find_output(&self, file_id: &str) -> Option<PathBuf> {
        // Only ids we could have generated ever touch the filesystem
        let id = Uuid::parse_str(file_id).ok()?;
        // One name per file: the hyphenated form handed out by new_job
        if id.hyphenated().to_string() != file_id {
            return None;
        }
        let path = self.output_path(&id);
        path.is_file().then_some(path)
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs_dir
    }

    fn reference_path(&self, id: &Uuid) -> PathBuf {
        self.uploads_dir.join(format!("{}.wav", id))
    }

    fn output_path(&self, id: &Uuid) -> PathBuf {
        self.outputs_dir.join(format!("{}_output.wav", id))
    }
}
