use crate::error::{Error, Result};
use crate::JobRecord;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

pub const HEADER: [&str; 4] = ["task_id", "plain_text", "status", "url"];

/// Flat CSV log of submitted tasks, keyed by `task_id`.
///
/// The whole table is read and rewritten on every update. There is no
/// locking; only one client process may write the file at a time.
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the file with just the header row if it does not exist yet.
    pub fn ensure_initialized(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::storage(&self.path, e))?;
        }
        tracing::debug!(path = %self.path.display(), "creating job log");
        self.write_all(&[])
    }

    pub fn list_all(&self) -> Result<Vec<JobRecord>> {
        self.ensure_initialized()?;
        let file = File::open(&self.path).map_err(|e| Error::storage(&self.path, e))?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
        reader
            .deserialize::<JobRecord>()
            .map(|row| row.map_err(|e| Error::storage(&self.path, e)))
            .collect()
    }

    pub fn find(&self, task_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.list_all()?.into_iter().find(|r| r.task_id == task_id))
    }

    /// Records the latest observation for `task_id`.
    ///
    /// The status is always overwritten. The URL and description are only
    /// overwritten by non-empty values, so a transient empty response never
    /// erases what was already known.
    pub fn upsert(
        &self,
        task_id: &str,
        description: &str,
        status: &str,
        result_url: &str,
    ) -> Result<JobRecord> {
        let mut records = self.list_all()?;

        let record = match records.iter_mut().find(|r| r.task_id == task_id) {
            Some(existing) => {
                existing.status = status.to_string();
                if !result_url.is_empty() {
                    existing.result_url = result_url.to_string();
                }
                if !description.is_empty() {
                    existing.description = description.to_string();
                }
                existing.clone()
            }
            None => {
                let record = JobRecord {
                    task_id: task_id.to_string(),
                    description: description.to_string(),
                    status: status.to_string(),
                    result_url: result_url.to_string(),
                };
                records.push(record.clone());
                record
            }
        };

        self.write_all(&records)?;
        tracing::debug!(task_id, status, "job log updated");
        Ok(record)
    }

    fn write_all(&self, records: &[JobRecord]) -> Result<()> {
        let file = File::create(&self.path).map_err(|e| Error::storage(&self.path, e))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .write_record(HEADER)
            .map_err(|e| Error::storage(&self.path, e))?;
        for record in records {
            writer
                .serialize(record)
                .map_err(|e| Error::storage(&self.path, e))?;
        }
        writer.flush().map_err(|e| Error::storage(&self.path, e))
    }
}
