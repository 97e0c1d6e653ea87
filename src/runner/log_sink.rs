//! Per-job log files.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;

/// Destination for a run's output. Failures never affect the run.
pub trait LogSink: Send + Sync {
    fn started(&self, job_id: &str);
    fn line(&self, job_id: &str, line: &str);
    fn finished(&self, job_id: &str, exit_code: i32);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn started(&self, _job_id: &str) {}
    fn line(&self, _job_id: &str, _line: &str) {}
    fn finished(&self, _job_id: &str, _exit_code: i32) {}
}

/// Appends to `<dir>/<job_id>.log`, one timestamped line per entry.
///
/// The file stays open and buffered for the length of a run and is flushed
/// and closed on `finished`. Clones share the open files.
#[derive(Debug, Clone)]
pub struct FileLogSink {
    dir: PathBuf,
    open: Arc<Mutex<HashMap<String, BufWriter<File>>>>,
}

impl FileLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            open: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}.log", job_id))
    }

    /// Write one entry, opening the run's file on first use. `close` flushes
    /// and releases it.
    fn append(&self, job_id: &str, text: &str, close: bool) {
        let mut open = match self.open.lock() {
            Ok(open) => open,
            Err(e) => {
                log::warn!("Job log table poisoned, dropping entry for {}: {}", job_id, e);
                return;
            }
        };

        let result = match open.get_mut(job_id) {
            Some(writer) => write_line(writer, text),
            None => match open_log(&self.dir, &self.path_for(job_id)) {
                Ok(mut writer) => {
                    let result = write_line(&mut writer, text);
                    open.insert(job_id.to_string(), writer);
                    result
                }
                Err(e) => Err(e),
            },
        };
        if let Err(e) = result {
            log::warn!("Failed to write job log for {}: {}", job_id, e);
        }

        if close
            && let Some(mut writer) = open.remove(job_id)
            && let Err(e) = writer.flush()
        {
            log::warn!("Failed to flush job log for {}: {}", job_id, e);
        }
    }

    #[cfg(test)]
    fn open_files(&self) -> usize {
        self.open.lock().map(|open| open.len()).unwrap_or(0)
    }
}

fn open_log(dir: &Path, path: &Path) -> std::io::Result<BufWriter<File>> {
    fs::create_dir_all(dir)?;
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn write_line(writer: &mut BufWriter<File>, text: &str) -> std::io::Result<()> {
    writeln!(writer, "[{}] {}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"), text)
}

impl LogSink for FileLogSink {
    fn started(&self, job_id: &str) {
        self.append(job_id, "started", false);
    }

    fn line(&self, job_id: &str, line: &str) {
        self.append(job_id, line, false);
    }

    fn finished(&self, job_id: &str, exit_code: i32) {
        self.append(job_id, &format!("finished with code {}", exit_code), true);
    }
}
