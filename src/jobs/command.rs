//! Jobs backed by an external program.
//!
//! The child inherits these environment variables:
//!
//! - `HARVESTR_JOB_ID`, `HARVESTR_JOB_NAME`, `HARVESTR_SOURCE`
//! - `HARVESTR_RECORDS_FILE`: where to write collected records, one JSON
//!   object per line
//!
//! stdout and stderr are streamed to the runner line by line.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{Job, JobContext, JobOutput};
use crate::config::ExecutorConfig;
use crate::domain::{JobDescriptor, Record};
use crate::error::{HarvestrError, Result};

/// Fields the store manages; ignored when a child reports them
const RESERVED_FIELDS: &[&str] = &["external_id", "source", "created_at", "updated_at", "change_log"];

/// Runs one external program per job run.
#[derive(Debug, Clone)]
pub struct CommandJob {
    config: ExecutorConfig,
    /// Directory for per-run records files
    records_dir: PathBuf,
}

impl CommandJob {
    pub fn new(config: ExecutorConfig, records_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            records_dir: records_dir.into(),
        }
    }

    /// Arguments with `{id}`, `{name}` and `{source}` substituted
    fn render_args(&self, job: &JobDescriptor) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{id}", &job.id)
                    .replace("{name}", &job.name)
                    .replace("{source}", &job.source)
            })
            .collect()
    }

    fn records_path(&self, job: &JobDescriptor) -> PathBuf {
        let stamp = chrono::Utc::now().timestamp_millis();
        self.records_dir.join(format!("{}-{}.jsonl", job.id, stamp))
    }

    fn read_records(path: &Path, source: &str) -> Result<Vec<Record>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let bytes = std::fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);
        let mut records = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_record_line(line, source) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping record line {} in {}: {}", n + 1, path.display(), e),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Job for CommandJob {
    async fn run(&self, ctx: JobContext) -> Result<JobOutput> {
        let job = &ctx.job;
        std::fs::create_dir_all(&self.records_dir)?;
        let records_path = self.records_path(job);

        let mut cmd = Command::new(&self.config.command);
        cmd.args(self.render_args(job))
            .envs(&self.config.env)
            .env("HARVESTR_JOB_ID", &job.id)
            .env("HARVESTR_JOB_NAME", &job.name)
            .env("HARVESTR_SOURCE", &job.source)
            .env("HARVESTR_RECORDS_FILE", &records_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| HarvestrError::Executor(format!("Failed to spawn {}: {}", self.config.command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarvestrError::Executor("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HarvestrError::Executor("stderr not captured".to_string()))?;

        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        let (mut stdout_buf, mut stderr_buf) = (Vec::new(), Vec::new());
        let (mut stdout_done, mut stderr_done) = (false, false);

        while !(stdout_done && stderr_done) {
            tokio::select! {
                line = read_line_lossy(&mut stdout, &mut stdout_buf), if !stdout_done => match line? {
                    Some(line) => ctx.emit(line),
                    None => stdout_done = true,
                },
                line = read_line_lossy(&mut stderr, &mut stderr_buf), if !stderr_done => match line? {
                    Some(line) => ctx.emit(line),
                    None => stderr_done = true,
                },
            }
        }

        let status = child.wait().await?;
        // Killed by a signal counts as a failure
        let exit_code = status.code().unwrap_or(1);

        let records = Self::read_records(&records_path, &job.source)?;
        if records_path.exists()
            && let Err(e) = std::fs::remove_file(&records_path)
        {
            log::warn!("Failed to remove {}: {}", records_path.display(), e);
        }

        log::debug!(
            "{} exited with {} and reported {} records",
            self.config.command,
            exit_code,
            records.len()
        );
        Ok(JobOutput { exit_code, records })
    }
}

/// Next line of child output, undecodable bytes replaced. `None` at EOF.
///
/// Bytes read before a cancelled call stay in `buf` and are picked up by the
/// next call, so this is safe to use as a `select!` branch.
async fn read_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    reader.read_until(b'\n', buf).await?;
    if buf.is_empty() {
        return Ok(None);
    }

    let mut end = buf.len();
    while end > 0 && matches!(buf[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    let line = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.clear();
    Ok(Some(line))
}

/// Parse one line a job wrote to its records file.
///
/// The line must be a JSON object with an `external_id` (string or number).
/// Store-managed fields are dropped and `source` is set to the job's source.
pub fn parse_record_line(line: &str, source: &str) -> Result<Record> {
    let mut fields: Map<String, Value> = serde_json::from_str(line)?;

    let external_id = match fields.get("external_id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return Err(HarvestrError::Executor("record without external_id".to_string())),
    };

    for name in RESERVED_FIELDS {
        fields.remove(*name);
    }

    let mut record = Record::new(&external_id, source);
    record.fields = fields;
    Ok(record)
}
