//! Bounded-memory streaming transform for oversized files
//!
//! ```text
//! ┌──────────┐  bytes   ┌─────────────┐  text   ┌────────────┐
//! │  source  │─────────▶│  transform  │────────▶│    sink    │
//! │ (chunks) │  mpsc(n) │ decode+rules│ mpsc(n) │ temp file  │
//! └──────────┘          └─────────────┘         └────────────┘
//! ```
//!
//! The three stages run concurrently on the calling task. The first stage to
//! fail aborts the others, and the temp file is removed by its guard on every
//! exit path. Only when the content changed does the temp file replace the
//! original, by rename within the same directory.

use crate::error::EngineError;
use crate::transform::{RuleSet, StreamingRules};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    pub changed: bool,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub chunks: usize,
}

#[derive(Debug, Clone)]
pub struct StreamingPipeline {
    chunk_bytes: usize,
    channel_depth: usize,
}

impl StreamingPipeline {
    pub fn new(chunk_bytes: usize) -> Self {
        Self {
            chunk_bytes: chunk_bytes.max(1),
            channel_depth: 2,
        }
    }

    pub fn with_channel_depth(mut self, depth: usize) -> Self {
        self.channel_depth = depth.max(1);
        self
    }

    /// Upper bound on file content held in channels at once
    pub fn max_in_flight_bytes(&self) -> usize {
        self.chunk_bytes * self.channel_depth * 2
    }

    /// Stream `path` through `rules`, replacing it when the output differs
    /// (unless `dry_run`).
    pub async fn run(
        &self,
        path: &Path,
        rules: &RuleSet,
        dry_run: bool,
    ) -> Result<StreamOutcome, EngineError> {
        let source = tokio::fs::File::open(path)
            .await
            .map_err(|e| EngineError::stream(path, format!("open source: {e}")))?;
        let permissions = source
            .metadata()
            .await
            .map_err(|e| EngineError::stream(path, format!("stat source: {e}")))?
            .permissions();

        let guard = create_temp_beside(path).await?;
        let sink_handle = guard
            .as_file()
            .try_clone()
            .map_err(|e| EngineError::stream(path, format!("open temp file: {e}")))?;
        let sink = tokio::fs::File::from_std(sink_handle);

        let (bytes_tx, bytes_rx) = mpsc::channel::<Vec<u8>>(self.channel_depth);
        let (text_tx, text_rx) = mpsc::channel::<String>(self.channel_depth);

        let (bytes_in, (changed, chunks), bytes_out) = tokio::try_join!(
            read_stage(path, source, self.chunk_bytes, bytes_tx),
            transform_stage(path, rules.streaming(), bytes_rx, text_tx),
            write_stage(path, sink, text_rx),
        )?;

        if changed && !dry_run {
            let target = path.to_path_buf();
            tokio::task::spawn_blocking(move || persist(guard, &target, permissions))
                .await
                .map_err(|e| EngineError::stream(path, format!("persist task: {e}")))??;
        }

        tracing::debug!(
            "streamed {} ({} bytes in, {} bytes out, {} chunks, changed: {})",
            path.display(),
            bytes_in,
            bytes_out,
            chunks,
            changed
        );

        Ok(StreamOutcome {
            changed,
            bytes_in,
            bytes_out,
            chunks,
        })
    }
}

async fn create_temp_beside(path: &Path) -> Result<NamedTempFile, EngineError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let owner = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(".chunkshift-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| EngineError::stream(&owner, format!("create temp file: {e}")))
    })
    .await
    .map_err(|e| EngineError::stream(path, format!("temp file task: {e}")))?
}

fn persist(
    guard: NamedTempFile,
    target: &Path,
    permissions: std::fs::Permissions,
) -> Result<(), EngineError> {
    std::fs::set_permissions(guard.path(), permissions)
        .map_err(|e| EngineError::stream(target, format!("copy permissions: {e}")))?;
    guard
        .persist(target)
        .map_err(|e| EngineError::stream(target, format!("replace original: {}", e.error)))?;
    Ok(())
}

async fn read_stage(
    path: &Path,
    mut source: tokio::fs::File,
    chunk_bytes: usize,
    tx: mpsc::Sender<Vec<u8>>,
) -> Result<u64, EngineError> {
    let mut total = 0u64;
    loop {
        let mut buf = vec![0u8; chunk_bytes];
        let read = source
            .read(&mut buf)
            .await
            .map_err(|e| EngineError::stream(path, format!("read: {e}")))?;
        if read == 0 {
            return Ok(total);
        }
        buf.truncate(read);
        total += read as u64;
        tx.send(buf)
            .await
            .map_err(|_| EngineError::stream(path, "transform stage closed"))?;
    }
}

async fn transform_stage(
    path: &Path,
    mut rules: StreamingRules,
    mut rx: mpsc::Receiver<Vec<u8>>,
    tx: mpsc::Sender<String>,
) -> Result<(bool, usize), EngineError> {
    let mut decoder = Utf8Decoder::default();
    let mut diff = ChangeTracker::default();
    let mut chunks = 0;

    while let Some(bytes) = rx.recv().await {
        chunks += 1;
        let text = decoder.push(&bytes).map_err(|message| EngineError::stream(path, message))?;
        let output = rules.push(&text);
        diff.observe(&text, &output);
        if !output.is_empty() {
            tx.send(output)
                .await
                .map_err(|_| EngineError::stream(path, "sink stage closed"))?;
        }
    }

    decoder.finish().map_err(|message| EngineError::stream(path, message))?;
    let tail = rules.finish();
    diff.observe("", &tail);
    if !tail.is_empty() {
        tx.send(tail)
            .await
            .map_err(|_| EngineError::stream(path, "sink stage closed"))?;
    }

    Ok((diff.changed(), chunks))
}

async fn write_stage(
    path: &Path,
    sink: tokio::fs::File,
    mut rx: mpsc::Receiver<String>,
) -> Result<u64, EngineError> {
    let mut writer = BufWriter::new(sink);
    let mut total = 0u64;
    while let Some(text) = rx.recv().await {
        writer
            .write_all(text.as_bytes())
            .await
            .map_err(|e| EngineError::stream(path, format!("write: {e}")))?;
        total += text.len() as u64;
    }
    writer
        .flush()
        .await
        .map_err(|e| EngineError::stream(path, format!("flush: {e}")))?;
    Ok(total)
}

/// Incremental UTF-8 decoding that carries split code points across chunks
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
    offset: u64,
}

impl Utf8Decoder {
    fn push(&mut self, bytes: &[u8]) -> Result<String, String> {
        self.pending.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(format!(
                    "invalid UTF-8 at byte {}",
                    self.offset + e.valid_up_to() as u64
                ));
            }
        };
        let rest = self.pending.split_off(valid);
        let decoded = std::mem::replace(&mut self.pending, rest);
        self.offset += valid as u64;
        String::from_utf8(decoded).map_err(|e| e.to_string())
    }

    fn finish(&self) -> Result<(), String> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(format!("truncated UTF-8 sequence at byte {}", self.offset))
        }
    }
}

/// Compares input and output streams as they pass, holding only the lag between them
#[derive(Default)]
struct ChangeTracker {
    input: Vec<u8>,
    output: Vec<u8>,
    changed: bool,
}

impl ChangeTracker {
    fn observe(&mut self, input: &str, output: &str) {
        if self.changed {
            return;
        }
        self.input.extend_from_slice(input.as_bytes());
        self.output.extend_from_slice(output.as_bytes());

        let common = self.input.len().min(self.output.len());
        if self.input[..common] != self.output[..common] {
            self.changed = true;
            self.input.clear();
            self.output.clear();
            return;
        }
        self.input.drain(..common);
        self.output.drain(..common);
    }

    fn changed(&self) -> bool {
        self.changed || self.input.len() != self.output.len()
    }
}
