//! Per-file transform task
//!
//! stat → cache lookup or read → backup → transform → write if changed.
//! Every failure is captured into the returned [`TaskOutcome`]; nothing here
//! panics or propagates past the task boundary.

use super::discovery::FileDescriptor;
use super::stats::{TaskOutcome, TaskStatus};
use crate::cache::ContentCache;
use crate::error::{EngineError, FileError};
use crate::parallel::PoolHandle;
use crate::transform::{StreamingPipeline, Transformer};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Operation name recorded on per-file errors
pub const OPERATION: &str = "transform_file";

/// Everything a task needs, shared read-only across one run
pub(crate) struct TaskContext {
    /// `None` when caching is disabled
    pub cache: Option<Arc<RwLock<ContentCache>>>,
    pub transformer: Transformer,
    pub pool: Option<PoolHandle>,
    pub pipeline: StreamingPipeline,
    pub root: PathBuf,
    /// `<backup_dir>/<run-id>`
    pub backup_root: PathBuf,
    pub dry_run: bool,
    pub use_streaming: bool,
    pub streaming_threshold: u64,
    pub max_file_size: u64,
}

impl TaskContext {
    /// Backup location mirroring `path` relative to the root
    pub fn backup_path_for(&self, path: &Path) -> PathBuf {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let mut target = self.backup_root.clone();
        for component in relative.components() {
            if let Component::Normal(part) = component {
                target.push(part);
            }
        }
        target
    }
}

pub(crate) async fn transform_file(ctx: Arc<TaskContext>, file: FileDescriptor) -> TaskOutcome {
    let mut outcome = TaskOutcome::new(file.path.clone());

    if let Err(error) = run_steps(&ctx, &file, &mut outcome).await {
        tracing::warn!("{}: {}", file.path.display(), error);
        outcome.status = TaskStatus::Failed(FileError::new(OPERATION, &file.path, &error));
    }
    outcome
}

async fn run_steps(
    ctx: &TaskContext,
    file: &FileDescriptor,
    outcome: &mut TaskOutcome,
) -> Result<(), EngineError> {
    let path = file.path.as_path();

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| EngineError::read(path, e))?;
    let mtime = metadata.modified().map_err(|e| EngineError::read(path, e))?;
    let size = metadata.len();
    outcome.size_bytes = size;

    let streamed = ctx.use_streaming || size > ctx.streaming_threshold;
    if !streamed && size > ctx.max_file_size {
        tracing::debug!("{}: {} bytes exceeds max_file_size, skipping", path.display(), size);
        outcome.status = TaskStatus::Skipped(format!(
            "{size} bytes exceeds max_file_size of {} bytes",
            ctx.max_file_size
        ));
        return Ok(());
    }

    if streamed {
        return stream_file(ctx, path, outcome).await;
    }

    let (content, cache_hit) = match cached_content(ctx, path, mtime) {
        Some(content) => (content, true),
        None => {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| EngineError::read(path, e))?;
            (content, false)
        }
    };
    outcome.cache_hit = cache_hit;
    outcome.cache_checked = ctx.cache.is_some();
    if ctx.cache.is_some() && !cache_hit {
        outcome.fresh_content = Some((content.clone(), mtime));
    }

    let backup = ctx.backup_path_for(path);
    write_backup(path, &backup, &content).await?;
    outcome.backup_path = Some(backup);

    let transformed = match &ctx.pool {
        Some(pool) => pool.transform(path.to_path_buf(), content.clone()).await?,
        None => ctx.transformer.apply(path, &content)?,
    };
    outcome.warnings.extend(transformed.warning);

    if transformed.content == content {
        tracing::debug!("{}: unchanged", path.display());
        return Ok(());
    }
    outcome.changed = true;

    if ctx.dry_run {
        tracing::debug!("{}: would change (dry run)", path.display());
        return Ok(());
    }

    tokio::fs::write(path, transformed.content.as_bytes())
        .await
        .map_err(|e| EngineError::write(path, e))?;
    tracing::debug!("{}: written", path.display());

    // Cache what is now on disk so an identical rerun is served from memory
    if ctx.cache.is_some() {
        outcome.fresh_content = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(new_mtime) => Some((transformed.content, new_mtime)),
            Err(_) => None,
        };
    }
    Ok(())
}

fn cached_content(ctx: &TaskContext, path: &Path, mtime: std::time::SystemTime) -> Option<String> {
    let cache = ctx.cache.as_ref()?;
    let guard = cache.read().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.peek(path, mtime).map(str::to_owned)
}

async fn write_backup(path: &Path, backup: &Path, content: &str) -> Result<(), EngineError> {
    if let Some(parent) = backup.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::backup(path, backup, e))?;
    }
    tokio::fs::write(backup, content.as_bytes())
        .await
        .map_err(|e| EngineError::backup(path, backup, e))
}

async fn stream_file(
    ctx: &TaskContext,
    path: &Path,
    outcome: &mut TaskOutcome,
) -> Result<(), EngineError> {
    outcome.streamed = true;

    let backup = ctx.backup_path_for(path);
    if let Some(parent) = backup.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::backup(path, &backup, e))?;
    }
    tokio::fs::copy(path, &backup)
        .await
        .map_err(|e| EngineError::backup(path, &backup, e))?;
    outcome.backup_path = Some(backup);

    if ctx.transformer.has_provider() {
        outcome.warnings.push(format!(
            "{}: streamed with literal rules only, provider skipped",
            path.display()
        ));
    }

    let result = ctx.pipeline.run(path, ctx.transformer.rules(), ctx.dry_run).await?;
    outcome.changed = result.changed;
    outcome.size_bytes = result.bytes_in;
    tracing::debug!(
        "{}: streamed {} chunks, {} -> {} bytes",
        path.display(),
        result.chunks,
        result.bytes_in,
        result.bytes_out
    );
    Ok(())
}
