use crate::error::TransformError;
use crate::transform::{TransformOutput, Transformer};
use crossbeam::channel::{Receiver, Sender, unbounded};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tokio::sync::oneshot;

type Reply = oneshot::Sender<Result<TransformOutput, TransformError>>;

/// A transform request sent to a worker thread
struct Job {
    path: PathBuf,
    content: String,
    reply: Reply,
}

enum Message {
    Run(Job),
    /// One per worker, queued behind all pending jobs at shutdown
    Stop,
}

/// Context for worker threads to avoid too many function parameters
struct WorkerContext {
    worker_id: usize,
    job_rx: Receiver<Message>,
    transformer: Transformer,
    completed: Arc<AtomicUsize>,
}

/// Fixed-size pool of OS threads for CPU-bound transform calls
///
/// Work flows as messages: a job goes in over a crossbeam channel, the result
/// (or error) comes back on a per-job oneshot that async callers can await.
/// [`shutdown`](Self::shutdown) stops accepting work, lets workers drain
/// everything already queued, then joins them.
pub struct WorkerPool {
    job_tx: Sender<Message>,
    workers: Vec<JoinHandle<()>>,
    completed: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

/// Cloneable submission handle, cheap to move into spawned tasks
#[derive(Clone)]
pub struct PoolHandle {
    job_tx: Sender<Message>,
    closed: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn start(size: usize, transformer: Transformer) -> std::io::Result<Self> {
        let size = size.max(1);
        let (job_tx, job_rx) = unbounded::<Message>();
        let completed = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let ctx = WorkerContext {
                worker_id,
                job_rx: job_rx.clone(),
                transformer: transformer.clone(),
                completed: completed.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("chunkshift-worker-{worker_id}"))
                .spawn(move || worker_thread(ctx))?;
            workers.push(handle);
        }

        tracing::debug!("worker pool started with {} threads", size);

        Ok(Self {
            job_tx,
            workers,
            completed,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Jobs finished since the pool started
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn handle(&self) -> Option<PoolHandle> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        Some(PoolHandle {
            job_tx: self.job_tx.clone(),
            closed: self.closed.clone(),
        })
    }

    /// Stop accepting work, drain queued jobs and join every worker
    pub fn shutdown(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for _ in 0..self.workers.len() {
            // Receivers live until the workers exit, so this cannot fail
            let _ = self.job_tx.send(Message::Stop);
        }

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked during shutdown");
            }
        }
        tracing::debug!("worker pool shut down after {} jobs", self.completed());
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl PoolHandle {
    /// Queue a transform and wait for its result
    pub async fn transform(
        &self,
        path: PathBuf,
        content: String,
    ) -> Result<TransformOutput, TransformError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransformError::PoolClosed);
        }
        let (reply, response) = oneshot::channel();
        self.job_tx
            .send(Message::Run(Job { path, content, reply }))
            .map_err(|_| TransformError::PoolClosed)?;
        response.await.map_err(|_| TransformError::PoolClosed)?
    }
}

fn worker_thread(ctx: WorkerContext) {
    while let Ok(Message::Run(job)) = ctx.job_rx.recv() {
        let result = ctx.transformer.apply(&job.path, &job.content);
        ctx.completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("worker-{} finished {}", ctx.worker_id, job.path.display());

        // Caller may have gone away; nothing to do then
        let _ = job.reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Rule, RuleSet};

    fn transformer() -> Transformer {
        Transformer::rules_only(RuleSet::new(vec![Rule::new("x", "y")]).unwrap())
    }

    #[tokio::test]
    async fn test_pool_processes_every_job() {
        let mut pool = WorkerPool::start(3, transformer()).unwrap();
        let handle = pool.handle().unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let handle = handle.clone();
            tasks.spawn(async move {
                handle.transform(PathBuf::from(format!("f{i}")), "xox".into()).await
            });
        }

        let mut results = 0;
        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap().unwrap().content, "yoy");
            results += 1;
        }
        assert_eq!(results, 20);
        assert_eq!(pool.completed(), 20);

        pool.shutdown();
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let mut pool = WorkerPool::start(1, transformer()).unwrap();
        let handle = pool.handle().unwrap();
        pool.shutdown();
        pool.shutdown();

        assert!(pool.handle().is_none());
        let result = handle.transform(PathBuf::from("late"), "x".into()).await;
        assert!(matches!(result, Err(TransformError::PoolClosed)));
    }

    #[test]
    fn test_size_has_floor() {
        let pool = WorkerPool::start(0, transformer()).unwrap();
        assert_eq!(pool.size(), 1);
    }
}
