use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};
use crate::domain::entities::{RepoDescriptor, SyncState};
use crate::ports::git::SyncPort;
use crate::services::worker::{RepoWorker, WorkerPhase};
use crate::shared::error::SyncError;
use crate::shared::result::Result;

/// 同步调度器 - 每个仓库一个固定间隔的定时器
pub struct SyncScheduler {
    git_client: Arc<dyn SyncPort>,
    workers: Mutex<Vec<Arc<RepoWorker>>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SyncScheduler {
    pub fn new(git_client: Arc<dyn SyncPort>) -> Self {
        Self {
            git_client,
            workers: Mutex::new(Vec::new()),
            timers: Mutex::new(Vec::new()),
        }
    }

    /// 注册仓库，本地路径唯一
    pub fn register(&self, repo: RepoDescriptor) -> Result<Arc<RepoWorker>> {
        let mut workers = lock(&self.workers);
        if workers.iter().any(|w| w.repo().path == repo.path) {
            return Err(SyncError::Config(format!(
                "repository already registered for {}",
                repo.path.display()
            )));
        }

        let worker = Arc::new(RepoWorker::new(repo, Arc::clone(&self.git_client)));
        workers.push(Arc::clone(&worker));
        Ok(worker)
    }

    /// 启动单个仓库
    ///
    /// 先同步一次，让配置错误和不可达的远端在进程就绪前暴露出来，
    /// 然后启动定时器。定时器不受首次同步结果影响。
    pub async fn start(&self, worker: Arc<RepoWorker>) -> Result<()> {
        let initial = worker.try_sync().await;

        let handle = tokio::spawn(Self::run_timer(Arc::clone(&worker)));
        lock(&self.timers).push(handle);

        info!(
            "Scheduled {} every {}s",
            worker.repo().path.display(),
            worker.repo().interval.as_secs()
        );

        match initial {
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// 定时器循环（长期运行）
    async fn run_timer(worker: Arc<RepoWorker>) {
        let period = worker.repo().interval;
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if worker.phase() == WorkerPhase::Stopped {
                break;
            }

            // 同步放到独立任务中执行，慢速同步不会推迟定时器；
            // 重叠的 tick 由 worker 丢弃
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                worker.try_sync().await;
            });
        }
    }

    /// 所有仓库的同步状态
    pub fn status(&self) -> Vec<(PathBuf, SyncState)> {
        lock(&self.workers)
            .iter()
            .map(|w| (w.repo().path.clone(), w.state()))
            .collect()
    }

    /// 停止所有定时器，进行中的同步不会被取消
    pub fn shutdown(&self) {
        let timers: Vec<_> = lock(&self.timers).drain(..).collect();
        if timers.is_empty() {
            warn!("Scheduler shutdown requested with no running timers");
        }
        for timer in timers {
            timer.abort();
        }
        for worker in lock(&self.workers).iter() {
            worker.stop();
        }
        info!("Sync scheduler stopped");
    }
}
