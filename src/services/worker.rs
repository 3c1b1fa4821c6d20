use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use crate::domain::entities::{RepoDescriptor, SyncReport, SyncState};
use crate::ports::git::SyncPort;
use crate::shared::result::Result;

/// 仓库调度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Idle,
    Running,
    Stopped,
}

/// 同步工作者 - 单个仓库的同步入口，保证同一仓库不会并发同步
pub struct RepoWorker {
    repo: Arc<RepoDescriptor>,
    git_client: Arc<dyn SyncPort>,
    running: AtomicBool,
    stopped: AtomicBool,
    state: Mutex<SyncState>,
}

/// Idle -> Running 的占位，drop 时回到 Idle
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl RepoWorker {
    pub fn new(repo: RepoDescriptor, git_client: Arc<dyn SyncPort>) -> Self {
        Self {
            repo: Arc::new(repo),
            git_client,
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            state: Mutex::new(SyncState::default()),
        }
    }

    pub fn repo(&self) -> &RepoDescriptor {
        &self.repo
    }

    pub fn phase(&self) -> WorkerPhase {
        if self.stopped.load(Ordering::Acquire) {
            WorkerPhase::Stopped
        } else if self.running.load(Ordering::Acquire) {
            WorkerPhase::Running
        } else {
            WorkerPhase::Idle
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// 当前同步状态快照
    pub fn state(&self) -> SyncState {
        self.lock_state().clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 尝试执行一次同步
    ///
    /// 上一次同步仍在进行时直接丢弃本次 tick（不排队），返回 `None`。
    pub async fn try_sync(&self) -> Option<Result<SyncReport>> {
        let _guard = match RunGuard::acquire(&self.running) {
            Some(guard) => guard,
            None => {
                self.lock_state().skipped_ticks += 1;
                debug!("Sync still running for {}, skipping tick", self.repo.path.display());
                return None;
            }
        };

        let result = self.git_client.pull(&self.repo).await;
        self.lock_state().record(&result);

        match &result {
            Ok(report) => {
                info!(
                    "Synced {} ({}) in {:?}",
                    self.repo.path.display(),
                    report.operation,
                    report.duration
                );
                debug!("git output: {}", report.output);
            }
            Err(e) if e.is_fatal() => {
                error!("Failed to sync {} from {}: {}", self.repo.path.display(), self.repo.url, e);
            }
            Err(e) => {
                warn!(
                    "Failed to sync {} from {}, retrying in {}s: {}",
                    self.repo.path.display(),
                    self.repo.url,
                    self.repo.interval.as_secs(),
                    e
                );
            }
        }

        Some(result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::entities::SyncOperation;
    use crate::domain::value_objects::RepoUrl;
    use crate::shared::error::SyncError;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// 慢速的假同步，记录并发进入次数
    #[derive(Default)]
    pub(crate) struct SlowSync {
        pub delay: Duration,
        pub fail_paths: Vec<PathBuf>,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl SlowSync {
        pub fn new(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl SyncPort for SlowSync {
        async fn pull(&self, repo: &RepoDescriptor) -> Result<SyncReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_paths.contains(&repo.path) {
                return Err(SyncError::SyncFailed {
                    operation: "pull".to_string(),
                    status: "exit status: 1".to_string(),
                    output: "fatal: unable to access remote".to_string(),
                });
            }
            Ok(SyncReport {
                operation: SyncOperation::Pull,
                output: String::new(),
                duration: self.delay,
            })
        }
    }

    pub(crate) fn descriptor(path: &Path, interval: Duration) -> RepoDescriptor {
        RepoDescriptor::new(RepoUrl::parse("example.com/site.git", false).unwrap(), path.to_path_buf())
            .with_interval(interval)
    }

    #[tokio::test]
    async fn test_overlapping_sync_is_dropped() {
        let sync = Arc::new(SlowSync::new(Duration::from_millis(200)));
        let worker = RepoWorker::new(descriptor(Path::new("/srv/a"), Duration::from_secs(1)), sync.clone());

        let (first, second) = tokio::join!(worker.try_sync(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(worker.phase(), WorkerPhase::Running);
            worker.try_sync().await
        });

        assert!(first.unwrap().is_ok());
        assert!(second.is_none());
        assert_eq!(sync.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sync.max_in_flight.load(Ordering::SeqCst), 1);

        let state = worker.state();
        assert_eq!(state.attempts, 1);
        assert_eq!(state.skipped_ticks, 1);
        assert_eq!(worker.phase(), WorkerPhase::Idle);
    }

    #[tokio::test]
    async fn test_failure_recorded_and_gate_released() {
        let mut sync = SlowSync::new(Duration::from_millis(1));
        sync.fail_paths.push(PathBuf::from("/srv/bad"));
        let worker = RepoWorker::new(descriptor(Path::new("/srv/bad"), Duration::from_secs(1)), Arc::new(sync));

        let result = worker.try_sync().await.unwrap();
        assert!(matches!(result, Err(SyncError::SyncFailed { .. })));
        assert_eq!(worker.phase(), WorkerPhase::Idle);

        // 失败后仍可再次同步
        assert!(worker.try_sync().await.is_some());
        let state = worker.state();
        assert_eq!(state.failures, 2);
        assert!(!state.is_healthy());
    }
}
