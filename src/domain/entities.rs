use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use crate::domain::value_objects::{BranchName, RepoUrl};
use crate::shared::error::SyncError;
use crate::shared::result::Result;

/// 默认同步间隔
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// 同步间隔上限（100 年），超出会让定时器的截止时间溢出
pub const MAX_INTERVAL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// 仓库描述（配置校验后不可变）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoDescriptor {
    pub url: RepoUrl,
    pub path: PathBuf,
    pub branch: BranchName,
    pub key_path: Option<PathBuf>,
    pub interval: Duration,
    pub clone_args: Vec<String>,
    pub pull_args: Vec<String>,
}

impl RepoDescriptor {
    pub fn new(url: RepoUrl, path: PathBuf) -> Self {
        Self {
            url,
            path,
            branch: BranchName::default(),
            key_path: None,
            interval: DEFAULT_INTERVAL,
            clone_args: Vec::new(),
            pull_args: Vec::new(),
        }
    }

    pub fn with_branch(mut self, branch: BranchName) -> Self {
        self.branch = branch;
        self
    }

    pub fn with_key(mut self, key_path: PathBuf) -> Self {
        self.key_path = Some(key_path);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval.min(MAX_INTERVAL);
        }
        self
    }

    pub fn with_args(mut self, clone_args: Vec<String>, pull_args: Vec<String>) -> Self {
        self.clone_args = clone_args;
        self.pull_args = pull_args;
        self
    }

    pub fn uses_key(&self) -> bool {
        self.key_path.is_some()
    }

    /// 本地路径是否已经是工作仓库
    pub fn is_cloned(&self) -> bool {
        SyncOperation::for_path(&self.path) == SyncOperation::Pull
    }

    /// 准备本地目录
    ///
    /// 目录不存在则创建；已存在的仓库必须指向同一个 origin；
    /// 非空且不是仓库的目录无法 clone。
    pub fn prepare(&self) -> Result<()> {
        if !self.path.exists() {
            debug!("Creating directory {}", self.path.display());
            std::fs::create_dir_all(&self.path)?;
            return Ok(());
        }

        if !self.path.is_dir() {
            return Err(SyncError::Config(format!(
                "{} exists and is not a directory",
                self.path.display()
            )));
        }

        if self.is_cloned() {
            let repo = git2::Repository::open(&self.path)?;
            let remote = repo.find_remote("origin")?;
            let origin = remote.url().unwrap_or_default();
            if !same_remote(origin, &self.url, self.uses_key()) {
                return Err(SyncError::Config(format!(
                    "another git repo '{}' exists at {}",
                    origin,
                    self.path.display()
                )));
            }
            info!("Using existing repository at {}", self.path.display());
            return Ok(());
        }

        if std::fs::read_dir(&self.path)?.next().is_some() {
            return Err(SyncError::Config(format!(
                "cannot git clone into {}, directory not empty",
                self.path.display()
            )));
        }

        Ok(())
    }
}

fn same_remote(origin: &str, url: &RepoUrl, uses_key: bool) -> bool {
    fn trim(s: &str) -> &str {
        let s = s.trim_end_matches('/');
        s.strip_suffix(".git").unwrap_or(s)
    }

    match RepoUrl::parse(origin, uses_key) {
        Ok(parsed) => trim(parsed.as_str()) == trim(url.as_str()),
        Err(_) => trim(origin) == trim(url.as_str()),
    }
}

/// 同步操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOperation {
    Clone,
    Pull,
}

impl SyncOperation {
    /// clone 只在本地路径还不是仓库时执行一次
    pub fn for_path(path: &Path) -> Self {
        if path.join(".git").exists() {
            SyncOperation::Pull
        } else {
            SyncOperation::Clone
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::Clone => write!(f, "clone"),
            SyncOperation::Pull => write!(f, "pull"),
        }
    }
}

/// 一次同步的结果
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub operation: SyncOperation,
    pub output: String,
    pub duration: Duration,
}

/// 最近一次同步结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOutcome {
    Success(SyncOperation),
    Failure(String),
}

/// 仓库同步状态（只保留最近一次结果）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_outcome: Option<SyncOutcome>,
    pub attempts: u64,
    pub failures: u64,
    pub skipped_ticks: u64,
}

impl SyncState {
    pub fn record(&mut self, result: &Result<SyncReport>) {
        let now = Utc::now();
        self.last_attempt = Some(now);
        self.attempts += 1;
        match result {
            Ok(report) => {
                self.last_success = Some(now);
                self.last_outcome = Some(SyncOutcome::Success(report.operation));
            }
            Err(e) => {
                self.failures += 1;
                self.last_outcome = Some(SyncOutcome::Failure(e.to_string()));
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.last_outcome, Some(SyncOutcome::Success(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn descriptor(path: PathBuf) -> RepoDescriptor {
        RepoDescriptor::new(RepoUrl::parse("example.com/site.git", false).unwrap(), path)
    }

    #[test]
    fn test_defaults() {
        let repo = descriptor(PathBuf::from("/srv/site"));
        assert_eq!(repo.branch.as_str(), "master");
        assert_eq!(repo.interval, DEFAULT_INTERVAL);
        assert!(!repo.uses_key());

        let repo = repo.with_interval(Duration::ZERO);
        assert_eq!(repo.interval, DEFAULT_INTERVAL);

        let repo = repo.with_interval(Duration::from_secs(u64::MAX));
        assert_eq!(repo.interval, MAX_INTERVAL);
    }

    #[test]
    fn test_prepare_creates_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a/b/site");
        descriptor(path.clone()).prepare().unwrap();
        assert!(path.is_dir());
        assert_eq!(SyncOperation::for_path(&path), SyncOperation::Clone);
    }

    #[test]
    fn test_prepare_rejects_non_empty_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("index.html"), "hi").unwrap();
        let err = descriptor(tmp.path().to_path_buf()).prepare().unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_prepare_checks_origin() {
        let tmp = TempDir::new().unwrap();
        let repo = git2::Repository::init(tmp.path()).unwrap();
        repo.remote("origin", "https://example.com/site").unwrap();

        descriptor(tmp.path().to_path_buf()).prepare().unwrap();
        assert_eq!(SyncOperation::for_path(tmp.path()), SyncOperation::Pull);

        let other = RepoDescriptor::new(
            RepoUrl::parse("https://example.com/other.git", false).unwrap(),
            tmp.path().to_path_buf(),
        );
        let err = other.prepare().unwrap_err();
        assert!(err.to_string().contains("another git repo"));
    }

    #[test]
    fn test_state_keeps_latest_outcome() {
        let mut state = SyncState::default();
        state.record(&Err(SyncError::InvalidUrl("boom".into())));
        assert_eq!(state.failures, 1);
        assert!(!state.is_healthy());

        state.record(&Ok(SyncReport {
            operation: SyncOperation::Pull,
            output: String::new(),
            duration: Duration::from_millis(5),
        }));
        assert_eq!(state.attempts, 2);
        assert_eq!(state.last_outcome, Some(SyncOutcome::Success(SyncOperation::Pull)));
        assert!(state.last_success.is_some());
    }
}
