use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use futures::FutureExt;
use tracing::{debug, info, warn};
use crate::domain::entities::{RepoDescriptor, MAX_INTERVAL};
use crate::domain::value_objects::{BranchName, RepoUrl};
use crate::ports::startup::{StartupHook, StartupRegistry};
use crate::services::scheduler::SyncScheduler;
use crate::shared::config::{Config, RepoConfig};
use crate::shared::error::SyncError;
use crate::shared::result::Result;

/// 解析配置，得到校验后的仓库描述（不访问文件系统）
pub fn parse(config: &Config, root: &Path) -> Result<Vec<RepoDescriptor>> {
    let mut repos = Vec::with_capacity(config.repos.len());
    let mut seen = HashSet::new();

    for (idx, raw) in config.repos.iter().enumerate() {
        let repo = parse_repo(raw, root).map_err(|e| match e {
            SyncError::Config(msg) => SyncError::Config(format!("repos[{}]: {}", idx, msg)),
            other => other,
        })?;

        if !seen.insert(repo.path.clone()) {
            return Err(SyncError::Config(format!(
                "repos[{}]: path {} is already used by another repository",
                idx,
                repo.path.display()
            )));
        }

        debug!("Parsed repository {} -> {}", repo.url, repo.path.display());
        repos.push(repo);
    }

    Ok(repos)
}

fn parse_repo(raw: &RepoConfig, root: &Path) -> Result<RepoDescriptor> {
    let mut url = None;
    let mut path = None;

    // 简写: repo = "<url> [<path>]"
    if let Some(short) = &raw.repo {
        let parts: Vec<&str> = short.split_whitespace().collect();
        match parts.as_slice() {
            [u] => url = Some(u.to_string()),
            [u, p] => {
                url = Some(u.to_string());
                path = Some(PathBuf::from(p));
            }
            _ => return Err(SyncError::Config(format!("expected '<url> [<path>]', got {:?}", short))),
        }
    }
    if let Some(u) = &raw.url {
        url = Some(u.clone());
    }
    if let Some(p) = &raw.path {
        path = Some(p.clone());
    }

    let url = url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| SyncError::Config("repository url is required".to_string()))?;

    let key_path = raw.key.as_deref().map(|k| clone_path(root, k));
    if key_path.is_some() && cfg!(windows) {
        return Err(SyncError::Config(
            "ssh authentication not yet supported on Windows".to_string(),
        ));
    }

    let url = RepoUrl::parse(&url, key_path.is_some())?;
    if key_path.is_some() && !url.is_ssh() {
        warn!("Private key configured for {}, but git only uses it over ssh", url);
    }
    let path = path
        .map(|p| clone_path(root, &p))
        .unwrap_or_else(|| clean(root));

    let mut repo = RepoDescriptor::new(url, path).with_args(raw.clone_args.clone(), raw.pull_args.clone());
    if let Some(branch) = &raw.branch {
        repo = repo.with_branch(BranchName::new(branch.as_str())?);
    }
    if let Some(key_path) = key_path {
        repo = repo.with_key(key_path);
    }
    if let Some(secs) = raw.interval.filter(|s| *s > 0) {
        let interval = Duration::from_secs(secs as u64);
        if interval > MAX_INTERVAL {
            warn!(
                "Interval {}s for {} is too large, using {}s",
                secs,
                repo.path.display(),
                MAX_INTERVAL.as_secs()
            );
        }
        repo = repo.with_interval(interval);
    }

    Ok(repo)
}

/// 相对路径基于 root
fn clone_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        clean(path)
    } else {
        clean(&root.join(path))
    }
}

/// 词法上规范化路径（去掉 `.`，折叠 `..`）
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// 准备所有仓库目录
pub fn prepare(repos: &[RepoDescriptor]) -> Result<()> {
    for repo in repos {
        repo.prepare()?;
    }
    Ok(())
}

/// 把仓库交给调度器，并为每个仓库注册一个启动回调
///
/// 所有仓库注册完成后才统一登记回调，不与解析交错。
pub fn register<R: StartupRegistry>(
    repos: Vec<RepoDescriptor>,
    scheduler: &Arc<SyncScheduler>,
    registry: &mut R,
) -> Result<usize> {
    let mut startup_hooks: Vec<StartupHook> = Vec::with_capacity(repos.len());

    for repo in repos {
        let worker = scheduler.register(repo)?;
        let scheduler = Arc::clone(scheduler);
        startup_hooks.push(Box::new(move || {
            async move { scheduler.start(worker).await }.boxed()
        }));
    }

    let count = startup_hooks.len();
    for hook in startup_hooks {
        registry.on_startup(hook);
    }
    info!("Registered {} repositories for startup", count);
    Ok(count)
}
