use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use crate::domain::entities::{RepoDescriptor, SyncOperation, SyncReport};
use crate::infrastructure::git::scripts;
use crate::ports::git::SyncPort;
use crate::shared::config::GitConfig;
use crate::shared::error::SyncError;
use crate::shared::result::Result;

/// 进程组被杀死后，等待组内剩余进程退出的上限
const REAP_DEADLINE: Duration = Duration::from_secs(2);

/// Git 客户端实现（调用系统 git 命令）
pub struct GitCliClient {
    git_binary: String,
    shell: String,
    scripts_dir: PathBuf,
    timeout: Option<Duration>,
    envs: Vec<(String, String)>,
}

impl GitCliClient {
    pub fn from_config(config: &GitConfig) -> Self {
        let mut client = Self {
            git_binary: config.binary.clone(),
            shell: config.shell.clone(),
            scripts_dir: std::env::temp_dir(),
            timeout: None,
            envs: Vec::new(),
        };
        if let Some(dir) = &config.scripts_dir {
            client = client.with_scripts_dir(dir);
        }
        if config.timeout_secs > 0 {
            client = client.with_timeout(Duration::from_secs(config.timeout_secs));
        }
        for (k, v) in &config.env {
            client = client.with_env(k, v);
        }
        client
    }

    /// 辅助脚本目录
    pub fn with_scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scripts_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 额外的环境变量，传给所有子进程
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// 构造 clone / pull 参数
    fn git_args(repo: &RepoDescriptor, operation: SyncOperation) -> Vec<String> {
        let mut args = match operation {
            SyncOperation::Clone => vec![
                "clone".to_string(),
                "-b".to_string(),
                repo.branch.to_string(),
                repo.url.to_string(),
                repo.path.display().to_string(),
            ],
            SyncOperation::Pull => vec![
                "pull".to_string(),
                "origin".to_string(),
                repo.branch.to_string(),
            ],
        };
        match operation {
            SyncOperation::Clone => args.extend(repo.clone_args.iter().cloned()),
            SyncOperation::Pull => args.extend(repo.pull_args.iter().cloned()),
        }
        args
    }

    /// 执行命令，合并 stdout 和 stderr
    ///
    /// 子进程运行在独立的进程组中；超时后整个进程组（包括脚本启动的 git）
    /// 都会被杀死并等待退出，之后才返回。
    async fn run(&self, mut cmd: StdCommand, program: &str, operation: SyncOperation) -> Result<String> {
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut cmd = Command::from(cmd);
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| SyncError::ProcessSpawn {
            program: program.to_string(),
            source,
        })?;
        let stdout = child.stdout.take().map(|out| tokio::spawn(read_all(out)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(read_all(err)));

        let status = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    kill_process_group(&mut child).await;
                    for reader in [stdout, stderr].into_iter().flatten() {
                        reader.abort();
                    }
                    return Err(SyncError::timed_out(operation.to_string(), timeout));
                }
            },
            None => child.wait().await?,
        };

        let mut combined = String::from_utf8_lossy(&collect(stdout).await).into_owned();
        combined.push_str(&String::from_utf8_lossy(&collect(stderr).await));
        let combined = combined.trim().to_string();

        if !status.success() {
            return Err(SyncError::sync_failed(operation.to_string(), status, combined));
        }

        Ok(combined)
    }

    /// 直接调用 git（无需 ssh 认证）
    async fn run_direct(&self, repo: &RepoDescriptor, operation: SyncOperation, args: &[String]) -> Result<String> {
        let mut cmd = StdCommand::new(&self.git_binary);
        cmd.args(args);
        if operation == SyncOperation::Pull {
            cmd.current_dir(&repo.path);
        }
        self.run(cmd, &self.git_binary, operation).await
    }

    /// 通过辅助脚本执行：先写入主机公钥，再用指定私钥运行 git
    async fn run_with_key(
        &self,
        repo: &RepoDescriptor,
        key_path: &Path,
        operation: SyncOperation,
        args: &[String],
    ) -> Result<String> {
        let run_dir = scripts::create_run_dir(&self.scripts_dir)?;
        let wrapper = scripts::write_script_file(
            &self.scripts_dir,
            &scripts::git_wrapper_script(run_dir.path(), &self.shell, &self.git_binary),
        )?;
        let script = scripts::write_script_file(
            &self.scripts_dir,
            &scripts::known_hosts_script(repo.url.host(), repo.url.port(), &wrapper, key_path, args),
        )?;
        debug!("Prepared ssh scripts {} and {}", wrapper.display(), script.display());

        let mut cmd = StdCommand::new("sh");
        cmd.arg(script.as_os_str());
        if operation == SyncOperation::Pull {
            cmd.current_dir(&repo.path);
        }
        let result = self.run(cmd, "sh", operation).await;

        // 包装脚本通常已被自身的 trap 删除
        let _ = script.close();
        let _ = wrapper.close();
        let _ = run_dir.close();
        result
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    buf
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match reader {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// 杀死子进程所在的整个进程组，并等待组内进程全部退出
#[cfg(unix)]
async fn kill_process_group(child: &mut Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return; // 已退出
    };
    let pgid = Pid::from_raw(pid as i32);

    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        if e != Errno::ESRCH {
            warn!("SIGKILL to process group {} failed: {}", pid, e);
        }
    }
    let _ = child.wait().await;

    // 孤儿进程由 init 回收，轮询直到进程组消失
    let deadline = tokio::time::Instant::now() + REAP_DEADLINE;
    while killpg(pgid, None).is_ok() {
        if tokio::time::Instant::now() >= deadline {
            warn!("Process group {} still alive after SIGKILL", pid);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(not(unix))]
async fn kill_process_group(child: &mut Child) {
    let _ = child.kill().await;
}

/// 清空被中断的 clone 留下的内容，下一次 tick 重新 clone
fn clear_partial_clone(path: &Path) {
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let entry_path = entry.path();
        let removed = if entry_path.is_dir() && !entry_path.is_symlink() {
            std::fs::remove_dir_all(&entry_path)
        } else {
            std::fs::remove_file(&entry_path)
        };
        if let Err(e) = removed {
            warn!("Failed to remove {} after interrupted clone: {}", entry_path.display(), e);
        }
    }
}

#[async_trait]
impl SyncPort for GitCliClient {
    async fn pull(&self, repo: &RepoDescriptor) -> Result<SyncReport> {
        let started = Instant::now();
        let operation = SyncOperation::for_path(&repo.path);
        let args = Self::git_args(repo, operation);

        debug!("Running git {} for {}", operation, repo.path.display());

        let result = match &repo.key_path {
            Some(key_path) => self.run_with_key(repo, key_path, operation, &args).await,
            None => self.run_direct(repo, operation, &args).await,
        };
        let output = match result {
            Err(e) if e.is_timeout() && operation == SyncOperation::Clone => {
                clear_partial_clone(&repo.path);
                return Err(e);
            }
            other => other?,
        };

        let duration = started.elapsed();
        info!(
            "git {} {} -> {} finished in {:?}",
            operation,
            repo.url,
            repo.path.display(),
            duration
        );

        Ok(SyncReport {
            operation,
            output,
            duration,
        })
    }
}
