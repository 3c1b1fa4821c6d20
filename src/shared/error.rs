use std::process::ExitStatus;
use std::time::Duration;

/// 超时的同步在 `SyncFailed::status` 中的取值
pub const TIMEOUT_STATUS: &str = "timeout";

/// 统一的错误类型
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// 配置错误（启动阶段致命）
    #[error("Configuration error: {0}")]
    Config(String),

    /// 无效的仓库地址
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// 不支持的 URL scheme
    #[error("Invalid url scheme {0:?}. If url contains port, scheme is required")]
    InvalidUrlScheme(String),

    /// 辅助脚本准备失败（仅影响本次同步）
    #[error("Failed to prepare helper script: {0}")]
    ScriptPreparation(#[source] std::io::Error),

    /// git 进程非零退出
    #[error("git {operation} failed ({status}): {output}")]
    SyncFailed {
        operation: String,
        status: String,
        output: String,
    },

    /// 无法启动外部进程
    #[error("Failed to spawn {program}: {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Git 操作错误
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn sync_failed(operation: impl Into<String>, status: ExitStatus, output: String) -> Self {
        SyncError::SyncFailed {
            operation: operation.into(),
            status: status.to_string(),
            output,
        }
    }

    pub fn timed_out(operation: impl Into<String>, timeout: Duration) -> Self {
        SyncError::SyncFailed {
            operation: operation.into(),
            status: TIMEOUT_STATUS.to_string(),
            output: format!("no result after {}s", timeout.as_secs_f64()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::SyncFailed { status, .. } if status == TIMEOUT_STATUS)
    }

    /// 启动阶段的错误会阻止进程就绪；运行期错误只记录日志，等待下一次 tick
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Config(_) | SyncError::InvalidUrl(_) | SyncError::InvalidUrlScheme(_)
        )
    }
}
