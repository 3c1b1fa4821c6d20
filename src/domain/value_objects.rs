use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use crate::shared::error::SyncError;
use crate::shared::result::Result;

const KNOWN_SCHEMES: [&str; 3] = ["https://", "http://", "ssh://"];

/// 仓库地址值对象（已校验、带 scheme）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoUrl {
    url: String,
    host: String,
    port: Option<u16>,
}

impl RepoUrl {
    /// 校验并规范化仓库地址
    ///
    /// 没有 scheme 时，配置了私钥默认使用 `ssh://`，否则使用 `https://`。
    /// 带有 `://` 但 scheme 未知的地址直接拒绝，避免把 `host:port/path`
    /// 误当作 scheme。
    pub fn parse(raw: &str, uses_private_key: bool) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SyncError::InvalidUrl("empty repository url".to_string()));
        }

        let with_scheme = if KNOWN_SCHEMES.iter().any(|s| raw.starts_with(s)) {
            raw.to_string()
        } else if let Some((scheme, _)) = raw.split_once("://") {
            return Err(SyncError::InvalidUrlScheme(scheme.to_string()));
        } else if uses_private_key {
            format!("ssh://{}", raw)
        } else {
            format!("https://{}", raw)
        };

        let parsed = Url::parse(&with_scheme).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;

        // IPv6 主机去掉方括号，ssh-keyscan 不接受
        let host = parsed
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| SyncError::InvalidUrl(format!("missing host in {}", with_scheme)))?;

        Ok(Self {
            url: parsed.as_str().to_string(),
            host,
            port: parsed.port(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// 显式指定的端口
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn is_ssh(&self) -> bool {
        self.url.starts_with("ssh://")
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// 分支名称值对象
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchName(String);

impl BranchName {
    pub const DEFAULT: &'static str = "master";

    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        // 以 '-' 开头会被 git 当作选项
        if name.is_empty() || name.starts_with('-') || name.chars().any(char::is_whitespace) {
            return Err(SyncError::Config(format!("invalid branch name {:?}", name)));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BranchName {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
