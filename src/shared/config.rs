use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use crate::shared::result::Result;

/// 应用配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// 相对路径的基准目录，未设置时使用当前工作目录
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
}

/// Git 配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    pub binary: String,
    /// 生成的 ssh 包装脚本使用的解释器
    pub shell: String,
    /// 单次同步超时，0 表示不限制
    pub timeout_secs: u64,
    /// 辅助脚本目录，默认系统临时目录
    pub scripts_dir: Option<PathBuf>,
    /// 传给 git 子进程的额外环境变量
    pub env: BTreeMap<String, String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: "git".to_string(),
            shell: "sh".to_string(),
            timeout_secs: 0,
            scripts_dir: None,
            env: BTreeMap::new(),
        }
    }
}

/// 单个仓库的原始配置（未校验）
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RepoConfig {
    /// 简写形式: "<url> [<path>]"
    pub repo: Option<String>,
    pub url: Option<String>,
    pub path: Option<PathBuf>,
    pub branch: Option<String>,
    pub key: Option<PathBuf>,
    /// 同步间隔（秒），非正数使用默认值
    pub interval: Option<i64>,
    pub clone_args: Vec<String>,
    pub pull_args: Vec<String>,
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::shared::error::SyncError::Config(e.to_string()))?;
        Ok(config)
    }

    /// 从命令行参数和文件加载配置
    pub fn from_args_and_file(config_path: &Path, root: Option<PathBuf>) -> Result<Self> {
        let mut config = Self::from_file(config_path)?;

        // 命令行参数覆盖配置文件
        if let Some(root) = root {
            config.root = Some(root);
        }

        if config.repos.is_empty() {
            tracing::warn!("No repositories configured in {}", config_path.display());
        }

        Ok(config)
    }

    /// 解析后的基准目录
    pub fn root_dir(&self) -> Result<PathBuf> {
        match &self.root {
            Some(root) if root.is_absolute() => Ok(root.clone()),
            Some(root) => Ok(std::env::current_dir()?.join(root)),
            None => Ok(std::env::current_dir()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(
            r#"
            root = "/srv/site"

            [git]
            binary = "/usr/bin/git"
            timeout_secs = 60
            env = { GIT_HTTP_LOW_SPEED_LIMIT = "1000" }

            [[repos]]
            url = "github.com/user/site.git"
            path = "public"
            branch = "main"
            key = "/etc/gitsync/id_ed25519"
            interval = 600
            clone_args = ["--depth", "1"]
            pull_args = ["--ff-only"]

            [[repos]]
            repo = "https://example.com/docs.git docs"
            "#,
        )
        .unwrap();

        assert_eq!(config.root, Some(PathBuf::from("/srv/site")));
        assert_eq!(config.git.binary, "/usr/bin/git");
        assert_eq!(config.git.shell, "sh");
        assert_eq!(config.git.timeout_secs, 60);
        assert_eq!(config.git.env.get("GIT_HTTP_LOW_SPEED_LIMIT").map(String::as_str), Some("1000"));
        assert_eq!(config.repos.len(), 2);
        assert_eq!(config.repos[0].interval, Some(600));
        assert_eq!(config.repos[0].clone_args, vec!["--depth", "1"]);
        assert_eq!(config.repos[1].repo.as_deref(), Some("https://example.com/docs.git docs"));
        assert!(config.repos[1].pull_args.is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert!(config.repos.is_empty());
        assert_eq!(config.git.binary, "git");
        assert_eq!(config.root_dir().unwrap(), std::env::current_dir().unwrap());
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let err = Config::from_toml("repos = 3").unwrap_err();
        assert!(matches!(err, crate::shared::error::SyncError::Config(_)));
    }
}
