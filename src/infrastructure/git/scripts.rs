//! SSH 辅助脚本
//!
//! 使用私钥的仓库通过两个临时脚本完成同步：
//! 包装脚本让 git 使用指定的私钥连接，known_hosts 脚本在首次连接前
//! 写入主机公钥，避免 ssh 交互式确认卡住后台同步。

use std::io::Write;
use std::path::Path;
use tempfile::{TempDir, TempPath};
use crate::shared::error::SyncError;
use crate::shared::result::Result;

const GIT_WRAPPER_TEMPLATE: &str = r#"#!/bin/sh

if [ $# -eq 0 ]; then
    echo "Git wrapper script that can specify an ssh-key file
Usage:
    git.sh -i ssh-key-file git-command
    "
    exit 1
fi

GIT_SSH_WRAPPER={tmp_dir}/.git_ssh.$$

# remove temporary files on exit
trap 'rm -f "$GIT_SSH_WRAPPER" "$0"' 0

if [ "$1" = "-i" ]; then
    GIT_SSH_KEY=$2; shift; shift
    export GIT_SSH_KEY
    printf '#!/usr/bin/env %s\nexec ssh -o BatchMode=yes -i "$GIT_SSH_KEY" "$@"\n' {shell} > "$GIT_SSH_WRAPPER"
    chmod +x "$GIT_SSH_WRAPPER"
    GIT_SSH=$GIT_SSH_WRAPPER
    export GIT_SSH
fi

# in case the git command is repeated
[ "$1" = "git" ] && shift

{git} "$@"
"#;

const KNOWN_HOSTS_TEMPLATE: &str = r#"#!/bin/sh

mkdir -p "$HOME/.ssh"
touch "$HOME/.ssh/known_hosts"
staging="$HOME/.ssh/known_hosts.gitsync.$$"
trap 'rm -f "$staging"' 0

for key_type in rsa dsa ecdsa ed25519
do
  ssh-keyscan {port_args}-t "$key_type" {repo_host} 2>/dev/null
done | sort -u > "$staging"

while IFS= read -r line
do
  [ -z "$line" ] && continue
  grep -qxF -- "$line" "$HOME/.ssh/known_hosts" || printf '%s\n' "$line" >> "$HOME/.ssh/known_hosts"
done < "$staging"
rm -f "$staging"

{git_ssh_path} -i {ssh_key_path} {ssh_params}
"#;

fn quote_path(path: &Path) -> String {
    shell_words::quote(&path.to_string_lossy()).into_owned()
}

/// 生成 git 包装脚本
///
/// `git.sh -i <key> <git args...>` 会生成一个调用 `ssh -i <key>` 的子脚本，
/// 通过 `GIT_SSH` 交给 git 使用，退出时删除子脚本和自身。
pub fn git_wrapper_script(tmp_dir: &Path, shell: &str, git: &str) -> String {
    let tmp_dir = tmp_dir.to_string_lossy();
    let tmp_dir = tmp_dir.trim_end_matches('/');
    let tmp_dir = if tmp_dir.is_empty() { "/" } else { tmp_dir };

    GIT_WRAPPER_TEMPLATE
        .replace("{tmp_dir}", &shell_words::quote(tmp_dir))
        .replace("{shell}", &shell_words::quote(shell))
        .replace("{git}", &shell_words::quote(git))
}

/// 生成 known_hosts 脚本
///
/// 扫描主机公钥，只追加 known_hosts 中不存在的行，然后通过包装脚本执行 git。
/// 并发追加同一个文件时可能出现重复行，重复行对 ssh 无害。
pub fn known_hosts_script(
    host: &str,
    port: Option<u16>,
    git_ssh_path: &Path,
    key_path: &Path,
    params: &[String],
) -> String {
    let port_args = port.map(|p| format!("-p {} ", p)).unwrap_or_default();

    KNOWN_HOSTS_TEMPLATE
        .replace("{port_args}", &port_args)
        .replace("{repo_host}", &shell_words::quote(host))
        .replace("{git_ssh_path}", &quote_path(git_ssh_path))
        .replace("{ssh_key_path}", &quote_path(key_path))
        .replace("{ssh_params}", &shell_words::join(params))
}

/// 写入临时脚本文件
///
/// 文件设置为可执行并关闭句柄后返回；返回的 `TempPath` 在 drop 时删除文件。
/// 任何一步失败都会删除已创建的文件。
pub fn write_script_file(dir: &Path, content: &str) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("gitsync")
        .suffix(".sh")
        .tempfile_in(dir)
        .map_err(SyncError::ScriptPreparation)?;

    file.write_all(content.as_bytes())
        .map_err(SyncError::ScriptPreparation)?;
    file.flush().map_err(SyncError::ScriptPreparation)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o755))
            .map_err(SyncError::ScriptPreparation)?;
    }

    // 关闭写句柄，避免执行时出现 ETXTBSY
    Ok(file.into_temp_path())
}

/// 单次同步的临时目录，存放包装脚本生成的 ssh 子脚本
///
/// 进程被强制结束时脚本的 trap 不会执行，目录在 drop 时整体删除。
pub fn create_run_dir(dir: &Path) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix("gitsync")
        .tempdir_in(dir)
        .map_err(SyncError::ScriptPreparation)
}
