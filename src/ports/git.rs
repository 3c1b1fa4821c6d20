use async_trait::async_trait;
use crate::domain::entities::{RepoDescriptor, SyncReport};
use crate::shared::result::Result;

/// Git 同步接口
#[async_trait]
pub trait SyncPort: Send + Sync {
    /// 执行一次 clone 或 pull
    ///
    /// 调用方保证同一个仓库不会并发调用；不同仓库之间可以并发。
    /// 失败不在内部重试，由调度器在下一次 tick 重试。
    async fn pull(&self, repo: &RepoDescriptor) -> Result<SyncReport>;
}
