use tracing::debug;
use crate::ports::startup::{StartupHook, StartupRegistry};
use crate::shared::result::Result;

/// 启动回调集合：解析阶段累积，进程启动时按注册顺序各执行一次
#[derive(Default)]
pub struct StartupHooks {
    hooks: Vec<StartupHook>,
}

impl StartupHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// 执行所有回调，遇到第一个错误即停止
    pub async fn run_all(self) -> Result<()> {
        let total = self.hooks.len();
        for (idx, hook) in self.hooks.into_iter().enumerate() {
            debug!("Running startup hook {}/{}", idx + 1, total);
            hook().await?;
        }
        Ok(())
    }
}

impl StartupRegistry for StartupHooks {
    fn on_startup(&mut self, hook: StartupHook) {
        self.hooks.push(hook);
    }
}
