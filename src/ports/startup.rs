use futures::future::BoxFuture;
use crate::shared::result::Result;

/// 启动回调，进程启动时执行一次
pub type StartupHook = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// 启动回调注册接口
pub trait StartupRegistry {
    fn on_startup(&mut self, hook: StartupHook);
}
