//! Process level hooks: work deferred until the whole run succeeded, and
//! work that must happen if the run is interrupted.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tracing::debug;

type SuccessHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type InterruptHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId(u64);

#[derive(Default)]
struct Hooks {
    next_id: u64,
    on_success: Vec<SuccessHook>,
    on_interrupt: Vec<(HookId, InterruptHook)>,
}

/// Registry shared by everything that has to run when the process ends.
///
/// Success hooks run once, in registration order, when the caller reports a
/// successful run. Interrupt hooks run once when the caller reports an
/// interruption, unless they were unregistered before.
#[derive(Clone, Default)]
pub struct ShutdownHooks {
    inner: Arc<Mutex<Hooks>>,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    fn hooks(&self) -> MutexGuard<'_, Hooks> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_success<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks()
            .on_success
            .push(Box::new(move || Box::pin(hook()) as BoxFuture<'static, ()>));
    }

    pub fn on_interrupt<F>(&self, hook: F) -> HookId
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = self.hooks();
        let id = HookId(hooks.next_id);
        hooks.next_id += 1;
        hooks.on_interrupt.push((id, Box::new(hook)));
        id
    }

    pub fn unregister(&self, id: HookId) {
        self.hooks().on_interrupt.retain(|(hook_id, _)| *hook_id != id);
    }

    pub fn pending_success(&self) -> usize {
        self.hooks().on_success.len()
    }

    /// Run every success hook. Interrupt hooks are discarded.
    pub async fn succeeded(&self) {
        let success = {
            let mut hooks = self.hooks();
            hooks.on_interrupt.clear();
            std::mem::take(&mut hooks.on_success)
        };
        debug!("post-termination: running {} success hooks", success.len());
        for hook in success {
            hook().await;
        }
    }

    /// Run every interrupt hook. Success hooks are discarded.
    pub fn interrupted(&self) {
        let interrupt = {
            let mut hooks = self.hooks();
            hooks.on_success.clear();
            std::mem::take(&mut hooks.on_interrupt)
        };
        debug!("post-termination: running {} interrupt hooks", interrupt.len());
        for (_, hook) in interrupt {
            hook();
        }
    }
}
