//! `toast(message, long?)` capability

use rquickjs::function::{Func, Opt};
use rquickjs::{Coerced, Ctx, Object};
use std::sync::Arc;
use tracing::info;

use super::{define_global, remove_global, CapabilityEnv, NativeCapability};

/// Host-side presenter for short user-facing notices
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, long: bool);
}

/// Default notifier: an info event under the `toast` target
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, long: bool) {
        info!(target: "toast", long, "{}", message);
    }
}

pub struct NotificationCapability {
    notifier: Arc<dyn Notifier>,
}

impl NotificationCapability {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl Default for NotificationCapability {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier))
    }
}

impl NativeCapability for NotificationCapability {
    fn install<'js>(&self, ctx: &Ctx<'js>, globals: &Object<'js>, _env: &CapabilityEnv) -> rquickjs::Result<()> {
        let notifier = self.notifier.clone();
        let toast = Func::from(move |message: Coerced<String>, long: Opt<bool>| {
            notifier.notify(&message.0, long.0.unwrap_or(false));
        });
        define_global(ctx, globals, "toast", toast)
    }

    fn release<'js>(&self, _ctx: &Ctx<'js>, globals: &Object<'js>) -> rquickjs::Result<()> {
        remove_global(globals, "toast")
    }
}
