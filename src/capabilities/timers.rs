//! `setTimeout` / `clearTimeout`
//!
//! Timers sleep on the engine's task scope and fire through the native call
//! queue. A pending timer counts as in-flight work, so the pump keeps the
//! execution alive until it fires or is cleared.

use rquickjs::function::Func;
use rquickjs::{Ctx, Function, Object};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::trace;

use super::{define_global, remove_global, CapabilityEnv, NativeCapability};
use crate::queue::native_call;

const FIRE_KEY: &str = "__timerFire";

const TIMER_PRELUDE: &str = r#"
(function (schedule, cancel) {
  const timers = new Map();
  let nextId = 1;

  const setTimeout = (callback, delay, ...args) => {
    if (typeof callback !== "function") throw new TypeError("setTimeout callback must be a function");
    const id = nextId++;
    timers.set(id, { callback, args });
    schedule(id, Math.max(0, Number(delay) || 0));
    return id;
  };

  const clearTimeout = (id) => {
    if (timers.delete(id)) cancel(id);
  };

  const fire = (id) => {
    const timer = timers.get(id);
    if (timer === undefined) return;
    timers.delete(id);
    timer.callback(...timer.args);
  };

  return { setTimeout, clearTimeout, fire };
})
"#;

type TimerHandles = Arc<Mutex<HashMap<u32, AbortHandle>>>;

#[derive(Default)]
pub struct TimerCapability {
    handles: TimerHandles,
}

impl TimerCapability {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        lock(&self.handles).len()
    }
}

impl NativeCapability for TimerCapability {
    fn install<'js>(&self, ctx: &Ctx<'js>, globals: &Object<'js>, env: &CapabilityEnv) -> rquickjs::Result<()> {
        let handles = self.handles.clone();
        let env = env.clone();
        let schedule = Func::from(move |id: u32, delay_ms: f64| {
            let guard = env.sender.begin();
            let sender = env.sender.clone();
            let fired = handles.clone();
            let delay = Duration::from_millis(delay_ms as u64);
            // Held across spawn so a zero-delay timer cannot remove its
            // handle before it is inserted
            let mut pending = lock(&handles);
            let task = env.scope.spawn(async move {
                tokio::time::sleep(delay).await;
                lock(&fired).remove(&id);
                sender.enqueue(native_call(move |ctx| {
                    let fire: Function = ctx.globals().get(FIRE_KEY)?;
                    fire.call((id,))
                }));
                drop(guard);
            });
            if let Some(task) = task {
                trace!(id, delay_ms, "Timer scheduled");
                pending.insert(id, task);
            }
        });

        let handles = self.handles.clone();
        let cancel = Func::from(move |id: u32| {
            if let Some(task) = lock(&handles).remove(&id) {
                trace!(id, "Timer cleared");
                task.abort();
            }
        });

        let prelude: Function = ctx.eval(TIMER_PRELUDE)?;
        let parts: Object = prelude.call((schedule, cancel))?;
        define_global(ctx, globals, FIRE_KEY, parts.get::<_, Function>("fire")?)?;
        define_global(ctx, globals, "setTimeout", parts.get::<_, Function>("setTimeout")?)?;
        define_global(ctx, globals, "clearTimeout", parts.get::<_, Function>("clearTimeout")?)
    }

    fn release<'js>(&self, _ctx: &Ctx<'js>, globals: &Object<'js>) -> rquickjs::Result<()> {
        for (_, task) in lock(&self.handles).drain() {
            task.abort();
        }
        remove_global(globals, "setTimeout")?;
        remove_global(globals, "clearTimeout")?;
        remove_global(globals, FIRE_KEY)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
