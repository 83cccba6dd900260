//! Native capabilities
//!
//! A capability is a native object wired into the script global scope at
//! `init` and taken back out at `destroy`. The set is closed: every variant
//! lives in `Capability`, and the registry installs them in registration
//! order and releases them in reverse.

mod bridge;
mod console;
mod notification;
mod timers;

pub use bridge::{BridgeCapability, BridgeFn};
pub use console::{ConsoleCapability, ConsoleLevel, ConsoleSink, TracingConsole};
pub use notification::{LogNotifier, NotificationCapability, Notifier};
pub use timers::TimerCapability;

use rquickjs::{Ctx, Object};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{catch_fault, ExecutionError};
use crate::marshal::MarshalPolicy;
use crate::queue::NativeCallSender;
use crate::scope::TaskScope;

/// What a capability gets to work with while installed
#[derive(Clone)]
pub struct CapabilityEnv {
    pub sender: NativeCallSender,
    pub scope: Arc<TaskScope>,
    pub policy: MarshalPolicy,
}

/// Shared install/release interface
pub trait NativeCapability {
    fn install<'js>(&self, ctx: &Ctx<'js>, globals: &Object<'js>, env: &CapabilityEnv) -> rquickjs::Result<()>;

    fn release<'js>(&self, ctx: &Ctx<'js>, globals: &Object<'js>) -> rquickjs::Result<()>;
}

pub enum Capability {
    Console(ConsoleCapability),
    Bridge(BridgeCapability),
    Timers(TimerCapability),
    Notification(NotificationCapability),
}

impl Capability {
    /// Name the engine registers the variant under by default
    pub fn default_name(&self) -> &'static str {
        match self {
            Capability::Console(_) => "console",
            Capability::Bridge(_) => "native",
            Capability::Timers(_) => "timers",
            Capability::Notification(_) => "toast",
        }
    }
}

impl NativeCapability for Capability {
    fn install<'js>(&self, ctx: &Ctx<'js>, globals: &Object<'js>, env: &CapabilityEnv) -> rquickjs::Result<()> {
        match self {
            Capability::Console(c) => c.install(ctx, globals, env),
            Capability::Bridge(c) => c.install(ctx, globals, env),
            Capability::Timers(c) => c.install(ctx, globals, env),
            Capability::Notification(c) => c.install(ctx, globals, env),
        }
    }

    fn release<'js>(&self, ctx: &Ctx<'js>, globals: &Object<'js>) -> rquickjs::Result<()> {
        match self {
            Capability::Console(c) => c.release(ctx, globals),
            Capability::Bridge(c) => c.release(ctx, globals),
            Capability::Timers(c) => c.release(ctx, globals),
            Capability::Notification(c) => c.release(ctx, globals),
        }
    }
}

impl From<ConsoleCapability> for Capability {
    fn from(c: ConsoleCapability) -> Self {
        Capability::Console(c)
    }
}

impl From<BridgeCapability> for Capability {
    fn from(c: BridgeCapability) -> Self {
        Capability::Bridge(c)
    }
}

impl From<TimerCapability> for Capability {
    fn from(c: TimerCapability) -> Self {
        Capability::Timers(c)
    }
}

impl From<NotificationCapability> for Capability {
    fn from(c: NotificationCapability) -> Self {
        Capability::Notification(c)
    }
}

const DEFINE_GLOBAL: &str =
    "(target, key, value) => { Object.defineProperty(target, key, { value, writable: true, configurable: true, enumerable: false }); }";

/// Define a non-enumerable, configurable global. Throws a `TypeError` if the
/// name is already taken by a non-configurable property.
pub(crate) fn define_global<'js, V>(ctx: &Ctx<'js>, globals: &Object<'js>, name: &str, value: V) -> rquickjs::Result<()>
where
    V: rquickjs::IntoJs<'js>,
{
    let define: rquickjs::Function = ctx.eval(DEFINE_GLOBAL)?;
    define.call::<_, ()>((globals.clone(), name, value))
}

/// Remove a global installed with `define_global`
pub(crate) fn remove_global<'js>(globals: &Object<'js>, name: &str) -> rquickjs::Result<()> {
    globals.remove(name)
}

/* ===================== Registry ===================== */

#[derive(Default)]
pub struct CapabilityRegistry {
    entries: Vec<(String, Capability)>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. An existing entry with the same name is
    /// replaced and the replacement moves to the newest position.
    pub fn register(&mut self, name: impl Into<String>, capability: impl Into<Capability>) {
        let name = name.into();
        if let Some(index) = self.entries.iter().position(|(existing, _)| *existing == name) {
            warn!(capability = %name, "Replacing previously registered capability");
            self.entries.remove(index);
        }
        self.entries.push((name, capability.into()));
    }

    /// Register under the capability's default global name
    pub fn register_default(&mut self, capability: impl Into<Capability>) {
        let capability = capability.into();
        self.register(capability.default_name(), capability);
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Install every capability in registration order. The first failure
    /// stops the install; nothing after it is wired in.
    pub fn install_all<'js>(
        &self,
        ctx: &Ctx<'js>,
        globals: &Object<'js>,
        env: &CapabilityEnv,
    ) -> Result<(), ExecutionError> {
        for (name, capability) in &self.entries {
            if let Err(err) = capability.install(ctx, globals, env) {
                let fault = catch_fault(ctx, err);
                return Err(ExecutionError::CapabilityInstall {
                    name: name.clone(),
                    message: fault.message,
                });
            }
            debug!(capability = %name, "Installed capability");
        }
        Ok(())
    }

    /// Release every capability in reverse registration order, logging
    /// failures instead of returning them
    pub fn release_all<'js>(&self, ctx: &Ctx<'js>, globals: &Object<'js>) {
        for (name, capability) in self.entries.iter().rev() {
            match capability.release(ctx, globals) {
                Ok(()) => debug!(capability = %name, "Released capability"),
                Err(err) => {
                    let fault = catch_fault(ctx, err);
                    warn!(capability = %name, error = %fault.message, "Capability release failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
