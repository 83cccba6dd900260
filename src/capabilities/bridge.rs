//! `native.call(name, args)` bridge to host async functions
//!
//! Each call is parked in a script-side pending table and dispatched to the
//! host function on the engine's task scope. The result travels back as a
//! native call that settles the parked promise on the runtime thread.

use rquickjs::function::Func;
use rquickjs::{Ctx, Exception, Function, Object, Value};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{define_global, remove_global, CapabilityEnv, NativeCapability};
use crate::marshal::MarshalPolicy;
use crate::queue::native_call;

/// A host function callable from script space
pub type BridgeFn =
    Arc<dyn Fn(JsonValue) -> Pin<Box<dyn Future<Output = anyhow::Result<JsonValue>> + Send>> + Send + Sync>;

const SETTLE_KEY: &str = "__nativeSettle";

const BRIDGE_PRELUDE: &str = r#"
(function (dispatch, names) {
  const pending = new Map();
  let nextId = 1;

  const settle = (id, ok, value) => {
    const entry = pending.get(id);
    if (entry === undefined) return;
    pending.delete(id);
    if (ok) entry.resolve(value);
    else entry.reject(new Error(String(value)));
  };

  const native = Object.freeze({
    call(name, args) {
      return new Promise((resolve, reject) => {
        const id = nextId++;
        pending.set(id, { resolve, reject });
        try {
          dispatch(id, String(name), args === undefined ? null : args);
        } catch (err) {
          pending.delete(id);
          reject(err);
        }
      });
    },
    has(name) {
      return names.includes(String(name));
    },
    get functions() {
      return names.slice();
    },
  });

  return { native, settle };
})
"#;

#[derive(Default, Clone)]
pub struct BridgeCapability {
    functions: HashMap<String, BridgeFn>,
}

impl BridgeCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host function under `name`
    pub fn function<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(JsonValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<JsonValue>> + Send + 'static,
    {
        let f: BridgeFn = Arc::new(move |args| Box::pin(f(args)));
        self.functions.insert(name.into(), f);
        self
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl NativeCapability for BridgeCapability {
    fn install<'js>(&self, ctx: &Ctx<'js>, globals: &Object<'js>, env: &CapabilityEnv) -> rquickjs::Result<()> {
        let functions = self.functions.clone();
        let env = env.clone();
        let dispatch = Func::from(
            move |ctx: Ctx<'js>, id: u32, name: String, args: Value<'js>| -> rquickjs::Result<()> {
                let Some(function) = functions.get(&name).cloned() else {
                    return Err(Exception::throw_type(&ctx, &format!("unknown native function '{}'", name)));
                };
                let args = env.policy.to_json(&args)?;
                debug!(function = %name, id, "Dispatching native call");

                let guard = env.sender.begin();
                let sender = env.sender.clone();
                let policy = env.policy.clone();
                let spawned = env.scope.spawn(async move {
                    let result = function(args).await;
                    sender.enqueue(native_call(move |ctx| settle(ctx, &policy, id, result)));
                    drop(guard);
                });
                if spawned.is_none() {
                    return Err(Exception::throw_internal(&ctx, "native task scope is closed"));
                }
                Ok(())
            },
        );

        let prelude: Function = ctx.eval(BRIDGE_PRELUDE)?;
        let parts: Object = prelude.call((dispatch, self.names()))?;
        define_global(ctx, globals, SETTLE_KEY, parts.get::<_, Function>("settle")?)?;
        define_global(ctx, globals, "native", parts.get::<_, Object>("native")?)
    }

    fn release<'js>(&self, _ctx: &Ctx<'js>, globals: &Object<'js>) -> rquickjs::Result<()> {
        remove_global(globals, "native")?;
        remove_global(globals, SETTLE_KEY)
    }
}

fn settle<'js>(ctx: &Ctx<'js>, policy: &MarshalPolicy, id: u32, result: anyhow::Result<JsonValue>) -> rquickjs::Result<()> {
    let settle: Function = ctx.globals().get(SETTLE_KEY)?;
    match result {
        Ok(value) => settle.call((id, true, policy.to_js(ctx, &value)?)),
        Err(err) => {
            warn!(id, error = %err, "Native function failed");
            settle.call((id, false, format!("{:#}", err)))
        }
    }
}
