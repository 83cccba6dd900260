//! CommonJS `require` for classic-form modules
//!
//! The module table lives in script space (it has to hand out the same
//! `module` object to every caller); resolution and compilation are native
//! hooks backed by the module session.

use rquickjs::function::Func;
use rquickjs::{Ctx, Exception, Function, Object};
use std::path::Path;

use super::{ImportKind, ModuleSession};
use crate::error::catch_fault;

/// Builds `require` around the native hooks. A module is cached before its
/// body runs, so a cycle sees the partially filled `exports`.
const REQUIRE_PRELUDE: &str = r#"
(function (hooks) {
  const table = new Map();

  function load(path) {
    const cached = table.get(path);
    if (cached !== undefined) return cached;

    const module = { id: path, filename: path, exports: {}, loaded: false, result: undefined };
    table.set(path, module);
    try {
      const body = hooks.compile(path);
      module.result = body.call(module.exports, module.exports, makeRequire(path), module, path, hooks.dirname(path));
    } catch (err) {
      table.delete(path);
      throw err;
    }
    module.loaded = true;
    return module;
  }

  function makeRequire(from) {
    const require = (specifier) => load(hooks.resolve(String(specifier), from)).exports;
    require.resolve = (specifier) => hooks.resolve(String(specifier), from);
    require.cache = table;
    return require;
  }

  globalThis.require = makeRequire(null);
  Object.defineProperty(globalThis, "__loadClassic", {
    value: (path) => load(path).exports,
    configurable: true,
    enumerable: false,
    writable: false,
  });
  return load;
})
"#;

/// Install a fresh `require` bound to `session` and return the entry point,
/// which loads an absolute path and returns its `module` record.
pub(crate) fn install_require<'js>(ctx: &Ctx<'js>, session: &ModuleSession) -> rquickjs::Result<Function<'js>> {
    let hooks = Object::new(ctx.clone())?;

    let resolver = session.clone();
    hooks.set(
        "resolve",
        Func::from(move |ctx: Ctx<'js>, specifier: String, from: Option<String>| -> rquickjs::Result<String> {
            match resolver.resolve(&specifier, from.as_deref(), ImportKind::Require) {
                Ok(path) => Ok(path.to_string_lossy().into_owned()),
                Err(err) => Err(Exception::throw_message(&ctx, &err.to_string())),
            }
        }),
    )?;

    let compiler = session.clone();
    hooks.set(
        "compile",
        Func::from(move |ctx: Ctx<'js>, path: String| -> rquickjs::Result<Function<'js>> {
            compile(&ctx, &compiler, Path::new(&path))
        }),
    )?;

    hooks.set(
        "dirname",
        Func::from(|path: String| -> String {
            Path::new(&path)
                .parent()
                .map(|dir| dir.to_string_lossy().into_owned())
                .unwrap_or_else(|| "/".to_string())
        }),
    )?;

    let prelude: Function = ctx.eval(REQUIRE_PRELUDE)?;
    prelude.call((hooks,))
}

fn compile<'js>(ctx: &Ctx<'js>, session: &ModuleSession, path: &Path) -> rquickjs::Result<Function<'js>> {
    let module = session.fetch(path).map_err(|err| {
        let message = format!("Cannot read module '{}': {}", path.display(), err);
        session.record_compile_failure(path, message.clone());
        Exception::throw_message(ctx, &message)
    })?;

    let wrapped = match wrap(path, &module.source) {
        Ok(wrapped) => wrapped,
        Err(message) => {
            let message = format!("{}: {}", path.display(), message);
            session.record_compile_failure(path, message.clone());
            return Err(Exception::throw_syntax(ctx, &message));
        }
    };

    ctx.eval::<Function, _>(wrapped).map_err(|err| {
        let fault = catch_fault(ctx, err);
        let detail = fault.message.strip_prefix("SyntaxError: ").unwrap_or(&fault.message);
        let message = format!("{}: {}", path.display(), detail);
        session.record_compile_failure(path, fault.message.clone());
        Exception::throw_syntax(ctx, &message)
    })
}

/// Wrap a classic module body in its CommonJS function scope
fn wrap(path: &Path, source: &str) -> Result<String, String> {
    if path.extension().is_some_and(|ext| ext == "json") {
        let value: serde_json::Value =
            serde_json::from_str(source).map_err(|err| format!("invalid JSON: {}", err))?;
        return Ok(format!(
            "(function (exports, require, module) {{ module.exports = {}; }})",
            value
        ));
    }

    let body = match source.strip_prefix("#!") {
        // Keep the line so positions in stack traces still match
        Some(rest) => match rest.find('\n') {
            Some(end) => &rest[end..],
            None => "",
        },
        None => source,
    };
    Ok(format!(
        "(function (exports, require, module, __filename, __dirname) {{{}\n}})",
        body
    ))
}
