//! QuickJS resolver/loader pair backed by the module session

use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{Ctx, Module};
use std::path::Path;
use tracing::trace;

use super::{path_of, ImportKind, ModuleForm, ModuleSession};
use crate::error::catch_fault;

pub(crate) struct SessionResolver {
    session: ModuleSession,
}

impl SessionResolver {
    pub fn new(session: ModuleSession) -> Self {
        Self { session }
    }
}

impl Resolver for SessionResolver {
    fn resolve(&mut self, _ctx: &Ctx<'_>, base: &str, name: &str) -> rquickjs::Result<String> {
        match self.session.resolve(name, Some(base), ImportKind::Import) {
            Ok(path) => Ok(self.session.module_name(&path)),
            Err(err) => Err(rquickjs::Error::new_resolving_message(base, name, err.to_string())),
        }
    }
}

pub(crate) struct SessionLoader {
    session: ModuleSession,
}

impl SessionLoader {
    pub fn new(session: ModuleSession) -> Self {
        Self { session }
    }
}

impl Loader for SessionLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        let path = path_of(name);
        let module = self
            .session
            .fetch(path)
            .map_err(|err| rquickjs::Error::new_loading_message(name, format!("read: {}", err)))?;

        let source = match module.form {
            ModuleForm::Esm => module.source.to_string(),
            ModuleForm::Classic if is_json(path) => match json_facade(&module.source) {
                Ok(source) => source,
                Err(message) => {
                    self.session.record_compile_failure(path, message.clone());
                    return Err(rquickjs::Error::new_loading_message(name, message));
                }
            },
            ModuleForm::Classic => classic_facade(&path.to_string_lossy()),
        };
        trace!(module = name, form = ?module.form, "Declaring module");

        Module::declare(ctx.clone(), name, source).map_err(|err| {
            let fault = catch_fault(ctx, err);
            self.session.record_compile_failure(path, fault.message.clone());
            rquickjs::Error::new_loading_message(name, fault.message)
        })
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

/// ESM view of a CommonJS module: its exports become the default export.
/// Goes through the session's `require` table so both worlds share one instance.
fn classic_facade(path: &str) -> String {
    let literal = serde_json::Value::String(path.to_string()).to_string();
    format!("export default globalThis.__loadClassic({});\n", literal)
}

fn json_facade(text: &str) -> Result<String, String> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|err| format!("invalid JSON: {}", err))?;
    Ok(format!("export default {};\n", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_facade_quotes_the_path() {
        assert_eq!(
            classic_facade("/app/lib \"x\".js"),
            "export default globalThis.__loadClassic(\"/app/lib \\\"x\\\".js\");\n"
        );
    }

    #[test]
    fn test_json_facade_validates() {
        assert_eq!(json_facade(r#"{"a": [1, 2]}"#).unwrap(), "export default {\"a\":[1,2]};\n");
        assert!(json_facade("{ nope").is_err());
    }
}
