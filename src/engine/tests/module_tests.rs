//! Module resolution, loading and cycles through the engine

use serde_json::json;

use super::helpers::{engine_in, script_tree};
use crate::capabilities::BridgeCapability;
use crate::engine::EngineOption;
use crate::error::{ErrorKind, ExecutionError};

#[tokio::test]
async fn test_esm_cycle_sees_initialized_bindings() {
    let dir = script_tree(&[
        (
            "a.mjs",
            "import { b } from './b.mjs';\nexport const a = 'A';\nexport default b();\n",
        ),
        (
            "b.mjs",
            "import { a } from './a.mjs';\nexport function b() { return 'b sees ' + a; }\n",
        ),
    ]);
    let (mut engine, console) = engine_in(dir.path(), BridgeCapability::new());

    let value = engine.execute_path(dir.path().join("a.mjs")).await.unwrap();
    assert_eq!(value, json!("b sees A"));
    assert!(console.errors().is_empty());
}

#[tokio::test]
async fn test_require_from_module_root_and_json() {
    let dir = script_tree(&[
        ("node_modules/greeter/index.js", "module.exports = (name) => 'hi ' + name;"),
        ("data.json", "{ \"name\": \"ada\" }"),
        (
            "index.js",
            "const greet = require('greeter');\nconst data = require('./data.json');\nreturn greet(data.name);\n",
        ),
    ]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    let value = engine.execute_path(dir.path().join("index.js")).await.unwrap();
    assert_eq!(value, json!("hi ada"));
    // init wrote a manifest for the package directory
    assert!(dir.path().join("node_modules/greeter/package.json").is_file());
}

#[tokio::test]
async fn test_esm_imports_classic_module() {
    let dir = script_tree(&[
        ("lib/math.cjs", "exports.double = (n) => n * 2;"),
        ("index.mjs", "import math from './lib/math.cjs';\nexport default math.double(21);\n"),
    ]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    let value = engine.execute_path(dir.path().join("index.mjs")).await.unwrap();
    assert_eq!(value, json!(42));
}

#[tokio::test]
async fn test_package_type_module_makes_js_esm() {
    let dir = script_tree(&[
        ("app/package.json", "{ \"type\": \"module\" }"),
        ("app/main.js", "export default 'esm';"),
    ]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    let value = engine.execute_path(dir.path().join("app/main.js")).await.unwrap();
    assert_eq!(value, json!("esm"));
}

#[tokio::test]
async fn test_missing_require_is_a_resolution_error() {
    let dir = script_tree(&[("index.js", "require('left-pad');\nreturn 1;\n")]);
    let (mut engine, console) = engine_in(dir.path(), BridgeCapability::new());

    let err = engine.execute_path(dir.path().join("index.js")).await.unwrap_err();
    match &err {
        ExecutionError::Resolution { specifier, .. } => assert_eq!(specifier, "left-pad"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert_eq!(console.errors().len(), 1);
}

#[tokio::test]
async fn test_missing_import_is_a_resolution_error() {
    let dir = script_tree(&[("index.mjs", "import missing from './nowhere.mjs';\nexport default missing;\n")]);
    let (mut engine, console) = engine_in(dir.path(), BridgeCapability::new());

    let err = engine.execute_path(dir.path().join("index.mjs")).await.unwrap_err();
    match &err {
        ExecutionError::Resolution { specifier, .. } => assert_eq!(specifier, "./nowhere.mjs"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert_eq!(console.errors().len(), 1);
}

#[tokio::test]
async fn test_missing_nested_import_is_a_resolution_error() {
    let dir = script_tree(&[
        ("lib.mjs", "export { gone } from './gone.mjs';\n"),
        ("index.mjs", "import { gone } from './lib.mjs';\nexport default gone;\n"),
    ]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    let err = engine.execute_path(dir.path().join("index.mjs")).await.unwrap_err();
    match &err {
        ExecutionError::Resolution { specifier, .. } => assert_eq!(specifier, "./gone.mjs"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_caught_resolution_failure_does_not_leak() {
    let dir = script_tree(&[(
        "index.js",
        "let found = true;\ntry { require('optional-dep'); } catch (err) { found = false; }\nreturn found;\n",
    )]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    let value = engine.execute_path(dir.path().join("index.js")).await.unwrap();
    assert_eq!(value, json!(false));
}

#[tokio::test]
async fn test_syntax_error_in_entry_is_a_compile_error() {
    let dir = script_tree(&[("broken.mjs", "export default {;\n")]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    let err = engine.execute_path(dir.path().join("broken.mjs")).await.unwrap_err();
    match &err {
        ExecutionError::Compile { path, .. } => assert!(path.ends_with("broken.mjs")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_syntax_error_in_required_module_is_a_compile_error() {
    let dir = script_tree(&[
        ("bad.js", "function (\n"),
        ("index.js", "return require('./bad');"),
    ]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    let err = engine.execute_path(dir.path().join("index.js")).await.unwrap_err();
    match &err {
        ExecutionError::Compile { path, .. } => assert!(path.ends_with("bad.js")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_working_directory_option_moves_top_level_require() {
    let dir = script_tree(&[
        ("shared/helper.js", "module.exports = 'from shared';"),
        ("scripts/index.js", "return globalThis.require('./helper');"),
    ]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    engine.configure(EngineOption::WorkingDirectory(dir.path().join("shared")));
    let value = engine
        .execute_path(dir.path().join("scripts/index.js"))
        .await
        .unwrap();
    assert_eq!(value, json!("from shared"));
}

#[tokio::test]
async fn test_module_cache_is_fresh_per_execution() {
    let dir = script_tree(&[
        ("counter.js", "globalThis.loads = (globalThis.loads || 0) + 1;\nmodule.exports = globalThis.loads;"),
        ("index.js", "return require('./counter');"),
    ]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    assert_eq!(engine.execute_path(dir.path().join("index.js")).await.unwrap(), json!(1));
    assert_eq!(engine.execute_path(dir.path().join("index.js")).await.unwrap(), json!(2));
}

#[tokio::test]
async fn test_es_modules_are_evaluated_again_each_execution() {
    let dir = script_tree(&[
        ("counter.mjs", "globalThis.loads = (globalThis.loads || 0) + 1;\nexport const loads = globalThis.loads;\n"),
        ("index.mjs", "import { loads } from './counter.mjs';\nexport default loads;\n"),
    ]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    assert_eq!(engine.execute_path(dir.path().join("index.mjs")).await.unwrap(), json!(1));
    assert_eq!(engine.execute_path(dir.path().join("index.mjs")).await.unwrap(), json!(2));
}

#[tokio::test]
async fn test_edited_dependency_is_picked_up_by_the_next_execution() {
    let dir = script_tree(&[
        ("dep.mjs", "export const version = 1;\n"),
        ("index.mjs", "import { version } from './dep.mjs';\nexport default version;\n"),
    ]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    assert_eq!(engine.execute_path(dir.path().join("index.mjs")).await.unwrap(), json!(1));
    std::fs::write(dir.path().join("dep.mjs"), "export const version = 2;\n").unwrap();
    assert_eq!(engine.execute_path(dir.path().join("index.mjs")).await.unwrap(), json!(2));
}

#[tokio::test]
async fn test_fixed_dependency_recovers_after_a_failed_run() {
    let dir = script_tree(&[
        ("dep.mjs", "throw new Error('first run broken');\n"),
        ("index.mjs", "import { value } from './dep.mjs';\nexport default value;\n"),
    ]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    let err = engine.execute_path(dir.path().join("index.mjs")).await.unwrap_err();
    match &err {
        ExecutionError::ScriptRejected { reason, .. } => assert_eq!(reason, &json!("Error: first run broken")),
        other => panic!("unexpected error: {other:?}"),
    }

    std::fs::write(dir.path().join("dep.mjs"), "export const value = 'fixed';\n").unwrap();
    let value = engine.execute_path(dir.path().join("index.mjs")).await.unwrap();
    assert_eq!(value, json!("fixed"));
}
