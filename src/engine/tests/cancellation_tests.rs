//! force_stop from other threads, in every phase of an execution

use serde_json::json;
use std::thread;
use std::time::Duration;

use super::helpers::{engine_in, script_tree};
use crate::capabilities::BridgeCapability;
use crate::error::{ErrorKind, ExecutionError};

/// Call force_stop from a plain OS thread after `delay`
fn stop_later(handle: crate::engine::EngineHandle, delay: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        thread::sleep(delay);
        handle.force_stop();
    })
}

#[tokio::test]
async fn test_force_stop_interrupts_busy_loop() {
    let dir = script_tree(&[("spin.js", "while (true) {}")]);
    let (mut engine, console) = engine_in(dir.path(), BridgeCapability::new());

    let stopper = stop_later(engine.handle(), Duration::from_millis(50));
    let err = engine.execute_path(dir.path().join("spin.js")).await.unwrap_err();
    stopper.join().unwrap();

    assert!(matches!(err, ExecutionError::Cancelled));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!err.is_engine_fault());
    assert_eq!(console.errors().len(), 1);
}

#[tokio::test]
async fn test_force_stop_with_pending_timer() {
    let dir = script_tree(&[(
        "wait.mjs",
        "export default await new Promise((resolve) => setTimeout(resolve, 60000));",
    )]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    let stopper = stop_later(engine.handle(), Duration::from_millis(50));
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        engine.execute_path(dir.path().join("wait.mjs")),
    )
    .await
    .expect("execution should stop promptly")
    .unwrap_err();
    stopper.join().unwrap();

    assert!(matches!(err, ExecutionError::Cancelled));
}

#[tokio::test]
async fn test_force_stop_with_pending_bridge_call() {
    let bridge = BridgeCapability::new().function("hang", |_args| async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!(null))
    });
    let dir = script_tree(&[("hang.mjs", "export default await native.call('hang');")]);
    let (mut engine, _console) = engine_in(dir.path(), bridge);

    let stopper = stop_later(engine.handle(), Duration::from_millis(50));
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        engine.execute_path(dir.path().join("hang.mjs")),
    )
    .await
    .expect("execution should stop promptly")
    .unwrap_err();
    stopper.join().unwrap();

    assert!(matches!(err, ExecutionError::Cancelled));
}

#[tokio::test]
async fn test_force_stop_is_idempotent_and_engine_recovers() {
    let dir = script_tree(&[("ok.js", "return 'again';")]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    // A stop while idle cancels the next execution only
    let handle = engine.handle();
    handle.force_stop();
    handle.force_stop();
    assert!(handle.is_stop_requested());

    let err = engine.execute_path(dir.path().join("ok.js")).await.unwrap_err();
    assert!(matches!(err, ExecutionError::Cancelled));
    assert!(!handle.is_stop_requested());

    let value = engine.execute_path(dir.path().join("ok.js")).await.unwrap();
    assert_eq!(value, json!("again"));
}

#[tokio::test]
async fn test_stop_after_completion_changes_nothing() {
    let dir = script_tree(&[("ok.js", "return 7;")]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    assert_eq!(engine.execute_path(dir.path().join("ok.js")).await.unwrap(), json!(7));
    engine.destroy();
    engine.force_stop();
    assert!(matches!(
        engine.execute_path(dir.path().join("ok.js")).await,
        Err(ExecutionError::Disposed)
    ));
}

#[tokio::test]
async fn test_late_tracker_cancel_does_not_leak_into_next_execution() {
    let dir = script_tree(&[("ok.js", "return 'fresh';")]);
    let (mut engine, _console) = engine_in(dir.path(), BridgeCapability::new());

    assert_eq!(engine.execute_path(dir.path().join("ok.js")).await.unwrap(), json!("fresh"));

    // force_stop raced with finish: the stop flag was cleared, then the
    // tracker cancel landed
    engine.tracker.cancel();
    assert!(!engine.handle().is_stop_requested());

    let value = engine.execute_path(dir.path().join("ok.js")).await.unwrap();
    assert_eq!(value, json!("fresh"));
}
