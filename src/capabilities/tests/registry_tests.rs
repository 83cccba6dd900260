use super::*;
use crate::queue::NativeCallQueue;
use rquickjs::{Context, Runtime};
use std::sync::Mutex;

#[derive(Default)]
struct RecordingConsole {
    lines: Mutex<Vec<(ConsoleLevel, String)>>,
}

impl ConsoleSink for RecordingConsole {
    fn write(&self, level: ConsoleLevel, message: &str) {
        self.lines.lock().unwrap().push((level, message.to_string()));
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<(String, bool)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, long: bool) {
        self.notices.lock().unwrap().push((message.to_string(), long));
    }
}

fn with_env<R>(f: impl for<'js> FnOnce(Ctx<'js>, Object<'js>, CapabilityEnv) -> R) -> R {
    let queue = NativeCallQueue::new();
    let env = CapabilityEnv {
        sender: queue.sender(),
        scope: Arc::new(TaskScope::new(None).unwrap()),
        policy: MarshalPolicy::default(),
    };
    let runtime = Runtime::new().unwrap();
    let context = Context::full(&runtime).unwrap();
    context.with(|ctx| {
        let globals = ctx.globals();
        f(ctx, globals, env)
    })
}

#[test]
fn test_register_replaces_and_moves_to_newest_position() {
    let mut registry = CapabilityRegistry::new();
    registry.register("console", ConsoleCapability::default());
    registry.register("timers", TimerCapability::new());
    registry.register("console", ConsoleCapability::default());

    assert_eq!(registry.names(), vec!["timers", "console"]);
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_install_and_release_wire_globals() {
    let mut registry = CapabilityRegistry::new();
    registry.register_default(ConsoleCapability::default());
    registry.register_default(BridgeCapability::new());
    registry.register_default(TimerCapability::new());
    registry.register_default(NotificationCapability::default());
    assert_eq!(registry.names(), vec!["console", "native", "timers", "toast"]);

    with_env(|ctx, globals, env| {
        registry.install_all(&ctx, &globals, &env).unwrap();
        let kinds: String = ctx
            .eval("[typeof console.log, typeof native.call, typeof setTimeout, typeof toast].join(',')")
            .unwrap();
        assert_eq!(kinds, "function,function,function,function");

        registry.release_all(&ctx, &globals);
        let kinds: String = ctx
            .eval("[typeof console, typeof native, typeof setTimeout, typeof toast].join(',')")
            .unwrap();
        assert_eq!(kinds, "undefined,undefined,undefined,undefined");
    });
}

#[test]
fn test_install_failure_is_fatal_and_stops_later_installs() {
    let mut registry = CapabilityRegistry::new();
    registry.register("console", ConsoleCapability::default());
    registry.register("toast", NotificationCapability::default());
    registry.register("timers", TimerCapability::new());

    with_env(|ctx, globals, env| {
        ctx.eval::<(), _>("Object.defineProperty(globalThis, 'toast', { value: 1, configurable: false })")
            .unwrap();

        let err = registry.install_all(&ctx, &globals, &env).unwrap_err();
        match err {
            ExecutionError::CapabilityInstall { name, .. } => assert_eq!(name, "toast"),
            other => panic!("unexpected error: {other:?}"),
        }

        let kinds: String = ctx.eval("[typeof console, typeof setTimeout].join(',')").unwrap();
        assert_eq!(kinds, "object,undefined");
    });
}

#[test]
fn test_console_formats_arguments_for_the_sink() {
    let sink = Arc::new(RecordingConsole::default());
    let mut registry = CapabilityRegistry::new();
    registry.register("console", ConsoleCapability::new(sink.clone()));

    with_env(|ctx, globals, env| {
        registry.install_all(&ctx, &globals, &env).unwrap();
        ctx.eval::<(), _>("console.log('total', 3, { ok: true }); console.error(undefined, [1])")
            .unwrap();
    });

    let lines = sink.lines.lock().unwrap();
    assert_eq!(
        *lines,
        vec![
            (ConsoleLevel::Log, "total 3 {\"ok\":true}".to_string()),
            (ConsoleLevel::Error, "undefined [1]".to_string()),
        ]
    );
}

#[test]
fn test_toast_forwards_to_notifier() {
    let notifier = Arc::new(RecordingNotifier::default());
    let mut registry = CapabilityRegistry::new();
    registry.register("toast", NotificationCapability::new(notifier.clone()));

    with_env(|ctx, globals, env| {
        registry.install_all(&ctx, &globals, &env).unwrap();
        ctx.eval::<(), _>("toast('saved'); toast(404, true)").unwrap();
    });

    assert_eq!(
        *notifier.notices.lock().unwrap(),
        vec![("saved".to_string(), false), ("404".to_string(), true)]
    );
}

#[test]
fn test_unknown_bridge_function_rejects() {
    let mut registry = CapabilityRegistry::new();
    registry.register("native", BridgeCapability::new().function("echo", |args| async move { Ok(args) }));

    with_env(|ctx, globals, env| {
        registry.install_all(&ctx, &globals, &env).unwrap();
        let listed: String = ctx.eval("native.functions.join(',') + ':' + native.has('echo')").unwrap();
        assert_eq!(listed, "echo:true");

        ctx.eval::<(), _>(
            "globalThis.outcome = 'pending'; native.call('missing', {}).catch((err) => { globalThis.outcome = err.message; })",
        )
        .unwrap();
        while ctx.execute_pending_job() {}
        let outcome: String = ctx.globals().get("outcome").unwrap();
        assert_eq!(outcome, "unknown native function 'missing'");
    });
}

#[test]
fn test_fired_timers_leave_no_handles_behind() {
    let timers = TimerCapability::new();

    with_env(|ctx, globals, env| {
        timers.install(&ctx, &globals, &env).unwrap();
        ctx.eval::<(), _>("for (let i = 0; i < 100; i++) setTimeout(() => {}, 0);")
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while env.sender.in_flight() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(env.sender.in_flight(), 0);
        assert_eq!(timers.pending(), 0);
    });
}
