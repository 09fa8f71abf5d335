use std::fs;
use std::sync::{Arc, Mutex};

use prism_engine::dispatch::DispatchOutcome;
use prism_engine::escalation::RunMode;
use prism_engine::events::{DigitalInput, EngineEvent, IoEvent, KeyModifiers};
use prism_engine::scene::{ObjectKind, SceneGraph};
use prism_engine::{Bridge, BridgeConfig};

const FAULTY_SCRIPT: &str = r#"
fn demo_input(tbl) {
    throw "handler exploded";
}

fn demo_clock_pulse(tick, pulses) {
    record("clock:" + tick);
}
"#;

type CallLog = Arc<Mutex<Vec<String>>>;

fn faulty_bridge(verbosity: u8, crash_dir: &std::path::Path) -> (Bridge, CallLog) {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = BridgeConfig {
        appname: "demo".to_string(),
        debug_verbosity: verbosity,
        crash_dir: crash_dir.to_path_buf(),
        ..BridgeConfig::default()
    };
    let mut bridge = Bridge::with_source(&config, FAULTY_SCRIPT).expect("script compiles");
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    bridge.host_mut().engine_mut().register_fn("record", move |entry: &str| {
        sink.lock().expect("log lock").push(entry.to_string());
    });
    (bridge, calls)
}

fn key_press() -> EngineEvent {
    EngineEvent::Io(IoEvent::Digital(DigitalInput::Translated {
        devid: 0,
        subid: 0,
        scancode: 1,
        keysym: 27,
        modifiers: KeyModifiers::empty(),
        active: true,
    }))
}

#[test]
fn normal_mode_fault_is_fatal_and_unwinds_the_context_stack() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut bridge, _calls) = faulty_bridge(0, dir.path());
    let mut scene = SceneGraph::new();
    let bottom = scene.alloc(ObjectKind::Video);
    assert_eq!(bridge.push_context(&mut scene), 1);
    scene.alloc(ObjectKind::Video);
    assert_eq!(bridge.push_context(&mut scene), 2);

    let outcome = bridge.dispatch_now(&mut scene, &key_press());
    assert_eq!(outcome, DispatchOutcome::Fatal);
    assert_eq!(bridge.stack().depth(), 0, "stack fully unwound before termination");
    assert!(scene.is_alive(bottom), "bottom context restored");
}

#[test]
fn fatal_fault_surfaces_through_the_tick_loop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut bridge, _calls) = faulty_bridge(0, dir.path());
    let mut scene = SceneGraph::new();
    bridge.push_event(key_press());
    let err = bridge.tick(&mut scene, 1).expect_err("fatal fault must propagate");
    assert!(err.to_string().contains("fatal fault"));
}

#[test]
fn high_verbosity_survives_the_fault_and_persists_a_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut bridge, calls) = faulty_bridge(3, dir.path());
    let mut scene = SceneGraph::new();

    let outcome = bridge.dispatch_now(&mut scene, &key_press());
    assert_eq!(outcome, DispatchOutcome::Faulted, "verbosity above the stay-alive threshold");

    // the engine is still alive: later dispatches keep working
    bridge.tick(&mut scene, 1).expect("tick after survived fault");
    assert_eq!(calls.lock().expect("log lock").as_slice(), ["clock:1".to_string()]);

    let snapshots: Vec<_> = fs::read_dir(dir.path())
        .expect("crash dir readable")
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "rhai"))
        .collect();
    assert_eq!(snapshots.len(), 1, "one crash snapshot per fault");
    let dump = fs::read_to_string(&snapshots[0]).expect("snapshot readable");
    assert!(dump.ends_with("#ENDBLOCK\n"));

    let sidecar = snapshots[0].with_extension("json");
    let report = fs::read_to_string(sidecar).expect("sidecar readable");
    assert!(report.contains("handler exploded"));
}

#[test]
fn low_debug_verbosity_still_escalates_to_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut bridge, _calls) = faulty_bridge(1, dir.path());
    let mut scene = SceneGraph::new();
    let outcome = bridge.dispatch_now(&mut scene, &key_press());
    assert_eq!(outcome, DispatchOutcome::Fatal, "verbosity 1 is below the stay-alive threshold");

    let wrote_snapshot = fs::read_dir(dir.path())
        .expect("crash dir readable")
        .flatten()
        .any(|entry| entry.path().extension().is_some_and(|ext| ext == "rhai"));
    assert!(wrote_snapshot, "snapshot persisted even on the fatal path");
}

#[test]
fn panic_is_one_way_and_always_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    // highest verbosity normally survives faults; panic must not
    let (mut bridge, _calls) = faulty_bridge(4, dir.path());
    let mut scene = SceneGraph::new();

    let fatal = bridge.panic(&mut scene);
    assert!(fatal.to_string().contains("script panic"));
    assert_eq!(bridge.escalation().mode(), RunMode::Panic);

    // any later fault stays fatal regardless of the old verbosity
    let outcome = bridge.dispatch_now(&mut scene, &key_press());
    assert_eq!(outcome, DispatchOutcome::Fatal);
}
