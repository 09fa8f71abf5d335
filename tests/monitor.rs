use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use prism_engine::monitor::StateMonitor;
use prism_engine::scene::{ObjectKind, SceneGraph};
use prism_engine::script::ScriptHost;
use prism_engine::{Bridge, BridgeConfig};

const DEBUG_SCRIPT: &str = r#"
fn sample(state) {
    record("sampled:" + state.display.ticks + ":" + state.contexts.len());
}
"#;

type CallLog = Arc<Mutex<Vec<String>>>;

fn debug_host(script: &str) -> (ScriptHost, CallLog) {
    let mut host = ScriptHost::from_source("watch", script).expect("script compiles");
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    host.engine_mut().register_fn("record", move |entry: &str| {
        sink.lock().expect("log lock").push(entry.to_string());
    });
    (host, calls)
}

/// Simulates a non-blocking stream: yields one chunk per poll, signalling
/// `WouldBlock` in between like a readiness-based source does.
struct ChunkedSource {
    chunks: VecDeque<Vec<u8>>,
    ready: bool,
}

impl ChunkedSource {
    fn new(payload: &[u8], chunk_size: usize) -> Self {
        let chunks = payload.chunks(chunk_size).map(|chunk| chunk.to_vec()).collect();
        ChunkedSource { chunks, ready: true }
    }

    fn exhausted(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Read for ChunkedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.ready {
            self.ready = true;
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "not ready"));
        }
        match self.chunks.pop_front() {
            Some(chunk) => {
                assert!(buf.len() >= chunk.len(), "test chunks fit the read buffer");
                buf[..chunk.len()].copy_from_slice(&chunk);
                self.ready = false;
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }
}

fn engine_dump() -> Vec<u8> {
    let config = BridgeConfig { appname: "demo".to_string(), ..BridgeConfig::default() };
    let bridge = Bridge::with_source(&config, "fn demo() {}").expect("script compiles");
    let mut scene = SceneGraph::new();
    scene.alloc(ObjectKind::Video);
    scene.alloc(ObjectKind::Audio);
    let mut out = Vec::new();
    bridge.write_state_dump(&scene, &mut out).expect("dump");
    out
}

#[test]
fn a_block_split_across_polls_yields_exactly_one_sample() {
    let dump = engine_dump();
    let (mut host, calls) = debug_host(DEBUG_SCRIPT);
    let mut monitor = StateMonitor::new();
    let mut source = ChunkedSource::new(&dump, 7);

    let mut consumed = 0;
    while !source.exhausted() || monitor.buffered() > 0 {
        consumed += monitor.poll(&mut source, &mut host).expect("poll");
        if source.exhausted() && consumed > 0 {
            break;
        }
    }
    assert_eq!(consumed, 1);
    let calls = calls.lock().expect("log lock");
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("sampled:0:"), "unexpected sample: {}", calls[0]);
}

#[test]
fn concatenated_dumps_yield_one_sample_each() {
    let mut payload = engine_dump();
    payload.extend_from_slice(&engine_dump());
    let (mut host, calls) = debug_host(DEBUG_SCRIPT);
    let mut monitor = StateMonitor::new();
    let mut source = ChunkedSource::new(&payload, 64);

    let mut consumed = 0;
    for _ in 0..payload.len() {
        consumed += monitor.poll(&mut source, &mut host).expect("poll");
        if source.exhausted() {
            break;
        }
    }
    // drain whatever the last chunk completed
    consumed += monitor.poll(&mut source, &mut host).expect("poll");
    assert_eq!(consumed, 2);
    assert_eq!(calls.lock().expect("log lock").len(), 2);
}

#[test]
fn missing_sample_function_drops_the_block_quietly() {
    let dump = engine_dump();
    let (mut host, calls) = debug_host("fn unrelated() {}");
    let mut monitor = StateMonitor::new();
    let mut source = ChunkedSource::new(&dump, 4096);

    let mut consumed = 0;
    for _ in 0..8 {
        consumed += monitor.poll(&mut source, &mut host).expect("poll");
    }
    assert_eq!(consumed, 0, "a block without a consumer counts as ignored");
    assert!(calls.lock().expect("log lock").is_empty());
    assert_eq!(monitor.buffered(), 0, "the ignored block is still removed from the buffer");
}

#[test]
fn partial_data_stays_buffered_between_polls() {
    let dump = engine_dump();
    let half = dump.len() / 2;
    let (mut host, calls) = debug_host(DEBUG_SCRIPT);
    let mut monitor = StateMonitor::new();

    let mut first_half = ChunkedSource::new(&dump[..half], 4096);
    assert_eq!(monitor.poll(&mut first_half, &mut host).expect("poll"), 0);
    assert!(monitor.buffered() > 0, "incomplete block is retained");
    assert!(calls.lock().expect("log lock").is_empty());

    let mut second_half = ChunkedSource::new(&dump[half..], 4096);
    let mut consumed = monitor.poll(&mut second_half, &mut host).expect("poll");
    consumed += monitor.poll(&mut second_half, &mut host).expect("poll");
    assert_eq!(consumed, 1);
    assert_eq!(calls.lock().expect("log lock").len(), 1);
}
