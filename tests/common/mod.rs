//! Shared helpers for the integration suites: a recording wire, route
//! builders with the reserved tail slots, and a one-call request runner.

#![allow(dead_code)]

use ramline::context::{RequestHead, WireResponse};
use ramline::engine::{RequestConn, RestEngine};
use ramline::table::{ParamKind, ParamMeta, ParamType};
use std::sync::{Arc, Mutex, Once};

static TRACING: Once = Once::new();

/// Install an env-filtered subscriber once per test binary. Run with
/// `RUST_LOG=ramline=debug` to watch the pipeline while a test executes.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
pub struct WireState {
    pub status: Option<u16>,
    pub chunked: bool,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub ended: bool,
}

impl WireState {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone, Default)]
pub struct RecordingWire {
    pub state: Arc<Mutex<WireState>>,
}

impl WireResponse for RecordingWire {
    fn set_status(&mut self, status: u16) {
        self.state.lock().unwrap().status = Some(status);
    }
    fn set_chunked(&mut self, chunked: bool) {
        self.state.lock().unwrap().chunked = chunked;
    }
    fn add_header(&mut self, name: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .headers
            .push((name.to_string(), value.to_string()));
    }
    fn write(&mut self, bytes: &[u8]) {
        self.state.lock().unwrap().body.extend_from_slice(bytes);
    }
    fn end(&mut self) {
        self.state.lock().unwrap().ended = true;
    }
}

pub fn recording_wire() -> (Box<dyn WireResponse>, Arc<Mutex<WireState>>) {
    init_tracing();
    let wire = RecordingWire::default();
    let state = Arc::clone(&wire.state);
    (Box::new(wire), state)
}

/// The reserved tail every parameterized operation carries: the
/// correlation map and the result callback in the last two slots.
pub fn reserved_tail(next_pos: usize) -> [ParamMeta; 2] {
    [
        ParamMeta::new("", ParamKind::Body, ParamType::CorrelationMap, next_pos),
        ParamMeta::new("", ParamKind::Body, ParamType::Callback, next_pos + 1),
    ]
}

pub fn tenant_head(method: http::Method, uri: &str) -> RequestHead {
    RequestHead::new(method, uri).header("x-rl-tenant", "diku")
}

/// Run a whole buffered request and hand back the recorded wire state.
pub fn run_request(engine: &RestEngine, head: RequestHead, body: &[u8]) -> Arc<Mutex<WireState>> {
    let (wire, state) = recording_wire();
    let mut conn: RequestConn = engine.handle(head, wire);
    if !body.is_empty() {
        conn.data(body);
    }
    conn.end();
    state
}
