use crate::binder::{ArgValue, ArgVec};
use crate::context::{CorrelationMap, MODULE_HEADER};
use crate::ids::RequestId;
use crate::runtime_config;
use may::coroutine;
use may::sync::mpsc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Engine-level facts a handler constructor may want: stable for the
/// process lifetime.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Module identity reported in correlation and logs.
    pub module_id: String,
}

/// Response body produced by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Text(String),
    Json(Value),
    Binary(Vec<u8>),
}

/// What a handler hands back on success: status plus optional headers and
/// body. Headers are emitted verbatim, duplicates included.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResult {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub payload: Payload,
}

impl HandlerResult {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            payload: Payload::None,
        }
    }

    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            payload: Payload::Json(body),
        }
    }

    #[must_use]
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            payload: Payload::Text(body.to_string()),
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Terminal outcome of one handler invocation, sent once over the reply
/// channel.
#[derive(Debug)]
pub enum HandlerReply {
    /// Handler completed and produced a response.
    Done(HandlerResult),
    /// Handler signalled failure. An embedded response is written as-is;
    /// without one the writer emits a 500 naming the missing response.
    Failed {
        response: Option<HandlerResult>,
        message: String,
    },
    /// Handler panicked, or could not be constructed or reached.
    Crashed { message: String },
}

/// Consume-once reply sender handed to the handler inside a call.
///
/// Exactly one reply per call: `respond` takes `self` by value, so the
/// type system enforces it. Stream-chunk invocations carry a no-op sink,
/// only the completion call gets a live one.
pub struct ResponseSink {
    tx: Option<mpsc::Sender<HandlerReply>>,
}

impl ResponseSink {
    /// Live sink plus the receiver the dispatching side blocks on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<HandlerReply>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that swallows the reply. Used for stream-chunk invocations,
    /// where only the final completion call may answer the request.
    #[must_use]
    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub fn respond(self, reply: HandlerReply) {
        if let Some(tx) = self.tx {
            if tx.send(reply).is_err() {
                warn!("reply channel closed before handler responded");
            }
        }
    }

    /// Raw sender for the dispatcher's panic recovery path.
    pub(crate) fn raw(&self) -> Option<mpsc::Sender<HandlerReply>> {
        self.tx.clone()
    }
}

/// One invocation of a handler operation.
pub struct HandlerCall {
    pub request_id: RequestId,
    pub tenant: Option<String>,
    pub correlation: CorrelationMap,
    /// Positional arguments in declaration order, reserved tail included.
    pub args: ArgVec,
    pub sink: ResponseSink,
}

/// Per-request handler instance. Constructed fresh for every call by the
/// operation's [`HandlerFactory`].
pub trait Handler {
    fn invoke(&self, call: HandlerCall);
}

/// Builds handler instances. The context-aware constructor is tried first;
/// factories that don't care about the context fall back to `construct`.
pub trait HandlerFactory: Send + Sync {
    /// Context-aware constructor. The default declines, routing
    /// construction to [`HandlerFactory::construct`].
    fn with_context(&self, _exec: &ExecContext, _tenant: Option<&str>) -> Option<Box<dyn Handler>> {
        None
    }

    fn construct(&self) -> Box<dyn Handler>;
}

impl<F> HandlerFactory for F
where
    F: Fn(HandlerCall) + Send + Sync + Clone + 'static,
{
    fn construct(&self) -> Box<dyn Handler> {
        struct FnHandler<G>(G);
        impl<G: Fn(HandlerCall)> Handler for FnHandler<G> {
            fn invoke(&self, call: HandlerCall) {
                (self.0)(call);
            }
        }
        Box::new(FnHandler(self.clone()))
    }
}

type CallSender = mpsc::Sender<HandlerCall>;

/// Routes calls to registered handler coroutines by operation name.
pub struct Dispatcher {
    channels: HashMap<String, CallSender>,
    exec: Arc<ExecContext>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(module_id: &str) -> Self {
        Self {
            channels: HashMap::new(),
            exec: Arc::new(ExecContext {
                module_id: module_id.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn exec_context(&self) -> &ExecContext {
        &self.exec
    }

    #[must_use]
    pub fn is_registered(&self, handler_name: &str) -> bool {
        self.channels.contains_key(handler_name)
    }

    /// Register an operation: spawns the coroutine that constructs a fresh
    /// handler per call and invokes it under panic recovery.
    ///
    /// Re-registering a name drops the old sender, which closes the old
    /// coroutine's channel and lets it exit.
    ///
    /// # Safety
    ///
    /// `may::coroutine::Builder::spawn` is unsafe in the `may` runtime;
    /// the caller must ensure the runtime is initialized (stack size
    /// configured, see [`crate::runtime_config`]) before registering.
    pub unsafe fn register(&mut self, name: &str, factory: Arc<dyn HandlerFactory>) {
        let (tx, rx) = mpsc::channel::<HandlerCall>();
        let name = name.to_string();
        if self.channels.remove(&name).is_some() {
            warn!(handler_name = %name, "replacing existing handler registration");
        }

        let exec = Arc::clone(&self.exec);
        let coroutine_name = name.clone();
        let stack_size = runtime_config::stack_size();
        // SAFETY: spawn is unsafe per the may runtime contract; the factory
        // is Send + Sync + 'static and all per-call state moves into the
        // coroutine through the channel.
        let spawned = unsafe {
            coroutine::Builder::new()
                .stack_size(stack_size)
                .spawn(move || {
                    debug!(handler_name = %coroutine_name, stack_size, "handler coroutine started");
                    for call in rx.iter() {
                        run_call(&coroutine_name, &exec, factory.as_ref(), call);
                    }
                    debug!(handler_name = %coroutine_name, "handler coroutine exited");
                })
        };

        if let Err(e) = spawned {
            error!(handler_name = %name, error = %e, "failed to spawn handler coroutine");
            return;
        }
        info!(
            handler_name = %name,
            total_handlers = self.channels.len() + 1,
            "handler registered"
        );
        self.channels.insert(name, tx);
    }

    /// Send a call to the named operation's coroutine. `false` means the
    /// operation is not registered or its coroutine is gone; the caller
    /// answers the request itself in that case.
    pub fn dispatch(&self, handler_name: &str, call: HandlerCall) -> bool {
        let Some(tx) = self.channels.get(handler_name) else {
            error!(
                handler_name,
                available = self.channels.len(),
                "no handler registered for operation"
            );
            return false;
        };
        if let Err(e) = tx.send(call) {
            error!(handler_name, error = %e, "handler coroutine is gone");
            return false;
        }
        true
    }
}

fn run_call(name: &str, exec: &ExecContext, factory: &dyn HandlerFactory, mut call: HandlerCall) {
    // Every invocation carries the module identity, in the correlation
    // map and in the injected header-map argument alike.
    call.correlation.insert(MODULE_HEADER, &exec.module_id);
    for slot in call.args.iter_mut() {
        if let ArgValue::Headers(map) = slot {
            map.insert(MODULE_HEADER, &exec.module_id);
        }
    }
    let request_id = call.request_id;
    let error_tx = call.sink.raw();
    let started = Instant::now();
    info!(
        request_id = %request_id,
        handler_name = %name,
        module_id = %exec.module_id,
        tenant = call.tenant.as_deref().unwrap_or(""),
        args = call.args.len(),
        "handler invocation start"
    );
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let handler = factory
            .with_context(exec, call.tenant.as_deref())
            .unwrap_or_else(|| factory.construct());
        handler.invoke(call);
    }));
    match outcome {
        Ok(()) => {
            info!(
                request_id = %request_id,
                handler_name = %name,
                module_id = %exec.module_id,
                execution_ms = started.elapsed().as_millis() as u64,
                "handler invocation complete"
            );
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(
                request_id = %request_id,
                handler_name = %name,
                module_id = %exec.module_id,
                panic_message = %message,
                "handler panicked"
            );
            if let Some(tx) = error_tx {
                let _ = tx.send(HandlerReply::Crashed { message });
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn call_with_sink() -> (HandlerCall, mpsc::Receiver<HandlerReply>) {
        let (sink, rx) = ResponseSink::channel();
        (
            HandlerCall {
                request_id: RequestId::new(),
                tenant: Some("diku".to_string()),
                correlation: CorrelationMap::new(),
                args: smallvec![],
                sink,
            },
            rx,
        )
    }

    #[test]
    fn registered_handler_replies_through_the_sink() {
        let mut dispatcher = Dispatcher::new("mod-notes-1.0");
        unsafe {
            dispatcher.register(
                "list_notes",
                Arc::new(|call: HandlerCall| {
                    call.sink
                        .respond(HandlerReply::Done(HandlerResult::json(
                            200,
                            serde_json::json!({"notes": []}),
                        )));
                }),
            );
        }
        let (call, rx) = call_with_sink();
        assert!(dispatcher.dispatch("list_notes", call));
        match rx.recv().unwrap() {
            HandlerReply::Done(result) => assert_eq!(result.status, 200),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn module_id_is_stamped_into_every_invocation() {
        let mut dispatcher = Dispatcher::new("mod-notes-1.0");
        unsafe {
            dispatcher.register(
                "whereami",
                Arc::new(|call: HandlerCall| {
                    let from_correlation = call
                        .correlation
                        .get(MODULE_HEADER)
                        .unwrap_or("")
                        .to_string();
                    let from_headers_arg = match &call.args[0] {
                        ArgValue::Headers(map) => {
                            map.get(MODULE_HEADER).unwrap_or("").to_string()
                        }
                        other => panic!("expected correlation map, got {other:?}"),
                    };
                    assert_eq!(from_correlation, from_headers_arg);
                    call.sink.respond(HandlerReply::Done(HandlerResult::text(
                        200,
                        &from_correlation,
                    )));
                }),
            );
        }
        let (sink, rx) = ResponseSink::channel();
        let call = HandlerCall {
            request_id: RequestId::new(),
            tenant: Some("diku".to_string()),
            correlation: CorrelationMap::new(),
            args: smallvec![ArgValue::Headers(CorrelationMap::new())],
            sink,
        };
        assert!(dispatcher.dispatch("whereami", call));
        match rx.recv().unwrap() {
            HandlerReply::Done(result) => {
                assert_eq!(result.payload, Payload::Text("mod-notes-1.0".to_string()));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn unregistered_operation_is_reported_to_the_caller() {
        let dispatcher = Dispatcher::new("mod-notes-1.0");
        let (call, _rx) = call_with_sink();
        assert!(!dispatcher.dispatch("missing", call));
    }

    #[test]
    fn panicking_handler_yields_a_crashed_reply() {
        let mut dispatcher = Dispatcher::new("mod-notes-1.0");
        unsafe {
            dispatcher.register(
                "explode",
                Arc::new(|_call: HandlerCall| panic!("boom")),
            );
        }
        let (call, rx) = call_with_sink();
        assert!(dispatcher.dispatch("explode", call));
        match rx.recv().unwrap() {
            HandlerReply::Crashed { message } => assert_eq!(message, "boom"),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn context_aware_factory_takes_precedence() {
        struct TenantEcho;
        impl Handler for TenantEcho {
            fn invoke(&self, call: HandlerCall) {
                let tenant = call.tenant.clone().unwrap_or_default();
                call.sink
                    .respond(HandlerReply::Done(HandlerResult::text(200, &tenant)));
            }
        }
        struct Factory;
        impl HandlerFactory for Factory {
            fn with_context(
                &self,
                _exec: &ExecContext,
                _tenant: Option<&str>,
            ) -> Option<Box<dyn Handler>> {
                Some(Box::new(TenantEcho))
            }
            fn construct(&self) -> Box<dyn Handler> {
                unreachable!("context constructor always succeeds here")
            }
        }
        let mut dispatcher = Dispatcher::new("mod-notes-1.0");
        unsafe {
            dispatcher.register("whoami", Arc::new(Factory));
        }
        let (call, rx) = call_with_sink();
        assert!(dispatcher.dispatch("whoami", call));
        match rx.recv().unwrap() {
            HandlerReply::Done(result) => {
                assert_eq!(result.payload, Payload::Text("diku".to_string()));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }
}
