use crate::binder::{bind_params, ArgValue, ArgVec};
use crate::context::{
    CorrelationMap, RequestContext, RequestHead, ResponseChannel, WireResponse, ADMIN_PATH_PREFIX,
    STREAM_ABORT_FLAG, STREAM_COMPLETE_FLAG, STREAM_ID_FLAG,
};
use crate::dispatcher::{Dispatcher, HandlerCall, HandlerReply, HandlerResult, ResponseSink};
use crate::response::send_response;
use crate::router::Router;
use crate::table::Route;
use crate::negotiate;
use crate::validate::{CheckOutcome, ValidationEngine};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Query parameter that switches a request into dry validation.
const VALIDATE_FIELD_QUERY: &str = "validate_field";

/// Phase of a stream-capable invocation, mirrored as correlation flags so
/// the handler can tell chunks, completion and abort apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSignal {
    Chunk,
    Complete,
    Abort,
}

impl StreamSignal {
    /// Stamp this phase's flags onto a correlation map. Every phase
    /// carries the stream id; completion and abort add their own flag.
    pub fn stamp(self, correlation: &mut CorrelationMap, stream_id: &str) {
        correlation.insert(STREAM_ID_FLAG, stream_id);
        match self {
            StreamSignal::Chunk => {}
            StreamSignal::Complete => correlation.insert(STREAM_COMPLETE_FLAG, "true"),
            StreamSignal::Abort => correlation.insert(STREAM_ABORT_FLAG, "true"),
        }
    }
}

struct EngineInner {
    router: Router,
    dispatcher: Dispatcher,
    validation: ValidationEngine,
}

/// The metadata-driven dispatch engine. Built once from the route table
/// and a dispatcher with its handlers registered; shared across requests.
#[derive(Clone)]
pub struct RestEngine {
    inner: Arc<EngineInner>,
}

impl RestEngine {
    /// Build the engine: compiles route patterns and entity schemas.
    /// Fails on a malformed table rather than at request time.
    pub fn new(routes: Vec<Route>, dispatcher: Dispatcher) -> anyhow::Result<Self> {
        let validation = ValidationEngine::from_routes(&routes)?;
        let router = Router::new(routes)?;
        info!(
            module_id = %dispatcher.exec_context().module_id,
            "dispatch engine ready"
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                router,
                dispatcher,
                validation,
            }),
        })
    }

    /// Run the head-only phases and return the connection the transport
    /// feeds body bytes into.
    ///
    /// The returned connection may already be finished: tenant
    /// precondition, route lookup and content negotiation all terminate
    /// the response on failure.
    pub fn handle(&self, head: RequestHead, wire: Box<dyn WireResponse>) -> RequestConn {
        let mut ctx = RequestContext::new(&head);
        let mut channel = ResponseChannel::new(wire, &ctx);

        if ctx.tenant().is_none() && !ctx.path.starts_with(ADMIN_PATH_PREFIX) {
            channel.end_with_error(400, "Tenant must be set");
            return RequestConn::finished(&self.inner);
        }

        let Some((route, captures)) = self.inner.router.lookup(&ctx.method, &ctx.path) else {
            channel.end_with_error(
                404,
                &format!("No handler found for {} {}", ctx.method, ctx.path),
            );
            return RequestConn::finished(&self.inner);
        };
        ctx.path_captures = captures;

        negotiate::check_media_types(&route, &mut ctx, &mut channel);
        if channel.ended() {
            return RequestConn::finished(&self.inner);
        }

        match route.stream_position() {
            Some(stream_pos) if route.streaming => {
                // Stream-capable: bind the non-stream arguments once up
                // front, then invoke per chunk as bytes arrive.
                let args = bind_params(&route, &ctx, None, &mut channel);
                if channel.ended() {
                    return RequestConn::finished(&self.inner);
                }
                RequestConn {
                    engine: Arc::clone(&self.inner),
                    state: ConnState::Streaming {
                        route,
                        ctx,
                        channel,
                        args,
                        stream_pos,
                    },
                }
            }
            _ => RequestConn {
                engine: Arc::clone(&self.inner),
                state: ConnState::Buffered {
                    route,
                    ctx,
                    channel,
                    body: Vec::new(),
                },
            },
        }
    }
}

enum ConnState {
    /// Response already ended; remaining body bytes are discarded.
    Finished,
    Buffered {
        route: Arc<Route>,
        ctx: RequestContext,
        channel: ResponseChannel,
        body: Vec<u8>,
    },
    Streaming {
        route: Arc<Route>,
        ctx: RequestContext,
        channel: ResponseChannel,
        /// Bound once at connection setup; the stream slot is refilled
        /// per invocation.
        args: ArgVec,
        stream_pos: usize,
    },
}

/// One request's body-phase state machine. The transport calls [`data`]
/// per body chunk, then exactly one of [`end`] or [`fail`].
///
/// [`data`]: RequestConn::data
/// [`end`]: RequestConn::end
/// [`fail`]: RequestConn::fail
pub struct RequestConn {
    engine: Arc<EngineInner>,
    state: ConnState,
}

impl RequestConn {
    fn finished(engine: &Arc<EngineInner>) -> Self {
        Self {
            engine: Arc::clone(engine),
            state: ConnState::Finished,
        }
    }

    /// True once the response has been written; later body bytes are
    /// ignored.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, ConnState::Finished)
    }

    /// Feed one chunk of request body.
    pub fn data(&mut self, bytes: &[u8]) {
        let mut ended = false;
        match &mut self.state {
            ConnState::Finished => {}
            ConnState::Buffered { body, .. } => body.extend_from_slice(bytes),
            ConnState::Streaming {
                route,
                ctx,
                channel,
                args,
                stream_pos,
            } => {
                invoke_stream_phase(
                    &self.engine,
                    route,
                    ctx,
                    channel,
                    args,
                    *stream_pos,
                    bytes,
                    StreamSignal::Chunk,
                    ResponseSink::noop(),
                );
                ended = channel.ended();
            }
        }
        if ended {
            self.state = ConnState::Finished;
        }
    }

    /// End of body: finish the request and write the response.
    pub fn end(&mut self) {
        match std::mem::replace(&mut self.state, ConnState::Finished) {
            ConnState::Finished => {}
            ConnState::Buffered {
                route,
                ctx,
                mut channel,
                body,
            } => finish_buffered(&self.engine, &route, &ctx, &mut channel, &body),
            ConnState::Streaming {
                route,
                ctx,
                mut channel,
                args,
                stream_pos,
            } => {
                let (sink, rx) = ResponseSink::channel();
                let sent = invoke_stream_phase(
                    &self.engine,
                    &route,
                    &ctx,
                    &mut channel,
                    &args,
                    stream_pos,
                    &[],
                    StreamSignal::Complete,
                    sink,
                );
                if !sent || channel.ended() {
                    return;
                }
                match rx.recv() {
                    Ok(reply) => send_response(&mut channel, reply, ctx.media_type.as_deref()),
                    Err(_) => channel.end_with_error(500, "handler did not respond"),
                }
            }
        }
    }

    /// Transport failure mid-body: tell the handler the upload is dead,
    /// then answer 400.
    pub fn fail(&mut self, message: &str) {
        match std::mem::replace(&mut self.state, ConnState::Finished) {
            ConnState::Finished => {}
            ConnState::Buffered { mut channel, .. } => {
                channel.end_with_error(400, &format!("unable to process request {message}"));
            }
            ConnState::Streaming {
                route,
                ctx,
                mut channel,
                args,
                stream_pos,
            } => {
                invoke_stream_phase(
                    &self.engine,
                    &route,
                    &ctx,
                    &mut channel,
                    &args,
                    stream_pos,
                    &[],
                    StreamSignal::Abort,
                    ResponseSink::noop(),
                );
                channel.end_with_error(400, &format!("unable to upload file {message}"));
            }
        }
    }
}

fn finish_buffered(
    engine: &Arc<EngineInner>,
    route: &Route,
    ctx: &RequestContext,
    channel: &mut ResponseChannel,
    body: &[u8],
) {
    let mut args = bind_params(route, ctx, Some(body), channel);
    if channel.ended() {
        return;
    }

    let validate_fields = ctx.query_all(VALIDATE_FIELD_QUERY);
    let dry_run = ctx.query_first(VALIDATE_FIELD_QUERY).is_some();
    if engine.validation.has_schema(&route.handler_name) {
        let outcome = match route
            .entity_position()
            .and_then(|pos| match args.get_mut(pos) {
                Some(ArgValue::Entity(entity)) => Some(entity),
                _ => None,
            }) {
            Some(entity) => {
                engine
                    .validation
                    .check(&route.handler_name, entity, &validate_fields)
            }
            // No entity arrived; nothing to validate.
            None => CheckOutcome::Clean,
        };
        match outcome {
            CheckOutcome::Clean if dry_run => {
                // Clean probe: answer without invoking the handler.
                debug!(
                    request_id = %ctx.request_id,
                    handler_name = %route.handler_name,
                    "dry validation clean"
                );
                send_response(
                    channel,
                    HandlerReply::Done(HandlerResult::new(200)),
                    ctx.media_type.as_deref(),
                );
                return;
            }
            CheckOutcome::Clean => {}
            CheckOutcome::Invalid(collection) => {
                warn!(
                    request_id = %ctx.request_id,
                    handler_name = %route.handler_name,
                    violations = collection.total_records,
                    "entity validation failed"
                );
                channel.end_with_error(422, &collection.to_json());
                return;
            }
        }
    } else if dry_run {
        // Nothing to validate against is a clean probe too.
        send_response(
            channel,
            HandlerReply::Done(HandlerResult::new(200)),
            ctx.media_type.as_deref(),
        );
        return;
    }

    let (sink, rx) = ResponseSink::channel();
    let call = HandlerCall {
        request_id: ctx.request_id,
        tenant: ctx.tenant().map(|s| s.to_string()),
        correlation: ctx.correlation.clone(),
        args,
        sink,
    };
    if !engine.dispatcher.dispatch(&route.handler_name, call) {
        channel.end_with_error(500, "unable to process request");
        return;
    }
    match rx.recv() {
        Ok(reply) => send_response(channel, reply, ctx.media_type.as_deref()),
        Err(e) => {
            error!(
                request_id = %ctx.request_id,
                handler_name = %route.handler_name,
                error = %e,
                "reply channel closed before response"
            );
            channel.end_with_error(500, "handler did not respond");
        }
    }
}

/// One stream-phase invocation: refill the stream slot, stamp the phase
/// flags, dispatch. Returns whether the call reached the handler;
/// dispatch failure ends the response.
#[allow(clippy::too_many_arguments)]
fn invoke_stream_phase(
    engine: &Arc<EngineInner>,
    route: &Route,
    ctx: &RequestContext,
    channel: &mut ResponseChannel,
    args: &ArgVec,
    stream_pos: usize,
    bytes: &[u8],
    signal: StreamSignal,
    sink: ResponseSink,
) -> bool {
    if channel.ended() {
        return false;
    }
    let stream_id = ctx.request_id.to_string();
    let mut correlation = ctx.correlation.clone();
    signal.stamp(&mut correlation, &stream_id);

    let mut call_args = args.clone();
    call_args[stream_pos] = ArgValue::Stream(bytes.to_vec());
    // The injected header-map argument must carry the phase flags too.
    for slot in call_args.iter_mut() {
        if matches!(slot, ArgValue::Headers(_)) {
            *slot = ArgValue::Headers(correlation.clone());
        }
    }
    debug!(
        request_id = %ctx.request_id,
        handler_name = %route.handler_name,
        phase = ?signal,
        chunk_bytes = bytes.len(),
        "stream phase invocation"
    );
    let call = HandlerCall {
        request_id: ctx.request_id,
        tenant: ctx.tenant().map(|s| s.to_string()),
        correlation,
        args: call_args,
        sink,
    };
    if !engine.dispatcher.dispatch(&route.handler_name, call) {
        channel.end_with_error(500, "unable to process request");
        return false;
    }
    true
}
