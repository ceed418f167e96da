//! # ramline
//!
//! **ramline** is a RAML-metadata driven HTTP request dispatch engine for
//! Rust, powered by the `may` coroutine runtime.
//!
//! ## Overview
//!
//! ramline takes a route table produced by an external metadata generator
//! (one [`table::Route`] per RAML operation) and turns raw requests into
//! typed handler invocations: path matching, content negotiation,
//! parameter binding, entity validation, and response writing are all
//! driven by the table, so handlers only ever see a fully decoded
//! positional argument array.
//!
//! ## Architecture
//!
//! - **[`table`]** - route table types: routes, parameter descriptors,
//!   declared parameter shapes
//! - **[`router`]** - regex-based path matching over compiled templates
//! - **[`negotiate`]** - Content-Type admission and Accept selection
//! - **[`binder`]** - wire values to typed positional arguments
//! - **[`validate`]** - compiled JSON Schema entity validation with
//!   read-only stripping and dry validation
//! - **[`dispatcher`]** - coroutine-per-operation handler dispatch over
//!   channels
//! - **[`engine`]** - the per-request pipeline and the streaming/buffered
//!   connection state machine
//! - **[`response`]** - handler replies to wire output
//! - **[`context`]** - per-request state: correlation map, request
//!   context, consume-once response channel
//!
//! ## Request Lifecycle
//!
//! 1. The transport hands [`context::RequestHead`] and its
//!    [`context::WireResponse`] hook to [`engine::RestEngine::handle`].
//! 2. Tenant precondition, route lookup and content negotiation run
//!    immediately; any failure answers the request before a single body
//!    byte is read.
//! 3. Body bytes flow into the returned [`engine::RequestConn`]. Buffered
//!    operations bind, validate and dispatch on end-of-body;
//!    stream-capable operations invoke the handler once per chunk and
//!    once on completion.
//! 4. The handler answers through a consume-once
//!    [`dispatcher::ResponseSink`]; the response writer finalizes the
//!    wire exactly once, whatever happened.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use http::Method;
//! use ramline::dispatcher::{Dispatcher, HandlerCall, HandlerReply, HandlerResult};
//! use ramline::engine::RestEngine;
//! use ramline::table::Route;
//!
//! let mut dispatcher = Dispatcher::new("mod-notes-1.0");
//! unsafe {
//!     dispatcher.register(
//!         "list_notes",
//!         Arc::new(|call: HandlerCall| {
//!             call.sink.respond(HandlerReply::Done(HandlerResult::json(
//!                 200,
//!                 serde_json::json!({ "notes": [] }),
//!             )));
//!         }),
//!     );
//! }
//! let routes = vec![Route::new(Method::GET, "/notes", "list_notes")];
//! let engine = RestEngine::new(routes, dispatcher).expect("valid route table");
//! // per request: engine.handle(head, wire) -> RequestConn
//! ```

pub mod binder;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod ids;
pub mod negotiate;
pub mod response;
pub mod router;
pub mod runtime_config;
pub mod table;
pub mod validate;

pub use context::{RequestHead, ResponseChannel, WireResponse};
pub use engine::{RequestConn, RestEngine};
pub use ids::RequestId;
pub use table::{ParamKind, ParamMeta, ParamType, Route};
