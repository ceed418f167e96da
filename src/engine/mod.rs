//! The dispatch engine: one entry point per request, a connection state
//! machine per body.
//!
//! [`RestEngine::handle`] runs the head-only phases (tenant precondition,
//! route matching, content negotiation) and returns a [`RequestConn`] the
//! transport feeds body bytes into. Buffered connections accumulate and
//! finish on end-of-body; stream-capable connections invoke the handler
//! once per chunk and once on completion.

mod core;

pub use core::{RequestConn, RestEngine, StreamSignal};
