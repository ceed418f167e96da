//! Handler dispatch over coroutine channels.
//!
//! Each registered operation owns a long-lived coroutine fed by an
//! unbounded channel. A request becomes a [`HandlerCall`] carrying the
//! bound argument array and a consume-once [`ResponseSink`]; the engine
//! blocks its own coroutine on the reply channel, so concurrency comes
//! from the scheduler, not from threads.

mod core;

pub use core::{
    Dispatcher, ExecContext, Handler, HandlerCall, HandlerFactory, HandlerReply, HandlerResult,
    Payload, ResponseSink,
};
