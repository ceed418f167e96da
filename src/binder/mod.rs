//! Parameter binding: wire data to typed positional arguments.
//!
//! The binder walks a route's parameter descriptors in position order and
//! decodes each wire value into the matching [`ArgValue`] variant. This is
//! the typed replacement for the original reflective signature inspection:
//! the descriptor declares the shape, the binder decodes into it, and the
//! handler receives a fully populated argument array.

mod core;
pub mod dates;


pub use core::{bind_params, ArgValue, ArgVec, MAX_INLINE_ARGS};
