//! Entity validation against the operations' JSON schemas.
//!
//! Schemas are compiled once at engine construction; per-request work is
//! validate, strip read-only violations, and convert what remains into the
//! structured error collection the 422 payload carries.

mod core;

#[cfg(test)]
mod tests;

pub use core::{CheckOutcome, ErrorCollection, ErrorRecord, ValidationEngine};
