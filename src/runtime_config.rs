//! Environment-driven runtime configuration.
//!
//! ## `RAMLINE_STACK_SIZE`
//!
//! Stack size in bytes for handler coroutines, decimal (`65536`) or hex
//! (`0x10000`). Default: 64 KB. Total memory is stack size times the
//! number of live coroutines, so tune it to the deepest handler rather
//! than the busiest one.

use std::env;

const DEFAULT_STACK_SIZE: usize = 0x10000;

/// Runtime knobs loaded once at startup.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Coroutine stack size in bytes.
    pub stack_size: usize,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        RuntimeConfig {
            stack_size: stack_size(),
        }
    }

    /// Apply this configuration to the `may` scheduler. Call before the
    /// first coroutine spawn.
    pub fn apply(&self) {
        may::config().set_stack_size(self.stack_size);
    }
}

/// Coroutine stack size from `RAMLINE_STACK_SIZE`, falling back to the
/// default on absence or unparsable input.
#[must_use]
pub fn stack_size() -> usize {
    match env::var("RAMLINE_STACK_SIZE") {
        Ok(val) => {
            if let Some(hex) = val.strip_prefix("0x") {
                usize::from_str_radix(hex, 16).unwrap_or(DEFAULT_STACK_SIZE)
            } else {
                val.parse().unwrap_or(DEFAULT_STACK_SIZE)
            }
        }
        Err(_) => DEFAULT_STACK_SIZE,
    }
}
