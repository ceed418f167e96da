//! Path matching and route resolution.
//!
//! Routes are matched with anchored regexes compiled from `{placeholder}`
//! path templates at startup. Lookup scans the candidates for the request
//! method in registration order and takes the first pattern that matches;
//! no match resolves to a 404 one level up.

mod core;


pub use core::{match_path, Router};
