//! Router core - hot path for request routing.

use crate::table::Route;
use http::Method;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Router that matches HTTP requests against the compiled route table.
///
/// Built once at startup from the externally generated [`Route`] list and
/// shared read-only between in-flight requests.
#[derive(Clone)]
pub struct Router {
    routes: Vec<(Method, Regex, Arc<Route>)>,
}

impl Router {
    /// Compile the route table.
    ///
    /// Fails if a path template does not compile or a route violates the
    /// positional invariants (unique contiguous positions, correlation map
    /// and callback in the last two slots).
    pub fn new(routes: Vec<Route>) -> anyhow::Result<Self> {
        let mut compiled = Vec::with_capacity(routes.len());
        for mut route in routes {
            route.check_positions()?;
            // Binder walks descriptors in position order; fix the order here
            // so per-request code never sorts.
            route.params.sort_by_key(|p| p.position);
            let regex = path_to_regex(&route.path_pattern)?;
            compiled.push((route.method.clone(), regex, Arc::new(route)));
        }
        let summary: Vec<String> = compiled
            .iter()
            .take(10)
            .map(|(m, _, r)| format!("{} {} -> {}", m, r.path_pattern, r.handler_name))
            .collect();
        info!(
            routes_count = compiled.len(),
            routes_summary = ?summary,
            "routing table loaded"
        );
        Ok(Self { routes: compiled })
    }

    /// Resolve a request to a route and its ordered, URL-decoded path
    /// captures. Candidates for the method are tried in registration
    /// order; `None` means no route (404).
    #[must_use]
    pub fn lookup(&self, method: &Method, path: &str) -> Option<(Arc<Route>, Vec<String>)> {
        for (m, regex, route) in &self.routes {
            if m != method {
                continue;
            }
            if let Some(captures) = match_path(path, regex) {
                debug!(
                    method = %method,
                    path = %path,
                    handler_name = %route.handler_name,
                    route_pattern = %route.path_pattern,
                    captures = ?captures,
                    "route matched"
                );
                return Some((Arc::clone(route), captures));
            }
        }
        warn!(method = %method, path = %path, "no route matched");
        None
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Match a path against a compiled pattern.
///
/// Returns the capture groups URL-decoded, in order; an empty vec when the
/// pattern has no captures; `None` when the pattern does not match.
#[must_use]
pub fn match_path(path: &str, pattern: &Regex) -> Option<Vec<String>> {
    let caps = pattern.captures(path)?;
    let mut out = Vec::with_capacity(caps.len().saturating_sub(1));
    for i in 1..caps.len() {
        let raw = caps.get(i).map(|m| m.as_str()).unwrap_or("");
        let decoded = urlencoding::decode(raw)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        out.push(decoded);
    }
    Some(out)
}

/// Compile a `/notes/{id}` style template into an anchored regex with one
/// capture group per placeholder.
pub(crate) fn path_to_regex(path: &str) -> anyhow::Result<Regex> {
    if path == "/" {
        return Ok(Regex::new(r"^/$")?);
    }
    let mut pattern = String::with_capacity(path.len() + 8);
    pattern.push('^');
    for segment in path.split('/') {
        if segment.starts_with('{') && segment.ends_with('}') {
            pattern.push_str("/([^/]+)");
        } else if !segment.is_empty() {
            pattern.push('/');
            pattern.push_str(&regex::escape(segment));
        }
    }
    pattern.push('$');
    Ok(Regex::new(&pattern)?)
}
