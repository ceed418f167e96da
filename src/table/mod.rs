//! Route table types consumed by the dispatch engine.
//!
//! The table is produced by an external metadata generator (the build-time
//! step that walks the RAML definitions and the interface annotations) and
//! handed to [`crate::router::Router`] and
//! [`crate::validate::ValidationEngine`] at startup. Nothing in here is
//! mutated after the table is built.

use http::Method;
use serde_json::Value;

/// Where a parameter's value comes from on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A `{placeholder}` segment of the path pattern.
    Path,
    /// A named query-string parameter.
    Query,
    /// A named request header.
    Header,
    /// The request entity or an injected infrastructure value.
    Body,
}

/// The declared shape of a handler parameter.
///
/// This is the static replacement for the original runtime type inspection:
/// the binder decodes each wire value into the matching [`crate::binder::ArgValue`]
/// variant instead of reflecting over method signatures.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    Str,
    /// Parsed against the ordered date pattern list in [`crate::binder::dates`].
    Date,
    Int,
    Bool,
    /// Decimal number; grouping commas in the wire value are accepted.
    Decimal,
    /// All repeated occurrences of the query name, in request order.
    List,
    /// Declared member names; a non-member wire value binds to the default
    /// member, or to nothing at all.
    Enum(Vec<String>),
    /// Raw request body, verbatim.
    Text,
    /// JSON request entity, validated and sanitized before invocation.
    Entity,
    /// Chunked upload slot, populated per chunk by the streaming controller.
    Stream,
    /// The per-request correlation header map.
    CorrelationMap,
    /// The engine's execution context handle.
    Context,
    /// Reserved slot for the async result callback; filled at invocation.
    Callback,
}

/// One positional parameter descriptor of a handler operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamMeta {
    /// Wire name (query/header name); unused for injected kinds.
    pub name: String,
    pub kind: ParamKind,
    pub ty: ParamType,
    /// Zero-based slot in the handler's argument array.
    pub position: usize,
    /// Default value in string form, as the RAML declares it.
    pub default: Option<String>,
}

impl ParamMeta {
    pub fn new(name: &str, kind: ParamKind, ty: ParamType, position: usize) -> Self {
        Self {
            name: name.to_string(),
            kind,
            ty,
            position,
            default: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }
}

/// A single routable operation: path pattern plus everything needed to bind
/// parameters and invoke the handler.
///
/// Immutable once built; the router stores it behind `Arc` and hands shared
/// references to per-request state.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    /// Path template in `/notes/{id}` form; compiled to a regex by the router.
    pub path_pattern: String,
    /// Registry key of the handler operation.
    pub handler_name: String,
    /// Ordered parameter descriptors; positions are unique and contiguous,
    /// with the correlation map and result callback in the last two slots.
    pub params: Vec<ParamMeta>,
    /// Accepted request media types; `None` means accept anything.
    pub consumes: Option<Vec<String>>,
    /// Producible response media types; `None` means no Accept checking.
    pub produces: Option<Vec<String>>,
    /// JSON schema of the request entity, if the operation takes one.
    pub entity_schema: Option<Value>,
    /// Handler is stream-capable: invoked once per body chunk plus a
    /// completion (or abort) call.
    pub streaming: bool,
    /// Entity carries an audit metadata block to normalize before validation.
    pub has_metadata: bool,
}

impl Route {
    pub fn new(method: Method, path_pattern: &str, handler_name: &str) -> Self {
        Self {
            method,
            path_pattern: path_pattern.to_string(),
            handler_name: handler_name.to_string(),
            params: Vec::new(),
            consumes: None,
            produces: None,
            entity_schema: None,
            streaming: false,
            has_metadata: false,
        }
    }

    #[must_use]
    pub fn param(mut self, param: ParamMeta) -> Self {
        self.params.push(param);
        self
    }

    #[must_use]
    pub fn consumes(mut self, types: &[&str]) -> Self {
        self.consumes = Some(types.iter().map(|s| s.to_string()).collect());
        self
    }

    #[must_use]
    pub fn produces(mut self, types: &[&str]) -> Self {
        self.produces = Some(types.iter().map(|s| s.to_string()).collect());
        self
    }

    #[must_use]
    pub fn entity_schema(mut self, schema: Value) -> Self {
        self.entity_schema = Some(schema);
        self
    }

    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self) -> Self {
        self.has_metadata = true;
        self
    }

    /// Number of argument slots the handler declares.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.params.len()
    }

    /// Slot of the chunked-upload parameter, if the operation has one.
    #[must_use]
    pub fn stream_position(&self) -> Option<usize> {
        self.params
            .iter()
            .find(|p| p.ty == ParamType::Stream)
            .map(|p| p.position)
    }

    /// Slot of the request entity (JSON or raw text), if the operation
    /// takes one.
    #[must_use]
    pub fn entity_position(&self) -> Option<usize> {
        self.params
            .iter()
            .find(|p| matches!(p.ty, ParamType::Entity | ParamType::Text))
            .map(|p| p.position)
    }

    /// Check the positional invariants: positions unique and contiguous
    /// `0..N-1`, correlation map and callback in the last two slots.
    ///
    /// Zero-parameter routes are exempt from the tail requirement; any
    /// route that declares parameters must declare at least the two
    /// reserved tail slots.
    pub(crate) fn check_positions(&self) -> anyhow::Result<()> {
        let n = self.params.len();
        let mut seen = vec![false; n];
        for p in &self.params {
            if p.position >= n {
                anyhow::bail!(
                    "route {} {}: parameter '{}' position {} out of range 0..{}",
                    self.method,
                    self.path_pattern,
                    p.name,
                    p.position,
                    n
                );
            }
            if seen[p.position] {
                anyhow::bail!(
                    "route {} {}: duplicate parameter position {}",
                    self.method,
                    self.path_pattern,
                    p.position
                );
            }
            seen[p.position] = true;
        }
        if n > 0 {
            if n < 2 {
                anyhow::bail!(
                    "route {} {}: parameterized operations must end with the correlation map and the result callback",
                    self.method,
                    self.path_pattern
                );
            }
            let by_pos = |pos: usize| self.params.iter().find(|p| p.position == pos);
            let ok = by_pos(n - 2).map(|p| p.ty == ParamType::CorrelationMap) == Some(true)
                && by_pos(n - 1).map(|p| p.ty == ParamType::Callback) == Some(true);
            if !ok {
                anyhow::bail!(
                    "route {} {}: last two parameters must be the correlation map and the result callback",
                    self.method,
                    self.path_pattern
                );
            }
        }
        Ok(())
    }
}
