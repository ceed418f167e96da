//! Binder core - decodes wire values into the positional argument array.

use super::dates;
use crate::context::{RequestContext, ResponseChannel};
use crate::table::{ParamKind, ParamMeta, ParamType, Route};
use crate::validate::ErrorCollection;
use anyhow::{anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use smallvec::SmallVec;
use tracing::{debug, error};

/// Maximum argument slots before heap allocation. Generated operations
/// rarely declare more than eight parameters including the reserved tail.
pub const MAX_INLINE_ARGS: usize = 8;

/// Stack-allocated positional argument array for the dispatch hot path.
pub type ArgVec = SmallVec<[ArgValue; MAX_INLINE_ARGS]>;

/// A bound argument: one variant per supported primitive/shape.
///
/// `Null` stands in for an absent optional value, exactly like the
/// original's unset slots.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Null,
    Str(String),
    Int(i64),
    Bool(bool),
    Decimal(f64),
    Date(DateTime<Utc>),
    /// Repeated query occurrences, in request order.
    List(Vec<String>),
    /// Matched enum member name.
    Enum(String),
    /// Deserialized JSON request entity.
    Entity(Value),
    /// The per-request correlation header map.
    Headers(crate::context::CorrelationMap),
    /// The engine's execution context handle.
    Context,
    /// One chunk of a streamed upload; empty on completion and abort.
    Stream(Vec<u8>),
    /// Placeholder for the result callback, filled at invocation.
    Callback,
}

impl ArgValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) | ArgValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_entity(&self) -> Option<&Value> {
        match self {
            ArgValue::Entity(v) => Some(v),
            _ => None,
        }
    }
}

/// Bind every descriptor of `route` into a positional argument array.
///
/// `body` is `None` for stream-capable operations (the stream slot is
/// populated later, chunk by chunk) and `Some` with the accumulated bytes
/// otherwise. Parse failures abort the remaining descriptors and end the
/// request with a 400 carrying the failure's message; structured binding
/// failures (unknown entity fields) end it with a 422. Callers must check
/// `channel.ended()` before using the returned array.
#[must_use]
pub fn bind_params(
    route: &Route,
    ctx: &RequestContext,
    body: Option<&[u8]>,
    channel: &mut ResponseChannel,
) -> ArgVec {
    let mut args: ArgVec = smallvec::smallvec![ArgValue::Null; route.arg_count()];
    if let Err(e) = bind_all(route, ctx, body, channel, &mut args) {
        error!(
            request_id = %ctx.request_id,
            handler_name = %route.handler_name,
            error = %e,
            "parameter binding failed"
        );
        channel.end_with_error(400, &e.to_string());
    }
    args
}

fn bind_all(
    route: &Route,
    ctx: &RequestContext,
    body: Option<&[u8]>,
    channel: &mut ResponseChannel,
    args: &mut ArgVec,
) -> anyhow::Result<()> {
    let mut capture_index = 0usize;
    for param in &route.params {
        debug!(
            position = param.position,
            kind = ?param.kind,
            ty = ?param.ty,
            "binding parameter"
        );
        match param.kind {
            ParamKind::Path => {
                // Captures are already URL-decoded by the matcher; consume
                // them in order.
                args[param.position] = match ctx.path_captures.get(capture_index) {
                    Some(v) => ArgValue::Str(v.clone()),
                    None => ArgValue::Null,
                };
                capture_index += 1;
            }
            ParamKind::Header => {
                args[param.position] = match ctx.header(&param.name) {
                    Some(v) => ArgValue::Str(v.to_string()),
                    None => ArgValue::Null,
                };
            }
            ParamKind::Query => bind_query(ctx, param, args, channel)?,
            ParamKind::Body => bind_body(route, ctx, param, body, args, channel)?,
        }
        if channel.ended() {
            return Ok(());
        }
    }
    Ok(())
}

fn bind_query(
    ctx: &RequestContext,
    param: &ParamMeta,
    args: &mut ArgVec,
    channel: &mut ResponseChannel,
) -> anyhow::Result<()> {
    let raw = ctx.query_first(&param.name);
    let slot = &mut args[param.position];
    match &param.ty {
        ParamType::Str => {
            *slot = match raw.or(param.default.as_deref()) {
                Some(v) => ArgValue::Str(v.to_string()),
                None => ArgValue::Null,
            };
        }
        ParamType::Date => {
            let value = raw.or(param.default.as_deref());
            if let Some(v) = value {
                let parsed = dates::parse_date(v)
                    .ok_or_else(|| anyhow!("cannot parse date parameter '{}': {}", param.name, v))?;
                *slot = ArgValue::Date(parsed);
            }
        }
        ParamType::Int => match raw {
            None => {
                if let Some(d) = &param.default {
                    let parsed: i64 = d.parse().map_err(|_| {
                        anyhow!("invalid default for integer parameter '{}': {}", param.name, d)
                    })?;
                    *slot = ArgValue::Int(parsed);
                }
            }
            // Empty is a distinct error, never a fallback to the default.
            Some("") => end_empty_numeric(channel, &param.name),
            Some(v) => {
                let parsed: i64 = v.parse().map_err(|_| {
                    anyhow!("cannot parse integer parameter '{}': {}", param.name, v)
                })?;
                *slot = ArgValue::Int(parsed);
            }
        },
        ParamType::Bool => {
            // Any value other than case-insensitive "true" binds to false,
            // garbage included; booleans never fail the request.
            *slot = match raw.or(param.default.as_deref()) {
                Some(v) => ArgValue::Bool(v.eq_ignore_ascii_case("true")),
                None => ArgValue::Null,
            };
        }
        ParamType::Decimal => match raw {
            None => {
                if let Some(d) = &param.default {
                    *slot = ArgValue::Decimal(parse_decimal(d).ok_or_else(|| {
                        anyhow!("invalid default for decimal parameter '{}': {}", param.name, d)
                    })?);
                }
            }
            Some("") => end_empty_numeric(channel, &param.name),
            Some(v) => {
                *slot = ArgValue::Decimal(parse_decimal(v).ok_or_else(|| {
                    anyhow!("cannot parse decimal parameter '{}': {}", param.name, v)
                })?);
            }
        },
        ParamType::List => {
            *slot = ArgValue::List(ctx.query_all(&param.name));
        }
        ParamType::Enum(members) => {
            // Match the wire value, fall back to the default member name,
            // otherwise bind nothing at all.
            let matched = raw
                .and_then(|v| members.iter().find(|m| m.as_str() == v))
                .or_else(|| {
                    param
                        .default
                        .as_deref()
                        .and_then(|d| members.iter().find(|m| m.as_str() == d))
                });
            if let Some(m) = matched {
                *slot = ArgValue::Enum(m.clone());
            }
        }
        other => bail!(
            "query parameter '{}' declares non-query type {:?}",
            param.name,
            other
        ),
    }
    Ok(())
}

fn end_empty_numeric(channel: &mut ResponseChannel, name: &str) {
    channel.end_with_error(
        400,
        &format!(
            "{} does not have a default value in the RAML and has been passed empty",
            name
        ),
    );
}

fn bind_body(
    route: &Route,
    ctx: &RequestContext,
    param: &ParamMeta,
    body: Option<&[u8]>,
    args: &mut ArgVec,
    channel: &mut ResponseChannel,
) -> anyhow::Result<()> {
    let slot_position = param.position;
    match &param.ty {
        // Infrastructure values are injected, never read from the wire.
        ParamType::CorrelationMap => args[slot_position] = ArgValue::Headers(ctx.correlation.clone()),
        ParamType::Context => args[slot_position] = ArgValue::Context,
        ParamType::Callback => args[slot_position] = ArgValue::Callback,
        // Populated later, chunk by chunk, by the streaming controller.
        ParamType::Stream => {}
        ParamType::Text => {
            if let Some(bytes) = body {
                args[slot_position] = ArgValue::Str(String::from_utf8_lossy(bytes).into_owned());
            }
        }
        ParamType::Entity => {
            let Some(bytes) = body else {
                return Ok(());
            };
            if bytes.is_empty() {
                // Absent entity binds to null; validation is skipped.
                return Ok(());
            }
            let text = std::str::from_utf8(bytes)
                .map_err(|_| anyhow!("request body is not valid UTF-8"))?;
            debug!(
                request_id = %ctx.request_id,
                path = %ctx.path,
                body_bytes = bytes.len(),
                "binding request entity"
            );
            let mut entity: Value = serde_json::from_str(text)?;
            if let Some(unknown) = unknown_field(route.entity_schema.as_ref(), &entity) {
                // A shape mismatch on a declared-closed entity is a
                // structured 422, not a hard 400.
                let message = format!("Unrecognized field \"{}\"", unknown);
                error!(
                    request_id = %ctx.request_id,
                    handler_name = %route.handler_name,
                    field = %unknown,
                    "entity carries unrecognized field"
                );
                let payload = ErrorCollection::single("", "", &message);
                channel.end_with_error(422, &payload.to_json());
                return Ok(());
            }
            if route.has_metadata {
                normalize_metadata(&mut entity, ctx);
            }
            args[slot_position] = ArgValue::Entity(entity);
        }
        other => bail!("body parameter declares non-body type {:?}", other),
    }
    Ok(())
}

/// First entity field not declared by a schema that closes additional
/// properties, as a dotted path. The walk follows the schema into declared
/// sub-objects and array items, so a closed nested object rejects unknown
/// fields the same way the root does; `None` when every level is open or
/// the schema is absent.
fn unknown_field(schema: Option<&Value>, entity: &Value) -> Option<String> {
    find_unknown(schema?, entity, &mut Vec::new())
}

fn find_unknown(schema: &Value, value: &Value, path: &mut Vec<String>) -> Option<String> {
    match value {
        Value::Array(items) => {
            let item_schema = schema.get("items")?;
            items
                .iter()
                .find_map(|item| find_unknown(item_schema, item, path))
        }
        Value::Object(fields) => {
            let declared = schema.get("properties").and_then(Value::as_object);
            if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                let offender = fields
                    .keys()
                    .find(|k| !declared.is_some_and(|d| d.contains_key(*k)));
                if let Some(name) = offender {
                    path.push(name.clone());
                    let dotted = path.join(".");
                    path.pop();
                    return Some(dotted);
                }
            }
            let declared = declared?;
            fields.iter().find_map(|(name, sub_value)| {
                let sub_schema = declared.get(name)?;
                path.push(name.clone());
                let found = find_unknown(sub_schema, sub_value, path);
                path.pop();
                found
            })
        }
        _ => None,
    }
}

/// Overwrite the entity's audit metadata block from the correlation map.
///
/// Client-supplied metadata is never trusted; creation/update identifiers
/// and timestamps are stamped server-side before validation runs.
fn normalize_metadata(entity: &mut Value, ctx: &RequestContext) {
    let Some(obj) = entity.as_object_mut() else {
        return;
    };
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut metadata = json!({
        "createdDate": now,
        "updatedDate": now,
    });
    if let Some(user) = ctx.correlation.user_id() {
        metadata["createdByUserId"] = Value::String(user.to_string());
        metadata["updatedByUserId"] = Value::String(user.to_string());
    }
    obj.insert("metadata".to_string(), metadata);
}

fn parse_decimal(raw: &str) -> Option<f64> {
    // Grouping commas are accepted, as the original's decimal path did.
    let cleaned = raw.replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}
