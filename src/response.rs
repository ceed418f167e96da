//! Response writer: turns a handler reply into wire output.
//!
//! Whatever the handler did, the response is finalized exactly once; a
//! reply that carries nothing usable still ends the wire with an error
//! status instead of leaving the connection hanging.

use crate::context::ResponseChannel;
use crate::dispatcher::{HandlerReply, HandlerResult, Payload};
use crate::negotiate::{JSON_MEDIA_TYPE, TEXT_MEDIA_TYPE};
use tracing::error;

/// Write the handler's reply to the wire and finalize the response.
///
/// `media_type` is the Accept-negotiated response type, used when the
/// handler did not set Content-Type itself. No-op if the channel already
/// ended.
pub fn send_response(
    channel: &mut ResponseChannel,
    reply: HandlerReply,
    media_type: Option<&str>,
) {
    if channel.ended() {
        return;
    }
    match reply {
        HandlerReply::Done(result) => write_result(channel, &result, media_type),
        HandlerReply::Failed {
            response: Some(result),
            message,
        } => {
            error!(error = %message, "handler failed with embedded response");
            write_result(channel, &result, media_type);
        }
        HandlerReply::Failed {
            response: None,
            message,
        } => {
            error!(error = %message, "handler failed without a response");
            channel.end_with_error(500, "null response from handler");
        }
        HandlerReply::Crashed { message } => {
            channel.end_with_error(400, &format!("unable to process request {message}"));
        }
    }
}

fn write_result(channel: &mut ResponseChannel, result: &HandlerResult, media_type: Option<&str>) {
    let Some(mut wire) = channel.take_wire() else {
        return;
    };
    let body = render_body(&result.payload);
    wire.set_status(result.status);
    // 204 carries no body and must not be chunked.
    if result.status != 204 {
        wire.set_chunked(true);
    }
    let has_content_type = result
        .headers
        .iter()
        .any(|(n, _)| n.eq_ignore_ascii_case("content-type"));
    if !has_content_type && result.status != 204 {
        let fallback = match &result.payload {
            Payload::Json(_) => JSON_MEDIA_TYPE,
            _ => TEXT_MEDIA_TYPE,
        };
        wire.add_header("Content-Type", media_type.unwrap_or(fallback));
    }
    // Handler headers go out verbatim, duplicates included.
    for (name, value) in &result.headers {
        wire.add_header(name, value);
    }
    if result.status != 204 {
        if let Some(bytes) = &body {
            wire.write(bytes);
        }
    }
    wire.end();
    let entity = body
        .as_deref()
        .map(|b| String::from_utf8_lossy(b).into_owned());
    channel.access_log(result.status, entity.as_deref());
}

/// JSON payloads go out pretty-printed; this is part of the wire contract,
/// not cosmetics.
fn render_body(payload: &Payload) -> Option<Vec<u8>> {
    match payload {
        Payload::None => None,
        Payload::Text(s) => Some(s.clone().into_bytes()),
        Payload::Binary(b) => Some(b.clone()),
        Payload::Json(v) => Some(
            serde_json::to_vec_pretty(v).unwrap_or_else(|_| b"{}".to_vec()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RequestContext, RequestHead, WireResponse};
    use http::Method;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct WireState {
        status: Option<u16>,
        chunked: bool,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        ended: bool,
    }

    #[derive(Clone, Default)]
    struct RecordingWire {
        state: Arc<Mutex<WireState>>,
    }

    impl WireResponse for RecordingWire {
        fn set_status(&mut self, status: u16) {
            self.state.lock().unwrap().status = Some(status);
        }
        fn set_chunked(&mut self, chunked: bool) {
            self.state.lock().unwrap().chunked = chunked;
        }
        fn add_header(&mut self, name: &str, value: &str) {
            self.state
                .lock()
                .unwrap()
                .headers
                .push((name.to_string(), value.to_string()));
        }
        fn write(&mut self, bytes: &[u8]) {
            self.state.lock().unwrap().body.extend_from_slice(bytes);
        }
        fn end(&mut self) {
            self.state.lock().unwrap().ended = true;
        }
    }

    fn channel() -> (ResponseChannel, RecordingWire) {
        let ctx = RequestContext::new(&RequestHead::new(Method::GET, "/notes"));
        let wire = RecordingWire::default();
        (ResponseChannel::new(Box::new(wire.clone()), &ctx), wire)
    }

    #[test]
    fn json_payload_is_pretty_printed() {
        let (mut ch, wire) = channel();
        let result = HandlerResult::json(200, json!({"id": 1, "title": "x"}));
        send_response(&mut ch, HandlerReply::Done(result), Some("application/json"));
        let state = wire.state.lock().unwrap();
        assert_eq!(state.status, Some(200));
        assert!(state.ended);
        let text = String::from_utf8_lossy(&state.body);
        assert!(text.contains('\n'));
        let round_trip: serde_json::Value = serde_json::from_slice(&state.body).unwrap();
        assert_eq!(round_trip, json!({"id": 1, "title": "x"}));
    }

    #[test]
    fn no_content_is_never_chunked_and_has_no_body() {
        let (mut ch, wire) = channel();
        send_response(&mut ch, HandlerReply::Done(HandlerResult::new(204)), None);
        let state = wire.state.lock().unwrap();
        assert_eq!(state.status, Some(204));
        assert!(!state.chunked);
        assert!(state.body.is_empty());
        assert!(state.ended);
    }

    #[test]
    fn duplicate_handler_headers_survive() {
        let (mut ch, wire) = channel();
        let result = HandlerResult::new(201)
            .header("Set-Cookie", "a=1")
            .header("Set-Cookie", "b=2");
        send_response(&mut ch, HandlerReply::Done(result), None);
        let state = wire.state.lock().unwrap();
        let cookies: Vec<&str> = state
            .headers
            .iter()
            .filter(|(n, _)| n == "Set-Cookie")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn failure_without_response_is_a_500() {
        let (mut ch, wire) = channel();
        send_response(
            &mut ch,
            HandlerReply::Failed {
                response: None,
                message: "storage down".to_string(),
            },
            None,
        );
        let state = wire.state.lock().unwrap();
        assert_eq!(state.status, Some(500));
        assert_eq!(
            String::from_utf8_lossy(&state.body),
            "null response from handler"
        );
    }

    #[test]
    fn failure_with_embedded_response_is_written_as_is() {
        let (mut ch, wire) = channel();
        send_response(
            &mut ch,
            HandlerReply::Failed {
                response: Some(HandlerResult::text(409, "version conflict")),
                message: "optimistic locking".to_string(),
            },
            None,
        );
        let state = wire.state.lock().unwrap();
        assert_eq!(state.status, Some(409));
        assert_eq!(String::from_utf8_lossy(&state.body), "version conflict");
    }

    #[test]
    fn crash_is_a_400_with_the_cause() {
        let (mut ch, wire) = channel();
        send_response(
            &mut ch,
            HandlerReply::Crashed {
                message: "boom".to_string(),
            },
            None,
        );
        let state = wire.state.lock().unwrap();
        assert_eq!(state.status, Some(400));
        assert!(String::from_utf8_lossy(&state.body).contains("boom"));
    }
}
