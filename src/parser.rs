//! Model reply parsing
//!
//! The model is instructed to answer with a JSON envelope:
//! `{"tool_call": {"server_id", "tool_name", "parameters"}, "response": "..."}`.
//! Real replies wrap that envelope in prose, fenced code blocks, or emit it
//! with raw newlines inside string values, so extraction walks a recovery
//! ladder and fails open: anything unparseable degrades to prose, never an
//! error. Pure and deterministic; no I/O.

use serde_json::Value;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolRequest {
    pub server_id: String,
    pub tool_name: String,
    /// Opaque structured parameters; schema validation is the bridge's job.
    pub parameters: Value,
}

/// The structured form of one raw model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub prose: String,
    pub tool_request: Option<ToolRequest>,
}

impl ParsedReply {
    fn prose_only(text: &str) -> Self {
        Self {
            prose: text.trim().to_string(),
            tool_request: None,
        }
    }
}

/// Parse a raw model reply into prose plus an optional tool request.
///
/// Extraction strategies, in order (first hit wins):
/// 1. a JSON object at the end of the reply,
/// 2. a ```json fenced block,
/// 3. any fenced block that parses as a JSON object,
/// 4. the widest `{...}` span in the reply.
///
/// A strategy only yields a tool request when the envelope's `tool_call`
/// carries non-null `server_id`, `tool_name` and `parameters`.
pub fn parse(raw: &str) -> ParsedReply {
    if let Some(reply) = parse_trailing_object(raw) {
        return reply;
    }
    if let Some(reply) = parse_fenced_json(raw) {
        return reply;
    }
    if let Some(reply) = parse_any_fence(raw) {
        return reply;
    }
    if let Some(reply) = parse_widest_span(raw) {
        return reply;
    }
    ParsedReply::prose_only(raw)
}

/// Strategy 1: everything from the last `{` to the end of the reply.
fn parse_trailing_object(raw: &str) -> Option<ParsedReply> {
    let start = raw.rfind('{')?;
    let candidate = raw.get(start..)?;
    let envelope = parse_object(candidate)?;
    let outer = raw.get(..start).unwrap_or("");
    Some(assemble(&envelope, outer))
}

/// Strategy 2: a ```json fenced block.
fn parse_fenced_json(raw: &str) -> Option<ParsedReply> {
    const FENCE: &str = "```json";
    let start = raw.find(FENCE)? + FENCE.len();
    let body = raw.get(start..)?;
    let end = body.find("```")?;
    let envelope = parse_object(body.get(..end)?.trim())?;
    let outer = raw.get(..raw.find(FENCE)?).unwrap_or("");
    Some(assemble(&envelope, outer))
}

/// Strategy 3: any fenced block whose body parses as a JSON object.
fn parse_any_fence(raw: &str) -> Option<ParsedReply> {
    if !raw.contains("```") {
        return None;
    }
    for part in raw.split("```") {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(envelope) = parse_object(trimmed) {
            let outer = raw.get(..raw.find("```")?).unwrap_or("");
            return Some(assemble(&envelope, outer));
        }
    }
    None
}

/// Strategy 4: the first `{` through the last `}`.
fn parse_widest_span(raw: &str) -> Option<ParsedReply> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')? + 1;
    if start >= end {
        return None;
    }
    let envelope = parse_object(raw.get(start..end)?)?;
    let outer = format!(
        "{}{}",
        raw.get(..start).unwrap_or(""),
        raw.get(end..).unwrap_or("")
    );
    Some(assemble(&envelope, &outer))
}

/// Parse a candidate string as a JSON object. Models sometimes emit raw
/// newlines inside string values; collapsing whitespace runs recovers those,
/// so a failed direct parse gets one collapsed retry.
fn parse_object(candidate: &str) -> Option<Value> {
    let direct = serde_json::from_str::<Value>(candidate);
    let parsed = match direct {
        Ok(v) => v,
        Err(_) => {
            let collapsed = candidate.split_whitespace().collect::<Vec<_>>().join(" ");
            serde_json::from_str::<Value>(&collapsed).ok()?
        }
    };
    parsed.is_object().then_some(parsed)
}

/// Build a `ParsedReply` from a parsed envelope and the text outside it.
fn assemble(envelope: &Value, outer: &str) -> ParsedReply {
    let tool_request = extract_tool_request(envelope);
    let prose = match envelope.get("response").and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => outer.trim().to_string(),
    };
    ParsedReply {
        prose,
        tool_request,
    }
}

/// A `tool_call` yields a request only when all three fields are present and
/// non-null; anything else means "no tool this round".
fn extract_tool_request(envelope: &Value) -> Option<ToolRequest> {
    let call = envelope.get("tool_call")?;
    let server_id = call.get("server_id")?.as_str()?.to_string();
    let tool_name = call.get("tool_name")?.as_str()?.to_string();
    let parameters = call.get("parameters")?;
    if parameters.is_null() {
        return None;
    }
    Some(ToolRequest {
        server_id,
        tool_name,
        parameters: parameters.clone(),
    })
}
