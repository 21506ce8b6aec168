//! Flattening of tool responses into a single display string.
//!
//! A successful result's `content` array is rendered entry by entry and joined
//! with newlines. Every other top-level field of the result is emitted first as
//! a compact JSON object, separated from the content by a blank line.

use crate::image::{ImagePool, payload_len};
use serde_json::{Map, Value};
use toolwire_types::{InvokeError, truncate_chars};

const GENERIC_FAILURE: &str = "Tool call failed";

const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Interpret a response envelope: the rendered text on success, the remote
/// error on failure.
pub fn render_envelope(envelope: &Value, images: &dyn ImagePool) -> Result<String, InvokeError> {
    let success = envelope
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if !success {
        return Err(remote_error(envelope.get("error")));
    }

    let result = envelope.get("result").unwrap_or(&Value::Null);
    Ok(flatten_result(result, images))
}

fn remote_error(error: Option<&Value>) -> InvokeError {
    let Some(error) = error.filter(|e| e.is_object()) else {
        return InvokeError::Remote {
            code: None,
            message: GENERIC_FAILURE.to_string(),
        };
    };
    InvokeError::Remote {
        code: error.get("code").and_then(Value::as_i64),
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(GENERIC_FAILURE)
            .to_string(),
    }
}

/// Flatten a result object: metadata, blank line, then rendered content.
pub fn flatten_result(result: &Value, images: &dyn ImagePool) -> String {
    let content = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| render_item(item, images))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    let metadata: Map<String, Value> = result
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(key, _)| key.as_str() != "content")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();
    let metadata = if metadata.is_empty() {
        String::new()
    } else {
        Value::Object(metadata).to_string()
    };

    match (metadata.is_empty(), content.is_empty()) {
        (true, true) => result.to_string(),
        (true, false) => content,
        (false, true) => metadata,
        (false, false) => format!("{metadata}\n\n{content}"),
    }
}

fn render_item(item: &Value, images: &dyn ImagePool) -> String {
    match item.get("type").and_then(Value::as_str) {
        Some("text") => render_text(item.get("text").and_then(Value::as_str).unwrap_or("")),
        Some("image") => render_image(item, images),
        Some("resource") => render_resource(item, images),
        _ => format!("[Unknown content type: {item}]"),
    }
}

/// JSON-looking text is re-serialized compactly; anything else is verbatim.
fn render_text(text: &str) -> String {
    let trimmed = text.trim();
    let bracketed = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if bracketed {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return value.to_string();
        }
    }
    text.to_string()
}

fn render_image(item: &Value, images: &dyn ImagePool) -> String {
    let mime = item
        .get("mimeType")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_IMAGE_MIME);
    match item.get("data").and_then(Value::as_str).filter(|d| !d.is_empty()) {
        Some(data) => store_image(data, mime, images)
            .unwrap_or_else(|| image_placeholder(mime, payload_len(data))),
        None => image_placeholder(mime, 0),
    }
}

/// Resource fields may sit on the entry itself or under a `resource` object.
fn render_resource(item: &Value, images: &dyn ImagePool) -> String {
    let resource = item.get("resource").filter(|r| r.is_object()).unwrap_or(item);
    let field = |name: &str| resource.get(name).and_then(Value::as_str);

    let uri = field("uri").unwrap_or("");
    let text = field("text").filter(|t| !t.is_empty());
    let mime = field("mimeType").unwrap_or("");
    let data = field("blob").or_else(|| field("data")).filter(|d| !d.is_empty());
    let uri_label = || format!("[Resource: {uri}]");

    if mime.starts_with("image/") {
        if let Some(data) = data {
            if let Some(tag) = store_image(data, mime, images) {
                return tag;
            }
        }
    }
    text.map_or_else(uri_label, str::to_string)
}

fn store_image(data: &str, mime: &str, images: &dyn ImagePool) -> Option<String> {
    match images.store(data, mime) {
        Ok(id) => Some(format!("<link type=\"image\" id=\"{id}\"></link>")),
        Err(e) => {
            tracing::warn!("Failed to store {mime} image from tool result: {e}");
            None
        }
    }
}

fn image_placeholder(mime: &str, len: usize) -> String {
    format!("[Image: {mime}, {len} bytes]")
}

/// Cut `text` to `max_chars` characters, appending a note on what was dropped.
pub fn truncate_output(text: String, max_chars: usize) -> String {
    let (kept, removed) = truncate_chars(&text, max_chars);
    if removed == 0 {
        return text;
    }
    format!(
        "{kept}\n\n[Output truncated: {removed} characters removed. \
         Write large results to a file or request paginated output instead.]"
    )
}
