//! Recovery of JSON objects from free-form generated text.
//!
//! Generated text often wraps the requested object in prose or Markdown
//! fences, or contains other braces. A fence is stripped only when it wraps
//! the whole reply; every `{` of what remains is then tried in order and
//! each balanced span that parses as a JSON object is a candidate.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use postforge_shared::{OutputKind, PipelineRequest, PostforgeError, Result, StructuredOutput};

/// Field name reported when no object could be found at all.
pub const ROOT_FIELD: &str = "<root>";

static WRAPPING_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A```[A-Za-z]*[ \t]*\r?\n?(.*?)```\z").expect("valid fence regex")
});

/// Find the first JSON object in `text`, returning its exact source span and
/// the parsed map.
pub fn find_object(text: &str) -> Option<(&str, Map<String, Value>)> {
    objects(text).next()
}

/// Every JSON object candidate in `text`, in order of its opening brace.
pub fn objects(text: &str) -> impl Iterator<Item = (&str, Map<String, Value>)> {
    balanced_spans(strip_wrapping_fence(text)).filter_map(|span| {
        match serde_json::from_str::<Value>(span) {
            Ok(Value::Object(map)) => Some((span, map)),
            _ => None,
        }
    })
}

/// The body of a fence enclosing the whole (trimmed) reply, else the trimmed
/// reply itself.
fn strip_wrapping_fence(text: &str) -> &str {
    let trimmed = text.trim();
    WRAPPING_FENCE_RE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |body| body.as_str())
}

/// Every balanced `{...}` span in `text`, in order of its opening brace.
///
/// Braces inside JSON string literals are ignored. An opening brace with no
/// matching close yields nothing.
fn balanced_spans(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|&(_, c)| c == '{')
        .filter_map(move |(start, _)| {
            matching_close(&text[start..]).map(|len| &text[start..start + len])
        })
}

/// Length in bytes of the balanced object starting at `text[0] == '{'`.
fn matching_close(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Request mode
// ---------------------------------------------------------------------------

/// Extract a [`PipelineRequest`] from the request formatter's reply.
///
/// Fails with [`PostforgeError::Format`] naming the offending field.
pub fn parse_request(raw: &str) -> Result<PipelineRequest> {
    let (_, obj) = find_object(raw)
        .ok_or_else(|| PostforgeError::format(ROOT_FIELD, "no JSON object found in response"))?;

    let topic = match obj.get("topic") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.as_str(),
        Some(Value::String(_)) => {
            return Err(PostforgeError::format("topic", "must not be empty"));
        }
        Some(Value::Null) | None => return Err(PostforgeError::format("topic", "missing")),
        Some(_) => return Err(PostforgeError::format("topic", "expected a string")),
    };
    let tone = optional_str(&obj, "tone")?;
    let target_audience = optional_str(&obj, "target_audience")?;

    PipelineRequest::new(topic, tone, target_audience)
}

fn optional_str<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<Option<&'a str>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(PostforgeError::format(field, "expected a string")),
    }
}

// ---------------------------------------------------------------------------
// Final-output mode
// ---------------------------------------------------------------------------

/// Extract the article from the Package stage's text.
///
/// Never fails: when no valid object is found the raw text becomes the
/// `full_content` of a partial result.
pub fn parse_article(raw: &str) -> (StructuredOutput, OutputKind) {
    match article_from_text(raw) {
        Ok(output) => {
            debug!(
                title_len = output.title.len(),
                hashtags = output.hashtags.len(),
                "structured output extracted"
            );
            (output, OutputKind::Complete)
        }
        Err(e) => {
            warn!(error = %e, "could not extract structured output, returning raw text");
            (StructuredOutput::partial(raw), OutputKind::Partial)
        }
    }
}

fn article_from_text(raw: &str) -> Result<StructuredOutput> {
    let mut first_err = None;
    for (_, obj) in objects(raw) {
        match article_from_object(&obj) {
            Ok(output) => return Ok(output),
            Err(e) => {
                debug!(error = %e, "candidate object rejected");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    Err(first_err
        .unwrap_or_else(|| PostforgeError::format(ROOT_FIELD, "no JSON object found in output")))
}

fn article_from_object(obj: &Map<String, Value>) -> Result<StructuredOutput> {
    Ok(StructuredOutput {
        title: required_str(obj, "title")?,
        meta_description: required_str(obj, "meta_description")?,
        hashtags: string_list(obj, "hashtags")?,
        summary: required_str(obj, "summary")?,
        full_content: required_str(obj, "full_content")?,
    })
}

fn required_str(obj: &Map<String, Value>, field: &str) -> Result<String> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(PostforgeError::format(field, "expected a string")),
        None => Err(PostforgeError::format(field, "missing")),
    }
}

fn string_list(obj: &Map<String, Value>, field: &str) -> Result<Vec<String>> {
    let Some(value) = obj.get(field) else {
        return Err(PostforgeError::format(field, "missing"));
    };
    let Value::Array(items) = value else {
        return Err(PostforgeError::format(field, "expected an array of strings"));
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            _ => Err(PostforgeError::format(field, "expected an array of strings")),
        })
        .collect()
}
