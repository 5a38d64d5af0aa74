//! Directive parser for generator artifact markup.
//!
//! Generator responses wrap file contents in action tags:
//!
//! ```text
//! <boltArtifact id="project-import" title="Project Files">
//!   <boltAction type="file" filePath="src/app.js">console.log(1)</boltAction>
//! </boltArtifact>
//! ```
//!
//! Only `type="file"` actions with a `filePath` become steps. Any structural
//! problem (unterminated tag, unterminated or nested action, unclosed
//! artifact, broken attribute syntax) makes the whole input yield no steps:
//! callers treat an empty result as "no changes produced".

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::core::types::{Step, StepId, StepKind};

const ARTIFACT_TAG: &str = "boltArtifact";
const ACTION_TAG: &str = "boltAction";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(/?)(boltArtifact|boltAction)\b([^<>]*)(>)?").expect("tag regex")
});
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s*([A-Za-z_][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attr regex")
});
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|lt|gt|amp|quot|apos);").expect("entity regex")
});
static CDATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("cdata regex"));

/// Parse generator output into pending steps with ids `1..=N`.
///
/// The returned iterator is lazy and one-shot; parsing the same text again
/// yields the same steps.
pub fn parse(raw: &str) -> Directives<'_> {
    let actions = match scan(raw) {
        Ok(actions) => actions,
        Err(problem) => {
            warn!(%problem, "malformed directive markup, no steps produced");
            Vec::new()
        }
    };
    debug!(actions = actions.len(), "scanned directive markup");
    Directives {
        actions: actions.into_iter(),
        next_id: 1,
    }
}

/// Lazy sequence of steps produced by [`parse`].
#[derive(Debug)]
pub struct Directives<'a> {
    actions: std::vec::IntoIter<Action<'a>>,
    next_id: StepId,
}

impl Iterator for Directives<'_> {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        for action in self.actions.by_ref() {
            if action.attr("type").as_deref() != Some("file") {
                continue;
            }
            let Some(file_path) = action.attr("filePath") else {
                continue;
            };
            let content = decode_body(action.body);
            let step = Step::new(
                self.next_id,
                StepKind::CreateFile,
                Some(&file_path),
                Some(&content),
            );
            self.next_id += 1;
            return Some(step);
        }
        None
    }
}

/// One action tag: its decoded-on-demand attributes and raw body.
#[derive(Debug)]
struct Action<'a> {
    attrs: Vec<(&'a str, &'a str)>,
    body: &'a str,
}

impl Action<'_> {
    fn attr(&self, name: &str) -> Option<String> {
        self.attrs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| decode_entities(value).into_owned())
    }
}

enum State {
    Outside,
    InArtifact,
}

/// Validate tag structure and collect action spans in document order.
fn scan(raw: &str) -> Result<Vec<Action<'_>>, String> {
    let mut actions = Vec::new();
    let mut state = State::Outside;
    let mut cursor = 0;

    while let Some(caps) = TAG_RE.captures_at(raw, cursor) {
        let tag = caps.get(0).map_or(0..0, |m| m.range());
        if caps.get(4).is_none() {
            return Err(format!("unterminated tag at byte {}", tag.start));
        }
        let closing = &caps[1] == "/";
        let name = &caps[2];
        let attrs_raw = caps.get(3).map_or("", |m| m.as_str());
        cursor = tag.end;

        match (name, closing) {
            (ARTIFACT_TAG, false) => {
                if matches!(state, State::InArtifact) {
                    return Err(format!("nested artifact at byte {}", tag.start));
                }
                parse_attrs(attrs_raw)?;
                state = State::InArtifact;
            }
            (ARTIFACT_TAG, true) => {
                if !matches!(state, State::InArtifact) {
                    return Err(format!("unexpected artifact close at byte {}", tag.start));
                }
                state = State::Outside;
            }
            (_, false) => {
                let (attrs_raw, self_closing) = match attrs_raw.trim_end().strip_suffix('/') {
                    Some(rest) => (rest, true),
                    None => (attrs_raw, false),
                };
                let attrs = parse_attrs(attrs_raw)?;
                if self_closing {
                    actions.push(Action { attrs, body: "" });
                    continue;
                }
                let (body, after) = action_body(raw, cursor)?;
                actions.push(Action { attrs, body });
                cursor = after;
            }
            (_, true) => {
                return Err(format!("unexpected action close at byte {}", tag.start));
            }
        }
    }

    if matches!(state, State::InArtifact) {
        return Err("unterminated artifact".to_string());
    }
    Ok(actions)
}

/// Body of an action opened just before `start`, and the offset after its close tag.
///
/// The body is taken up to the first `</boltAction>`, so raw markup such as
/// `<html>` inside a file survives untouched.
fn action_body(raw: &str, start: usize) -> Result<(&str, usize), String> {
    let rest = raw.get(start..).unwrap_or_default();
    let close = format!("</{ACTION_TAG}>");
    let end = rest
        .find(&close)
        .ok_or_else(|| format!("unterminated action at byte {start}"))?;
    let body = &rest[..end];
    if body.contains(&format!("<{ACTION_TAG}")) {
        return Err(format!("nested action at byte {start}"));
    }
    Ok((body, start + end + close.len()))
}

fn parse_attrs(raw: &str) -> Result<Vec<(&str, &str)>, String> {
    let mut attrs = Vec::new();
    let mut consumed = 0;
    for caps in ATTR_RE.captures_iter(raw) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        if raw[consumed..whole.start].trim().is_empty() {
            consumed = whole.end;
        } else {
            return Err(format!("invalid attribute syntax: {}", raw.trim()));
        }
        let key = caps.get(1).map_or("", |m| m.as_str());
        let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        attrs.push((key, value));
    }
    if !raw[consumed..].trim().is_empty() {
        return Err(format!("invalid attribute syntax: {}", raw.trim()));
    }
    Ok(attrs)
}

/// Decode an action body: CDATA sections are literal, the rest is entity-decoded.
fn decode_body(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    for caps in CDATA_RE.captures_iter(body) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        out.push_str(&decode_entities(&body[last..whole.start]));
        out.push_str(caps.get(1).map_or("", |m| m.as_str()));
        last = whole.end;
    }
    out.push_str(&decode_entities(&body[last..]));
    out
}

fn decode_entities(text: &str) -> Cow<'_, str> {
    ENTITY_RE.replace_all(text, |caps: &Captures<'_>| {
        let entity = &caps[1];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .map(|hex| u32::from_str_radix(hex, 16))
                .or_else(|| entity.strip_prefix('#').map(str::parse::<u32>))
                .and_then(Result::ok)
                .and_then(char::from_u32),
        };
        decoded.map_or_else(|| caps[0].to_string(), String::from)
    })
}
