//! `{{ .name }}` placeholder templates resolved against attribute maps
//!
//! The grammar is deliberately narrow: text interleaved with actions whose
//! only content is a single dotted identifier. Anything else inside an
//! action (pipelines, bare words, nested paths) is rejected.

use std::collections::BTreeSet;

use crate::attributes::Attributes;
use crate::error::{ValidationError, ValidationResult};

const ACTION_OPEN: &str = "{{";
const ACTION_CLOSE: &str = "}}";

/// Extract `name` from a `.name` action body
fn field_ident(action: &str) -> Option<&str> {
    let ident = action.strip_prefix('.')?;
    let mut chars = ident.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(ident)
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Key(String),
}

/// A parsed template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(text: &str) -> ValidationResult<Self> {
        let mut segments = Vec::new();
        let mut rest = text;

        while let Some(start) = rest.find(ACTION_OPEN) {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }

            let body = &rest[start + ACTION_OPEN.len()..];
            let end = body.find(ACTION_CLOSE).ok_or_else(|| invalid("unclosed action"))?;
            let action = body[..end].trim();

            let ident = field_ident(action)
                .ok_or_else(|| invalid(&format!("unsupported action \"{}\"", action)))?;
            segments.push(Segment::Key(ident.to_string()));

            rest = &body[end + ACTION_CLOSE.len()..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Referenced identifiers, sorted and deduplicated
    pub fn keys(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Key(key) => Some(key.clone()),
                Segment::Text(_) => None,
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn has_keys(&self) -> bool {
        self.segments.iter().any(|segment| matches!(segment, Segment::Key(_)))
    }

    /// Substitute placeholders; missing keys render as an empty string
    pub fn render(&self, attrs: &Attributes) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Key(key) => out.push_str(&attrs.render(key)),
            }
        }
        out
    }
}

fn invalid(reason: &str) -> ValidationError {
    ValidationError::InvalidTemplate { reason: reason.to_string() }
}

/// Expand `text` against `attrs`
pub fn expand(text: &str, attrs: &Attributes) -> ValidationResult<String> {
    Ok(Template::parse(text)?.render(attrs))
}

/// List the identifiers referenced by `text`
pub fn parse(text: &str) -> ValidationResult<Vec<String>> {
    Ok(Template::parse(text)?.keys())
}
