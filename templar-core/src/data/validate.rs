use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::error;

pub const SOLIDITY_WRAP_NOTE: &str = "Wrapped code snippet in contract structure";

/// Result of repairing and parsing a JSON file.
#[derive(Debug, Clone)]
pub struct JsonValidation {
    pub is_valid: bool,
    /// Key-sorted, 2-space indented JSON when valid; the repaired text otherwise.
    pub fixed: String,
    /// The parsed document in source key order.
    pub value: Option<Value>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolidityValidation {
    pub fixed: String,
    /// True when the snippet had no top-level declaration and was scaffolded.
    pub wrapped: bool,
}

impl SolidityValidation {
    pub fn notes(&self) -> Vec<String> {
        if self.wrapped {
            vec![SOLIDITY_WRAP_NOTE.to_string()]
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeBlocks {
    pub blocks: Vec<String>,
    pub cleaned: String,
}

/// Drop `//` and `/* */` comments that sit outside string literals.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    let mut in_string = false;

    while let Some((i, c)) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (c, chars.peek().map(|&(_, n)| n)) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                // Up to, not including, the newline.
                while let Some(&(_, n)) = chars.peek() {
                    if n == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            ('/', Some('*')) => match text[i + 2..].find("*/") {
                Some(end) => {
                    let resume = i + 2 + end + 2;
                    while chars.peek().is_some_and(|&(j, _)| j < resume) {
                        chars.next();
                    }
                }
                None => {
                    out.push_str(&text[i..]);
                    break;
                }
            },
            _ => out.push(c),
        }
    }
    out
}

/// Drop commas that are followed only by whitespace before `}` or `]`.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            out.push(c);
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
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = text[i + 1..].trim_start().chars().next();
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Recursively sort object keys so equal documents serialize identically.
pub fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for k in keys {
                if let Some(child) = map.get(k) {
                    sorted.insert(k.clone(), sort_keys(child));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Strip comments and trailing commas, parse, and re-serialize canonically.
pub fn validate_json(content: &str) -> JsonValidation {
    let repaired = strip_trailing_commas(&strip_comments(content));

    let parsed: Value = match serde_json::from_str(&repaired) {
        Ok(v) => v,
        Err(e) => {
            return JsonValidation {
                is_valid: false,
                fixed: repaired,
                value: None,
                errors: vec![format!("JSON validation error: {e}")],
            }
        }
    };

    match serde_json::to_string_pretty(&sort_keys(&parsed)) {
        Ok(fixed) => JsonValidation {
            is_valid: true,
            fixed,
            value: Some(parsed),
            errors: Vec::new(),
        },
        Err(e) => JsonValidation {
            is_valid: false,
            fixed: repaired,
            value: None,
            errors: vec![format!("JSON validation error: {e}")],
        },
    }
}

/// Scaffold bare Solidity snippets into a compilable contract.
pub fn validate_solidity(content: &str) -> SolidityValidation {
    let trimmed = content.trim();
    let declares = ["contract ", "library ", "interface "]
        .iter()
        .any(|kw| trimmed.contains(kw));

    if declares {
        SolidityValidation {
            fixed: trimmed.to_string(),
            wrapped: false,
        }
    } else {
        SolidityValidation {
            fixed: format!(
                "// SPDX-License-Identifier: MIT\npragma solidity ^0.8.0;\n\ncontract GeneratedContract {{\n{trimmed}\n}}"
            ),
            wrapped: true,
        }
    }
}

fn code_block_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(r"(?s)```\w*\n(.*?)```") {
            Ok(re) => Some(re),
            Err(e) => {
                error!("code block pattern failed to compile: {}", e);
                None
            }
        })
        .as_ref()
}

/// Pull fenced code blocks out of markdown or plain text.
pub fn extract_code_blocks(content: &str) -> CodeBlocks {
    let Some(pattern) = code_block_pattern() else {
        return CodeBlocks {
            blocks: Vec::new(),
            cleaned: content.to_string(),
        };
    };

    let blocks = pattern
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect();
    let cleaned = pattern.replace_all(content, "").trim().to_string();
    CodeBlocks { blocks, cleaned }
}
