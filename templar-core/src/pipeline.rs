//! Per-file processing and template assembly.
//!
//! [`BatchProcessor`] turns each entry into exactly one [`ProcessingResult`]
//! and remembers the hashes it has seen so later copies are flagged as
//! duplicates. [`build_templates`] then turns matched bundles into
//! reviewable templates, and [`new_template`] / [`details_tab`] shape them
//! into backend calls.

use std::collections::HashSet;

use indexmap::IndexSet;
use serde_json::json;
use tracing::debug;

use crate::backend::{NewDetailsTab, NewTemplate};
use crate::config::ImportConfig;
use crate::data::hash::{hash_content, ContentHasher, MARKDOWN_SENTINEL};
use crate::data::matcher::base_name;
use crate::data::normalize::canonicalize;
use crate::data::schema::{capitalize, infer_fields, parse_json_template};
use crate::data::validate::{extract_code_blocks, validate_json, validate_solidity};
use crate::models::{
    flatten_field_names, FileBundle, FileType, ParsedTemplate, ProcessingResult, RawEntry,
    ResultStatus,
};

pub const MARKDOWN_GUIDANCE_WARNING: &str =
    "Markdown file will be stored as guidance content, not parsed as form fields";
pub const TEXT_GUIDANCE_WARNING: &str =
    "Text file will be stored as guidance content, not parsed as form fields";
pub const DUPLICATE_WARNING: &str = "Duplicate content detected (SHA-256 match)";
pub const FALLBACK_HASH_WARNING: &str =
    "SHA-256 unavailable; content identifier is a non-authoritative fallback";

/// Runs entries through sanitize, normalize, validate and hash, in order.
pub struct BatchProcessor<'a> {
    hasher: &'a dyn ContentHasher,
    seen: HashSet<String>,
    duplicates: IndexSet<String>,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(hasher: &'a dyn ContentHasher) -> Self {
        Self {
            hasher,
            seen: HashSet::new(),
            duplicates: IndexSet::new(),
        }
    }

    /// Hashes that occurred more than once in this batch, in the order the
    /// first repeat was seen.
    pub fn duplicates(&self) -> Vec<String> {
        self.duplicates.iter().cloned().collect()
    }

    pub fn into_duplicates(self) -> Vec<String> {
        self.duplicates.into_iter().collect()
    }

    pub fn process(&mut self, entry: &RawEntry) -> ProcessingResult {
        let file_type = entry.file_type();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut extracted_field_names = Vec::new();
        let mut code_blocks = Vec::new();
        let mut canonical = canonicalize(&entry.content);

        match file_type {
            FileType::Markdown | FileType::Text => {
                let extracted = extract_code_blocks(&canonical);
                code_blocks = extracted.blocks;
                canonical = extracted.cleaned;
                warnings.push(if file_type == FileType::Markdown {
                    MARKDOWN_GUIDANCE_WARNING.to_string()
                } else {
                    TEXT_GUIDANCE_WARNING.to_string()
                });
            }
            FileType::Json => {
                let validation = validate_json(&canonical);
                match validation.value {
                    Some(value) if validation.is_valid => {
                        extracted_field_names = flatten_field_names(&infer_fields(&value));
                        canonical = validation.fixed;
                    }
                    _ => errors.extend(validation.errors),
                }
            }
            FileType::Solidity => {
                let validation = validate_solidity(&canonical);
                warnings.extend(validation.notes());
                canonical = validation.fixed;
            }
            FileType::Zip | FileType::Unknown => {}
        }

        let content_hash = if file_type == FileType::Markdown {
            MARKDOWN_SENTINEL.to_string()
        } else {
            let hash = hash_content(self.hasher, canonical.as_bytes());
            if hash.is_fallback() {
                warnings.push(FALLBACK_HASH_WARNING.to_string());
            }
            let hash = hash.into_string();
            if !self.seen.insert(hash.clone()) {
                warnings.push(DUPLICATE_WARNING.to_string());
                self.duplicates.insert(hash.clone());
            }
            hash
        };

        let status = ResultStatus::derive(&errors, &warnings);
        debug!(
            "{} ({}): {}, {} error(s), {} warning(s)",
            entry.name,
            file_type,
            status,
            errors.len(),
            warnings.len()
        );

        ProcessingResult {
            file_name: entry.name.clone(),
            file_type,
            byte_size: canonical.len(),
            content_hash,
            status,
            errors,
            warnings,
            extracted_field_names,
            code_blocks,
            canonical_content: canonical,
        }
    }
}

/// Build one template per bundle that has a parseable JSON or a markdown
/// member. Bundles with neither yield nothing.
pub fn build_templates(bundles: &[FileBundle], config: &ImportConfig) -> Vec<ParsedTemplate> {
    bundles
        .iter()
        .filter_map(|bundle| build_template(bundle, config))
        .collect()
}

fn build_template(bundle: &FileBundle, config: &ImportConfig) -> Option<ParsedTemplate> {
    let markdown_content = bundle
        .markdown
        .as_ref()
        .map(|md| canonicalize(&md.content));

    let parsed = bundle.json.as_ref().and_then(|json| {
        let validation = validate_json(&canonicalize(&json.content));
        validation
            .value
            .map(|value| parse_json_template(&value, &json.name, &config.default_category))
    });

    match (parsed, bundle.markdown.as_ref(), markdown_content) {
        (Some(mut template), _, markdown_content) => {
            template.markdown_content = markdown_content;
            Some(template)
        }
        (None, Some(md), Some(markdown_content)) => Some(ParsedTemplate {
            name: capitalize(base_name(&md.name)),
            category: config.default_category.clone(),
            fields: Vec::new(),
            content: String::new(),
            format: "md".to_string(),
            source_file_name: md.name.clone(),
            is_parsed: false,
            markdown_content: Some(markdown_content),
        }),
        _ => None,
    }
}

/// The `create_template` call for a reviewed template.
pub fn new_template(template: &ParsedTemplate, config: &ImportConfig) -> NewTemplate {
    let structure = json!({
        "isParsed": template.is_parsed,
        "fields": template.fields,
    });
    NewTemplate {
        name: template.name.clone(),
        fields: template.flatten_field_names(),
        content: template.content.clone(),
        category: template.category.clone(),
        size: template.content.len() as u64,
        format: template.format.clone(),
        preview_image: config.preview_image.clone(),
        file_reference: template.content.as_bytes().to_vec(),
        dynamic_structure: Some(structure.to_string()),
    }
}

/// The `create_template_details_tab` call, if the template has guidance text.
pub fn details_tab(template: &ParsedTemplate, template_id: &str) -> Option<NewDetailsTab> {
    template
        .markdown_content
        .as_ref()
        .map(|markdown_content| NewDetailsTab {
            template_id: template_id.to_string(),
            markdown_content: markdown_content.clone(),
            preview_image: None,
            file_reference: None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::hash::tests::UnavailableHasher;
    use crate::data::hash::Sha256Hasher;
    use crate::data::validate::SOLIDITY_WRAP_NOTE;

    fn entry(name: &str, content: &str) -> RawEntry {
        RawEntry::new(name, content)
    }

    #[test]
    fn test_json_result_carries_field_names() {
        let mut processor = BatchProcessor::new(&Sha256Hasher);
        let result = processor.process(&entry(
            "nda.json",
            r#"{"party": {"name": "Acme", "email": "a@b.co"}, "amount": 10}"#,
        ));
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(
            result.extracted_field_names,
            vec!["party", "party.name", "party.email", "amount"]
        );
        assert_eq!(result.content_hash.len(), 64);
        assert!(result.canonical_content.starts_with("{\n  \"amount\": 10"));
        assert_eq!(result.byte_size, result.canonical_content.len());
    }

    #[test]
    fn test_invalid_json_is_an_error_result() {
        let mut processor = BatchProcessor::new(&Sha256Hasher);
        let result = processor.process(&entry("bad.json", "{\"a\": }"));
        assert_eq!(result.status, ResultStatus::Error);
        assert!(result.errors[0].starts_with("JSON validation error:"));
        assert!(result.extracted_field_names.is_empty());
    }

    #[test]
    fn test_markdown_gets_sentinel_and_guidance_warning() {
        let mut processor = BatchProcessor::new(&Sha256Hasher);
        let md = "# Guide\r\n\r\n```json\n{\"a\": 1}\n```\r\n<script>alert(1)</script>Done";
        let first = processor.process(&entry("guide.md", md));
        let second = processor.process(&entry("copy.md", md));

        assert_eq!(first.content_hash, MARKDOWN_SENTINEL);
        assert_eq!(first.status, ResultStatus::Warning);
        assert_eq!(first.warnings, vec![MARKDOWN_GUIDANCE_WARNING]);
        assert_eq!(first.code_blocks, vec!["{\"a\": 1}"]);
        assert!(!first.canonical_content.contains("script"));
        assert!(first.extracted_field_names.is_empty());
        // Sentinels never count as duplicates.
        assert_eq!(second.warnings, vec![MARKDOWN_GUIDANCE_WARNING]);
        assert!(processor.duplicates().is_empty());
    }

    #[test]
    fn test_text_is_hashed_as_guidance() {
        let mut processor = BatchProcessor::new(&Sha256Hasher);
        let result = processor.process(&entry("notes.txt", "plain notes"));
        assert_eq!(result.warnings, vec![TEXT_GUIDANCE_WARNING]);
        assert_eq!(result.content_hash.len(), 64);
        assert_ne!(result.content_hash, MARKDOWN_SENTINEL);
    }

    #[test]
    fn test_duplicate_canonical_content_is_flagged() {
        let mut processor = BatchProcessor::new(&Sha256Hasher);
        let a = processor.process(&entry("a.json", r#"{"b": 1, "a": 2}"#));
        let b = processor.process(&entry("b.json", "{\"a\": 2,\r\n \"b\": 1,}"));
        assert_eq!(a.status, ResultStatus::Success);
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(b.status, ResultStatus::Warning);
        assert_eq!(b.warnings, vec![DUPLICATE_WARNING]);
        assert_eq!(processor.into_duplicates(), vec![a.content_hash]);
    }

    #[test]
    fn test_solidity_wrap_is_a_warning() {
        let mut processor = BatchProcessor::new(&Sha256Hasher);
        let result = processor.process(&entry("snippet.sol", "uint x;"));
        assert_eq!(result.status, ResultStatus::Warning);
        assert_eq!(result.warnings, vec![SOLIDITY_WRAP_NOTE]);
        assert!(result.canonical_content.contains("contract GeneratedContract"));
    }

    #[test]
    fn test_fallback_hash_is_a_warning_without_dedup() {
        let hasher = UnavailableHasher;
        let mut processor = BatchProcessor::new(&hasher);
        let a = processor.process(&entry("a.json", "{}"));
        let b = processor.process(&entry("b.json", "{}"));
        assert!(a.content_hash.starts_with("fallback-"));
        assert_eq!(a.content_hash.len(), 64);
        assert_eq!(a.warnings, vec![FALLBACK_HASH_WARNING]);
        assert_eq!(b.warnings, vec![FALLBACK_HASH_WARNING]);
        assert!(processor.duplicates().is_empty());
    }

    #[test]
    fn test_paired_bundle_yields_template_with_markdown() {
        let mut bundle = FileBundle::new("contract");
        bundle.json = Some(entry("contract.json", r#"{"title": "Service Contract", "client": "x"}"#));
        bundle.markdown = Some(entry("contract.md", "# How to fill\r\nUse care."));

        let templates = build_templates(&[bundle], &ImportConfig::default());
        assert_eq!(templates.len(), 1);
        let template = &templates[0];
        assert_eq!(template.name, "Service Contract");
        assert_eq!(template.format, "json");
        assert_eq!(template.markdown_content.as_deref(), Some("# How to fill\nUse care."));
        assert!(!template.flatten_field_names().iter().any(|n| n.contains("fill")));

        let tab = details_tab(template, "template-1").unwrap();
        assert_eq!(tab.template_id, "template-1");
        assert_eq!(tab.markdown_content, "# How to fill\nUse care.");
    }

    #[test]
    fn test_markdown_only_bundle_is_placeholder() {
        let mut bundle = FileBundle::new("guide");
        bundle.markdown = Some(entry("docs/guide.md", "Read me"));
        let templates = build_templates(&[bundle], &ImportConfig::default());
        let template = &templates[0];
        assert_eq!(template.name, "Guide");
        assert!(template.fields.is_empty());
        assert!(!template.is_parsed);
        assert_eq!(template.format, "md");
        assert_eq!(template.category, "Legal");
        assert!(template.content.is_empty());
        assert_eq!(template.markdown_content.as_deref(), Some("Read me"));

        let request = new_template(template, &ImportConfig::default());
        assert_eq!(request.size, 0);
        assert!(request.file_reference.is_empty());
    }

    #[test]
    fn test_failed_json_with_markdown_falls_back_to_placeholder() {
        let mut bundle = FileBundle::new("broken");
        bundle.json = Some(entry("broken.json", "{nope"));
        bundle.markdown = Some(entry("broken.md", "guidance"));
        let templates = build_templates(&[bundle], &ImportConfig::default());
        assert_eq!(templates.len(), 1);
        assert!(!templates[0].is_parsed);

        let mut lone = FileBundle::new("lone");
        lone.json = Some(entry("lone.json", "{nope"));
        let mut text = FileBundle::new("notes");
        text.text = Some(entry("notes.txt", "hi"));
        assert!(build_templates(&[lone, text], &ImportConfig::default()).is_empty());
    }

    #[test]
    fn test_new_template_payload() {
        let mut bundle = FileBundle::new("lease");
        bundle.json = Some(entry("lease.json", r#"{"tenant": "t", "rent": 5}"#));
        let config = ImportConfig::default();
        let template = &build_templates(&[bundle], &config)[0];
        let call = new_template(template, &config);

        assert_eq!(call.name, "Lease");
        assert_eq!(call.fields, vec!["tenant", "rent"]);
        assert_eq!(call.size, call.content.len() as u64);
        assert_eq!(call.file_reference, call.content.as_bytes());
        assert_eq!(call.preview_image, config.preview_image);
        let structure: serde_json::Value =
            serde_json::from_str(call.dynamic_structure.as_deref().unwrap()).unwrap();
        assert_eq!(structure["isParsed"], true);
        assert_eq!(structure["fields"][1]["name"], "rent");
        assert!(details_tab(template, "id").is_none());
    }
}
