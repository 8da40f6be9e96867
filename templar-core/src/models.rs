use serde::{Deserialize, Serialize};

/// One file pulled out of an upload, content decoded as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub name: String,
    pub content: String,
}

impl RawEntry {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Build an entry from raw bytes, replacing invalid UTF-8 sequences.
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            content: decode_text(bytes),
        }
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_file_name(&self.name)
    }
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Lossy UTF-8 decode that drops a leading byte order mark.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// File kinds the backend distinguishes in import reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Json,
    Markdown,
    Text,
    Solidity,
    Zip,
    Unknown,
}

impl FileType {
    /// Classify by the lower-cased text after the last `.` of the name.
    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        let ext = lower.rsplit('.').next().unwrap_or("");
        match ext {
            "json" => FileType::Json,
            "md" => FileType::Markdown,
            "txt" => FileType::Text,
            "sol" => FileType::Solidity,
            "zip" => FileType::Zip,
            _ => FileType::Unknown,
        }
    }

    /// Whether entries of this type are run through the per-file pipeline.
    pub fn is_template_source(self) -> bool {
        matches!(
            self,
            FileType::Json | FileType::Markdown | FileType::Text | FileType::Solidity
        )
    }

    /// Markdown and plain text are guidance content, never form sources.
    pub fn is_guidance(self) -> bool {
        matches!(self, FileType::Markdown | FileType::Text)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Json => "json",
            FileType::Markdown => "markdown",
            FileType::Text => "text",
            FileType::Solidity => "solidity",
            FileType::Zip => "zip",
            FileType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files sharing a base name, at most one per recognized extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileBundle {
    pub base_name: String,
    pub json: Option<RawEntry>,
    pub markdown: Option<RawEntry>,
    pub text: Option<RawEntry>,
    pub solidity: Option<RawEntry>,
}

impl FileBundle {
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            ..Default::default()
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &RawEntry> {
        [&self.json, &self.markdown, &self.text, &self.solidity]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Warning,
    Error,
}

impl ResultStatus {
    /// Errors win over warnings; anything else is a success.
    pub fn derive(errors: &[String], warnings: &[String]) -> Self {
        if !errors.is_empty() {
            ResultStatus::Error
        } else if !warnings.is_empty() {
            ResultStatus::Warning
        } else {
            ResultStatus::Success
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Warning => "warning",
            ResultStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of running one entry through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingResult {
    pub file_name: String,
    pub file_type: FileType,
    pub byte_size: usize,
    pub content_hash: String,
    pub status: ResultStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub extracted_field_names: Vec<String>,
    pub code_blocks: Vec<String>,
    pub canonical_content: String,
}

/// Counts shown to the operator after every batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub success: usize,
    pub warning: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn tally<'a>(statuses: impl IntoIterator<Item = &'a ResultStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            match status {
                ResultStatus::Success => counts.success += 1,
                ResultStatus::Warning => counts.warning += 1,
                ResultStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.success + self.warning + self.error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Textarea,
    Select,
    Checkbox,
    Email,
    Url,
    Signature,
}

impl FieldType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "text" => FieldType::Text,
            "number" => FieldType::Number,
            "date" => FieldType::Date,
            "textarea" => FieldType::Textarea,
            "select" => FieldType::Select,
            "checkbox" => FieldType::Checkbox,
            "email" => FieldType::Email,
            "url" => FieldType::Url,
            "signature" => FieldType::Signature,
            _ => return None,
        })
    }
}

/// A form field inferred from a JSON template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub id: String,
    pub name: String,
    pub label: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: FieldKind,
}

/// Either a single input or a container owning a nested object's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FieldKind {
    #[serde(rename_all = "camelCase")]
    Scalar {
        #[serde(rename = "type")]
        field_type: FieldType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<String>,
    },
    Nested {
        #[serde(rename = "type", default)]
        container_type: ContainerType,
        children: Vec<FieldDescriptor>,
    },
}

impl FieldKind {
    pub fn nested(children: Vec<FieldDescriptor>) -> Self {
        FieldKind::Nested {
            container_type: ContainerType::Textarea,
            children,
        }
    }
}

/// The `type` a nested container reports; it renders as one textarea.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    #[default]
    Textarea,
}

impl FieldDescriptor {
    /// Nested containers always render as a textarea.
    pub fn field_type(&self) -> FieldType {
        match &self.kind {
            FieldKind::Scalar { field_type, .. } => *field_type,
            FieldKind::Nested { .. } => FieldType::Textarea,
        }
    }

    pub fn children(&self) -> &[FieldDescriptor] {
        match &self.kind {
            FieldKind::Nested { children, .. } => children,
            FieldKind::Scalar { .. } => &[],
        }
    }

    fn apply(&mut self, patch: &FieldPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(label) = &patch.label {
            self.label = label.clone();
        }
        if let Some(required) = patch.required {
            self.required = required;
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        if let FieldKind::Scalar {
            field_type,
            options,
            default_value,
            ..
        } = &mut self.kind
        {
            if let Some(t) = patch.field_type {
                *field_type = t;
            }
            if let Some(o) = &patch.options {
                *options = Some(o.clone());
            }
            if let Some(d) = &patch.default_value {
                *default_value = Some(d.clone());
            }
        }
    }
}

/// Partial update for a field; `None` leaves the attribute untouched.
/// Type, options and default only apply to scalar fields.
#[derive(Debug, Clone, Default)]
pub struct FieldPatch {
    pub name: Option<String>,
    pub label: Option<String>,
    pub field_type: Option<FieldType>,
    pub required: Option<bool>,
    pub options: Option<Vec<String>>,
    pub default_value: Option<String>,
    pub description: Option<String>,
}

/// Field names depth-first, parents before their children.
pub fn flatten_field_names(fields: &[FieldDescriptor]) -> Vec<String> {
    fn walk(fields: &[FieldDescriptor], out: &mut Vec<String>) {
        for field in fields {
            out.push(field.name.clone());
            walk(field.children(), out);
        }
    }
    let mut names = Vec::new();
    walk(fields, &mut names);
    names
}

/// A template ready for review and submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedTemplate {
    pub name: String,
    pub category: String,
    pub fields: Vec<FieldDescriptor>,
    pub content: String,
    pub format: String,
    pub source_file_name: String,
    pub is_parsed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown_content: Option<String>,
}

impl ParsedTemplate {
    pub fn flatten_field_names(&self) -> Vec<String> {
        flatten_field_names(&self.fields)
    }

    /// Apply `patch` to the field with `id`, searching nested children.
    /// Returns false if no field matched.
    pub fn update_field(&mut self, id: &str, patch: &FieldPatch) -> bool {
        fn walk(fields: &mut [FieldDescriptor], id: &str, patch: &FieldPatch) -> bool {
            for field in fields {
                if field.id == id {
                    field.apply(patch);
                    return true;
                }
                if let FieldKind::Nested { children, .. } = &mut field.kind {
                    if walk(children, id, patch) {
                        return true;
                    }
                }
            }
            false
        }
        walk(&mut self.fields, id, patch)
    }

    /// Append a blank optional text field and return its id.
    pub fn add_field(&mut self) -> String {
        let n = self.fields.len() + 1;
        let id = format!("field-{}", uuid::Uuid::new_v4());
        self.fields.push(FieldDescriptor {
            id: id.clone(),
            name: format!("new_field_{n}"),
            label: format!("New Field {n}"),
            required: false,
            description: None,
            kind: FieldKind::Scalar {
                field_type: FieldType::Text,
                options: None,
                default_value: None,
                placeholder: None,
            },
        });
        self.is_parsed = true;
        id
    }

    /// Remove a top-level field. Returns false if no field matched.
    pub fn remove_field(&mut self, id: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|f| f.id != id);
        self.is_parsed = !self.fields.is_empty();
        self.fields.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(id: &str, name: &str) -> FieldDescriptor {
        FieldDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            label: name.to_string(),
            required: true,
            description: None,
            kind: FieldKind::Scalar {
                field_type: FieldType::Text,
                options: None,
                default_value: None,
                placeholder: None,
            },
        }
    }

    fn template_with(fields: Vec<FieldDescriptor>) -> ParsedTemplate {
        ParsedTemplate {
            name: "Lease".to_string(),
            category: "Legal".to_string(),
            is_parsed: !fields.is_empty(),
            fields,
            content: String::new(),
            format: "json".to_string(),
            source_file_name: "lease.json".to_string(),
            markdown_content: None,
        }
    }

    #[test]
    fn test_file_type_from_name() {
        assert_eq!(FileType::from_file_name("a/b/NDA.JSON"), FileType::Json);
        assert_eq!(FileType::from_file_name("readme.md"), FileType::Markdown);
        assert_eq!(FileType::from_file_name("notes.txt"), FileType::Text);
        assert_eq!(FileType::from_file_name("token.sol"), FileType::Solidity);
        assert_eq!(FileType::from_file_name("bundle.zip"), FileType::Zip);
        assert_eq!(FileType::from_file_name("image.png"), FileType::Unknown);
        assert_eq!(FileType::from_file_name("LICENSE"), FileType::Unknown);
    }

    #[test]
    fn test_from_bytes_drops_byte_order_mark() {
        let entry = RawEntry::from_bytes("nda.json", b"\xEF\xBB\xBF{\"a\": 1}");
        assert_eq!(entry.content, "{\"a\": 1}");
        // Only a leading mark is dropped.
        assert_eq!(decode_text("a\u{feff}".as_bytes()), "a\u{feff}");
    }

    #[test]
    fn test_status_derivation() {
        let none: Vec<String> = vec![];
        let one = vec!["x".to_string()];
        assert_eq!(ResultStatus::derive(&none, &none), ResultStatus::Success);
        assert_eq!(ResultStatus::derive(&none, &one), ResultStatus::Warning);
        assert_eq!(ResultStatus::derive(&one, &one), ResultStatus::Error);
    }

    #[test]
    fn test_flatten_and_update_nested_field() {
        let mut template = template_with(vec![
            scalar("field-0", "title"),
            FieldDescriptor {
                id: "field-1".to_string(),
                name: "party".to_string(),
                label: "Party".to_string(),
                required: false,
                description: None,
                kind: FieldKind::nested(vec![scalar("field-2", "party.email")]),
            },
        ]);

        assert_eq!(
            template.flatten_field_names(),
            vec!["title", "party", "party.email"]
        );

        let patch = FieldPatch {
            field_type: Some(FieldType::Email),
            label: Some("Party Email".to_string()),
            ..Default::default()
        };
        assert!(template.update_field("field-2", &patch));
        let child = &template.fields[1].children()[0];
        assert_eq!(child.field_type(), FieldType::Email);
        assert_eq!(child.label, "Party Email");
        assert!(!template.update_field("missing", &patch));
    }

    #[test]
    fn test_add_and_remove_field_tracks_is_parsed() {
        let mut template = template_with(vec![]);
        assert!(!template.is_parsed);

        let id = template.add_field();
        assert!(template.is_parsed);
        assert_eq!(template.fields[0].name, "new_field_1");
        assert!(!template.fields[0].required);

        assert!(template.remove_field(&id));
        assert!(!template.is_parsed);
        assert!(!template.remove_field(&id));
    }

    #[test]
    fn test_nested_field_serializes_children() {
        let field = FieldDescriptor {
            id: "field-0".to_string(),
            name: "party".to_string(),
            label: "Party".to_string(),
            required: false,
            description: None,
            kind: FieldKind::nested(vec![scalar("field-1", "party.name")]),
        };
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["kind"], "nested");
        assert_eq!(json["type"], "textarea");
        assert_eq!(json["children"][0]["type"], "text");
        assert_eq!(field.field_type(), FieldType::Textarea);

        let back: FieldDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, field);
    }
}
