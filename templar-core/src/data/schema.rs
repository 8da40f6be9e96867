use serde_json::{Map, Value};
use tracing::warn;

use crate::data::matcher::base_name;
use crate::models::{FieldDescriptor, FieldKind, FieldType, ParsedTemplate};

/// Keys nested deeper than this are skipped during inference.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Hands out `field-<n>` ids, unique within one template.
#[derive(Debug, Default)]
struct FieldIds(usize);

impl FieldIds {
    fn next(&mut self) -> String {
        let id = format!("field-{}", self.0);
        self.0 += 1;
        id
    }
}

/// `party_name` → `Party Name`, `e-mail` → `E-Mail`.
pub fn humanize(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut out = String::with_capacity(spaced.len());
    let mut prev_is_word = false;
    for c in spaced.chars() {
        let is_word = c.is_ascii_alphanumeric();
        if is_word && !prev_is_word {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        prev_is_word = is_word;
    }
    out
}

pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(c) => c.to_uppercase().to_string() + chars.as_str(),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().map(value_to_string).collect())
}

fn type_from_schema(schema_type: &str, schema: &Value) -> FieldType {
    match schema_type {
        "integer" | "number" => FieldType::Number,
        "boolean" => FieldType::Checkbox,
        "string" => {
            match schema.get("format").and_then(Value::as_str) {
                Some("email") => return FieldType::Email,
                Some("uri") | Some("url") => return FieldType::Url,
                Some("date") | Some("date-time") => return FieldType::Date,
                _ => {}
            }
            if schema.get("enum").is_some_and(|e| !e.is_null()) {
                FieldType::Select
            } else if schema
                .get("maxLength")
                .and_then(Value::as_f64)
                .is_some_and(|max| max > 200.0)
            {
                FieldType::Textarea
            } else {
                FieldType::Text
            }
        }
        "array" => FieldType::Select,
        "object" => FieldType::Textarea,
        _ => FieldType::Text,
    }
}

fn type_from_key(key: &str) -> Option<FieldType> {
    const RULES: &[(&[&str], FieldType)] = &[
        (&["email"], FieldType::Email),
        (&["website", "url", "link"], FieldType::Url),
        (&["date", "birthday", "time"], FieldType::Date),
        (&["signature", "sign"], FieldType::Signature),
        (
            &["description", "comment", "notes", "message", "content"],
            FieldType::Textarea,
        ),
        (&["amount", "price", "quantity", "count"], FieldType::Number),
    ];
    let lower = key.to_lowercase();
    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
        .map(|(_, field_type)| *field_type)
}

/// Pick an input type: explicit schema type, then key name, then the JSON
/// type of the sample value.
pub fn infer_field_type(key: &str, value: Option<&Value>, schema: Option<&Value>) -> FieldType {
    if let Some(schema) = schema {
        if let Some(schema_type) = non_empty_str(schema, "type") {
            return type_from_schema(schema_type, schema);
        }
    }

    if let Some(field_type) = type_from_key(key) {
        return field_type;
    }

    match value {
        Some(Value::Number(_)) => FieldType::Number,
        Some(Value::Bool(_)) => FieldType::Checkbox,
        Some(Value::Array(_)) => FieldType::Select,
        _ => FieldType::Text,
    }
}

fn scalar(field_type: FieldType) -> FieldKind {
    FieldKind::Scalar {
        field_type,
        options: None,
        default_value: None,
        placeholder: None,
    }
}

fn child_name(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Infer a form from a parsed JSON template.
///
/// Tried in order: a `types` map of field arrays, a JSON-Schema style
/// `properties` object, an explicit `fields` array, and finally a walk over
/// the document's own keys.
pub fn infer_fields(data: &Value) -> Vec<FieldDescriptor> {
    let mut ids = FieldIds::default();

    if let Some(types) = data.get("types").and_then(Value::as_object) {
        return fields_from_types(types, &mut ids);
    }
    if let Some(properties) = data.get("properties").and_then(Value::as_object) {
        return fields_from_properties(properties, data.get("required"), "", 0, &mut ids);
    }
    if let Some(fields) = data.get("fields").and_then(Value::as_array) {
        return fields_from_list(fields, &mut ids);
    }
    walk_value(data, "", 0, &mut ids)
}

/// `{"types": {"Agreement": [{"name": "buyer", "type": "address"}]}}`
fn fields_from_types(types: &Map<String, Value>, ids: &mut FieldIds) -> Vec<FieldDescriptor> {
    let mut fields = Vec::new();
    for members in types.values().filter_map(Value::as_array) {
        for (index, member) in members.iter().enumerate() {
            let declared_name = non_empty_str(member, "name");
            let declared_type = member.get("type").cloned().unwrap_or(Value::Null);
            let type_label = match &declared_type {
                Value::Null => "unspecified".to_string(),
                other => value_to_string(other),
            };
            let hint = serde_json::json!({ "type": declared_type });

            fields.push(FieldDescriptor {
                id: ids.next(),
                name: declared_name
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("field_{index}")),
                label: declared_name
                    .map(humanize)
                    .unwrap_or_else(|| format!("Field {}", index + 1)),
                required: true,
                description: Some(format!("Type: {type_label}")),
                kind: scalar(infer_field_type(
                    declared_name.unwrap_or(""),
                    None,
                    Some(&hint),
                )),
            });
        }
    }
    fields
}

fn fields_from_properties(
    properties: &Map<String, Value>,
    required: Option<&Value>,
    parent: &str,
    depth: usize,
    ids: &mut FieldIds,
) -> Vec<FieldDescriptor> {
    let required: Vec<&str> = required
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut fields = Vec::new();
    for (key, schema) in properties {
        let name = child_name(parent, key);
        let id = ids.next();
        let label = non_empty_str(schema, "title")
            .map(str::to_string)
            .unwrap_or_else(|| humanize(key));
        let description = non_empty_str(schema, "description").map(str::to_string);
        let is_required = required.contains(&key.as_str());

        let kind = match schema.get("properties").and_then(Value::as_object) {
            Some(_) if depth + 1 >= MAX_NESTING_DEPTH => {
                warn!("skipping '{}': nested deeper than {} levels", name, MAX_NESTING_DEPTH);
                continue;
            }
            Some(nested) => FieldKind::nested(fields_from_properties(
                nested,
                schema.get("required"),
                &name,
                depth + 1,
                ids,
            )),
            None => {
                let default = schema.get("default").filter(|d| !d.is_null());
                FieldKind::Scalar {
                    field_type: infer_field_type(key, default, Some(schema)),
                    options: string_list(schema.get("enum")),
                    default_value: default.map(value_to_string),
                    placeholder: non_empty_str(schema, "placeholder")
                        .map(str::to_string)
                        .or_else(|| {
                            schema
                                .get("examples")
                                .and_then(|e| e.get(0))
                                .map(value_to_string)
                        }),
                }
            }
        };

        fields.push(FieldDescriptor {
            id,
            name,
            label,
            required: is_required,
            description,
            kind,
        });
    }
    fields
}

/// `{"fields": [{"name": "party", "type": "text", "required": false}]}`
fn fields_from_list(list: &[Value], ids: &mut FieldIds) -> Vec<FieldDescriptor> {
    list.iter()
        .enumerate()
        .map(|(index, field)| {
            let declared_name = non_empty_str(field, "name");
            let name = declared_name
                .map(str::to_string)
                .unwrap_or_else(|| format!("field_{index}"));
            let default = field
                .get("defaultValue")
                .filter(|d| !d.is_null())
                .or_else(|| field.get("default").filter(|d| !d.is_null()));
            let field_type = non_empty_str(field, "type")
                .and_then(FieldType::parse)
                .unwrap_or_else(|| infer_field_type(declared_name.unwrap_or(""), default, None));
            let label = ["label", "title", "name"]
                .iter()
                .find_map(|k| non_empty_str(field, k))
                .map(str::to_string)
                .unwrap_or_else(|| format!("Field {}", index + 1));

            FieldDescriptor {
                id: ids.next(),
                name,
                label,
                required: field.get("required").and_then(Value::as_bool) != Some(false),
                description: non_empty_str(field, "description").map(str::to_string),
                kind: FieldKind::Scalar {
                    field_type,
                    options: string_list(field.get("options"))
                        .or_else(|| string_list(field.get("enum"))),
                    default_value: default.map(value_to_string),
                    placeholder: non_empty_str(field, "placeholder").map(str::to_string),
                },
            }
        })
        .collect()
}

/// Generic walk: objects become nested containers, everything else a
/// required leaf typed from its key and sample value.
fn walk_value(data: &Value, parent: &str, depth: usize, ids: &mut FieldIds) -> Vec<FieldDescriptor> {
    let members: Vec<(String, &Value)> = match data {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => return Vec::new(),
    };

    let mut fields = Vec::new();
    for (key, value) in members {
        let name = child_name(parent, &key);
        let label = humanize(&key);

        if value.is_object() {
            if depth + 1 >= MAX_NESTING_DEPTH {
                warn!("skipping '{}': nested deeper than {} levels", name, MAX_NESTING_DEPTH);
                continue;
            }
            let id = ids.next();
            let children = walk_value(value, &name, depth + 1, ids);
            fields.push(FieldDescriptor {
                id,
                name,
                label,
                required: false,
                description: Some(format!("Nested object with {} field(s)", children.len())),
                kind: FieldKind::nested(children),
            });
        } else {
            fields.push(FieldDescriptor {
                id: ids.next(),
                name,
                label,
                required: true,
                description: None,
                kind: FieldKind::Scalar {
                    field_type: infer_field_type(&key, Some(value), None),
                    options: string_list(Some(value)),
                    default_value: value.as_str().map(str::to_string),
                    placeholder: None,
                },
            });
        }
    }
    fields
}

/// Build a reviewable template from a parsed JSON document.
pub fn parse_json_template(data: &Value, file_name: &str, default_category: &str) -> ParsedTemplate {
    let fields = infer_fields(data);
    let name = non_empty_str(data, "name")
        .or_else(|| non_empty_str(data, "title"))
        .map(str::to_string)
        .unwrap_or_else(|| capitalize(base_name(file_name)));
    let category = non_empty_str(data, "category")
        .unwrap_or(default_category)
        .to_string();
    let content = non_empty_str(data, "template")
        .or_else(|| non_empty_str(data, "content"))
        .map(str::to_string)
        .unwrap_or_else(|| serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string()));

    ParsedTemplate {
        name,
        category,
        is_parsed: !fields.is_empty(),
        fields,
        content,
        format: "json".to_string(),
        source_file_name: file_name.to_string(),
        markdown_content: None,
    }
}
