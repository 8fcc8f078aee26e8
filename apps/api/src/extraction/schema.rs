//! Explicit resume schema used to validate and coerce model output.
//!
//! Models return loosely shaped JSON: snake_case keys, synonyms, numbers where
//! strings belong, comma-separated lists, nested skill groups. `validate`
//! walks the output against the field table below, maps aliases to canonical
//! names, coerces values to the expected shape and reports every field it had
//! to drop. Only `contact.name` is required.

use serde_json::{Map, Value};

use crate::errors::PipelineError;
use crate::models::resume::ResumeRecord;

#[derive(Debug, Clone, Copy)]
pub enum FieldType {
    Text,
    OptionalText,
    TextList,
    Object(&'static [FieldSpec]),
    ObjectList(&'static [FieldSpec]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub field_type: FieldType,
    pub required: bool,
}

const fn field(
    name: &'static str,
    aliases: &'static [&'static str],
    field_type: FieldType,
) -> FieldSpec {
    FieldSpec {
        name,
        aliases,
        field_type,
        required: false,
    }
}

pub const CONTACT_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "name",
        aliases: &["full_name", "fullName", "candidate_name"],
        field_type: FieldType::Text,
        required: true,
    },
    field("email", &["email_address", "mail"], FieldType::Text),
    field("phone", &["phone_number", "mobile", "telephone"], FieldType::Text),
    field("address", &["location", "city"], FieldType::OptionalText),
];

pub const EDUCATION_FIELDS: &[FieldSpec] = &[
    field(
        "institution",
        &["school", "university", "college", "raw_text"],
        FieldType::Text,
    ),
    field("degree", &["qualification"], FieldType::Text),
    field("field", &["major", "field_of_study", "fieldOfStudy"], FieldType::OptionalText),
    field(
        "graduationDate",
        &["graduation_date", "graduation_year", "year", "end_date"],
        FieldType::OptionalText,
    ),
    field("gpa", &["grade", "cgpa"], FieldType::OptionalText),
];

pub const EXPERIENCE_FIELDS: &[FieldSpec] = &[
    field("company", &["employer", "organization", "organisation"], FieldType::Text),
    field("title", &["position", "role", "job_title", "jobTitle"], FieldType::Text),
    field("startDate", &["start_date", "start", "from"], FieldType::Text),
    field("endDate", &["end_date", "end", "to"], FieldType::OptionalText),
    field(
        "description",
        &["summary", "responsibilities", "achievements", "raw_text"],
        FieldType::Text,
    ),
];

pub const PROJECT_FIELDS: &[FieldSpec] = &[
    field("name", &["title", "project_name"], FieldType::Text),
    field("description", &["summary"], FieldType::Text),
    field(
        "technologies",
        &["tech_stack", "techStack", "stack", "tools"],
        FieldType::TextList,
    ),
];

pub const RESUME_FIELDS: &[FieldSpec] = &[
    field(
        "contact",
        &["personal_info", "personalInfo", "contact_info", "contactInfo"],
        FieldType::Object(CONTACT_FIELDS),
    ),
    field("education", &[], FieldType::ObjectList(EDUCATION_FIELDS)),
    field(
        "experience",
        &["work_experience", "workExperience", "employment"],
        FieldType::ObjectList(EXPERIENCE_FIELDS),
    ),
    field("skills", &["technical_skills", "technicalSkills"], FieldType::TextList),
    field("projects", &[], FieldType::ObjectList(PROJECT_FIELDS)),
    field("certifications", &["certificates"], FieldType::TextList),
];

/// Result of validating one model response.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub record: ResumeRecord,
    /// Paths of input fields that were unknown or had an unusable type.
    pub dropped_fields: Vec<String>,
    /// Paths of required fields that ended up empty.
    pub missing_required: Vec<String>,
}

impl Validated {
    pub fn is_complete(&self) -> bool {
        self.missing_required.is_empty()
    }
}

#[derive(Default)]
struct Report {
    dropped: Vec<String>,
    missing: Vec<String>,
}

pub fn validate(value: &Map<String, Value>) -> Result<Validated, PipelineError> {
    let mut input = value.clone();
    hoist_contact_fields(&mut input);

    let mut report = Report::default();
    let cleaned = coerce_object(&input, RESUME_FIELDS, "", &mut report);
    let record: ResumeRecord = serde_json::from_value(Value::Object(cleaned))
        .map_err(|e| PipelineError::SchemaValidationFailed(e.to_string()))?;

    Ok(Validated {
        record,
        dropped_fields: report.dropped,
        missing_required: report.missing,
    })
}

/// Moves flat `name`/`email`/`phone`/`address` keys into `contact` when the
/// model skipped the nesting.
fn hoist_contact_fields(input: &mut Map<String, Value>) {
    let has_contact = RESUME_FIELDS[0]
        .aliases
        .iter()
        .chain(std::iter::once(&"contact"))
        .any(|key| input.get(*key).is_some_and(Value::is_object));
    if has_contact {
        return;
    }

    let mut contact = Map::new();
    for spec in CONTACT_FIELDS {
        for key in std::iter::once(&spec.name).chain(spec.aliases.iter()) {
            if let Some(value) = input.remove(*key) {
                contact.entry(spec.name).or_insert(value);
            }
        }
    }
    if !contact.is_empty() {
        input.insert("contact".to_string(), Value::Object(contact));
    }
}

fn coerce_object(
    input: &Map<String, Value>,
    fields: &[FieldSpec],
    path: &str,
    report: &mut Report,
) -> Map<String, Value> {
    let mut out = Map::new();
    let mut consumed: Vec<&str> = Vec::new();

    for spec in fields {
        let field_path = join(path, spec.name);
        let found = std::iter::once(&spec.name)
            .chain(spec.aliases.iter())
            .find_map(|key| input.get(*key).filter(|v| !v.is_null()).map(|v| (*key, v)));
        for key in std::iter::once(&spec.name).chain(spec.aliases.iter()) {
            if input.contains_key(*key) {
                consumed.push(*key);
            }
        }

        let coerced = match (found, spec.field_type) {
            (Some((_, value)), field_type) => coerce_value(value, field_type, &field_path, report),
            // An absent object still has its required fields checked
            (None, FieldType::Object(nested)) => {
                Value::Object(coerce_object(&Map::new(), nested, &field_path, report))
            }
            (None, field_type) => default_for(field_type),
        };

        if spec.required && is_empty_value(&coerced) {
            report.missing.push(field_path);
        }
        out.insert(spec.name.to_string(), coerced);
    }

    for key in input.keys() {
        if !consumed.contains(&key.as_str()) {
            report.dropped.push(join(path, key));
        }
    }
    out
}

fn coerce_value(value: &Value, field_type: FieldType, path: &str, report: &mut Report) -> Value {
    match field_type {
        FieldType::Text => match as_text(value) {
            Some(text) => Value::String(text),
            None => {
                report.dropped.push(path.to_string());
                Value::String(String::new())
            }
        },
        FieldType::OptionalText => match as_text(value) {
            Some(text) if !text.is_empty() => Value::String(text),
            Some(_) => Value::Null,
            None => {
                report.dropped.push(path.to_string());
                Value::Null
            }
        },
        FieldType::TextList => Value::Array(
            as_text_list(value, path, report)
                .into_iter()
                .map(Value::String)
                .collect(),
        ),
        FieldType::Object(fields) => match value {
            Value::Object(map) => Value::Object(coerce_object(map, fields, path, report)),
            _ => {
                report.dropped.push(path.to_string());
                Value::Object(coerce_object(&Map::new(), fields, path, report))
            }
        },
        FieldType::ObjectList(fields) => {
            let items: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                Value::Object(_) => vec![value],
                _ => {
                    report.dropped.push(path.to_string());
                    Vec::new()
                }
            };
            let mut out = Vec::new();
            for (i, item) in items.into_iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                let map = match item {
                    Value::Object(map) => map.clone(),
                    // A bare string becomes the item's first field
                    Value::String(s) if !s.trim().is_empty() => {
                        let mut map = Map::new();
                        map.insert(fields[0].name.to_string(), Value::String(s.clone()));
                        map
                    }
                    _ => {
                        report.dropped.push(item_path);
                        continue;
                    }
                };
                let coerced = coerce_object(&map, fields, &item_path, report);
                if coerced.values().any(|v| !is_empty_value(v)) {
                    out.push(Value::Object(coerced));
                }
            }
            Value::Array(out)
        }
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect();
            (!parts.is_empty() || items.is_empty()).then(|| parts.join("; "))
        }
        Value::Object(_) => None,
    }
}

fn as_text_list(value: &Value, path: &str, report: &mut Report) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    match value {
        Value::String(s) => out.extend(split_list(s)),
        Value::Number(n) => out.push(n.to_string()),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
                    Value::String(_) => {}
                    Value::Number(n) => out.push(n.to_string()),
                    Value::Object(map) => match map.get("name").and_then(Value::as_str) {
                        Some(name) if !name.trim().is_empty() => out.push(name.trim().to_string()),
                        _ => report.dropped.push(format!("{path}[{i}]")),
                    },
                    _ => report.dropped.push(format!("{path}[{i}]")),
                }
            }
        }
        // Grouped lists such as {"languages": [...], "tools": [...]}
        Value::Object(groups) => {
            for (group, items) in groups {
                out.extend(as_text_list(items, &join(path, group), report));
            }
        }
        Value::Null => {}
        Value::Bool(_) => report.dropped.push(path.to_string()),
    }

    let mut seen = std::collections::HashSet::new();
    out.retain(|item| seen.insert(item.to_lowercase()));
    out
}

fn split_list(s: &str) -> Vec<String> {
    s.split([',', ';', '\n'])
        .map(|part| part.trim().trim_start_matches(['-', '•', '*']).trim())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_for(field_type: FieldType) -> Value {
    match field_type {
        FieldType::Text => Value::String(String::new()),
        FieldType::OptionalText => Value::Null,
        FieldType::TextList | FieldType::ObjectList(_) => Value::Array(Vec::new()),
        FieldType::Object(_) => Value::Object(Map::new()),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.values().all(is_empty_value),
        _ => false,
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(value: Value) -> Validated {
        match value {
            Value::Object(map) => validate(&map).unwrap(),
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_canonical_output_passes_through() {
        let validated = run(json!({
            "contact": {"name": "Jane Doe", "email": "jane@x.com", "phone": "555-123-4567", "address": null},
            "education": [{"institution": "MIT", "degree": "BSc", "field": "CS", "graduationDate": "2018", "gpa": null}],
            "experience": [{"company": "Acme", "title": "Engineer", "startDate": "2019", "endDate": null, "description": "Built things"}],
            "skills": ["Rust", "Python"],
            "projects": [],
            "certifications": ["CKA"]
        }));
        assert!(validated.is_complete());
        assert!(validated.dropped_fields.is_empty(), "{:?}", validated.dropped_fields);
        assert_eq!(validated.record.contact.name, "Jane Doe");
        assert_eq!(validated.record.education[0].graduation_date.as_deref(), Some("2018"));
        assert_eq!(validated.record.experience[0].end_date, None);
    }

    #[test]
    fn test_aliases_and_snake_case_are_mapped() {
        let validated = run(json!({
            "personal_info": {"full_name": "Jane Doe", "phone_number": 5551234567u64, "location": "Berlin"},
            "work_experience": [{"employer": "Acme", "position": "SRE", "start_date": "2020", "responsibilities": ["on-call", "terraform"]}],
            "education": [{"school": "TU Berlin", "degree": "MSc", "graduation_year": 2019}]
        }));
        let record = validated.record;
        assert_eq!(record.contact.name, "Jane Doe");
        assert_eq!(record.contact.phone, "5551234567");
        assert_eq!(record.contact.address.as_deref(), Some("Berlin"));
        assert_eq!(record.experience[0].title, "SRE");
        assert_eq!(record.experience[0].description, "on-call; terraform");
        assert_eq!(record.education[0].graduation_date.as_deref(), Some("2019"));
    }

    #[test]
    fn test_flat_contact_fields_are_hoisted() {
        let validated = run(json!({"name": "Jane Doe", "email": "jane@x.com", "skills": "Rust, Go; SQL"}));
        assert_eq!(validated.record.contact.name, "Jane Doe");
        assert_eq!(validated.record.contact.email, "jane@x.com");
        assert_eq!(validated.record.skills, vec!["Rust", "Go", "SQL"]);
    }

    #[test]
    fn test_missing_name_is_reported() {
        let validated = run(json!({"contact": {"email": "jane@x.com"}, "skills": ["Rust"]}));
        assert_eq!(validated.missing_required, vec!["contact.name"]);
        assert!(!validated.is_complete());
        assert_eq!(validated.record.skills, vec!["Rust"]);
    }

    #[test]
    fn test_unknown_fields_are_dropped_and_reported() {
        let validated = run(json!({
            "contact": {"name": "Jane", "linkedin": "in/jane"},
            "ai_provider": "ollama",
            "skills": [{"name": "Rust"}, {"level": 3}, true]
        }));
        assert!(validated.dropped_fields.contains(&"contact.linkedin".to_string()));
        assert!(validated.dropped_fields.contains(&"ai_provider".to_string()));
        assert!(validated.dropped_fields.contains(&"skills[1]".to_string()));
        assert!(validated.dropped_fields.contains(&"skills[2]".to_string()));
        assert_eq!(validated.record.skills, vec!["Rust"]);
    }

    #[test]
    fn test_grouped_skills_are_flattened_and_deduplicated() {
        let validated = run(json!({
            "contact": {"name": "Jane"},
            "skills": {"languages": ["Python", "Rust"], "tools": ["Docker", "python"]}
        }));
        assert_eq!(validated.record.skills, vec!["Python", "Rust", "Docker"]);
    }

    #[test]
    fn test_bare_string_list_items_fill_first_field() {
        let validated = run(json!({
            "contact": {"name": "Jane"},
            "education": ["B.Sc. Computer Science, University of Toronto", "", 42]
        }));
        assert_eq!(validated.record.education.len(), 1);
        assert_eq!(
            validated.record.education[0].institution,
            "B.Sc. Computer Science, University of Toronto"
        );
        assert!(validated.dropped_fields.contains(&"education[2]".to_string()));
    }

    #[test]
    fn test_wrong_type_for_object_is_dropped() {
        let validated = run(json!({"contact": "Jane Doe"}));
        assert!(validated.dropped_fields.contains(&"contact".to_string()));
        assert_eq!(validated.missing_required, vec!["contact.name"]);
    }

    #[test]
    fn test_absent_contact_reports_missing_name() {
        let validated = run(json!({"skills": ["Go"]}));
        assert_eq!(validated.missing_required, vec!["contact.name"]);
        assert!(!validated.is_complete());
        assert_eq!(validated.record.contact.name, "");
        assert_eq!(validated.record.skills, vec!["Go"]);
    }
}
