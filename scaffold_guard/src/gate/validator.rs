use regex::Regex;
use serde_json::{Map, Value, json};
use std::sync::OnceLock;

use super::issue::{InputIssue, ValidationErrorType, ValidationFailure};

/// The shape-validator seam the gate runs over raw inputs.
///
/// Implementations return the normalized value the rest of the program acts
/// on, or every problem they found.
pub trait InputValidator: Send + Sync {
    fn validate(&self, raw: &Map<String, Value>) -> Result<Value, ValidationFailure>;
}

impl<F> InputValidator for F
where
    F: Fn(&Map<String, Value>) -> Result<Value, ValidationFailure> + Send + Sync,
{
    fn validate(&self, raw: &Map<String, Value>) -> Result<Value, ValidationFailure> {
        self(raw)
    }
}

pub const SUPPORTED_IDES: &[&str] = &["vscode", "cursor", "windsurf", "kiro"];
pub const AUTHORING_MODES: &[&str] = &["wysiwyg", "composable"];

const KNOWN_FIELDS: &[&str] = &[
    "projectDirectory",
    "template",
    "ide",
    "options",
    "placeholders",
    "authoringMode",
];

const MAX_PROJECT_NAME_LEN: usize = 214;
const MAX_TEMPLATE_LEN: usize = 1024;

const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

fn project_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("project name regex must compile")
    })
}

fn option_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9_-]*(=[a-z0-9][a-z0-9_+-]*)?$")
            .expect("option token regex must compile")
    })
}

fn placeholder_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("placeholder name regex must compile")
    })
}

/// Validator for the scaffold command's inputs.
///
/// Normalizes to:
/// `{projectDirectory, template, ide, options: [..], placeholders: {..}, authoringMode}`.
#[derive(Debug, Clone, Default)]
pub struct ScaffoldInputValidator;

impl ScaffoldInputValidator {
    pub fn new() -> Self {
        Self
    }
}

impl InputValidator for ScaffoldInputValidator {
    fn validate(&self, raw: &Map<String, Value>) -> Result<Value, ValidationFailure> {
        let mut issues = Vec::new();

        for key in raw.keys() {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                issues.push(
                    InputIssue::new(
                        ValidationErrorType::UnknownField,
                        key.clone(),
                        format!("Unknown field '{key}'"),
                    )
                    .with_suggestion(format!("Known fields: {}", KNOWN_FIELDS.join(", "))),
                );
            }
        }

        let project_directory = validate_project_directory(raw.get("projectDirectory"), &mut issues);
        let template = validate_template(raw.get("template"), &mut issues);
        let ide = validate_choice(raw.get("ide"), "ide", SUPPORTED_IDES, &mut issues);
        let authoring_mode = validate_choice(
            raw.get("authoringMode"),
            "authoringMode",
            AUTHORING_MODES,
            &mut issues,
        )
        .unwrap_or_else(|| AUTHORING_MODES[0].to_string());
        let options = validate_options(raw.get("options"), &mut issues);
        let placeholders = validate_placeholders(raw.get("placeholders"), &mut issues);

        if !issues.is_empty() {
            return Err(ValidationFailure::new(issues));
        }

        Ok(json!({
            "projectDirectory": project_directory,
            "template": template,
            "ide": ide,
            "options": options,
            "placeholders": placeholders,
            "authoringMode": authoring_mode,
        }))
    }
}

fn require_string<'a>(
    value: Option<&'a Value>,
    field: &str,
    issues: &mut Vec<InputIssue>,
) -> Option<&'a str> {
    match value {
        None | Some(Value::Null) => {
            issues.push(InputIssue::new(
                ValidationErrorType::MissingRequiredField,
                field,
                format!("'{field}' is required"),
            ));
            None
        }
        Some(Value::String(s)) => Some(s.as_str()),
        Some(other) => {
            issues.push(InputIssue::new(
                ValidationErrorType::InvalidType,
                field,
                format!("expected a string, got {}", type_name(other)),
            ));
            None
        }
    }
}

fn validate_project_directory(value: Option<&Value>, issues: &mut Vec<InputIssue>) -> Option<String> {
    let field = "projectDirectory";
    let name = require_string(value, field, issues)?.trim();

    let problem = if name.is_empty() {
        Some((ValidationErrorType::MissingRequiredField, "must not be empty".to_string()))
    } else if name.len() > MAX_PROJECT_NAME_LEN {
        Some((
            ValidationErrorType::ConstraintViolation,
            format!("must be at most {MAX_PROJECT_NAME_LEN} characters"),
        ))
    } else if name.contains('\0') {
        Some((ValidationErrorType::InvalidFormat, "must not contain NUL bytes".to_string()))
    } else if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        Some((
            ValidationErrorType::InvalidFormat,
            "must be a single directory name, not a path".to_string(),
        ))
    } else if !project_name_regex().is_match(name) {
        Some((
            ValidationErrorType::InvalidFormat,
            "may only contain letters, digits, '.', '_' and '-', and must start with a letter or digit"
                .to_string(),
        ))
    } else if RESERVED_NAMES.contains(&name.to_ascii_lowercase().as_str()) {
        Some((
            ValidationErrorType::InvalidValue,
            format!("'{name}' is a reserved name on some platforms"),
        ))
    } else {
        None
    };

    match problem {
        Some((error_type, message)) => {
            issues.push(InputIssue::new(error_type, field, message));
            None
        }
        None => Some(name.to_string()),
    }
}

fn validate_template(value: Option<&Value>, issues: &mut Vec<InputIssue>) -> Option<String> {
    let field = "template";
    let template = require_string(value, field, issues)?.trim();

    if template.is_empty() {
        issues.push(InputIssue::new(
            ValidationErrorType::MissingRequiredField,
            field,
            "must not be empty",
        ));
        return None;
    }
    if template.len() > MAX_TEMPLATE_LEN {
        issues.push(InputIssue::new(
            ValidationErrorType::ConstraintViolation,
            field,
            format!("must be at most {MAX_TEMPLATE_LEN} characters"),
        ));
        return None;
    }
    if template.contains('\0') {
        issues.push(InputIssue::new(
            ValidationErrorType::InvalidFormat,
            field,
            "must not contain NUL bytes",
        ));
        return None;
    }
    if template.split(['/', '\\']).any(|segment| segment == "..") {
        issues.push(
            InputIssue::new(
                ValidationErrorType::InvalidFormat,
                field,
                "must not contain '..' path segments",
            )
            .with_suggestion("Reference the template directory directly"),
        );
        return None;
    }
    Some(template.to_string())
}

fn validate_choice(
    value: Option<&Value>,
    field: &str,
    allowed: &[&str],
    issues: &mut Vec<InputIssue>,
) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let normalized = s.trim().to_ascii_lowercase();
            if allowed.contains(&normalized.as_str()) {
                Some(normalized)
            } else {
                issues.push(
                    InputIssue::new(
                        ValidationErrorType::InvalidValue,
                        field,
                        format!("'{s}' is not supported"),
                    )
                    .with_suggestion(format!("Use one of: {}", allowed.join(", "))),
                );
                None
            }
        }
        Some(other) => {
            issues.push(InputIssue::new(
                ValidationErrorType::InvalidType,
                field,
                format!("expected a string, got {}", type_name(other)),
            ));
            None
        }
    }
}

fn validate_options(value: Option<&Value>, issues: &mut Vec<InputIssue>) -> Vec<String> {
    let field = "options";
    let tokens: Vec<String> = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::String(s)) => s.split(',').map(|t| t.trim().to_string()).collect(),
        Some(Value::Array(items)) => {
            let mut tokens = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::String(s) => tokens.push(s.trim().to_string()),
                    other => issues.push(InputIssue::new(
                        ValidationErrorType::InvalidType,
                        format!("{field}[{i}]"),
                        format!("expected a string, got {}", type_name(other)),
                    )),
                }
            }
            tokens
        }
        Some(other) => {
            issues.push(InputIssue::new(
                ValidationErrorType::InvalidType,
                field,
                format!("expected a comma-separated string or an array, got {}", type_name(other)),
            ));
            return Vec::new();
        }
    };

    let mut normalized = Vec::new();
    for token in tokens.into_iter().filter(|t| !t.is_empty()) {
        if !option_token_regex().is_match(&token) {
            issues.push(
                InputIssue::new(
                    ValidationErrorType::InvalidFormat,
                    field,
                    format!("invalid option '{token}'"),
                )
                .with_suggestion("Options look like 'typescript' or 'styling=tailwind'"),
            );
            continue;
        }
        if !normalized.contains(&token) {
            normalized.push(token);
        }
    }
    normalized
}

fn validate_placeholders(value: Option<&Value>, issues: &mut Vec<InputIssue>) -> Map<String, Value> {
    let field = "placeholders";
    let map = match value {
        None | Some(Value::Null) => return Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            issues.push(InputIssue::new(
                ValidationErrorType::InvalidType,
                field,
                format!("expected an object, got {}", type_name(other)),
            ));
            return Map::new();
        }
    };

    let mut normalized = Map::new();
    for (name, value) in map {
        let path = format!("{field}.{name}");
        if !placeholder_name_regex().is_match(name) {
            issues.push(
                InputIssue::new(
                    ValidationErrorType::InvalidFormat,
                    path,
                    "placeholder names are UPPER_SNAKE_CASE",
                )
                .with_suggestion(name.to_ascii_uppercase().replace('-', "_")),
            );
            continue;
        }
        match value {
            Value::String(s) if s.contains('\0') => issues.push(InputIssue::new(
                ValidationErrorType::InvalidFormat,
                path,
                "must not contain NUL bytes",
            )),
            Value::String(s) => {
                normalized.insert(name.clone(), Value::String(s.clone()));
            }
            other => issues.push(InputIssue::new(
                ValidationErrorType::InvalidType,
                path,
                format!("expected a string, got {}", type_name(other)),
            )),
        }
    }
    normalized
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
