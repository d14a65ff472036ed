use serde::Serialize;
use std::fmt;

/// Category of a single input problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorType {
    /// A required field is missing or empty
    MissingRequiredField,
    /// A field has an invalid type
    InvalidType,
    /// A field has an invalid format
    InvalidFormat,
    /// An unknown field is present
    UnknownField,
    /// A field value is not one of the accepted values
    InvalidValue,
    /// Constraint violation (e.g., length limits)
    ConstraintViolation,
}

impl fmt::Display for ValidationErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationErrorType::MissingRequiredField => write!(f, "Missing required field"),
            ValidationErrorType::InvalidType => write!(f, "Invalid type"),
            ValidationErrorType::InvalidFormat => write!(f, "Invalid format"),
            ValidationErrorType::UnknownField => write!(f, "Unknown field"),
            ValidationErrorType::InvalidValue => write!(f, "Invalid value"),
            ValidationErrorType::ConstraintViolation => write!(f, "Constraint violation"),
        }
    }
}

/// One problem found in the raw inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputIssue {
    pub error_type: ValidationErrorType,
    /// Path to the offending field, e.g. `placeholders.PROJECT_NAME`
    pub field_path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl InputIssue {
    pub fn new(
        error_type: ValidationErrorType,
        field_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_type,
            field_path: field_path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for InputIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} - {}",
            self.error_type, self.field_path, self.message
        )?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

/// The full list of problems from one validation pass. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationFailure {
    pub issues: Vec<InputIssue>,
}

impl ValidationFailure {
    pub fn new(issues: Vec<InputIssue>) -> Self {
        Self { issues }
    }

    pub fn single(issue: InputIssue) -> Self {
        Self {
            issues: vec![issue],
        }
    }

    /// One issue naming every missing field, so the caller sees all of them at once.
    pub fn missing_fields(fields: &[String]) -> Self {
        let issues = fields
            .iter()
            .map(|field| {
                InputIssue::new(
                    ValidationErrorType::MissingRequiredField,
                    field.clone(),
                    format!("'{field}' is required"),
                )
            })
            .collect();
        Self { issues }
    }

    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.issues.as_slice() {
            [] => write!(f, "validation failed"),
            [only] => write!(f, "{only}"),
            many => {
                write!(f, "{} problems: ", many.len())?;
                let joined = many
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                f.write_str(&joined)
            }
        }
    }
}

impl std::error::Error for ValidationFailure {}
