use regex::Regex;
use serde_json::Value;
use thiserror::Error;

const DNS_SUBDOMAIN_REGEX: &str =
    r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$";
const DNS_LABEL_REGEX: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";

const MAX_SUBDOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum NameError {
    #[error("name must not be empty")]
    Empty,

    #[error("name {0:?} must be no more than {1} characters")]
    TooLong(String, usize),

    #[error(
        "name {0:?} must consist of lowercase alphanumeric characters, '-' or '.', and must start \
         and end with an alphanumeric character"
    )]
    InvalidSubdomain(String),

    #[error(
        "name {0:?} must consist of lowercase alphanumeric characters or '-', and must start and \
         end with an alphanumeric character"
    )]
    InvalidLabel(String),
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid parameter schema: {0}")]
    Schema(String),

    #[error("parameters do not match the template's schema: {}", .0.join("; "))]
    Mismatch(Vec<String>),
}

/// Validates parameter values against a template's declared schema.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, schema: &Value, value: &Value) -> Result<(), SchemaError>;
}

/// Validates with JSON Schema semantics. OpenAPI v3 extension keywords are ignored.
#[derive(Copy, Clone, Debug, Default)]
pub struct JsonSchemaValidator;

/// Validates a name used as a resource name (an RFC 1123 subdomain).
pub fn validate_resource_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > MAX_SUBDOMAIN_LEN {
        return Err(NameError::TooLong(name.to_string(), MAX_SUBDOMAIN_LEN));
    }
    let regex = Regex::new(DNS_SUBDOMAIN_REGEX).expect("should_compile");
    if !regex.is_match(name) {
        return Err(NameError::InvalidSubdomain(name.to_string()));
    }
    Ok(())
}

/// Validates a name that must be an RFC 1123 label, such as a namespace or a rule name.
pub fn validate_label(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > MAX_LABEL_LEN {
        return Err(NameError::TooLong(name.to_string(), MAX_LABEL_LEN));
    }
    let regex = Regex::new(DNS_LABEL_REGEX).expect("should_compile");
    if !regex.is_match(name) {
        return Err(NameError::InvalidLabel(name.to_string()));
    }
    Ok(())
}

// === impl JsonSchemaValidator ===

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, schema: &Value, value: &Value) -> Result<(), SchemaError> {
        let validator =
            jsonschema::validator_for(schema).map_err(|e| SchemaError::Schema(e.to_string()))?;
        let errors = validator
            .iter_errors(value)
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect::<Vec<_>>();
        if errors.is_empty() {
            return Ok(());
        }
        Err(SchemaError::Mismatch(errors))
    }
}
