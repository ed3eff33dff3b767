//! Parameter validation against capability schemas.
//!
//! Pure checks, no I/O. A call that fails validation is never dispatched.

use serde_json::{Map, Value};
use thiserror::Error;

use super::entities::{ParameterSchema, ToolCapability};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Missing required parameter '{parameter}' for '{capability}'")]
    MissingParameter {
        capability: String,
        parameter: String,
    },

    #[error("Unknown parameter '{parameter}' for '{capability}'")]
    UnknownParameter {
        capability: String,
        parameter: String,
    },

    #[error("Parameter '{parameter}' for '{capability}' must be {expected}")]
    WrongType {
        capability: String,
        parameter: String,
        expected: &'static str,
    },

    #[error("Unknown capability '{0}'")]
    UnknownCapability(String),
}

/// Validator for capability parameters
pub trait ParameterValidator {
    fn validate(
        &self,
        capability: &ToolCapability,
        parameters: &Map<String, Value>,
    ) -> Result<(), ValidationError>;
}

/// Checks required parameters, JSON types and, for strict schemas,
/// unknown parameters.
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator;

impl ParameterValidator for SchemaValidator {
    fn validate(
        &self,
        capability: &ToolCapability,
        parameters: &Map<String, Value>,
    ) -> Result<(), ValidationError> {
        validate_parameters(&capability.name, &capability.schema, parameters)
    }
}

pub fn validate_parameters(
    capability: &str,
    schema: &ParameterSchema,
    parameters: &Map<String, Value>,
) -> Result<(), ValidationError> {
    for spec in schema.required() {
        match parameters.get(&spec.name) {
            None | Some(Value::Null) => {
                return Err(ValidationError::MissingParameter {
                    capability: capability.to_string(),
                    parameter: spec.name.clone(),
                });
            }
            Some(_) => {}
        }
    }

    for (name, value) in parameters {
        match schema.get(name) {
            Some(spec) => {
                if !value.is_null() && !spec.kind.accepts(value) {
                    return Err(ValidationError::WrongType {
                        capability: capability.to_string(),
                        parameter: name.clone(),
                        expected: spec.kind.as_str(),
                    });
                }
            }
            None if !schema.allow_additional => {
                return Err(ValidationError::UnknownParameter {
                    capability: capability.to_string(),
                    parameter: name.clone(),
                });
            }
            None => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::entities::{ParameterKind, ParameterSpec};
    use serde_json::json;

    fn capability(strict: bool) -> ToolCapability {
        let mut schema = ParameterSchema::new()
            .with_parameter(ParameterSpec::new("target", ParameterKind::String, true))
            .with_parameter(ParameterSpec::new("timing", ParameterKind::Integer, false));
        if strict {
            schema = schema.strict();
        }
        ToolCapability::new("nmap", "port_scan", "").with_schema(schema)
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_missing_required() {
        let err = SchemaValidator
            .validate(&capability(false), &params(json!({"timing": 3})))
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingParameter { .. }));
        assert!(err.to_string().contains("Missing required parameter 'target'"));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = SchemaValidator
            .validate(&capability(false), &params(json!({"target": null})))
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingParameter { .. }));
    }

    #[test]
    fn test_wrong_type() {
        let err = SchemaValidator
            .validate(
                &capability(false),
                &params(json!({"target": "10.0.0.5", "timing": "fast"})),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::WrongType {
                capability: "port_scan".into(),
                parameter: "timing".into(),
                expected: "integer"
            }
        );
    }

    #[test]
    fn test_unknown_param_only_rejected_when_strict() {
        let call = params(json!({"target": "10.0.0.5", "verbose": true}));
        assert!(SchemaValidator.validate(&capability(false), &call).is_ok());
        let err = SchemaValidator
            .validate(&capability(true), &call)
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownParameter { .. }));
    }

    #[test]
    fn test_valid_call() {
        let call = params(json!({"target": "10.0.0.5", "timing": 4}));
        assert!(SchemaValidator.validate(&capability(true), &call).is_ok());
    }
}
