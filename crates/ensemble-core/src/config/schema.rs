//! JSON Schema validation for run configuration files.
//!
//! Runs are validated against `schema/run-config.schema.json` before they
//! are deserialized, so structural mistakes report every offending path at
//! once instead of failing on the first serde error.

use std::sync::OnceLock;

/// Embedded run-config schema (loaded at compile time).
const RUN_CONFIG_SCHEMA_JSON: &str = include_str!("../../schema/run-config.schema.json");

/// Compiled validator, built on first use.
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, String> {
    COMPILED_SCHEMA
        .get_or_init(|| {
            let schema_value: serde_json::Value = serde_json::from_str(RUN_CONFIG_SCHEMA_JSON)
                .map_err(|e| format!("Invalid schema JSON: {}", e))?;

            jsonschema::options()
                .build(&schema_value)
                .map_err(|e| format!("Failed to compile schema: {}", e))
        })
        .as_ref()
        .map_err(Clone::clone)
}

/// Validate a run configuration document.
///
/// Returns every violation as `"<message> at <instance path>"`.
pub fn validate_run_config(value: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e])?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_compiles() {
        assert!(get_validator().is_ok());
    }

    #[test]
    fn test_minimal_config_passes() {
        let value = json!({
            "format": { "name": "thomas-et-al" },
            "models": [{ "model_id": "m1", "provider": "ollama" }]
        });
        assert!(validate_run_config(&value).is_ok());
    }

    #[test]
    fn test_missing_models_fails() {
        let value = json!({ "format": { "name": "thomas-et-al" } });
        let errors = validate_run_config(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("models")));
    }

    #[test]
    fn test_unknown_field_fails() {
        let value = json!({
            "format": { "name": "thomas-et-al" },
            "models": [{ "model_id": "m1", "provider": "ollama", "temprature": 0.3 }]
        });
        assert!(validate_run_config(&value).is_err());
    }

    #[test]
    fn test_non_positive_weight_fails() {
        let value = json!({
            "format": { "name": "thomas-et-al" },
            "models": [{ "model_id": "m1", "provider": "ollama", "weight": 0 }]
        });
        let errors = validate_run_config(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("/models/0/weight")));
    }

    #[test]
    fn test_duration_pattern() {
        let ok = json!({
            "format": { "name": "x" },
            "deadline": "1m 30s",
            "models": [{ "model_id": "m1", "provider": "p", "timeout": "250ms" }]
        });
        assert!(validate_run_config(&ok).is_ok());

        let bad = json!({
            "format": { "name": "x" },
            "models": [{ "model_id": "m1", "provider": "p", "timeout": "soon" }]
        });
        assert!(validate_run_config(&bad).is_err());
    }
}
