use std::path::Path;

use crate::config::schema::StudioConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<StudioConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<StudioConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: StudioConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let errors: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: errors.join("; "),
        });
    }

    Ok(())
}

/// Checks the schema cannot express.
fn validate_config(config: &StudioConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let endpoint = config.transform_endpoint.trim();
    if endpoint.is_empty() {
        return Err(ConfigError::Validation {
            message: "transform_endpoint must not be empty".to_string(),
        });
    }
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(ConfigError::Validation {
            message: format!(
                "transform_endpoint must be an http(s) URL, got '{}'",
                endpoint
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlobBackend;

    #[test]
    fn test_load_valid_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "data_directory": "/data/studio",
            "transform_endpoint": "https://studio.example.com/api/transform",
            "initial_credits": 12,
            "blob_backend": "filesystem"
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.data_directory, std::path::PathBuf::from("/data/studio"));
        assert_eq!(config.initial_credits, 12);
        assert_eq!(config.blob_backend, BlobBackend::Filesystem);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.request_timeout_secs, 120);
    }

    #[test]
    fn test_defaults_applied() {
        let config_json = r#"
        {
            "version": "1.0",
            "transform_endpoint": "http://localhost:3000/api/transform"
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.initial_credits, 5);
        assert_eq!(config.blob_backend, BlobBackend::Sqlite);
    }

    #[test]
    fn test_invalid_version() {
        let config_json = r#"
        {
            "version": "2.0",
            "transform_endpoint": "http://localhost:3000/api/transform"
        }
        "#;

        let result = load_config_from_str(config_json);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_endpoint() {
        for endpoint in ["   ", "ftp://example.com/transform"] {
            let config_json = format!(
                r#"{{"version": "1.0", "transform_endpoint": "{}"}}"#,
                endpoint
            );
            let result = load_config_from_str(&config_json);
            assert!(
                matches!(result, Err(ConfigError::Validation { .. })),
                "endpoint {:?} should be rejected",
                endpoint
            );
        }
    }

    #[test]
    fn test_zero_request_timeout() {
        let config_json = r#"
        {
            "version": "1.0",
            "transform_endpoint": "http://localhost/api/transform",
            "request_timeout_secs": 0
        }
        "#;
        assert!(matches!(
            load_config_from_str(config_json),
            Err(ConfigError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_unknown_backend_fails_schema() {
        let config_json = r#"
        {
            "version": "1.0",
            "transform_endpoint": "http://localhost/api/transform",
            "blob_backend": "s3"
        }
        "#;
        assert!(matches!(
            load_config_from_str(config_json),
            Err(ConfigError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_embedded_schema_compiles() {
        let schema: serde_json::Value = serde_json::from_str(SCHEMA_JSON).unwrap();
        assert!(jsonschema::validator_for(&schema).is_ok());
    }

    #[test]
    fn test_schema_rejects_shape_errors() {
        let cases = [
            r#"{"version": "1.0", "transform_endpoint": ""}"#,
            r#"{"version": "1.0"}"#,
            r#"{"version": "1.0", "transform_endpoint": "http://x/api", "initial_credits": "five"}"#,
            r#"{"version": "1.0", "transform_endpoint": "http://x/api", "initial_credits": -1}"#,
            r#"{"version": "1.0", "transform_endpoint": "http://x/api", "credits": 3}"#,
        ];
        for config_json in cases {
            let result = load_config_from_str(config_json);
            assert!(
                matches!(result, Err(ConfigError::SchemaValidation { .. })),
                "{} should fail schema validation, got {:?}",
                config_json,
                result
            );
        }
    }

    #[test]
    fn test_schema_errors_are_joined() {
        let config_json = r#"{"version": 1, "transform_endpoint": 2}"#;
        match load_config_from_str(config_json) {
            Err(ConfigError::SchemaValidation { errors }) => {
                assert_eq!(errors.split("; ").count(), 2);
            }
            other => panic!("Expected SchemaValidation, got {:?}", other),
        }
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/definitely/not/here/studioshot.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studioshot.json");
        let config = crate::config::StudioConfig::with_data_directory(dir.path());
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
