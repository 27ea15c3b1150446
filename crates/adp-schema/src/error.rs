//! Error taxonomy for schema loading and document parsing.
//!
//! Schema *violations* are not errors here: they are reported as
//! [`ValidationIssue`](crate::ValidationIssue) values.

/// Errors produced while loading schemas or decoding ADP documents.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("failed to parse embedded schema {name}: {source}")]
    SchemaParse {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to compile schema {name}: {message}")]
    Compile { name: &'static str, message: String },

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_names_schema() {
        let err = SchemaError::Compile {
            name: "runtime.schema.json",
            message: "bad keyword".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("runtime.schema.json"));
        assert!(msg.contains("bad keyword"));
    }

    #[test]
    fn test_yaml_error_display() {
        let yaml_err = serde_yaml::from_str::<serde_json::Value>("a: [unclosed").unwrap_err();
        let err = SchemaError::from(yaml_err);
        assert!(err.to_string().starts_with("yaml error"));
    }
}
