//! Common utilities shared between tool and prompt handlers

use schemars::{JsonSchema, generate::SchemaSettings};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::model::{ErrorData, JsonObject};

/// A shortcut for generating a JSON schema for a type.
///
/// Falls back to an open object schema if the generated schema is not a
/// JSON object, which only happens for types that are not structs or maps.
pub fn schema_for_type<T: JsonSchema>() -> JsonObject {
    let generator = SchemaSettings::draft2020_12().into_generator();
    let schema = generator.into_root_schema_for::<T>();
    match serde_json::to_value(schema) {
        Ok(Value::Object(object)) => object,
        Ok(other) => {
            tracing::warn!(schema = %other, "schema is not an object, using an open object schema");
            open_object_schema()
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize schema, using an open object schema");
            open_object_schema()
        }
    }
}

fn open_object_schema() -> JsonObject {
    let mut object = JsonObject::new();
    object.insert("type".into(), Value::String("object".into()));
    object
}

/// Deserialize request arguments, treating absent arguments as `{}`.
pub fn parse_arguments<T: DeserializeOwned>(
    arguments: Option<&JsonObject>,
) -> Result<T, ErrorData> {
    let value = Value::Object(arguments.cloned().unwrap_or_default());
    serde_json::from_value(value).map_err(|e| {
        ErrorData::invalid_params(format!("failed to deserialize parameters: {e}"), None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
    #[allow(dead_code)]
    struct ListDirectory {
        /// Directory to list
        path: String,
        #[serde(default)]
        all: bool,
    }

    #[test]
    fn test_schema_for_struct() {
        let schema = schema_for_type::<ListDirectory>();
        assert_eq!(schema.get("type"), Some(&Value::String("object".into())));
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("path"));
        assert!(properties.contains_key("all"));
        assert_eq!(schema["required"], serde_json::json!(["path"]));
    }

    #[test]
    fn test_parse_missing_arguments() {
        #[derive(serde::Deserialize, Debug, PartialEq, Default)]
        struct Optional {
            #[serde(default)]
            verbose: bool,
        }
        let parsed: Optional = parse_arguments(None).unwrap();
        assert_eq!(parsed, Optional::default());

        let err = parse_arguments::<ListDirectory>(None).unwrap_err();
        assert_eq!(err.code, crate::model::ErrorCode::INVALID_PARAMS);
    }
}
