//! Per-kind property schema and validation.
//!
//! Each entity kind has a fixed property shape. Locally constructed entities
//! and property writes are validated against it before they can reach a sync.

use crate::{error::Result, EntityKind, Error, Properties};
use serde::{Deserialize, Serialize};

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Array of strings
    StringList,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::StringList => write!(f, "StringList"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a property of an entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Local property name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field must be present and non-null
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<()> {
        match value {
            None if self.required => Err(Error::MissingRequiredField(self.name.clone())),
            None => Ok(()),
            Some(serde_json::Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| v.is_string())),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// Property schema of one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSchema {
    pub kind: EntityKind,
    pub fields: Vec<FieldDef>,
}

impl KindSchema {
    pub fn new(kind: EntityKind, fields: Vec<FieldDef>) -> Self {
        Self { kind, fields }
    }

    /// Get a field definition by property name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a complete property set, as given to a local create.
    pub fn validate_properties(&self, properties: &Properties) -> Result<()> {
        for name in properties.keys() {
            if self.field(name).is_none() {
                return Err(Error::UnknownProperty {
                    kind: self.kind,
                    property: name.clone(),
                });
            }
        }

        for field in &self.fields {
            field.validate(properties.get(&field.name))?;
        }

        Ok(())
    }

    /// Validate a single property write.
    pub fn validate_property(&self, name: &str, value: &serde_json::Value) -> Result<()> {
        let field = self.field(name).ok_or_else(|| Error::UnknownProperty {
            kind: self.kind,
            property: name.to_string(),
        })?;
        field.validate(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties;
    use serde_json::json;

    fn company_schema() -> KindSchema {
        KindSchema::new(
            EntityKind::Company,
            vec![
                FieldDef::required("domain", FieldType::String),
                FieldDef::optional("additionalDomains", FieldType::StringList),
                FieldDef::optional("employees", FieldType::Int),
                FieldDef::optional("type", FieldType::String),
            ],
        )
    }

    #[test]
    fn validate_required_field() {
        let field = FieldDef::required("domain", FieldType::String);

        assert!(field.validate(Some(&json!("acme.com"))).is_ok());
        assert!(matches!(
            field.validate(None),
            Err(Error::MissingRequiredField(_))
        ));
        assert!(matches!(
            field.validate(Some(&json!(null))),
            Err(Error::MissingRequiredField(_))
        ));
    }

    #[test]
    fn validate_optional_field() {
        let field = FieldDef::optional("type", FieldType::String);

        assert!(field.validate(None).is_ok());
        assert!(field.validate(Some(&json!(null))).is_ok());
        assert!(field.validate(Some(&json!("Partner"))).is_ok());
    }

    #[test]
    fn validate_types() {
        let list = FieldDef::optional("tags", FieldType::StringList);
        assert!(list.validate(Some(&json!(["a", "b"]))).is_ok());
        assert!(list.validate(Some(&json!([]))).is_ok());
        assert!(matches!(
            list.validate(Some(&json!(["a", 1]))),
            Err(Error::TypeMismatch { .. })
        ));

        let float = FieldDef::optional("amount", FieldType::Float);
        assert!(float.validate(Some(&json!(1.5))).is_ok());
        assert!(float.validate(Some(&json!(3))).is_ok());

        let int = FieldDef::optional("count", FieldType::Int);
        assert!(matches!(
            int.validate(Some(&json!("three"))),
            Err(Error::TypeMismatch { .. })
        ));

        let json_field = FieldDef::optional("raw", FieldType::Json);
        assert!(json_field.validate(Some(&json!({"nested": true}))).is_ok());
    }

    #[test]
    fn validate_properties() {
        let schema = company_schema();

        assert!(schema
            .validate_properties(&properties(json!({"domain": "acme.com"})))
            .is_ok());

        assert!(matches!(
            schema.validate_properties(&properties(json!({"name": "Acme"}))),
            Err(Error::UnknownProperty { .. })
        ));

        assert!(matches!(
            schema.validate_properties(&properties(json!({"employees": 4}))),
            Err(Error::MissingRequiredField(_))
        ));
    }

    #[test]
    fn validate_single_property() {
        let schema = company_schema();

        assert!(schema.validate_property("type", &json!(null)).is_ok());
        assert!(matches!(
            schema.validate_property("employees", &json!("many")),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            schema.validate_property("nope", &json!(1)),
            Err(Error::UnknownProperty { .. })
        ));
    }
}
