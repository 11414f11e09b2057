use super::{api_list, api_string, remote_list, remote_str, strings};
use crate::{
    EntityKind, FieldDef, FieldType, IndexSpec, KindAdapter, KindSchema, Properties,
    RemoteProperties,
};
use serde_json::Value;

const PARTNER: &str = "Partner";
const REMOTE_PARTNER: &str = "PARTNER";

/// Companies, identified by their primary domain.
#[derive(Debug, Clone)]
pub struct CompanyKind {
    schema: KindSchema,
    api_properties: Vec<String>,
    identifiers: Vec<String>,
}

impl CompanyKind {
    pub fn new() -> Self {
        Self {
            schema: KindSchema::new(
                EntityKind::Company,
                vec![
                    FieldDef::required("domain", FieldType::String),
                    FieldDef::optional("additionalDomains", FieldType::StringList),
                    FieldDef::optional("name", FieldType::String),
                    FieldDef::optional("type", FieldType::String),
                ],
            ),
            api_properties: strings(&["domain", "hs_additional_domains", "name", "type"]),
            identifiers: strings(&["domain"]),
        }
    }
}

impl Default for CompanyKind {
    fn default() -> Self {
        Self::new()
    }
}

impl KindAdapter for CompanyKind {
    fn kind(&self) -> EntityKind {
        EntityKind::Company
    }

    fn schema(&self) -> &KindSchema {
        &self.schema
    }

    fn api_properties(&self) -> &[String] {
        &self.api_properties
    }

    fn down_associations(&self) -> &[EntityKind] {
        &[EntityKind::Company, EntityKind::Contact]
    }

    fn up_associations(&self) -> &[EntityKind] {
        &[EntityKind::Company]
    }

    fn from_api(&self, props: &RemoteProperties) -> Option<Properties> {
        let company_type = match remote_str(props, "type") {
            REMOTE_PARTNER => Value::from(PARTNER),
            _ => Value::Null,
        };
        let mut data = Properties::new();
        data.insert("domain".into(), Value::from(remote_str(props, "domain")));
        data.insert(
            "additionalDomains".into(),
            remote_list(props, "hs_additional_domains"),
        );
        data.insert("name".into(), Value::from(remote_str(props, "name")));
        data.insert("type".into(), company_type);
        Some(data)
    }

    fn to_api(&self, property: &str, value: &Value) -> Option<(String, String)> {
        let pair = match property {
            "domain" => ("domain", api_string(value)),
            "additionalDomains" => ("hs_additional_domains", api_list(value)),
            "name" => ("name", api_string(value)),
            "type" => {
                let remote = if value.as_str() == Some(PARTNER) {
                    REMOTE_PARTNER
                } else {
                    ""
                };
                ("type", remote.to_string())
            }
            _ => return None,
        };
        Some((pair.0.to_string(), pair.1))
    }

    fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    fn indexes(&self) -> Vec<IndexSpec> {
        vec![IndexSpec::new(
            "domain",
            &["domain", "additionalDomains"],
            |e| {
                let mut keys = vec![e.get_str("domain").to_string()];
                if let Some(aliases) = e.get("additionalDomains").and_then(Value::as_array) {
                    keys.extend(aliases.iter().filter_map(Value::as_str).map(String::from));
                }
                keys
            },
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_api_maps_partner_and_domains() {
        let props: RemoteProperties = [
            ("domain", Some("acme.com")),
            ("hs_additional_domains", Some("acme.org;acme.net")),
            ("name", Some("Acme")),
            ("type", Some("PARTNER")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.map(String::from)))
        .collect();

        let data = CompanyKind::new().from_api(&props).unwrap();
        assert_eq!(data["domain"], json!("acme.com"));
        assert_eq!(data["additionalDomains"], json!(["acme.org", "acme.net"]));
        assert_eq!(data["type"], json!("Partner"));
    }

    #[test]
    fn from_api_defaults_missing_values() {
        let data = CompanyKind::new().from_api(&RemoteProperties::new()).unwrap();
        assert_eq!(data["domain"], json!(""));
        assert_eq!(data["additionalDomains"], json!([]));
        assert_eq!(data["type"], Value::Null);
        assert!(CompanyKind::new().schema().validate_properties(&data).is_ok());
    }

    #[test]
    fn to_api_maps_type() {
        let kind = CompanyKind::new();
        assert_eq!(
            kind.to_api("type", &json!("Partner")),
            Some(("type".into(), "PARTNER".into()))
        );
        assert_eq!(
            kind.to_api("type", &Value::Null),
            Some(("type".into(), "".into()))
        );
        assert_eq!(
            kind.to_api("additionalDomains", &json!(["a.com", "b.com"])),
            Some(("hs_additional_domains".into(), "a.com;b.com".into()))
        );
        assert_eq!(kind.to_api("unknown", &json!("x")), None);
    }
}
