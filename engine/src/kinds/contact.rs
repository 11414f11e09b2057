use super::{api_string, remote_opt, remote_str, strings};
use crate::{
    EntityKind, FieldDef, FieldType, IndexSpec, KindAdapter, KindSchema, Properties,
    RemoteProperties,
};
use serde_json::Value;

/// Installation-specific contact attribute names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactConfig {
    /// Remote attribute holding the deployment type. Unset means the
    /// `deployment` property is never synced.
    pub deployment_attr: Option<String>,
}

/// Local property name paired with its remote name.
const MAPPED: &[(&str, &str)] = &[
    ("email", "email"),
    ("firstName", "firstname"),
    ("lastName", "lastname"),
    ("phone", "phone"),
    ("city", "city"),
    ("state", "state"),
    ("country", "country"),
    ("region", "region"),
    ("contactType", "contact_type"),
];

/// Contacts, identified by email.
#[derive(Debug, Clone)]
pub struct ContactKind {
    config: ContactConfig,
    schema: KindSchema,
    api_properties: Vec<String>,
    identifiers: Vec<String>,
}

impl ContactKind {
    pub fn new(config: ContactConfig) -> Self {
        let mut fields = vec![FieldDef::required("email", FieldType::String)];
        fields.extend(
            MAPPED
                .iter()
                .skip(1)
                .map(|(local, _)| FieldDef::optional(*local, FieldType::String)),
        );
        fields.push(FieldDef::optional("deployment", FieldType::String));

        let mut api_properties: Vec<String> = MAPPED.iter().map(|(_, r)| r.to_string()).collect();
        api_properties.extend(config.deployment_attr.clone());

        Self {
            config,
            schema: KindSchema::new(EntityKind::Contact, fields),
            api_properties,
            identifiers: strings(&["email"]),
        }
    }
}

impl Default for ContactKind {
    fn default() -> Self {
        Self::new(ContactConfig::default())
    }
}

impl KindAdapter for ContactKind {
    fn kind(&self) -> EntityKind {
        EntityKind::Contact
    }

    fn schema(&self) -> &KindSchema {
        &self.schema
    }

    fn api_properties(&self) -> &[String] {
        &self.api_properties
    }

    fn down_associations(&self) -> &[EntityKind] {
        &[EntityKind::Company]
    }

    fn up_associations(&self) -> &[EntityKind] {
        &[EntityKind::Company]
    }

    fn from_api(&self, props: &RemoteProperties) -> Option<Properties> {
        let mut data = Properties::new();
        data.insert("email".into(), Value::from(remote_str(props, "email")));
        for (local, remote) in MAPPED.iter().skip(1) {
            data.insert(local.to_string(), remote_opt(props, remote));
        }
        let deployment = match &self.config.deployment_attr {
            Some(attr) => remote_opt(props, attr),
            None => Value::Null,
        };
        data.insert("deployment".into(), deployment);
        Some(data)
    }

    fn to_api(&self, property: &str, value: &Value) -> Option<(String, String)> {
        let remote = match property {
            "deployment" => self.config.deployment_attr.clone()?,
            _ => MAPPED
                .iter()
                .find(|(local, _)| *local == property)
                .map(|(_, remote)| remote.to_string())?,
        };
        Some((remote, api_string(value)))
    }

    fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    fn indexes(&self) -> Vec<IndexSpec> {
        vec![IndexSpec::by_property("email")]
    }
}
