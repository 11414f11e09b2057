use super::{api_string, remote_opt, remote_str};
use crate::{
    EntityKind, FieldDef, FieldType, IndexSpec, KindAdapter, KindSchema, Properties,
    RemoteProperties,
};
use serde_json::Value;

/// Deal stages with a fixed meaning. Locally a deal holds the stage name;
/// remotely it holds the installation's stage id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealStage {
    Eval,
    ClosedWon,
    ClosedLost,
}

impl DealStage {
    pub const ALL: [DealStage; 3] = [Self::Eval, Self::ClosedWon, Self::ClosedLost];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eval => "eval",
            Self::ClosedWon => "closedWon",
            Self::ClosedLost => "closedLost",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == name)
    }
}

/// Pipeline, stage and attribute names of one CRM installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealConfig {
    /// Only deals in this pipeline are downloaded.
    pub pipeline: String,
    pub eval_stage: String,
    pub closed_won_stage: String,
    pub closed_lost_stage: String,
    pub addon_license_id_attr: String,
    pub transaction_id_attr: String,
    pub app_attr: Option<String>,
    pub deployment_attr: Option<String>,
}

impl DealConfig {
    pub fn new(
        pipeline: impl Into<String>,
        eval_stage: impl Into<String>,
        closed_won_stage: impl Into<String>,
        closed_lost_stage: impl Into<String>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            eval_stage: eval_stage.into(),
            closed_won_stage: closed_won_stage.into(),
            closed_lost_stage: closed_lost_stage.into(),
            addon_license_id_attr: "addonlicenseid".into(),
            transaction_id_attr: "transactionid".into(),
            app_attr: None,
            deployment_attr: None,
        }
    }

    /// Remote id of `stage` in this installation.
    pub fn stage_id(&self, stage: DealStage) -> &str {
        match stage {
            DealStage::Eval => &self.eval_stage,
            DealStage::ClosedWon => &self.closed_won_stage,
            DealStage::ClosedLost => &self.closed_lost_stage,
        }
    }

    pub fn stage_of(&self, id: &str) -> Option<DealStage> {
        DealStage::ALL
            .into_iter()
            .find(|stage| self.stage_id(*stage) == id)
    }
}

/// Deals of one pipeline, identified by license id and transaction id.
#[derive(Debug, Clone)]
pub struct DealKind {
    config: DealConfig,
    schema: KindSchema,
    api_properties: Vec<String>,
    identifiers: Vec<String>,
}

impl DealKind {
    pub fn new(config: DealConfig) -> Self {
        let schema = KindSchema::new(
            EntityKind::Deal,
            vec![
                FieldDef::required("dealName", FieldType::String),
                FieldDef::required("dealStage", FieldType::String),
                FieldDef::required("pipeline", FieldType::String),
                FieldDef::optional("amount", FieldType::Float),
                FieldDef::optional("closeDate", FieldType::String),
                FieldDef::optional("addonLicenseId", FieldType::String),
                FieldDef::optional("transactionId", FieldType::String),
                FieldDef::optional("app", FieldType::String),
                FieldDef::optional("deployment", FieldType::String),
            ],
        );

        let mut api_properties =
            super::strings(&["dealname", "dealstage", "pipeline", "amount", "closedate"]);
        api_properties.push(config.addon_license_id_attr.clone());
        api_properties.push(config.transaction_id_attr.clone());
        api_properties.extend(config.app_attr.clone());
        api_properties.extend(config.deployment_attr.clone());

        Self {
            config,
            schema,
            api_properties,
            identifiers: vec!["addonLicenseId".into(), "transactionId".into()],
        }
    }

    pub fn config(&self) -> &DealConfig {
        &self.config
    }

    fn remote_name(&self, property: &str) -> Option<String> {
        let name: &str = match property {
            "dealName" => "dealname",
            "dealStage" => "dealstage",
            "pipeline" => "pipeline",
            "amount" => "amount",
            "closeDate" => "closedate",
            "addonLicenseId" => &self.config.addon_license_id_attr,
            "transactionId" => &self.config.transaction_id_attr,
            "app" => self.config.app_attr.as_deref()?,
            "deployment" => self.config.deployment_attr.as_deref()?,
            _ => return None,
        };
        Some(name.to_string())
    }
}

impl KindAdapter for DealKind {
    fn kind(&self) -> EntityKind {
        EntityKind::Deal
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
        &[EntityKind::Company, EntityKind::Contact]
    }

    fn from_api(&self, props: &RemoteProperties) -> Option<Properties> {
        if remote_str(props, "pipeline") != self.config.pipeline {
            return None;
        }

        let amount = remote_str(props, "amount")
            .parse::<f64>()
            .ok()
            .map_or(Value::Null, Value::from);
        let optional_attr = |attr: &Option<String>| match attr {
            Some(attr) => remote_opt(props, attr),
            None => Value::Null,
        };

        let mut data = Properties::new();
        data.insert("dealName".into(), Value::from(remote_str(props, "dealname")));
        // Stages without a fixed meaning keep their remote id.
        let raw_stage = remote_str(props, "dealstage");
        let stage = match self.config.stage_of(raw_stage) {
            Some(stage) => stage.as_str(),
            None => raw_stage,
        };
        data.insert("dealStage".into(), Value::from(stage));
        data.insert("pipeline".into(), Value::from(remote_str(props, "pipeline")));
        data.insert("amount".into(), amount);
        data.insert("closeDate".into(), remote_opt(props, "closedate"));
        data.insert(
            "addonLicenseId".into(),
            remote_opt(props, &self.config.addon_license_id_attr),
        );
        data.insert(
            "transactionId".into(),
            remote_opt(props, &self.config.transaction_id_attr),
        );
        data.insert("app".into(), optional_attr(&self.config.app_attr));
        data.insert("deployment".into(), optional_attr(&self.config.deployment_attr));
        Some(data)
    }

    fn to_api(&self, property: &str, value: &Value) -> Option<(String, String)> {
        let name = self.remote_name(property)?;
        let stage = match property {
            "dealStage" => value.as_str().and_then(DealStage::parse),
            _ => None,
        };
        let value = match stage {
            Some(stage) => self.config.stage_id(stage).to_string(),
            None => api_string(value),
        };
        Some((name, value))
    }

    fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    fn indexes(&self) -> Vec<IndexSpec> {
        vec![
            IndexSpec::by_property("addonLicenseId"),
            IndexSpec::by_property("transactionId"),
        ]
    }
}
