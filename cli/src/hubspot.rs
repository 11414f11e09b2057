//! Live HubSpot CRM transport.
//!
//! Uses the CRM v3 object and association batch APIs.

use async_trait::async_trait;
use hubsync_engine::error::TransportResult;
use hubsync_engine::{
    Association, Downloader, EntityKind, EntityUpdate, ExistingEntity, FullEntity, NewEntity,
    Progress, RelativeAssociation, RemoteProperties, TransportError, Uploader,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Page size for object listing.
const PAGE_LIMIT: &str = "100";

#[derive(Debug, Deserialize)]
struct ObjectPage {
    results: Vec<ApiObject>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    after: String,
}

#[derive(Debug, Deserialize)]
struct ApiObject {
    id: String,
    #[serde(default)]
    properties: RemoteProperties,
    #[serde(default)]
    associations: BTreeMap<String, AssociationPage>,
}

#[derive(Debug, Deserialize)]
struct AssociationPage {
    results: Vec<AssociationItem>,
}

#[derive(Debug, Deserialize)]
struct AssociationItem {
    id: String,
    #[serde(rename = "type")]
    association_type: String,
}

#[derive(Debug, Serialize)]
struct BatchInput<T> {
    inputs: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct BatchOutput {
    results: Vec<ExistingEntity>,
}

#[derive(Debug, Serialize)]
struct ObjectId {
    id: String,
}

#[derive(Debug, Serialize)]
struct AssociationInput {
    from: ObjectId,
    to: ObjectId,
    #[serde(rename = "type")]
    association_type: String,
}

/// HubSpot API client implementing both transport seams.
#[derive(Debug, Clone)]
pub struct HubSpotClient {
    client: Client,
    base: String,
    token: String,
}

impl HubSpotClient {
    pub fn new(
        base: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: base.into(),
            token: token.into(),
        })
    }

    fn objects_url(&self, kind: EntityKind) -> String {
        format!("{}/crm/v3/objects/{}", self.base, kind.plural())
    }

    fn associations_url(&self, from: EntityKind, to: EntityKind, action: &str) -> String {
        format!(
            "{}/crm/v3/associations/{}/{}/batch/{}",
            self.base, from, to, action
        )
    }

    /// Send `request` and return the body of a successful response.
    async fn send(&self, kind: EntityKind, request: RequestBuilder) -> TransportResult<String> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| TransportError::Request(format!("{kind} request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(format!("{kind} response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(upstream_error(kind, status, &body));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        request: RequestBuilder,
    ) -> TransportResult<T> {
        let body = self.send(kind, request).await?;
        serde_json::from_str(&body).map_err(|e| TransportError::MalformedPayload {
            message: format!("unexpected {kind} response: {e}"),
            attachment: body,
        })
    }

    async fn batch_objects<T: Serialize>(
        &self,
        kind: EntityKind,
        action: &str,
        inputs: Vec<T>,
    ) -> TransportResult<Vec<ExistingEntity>> {
        let url = format!("{}/batch/{}", self.objects_url(kind), action);
        let request = self.client.post(url).json(&BatchInput { inputs });
        let output: BatchOutput = self.send_json(kind, request).await?;
        Ok(output.results)
    }

    async fn batch_associations(
        &self,
        from: EntityKind,
        to: EntityKind,
        action: &str,
        inputs: Vec<Association>,
    ) -> TransportResult<()> {
        if inputs.is_empty() {
            return Ok(());
        }
        let inputs = inputs
            .into_iter()
            .map(|input| AssociationInput {
                from: ObjectId { id: input.from_id },
                to: ObjectId { id: input.to_id },
                association_type: association_type(from, input.to_kind),
            })
            .collect();
        let request = self
            .client
            .post(self.associations_url(from, to, action))
            .json(&BatchInput { inputs });
        self.send(from, request).await?;
        Ok(())
    }
}

/// Association type name for links from `from` to `to`.
pub fn association_type(from: EntityKind, to: EntityKind) -> String {
    format!("{from}_to_{to}")
}

/// Whether `body` is one of the remote service's internal error responses.
fn is_internal_error(body: &str) -> bool {
    if body == "internal error" || body.starts_with("<!DOCTYPE html>") {
        return true;
    }
    serde_json::from_str::<Value>(body)
        .map(|v| v["status"] == "error" && v["message"] == "internal error")
        .unwrap_or(false)
}

fn upstream_error(kind: EntityKind, status: StatusCode, body: &str) -> TransportError {
    if is_internal_error(body) {
        return TransportError::UpstreamInternal {
            service: kind.to_string(),
        };
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    TransportError::Request(format!("{kind} request returned {status}: {message}"))
}

/// Turn a listed object into a [`FullEntity`], flattening its association
/// groups into `"kind:id"` descriptors.
fn normalize(kind: EntityKind, object: ApiObject) -> TransportResult<FullEntity> {
    let prefix = format!("{kind}_to_");
    let mut associations = Vec::new();

    for item in object.associations.values().flat_map(|page| &page.results) {
        let other = item
            .association_type
            .strip_prefix(&prefix)
            .and_then(|name| EntityKind::ALL.into_iter().find(|k| k.as_str() == name))
            .ok_or_else(|| TransportError::MalformedPayload {
                message: format!(
                    "unexpected association type {:?} on {kind} {}",
                    item.association_type, object.id
                ),
                attachment: item.association_type.clone(),
            })?;
        associations.push(RelativeAssociation::new(other, item.id.clone()));
    }

    Ok(FullEntity {
        id: object.id,
        properties: object.properties,
        associations,
    })
}

#[async_trait]
impl Downloader for HubSpotClient {
    async fn download_entities(
        &self,
        progress: &dyn Progress,
        kind: EntityKind,
        api_properties: &[String],
        associations: &[EntityKind],
    ) -> TransportResult<Vec<FullEntity>> {
        let mut query: Vec<(&str, String)> = vec![
            ("limit", PAGE_LIMIT.to_string()),
            ("properties", api_properties.join(",")),
        ];
        if !associations.is_empty() {
            let names: Vec<&str> = associations.iter().map(EntityKind::as_str).collect();
            query.push(("associations", names.join(",")));
        }

        let mut entities = Vec::new();
        let mut after: Option<String> = None;
        let mut page_number = 0usize;

        loop {
            let mut request = self.client.get(self.objects_url(kind)).query(&query);
            if let Some(after) = &after {
                request = request.query(&[("after", after)]);
            }

            let page: ObjectPage = self.send_json(kind, request).await?;
            page_number += 1;
            debug!(%kind, page = page_number, records = page.results.len(), "downloaded page");

            for object in page.results {
                entities.push(normalize(kind, object)?);
            }
            progress.tick(&format!("page {page_number}"));

            after = page.paging.and_then(|p| p.next).map(|next| next.after);
            if after.is_none() {
                break;
            }
        }

        progress.set_count(entities.len());
        Ok(entities)
    }
}

#[async_trait]
impl Uploader for HubSpotClient {
    async fn create_entities(
        &self,
        kind: EntityKind,
        entities: Vec<NewEntity>,
    ) -> TransportResult<Vec<ExistingEntity>> {
        self.batch_objects(kind, "create", entities).await
    }

    async fn update_entities(
        &self,
        kind: EntityKind,
        entities: Vec<EntityUpdate>,
    ) -> TransportResult<Vec<ExistingEntity>> {
        self.batch_objects(kind, "update", entities).await
    }

    async fn create_associations(
        &self,
        from: EntityKind,
        to: EntityKind,
        inputs: Vec<Association>,
    ) -> TransportResult<()> {
        self.batch_associations(from, to, "create", inputs).await
    }

    async fn delete_associations(
        &self,
        from: EntityKind,
        to: EntityKind,
        inputs: Vec<Association>,
    ) -> TransportResult<()> {
        self.batch_associations(from, to, "archive", inputs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_engine::NoProgress;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HubSpotClient {
        HubSpotClient::new(server.uri(), "pat-test", Duration::from_secs(5)).unwrap()
    }

    fn props(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // ── Download ────────────────────────────────────────────────

    #[tokio::test]
    async fn download_follows_paging_and_normalizes_associations() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/crm/v3/objects/contacts"))
            .and(query_param("after", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"id": "2", "properties": {"email": "al@globex.com"}}
                ]
            })))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/crm/v3/objects/contacts"))
            .and(query_param("properties", "email,firstname"))
            .and(query_param("associations", "company"))
            .and(header("authorization", "Bearer pat-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "id": "1",
                    "properties": {"email": "jo@acme.com", "firstname": null},
                    "associations": {
                        "companies": {"results": [
                            {"id": "7", "type": "contact_to_company"}
                        ]}
                    }
                }],
                "paging": {"next": {"after": "2"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let entities = client(&server)
            .download_entities(
                &NoProgress,
                EntityKind::Contact,
                &props(&["email", "firstname"]),
                &[EntityKind::Company],
            )
            .await
            .unwrap();

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id, "1");
        assert_eq!(entities[0].properties["firstname"], None);
        assert_eq!(
            entities[0].associations,
            vec![RelativeAssociation::new(EntityKind::Company, "7")]
        );
        assert!(entities[1].associations.is_empty());
    }

    #[tokio::test]
    async fn foreign_association_type_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crm/v3/objects/deals"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "id": "5",
                    "properties": {},
                    "associations": {
                        "contacts": {"results": [
                            {"id": "77", "type": "contact_to_deal"}
                        ]}
                    }
                }]
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .download_entities(&NoProgress, EntityKind::Deal, &[], &[EntityKind::Contact])
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::MalformedPayload { .. }));
    }

    #[tokio::test]
    async fn internal_error_bodies_map_to_upstream_internal() {
        for body in [
            "internal error".to_string(),
            "<!DOCTYPE html><html>oops</html>".to_string(),
            json!({"status": "error", "message": "internal error"}).to_string(),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/crm/v3/objects/companies"))
                .respond_with(ResponseTemplate::new(502).set_body_string(body))
                .mount(&server)
                .await;

            let err = client(&server)
                .download_entities(&NoProgress, EntityKind::Company, &[], &[])
                .await
                .unwrap_err();

            assert_eq!(
                err,
                TransportError::UpstreamInternal {
                    service: "company".into()
                }
            );
        }
    }

    #[tokio::test]
    async fn other_failures_carry_the_remote_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crm/v3/objects/companies"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "status": "error",
                "message": "You have reached your secondly limit."
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .download_entities(&NoProgress, EntityKind::Company, &[], &[])
            .await
            .unwrap_err();

        match err {
            TransportError::Request(message) => {
                assert!(message.contains("429"));
                assert!(message.contains("secondly limit"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_success_is_malformed_with_body_attached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/crm/v3/objects/companies"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server)
            .download_entities(&NoProgress, EntityKind::Company, &[], &[])
            .await
            .unwrap_err();

        assert_eq!(err.attachment(), Some("not json"));
    }

    // ── Upload ──────────────────────────────────────────────────

    #[tokio::test]
    async fn create_posts_batch_inputs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/companies/batch/create"))
            .and(body_json(json!({
                "inputs": [{"properties": {"domain": "acme.com"}}]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status": "COMPLETE",
                "results": [{
                    "id": "555",
                    "properties": {"domain": "acme.com", "hs_object_id": "555"},
                    "createdAt": "2021-01-01T00:00:00Z"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server)
            .create_entities(
                EntityKind::Company,
                vec![NewEntity {
                    properties: [("domain".to_string(), "acme.com".to_string())].into(),
                }],
            )
            .await
            .unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].id, "555");
        assert_eq!(created[0].property("domain"), "acme.com");
    }

    #[tokio::test]
    async fn update_posts_ids_and_properties() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/deals/batch/update"))
            .and(body_json(json!({
                "inputs": [{"id": "5", "properties": {"amount": "100"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "5", "properties": {"amount": "100"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let updated = client(&server)
            .update_entities(
                EntityKind::Deal,
                vec![EntityUpdate {
                    id: "5".into(),
                    properties: [("amount".to_string(), "100".to_string())].into(),
                }],
            )
            .await
            .unwrap();

        assert_eq!(updated[0].property("amount"), "100");
    }

    #[tokio::test]
    async fn associations_use_typed_batch_endpoints() {
        let server = MockServer::start().await;
        let expected = json!({
            "inputs": [{"from": {"id": "77"}, "to": {"id": "7"}, "type": "contact_to_company"}]
        });
        Mock::given(method("POST"))
            .and(path("/crm/v3/associations/contact/company/batch/create"))
            .and(body_json(expected.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/associations/contact/company/batch/archive"))
            .and(body_json(expected))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let hubspot = client(&server);
        let input = || {
            vec![Association {
                from_id: "77".into(),
                to_id: "7".into(),
                to_kind: EntityKind::Company,
            }]
        };

        hubspot
            .create_associations(EntityKind::Contact, EntityKind::Company, input())
            .await
            .unwrap();
        hubspot
            .delete_associations(EntityKind::Contact, EntityKind::Company, input())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_association_batch_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        client(&server)
            .create_associations(EntityKind::Deal, EntityKind::Company, vec![])
            .await
            .unwrap();
    }

    #[test]
    fn association_type_names() {
        assert_eq!(
            association_type(EntityKind::Deal, EntityKind::Contact),
            "deal_to_contact"
        );
        assert!(is_internal_error("internal error"));
        assert!(!is_internal_error(r#"{"status":"error","message":"not found"}"#));
    }
}
