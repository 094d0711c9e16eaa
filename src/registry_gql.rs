//! Registry client over the hub's GraphQL endpoint.
//!
//! Every request carries the publishing role and the publication key as
//! headers. A response with a non-empty `errors` array is a failure even
//! when the HTTP status is 200.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use hub_publish_core::collab::{ConnectorInfo, Registry};
use hub_publish_core::models::ConnectorIdentity;
use hub_publish_core::mutation::PublishMutation;

use crate::config::{RegistryConfig, Secrets};

const CONNECTOR_INFO_QUERY: &str = r#"query GetConnectorInfo($name: String!, $namespace: String!) {
  hub_registry_connector(where: {_and: [{name: {_eq: $name}}, {namespace: {_eq: $namespace}}]}) {
    name
    multitenant_connector {
      id
    }
  }
}"#;

pub struct GraphqlRegistry {
    client: reqwest::blocking::Client,
    url: String,
    role: String,
    publication_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: &'a serde_json::Value,
    operation_name: &'a str,
}

#[derive(Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Deserialize)]
struct ConnectorInfoData {
    hub_registry_connector: Vec<ConnectorRow>,
}

#[derive(Deserialize)]
struct ConnectorRow {
    multitenant_connector: Option<serde_json::Value>,
}

impl GraphqlRegistry {
    pub fn new(config: &RegistryConfig, secrets: &Secrets, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build registry HTTP client")?;
        Ok(Self {
            client,
            url: config.graphql_url.clone(),
            role: config.role.clone(),
            publication_key: secrets.publication_key.clone(),
        })
    }

    fn execute<T: DeserializeOwned>(
        &self,
        operation_name: &str,
        query: &str,
        variables: &serde_json::Value,
    ) -> Result<Option<T>> {
        debug!("POST {} ({})", self.url, operation_name);
        let resp = self
            .client
            .post(&self.url)
            .header("x-hasura-role", &self.role)
            .header("x-connector-publication-key", &self.publication_key)
            .json(&GraphqlRequest {
                query,
                variables,
                operation_name,
            })
            .send()
            .with_context(|| format!("Failed to send {} to {}", operation_name, self.url))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            bail!("{} failed (HTTP {}): {}", operation_name, status, text);
        }

        let body: GraphqlResponse<T> = resp
            .json()
            .with_context(|| format!("Invalid response to {}", operation_name))?;
        check_errors(operation_name, &body.errors)?;
        Ok(body.data)
    }
}

fn check_errors(operation_name: &str, errors: &[GraphqlError]) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    let messages = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    bail!("{} returned errors: {}", operation_name, messages)
}

fn connector_info_from(data: ConnectorInfoData) -> Option<ConnectorInfo> {
    data.hub_registry_connector
        .into_iter()
        .next()
        .map(|row| ConnectorInfo {
            multitenant: row
                .multitenant_connector
                .map_or(false, |value| !value.is_null()),
        })
}

impl Registry for GraphqlRegistry {
    fn connector_info(&self, identity: &ConnectorIdentity) -> Result<Option<ConnectorInfo>> {
        let variables = json!({
            "name": identity.name,
            "namespace": identity.namespace,
        });
        let data: Option<ConnectorInfoData> =
            self.execute("GetConnectorInfo", CONNECTOR_INFO_QUERY, &variables)?;
        Ok(data.and_then(connector_info_from))
    }

    fn publish(&self, mutation: &PublishMutation) -> Result<()> {
        let _: Option<serde_json::Value> =
            self.execute(&mutation.operation_name, &mutation.query, &mutation.variables)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Option<ConnectorInfo> {
        let resp: GraphqlResponse<ConnectorInfoData> = serde_json::from_str(body).unwrap();
        resp.data.and_then(connector_info_from)
    }

    #[test]
    fn missing_connector_is_none() {
        assert_eq!(parse(r#"{"data": {"hub_registry_connector": []}}"#), None);
    }

    #[test]
    fn multitenancy_follows_linked_row() {
        assert_eq!(
            parse(
                r#"{"data": {"hub_registry_connector": [
                    {"name": "db", "multitenant_connector": {"id": "7f0c"}}
                ]}}"#
            ),
            Some(ConnectorInfo { multitenant: true })
        );
        assert_eq!(
            parse(
                r#"{"data": {"hub_registry_connector": [
                    {"name": "db", "multitenant_connector": null}
                ]}}"#
            ),
            Some(ConnectorInfo { multitenant: false })
        );
    }

    #[test]
    fn errors_array_fails_the_request() {
        let resp: GraphqlResponse<serde_json::Value> = serde_json::from_str(
            r#"{"errors": [{"message": "Uniqueness violation"}, {"message": "second"}]}"#,
        )
        .unwrap();
        let err = check_errors("PublishBatch", &resp.errors).unwrap_err();
        assert_eq!(
            err.to_string(),
            "PublishBatch returned errors: Uniqueness violation; second"
        );
    }
}
