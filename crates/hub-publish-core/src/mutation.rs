//! The single `PublishBatch` GraphQL mutation.
//!
//! One document carries four root fields, so the registry applies every row
//! of a run in one database transaction or none of them. The only thing
//! that varies between environments is the conflict policy:
//!
//! | Root field | `FailOnConflict` (production) | `Upsert` (staging) |
//! |------------|-------------------------------|--------------------|
//! | `insert_hub_registry_connector` | no `on_conflict` | update `title` |
//! | `insert_connector_overview` | no `on_conflict` | update all overview columns |
//! | `update_connector_overview_many` | — | — |
//! | `insert_hub_registry_connector_version` | update image, url, multitenancy | same |

use serde::Serialize;
use serde_json::json;

use crate::models::Environment;
use crate::payload::PublishBatch;

pub const OPERATION_NAME: &str = "PublishBatch";

pub const CONNECTOR_CONSTRAINT: &str = "hub_registry_connector_namespace_name_key";
pub const OVERVIEW_CONSTRAINT: &str = "connector_overview_namespace_name_key";
pub const VERSION_CONSTRAINT: &str = "connector_version_namespace_name_version_key";

/// What a connector or overview insert does when the row already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    FailOnConflict,
    Upsert,
}

impl Environment {
    pub fn conflict_policy(&self) -> ConflictPolicy {
        match self {
            Environment::Production => ConflictPolicy::FailOnConflict,
            Environment::Staging => ConflictPolicy::Upsert,
        }
    }
}

/// A GraphQL request body, serialized as `{query, variables, operationName}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMutation {
    pub operation_name: String,
    pub query: String,
    pub variables: serde_json::Value,
}

fn on_conflict(constraint: &str, columns: &[&str]) -> String {
    format!(
        ", on_conflict: {{constraint: {}, update_columns: [{}]}}",
        constraint,
        columns.join(", ")
    )
}

pub fn build_publish_mutation(batch: &PublishBatch, policy: ConflictPolicy) -> PublishMutation {
    let (connector_conflict, overview_conflict) = match policy {
        ConflictPolicy::FailOnConflict => (String::new(), String::new()),
        ConflictPolicy::Upsert => (
            on_conflict(CONNECTOR_CONSTRAINT, &["title"]),
            on_conflict(
                OVERVIEW_CONSTRAINT,
                &[
                    "title",
                    "description",
                    "logo",
                    "docs",
                    "is_verified",
                    "is_hosted",
                ],
            ),
        ),
    };
    let version_conflict = on_conflict(
        VERSION_CONSTRAINT,
        &["image", "package_definition_url", "is_multitenant"],
    );

    let query = format!(
        r#"mutation {op}(
  $connectorInserts: [hub_registry_connector_insert_input!]!,
  $overviewInserts: [connector_overview_insert_input!]!,
  $overviewUpdates: [connector_overview_updates!]!,
  $versionInserts: [hub_registry_connector_version_insert_input!]!
) {{
  insert_hub_registry_connector(objects: $connectorInserts{connector_conflict}) {{
    affected_rows
  }}
  insert_connector_overview(objects: $overviewInserts{overview_conflict}) {{
    affected_rows
  }}
  update_connector_overview_many(updates: $overviewUpdates) {{
    affected_rows
  }}
  insert_hub_registry_connector_version(objects: $versionInserts{version_conflict}) {{
    affected_rows
    returning {{
      id
    }}
  }}
}}"#,
        op = OPERATION_NAME,
    );

    PublishMutation {
        operation_name: OPERATION_NAME.to_string(),
        query,
        variables: json!({
            "connectorInserts": batch.connector_inserts,
            "overviewInserts": batch.overview_inserts,
            "overviewUpdates": batch.overview_updates,
            "versionInserts": batch.version_inserts,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectorIdentity, PackagingType};
    use crate::payload::{ConnectorOverviewUpdate, ConnectorVersionRecord};

    fn batch() -> PublishBatch {
        let id = ConnectorIdentity::new("acme", "db");
        PublishBatch {
            overview_updates: vec![ConnectorOverviewUpdate::docs(&id, "# db".into())],
            version_inserts: vec![ConnectorVersionRecord {
                namespace: "acme".into(),
                name: "db".into(),
                version: "v1.0.0".into(),
                image: Some("ghcr.io/acme/db:v1".into()),
                package_definition_url: "https://s/p.tgz".into(),
                is_multitenant: true,
                packaging_type: PackagingType::PrebuiltDockerImage,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn production_connector_inserts_fail_on_conflict() {
        let m = build_publish_mutation(&batch(), Environment::Production.conflict_policy());
        assert!(!m.query.contains(CONNECTOR_CONSTRAINT));
        assert!(!m.query.contains(OVERVIEW_CONSTRAINT));
        assert!(m.query.contains(VERSION_CONSTRAINT));
    }

    #[test]
    fn staging_upserts_connectors_and_versions() {
        let m = build_publish_mutation(&batch(), Environment::Staging.conflict_policy());
        assert!(m.query.contains(CONNECTOR_CONSTRAINT));
        assert!(m.query.contains(OVERVIEW_CONSTRAINT));
        assert!(m.query.contains(
            "on_conflict: {constraint: connector_version_namespace_name_version_key, update_columns: [image, package_definition_url, is_multitenant]}"
        ));
    }

    #[test]
    fn one_document_carries_all_four_root_fields() {
        let m = build_publish_mutation(&batch(), ConflictPolicy::Upsert);
        for field in [
            "insert_hub_registry_connector(",
            "insert_connector_overview(",
            "update_connector_overview_many(",
            "insert_hub_registry_connector_version(",
        ] {
            assert_eq!(m.query.matches(field).count(), 1, "{}", field);
        }
        assert_eq!(m.operation_name, "PublishBatch");
        assert_eq!(m.variables["versionInserts"][0]["version"], "v1.0.0");
        assert_eq!(m.variables["connectorInserts"], serde_json::json!([]));
    }

    #[test]
    fn request_body_uses_graphql_field_names() {
        let m = build_publish_mutation(&PublishBatch::default(), ConflictPolicy::Upsert);
        let body = serde_json::to_value(&m).unwrap();
        assert_eq!(body["operationName"], "PublishBatch");
        assert!(body.get("query").is_some());
        assert!(body.get("variables").is_some());
    }
}
