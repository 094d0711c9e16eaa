//! Row shapes sent to the registry database.
//!
//! Field names are the registry's column names. Optional fields that are
//! unset are omitted from the serialized JSON, so an update only touches the
//! columns it names.

use serde::{Deserialize, Serialize};

use crate::models::{ConnectorIdentity, PackagingType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubRegistryConnectorInsertInput {
    pub name: String,
    pub title: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverviewAuthor {
    pub name: String,
    pub support_email: String,
    pub website: String,
}

/// Nested-insert wrapper: `{"data": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorInsert {
    pub data: OverviewAuthor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorOverviewInsert {
    pub namespace: String,
    pub name: String,
    pub title: String,
    pub description: String,
    pub logo: String,
    pub docs: String,
    pub is_verified: bool,
    pub is_hosted: bool,
    pub author: AuthorInsert,
}

/// Columns an overview update may set. `None` means "leave untouched".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverviewSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OverviewSet {
    pub fn is_empty(&self) -> bool {
        self.docs.is_none()
            && self.logo.is_none()
            && self.latest_version.is_none()
            && self.title.is_none()
            && self.description.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringEq {
    #[serde(rename = "_eq")]
    pub eq: String,
}

/// One conjunct of the `where` clause: `{"name": {"_eq": ..}}` or
/// `{"namespace": {"_eq": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityFilter {
    Name(StringEq),
    Namespace(StringEq),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverviewWhere {
    #[serde(rename = "_and")]
    pub and: Vec<IdentityFilter>,
}

impl OverviewWhere {
    pub fn identity(identity: &ConnectorIdentity) -> Self {
        Self {
            and: vec![
                IdentityFilter::Name(StringEq {
                    eq: identity.name.clone(),
                }),
                IdentityFilter::Namespace(StringEq {
                    eq: identity.namespace.clone(),
                }),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorOverviewUpdate {
    #[serde(rename = "_set")]
    pub set: OverviewSet,
    #[serde(rename = "where")]
    pub filter: OverviewWhere,
}

impl ConnectorOverviewUpdate {
    pub fn new(identity: &ConnectorIdentity, set: OverviewSet) -> Self {
        Self {
            set,
            filter: OverviewWhere::identity(identity),
        }
    }

    pub fn docs(identity: &ConnectorIdentity, docs: String) -> Self {
        Self::new(
            identity,
            OverviewSet {
                docs: Some(docs),
                ..Default::default()
            },
        )
    }

    pub fn logo(identity: &ConnectorIdentity, logo_url: String) -> Self {
        Self::new(
            identity,
            OverviewSet {
                logo: Some(logo_url),
                ..Default::default()
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorVersionRecord {
    pub namespace: String,
    pub name: String,
    pub version: String,
    /// Present only for `PrebuiltDockerImage` releases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub package_definition_url: String,
    pub is_multitenant: bool,
    #[serde(rename = "type")]
    pub packaging_type: PackagingType,
}

impl ConnectorVersionRecord {
    pub fn identity(&self) -> ConnectorIdentity {
        ConnectorIdentity::new(&self.namespace, &self.name)
    }
}

/// Everything a run accumulates for its single mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishBatch {
    pub connector_inserts: Vec<HubRegistryConnectorInsertInput>,
    pub overview_inserts: Vec<ConnectorOverviewInsert>,
    pub overview_updates: Vec<ConnectorOverviewUpdate>,
    pub version_inserts: Vec<ConnectorVersionRecord>,
}

impl PublishBatch {
    pub fn is_empty(&self) -> bool {
        self.connector_inserts.is_empty()
            && self.overview_inserts.is_empty()
            && self.overview_updates.is_empty()
            && self.version_inserts.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.connector_inserts.len()
            + self.overview_inserts.len()
            + self.overview_updates.len()
            + self.version_inserts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn readme_update_leaves_other_columns_absent() {
        let id = ConnectorIdentity::new("acme", "db");
        let update = ConnectorOverviewUpdate::docs(&id, "# db".into());
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(
            value,
            json!({
                "_set": {"docs": "# db"},
                "where": {"_and": [
                    {"name": {"_eq": "db"}},
                    {"namespace": {"_eq": "acme"}}
                ]}
            })
        );
        let set = value["_set"].as_object().unwrap();
        for absent in ["logo", "latest_version", "title", "description"] {
            assert!(!set.contains_key(absent), "{} must be absent", absent);
        }
    }

    #[test]
    fn version_record_omits_missing_image() {
        let record = ConnectorVersionRecord {
            namespace: "acme".into(),
            name: "db".into(),
            version: "v1.0.0".into(),
            image: None,
            package_definition_url: "https://s/acme/db.tgz".into(),
            is_multitenant: false,
            packaging_type: PackagingType::ManagedDockerBuild,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("image").is_none());
        assert_eq!(value["type"], "ManagedDockerBuild");
        assert_eq!(value["is_multitenant"], false);
    }

    #[test]
    fn overview_insert_nests_author_data() {
        let insert = ConnectorOverviewInsert {
            namespace: "acme".into(),
            name: "db".into(),
            title: "DB".into(),
            description: "A database".into(),
            logo: "https://img/acme-db.png".into(),
            docs: "# db".into(),
            is_verified: true,
            is_hosted: false,
            author: AuthorInsert {
                data: OverviewAuthor {
                    name: "Acme".into(),
                    support_email: "help@acme.test".into(),
                    website: "https://acme.test".into(),
                },
            },
        };
        let value = serde_json::to_value(&insert).unwrap();
        assert_eq!(value["author"]["data"]["website"], "https://acme.test");
    }
}
