//! Path classification: changed file → typed operation.
//!
//! Classification is a small declarative grammar over the registry tree
//! layout `registry/<namespace>/<name>/...`. Each rule pairs an anchored
//! pattern with a constructor; rules are tried in table order and the first
//! match wins. Paths matching no rule are unrecognized and skipped, since
//! unrelated files (CI config, top-level docs) routinely appear in the same
//! diff.
//!
//! | Path shape | Operation |
//! |------------|-----------|
//! | `registry/<ns>/<name>/releases/<version>/connector-packaging.json` | version release |
//! | `registry/<ns>/<name>/metadata.json` | connector metadata |
//! | `registry/<ns>/<name>/logo.{png,svg}` | logo |
//! | `registry/<ns>/<name>/README.md` | docs |

use std::sync::OnceLock;

use log::debug;
use regex::{Captures, Regex};
use thiserror::Error;

use crate::error::PublishError;
use crate::models::{
    compare_release_versions, ChangedFileSet, ClassifiedChange, ConnectorIdentity,
    LogoDescriptor, LogoFormat, ALIASED_CONNECTORS_DIR,
};

/// Which list of the diff a path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Added,
    Modified,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("{path}: connector packaging files are immutable and must not be changed ({identity} @ {version})")]
    ImmutableRelease {
        path: String,
        identity: ConnectorIdentity,
        version: String,
    },

    #[error("{path}: connector {identity} is added more than once in this change set")]
    DuplicateNewConnector {
        path: String,
        identity: ConnectorIdentity,
    },
}

impl ClassifyError {
    fn path(&self) -> &str {
        match self {
            ClassifyError::ImmutableRelease { path, .. }
            | ClassifyError::DuplicateNewConnector { path, .. } => path,
        }
    }
}

impl From<ClassifyError> for PublishError {
    fn from(err: ClassifyError) -> Self {
        PublishError::Classification {
            path: err.path().to_string(),
            message: err.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Rule table
// ═══════════════════════════════════════════════════════════════════════

type Constructor = fn(&Captures, &str, ChangeOrigin) -> Result<ClassifiedChange, ClassifyError>;

struct Rule {
    pattern: &'static str,
    build: Constructor,
}

const RULES: &[Rule] = &[
    Rule {
        pattern: r"^registry/([^/]+)/([^/]+)/releases/([^/]+)/connector-packaging\.json$",
        build: version_release,
    },
    Rule {
        pattern: r"^registry/([^/]+)/([^/]+)/metadata\.json$",
        build: connector_metadata,
    },
    Rule {
        pattern: r"^registry/([^/]+)/([^/]+)/logo\.(png|svg)$",
        build: logo,
    },
    Rule {
        pattern: r"^registry/([^/]+)/([^/]+)/README\.md$",
        build: readme,
    },
];

fn compiled_rules() -> &'static [(Regex, Constructor)] {
    static COMPILED: OnceLock<Vec<(Regex, Constructor)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|rule| {
                let re = Regex::new(rule.pattern).expect("classification patterns are valid");
                (re, rule.build)
            })
            .collect()
    })
}

fn identity(caps: &Captures) -> ConnectorIdentity {
    ConnectorIdentity::new(&caps[1], &caps[2])
}

fn version_release(
    caps: &Captures,
    path: &str,
    origin: ChangeOrigin,
) -> Result<ClassifiedChange, ClassifyError> {
    let identity = identity(caps);
    let version = caps[3].to_string();
    match origin {
        ChangeOrigin::Added => Ok(ClassifiedChange::NewVersionRelease {
            identity,
            version,
            packaging_path: path.to_string(),
        }),
        ChangeOrigin::Modified => Err(ClassifyError::ImmutableRelease {
            path: path.to_string(),
            identity,
            version,
        }),
    }
}

fn connector_metadata(
    caps: &Captures,
    path: &str,
    origin: ChangeOrigin,
) -> Result<ClassifiedChange, ClassifyError> {
    let identity = identity(caps);
    let path = path.to_string();
    Ok(match origin {
        ChangeOrigin::Added => ClassifiedChange::NewConnectorMetadata { identity, path },
        ChangeOrigin::Modified => ClassifiedChange::ModifiedConnectorMetadata { identity, path },
    })
}

fn logo(caps: &Captures, path: &str, origin: ChangeOrigin) -> Result<ClassifiedChange, ClassifyError> {
    let identity = identity(caps);
    // The pattern only admits png|svg.
    let format = LogoFormat::from_extension(&caps[3]).unwrap_or(LogoFormat::Png);
    let logo = LogoDescriptor {
        path: path.to_string(),
        format,
    };
    Ok(match origin {
        ChangeOrigin::Added => ClassifiedChange::NewLogo { identity, logo },
        ChangeOrigin::Modified => ClassifiedChange::ModifiedLogo { identity, logo },
    })
}

fn readme(caps: &Captures, path: &str, origin: ChangeOrigin) -> Result<ClassifiedChange, ClassifyError> {
    let identity = identity(caps);
    let path = path.to_string();
    Ok(match origin {
        ChangeOrigin::Added => ClassifiedChange::NewReadme { identity, path },
        ChangeOrigin::Modified => ClassifiedChange::ModifiedReadme { identity, path },
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Entry points
// ═══════════════════════════════════════════════════════════════════════

fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.strip_prefix("./").map(str::to_string).unwrap_or(path)
}

/// Classify a single repository-relative path.
///
/// Returns `Ok(None)` for anything outside the four recognized shapes.
/// The only error is a modified packaging file.
pub fn classify(path: &str, origin: ChangeOrigin) -> Result<Option<ClassifiedChange>, ClassifyError> {
    let normalized = normalize(path);

    if normalized
        .split('/')
        .any(|segment| segment == ALIASED_CONNECTORS_DIR)
    {
        debug!("skipping aliased connector path: {}", path);
        return Ok(None);
    }

    // Captured segments become scratch directory names; never let them walk.
    if normalized
        .split('/')
        .any(|segment| segment == "." || segment == "..")
    {
        debug!("skipping path with relative segments: {}", path);
        return Ok(None);
    }

    for (re, build) in compiled_rules() {
        if let Some(caps) = re.captures(&normalized) {
            return build(&caps, &normalized, origin).map(Some);
        }
    }

    debug!("skipping unrecognized path: {}", path);
    Ok(None)
}

/// Classify every added and modified path of a diff.
///
/// Deleted paths are logged and ignored. Stops at the first hard error.
pub fn classify_all(files: &ChangedFileSet) -> Result<Vec<ClassifiedChange>, ClassifyError> {
    let mut changes = Vec::new();

    for path in &files.added {
        if let Some(change) = classify(path, ChangeOrigin::Added)? {
            changes.push(change);
        }
    }
    for path in &files.modified {
        if let Some(change) = classify(path, ChangeOrigin::Modified)? {
            changes.push(change);
        }
    }
    for path in &files.deleted {
        debug!("ignoring deleted path: {}", path);
    }

    Ok(changes)
}

/// A release directory whose packaging file was added by a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedRelease {
    pub identity: ConnectorIdentity,
    pub version: String,
    pub packaging_path: String,
}

/// Every added packaging file of a diff, ordered by identity then semantic
/// version. Modified and deleted paths are not looked at.
pub fn added_releases(files: &ChangedFileSet) -> Result<Vec<AddedRelease>, ClassifyError> {
    let mut releases = Vec::new();
    for path in &files.added {
        if let Some(ClassifiedChange::NewVersionRelease {
            identity,
            version,
            packaging_path,
        }) = classify(path, ChangeOrigin::Added)?
        {
            releases.push(AddedRelease {
                identity,
                version,
                packaging_path,
            });
        }
    }
    releases.sort_by(|a, b| {
        a.identity
            .cmp(&b.identity)
            .then_with(|| compare_release_versions(&a.version, &b.version))
    });
    releases.dedup();
    Ok(releases)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(ns: &str, name: &str) -> ConnectorIdentity {
        ConnectorIdentity::new(ns, name)
    }

    #[test]
    fn metadata_paths_classify_by_origin() {
        let added = classify("registry/acme/db/metadata.json", ChangeOrigin::Added)
            .unwrap()
            .unwrap();
        assert_eq!(
            added,
            ClassifiedChange::NewConnectorMetadata {
                identity: id("acme", "db"),
                path: "registry/acme/db/metadata.json".into(),
            }
        );

        let modified = classify("registry/acme/db/metadata.json", ChangeOrigin::Modified)
            .unwrap()
            .unwrap();
        assert!(matches!(
            modified,
            ClassifiedChange::ModifiedConnectorMetadata { .. }
        ));
    }

    #[test]
    fn logo_extension_is_captured() {
        let change = classify("registry/acme/db/logo.svg", ChangeOrigin::Modified)
            .unwrap()
            .unwrap();
        match change {
            ClassifiedChange::ModifiedLogo { identity, logo } => {
                assert_eq!(identity, id("acme", "db"));
                assert_eq!(logo.format, LogoFormat::Svg);
            }
            other => panic!("unexpected classification: {:?}", other),
        }
        assert_eq!(
            classify("registry/acme/db/logo.jpg", ChangeOrigin::Added).unwrap(),
            None
        );
    }

    #[test]
    fn readme_is_a_docs_change() {
        let change = classify("registry/acme/db/README.md", ChangeOrigin::Added)
            .unwrap()
            .unwrap();
        assert!(matches!(change, ClassifiedChange::NewReadme { .. }));
        assert_eq!(
            classify("registry/acme/db/readme.md", ChangeOrigin::Added).unwrap(),
            None
        );
    }

    #[test]
    fn added_release_keeps_version_verbatim() {
        let change = classify(
            "registry/acme/db/releases/not-semver/connector-packaging.json",
            ChangeOrigin::Added,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            change,
            ClassifiedChange::NewVersionRelease {
                identity: id("acme", "db"),
                version: "not-semver".into(),
                packaging_path: "registry/acme/db/releases/not-semver/connector-packaging.json"
                    .into(),
            }
        );
    }

    #[test]
    fn modified_release_is_an_error() {
        let err = classify(
            "registry/ns/name/releases/v1.0.0/connector-packaging.json",
            ChangeOrigin::Modified,
        )
        .unwrap_err();
        assert!(matches!(err, ClassifyError::ImmutableRelease { .. }));
        assert!(err.to_string().contains("immutable"));
    }

    #[test]
    fn unrelated_paths_are_skipped() {
        for path in [
            ".github/workflows/ci.yaml",
            "README.md",
            "registry/acme/metadata.json",
            "registry/acme/db/extra/metadata.json",
            "registry/acme/db/releases/v1.0.0/other.json",
            "registry/acme/db/releases/v1.0.0/nested/connector-packaging.json",
        ] {
            assert_eq!(classify(path, ChangeOrigin::Added).unwrap(), None, "{}", path);
            assert_eq!(classify(path, ChangeOrigin::Modified).unwrap(), None, "{}", path);
        }
    }

    #[test]
    fn aliased_connectors_are_skipped() {
        assert_eq!(
            classify(
                "registry/aliased_connectors/db/metadata.json",
                ChangeOrigin::Added
            )
            .unwrap(),
            None
        );
    }

    #[test]
    fn relative_segments_are_skipped() {
        for path in [
            "registry/../outside/releases/v1.0.0/connector-packaging.json",
            "registry/acme/./releases/v1.0.0/connector-packaging.json",
            "registry/acme/db/releases/../connector-packaging.json",
            "registry/acme/../metadata.json",
            "registry/./db/logo.png",
        ] {
            assert_eq!(classify(path, ChangeOrigin::Added).unwrap(), None, "{}", path);
            assert_eq!(classify(path, ChangeOrigin::Modified).unwrap(), None, "{}", path);
        }
    }

    #[test]
    fn leading_dot_slash_is_stripped() {
        let change = classify("./registry/acme/db/metadata.json", ChangeOrigin::Added)
            .unwrap()
            .unwrap();
        assert_eq!(change.identity(), &id("acme", "db"));
    }

    #[test]
    fn identity_is_case_sensitive() {
        let a = classify("registry/Acme/db/metadata.json", ChangeOrigin::Added)
            .unwrap()
            .unwrap();
        assert_ne!(a.identity(), &id("acme", "db"));
    }

    #[test]
    fn added_releases_are_sorted_and_ignore_other_changes() {
        let files = ChangedFileSet {
            added: vec![
                "registry/zeta/db/releases/v1.0.0/connector-packaging.json".into(),
                "registry/acme/db/releases/v1.10.0/connector-packaging.json".into(),
                "registry/acme/db/metadata.json".into(),
                "registry/acme/db/releases/v1.9.0/connector-packaging.json".into(),
            ],
            modified: vec!["registry/acme/db/releases/v1.0.0/connector-packaging.json".into()],
            ..Default::default()
        };
        let releases: Vec<(String, String)> = added_releases(&files)
            .unwrap()
            .into_iter()
            .map(|r| (r.identity.to_string(), r.version))
            .collect();
        assert_eq!(
            releases,
            vec![
                ("acme/db".to_string(), "v1.9.0".to_string()),
                ("acme/db".to_string(), "v1.10.0".to_string()),
                ("zeta/db".to_string(), "v1.0.0".to_string()),
            ]
        );
    }

    #[test]
    fn classify_all_ignores_deleted_and_stops_on_error() {
        let files = ChangedFileSet {
            added: vec![
                "registry/acme/db/metadata.json".into(),
                "docs/index.md".into(),
            ],
            modified: vec!["registry/acme/db/README.md".into()],
            deleted: vec!["registry/acme/old/metadata.json".into()],
        };
        let changes = classify_all(&files).unwrap();
        assert_eq!(changes.len(), 2);

        let bad = ChangedFileSet {
            modified: vec!["registry/acme/db/releases/v1.0.0/connector-packaging.json".into()],
            ..Default::default()
        };
        assert!(classify_all(&bad).is_err());
    }
}
