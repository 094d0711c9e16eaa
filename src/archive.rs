//! Release tarball fetch and extraction.
//!
//! A release URI is downloaded to a fresh temporary file under the scratch
//! directory, then unpacked into `<scratch>/<namespace>/<name>/<version>`.
//! The extraction directory is recreated on every fetch, so reruns for the
//! same release start clean and different releases never collide. Nothing
//! here is cleaned up afterwards.

use std::fs::File;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use log::debug;

use hub_publish_core::collab::{FetchedRelease, ReleaseArchive};
use hub_publish_core::models::{ConnectorIdentity, RELEASE_METADATA_PATH};

pub struct HttpReleaseArchive {
    client: reqwest::blocking::Client,
    scratch_dir: PathBuf,
}

impl HttpReleaseArchive {
    pub fn new(scratch_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build download HTTP client")?;
        Ok(Self {
            client,
            scratch_dir: scratch_dir.into(),
        })
    }

    /// `<scratch>/<namespace>/<name>/<version>`. Each part must be a single
    /// plain path component so the result stays under the scratch dir.
    pub fn extraction_dir(&self, identity: &ConnectorIdentity, version: &str) -> Result<PathBuf> {
        let mut dir = self.scratch_dir.clone();
        for part in [identity.namespace.as_str(), identity.name.as_str(), version] {
            let mut components = Path::new(part).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(c)), None) if c == part => dir.push(part),
                _ => bail!(
                    "refusing to extract {} @ {}: '{}' is not a plain directory name",
                    identity,
                    version,
                    part
                ),
            }
        }
        Ok(dir)
    }

    /// Download `uri` into a new uniquely named file under the scratch dir.
    pub fn download(&self, uri: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.scratch_dir).with_context(|| {
            format!("Failed to create scratch dir: {}", self.scratch_dir.display())
        })?;
        let mut file = tempfile::Builder::new()
            .prefix("package-")
            .suffix(".tgz")
            .tempfile_in(&self.scratch_dir)
            .context("Failed to create temporary download file")?;

        download_to(&self.client, uri, file.as_file_mut())?;

        let (_, path) = file
            .keep()
            .context("Failed to keep downloaded package")?;
        Ok(path)
    }
}

/// Stream the body of a GET on `uri` into `dest`. Non-2xx is an error.
pub fn download_to(client: &reqwest::blocking::Client, uri: &str, dest: &mut File) -> Result<u64> {
    debug!("GET {}", uri);
    let mut resp = client
        .get(uri)
        .send()
        .with_context(|| format!("Error downloading file: {}", uri))?;
    if !resp.status().is_success() {
        bail!("Error downloading file: HTTP {} for {}", resp.status(), uri);
    }
    let written = resp
        .copy_to(dest)
        .with_context(|| format!("Error writing download of {}", uri))?;
    dest.flush()?;
    Ok(written)
}

/// Unpack a gzipped tarball into `dest`, replacing whatever was there.
pub fn extract_tar_gz(tarball: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        std::fs::remove_dir_all(dest)
            .with_context(|| format!("Failed to clear {}", dest.display()))?;
    }
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let file = File::open(tarball)
        .with_context(|| format!("Failed to open {}", tarball.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive
        .unpack(dest)
        .with_context(|| format!("error extracting tar.gz file: {}", tarball.display()))
}

/// Read the release-metadata document from an extraction root.
pub fn read_metadata_document(root: &Path) -> Result<String> {
    let path = root.join(RELEASE_METADATA_PATH);
    if !path.is_file() {
        bail!("release archive has no {}", RELEASE_METADATA_PATH);
    }
    std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
}

impl ReleaseArchive for HttpReleaseArchive {
    fn fetch(
        &self,
        uri: &str,
        identity: &ConnectorIdentity,
        version: &str,
    ) -> Result<FetchedRelease> {
        let dir = self.extraction_dir(identity, version)?;
        let tarball = self.download(uri)?;
        extract_tar_gz(&tarball, &dir)?;
        let metadata_document = read_metadata_document(&dir)?;
        Ok(FetchedRelease {
            metadata_document,
            tarball,
            extracted_dir: dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn write_tarball(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn extracts_and_reads_metadata_document() {
        let tmp = TempDir::new().unwrap();
        let tarball = tmp.path().join("package.tgz");
        write_tarball(
            &tarball,
            &[(
                ".hasura-connector/connector-metadata.yaml",
                "packagingDefinition:\n  type: ManagedDockerBuild\n",
            )],
        );

        let dest = tmp.path().join("acme/db/v1.0.0");
        extract_tar_gz(&tarball, &dest).unwrap();
        let doc = read_metadata_document(&dest).unwrap();
        assert!(doc.contains("ManagedDockerBuild"));

        // Re-extraction replaces stale content.
        std::fs::write(dest.join("stale.txt"), "x").unwrap();
        extract_tar_gz(&tarball, &dest).unwrap();
        assert!(!dest.join("stale.txt").exists());
    }

    #[test]
    fn missing_metadata_document_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let tarball = tmp.path().join("package.tgz");
        write_tarball(&tarball, &[("README.md", "# hi")]);
        let dest = tmp.path().join("out");
        extract_tar_gz(&tarball, &dest).unwrap();
        let err = read_metadata_document(&dest).unwrap_err();
        assert!(err.to_string().contains(RELEASE_METADATA_PATH));
    }

    #[test]
    fn malformed_archive_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let tarball = tmp.path().join("package.tgz");
        std::fs::write(&tarball, "not a tarball").unwrap();
        assert!(extract_tar_gz(&tarball, &tmp.path().join("out")).is_err());
    }

    #[test]
    fn extraction_dir_is_scoped_by_release() {
        let archive = HttpReleaseArchive::new("/scratch", Duration::from_secs(5)).unwrap();
        assert_eq!(
            archive
                .extraction_dir(&ConnectorIdentity::new("acme", "db"), "v1.0.0")
                .unwrap(),
            PathBuf::from("/scratch/acme/db/v1.0.0")
        );
    }

    #[test]
    fn extraction_dir_never_leaves_scratch() {
        let archive = HttpReleaseArchive::new("/scratch", Duration::from_secs(5)).unwrap();
        for (ns, name, version) in [
            ("..", "outside", "v1.0.0"),
            ("acme", ".", "v1.0.0"),
            ("acme", "db", ".."),
            ("acme", "db/../../etc", "v1.0.0"),
            ("/abs", "db", "v1.0.0"),
            ("", "db", "v1.0.0"),
        ] {
            let err = archive
                .extraction_dir(&ConnectorIdentity::new(ns, name), version)
                .unwrap_err();
            assert!(err.to_string().contains("plain directory name"), "{}", err);
        }
    }

    #[test]
    fn fetch_refuses_escaping_release_before_touching_disk() {
        let tmp = TempDir::new().unwrap();
        let scratch = tmp.path().join("scratch");
        let victim = tmp.path().join("outside/v1.0.0");
        std::fs::create_dir_all(&victim).unwrap();
        std::fs::write(victim.join("keep.txt"), "x").unwrap();

        let archive = HttpReleaseArchive::new(&scratch, Duration::from_secs(1)).unwrap();
        let err = archive
            .fetch(
                "http://127.0.0.1:9/package.tgz",
                &ConnectorIdentity::new("..", "outside"),
                "v1.0.0",
            )
            .unwrap_err();
        assert!(err.to_string().contains("plain directory name"));
        assert!(victim.join("keep.txt").exists());
        assert!(!scratch.exists());
    }
}
