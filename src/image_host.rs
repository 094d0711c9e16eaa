//! Logo uploads to the image host (Cloudinary upload API).
//!
//! Images are sent as a base64 `data:` URI in a signed form POST. The
//! signature is SHA-256 over the sorted, `&`-joined upload parameters
//! followed by the API secret. Uploads overwrite by public id, so a
//! modified logo replaces the previous one in place.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::Engine;
use log::debug;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use hub_publish_core::collab::ImageHost;
use hub_publish_core::models::LogoFormat;

use crate::config::{ImagesConfig, Secrets};

const API_BASE: &str = "https://api.cloudinary.com/v1_1";

pub struct HttpImageHost {
    client: reqwest::blocking::Client,
    config: ImagesConfig,
    api_key: String,
    api_secret: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    error: Option<UploadError>,
}

#[derive(Deserialize)]
struct UploadError {
    message: String,
}

impl HttpImageHost {
    pub fn new(config: &ImagesConfig, secrets: &Secrets, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build image host HTTP client")?;
        Ok(Self {
            client,
            config: config.clone(),
            api_key: secrets.image_api_key.clone(),
            api_secret: secrets.image_api_secret.clone(),
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/{}/image/upload", API_BASE, self.config.cloud_name)
    }
}

impl ImageHost for HttpImageHost {
    fn upload(&self, bytes: &[u8], public_id: &str, format: LogoFormat) -> Result<String> {
        let timestamp = chrono::Utc::now().timestamp().to_string();

        let mut signed: Vec<(&str, String)> = vec![
            ("overwrite", "true".to_string()),
            ("public_id", public_id.to_string()),
            ("timestamp", timestamp),
        ];
        if let Some(folder) = &self.config.folder {
            signed.push(("folder", folder.clone()));
        }
        let signature = sign_params(&signed, &self.api_secret);

        let mut form = signed;
        form.push(("file", data_uri(bytes, format)));
        form.push(("api_key", self.api_key.clone()));
        form.push(("signature", signature));
        form.push(("signature_algorithm", "sha256".to_string()));

        debug!("uploading logo {} ({} bytes)", public_id, bytes.len());
        let resp = self
            .client
            .post(self.upload_url())
            .form(&form)
            .send()
            .with_context(|| format!("Failed to upload logo {}", public_id))?;

        let status = resp.status();
        let body: UploadResponse = resp
            .json()
            .with_context(|| format!("Invalid image host response (HTTP {})", status))?;

        if let Some(err) = body.error {
            bail!("image host rejected {} (HTTP {}): {}", public_id, status, err.message);
        }
        if !status.is_success() {
            bail!("image host upload failed (HTTP {}) for {}", status, public_id);
        }
        match body.secure_url {
            Some(url) if !url.is_empty() => Ok(url),
            _ => bail!("image host response for {} has no secure_url", public_id),
        }
    }
}

/// `data:<mime>;base64,<payload>`
fn data_uri(bytes: &[u8], format: LogoFormat) -> String {
    format!(
        "data:{};base64,{}",
        format.mime_type(),
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

fn sign_params(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let to_sign = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}
