//! HTTP upload lines
//!
//! Protocol (shared by the built-in lines and the user-configured one):
//! upload is a PUT of the raw blob bytes; any 2xx response means success and
//! the body is the remote location. 403 and 500 are transient host-side
//! throttling and are retryable; anything else is not. A GET of the endpoint
//! returns a default filler image, and the response may carry a `referer`
//! header naming the referer downloads should present.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::REFERER;
use stow_core::{SettingsStore, StowError, StowResult};

use crate::Uploader;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

struct FixedLine {
    url: String,
    referer: String,
}

pub struct HttpUploader {
    id: String,
    /// `Some` for built-in lines; `None` means endpoint/referer come from
    /// the settings store (the user-configured line).
    fixed: Option<FixedLine>,
    settings: Option<Arc<SettingsStore>>,
    client: reqwest::Client,
    filler_cache: tokio::sync::Mutex<Option<Vec<u8>>>,
}

impl HttpUploader {
    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client")
    }

    /// A built-in line with a fixed endpoint and referer.
    pub fn builtin(id: &str, url: &str, referer: &str) -> Self {
        Self {
            id: id.to_string(),
            fixed: Some(FixedLine {
                url: url.to_string(),
                referer: referer.to_string(),
            }),
            settings: None,
            client: Self::client(),
            filler_cache: tokio::sync::Mutex::new(None),
        }
    }

    /// The user-configured line; endpoint and referer live in the settings
    /// store so edits take effect without restarting.
    pub fn custom(settings: Arc<SettingsStore>) -> Self {
        Self {
            id: "custom".to_string(),
            fixed: None,
            settings: Some(settings),
            client: Self::client(),
            filler_cache: tokio::sync::Mutex::new(None),
        }
    }

    fn request_url(&self) -> Option<String> {
        if let Some(fixed) = &self.fixed {
            return Some(fixed.url.clone());
        }
        let url = self.settings.as_ref()?.custom_upload_url();
        let url = url.trim();
        (!url.is_empty()).then(|| url.to_string())
    }

    /// GET the endpoint for a default filler, learning a referer from the
    /// response headers when the host names one.
    async fn fetch_default_filler(&self, url: &str) -> StowResult<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StowError::Fetch(format!("filler request: {e}")))?;

        if !resp.status().is_success() {
            return Err(StowError::Fetch(format!(
                "filler request: status {}",
                resp.status()
            )));
        }

        if let (Some(settings), Some(referer)) = (
            &self.settings,
            resp.headers().get(REFERER).and_then(|v| v.to_str().ok()),
        ) {
            tracing::debug!(referer, "learned referer from endpoint");
            settings.set_custom_referer(referer);
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StowError::Fetch(format!("filler body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait::async_trait]
impl Uploader for HttpUploader {
    fn id(&self) -> &str {
        &self.id
    }

    fn referer(&self) -> Option<String> {
        let referer = match (&self.fixed, &self.settings) {
            (Some(fixed), _) => fixed.referer.clone(),
            (None, Some(settings)) => settings.custom_referer(),
            (None, None) => String::new(),
        };
        let referer = referer.trim().to_string();
        (!referer.is_empty()).then_some(referer)
    }

    async fn upload_chunk(&self, blob: &[u8]) -> StowResult<String> {
        let url = self
            .request_url()
            .ok_or_else(|| StowError::upload("no upload URL configured", false))?;

        let mut req = self.client.put(&url).body(blob.to_vec());
        if let Some(referer) = self.referer() {
            req = req.header(REFERER, referer);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| StowError::upload(format!("request: {e}"), true))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| StowError::upload(format!("response body: {e}"), true))?;

        if status.is_success() {
            let location = body.trim();
            if location.is_empty() {
                return Err(StowError::upload("host returned empty location", false));
            }
            return Ok(location.to_string());
        }

        let retryable = matches!(status.as_u16(), 403 | 500);
        Err(StowError::upload(
            format!("status {status}: {}", body.chars().take(200).collect::<String>()),
            retryable,
        ))
    }

    async fn fetch_chunk(&self, location: &str, referer: Option<&str>) -> StowResult<Vec<u8>> {
        let mut req = self.client.get(location);
        if let Some(referer) = referer.map(str::to_string).or_else(|| self.referer()) {
            req = req.header(REFERER, referer);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| StowError::Fetch(format!("request: {e}")))?;

        if !resp.status().is_success() {
            return Err(StowError::Fetch(format!("status {}", resp.status())));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StowError::Fetch(format!("body: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn filler(&self) -> StowResult<Vec<u8>> {
        let mut cache = self.filler_cache.lock().await;
        if let Some(filler) = cache.as_ref() {
            return Ok(filler.clone());
        }

        // Built-in lines generate a filler locally; the custom line asks its
        // endpoint first and falls back to a local one.
        let filler = if self.fixed.is_some() {
            stow_crypto::random_filler()
        } else {
            match self.request_url() {
                Some(url) => match self.fetch_default_filler(&url).await {
                    Ok(bytes) if !bytes.is_empty() => bytes,
                    Ok(_) | Err(_) => stow_crypto::random_filler(),
                },
                None => stow_crypto::random_filler(),
            }
        };

        *cache = Some(filler.clone());
        Ok(filler)
    }
}
