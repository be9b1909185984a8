//! Script-driven upload line
//!
//! Users adapt new or changed hosts by supplying a script instead of waiting
//! for a release. The script runs in a sandboxed rhai interpreter with a
//! fixed host-function table — base64, hashing, URL escaping, HTTP request
//! and form-submit primitives, blob concatenation, print, and a referer
//! recorder. No filesystem or process access exists inside the sandbox.
//!
//! Each upload evaluates the script from scratch with two globals:
//! `chunk` (the disguised blob, base64) and `head_size` (the filler prefix
//! length). The script's result value, a string, is the remote location.
//! Any uncaught failure surfaces as a non-retryable upload error.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use md5::Md5;
use rhai::{Engine, EvalAltResult, Scope};
use sha2::{Digest, Sha256, Sha512};

use stow_core::{SettingsStore, StowError, StowResult};

use crate::Uploader;

/// Operation budget per evaluation; a runaway script errors out instead of
/// pinning a blocking thread forever.
const MAX_SCRIPT_OPS: u64 = 5_000_000;

pub struct ScriptUploader {
    settings: Arc<SettingsStore>,
    client: reqwest::Client,
    filler_cache: tokio::sync::Mutex<Option<Vec<u8>>>,
}

impl ScriptUploader {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("reqwest client"),
            filler_cache: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Uploader for ScriptUploader {
    fn id(&self) -> &str {
        "script"
    }

    fn referer(&self) -> Option<String> {
        let referer = self.settings.get_str("script_referer", "");
        let referer = referer.trim().to_string();
        (!referer.is_empty()).then_some(referer)
    }

    async fn upload_chunk(&self, blob: &[u8]) -> StowResult<String> {
        let source = self.settings.script_source();
        if source.trim().is_empty() {
            return Err(StowError::upload("no upload script configured", false));
        }

        let head_size = self.filler().await?.len() as i64;
        let chunk_b64 = STANDARD.encode(blob);
        let settings = self.settings.clone();

        // Scripts block on their HTTP primitives, so the whole evaluation
        // runs on the blocking pool.
        let location = tokio::task::spawn_blocking(move || {
            eval_script(&source, &chunk_b64, head_size, &settings)
        })
        .await
        .map_err(|e| StowError::Script(format!("script task: {e}")))?
        .map_err(|e| StowError::upload(format!("script: {e}"), false))?;

        let location = location.trim().to_string();
        if location.is_empty() {
            return Err(StowError::upload("script returned empty location", false));
        }
        Ok(location)
    }

    async fn fetch_chunk(&self, location: &str, referer: Option<&str>) -> StowResult<Vec<u8>> {
        let mut req = self.client.get(location);
        if let Some(referer) = referer.map(str::to_string).or_else(|| Uploader::referer(self)) {
            req = req.header(reqwest::header::REFERER, referer);
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
        if cache.is_none() {
            *cache = Some(stow_crypto::random_filler());
        }
        Ok(cache.clone().expect("filler populated above"))
    }
}

/// Run one script evaluation with the fixed host-function table.
fn eval_script(
    source: &str,
    chunk_b64: &str,
    head_size: i64,
    settings: &Arc<SettingsStore>,
) -> Result<String, Box<EvalAltResult>> {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_SCRIPT_OPS);
    engine.on_print(|text| tracing::info!(target: "stow::script", "{text}"));

    register_host_fns(&mut engine, settings.clone());

    let mut scope = Scope::new();
    scope.push("chunk", chunk_b64.to_string());
    scope.push("head_size", head_size);

    engine.eval_with_scope::<String>(&mut scope, source)
}

fn register_host_fns(engine: &mut Engine, settings: Arc<SettingsStore>) {
    engine.register_fn("b64_encode", |text: &str| STANDARD.encode(text.as_bytes()));

    engine.register_fn("b64_decode", |b64: &str| -> Result<String, Box<EvalAltResult>> {
        let bytes = STANDARD
            .decode(b64.trim())
            .map_err(|e| format!("b64_decode: {e}"))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    });

    engine.register_fn(
        "concat_b64",
        |a: &str, b: &str| -> Result<String, Box<EvalAltResult>> {
            let mut bytes = STANDARD.decode(a.trim()).map_err(|e| format!("concat_b64: {e}"))?;
            let tail = STANDARD.decode(b.trim()).map_err(|e| format!("concat_b64: {e}"))?;
            bytes.extend_from_slice(&tail);
            Ok(STANDARD.encode(bytes))
        },
    );

    engine.register_fn(
        "hash",
        |alg: &str, b64: &str| -> Result<String, Box<EvalAltResult>> {
            let bytes = STANDARD.decode(b64.trim()).map_err(|e| format!("hash: {e}"))?;
            let digest = match alg {
                "md5" => hex(&Md5::digest(&bytes)),
                "sha256" => hex(&Sha256::digest(&bytes)),
                "sha512" => hex(&Sha512::digest(&bytes)),
                other => return Err(format!("hash: unknown algorithm {other}").into()),
            };
            Ok(digest)
        },
    );

    engine.register_fn("url_encode", |s: &str| urlencoding::encode(s).into_owned());

    engine.register_fn("url_decode", |s: &str| -> Result<String, Box<EvalAltResult>> {
        urlencoding::decode(s)
            .map(|c| c.into_owned())
            .map_err(|e| format!("url_decode: {e}").into())
    });

    {
        let settings = settings.clone();
        engine.register_fn("set_referer", move |referer: &str| {
            settings.set("script_referer", referer.trim());
        });
    }

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .expect("blocking client");

    {
        let client = client.clone();
        engine.register_fn(
            "http_request",
            move |method: &str,
                  url: &str,
                  headers_json: &str,
                  body_b64: &str|
                  -> Result<String, Box<EvalAltResult>> {
                let method: reqwest::Method = method
                    .to_uppercase()
                    .parse()
                    .map_err(|_| format!("http_request: bad method {method}"))?;

                let mut req = client.request(method, url);
                if !headers_json.trim().is_empty() {
                    let headers: serde_json::Map<String, serde_json::Value> =
                        serde_json::from_str(headers_json)
                            .map_err(|e| format!("http_request headers: {e}"))?;
                    for (name, value) in headers {
                        if let Some(value) = value.as_str() {
                            req = req.header(name, value);
                        }
                    }
                }
                if !body_b64.is_empty() {
                    let body = STANDARD
                        .decode(body_b64.trim())
                        .map_err(|e| format!("http_request body: {e}"))?;
                    req = req.body(body);
                }

                let resp = req.send().map_err(|e| format!("http_request: {e}"))?;
                let status = resp.status();
                let bytes = resp.bytes().map_err(|e| format!("http_request body: {e}"))?;
                if !status.is_success() {
                    return Err(format!(
                        "http_request: status {status}: {}",
                        String::from_utf8_lossy(&bytes).chars().take(200).collect::<String>()
                    )
                    .into());
                }
                Ok(STANDARD.encode(&bytes))
            },
        );
    }

    engine.register_fn(
        "submit_form",
        move |url: &str, fields_json: &str| -> Result<String, Box<EvalAltResult>> {
            let fields: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(fields_json).map_err(|e| format!("submit_form fields: {e}"))?;
            let form: Vec<(String, String)> = fields
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                .collect();

            let resp = client
                .post(url)
                .form(&form)
                .send()
                .map_err(|e| format!("submit_form: {e}"))?;
            let status = resp.status();
            let bytes = resp.bytes().map_err(|e| format!("submit_form body: {e}"))?;
            if !status.is_success() {
                return Err(format!("submit_form: status {status}").into());
            }
            Ok(STANDARD.encode(&bytes))
        },
    );
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
