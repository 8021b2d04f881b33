use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;
use tracing::{info, warn};

use markbase_model::ConversionType;

use crate::config::IngestConfig;

use super::exec::{run_with_timeout, stderr_snippet};
use super::hash::sha256_of_file;
use super::{title_for, ConversionResult, Converter};

/// One image-to-markdown backend in the fallback chain.
#[async_trait]
pub trait CaptionProvider: Send + Sync {
    fn label(&self) -> &str;
    /// Produce the full markdown for the image, or fail. Empty output is
    /// treated as a failure by the chain.
    async fn convert(&self, path: &Path) -> anyhow::Result<String>;
}

/// Image handler: tries caption providers in configured order and returns
/// the first non-empty result. When every provider fails, the aggregated
/// `(provider, error)` pairs become the document's error message.
pub struct ImageConverter {
    config: Arc<IngestConfig>,
    // Lazily constructed providers, cached for the life of the registry.
    providers: Mutex<HashMap<String, Arc<dyn CaptionProvider>>>,
}

impl std::fmt::Debug for ImageConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageConverter").finish()
    }
}

impl ImageConverter {
    pub fn new(config: Arc<IngestConfig>) -> Self {
        Self {
            config,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Provider order: the configured chain, or just the primary when the
    /// chain is empty; the primary is prepended when the chain omits it.
    fn provider_order(&self) -> Vec<String> {
        let primary = self.config.image_provider_primary.to_lowercase();
        let chain: Vec<String> = self
            .config
            .image_provider_chain
            .iter()
            .map(|p| p.to_lowercase())
            .collect();

        let mut order = if chain.is_empty() { vec![primary.clone()] } else { chain };
        if !order.contains(&primary) {
            order.insert(0, primary);
        }
        order
    }

    fn provider(&self, name: &str) -> Arc<dyn CaptionProvider> {
        let mut cache = self.providers.lock().expect("provider cache poisoned");
        if let Some(provider) = cache.get(name) {
            return provider.clone();
        }

        let provider: Arc<dyn CaptionProvider> = if name == "local" {
            Arc::new(LocalOcrProvider::new(self.config.clone()))
        } else {
            match RemoteCaptionProvider::new(name.to_string(), &self.config) {
                Ok(provider) => Arc::new(provider),
                Err(e) => {
                    // Construction failure degrades to local OCR instead of
                    // taking the whole chain down.
                    warn!("Init caption provider {name} failed, using local OCR: {e:#}");
                    Arc::new(LocalOcrProvider::new(self.config.clone()))
                }
            }
        };

        cache.insert(name.to_string(), provider.clone());
        provider
    }

    #[cfg(test)]
    fn insert_provider(&self, name: &str, provider: Arc<dyn CaptionProvider>) {
        self.providers
            .lock()
            .unwrap()
            .insert(name.to_string(), provider);
    }
}

#[async_trait]
impl Converter for ImageConverter {
    async fn handle(&self, path: &Path, file_type: &str) -> ConversionResult {
        let order = self.provider_order();
        let mut tried_errors: Vec<String> = Vec::new();

        for (attempt, name) in order.iter().enumerate() {
            let provider = self.provider(name);
            info!(
                "Caption attempt {}/{} provider={} file={}",
                attempt + 1,
                order.len(),
                provider.label(),
                title_for(path)
            );

            match provider.convert(path).await {
                Ok(content) if !content.trim().is_empty() => {
                    return ConversionResult::ok(
                        path,
                        file_type,
                        content,
                        ConversionType::ImageToMd,
                    );
                }
                Ok(_) => {
                    tried_errors.push(format!("provider={name} error=empty caption output"));
                }
                Err(e) => {
                    warn!("Caption provider {name} failed: {e:#}");
                    tried_errors.push(format!("provider={name} error={e:#}"));
                }
            }
        }

        let aggregate = if tried_errors.is_empty() {
            "no providers attempted".to_string()
        } else {
            tried_errors.join("; ")
        };
        ConversionResult::failed(
            path,
            file_type,
            format!("Image OCR/caption extraction failed: {aggregate}"),
        )
    }
}

#[derive(Debug, Serialize)]
struct ImageFrontMatter {
    source_file: String,
    provider: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified_time: Option<String>,
    media: MediaInfo,
    ocr_lang: String,
}

#[derive(Debug, Default, Serialize)]
struct MediaInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

/// Local provider: tesseract OCR plus stat/hash/header front matter. Empty
/// OCR output is not an error; the front matter alone is still useful for
/// search.
pub struct LocalOcrProvider {
    config: Arc<IngestConfig>,
}

impl LocalOcrProvider {
    pub fn new(config: Arc<IngestConfig>) -> Self {
        Self { config }
    }

    async fn run_ocr(&self, path: &Path) -> anyhow::Result<String> {
        let mut command = Command::new(&self.config.tesseract_bin);
        command
            .arg(path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.config.tesseract_lang);

        let timeout = Duration::from_secs(self.config.probe_timeout_secs);
        let output = run_with_timeout(command, timeout, "tesseract")
            .await
            .map_err(|message| anyhow::anyhow!(message))?;
        if !output.status.success() {
            anyhow::bail!("tesseract failed: {}", stderr_snippet(&output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl CaptionProvider for LocalOcrProvider {
    fn label(&self) -> &str {
        "local-ocr"
    }

    async fn convert(&self, path: &Path) -> anyhow::Result<String> {
        // Metadata is best-effort; only the OCR invocation itself can fail
        // the provider.
        let stat = tokio::fs::metadata(path).await.ok();
        let hash = match sha256_of_file(path).await {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!("Failed to hash {}: {}", path.display(), e);
                None
            }
        };
        let dimensions = image::image_dimensions(path).ok();
        let format = image::ImageFormat::from_path(path)
            .ok()
            .map(|f| format!("{f:?}"));

        let ocr_text = self.run_ocr(path).await?;

        let mut parts: Vec<String> = Vec::new();
        if self.config.enable_image_front_matter {
            let front = ImageFrontMatter {
                source_file: title_for(path),
                provider: "local-ocr",
                hash_sha256: hash,
                file_size: stat.as_ref().map(|s| s.len()),
                modified_time: stat
                    .as_ref()
                    .and_then(|s| s.modified().ok())
                    .map(|t| DateTime::<Utc>::from(t).to_rfc3339()),
                media: MediaInfo {
                    width: dimensions.map(|(w, _)| w),
                    height: dimensions.map(|(_, h)| h),
                    format,
                },
                ocr_lang: self.config.tesseract_lang.clone(),
            };
            let yaml = serde_yaml::to_string(&front)?;
            parts.push(format!("---\n{yaml}---"));
        }
        parts.push(format!("# {}", title_for(path)));
        if !ocr_text.is_empty() {
            parts.push(ocr_text);
        }
        Ok(parts.join("\n\n") + "\n")
    }
}

/// Remote provider: one OpenAI-compatible captioning model. The provider
/// name doubles as the model identifier sent to the endpoint.
pub struct RemoteCaptionProvider {
    name: String,
    api_base: String,
    api_key: String,
    prompt: String,
    client: reqwest::Client,
}

impl RemoteCaptionProvider {
    pub fn new(name: String, config: &IngestConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("MARKBASE_CAPTION_API_KEY")
            .map_err(|_| anyhow::anyhow!("MARKBASE_CAPTION_API_KEY is not set"))?;
        let prompt = std::env::var("IMAGE_CAPTION_PROMPT")
            .unwrap_or_else(|_| "Describe this image in markdown.".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.llm_timeout_ms))
            .build()?;

        Ok(Self {
            name,
            api_base: config.caption_api_base.trim_end_matches('/').to_string(),
            api_key,
            prompt,
            client,
        })
    }

    fn mime_for(path: &Path) -> &'static str {
        match crate::fs::probe::extension_of(path).as_str() {
            "png" => "image/png",
            "gif" => "image/gif",
            "bmp" => "image/bmp",
            "webp" => "image/webp",
            "tiff" => "image/tiff",
            _ => "image/jpeg",
        }
    }
}

#[async_trait]
impl CaptionProvider for RemoteCaptionProvider {
    fn label(&self) -> &str {
        &self.name
    }

    async fn convert(&self, path: &Path) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let data_url = format!("data:{};base64,{}", Self::mime_for(path), encoded);

        let body = serde_json::json!({
            "model": self.name,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": self.prompt},
                    {"type": "image_url", "image_url": {"url": data_url}}
                ]
            }]
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let payload: serde_json::Value = response.json().await?;
        let caption = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string();

        if caption.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("# {}\n\n{}\n", title_for(path), caption))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct FailingProvider(&'static str);

    #[async_trait]
    impl CaptionProvider for FailingProvider {
        fn label(&self) -> &str {
            self.0
        }
        async fn convert(&self, _path: &Path) -> anyhow::Result<String> {
            anyhow::bail!("dummy failure")
        }
    }

    struct FixedProvider(&'static str, &'static str);

    #[async_trait]
    impl CaptionProvider for FixedProvider {
        fn label(&self) -> &str {
            self.0
        }
        async fn convert(&self, _path: &Path) -> anyhow::Result<String> {
            Ok(self.1.to_string())
        }
    }

    fn image_converter(primary: &str, chain: &[&str]) -> (ImageConverter, TempDir) {
        let config = IngestConfig {
            image_provider_primary: primary.to_string(),
            image_provider_chain: chain.iter().map(|s| s.to_string()).collect(),
            ..IngestConfig::default()
        };
        (ImageConverter::new(Arc::new(config)), TempDir::new().unwrap())
    }

    fn png_fixture(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("test.png");
        fs::write(&path, b"\x89PNG\r\n\x1a\n").unwrap();
        path
    }

    #[tokio::test]
    async fn chain_falls_through_to_first_success() {
        let (converter, dir) = image_converter("remote-a", &["remote-a", "remote-b"]);
        converter.insert_provider("remote-a", Arc::new(FailingProvider("remote-a")));
        converter.insert_provider("remote-b", Arc::new(FixedProvider("remote-b", "CAPTION OK")));

        let path = png_fixture(&dir);
        let result = converter.handle(&path, "png").await;
        assert!(result.success);
        assert_eq!(result.content.as_deref(), Some("CAPTION OK"));
        assert_eq!(result.conversion_type, Some(ConversionType::ImageToMd));
    }

    #[tokio::test]
    async fn primary_is_prepended_when_chain_omits_it() {
        let (converter, dir) = image_converter("remote-a", &["remote-b"]);
        converter.insert_provider("remote-a", Arc::new(FixedProvider("remote-a", "FROM PRIMARY")));
        converter.insert_provider("remote-b", Arc::new(FixedProvider("remote-b", "FROM CHAIN")));

        let path = png_fixture(&dir);
        let result = converter.handle(&path, "png").await;
        assert_eq!(result.content.as_deref(), Some("FROM PRIMARY"));
    }

    #[tokio::test]
    async fn all_failures_aggregate_every_provider() {
        let (converter, dir) = image_converter("remote-a", &["remote-a", "remote-b", "remote-c"]);
        for name in ["remote-a", "remote-b", "remote-c"] {
            converter.insert_provider(name, Arc::new(FailingProvider("x")));
        }

        let path = png_fixture(&dir);
        let result = converter.handle(&path, "png").await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.starts_with("Image OCR/caption extraction failed:"));
        for name in ["remote-a", "remote-b", "remote-c"] {
            assert!(error.contains(&format!("provider={name}")), "{error}");
        }
    }

    #[tokio::test]
    async fn empty_caption_counts_as_provider_failure() {
        let (converter, dir) = image_converter("remote-a", &["remote-a", "remote-b"]);
        converter.insert_provider("remote-a", Arc::new(FixedProvider("remote-a", "")));
        converter.insert_provider("remote-b", Arc::new(FixedProvider("remote-b", "LATE WIN")));

        let path = png_fixture(&dir);
        let result = converter.handle(&path, "png").await;
        assert_eq!(result.content.as_deref(), Some("LATE WIN"));
    }

    #[test]
    fn provider_order_dedupes_nothing_but_prepends_primary() {
        let (converter, _dir) = image_converter("local", &[]);
        assert_eq!(converter.provider_order(), vec!["local"]);

        let (converter, _dir) = image_converter("remote-a", &["remote-b", "local"]);
        assert_eq!(
            converter.provider_order(),
            vec!["remote-a", "remote-b", "local"]
        );
    }
}
