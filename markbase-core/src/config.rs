use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Source that produced the ingest configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IngestConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Top-level ingestion settings: which extensions map to which converter
/// category, what the scanner prunes, and how the image provider chain and
/// external tools are driven.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory names pruned during scans. Exact matches only; directories
    /// whose name ends in `.assets` are always pruned in addition.
    pub excluded_dirs: Vec<String>,
    /// File extensions (no dot) dropped during scans before dispatch.
    pub excluded_file_extensions: Vec<String>,

    /// Extensions stored verbatim as markdown.
    pub native_markdown_types: Vec<String>,
    /// Extensions read as plain text and titled.
    pub plain_text_types: Vec<String>,
    /// Extensions wrapped in fenced code blocks.
    pub code_types: Vec<String>,
    /// Extensions handed to the external structured converter.
    pub structured_types: Vec<String>,
    /// XMind mind-map extensions.
    pub xmind_types: Vec<String>,
    /// Image extensions routed through the caption provider chain.
    pub image_types: Vec<String>,
    /// Video extensions probed for container metadata.
    pub video_types: Vec<String>,
    /// HTML extensions (structured conversion with their own tag).
    pub html_types: Vec<String>,
    /// Draw.io diagram extensions.
    pub diagram_types: Vec<String>,

    /// First caption provider tried for images.
    pub image_provider_primary: String,
    /// Ordered fallback providers; the primary is prepended when absent.
    pub image_provider_chain: Vec<String>,
    /// Language set passed to the tesseract CLI, e.g. `eng` or `chi_sim+eng`.
    pub tesseract_lang: String,
    /// Emit YAML front matter from the local OCR provider.
    pub enable_image_front_matter: bool,
    /// Timeout for remote caption calls, in milliseconds.
    pub llm_timeout_ms: u64,
    /// Base URL of the OpenAI-compatible captioning endpoint used by remote
    /// providers. The API key comes from `MARKBASE_CAPTION_API_KEY`.
    pub caption_api_base: String,

    /// Upper bound on concurrent conversions within one session.
    pub worker_pool_size: usize,
    /// Events retained per session for late-subscriber replay.
    pub session_history_capacity: usize,
    /// Seconds a finished session stays available for reconnects.
    pub session_grace_seconds: u64,

    /// Argv prefix of the external document-to-markdown converter.
    pub structured_command: Vec<String>,
    /// Argv prefix used to pre-convert legacy `.doc`/`.ppt` files; empty
    /// disables pre-conversion and the structured converter sees the
    /// original file.
    pub legacy_convert_command: Vec<String>,
    /// ffprobe binary used for video container metadata.
    pub ffprobe_bin: String,
    /// tesseract binary used by the local OCR provider.
    pub tesseract_bin: String,
    /// Timeout for external tool invocations, in seconds.
    pub probe_timeout_secs: u64,

    /// Provenance label for plain local files.
    pub source_local_fs: String,
    /// Root under which externally-deposited files carry a per-directory
    /// source label.
    pub downloads_root: Option<PathBuf>,
    /// Prefix combined with the immediate child directory name under
    /// `downloads_root` to form the source label.
    pub download_source_prefix: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        fn list(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        Self {
            excluded_dirs: list(&[".git", "node_modules", "__pycache__", ".venv", "target"]),
            excluded_file_extensions: list(&["tmp", "bak", "swp"]),
            native_markdown_types: list(&["md"]),
            plain_text_types: list(&["txt", "log"]),
            code_types: list(&[
                "sql", "py", "rs", "js", "ts", "sh", "java", "c", "cpp", "go", "rb", "css",
            ]),
            structured_types: list(&["pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "csv"]),
            xmind_types: list(&["xmind"]),
            image_types: list(&["png", "jpg", "jpeg", "bmp", "gif", "webp", "tiff"]),
            video_types: list(&["mp4", "mov", "mkv", "avi", "webm", "m4v"]),
            html_types: list(&["html", "htm"]),
            diagram_types: list(&["drawio"]),
            image_provider_primary: "local".to_string(),
            image_provider_chain: Vec::new(),
            tesseract_lang: "eng".to_string(),
            enable_image_front_matter: true,
            llm_timeout_ms: 60_000,
            caption_api_base: "https://api.openai.com/v1".to_string(),
            worker_pool_size: 4,
            session_history_capacity: 1_000,
            session_grace_seconds: 300,
            structured_command: vec!["markitdown".to_string()],
            legacy_convert_command: vec![
                "libreoffice".to_string(),
                "--headless".to_string(),
                "--convert-to".to_string(),
            ],
            ffprobe_bin: "ffprobe".to_string(),
            tesseract_bin: "tesseract".to_string(),
            probe_timeout_secs: 60,
            source_local_fs: "local_fs".to_string(),
            downloads_root: None,
            download_source_prefix: "公众号_".to_string(),
        }
    }
}

impl IngestConfig {
    /// Load configuration overrides using environment variables.
    /// Evaluation order:
    /// 1) `$MARKBASE_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$MARKBASE_CONFIG_JSON` (inline JSON),
    /// 3) `markbase.toml` / `config/markbase.toml` in the working directory,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, IngestConfigSource)> {
        if let Ok(path_str) = env::var("MARKBASE_CONFIG_PATH") {
            if !path_str.trim().is_empty() {
                let path = PathBuf::from(path_str);
                let config = Self::load_from_file(&path)?;
                return Ok((config, IngestConfigSource::EnvPath(path)));
            }
        }

        if let Ok(raw) = env::var("MARKBASE_CONFIG_JSON") {
            if !raw.trim().is_empty() {
                let parsed = serde_json::from_str(&raw)
                    .context("failed to parse MARKBASE_CONFIG_JSON")?;
                return Ok((parsed, IngestConfigSource::EnvInline));
            }
        }

        if let Some(path) = Self::find_default_file() {
            let config = Self::load_from_file(&path)?;
            return Ok((config, IngestConfigSource::File(path)));
        }

        Ok((Self::default(), IngestConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read ingest config from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)
                .with_context(|| format!("invalid ingest config {}", path.display())),
            _ => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid ingest config {}: {}", path.display(), err)
            }),
        }
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &["markbase.toml", "config/markbase.toml"];

        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_path_buf())
    }

    /// Every extension any converter category claims, lowercased. Used as
    /// the scanner's allow-list when the caller does not supply one.
    pub fn supported_extensions(&self) -> Vec<String> {
        let mut all: Vec<String> = [
            &self.native_markdown_types,
            &self.plain_text_types,
            &self.code_types,
            &self.structured_types,
            &self.xmind_types,
            &self.image_types,
            &self.video_types,
            &self.html_types,
            &self.diagram_types,
        ]
        .iter()
        .flat_map(|list| list.iter().map(|ext| ext.to_lowercase()))
        .collect();
        all.sort();
        all.dedup();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_category() {
        let config = IngestConfig::default();
        let supported = config.supported_extensions();
        for ext in ["md", "txt", "py", "pdf", "xmind", "png", "mp4", "html", "drawio"] {
            assert!(supported.contains(&ext.to_string()), "missing {ext}");
        }
    }

    #[test]
    fn supported_extensions_are_deduplicated_and_lowercase() {
        let mut config = IngestConfig::default();
        config.plain_text_types.push("TXT".to_string());
        let supported = config.supported_extensions();
        assert_eq!(
            supported.iter().filter(|e| e.as_str() == "txt").count(),
            1
        );
    }

    #[test]
    fn toml_config_parses_partial_overrides() {
        let parsed: IngestConfig = toml::from_str(
            r#"
            worker_pool_size = 8
            tesseract_lang = "chi_sim+eng"
            image_provider_chain = ["openai", "local"]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.worker_pool_size, 8);
        assert_eq!(parsed.tesseract_lang, "chi_sim+eng");
        assert_eq!(parsed.image_provider_chain, vec!["openai", "local"]);
        assert_eq!(parsed.native_markdown_types, vec!["md"]);
    }
}
