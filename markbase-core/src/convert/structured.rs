use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use markbase_model::ConversionType;

use crate::config::IngestConfig;

use super::exec::{run_with_timeout, stderr_snippet};
use super::{ConversionResult, Converter};

/// Office documents, PDFs, and HTML: delegated to the configured external
/// document-to-markdown converter. Legacy `.doc`/`.ppt` files are
/// pre-converted to their modern equivalents first when a legacy converter
/// is configured. Empty converter output is a failure.
pub struct StructuredConverter {
    config: Arc<IngestConfig>,
    tag: ConversionType,
}

impl std::fmt::Debug for StructuredConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredConverter").field("tag", &self.tag).finish()
    }
}

impl StructuredConverter {
    pub fn new(config: Arc<IngestConfig>, tag: ConversionType) -> Self {
        Self { config, tag }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.probe_timeout_secs)
    }

    /// `.doc` → `.docx`, `.ppt` → `.pptx` via the legacy converter, into a
    /// temp directory owned by the caller.
    async fn pre_convert_legacy(
        &self,
        path: &Path,
        file_type: &str,
        workdir: &Path,
    ) -> std::result::Result<PathBuf, String> {
        let target_ext = match file_type {
            "doc" => "docx",
            "ppt" => "pptx",
            _ => unreachable!("pre_convert_legacy called for {file_type}"),
        };

        let (bin, prefix) = self
            .config
            .legacy_convert_command
            .split_first()
            .ok_or_else(|| "no legacy converter configured".to_string())?;

        let mut command = Command::new(bin);
        command
            .args(prefix)
            .arg(target_ext)
            .arg("--outdir")
            .arg(workdir)
            .arg(path);

        let output = run_with_timeout(command, self.timeout(), "legacy converter").await?;
        if !output.status.success() {
            return Err(format!(
                "legacy conversion failed: {}",
                stderr_snippet(&output)
            ));
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let converted = workdir.join(format!("{stem}.{target_ext}"));
        if !converted.exists() {
            return Err(format!(
                "legacy conversion produced no {target_ext} for {}",
                path.display()
            ));
        }
        Ok(converted)
    }
}

#[async_trait]
impl Converter for StructuredConverter {
    async fn handle(&self, path: &Path, file_type: &str) -> ConversionResult {
        let Some((bin, args)) = self.config.structured_command.split_first() else {
            return ConversionResult::failed(path, file_type, "no structured converter configured");
        };

        let lowered = file_type.to_lowercase();
        let needs_legacy = matches!(lowered.as_str(), "doc" | "ppt")
            && !self.config.legacy_convert_command.is_empty();

        // Holds the pre-converted file alive for the duration of the call.
        let workdir = if needs_legacy {
            match tempfile::tempdir() {
                Ok(dir) => Some(dir),
                Err(e) => {
                    return ConversionResult::failed(
                        path,
                        file_type,
                        format!("Could not create temp dir for legacy conversion: {e}"),
                    )
                }
            }
        } else {
            None
        };

        let input = if let Some(workdir) = &workdir {
            match self.pre_convert_legacy(path, &lowered, workdir.path()).await {
                Ok(converted) => {
                    debug!(
                        "Pre-converted {} to {}",
                        path.display(),
                        converted.display()
                    );
                    converted
                }
                Err(message) => {
                    return ConversionResult::failed(
                        path,
                        file_type,
                        format!("Structured conversion failed: {message}"),
                    )
                }
            }
        } else {
            path.to_path_buf()
        };

        let mut command = Command::new(bin);
        command.args(args).arg(&input);

        let output = match run_with_timeout(command, self.timeout(), "structured converter").await
        {
            Ok(output) => output,
            Err(message) => {
                return ConversionResult::failed(
                    path,
                    file_type,
                    format!("Structured conversion failed: {message}"),
                )
            }
        };

        if !output.status.success() {
            return ConversionResult::failed(
                path,
                file_type,
                format!("Structured conversion failed: {}", stderr_snippet(&output)),
            );
        }

        let markdown = String::from_utf8_lossy(&output.stdout).into_owned();
        if markdown.trim().is_empty() {
            return ConversionResult::failed(
                path,
                file_type,
                format!("Empty structured conversion for {}", path.display()),
            );
        }

        ConversionResult::ok(path, file_type, markdown, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn converter_with(command: Vec<&str>, tag: ConversionType) -> StructuredConverter {
        let config = IngestConfig {
            structured_command: command.into_iter().map(String::from).collect(),
            legacy_convert_command: Vec::new(),
            ..IngestConfig::default()
        };
        StructuredConverter::new(Arc::new(config), tag)
    }

    #[tokio::test]
    async fn converter_stdout_becomes_content() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("report.pdf");
        fs::write(&file, b"%PDF-").unwrap();

        // `cat` stands in for the external converter: echoes the input back.
        let converter = converter_with(vec!["cat"], ConversionType::StructuredToMd);
        let result = converter.handle(&file, "pdf").await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.content.as_deref(), Some("%PDF-"));
        assert_eq!(result.conversion_type, Some(ConversionType::StructuredToMd));
    }

    #[tokio::test]
    async fn empty_output_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("empty.pdf");
        fs::write(&file, b"").unwrap();

        let converter = converter_with(vec!["cat"], ConversionType::StructuredToMd);
        let result = converter.handle(&file, "pdf").await;
        assert!(!result.success);
        assert!(result
            .error
            .unwrap()
            .starts_with("Empty structured conversion"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_failure_value() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("doc.pdf");
        fs::write(&file, b"x").unwrap();

        let converter = converter_with(
            vec!["markbase-test-no-such-binary"],
            ConversionType::StructuredToMd,
        );
        let result = converter.handle(&file, "pdf").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn html_instances_tag_html() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("page.html");
        fs::write(&file, b"<h1>t</h1>").unwrap();

        let converter = converter_with(vec!["cat"], ConversionType::HtmlToMd);
        let result = converter.handle(&file, "html").await;
        assert_eq!(result.conversion_type, Some(ConversionType::HtmlToMd));
    }
}
