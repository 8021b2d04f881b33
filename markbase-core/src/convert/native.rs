use std::path::Path;

use async_trait::async_trait;

use markbase_model::ConversionType;

use super::{ConversionResult, Converter};

/// Files that already are markdown: stored verbatim.
#[derive(Debug)]
pub struct NativeMarkdownConverter;

#[async_trait]
impl Converter for NativeMarkdownConverter {
    async fn handle(&self, path: &Path, file_type: &str) -> ConversionResult {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes).into_owned();
                ConversionResult::ok(path, file_type, content, ConversionType::Direct)
            }
            Err(e) => ConversionResult::failed(path, file_type, format!("Read markdown failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn markdown_is_returned_verbatim() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("note.md");
        fs::write(&file, "# Title\n\nBody.").unwrap();

        let result = NativeMarkdownConverter.handle(&file, "md").await;
        assert!(result.success);
        assert_eq!(result.content.as_deref(), Some("# Title\n\nBody."));
        assert_eq!(result.conversion_type, Some(ConversionType::Direct));
    }

    #[tokio::test]
    async fn invalid_utf8_is_read_lossily() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("note.md");
        fs::write(&file, [b'o', b'k', 0xFF, b'!']).unwrap();

        let result = NativeMarkdownConverter.handle(&file, "md").await;
        assert!(result.success);
        assert_eq!(result.content.as_deref(), Some("ok\u{FFFD}!"));
    }

    #[tokio::test]
    async fn missing_file_fails_with_cause() {
        let result = NativeMarkdownConverter
            .handle(Path::new("/no/such/note.md"), "md")
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Read markdown failed:"));
    }
}
