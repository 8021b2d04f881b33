use std::path::Path;

use async_trait::async_trait;

use markbase_model::ConversionType;

use super::{title_for, ConversionResult, Converter};

/// Plain text files: titled with the file name, body verbatim.
#[derive(Debug)]
pub struct PlainTextConverter;

#[async_trait]
impl Converter for PlainTextConverter {
    async fn handle(&self, path: &Path, file_type: &str) -> ConversionResult {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let content = format!("# {}\n\n{}", title_for(path), text);
                ConversionResult::ok(path, file_type, content, ConversionType::TextToMd)
            }
            Err(e) => ConversionResult::failed(path, file_type, format!("Read text failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn text_gets_a_title_heading() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, "hello world").unwrap();

        let result = PlainTextConverter.handle(&file, "txt").await;
        assert!(result.success);
        assert_eq!(result.content.as_deref(), Some("# plain.txt\n\nhello world"));
        assert_eq!(result.conversion_type, Some(ConversionType::TextToMd));
    }
}
