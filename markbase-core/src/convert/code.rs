use std::path::Path;

use async_trait::async_trait;

use markbase_model::ConversionType;

use super::{title_for, ConversionResult, Converter};

/// Source files: fenced code block with the extension as language hint.
#[derive(Debug)]
pub struct CodeConverter;

#[async_trait]
impl Converter for CodeConverter {
    async fn handle(&self, path: &Path, file_type: &str) -> ConversionResult {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let lang = file_type.to_lowercase();
                let content = format!("# {}\n\n```{}\n{}\n```", title_for(path), lang, text);
                ConversionResult::ok(path, file_type, content, ConversionType::CodeToMd)
            }
            Err(e) => ConversionResult::failed(path, file_type, format!("Read code failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn code_is_fenced_with_language_hint() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("query.SQL");
        fs::write(&file, "SELECT 1;").unwrap();

        let result = CodeConverter.handle(&file, "SQL").await;
        assert!(result.success);
        let content = result.content.unwrap();
        assert!(content.starts_with("# query.SQL\n\n```sql\n"));
        assert!(content.contains("SELECT 1;"));
        assert!(content.trim_end().ends_with("```"));
        assert_eq!(result.conversion_type, Some(ConversionType::CodeToMd));
    }
}
