use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use markbase_model::ConversionType;

use crate::config::IngestConfig;
use crate::convert::{
    code::CodeConverter, drawio::DrawioConverter, image::ImageConverter,
    native::NativeMarkdownConverter, structured::StructuredConverter, text::PlainTextConverter,
    video::VideoConverter, xmind::XmindConverter, ConversionResult, Converter,
};

/// Dispatch table from lowercased extension to converter handler.
///
/// Built once per process from the configuration's category lists and shared
/// read-only afterwards. Registration is idempotent: a later registration
/// for the same extension overwrites the earlier one.
pub struct ConverterRegistry {
    handlers: HashMap<String, Arc<dyn Converter>>,
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("extensions", &self.known_extensions())
            .finish()
    }
}

impl ConverterRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Build the full dispatch table from the configuration's category lists.
    pub fn from_config(config: &Arc<IngestConfig>) -> Self {
        let mut registry = Self::empty();

        let mappings: Vec<(&[String], Arc<dyn Converter>)> = vec![
            (
                &config.native_markdown_types,
                Arc::new(NativeMarkdownConverter),
            ),
            (&config.plain_text_types, Arc::new(PlainTextConverter)),
            (&config.code_types, Arc::new(CodeConverter)),
            (
                &config.structured_types,
                Arc::new(StructuredConverter::new(
                    config.clone(),
                    ConversionType::StructuredToMd,
                )),
            ),
            (
                &config.html_types,
                Arc::new(StructuredConverter::new(
                    config.clone(),
                    ConversionType::HtmlToMd,
                )),
            ),
            (&config.xmind_types, Arc::new(XmindConverter)),
            (&config.image_types, Arc::new(ImageConverter::new(config.clone()))),
            (&config.video_types, Arc::new(VideoConverter::new(config.clone()))),
            (&config.diagram_types, Arc::new(DrawioConverter)),
        ];

        for (extensions, handler) in mappings {
            registry.register(extensions, handler);
        }

        debug!(
            "Converter registry built with {} extensions",
            registry.handlers.len()
        );
        registry
    }

    pub fn register(&mut self, extensions: &[String], handler: Arc<dyn Converter>) {
        for ext in extensions {
            self.handlers.insert(ext.to_lowercase(), handler.clone());
        }
    }

    pub fn get_handler(&self, ext: &str) -> Option<Arc<dyn Converter>> {
        self.handlers.get(&ext.to_lowercase()).cloned()
    }

    pub fn known_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self.handlers.keys().cloned().collect();
        extensions.sort();
        extensions
    }

    /// Dispatch one file to its handler. Unknown extensions produce a failed
    /// result, never an error.
    pub async fn convert(&self, path: &Path, file_type: &str) -> ConversionResult {
        match self.get_handler(file_type) {
            Some(handler) => handler.handle(path, file_type).await,
            None => ConversionResult::failed(
                path,
                file_type,
                format!("Unsupported file type: {file_type}"),
            ),
        }
    }
}
