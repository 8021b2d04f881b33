use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;

use markbase_model::ConversionType;

use super::{ConversionResult, Converter};

/// XMind mind maps: zip containers holding `content.json` (modern) or
/// `content.xml` (classic). The root topic of each sheet becomes an H1 and
/// nested topics become bullet lists indented two spaces per level.
#[derive(Debug)]
pub struct XmindConverter;

#[async_trait]
impl Converter for XmindConverter {
    async fn handle(&self, path: &Path, file_type: &str) -> ConversionResult {
        let owned: PathBuf = path.to_path_buf();
        let outcome =
            tokio::task::spawn_blocking(move || extract_outline(&owned)).await;

        match outcome {
            Ok(Ok(markdown)) => {
                ConversionResult::ok(path, file_type, markdown, ConversionType::XmindToMd)
            }
            Ok(Err(message)) => ConversionResult::failed(path, file_type, message),
            Err(e) => ConversionResult::failed(
                path,
                file_type,
                format!("XMind conversion task failed: {e}"),
            ),
        }
    }
}

fn extract_outline(path: &Path) -> std::result::Result<String, String> {
    let file = std::fs::File::open(path)
        .map_err(|e| format!("Open xmind failed: {e}"))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| format!("Not a valid xmind archive: {e}"))?;

    if let Ok(mut entry) = archive.by_name("content.json") {
        let mut raw = String::new();
        entry
            .read_to_string(&mut raw)
            .map_err(|e| format!("Read content.json failed: {e}"))?;
        return outline_from_json(&raw);
    }

    if let Ok(mut entry) = archive.by_name("content.xml") {
        let mut raw = String::new();
        entry
            .read_to_string(&mut raw)
            .map_err(|e| format!("Read content.xml failed: {e}"))?;
        return outline_from_xml(&raw);
    }

    Err("XMind archive has neither content.json nor content.xml".to_string())
}

fn outline_from_json(raw: &str) -> std::result::Result<String, String> {
    let sheets: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("Parse content.json failed: {e}"))?;
    let sheets = sheets
        .as_array()
        .ok_or_else(|| "content.json is not a sheet list".to_string())?;

    let mut parts = Vec::new();
    for sheet in sheets {
        if let Some(root) = sheet.get("rootTopic") {
            let mut lines = Vec::new();
            render_json_topic(root, 0, &mut lines);
            if !lines.is_empty() {
                parts.push(lines.join("\n"));
            }
        }
    }

    if parts.is_empty() {
        return Err("XMind content has no topics".to_string());
    }
    Ok(parts.join("\n\n") + "\n")
}

fn render_json_topic(topic: &serde_json::Value, depth: usize, lines: &mut Vec<String>) {
    let title = topic
        .get("title")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .trim();
    if !title.is_empty() {
        lines.push(outline_line(depth, title));
    }

    let children = topic
        .get("children")
        .and_then(|c| c.get("attached"))
        .and_then(|a| a.as_array());
    if let Some(children) = children {
        for child in children {
            render_json_topic(child, depth + 1, lines);
        }
    }
}

fn outline_from_xml(raw: &str) -> std::result::Result<String, String> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut lines: Vec<String> = Vec::new();
    let mut topic_depth = 0usize;
    // Set when the parser is inside a <title> that belongs to a topic.
    let mut title_depth: Option<usize> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"topic" => topic_depth += 1,
                b"title" if topic_depth > 0 => title_depth = Some(topic_depth),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"topic" => topic_depth = topic_depth.saturating_sub(1),
                b"title" => title_depth = None,
                _ => {}
            },
            Ok(Event::Text(text)) => {
                if let Some(depth) = title_depth {
                    let title = text
                        .unescape()
                        .map_err(|e| format!("Decode topic title failed: {e}"))?;
                    let title = title.trim();
                    if !title.is_empty() {
                        lines.push(outline_line(depth - 1, title));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(format!("Parse content.xml failed: {e}")),
        }
    }

    if lines.is_empty() {
        return Err("XMind content has no topics".to_string());
    }
    Ok(lines.join("\n") + "\n")
}

/// Depth 0 is the sheet's root topic (H1); deeper topics are bullets
/// indented two spaces per level below the first.
fn outline_line(depth: usize, title: &str) -> String {
    if depth == 0 {
        format!("# {title}")
    } else {
        format!("{}- {}", "  ".repeat(depth - 1), title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_xmind(path: &Path, entry: &str, body: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file(entry, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body.as_bytes()).unwrap();
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn minimal_json_map_becomes_an_outline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("map.xmind");
        write_xmind(
            &path,
            "content.json",
            r#"[{
                "id": "sheet-1",
                "title": "Sheet 1",
                "rootTopic": {
                    "title": "Root Topic",
                    "children": {"attached": [
                        {"title": "Child A", "children": {"attached": [{"title": "Leaf"}]}},
                        {"title": "Child B"}
                    ]}
                }
            }]"#,
        );

        let result = XmindConverter.handle(&path, "xmind").await;
        assert!(result.success, "{:?}", result.error);
        let md = result.content.unwrap();
        assert!(md.starts_with("# Root Topic"));
        assert!(md.contains("- Child A"));
        assert!(md.contains("  - Leaf"));
        assert!(md.contains("- Child B"));
        assert_eq!(result.conversion_type, Some(ConversionType::XmindToMd));
    }

    #[tokio::test]
    async fn classic_xml_map_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("classic.xmind");
        write_xmind(
            &path,
            "content.xml",
            r#"<?xml version="1.0"?>
            <xmap-content>
              <sheet>
                <topic><title>Root</title>
                  <children><topics type="attached">
                    <topic><title>First</title></topic>
                    <topic><title>Second</title></topic>
                  </topics></children>
                </topic>
              </sheet>
            </xmap-content>"#,
        );

        let result = XmindConverter.handle(&path, "xmind").await;
        assert!(result.success, "{:?}", result.error);
        let md = result.content.unwrap();
        assert!(md.starts_with("# Root"));
        assert!(md.contains("- First"));
        assert!(md.contains("- Second"));
    }

    #[tokio::test]
    async fn archive_without_content_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.xmind");
        write_xmind(&path, "metadata.json", "{}");

        let result = XmindConverter.handle(&path, "xmind").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("neither content.json"));
    }

    #[tokio::test]
    async fn non_zip_file_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.xmind");
        std::fs::write(&path, b"not a zip").unwrap();

        let result = XmindConverter.handle(&path, "xmind").await;
        assert!(!result.success);
    }
}
