use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use markbase_model::ConversionType;

use super::{ConversionResult, Converter};

/// Draw.io diagrams: each `<diagram>` page becomes an H1 and its labeled
/// cells become a bullet outline following the cell parent hierarchy.
/// Compressed diagram payloads are rejected with a clear message.
#[derive(Debug)]
pub struct DrawioConverter;

#[async_trait]
impl Converter for DrawioConverter {
    async fn handle(&self, path: &Path, file_type: &str) -> ConversionResult {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) => {
                return ConversionResult::failed(path, file_type, format!("Read drawio failed: {e}"))
            }
        };

        match outline_from_mxfile(&raw) {
            Ok(markdown) => {
                ConversionResult::ok(path, file_type, markdown, ConversionType::DrawioToMd)
            }
            Err(message) => ConversionResult::failed(path, file_type, message),
        }
    }
}

#[derive(Debug, Default)]
struct Cell {
    id: String,
    value: String,
    parent: Option<String>,
}

#[derive(Debug, Default)]
struct Diagram {
    name: String,
    cells: Vec<Cell>,
    saw_graph_model: bool,
    saw_text_payload: bool,
}

fn outline_from_mxfile(raw: &str) -> std::result::Result<String, String> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut diagrams: Vec<Diagram> = Vec::new();
    let mut in_diagram = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"diagram" => {
                    in_diagram = true;
                    diagrams.push(Diagram {
                        name: attr(&e, "name").unwrap_or_else(|| {
                            format!("Diagram {}", diagrams.len() + 1)
                        }),
                        ..Diagram::default()
                    });
                }
                b"mxGraphModel" => {
                    if let Some(diagram) = diagrams.last_mut() {
                        diagram.saw_graph_model = true;
                    }
                }
                b"mxCell" => {
                    if let Some(diagram) = diagrams.last_mut() {
                        let value = attr(&e, "value").unwrap_or_default();
                        let value = strip_markup(&value);
                        if !value.is_empty() {
                            diagram.cells.push(Cell {
                                id: attr(&e, "id").unwrap_or_default(),
                                value,
                                parent: attr(&e, "parent"),
                            });
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"diagram" {
                    in_diagram = false;
                }
            }
            Ok(Event::Text(_)) => {
                // A compressed page stores its model as opaque text.
                if in_diagram {
                    if let Some(diagram) = diagrams.last_mut() {
                        diagram.saw_text_payload = true;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(format!("Parse drawio XML failed: {e}")),
        }
    }

    if diagrams.is_empty() {
        return Err("drawio file has no diagram pages".to_string());
    }

    let mut parts = Vec::new();
    for diagram in &diagrams {
        if !diagram.saw_graph_model && diagram.saw_text_payload {
            return Err(format!(
                "diagram page '{}' is compressed; re-save it uncompressed",
                diagram.name
            ));
        }
        let mut lines = vec![format!("# {}", diagram.name)];
        render_cells(&diagram.cells, &mut lines);
        parts.push(lines.join("\n"));
    }
    Ok(parts.join("\n\n") + "\n")
}

/// Depth-first outline over the cell parent hierarchy. Cells whose parent is
/// not itself a labeled cell (the implicit layer cells "0"/"1") are roots.
fn render_cells(cells: &[Cell], lines: &mut Vec<String>) {
    let labeled: HashMap<&str, &Cell> =
        cells.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut children: HashMap<&str, Vec<&Cell>> = HashMap::new();
    let mut roots: Vec<&Cell> = Vec::new();

    for cell in cells {
        match cell.parent.as_deref().filter(|p| labeled.contains_key(p)) {
            Some(parent) => children.entry(parent).or_default().push(cell),
            None => roots.push(cell),
        }
    }

    fn walk<'a>(
        cell: &'a Cell,
        depth: usize,
        children: &HashMap<&str, Vec<&'a Cell>>,
        lines: &mut Vec<String>,
    ) {
        lines.push(format!("{}- {}", "  ".repeat(depth), cell.value));
        if let Some(kids) = children.get(cell.id.as_str()) {
            for kid in kids {
                walk(kid, depth + 1, children, lines);
            }
        }
    }

    for root in roots {
        walk(root, 0, &children, lines);
    }
}

fn attr(element: &BytesStart<'_>, name: &str) -> Option<String> {
    element.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == name.as_bytes() {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

/// Cell labels may carry inline HTML; drop the tags, keep the text.
fn strip_markup(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_tag = false;
    for ch in value.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"<mxfile host="app.diagrams.net">
      <diagram name="Flow" id="d1">
        <mxGraphModel><root>
          <mxCell id="0"/>
          <mxCell id="1" parent="0"/>
          <mxCell id="2" value="Start" vertex="1" parent="1"/>
          <mxCell id="3" value="&lt;b&gt;Step One&lt;/b&gt;" vertex="1" parent="2"/>
          <mxCell id="4" value="to end" edge="1" parent="1" source="2" target="5"/>
        </root></mxGraphModel>
      </diagram>
    </mxfile>"#;

    #[tokio::test]
    async fn labeled_cells_become_an_outline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flow.drawio");
        fs::write(&path, SAMPLE).unwrap();

        let result = DrawioConverter.handle(&path, "drawio").await;
        assert!(result.success, "{:?}", result.error);
        let md = result.content.unwrap();
        assert!(md.starts_with("# Flow"));
        assert!(md.contains("- Start"));
        assert!(md.contains("  - Step One"));
        assert!(md.contains("- to end"));
        assert_eq!(result.conversion_type, Some(ConversionType::DrawioToMd));
    }

    #[tokio::test]
    async fn compressed_pages_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("packed.drawio");
        fs::write(
            &path,
            r#"<mxfile><diagram name="Packed" id="d1">dVHBcsIgEP0a7k1i1B6</diagram></mxfile>"#,
        )
        .unwrap();

        let result = DrawioConverter.handle(&path, "drawio").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("compressed"));
    }

    #[tokio::test]
    async fn non_xml_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.drawio");
        fs::write(&path, "not xml at all <<<").unwrap();

        let result = DrawioConverter.handle(&path, "drawio").await;
        assert!(!result.success);
    }

    #[test]
    fn markup_stripping_keeps_text() {
        assert_eq!(strip_markup("<div>Hello <b>world</b></div>"), "Hello world");
        assert_eq!(strip_markup("plain"), "plain");
    }
}
