use crate::api::SlideApi;
use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use serde_json::json;
use std::io::{Cursor, Read};
use std::path::Path;

pub const NO_TEXT: &str = "<No text>";
const UNNAMED_SHAPE: &str = "Unnamed Shape";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Shape {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Slide {
    pub slide_number: u32,
    pub shapes: Vec<Shape>,
}

/// Slides and top-level shapes of a .pptx file, read straight from the
/// archive's slide XML.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deck {
    pub slides: Vec<Slide>,
}

impl Deck {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_pptx(path)?;
        let bytes = std::fs::read(path).map_err(|e| Error::storage(path, e))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| Error::Presentation(format!("not a .pptx archive: {e}")))?;

        let mut entries: Vec<(u32, String)> = archive
            .file_names()
            .filter_map(|name| slide_number(name).map(|n| (n, name.to_string())))
            .collect();
        entries.sort();

        let mut slides = Vec::with_capacity(entries.len());
        for (position, (_, name)) in entries.iter().enumerate() {
            let mut xml = String::new();
            archive
                .by_name(name)
                .map_err(|e| Error::Presentation(format!("{name}: {e}")))?
                .read_to_string(&mut xml)
                .map_err(|e| Error::Presentation(format!("{name}: {e}")))?;
            slides.push(Slide {
                slide_number: position as u32 + 1,
                shapes: parse_shapes(&xml).map_err(|e| Error::Presentation(format!("{name}: {e}")))?,
            });
        }
        tracing::debug!(slides = slides.len(), "presentation parsed");
        Ok(Self { slides })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&json!({ "presentation": self.slides }))
            .map_err(|e| Error::Presentation(e.to_string()))
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let mut text = self.to_json()?;
        text.push('\n');
        std::fs::write(path, text).map_err(|e| Error::storage(path, e))
    }

    pub fn has_shape(&self, name: &str) -> bool {
        self.slides
            .iter()
            .flat_map(|s| &s.shapes)
            .any(|shape| shape.name == name)
    }
}

/// The edit endpoint only takes PowerPoint files.
pub fn ensure_pptx(path: &Path) -> Result<()> {
    let is_pptx = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pptx"));
    if is_pptx {
        Ok(())
    } else {
        Err(Error::Presentation(format!(
            "Only .pptx files are supported: {}",
            path.display()
        )))
    }
}

/// Loads a deck from a local path or, for http(s) sources, through the API
/// client's file download.
pub async fn load<A>(api: &A, source: &str) -> Result<Deck>
where
    A: SlideApi + ?Sized,
{
    if source.starts_with("http://") || source.starts_with("https://") {
        let bytes = api.fetch_file(source).await?;
        Deck::from_bytes(&bytes)
    } else {
        Deck::open(Path::new(source))
    }
}

fn slide_number(entry: &str) -> Option<u32> {
    entry
        .strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

/// Walks one slide's shape tree. Only direct children of `spTree` count as
/// shapes; text is taken from a shape's own `txBody`, one entry per `a:p`.
fn parse_shapes(xml: &str) -> std::result::Result<Vec<Shape>, String> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<String> = Vec::new();
    let mut shapes: Vec<(String, Vec<String>)> = Vec::new();
    // Stack index of the shape element currently being read.
    let mut shape_depth: Option<usize> = None;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => {
                open_element(&e, &stack, &mut shapes, &mut shape_depth)?;
                stack.push(local_name(&e));
            }
            Event::Empty(e) => {
                open_element(&e, &stack, &mut shapes, &mut shape_depth)?;
                if shape_depth == Some(stack.len()) {
                    shape_depth = None;
                }
            }
            Event::End(_) => {
                stack.pop();
                if shape_depth == Some(stack.len()) {
                    shape_depth = None;
                }
            }
            Event::Text(t) => {
                let in_run_text = stack.last().is_some_and(|n| n == "t");
                if in_run_text && in_own_text_body(&stack, shape_depth) {
                    let text = t.unescape().map_err(|e| e.to_string())?;
                    if let Some(paragraph) = shapes.last_mut().and_then(|(_, p)| p.last_mut()) {
                        paragraph.push_str(&text);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(shapes
        .into_iter()
        .map(|(name, paragraphs)| {
            let text = paragraphs.join("\n");
            let text = text.trim();
            Shape {
                name,
                content: if text.is_empty() {
                    NO_TEXT.to_string()
                } else {
                    text.to_string()
                },
            }
        })
        .collect())
}

fn open_element(
    e: &BytesStart<'_>,
    ancestors: &[String],
    shapes: &mut Vec<(String, Vec<String>)>,
    shape_depth: &mut Option<usize>,
) -> std::result::Result<(), String> {
    let name = local_name(e);
    let parent = ancestors.last().map(String::as_str);

    if parent == Some("spTree") && !matches!(name.as_str(), "nvGrpSpPr" | "grpSpPr" | "extLst") {
        shapes.push((UNNAMED_SHAPE.to_string(), Vec::new()));
        *shape_depth = Some(ancestors.len());
        return Ok(());
    }

    let Some(depth) = *shape_depth else {
        return Ok(());
    };
    match name.as_str() {
        // shape > nvSpPr > cNvPr
        "cNvPr" if ancestors.len() == depth + 2 => {
            let attr = e.try_get_attribute("name").map_err(|e| e.to_string())?;
            if let (Some(attr), Some(shape)) = (attr, shapes.last_mut()) {
                let value = attr.unescape_value().map_err(|e| e.to_string())?;
                if !value.is_empty() {
                    shape.0 = value.into_owned();
                }
            }
        }
        "p" if parent == Some("txBody") && ancestors.len() == depth + 2 => {
            if let Some(shape) = shapes.last_mut() {
                shape.1.push(String::new());
            }
        }
        "br" if in_own_text_body(ancestors, *shape_depth) => {
            if let Some(paragraph) = shapes.last_mut().and_then(|(_, p)| p.last_mut()) {
                paragraph.push('\n');
            }
        }
        _ => {}
    }
    Ok(())
}

fn in_own_text_body(stack: &[String], shape_depth: Option<usize>) -> bool {
    shape_depth.is_some_and(|depth| stack.get(depth + 1).is_some_and(|n| n == "txBody"))
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}
