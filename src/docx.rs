//! DOCX to PDF: paragraph text and headings from `word/document.xml`, set in
//! the built-in Helvetica faces.

use anyhow::{Context, Result};
use lopdf::content::Operation;
use lopdf::{dictionary, Object, StringFormat};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, info};

use crate::error::Error;
use crate::layout::{Orientation, PageSize};
use crate::metrics::{encode_win_ansi, Font};
use crate::pdf::{self, Metadata, PageTreeBuilder};

const DOCUMENT_XML: &str = "word/document.xml";
const CORE_XML: &str = "docProps/core.xml";
const LINE_SPACING: f32 = 1.2;
const PARAGRAPH_SPACING: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct DocxLayout {
    pub page_size: PageSize,
    /// `Auto` is treated as portrait
    pub orientation: Orientation,
    pub margin: f32,
    pub font_size: f32,
}

impl Default for DocxLayout {
    fn default() -> Self {
        Self {
            page_size: PageSize::A4,
            orientation: Orientation::Portrait,
            margin: 72.0,
            font_size: 11.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParagraphStyle {
    #[default]
    Body,
    Title,
    /// Heading1 to Heading6
    Heading(u8),
}

impl ParagraphStyle {
    fn from_style_id(id: &str) -> Self {
        if id.eq_ignore_ascii_case("title") {
            return ParagraphStyle::Title;
        }
        let level = id
            .strip_prefix("Heading")
            .or_else(|| id.strip_prefix("heading"))
            .and_then(|n| n.parse::<u8>().ok());
        match level {
            Some(n @ 1..=6) => ParagraphStyle::Heading(n),
            _ => ParagraphStyle::Body,
        }
    }

    fn scale(self) -> f32 {
        match self {
            ParagraphStyle::Body => 1.0,
            ParagraphStyle::Title => 2.0,
            ParagraphStyle::Heading(1) => 1.6,
            ParagraphStyle::Heading(2) => 1.4,
            ParagraphStyle::Heading(3) => 1.25,
            ParagraphStyle::Heading(4) => 1.15,
            ParagraphStyle::Heading(_) => 1.0,
        }
    }

    fn font(self) -> Font {
        match self {
            ParagraphStyle::Body => Font::Helvetica,
            _ => Font::HelveticaBold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// one paragraph; `\n` marks a manual line break
    Paragraph { style: ParagraphStyle, text: String },
    PageBreak,
}

fn attr_value(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// paragraph structure of a WordprocessingML body
pub fn parse_document_xml(xml: &str) -> Result<Vec<Block>> {
    let mut reader = Reader::from_str(xml);
    let mut blocks = Vec::new();
    let mut in_paragraph = false;
    let mut in_text = false;
    let mut style = ParagraphStyle::Body;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .with_context(|| format!("Malformed XML at byte {}", reader.buffer_position()))?;
        match event {
            Event::Start(e) if e.local_name().as_ref() == b"p" && !in_paragraph => {
                in_paragraph = true;
                style = ParagraphStyle::Body;
                text.clear();
            }
            Event::Empty(e) if e.local_name().as_ref() == b"p" && !in_paragraph => {
                blocks.push(Block::Paragraph {
                    style: ParagraphStyle::Body,
                    text: String::new(),
                });
            }
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) if e.local_name().as_ref() == b"t" => in_text = false,
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"pStyle" if in_paragraph => {
                    if let Some(id) = attr_value(&e, b"val") {
                        style = ParagraphStyle::from_style_id(&id);
                    }
                }
                b"tab" if in_paragraph => text.push(' '),
                b"br" | b"cr" if in_paragraph => {
                    if attr_value(&e, b"type").as_deref() == Some("page") {
                        blocks.push(Block::Paragraph {
                            style,
                            text: std::mem::take(&mut text),
                        });
                        blocks.push(Block::PageBreak);
                    } else {
                        text.push('\n');
                    }
                }
                _ => {}
            },
            Event::Text(t) if in_text => {
                let s = t.unescape().context("Bad text escape")?;
                text.push_str(&s);
            }
            Event::End(e) if e.local_name().as_ref() == b"p" && in_paragraph => {
                in_paragraph = false;
                blocks.push(Block::Paragraph {
                    style,
                    text: std::mem::take(&mut text),
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(blocks)
}

fn read_entry(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("Missing {}", name))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .with_context(|| format!("Failed to read {}", name))?;
    Ok(xml)
}

/// `dc:title` from the package properties, when set
fn core_title(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut in_title = false;
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) if e.local_name().as_ref() == b"title" => in_title = true,
            Event::Text(t) if in_title => {
                let title = t.unescape().ok()?.trim().to_string();
                return (!title.is_empty()).then_some(title);
            }
            Event::End(_) if in_title => return None,
            Event::Eof => return None,
            _ => {}
        }
    }
}

/// break `line` into pieces no wider than `max_width`; a word wider than the
/// whole line is cut between characters
pub fn wrap_line(line: &str, font: Font, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if font.text_width(&candidate, size) <= max_width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if font.text_width(word, size) <= max_width {
            current = word.to_string();
            continue;
        }
        for c in word.chars() {
            current.push(c);
            if font.text_width(&current, size) > max_width && current.chars().count() > 1 {
                current.pop();
                lines.push(std::mem::take(&mut current));
                current.push(c);
            }
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// lays lines onto pages top to bottom
struct Typesetter {
    builder: PageTreeBuilder,
    resources: Object,
    width: f32,
    height: f32,
    margin: f32,
    cursor: f32,
    lines_on_page: usize,
    ops: Vec<Operation>,
}

impl Typesetter {
    fn top(&self) -> f32 {
        self.height - self.margin
    }

    fn flush_page(&mut self) -> Result<()> {
        let ops = std::mem::take(&mut self.ops);
        self.builder
            .add_page(self.width, self.height, ops, self.resources.clone())?;
        self.cursor = self.top();
        self.lines_on_page = 0;
        Ok(())
    }

    fn line(&mut self, text: &str, font: Font, size: f32) -> Result<()> {
        let advance = size * LINE_SPACING;
        // an oversized line still gets a page of its own
        if self.cursor - advance < self.margin && self.lines_on_page > 0 {
            self.flush_page()?;
        }
        let resource = match font {
            Font::Helvetica => "F1",
            Font::HelveticaBold => "F2",
        };
        let baseline = self.cursor - size;
        if !text.is_empty() {
            self.ops.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![resource.into(), Object::Real(size)]),
                Operation::new("Td", vec![Object::Real(self.margin), Object::Real(baseline)]),
                Operation::new(
                    "Tj",
                    vec![Object::String(encode_win_ansi(text), StringFormat::Literal)],
                ),
                Operation::new("ET", vec![]),
            ]);
        }
        self.lines_on_page += 1;
        self.cursor -= advance;
        Ok(())
    }
}

fn page_dimensions(layout: &DocxLayout) -> (f32, f32) {
    let (w, h) = layout.page_size.dimensions_pt();
    match layout.orientation {
        Orientation::Landscape => (h, w),
        Orientation::Portrait | Orientation::Auto => (w, h),
    }
}

/// typeset `blocks` and return the finished PDF
pub fn render_blocks(blocks: &[Block], layout: &DocxLayout, meta: &Metadata) -> Result<Vec<u8>> {
    anyhow::ensure!(
        layout.font_size.is_finite() && layout.font_size > 0.0,
        "Font size must be positive"
    );
    let (width, height) = page_dimensions(layout);
    let text_width = width - 2.0 * layout.margin;
    if !layout.margin.is_finite()
        || layout.margin < 0.0
        || text_width <= 0.0
        || height - 2.0 * layout.margin <= 0.0
    {
        return Err(Error::MarginTooLarge {
            margin: layout.margin,
            page_width: width,
            page_height: height,
        }
        .into());
    }

    let mut builder = PageTreeBuilder::new();
    let resources_id = builder.doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => Font::Helvetica.dictionary(),
            "F2" => Font::HelveticaBold.dictionary(),
        },
    });
    let mut setter = Typesetter {
        builder,
        resources: resources_id.into(),
        width,
        height,
        margin: layout.margin,
        cursor: height - layout.margin,
        lines_on_page: 0,
        ops: Vec::new(),
    };

    for block in blocks {
        match block {
            Block::PageBreak => setter.flush_page()?,
            Block::Paragraph { style, text } => {
                let size = layout.font_size * style.scale();
                let font = style.font();
                for line in text.split('\n') {
                    for piece in wrap_line(line, font, size, text_width) {
                        setter.line(&piece, font, size)?;
                    }
                }
                setter.cursor -= layout.font_size * PARAGRAPH_SPACING;
            }
        }
    }
    // a closing page break still opens a final blank page
    let trailing_break = matches!(blocks.last(), Some(Block::PageBreak));
    if setter.lines_on_page > 0 || trailing_break || setter.builder.page_count() == 0 {
        setter.flush_page()?;
    }
    debug!(pages = setter.builder.page_count(), "typeset");
    setter.builder.finish(meta)
}

/// convert DOCX bytes to a PDF of its text
pub fn docx_to_pdf(bytes: &[u8], layout: &DocxLayout, meta: &Metadata) -> Result<Vec<u8>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Not a DOCX (zip) file")?;
    let xml = read_entry(&mut archive, DOCUMENT_XML)?;
    let blocks = parse_document_xml(&xml).context("Failed to parse word/document.xml")?;
    debug!(blocks = blocks.len(), "parsed document");

    let mut meta = meta.clone();
    if meta.title.is_none() {
        meta.title = read_entry(&mut archive, CORE_XML)
            .ok()
            .and_then(|xml| core_title(&xml));
    }
    render_blocks(&blocks, layout, &meta)
}

pub fn docx_file(input: &Path, layout: &DocxLayout, meta: &Metadata, output: &Path) -> Result<()> {
    let bytes = pdf::read_input(input)?;
    info!("Converting {} -> {}", input.display(), output.display());
    let start = std::time::Instant::now();
    let out = docx_to_pdf(&bytes, layout, meta)
        .with_context(|| format!("Failed to convert {}", input.display()))?;
    let pages = pdf::page_count(&out)?;
    pdf::write_output(&out, output)?;
    info!(
        "Done. {} page{} in {:.2}s",
        pages,
        if pages == 1 { "" } else { "s" },
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
