use anyhow::{Context, Result};
use clap::ValueEnum;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;
use tracing::{debug, info};

use crate::metrics::{encode_win_ansi, Font};
use crate::pdf;
use crate::rotate::select_pages;

const FONT_RESOURCE: &str = "QuireNum";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Position {
    TopLeft,
    TopCenter,
    TopRight,
    BottomLeft,
    #[default]
    BottomCenter,
    BottomRight,
}

#[derive(Debug, Clone)]
pub struct NumberingOptions {
    pub position: Position,
    /// `{n}` displayed number, `{total}` last displayed number, `{page}`
    /// physical page
    pub format: String,
    pub start: u32,
    pub font_size: f32,
    pub margin: f32,
    /// page range expression; None numbers every page
    pub pages: Option<String>,
}

impl Default for NumberingOptions {
    fn default() -> Self {
        Self {
            position: Position::default(),
            format: "{n}".to_string(),
            start: 1,
            font_size: 12.0,
            margin: 30.0,
            pages: None,
        }
    }
}

pub fn render_label(format: &str, n: u32, total: u32, page: usize) -> String {
    format
        .replace("{n}", &n.to_string())
        .replace("{total}", &total.to_string())
        .replace("{page}", &page.to_string())
}

/// baseline origin for `label` inside `page_box`
fn label_origin(position: Position, page_box: [f32; 4], width: f32, size: f32, margin: f32) -> (f32, f32) {
    let [x0, y0, x1, y1] = page_box;
    let x = match position {
        Position::TopLeft | Position::BottomLeft => x0 + margin,
        Position::TopCenter | Position::BottomCenter => x0 + (x1 - x0 - width) / 2.0,
        Position::TopRight | Position::BottomRight => x1 - margin - width,
    };
    let y = match position {
        Position::TopLeft | Position::TopCenter | Position::TopRight => y1 - margin - size,
        _ => y0 + margin,
    };
    (x, y)
}

/// point the page at a Font dict holding `font_id` under [`FONT_RESOURCE`],
/// hoisting inline Resources and Font dicts into their own objects
fn register_font(doc: &mut Document, page_id: ObjectId, font_id: ObjectId) -> Result<()> {
    let resources = doc.get_dictionary(page_id)?.get(b"Resources").ok().cloned();
    let resources_id = match resources {
        Some(Object::Reference(id)) => id,
        Some(Object::Dictionary(dict)) => doc.add_object(dict),
        _ => doc.add_object(Dictionary::new()),
    };
    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Resources", resources_id);

    let fonts = doc.get_dictionary(resources_id)?.get(b"Font").ok().cloned();
    let fonts_id = match fonts {
        Some(Object::Reference(id)) => id,
        Some(Object::Dictionary(dict)) => doc.add_object(dict),
        _ => doc.add_object(Dictionary::new()),
    };
    doc.get_object_mut(resources_id)?
        .as_dict_mut()?
        .set("Font", fonts_id);
    doc.get_object_mut(fonts_id)?
        .as_dict_mut()?
        .set(FONT_RESOURCE, font_id);
    Ok(())
}

/// wrap the existing content in q/Q and append `operations` after it
fn append_content(doc: &mut Document, page_id: ObjectId, operations: Vec<Operation>) -> Result<()> {
    // streams are concatenated as-is, so keep tokens apart at the seams
    let open_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let mut tail = b"\nQ\n".to_vec();
    tail.extend(Content { operations }.encode()?);
    let close_id = doc.add_object(Stream::new(Dictionary::new(), tail));

    let existing = doc.get_dictionary(page_id)?.get(b"Contents").ok().cloned();
    let existing = match existing {
        Some(Object::Reference(id)) => match doc.get_object(id)? {
            Object::Array(items) => items.clone(),
            _ => vec![Object::Reference(id)],
        },
        Some(Object::Array(items)) => items,
        _ => Vec::new(),
    };
    let mut contents = vec![Object::Reference(open_id)];
    contents.extend(existing);
    contents.push(Object::Reference(close_id));
    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Contents", contents);
    Ok(())
}

/// stamp a page number on each selected page
pub fn add_page_numbers(bytes: &[u8], options: &NumberingOptions) -> Result<Vec<u8>> {
    anyhow::ensure!(
        options.font_size > 0.0,
        "Font size must be positive"
    );
    let mut doc = pdf::load(bytes)?;
    let ids = pdf::page_ids(&doc);
    let selected = select_pages(options.pages.as_deref(), ids.len())?.require_non_empty()?;
    let total = u32::try_from(selected.len() - 1)
        .ok()
        .and_then(|extra| options.start.checked_add(extra))
        .with_context(|| {
            format!(
                "Numbering {} pages from {} overflows",
                selected.len(),
                options.start
            )
        })?;
    let font_id = doc.add_object(Font::Helvetica.dictionary());
    let size = options.font_size;

    for (ordinal, i) in selected.iter().enumerate() {
        let page_id = ids[i];
        pdf::flatten_inherited(&mut doc, page_id)?;
        // bounded by `total`
        let n = options.start + ordinal as u32;
        let label = render_label(&options.format, n, total, i + 1);
        let width = Font::Helvetica.text_width(&label, size);
        let page_box = pdf::page_box(&doc, page_id);
        let (x, y) = label_origin(options.position, page_box, width, size, options.margin);
        debug!(page = i + 1, %label, x, y, "numbering");

        register_font(&mut doc, page_id, font_id)?;
        append_content(
            &mut doc,
            page_id,
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![FONT_RESOURCE.into(), Object::Real(size)]),
                Operation::new("Td", vec![Object::Real(x), Object::Real(y)]),
                Operation::new(
                    "Tj",
                    vec![Object::String(encode_win_ansi(&label), lopdf::StringFormat::Literal)],
                ),
                Operation::new("ET", vec![]),
            ],
        )
        .with_context(|| format!("Failed to number page {}", i + 1))?;
    }
    pdf::save(&mut doc)
}

pub fn number_file(input: &Path, options: &NumberingOptions, output: &Path) -> Result<()> {
    let bytes = pdf::read_input(input)?;
    info!("Numbering pages of {} -> {}", input.display(), output.display());
    let out = add_page_numbers(&bytes, options)?;
    pdf::write_output(&out, output)
}
