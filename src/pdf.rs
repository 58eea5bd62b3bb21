//! lopdf plumbing shared by every tool: loading and saving, page attribute
//! inheritance, page tree rebuilding, and new-document assembly.

use anyhow::{Context, Result};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::io::{Read, Write};
use std::path::Path;

/// attributes a page may inherit from its `/Pages` ancestors
const INHERITABLE: &[&[u8]] = &[b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// US Letter, the default when a page declares no box at all
const DEFAULT_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

/// read a whole input file, or stdin for "-"
pub fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .lock()
            .read_to_end(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// write a finished file, or stdout for "-"
pub fn write_output(bytes: &[u8], output: &Path) -> Result<()> {
    if output == Path::new("-") {
        let stdout = std::io::stdout();
        let mut out = std::io::BufWriter::new(stdout.lock());
        out.write_all(bytes)
            .and_then(|()| out.flush())
            .context("Failed to write PDF to stdout")?;
    } else {
        std::fs::write(output, bytes)
            .with_context(|| format!("Failed to save {}", output.display()))?;
    }
    Ok(())
}

pub fn load(bytes: &[u8]) -> Result<Document> {
    Document::load_mem(bytes).context("Failed to parse PDF")
}

pub fn save(doc: &mut Document) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).context("Failed to serialize PDF")?;
    Ok(buffer)
}

/// number of pages in a PDF held in memory
pub fn page_count(bytes: &[u8]) -> Result<usize> {
    Ok(load(bytes)?.get_pages().len())
}

/// page object ids in document order
pub fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

pub fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// look up `key` on the page, then up its `/Parent` chain
pub fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = Some(page_id);
    // parent chains are shallow; the bound stops reference cycles
    for _ in 0..64 {
        let dict = doc.get_dictionary(current?).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

/// effective visible box (CropBox, else MediaBox) as [x0, y0, x1, y1]
pub fn page_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let read = |key: &[u8]| -> Option<[f32; 4]> {
        let obj = inherited(doc, page_id, key)?;
        let arr = resolve(doc, &obj).as_array().ok()?;
        if arr.len() != 4 {
            return None;
        }
        let mut out = [0.0; 4];
        for (slot, v) in out.iter_mut().zip(arr) {
            *slot = number(resolve(doc, v))?;
        }
        // normalize corners, some writers swap them
        Some([
            out[0].min(out[2]),
            out[1].min(out[3]),
            out[0].max(out[2]),
            out[1].max(out[3]),
        ])
    };
    read(b"CropBox")
        .or_else(|| read(b"MediaBox"))
        .unwrap_or(DEFAULT_BOX)
}

/// effective /Rotate in degrees, as stored
pub fn page_rotation(doc: &Document, page_id: ObjectId) -> i64 {
    inherited(doc, page_id, b"Rotate")
        .and_then(|obj| resolve(doc, &obj).as_i64().ok())
        .unwrap_or(0)
}

/// copy inherited attributes onto the page itself so it survives a move
/// to a different parent
pub fn flatten_inherited(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let mut found = Vec::new();
    {
        let page = doc.get_dictionary(page_id)?;
        for &key in INHERITABLE {
            if !page.has(key) {
                if let Some(value) = inherited(doc, page_id, key) {
                    found.push((key.to_vec(), value));
                }
            }
        }
    }
    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    for (key, value) in found {
        page.set(key, value);
    }
    Ok(())
}

fn root_pages_id(doc: &Document) -> Result<ObjectId> {
    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .context("No Root in trailer")?;
    doc.get_dictionary(catalog_id)?
        .get(b"Pages")
        .and_then(Object::as_reference)
        .context("Catalog has no page tree")
}

/// make `pages` the whole page tree, in the given order, as direct kids of
/// the root `/Pages` node, then drop everything no longer reachable
pub fn retain_pages(doc: &mut Document, pages: &[ObjectId]) -> Result<()> {
    anyhow::ensure!(!pages.is_empty(), "Cannot build a PDF with no pages");
    for &id in pages {
        flatten_inherited(doc, id)?;
    }
    let root_id = root_pages_id(doc)?;
    for &id in pages {
        doc.get_object_mut(id)?.as_dict_mut()?.set("Parent", root_id);
    }
    let root = doc.get_object_mut(root_id)?.as_dict_mut()?;
    root.set(
        "Kids",
        pages.iter().map(|&id| Object::Reference(id)).collect::<Vec<_>>(),
    );
    root.set("Count", pages.len() as i64);
    for &key in INHERITABLE {
        root.remove(key);
    }
    doc.prune_objects();
    Ok(())
}

pub fn literal(text: &str) -> Object {
    Object::String(text.as_bytes().to_vec(), lopdf::StringFormat::Literal)
}

/// PDF date string (D:YYYYMMDDHHmmSSZ) for seconds since the unix epoch
pub fn pdf_date(secs: u64) -> String {
    let days = secs / 86400;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;
    // civil-from-days
    let z = days + 719468;
    let era = z / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = yoe + era * 400 + u64::from(m <= 2);
    format!(
        "D:{:04}{:02}{:02}{:02}{:02}{:02}Z",
        y, m, d, hours, minutes, seconds
    )
}

/// set Producer, CreationDate, and any title/author on the trailer /Info
pub fn set_metadata(doc: &mut Document, meta: &Metadata) {
    let mut info = Dictionary::new();
    info.set(
        "Producer",
        literal(&format!("quire {}", env!("CARGO_PKG_VERSION"))),
    );
    if let Ok(dur) = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        info.set("CreationDate", literal(&pdf_date(dur.as_secs())));
    }
    if let Some(t) = &meta.title {
        info.set("Title", literal(t));
    }
    if let Some(a) = &meta.author {
        info.set("Author", literal(a));
    }
    let info_id = doc.add_object(info);
    doc.trailer.set("Info", info_id);
}

/// what `quire info` prints about a document
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub pages: usize,
    pub version: String,
    /// width and height of the first page in points
    pub first_page: Option<(f32, f32)>,
    pub title: Option<String>,
}

pub fn summarize(bytes: &[u8]) -> Result<Summary> {
    let doc = load(bytes)?;
    let ids = page_ids(&doc);
    let first_page = ids.first().map(|&id| {
        let [x0, y0, x1, y1] = page_box(&doc, id);
        ((x1 - x0).abs(), (y1 - y0).abs())
    });
    let title = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|info| doc.dereference(info).ok())
        .and_then(|(_, info)| info.as_dict().ok())
        .and_then(|info| info.get(b"Title").ok())
        .and_then(|t| t.as_str().ok())
        .map(|t| String::from_utf8_lossy(t).into_owned());
    Ok(Summary {
        pages: ids.len(),
        version: doc.version.clone(),
        first_page,
        title,
    })
}

/// assembles a fresh document page by page
pub struct PageTreeBuilder {
    pub doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl PageTreeBuilder {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// add a `width` x `height` page drawing `operations` with `resources`
    pub fn add_page(
        &mut self,
        width: f32,
        height: f32,
        operations: Vec<Operation>,
        resources: Object,
    ) -> Result<ObjectId> {
        let content = Content { operations };
        let content_id = self.doc.add_object(Stream::new(
            dictionary! {},
            content.encode().context("Failed to encode content stream")?,
        ));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), Object::Real(width), Object::Real(height)],
            "Contents" => content_id,
            "Resources" => resources,
        });
        self.kids.push(page_id.into());
        Ok(page_id)
    }

    pub fn finish(mut self, meta: &Metadata) -> Result<Vec<u8>> {
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        set_metadata(&mut self.doc, meta);
        self.doc.compress();
        save(&mut self.doc)
    }
}

impl Default for PageTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// `n` Letter pages, each showing "Page i" in Helvetica
    pub(crate) fn sample_pdf(n: usize) -> Vec<u8> {
        let mut builder = PageTreeBuilder::new();
        let font_id = builder.doc.add_object(crate::metrics::Font::Helvetica.dictionary());
        let resources = builder.doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        for i in 0..n {
            builder
                .add_page(
                    612.0,
                    792.0,
                    vec![
                        Operation::new("BT", vec![]),
                        Operation::new("Tf", vec!["F1".into(), 12.into()]),
                        Operation::new("Td", vec![100.into(), 700.into()]),
                        Operation::new("Tj", vec![literal(&format!("Page {}", i + 1))]),
                        Operation::new("ET", vec![]),
                    ],
                    resources.into(),
                )
                .unwrap();
        }
        builder.finish(&Metadata::default()).unwrap()
    }

    /// text shown by the page's content streams, in order
    pub(crate) fn page_text(doc: &Document, page_id: ObjectId) -> String {
        let content = doc.get_page_content(page_id).unwrap();
        let content = Content::decode(&content).unwrap();
        let mut out = String::new();
        for op in content.operations {
            if op.operator == "Tj" {
                if let Some(Object::String(bytes, _)) = op.operands.first() {
                    out.push_str(&String::from_utf8_lossy(bytes));
                }
            }
        }
        out
    }

    /// two pages whose MediaBox and Rotate live on an intermediate /Pages node
    pub(crate) fn nested_tree_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let root_id = doc.new_object_id();
        let mid_id = doc.new_object_id();
        let mut kids = Vec::new();
        for i in 0..2 {
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                Content {
                    operations: vec![Operation::new("Tj", vec![literal(&format!("N{}", i))])],
                }
                .encode()
                .unwrap(),
            ));
            let page = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => mid_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page));
        }
        doc.objects.insert(
            mid_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Parent" => root_id,
                "Kids" => kids,
                "Count" => 2,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(300),
                    Object::Integer(400),
                ],
                "Rotate" => 90,
            }),
        );
        doc.objects.insert(
            root_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(mid_id)],
                "Count" => 2,
            }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => root_id });
        doc.trailer.set("Root", catalog);
        save(&mut doc).unwrap()
    }

    #[test]
    fn sample_pdf_roundtrips() {
        let bytes = sample_pdf(3);
        assert_eq!(page_count(&bytes).unwrap(), 3);
        let doc = load(&bytes).unwrap();
        let ids = page_ids(&doc);
        assert_eq!(page_text(&doc, ids[2]), "Page 3");
        let info = doc.trailer.get(b"Info").unwrap();
        let (_, info) = doc.dereference(info).unwrap();
        assert!(info.as_dict().unwrap().has(b"Producer"));
    }

    #[test]
    fn summary_reports_size_and_title() {
        let mut builder = PageTreeBuilder::new();
        builder.add_page(200.0, 100.0, vec![], dictionary! {}.into()).unwrap();
        let meta = Metadata {
            title: Some("Notes".into()),
            author: None,
        };
        let bytes = builder.finish(&meta).unwrap();
        let summary = summarize(&bytes).unwrap();
        assert_eq!(summary.pages, 1);
        assert_eq!(summary.version, "1.5");
        assert_eq!(summary.first_page, Some((200.0, 100.0)));
        assert_eq!(summary.title.as_deref(), Some("Notes"));
    }

    #[test]
    fn page_attributes_are_inherited() {
        let doc = load(&nested_tree_pdf()).unwrap();
        let ids = page_ids(&doc);
        assert_eq!(ids.len(), 2);
        assert_eq!(page_box(&doc, ids[0]), [0.0, 0.0, 300.0, 400.0]);
        assert_eq!(page_rotation(&doc, ids[1]), 90);
        assert!(inherited(&doc, ids[0], b"CropBox").is_none());
    }

    #[test]
    fn retain_pages_flattens_and_reorders() {
        let mut doc = load(&nested_tree_pdf()).unwrap();
        let ids = page_ids(&doc);
        retain_pages(&mut doc, &[ids[1], ids[0]]).unwrap();
        let doc = load(&save(&mut doc).unwrap()).unwrap();
        let ids = page_ids(&doc);
        assert_eq!(page_text(&doc, ids[0]), "N1");
        assert_eq!(page_text(&doc, ids[1]), "N0");
        let page = doc.get_dictionary(ids[0]).unwrap();
        assert!(page.has(b"MediaBox"));
        assert_eq!(page.get(b"Rotate").unwrap().as_i64().unwrap(), 90);
    }

    #[test]
    fn retain_pages_drops_unreferenced_pages() {
        let mut doc = load(&sample_pdf(4)).unwrap();
        let ids = page_ids(&doc);
        let dropped = ids[3];
        retain_pages(&mut doc, &ids[..2]).unwrap();
        assert!(!doc.objects.contains_key(&dropped));
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn missing_box_falls_back_to_letter() {
        let mut doc = Document::with_version("1.5");
        let page = doc.add_object(dictionary! { "Type" => "Page" });
        assert_eq!(page_box(&doc, page), DEFAULT_BOX);
        assert_eq!(page_rotation(&doc, page), 0);
    }

    #[test]
    fn pdf_date_formats_utc() {
        assert_eq!(pdf_date(0), "D:19700101000000Z");
        assert_eq!(pdf_date(951_782_400 + 3_723), "D:20000229010203Z");
        assert_eq!(pdf_date(1_700_000_000), "D:20231114221320Z");
    }

    #[test]
    fn write_and_read_files() {
        let dir = std::env::temp_dir().join("quire_test_pdf_io");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("x.pdf");
        write_output(b"%PDF", &path).unwrap();
        assert_eq!(read_input(&path).unwrap(), b"%PDF");
        assert!(read_input(&dir.join("missing.pdf")).is_err());
    }
}
