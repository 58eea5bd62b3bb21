use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

use crate::error::Error;
use crate::parse::{parse_page_ranges, parse_range_segments, PageIndexSet};
use crate::pdf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitMode {
    /// one document per page
    Pages,
    /// consecutive chunks of n pages, the last one possibly shorter
    Every(usize),
    /// one document per comma-separated segment of a range expression
    Ranges(String),
}

/// one output document of a split, with the 0-indexed pages it holds
#[derive(Debug, Clone)]
pub struct SplitPart {
    pub pages: PageIndexSet,
    pub bytes: Vec<u8>,
}

impl SplitPart {
    /// file name for this part: `stem_0003.pdf` for a single page from a
    /// per-page split, `stem_3-5.pdf` otherwise
    pub fn file_name(&self, stem: &str, mode: &SplitMode) -> String {
        let first = self.pages.first().map_or(0, |p| p + 1);
        let last = self.pages.last().map_or(0, |p| p + 1);
        match mode {
            SplitMode::Pages => format!("{}_{:04}.pdf", stem, first),
            _ => format!("{}_{}-{}.pdf", stem, first, last),
        }
    }
}

fn copy_pages(doc: &lopdf::Document, pages: &PageIndexSet) -> Result<Vec<u8>> {
    let ids = pdf::page_ids(doc);
    let selected = pages
        .iter()
        .map(|i| {
            ids.get(i)
                .copied()
                .with_context(|| format!("Page {} does not exist", i + 1))
        })
        .collect::<Result<Vec<_>>>()?;
    let mut out = doc.clone();
    pdf::retain_pages(&mut out, &selected)?;
    out.renumber_objects();
    pdf::save(&mut out)
}

/// copy the selected pages, in ascending order, into a new document
pub fn extract_pages(bytes: &[u8], pages: &PageIndexSet) -> Result<Vec<u8>> {
    if pages.is_empty() {
        return Err(Error::EmptyResult.into());
    }
    let doc = pdf::load(bytes)?;
    copy_pages(&doc, pages)
}

/// work out which pages go into each part of a split
pub fn plan_split(mode: &SplitMode, total: usize) -> Result<Vec<PageIndexSet>> {
    let plan: Vec<PageIndexSet> = match mode {
        SplitMode::Pages => (0..total)
            .map(|i| PageIndexSet::from(BTreeSet::from([i])))
            .collect(),
        SplitMode::Every(n) => {
            anyhow::ensure!(*n >= 1, "Chunk size must be at least 1");
            (0..total)
                .step_by(*n)
                .map(|start| {
                    let chunk: BTreeSet<usize> = (start..total.min(start + n)).collect();
                    PageIndexSet::from(chunk)
                })
                .collect()
        }
        SplitMode::Ranges(expr) => {
            // segments are contiguous, so equal sets would share a file name
            let mut plan: Vec<PageIndexSet> = Vec::new();
            for segment in parse_range_segments(expr, total) {
                match segment {
                    Ok(set) if plan.contains(&set) => warn!(
                        "Skipping duplicate range {}-{}",
                        set.first().map_or(0, |p| p + 1),
                        set.last().map_or(0, |p| p + 1)
                    ),
                    Ok(set) => plan.push(set),
                    Err(e) => warn!("Skipping {}", e),
                }
            }
            plan
        }
    };
    if plan.is_empty() {
        return Err(Error::EmptyResult.into());
    }
    Ok(plan)
}

/// split a document into several, per `mode`
pub fn split_pdf(bytes: &[u8], mode: &SplitMode) -> Result<Vec<SplitPart>> {
    let doc = pdf::load(bytes)?;
    let plan = plan_split(mode, doc.get_pages().len())?;
    plan.into_iter()
        .map(|pages| {
            let bytes = copy_pages(&doc, &pages)?;
            Ok(SplitPart { pages, bytes })
        })
        .collect()
}

/// write the pages named by `ranges` from `input` into `output`
pub fn extract_file(input: &Path, ranges: &str, output: &Path) -> Result<()> {
    let bytes = pdf::read_input(input)?;
    let total = pdf::page_count(&bytes)?;
    let pages = parse_page_ranges(ranges, total)?.require_non_empty()?;
    info!(
        "Extracting {} of {} page{} from {} -> {}",
        pages.len(),
        total,
        if total == 1 { "" } else { "s" },
        input.display(),
        output.display()
    );
    let out = extract_pages(&bytes, &pages)?;
    pdf::write_output(&out, output)
}

/// split `input` into files inside `output_dir`
pub fn split_file(input: &Path, mode: &SplitMode, output_dir: &Path) -> Result<()> {
    let bytes = pdf::read_input(input)?;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Cannot create output dir: {}", output_dir.display()))?;
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| *s != "-")
        .unwrap_or("page")
        .to_string();

    let start = std::time::Instant::now();
    let parts = split_pdf(&bytes, mode)?;
    info!(
        "Splitting {} into {} file{} -> {}",
        input.display(),
        parts.len(),
        if parts.len() == 1 { "" } else { "s" },
        output_dir.display()
    );
    for (i, part) in parts.iter().enumerate() {
        let filename = part.file_name(&stem, mode);
        pdf::write_output(&part.bytes, &output_dir.join(&filename))?;
        info!("  [{}/{}] {}", i + 1, parts.len(), filename);
    }
    info!(
        "Done. {} files in {:.2}s",
        parts.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
