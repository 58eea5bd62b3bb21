use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::pdf;

/// concatenate every page of every document, in the order given
pub fn merge_pdfs(documents: &[Vec<u8>]) -> Result<Vec<u8>> {
    anyhow::ensure!(!documents.is_empty(), "No documents to merge");

    let mut base = pdf::load(&documents[0]).context("Failed to load document 1")?;
    let mut pages = pdf::page_ids(&base);

    for (i, bytes) in documents.iter().enumerate().skip(1) {
        let mut doc = pdf::load(bytes).with_context(|| format!("Failed to load document {}", i + 1))?;
        // shift ids past everything already in the base so nothing collides
        doc.renumber_objects_with(base.max_id + 1);
        let imported = pdf::page_ids(&doc);
        debug!(document = i + 1, pages = imported.len(), "importing");
        pages.extend(imported);
        base.max_id = base.max_id.max(doc.max_id);
        base.objects.extend(doc.objects);
    }

    // imported catalogs and page trees become unreachable and get pruned
    pdf::retain_pages(&mut base, &pages)?;
    base.renumber_objects();
    pdf::save(&mut base)
}

/// merge PDF files into `output`
pub fn merge_files(inputs: &[PathBuf], output: &Path) -> Result<()> {
    info!("Merging {} PDF(s) -> {}", inputs.len(), output.display());
    let start = std::time::Instant::now();

    let mut documents = Vec::with_capacity(inputs.len());
    for (i, path) in inputs.iter().enumerate() {
        let bytes = pdf::read_input(path)?;
        let count = pdf::page_count(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(
            "  [{}/{}] {} ({} page{})",
            i + 1,
            inputs.len(),
            path.display(),
            count,
            if count == 1 { "" } else { "s" }
        );
        documents.push(bytes);
    }

    let merged = merge_pdfs(&documents)?;
    pdf::write_output(&merged, output)?;
    info!(
        "Done. {} pages in {:.2}s",
        pdf::page_count(&merged)?,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
