use anyhow::Result;
use clap::ValueEnum;
use std::path::Path;
use tracing::{debug, info};

use crate::parse::{parse_page_ranges, PageIndexSet};
use crate::pdf;

/// clockwise quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Rotation {
    #[value(name = "90")]
    Quarter,
    #[value(name = "180")]
    Half,
    #[value(name = "270", alias = "-90")]
    ThreeQuarter,
}

impl Rotation {
    pub fn degrees(self) -> i64 {
        match self {
            Rotation::Quarter => 90,
            Rotation::Half => 180,
            Rotation::ThreeQuarter => 270,
        }
    }
}

/// resolve an optional page selection; no selection means every page
pub fn select_pages(pages: Option<&str>, total: usize) -> Result<PageIndexSet> {
    Ok(match pages {
        Some(expr) => parse_page_ranges(expr, total)?.require_non_empty()?,
        None => PageIndexSet::all(total),
    })
}

/// turn the selected pages (all when `pages` is None) by `rotation`,
/// on top of whatever rotation they already carry
pub fn rotate_pages(bytes: &[u8], rotation: Rotation, pages: Option<&str>) -> Result<Vec<u8>> {
    let mut doc = pdf::load(bytes)?;
    let ids = pdf::page_ids(&doc);
    let selected = select_pages(pages, ids.len())?;

    for i in selected.iter() {
        let page_id = ids[i];
        let existing = pdf::page_rotation(&doc, page_id);
        let rotated = (existing + rotation.degrees()).rem_euclid(360);
        doc.get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Rotate", rotated);
        debug!(page = i + 1, existing, rotated, "rotated");
    }
    pdf::save(&mut doc)
}

pub fn rotate_file(input: &Path, rotation: Rotation, pages: Option<&str>, output: &Path) -> Result<()> {
    let bytes = pdf::read_input(input)?;
    info!(
        "Rotating {} by {} degrees -> {}",
        input.display(),
        rotation.degrees(),
        output.display()
    );
    let out = rotate_pages(&bytes, rotation, pages)?;
    pdf::write_output(&out, output)
}
