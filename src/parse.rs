use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::Error;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tiff", "tif", "bmp", "gif"];
pub const PDF_EXTENSIONS: &[&str] = &["pdf"];

/// sorted, deduplicated 0-indexed page indices, all below the page count
/// they were parsed against
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageIndexSet(Vec<usize>);

impl PageIndexSet {
    /// every page of a `total_pages` document
    pub fn all(total_pages: usize) -> Self {
        Self((0..total_pages).collect())
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    pub fn first(&self) -> Option<usize> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<usize> {
        self.0.last().copied()
    }

    /// fail with [`Error::EmptyResult`] if nothing was selected
    pub fn require_non_empty(self) -> Result<Self, Error> {
        if self.0.is_empty() {
            return Err(Error::EmptyResult);
        }
        Ok(self)
    }
}

impl From<BTreeSet<usize>> for PageIndexSet {
    fn from(set: BTreeSet<usize>) -> Self {
        Self(set.into_iter().collect())
    }
}

fn non_empty_segments(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|part| !part.is_empty())
}

/// parse a page number; an all-digit token too large for usize saturates
fn parse_page_number(token: &str) -> Option<usize> {
    let token = token.trim();
    match token.parse() {
        Ok(n) => Some(n),
        Err(_) if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) => Some(usize::MAX),
        Err(_) => None,
    }
}

fn parse_segment(part: &str, num_pages: usize, pages: &mut BTreeSet<usize>) -> Result<(), Error> {
    if let Some((start, end)) = part.split_once('-') {
        let invalid = |reason: &str| Error::InvalidRange {
            segment: part.to_string(),
            reason: reason.to_string(),
        };
        let start = parse_page_number(start).ok_or_else(|| invalid("start is not a number"))?;
        let end = parse_page_number(end).ok_or_else(|| invalid("end is not a number"))?;
        if start < 1 {
            return Err(invalid("pages start at 1"));
        }
        if end < start {
            return Err(invalid("end is before start"));
        }
        if start > num_pages {
            return Err(invalid(&format!(
                "start is past the last page ({})",
                num_pages
            )));
        }
        // a range running past the end is truncated, not rejected
        let end = end.min(num_pages);
        pages.extend((start..=end).map(|p| p - 1));
    } else {
        let p: usize = part.parse().map_err(|_| Error::InvalidPageNumber {
            segment: part.to_string(),
            total: num_pages,
        })?;
        if p < 1 || p > num_pages {
            return Err(Error::InvalidPageNumber {
                segment: part.to_string(),
                total: num_pages,
            });
        }
        pages.insert(p - 1);
    }
    Ok(())
}

/// parse page range string like "1,3-5,10" into 0-indexed page indices
///
/// An empty or blank expression selects nothing; callers that need pages
/// should follow up with [`PageIndexSet::require_non_empty`].
pub fn parse_page_ranges(s: &str, num_pages: usize) -> Result<PageIndexSet, Error> {
    let mut pages = BTreeSet::new();
    for part in non_empty_segments(s) {
        parse_segment(part, num_pages, &mut pages)?;
    }
    Ok(pages.into())
}

/// parse each comma-separated segment on its own, in input order
pub fn parse_range_segments(s: &str, num_pages: usize) -> Vec<Result<PageIndexSet, Error>> {
    non_empty_segments(s)
        .map(|part| {
            let mut pages = BTreeSet::new();
            parse_segment(part, num_pages, &mut pages).map(|()| PageIndexSet::from(pages))
        })
        .collect()
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.contains(&ext.to_lowercase().as_str()))
}

fn is_glob_pattern(path: &Path) -> bool {
    path.to_str()
        .is_some_and(|s| s.contains(['*', '?', '[']))
}

/// expand dirs and glob patterns in input list into files with one of
/// `extensions`; explicit files pass through untouched
pub fn expand_input_paths(paths: &[PathBuf], extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut result = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("Cannot read directory: {}", path.display()))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && has_extension(p, extensions))
                .collect();
            entries.sort();
            anyhow::ensure!(
                !entries.is_empty(),
                "No {} files found in {}",
                extensions.join("/"),
                path.display()
            );
            result.extend(entries);
        } else if !path.exists() && is_glob_pattern(path) {
            let pattern = path.to_str().context("Invalid glob pattern")?;
            let mut entries: Vec<PathBuf> = glob::glob(pattern)
                .with_context(|| format!("Invalid glob pattern: {}", pattern))?
                .filter_map(|e| e.ok())
                .filter(|p| p.is_file() && has_extension(p, extensions))
                .collect();
            entries.sort();
            anyhow::ensure!(!entries.is_empty(), "No files match {}", pattern);
            result.extend(entries);
        } else {
            result.push(path.clone());
        }
    }
    Ok(result)
}

/// what the JPEG headers say about an image, enough to embed it as-is
#[derive(Debug, Clone, PartialEq)]
pub struct JpegInfo {
    pub width: u32,
    pub height: u32,
    pub components: u8,
    /// APP14 Adobe transform flag, present on most CMYK files
    pub adobe_transform: Option<u8>,
    /// JFIF density in dots per inch, if declared
    pub dpi: Option<u32>,
}

fn jfif_dpi(segment: &[u8]) -> Option<u32> {
    // "JFIF\0" version(2) units(1) xdensity(2) ydensity(2)
    if segment.len() < 12 || &segment[..5] != b"JFIF\0" {
        return None;
    }
    let units = segment[7];
    let density = u16::from_be_bytes([segment[8], segment[9]]) as u32;
    match (units, density) {
        (_, 0) => None,
        (1, d) => Some(d),
        (2, d) => Some((d as f32 * 2.54).round() as u32),
        _ => None,
    }
}

/// walk JPEG markers up to the first SOF, collecting size and color info
pub fn parse_jpeg_header(data: &[u8]) -> Result<JpegInfo> {
    anyhow::ensure!(
        data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8,
        "Not a valid JPEG file"
    );
    let mut adobe_transform = None;
    let mut dpi = None;
    let mut pos = 2;
    while pos + 4 < data.len() {
        if data[pos] != 0xFF {
            anyhow::bail!("Invalid JPEG marker at offset {}", pos);
        }
        let marker = data[pos + 1];
        // skip padding 0xFF bytes
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        // RST and standalone markers carry no length field
        if marker == 0x00 || (0xD0..=0xD9).contains(&marker) {
            pos += 2;
            continue;
        }
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        anyhow::ensure!(len >= 2, "Bad JPEG segment length at offset {}", pos);
        let body_end = (pos + 2 + len).min(data.len());
        let body = &data[pos + 4..body_end];
        match marker {
            0xE0 => dpi = dpi.or_else(|| jfif_dpi(body)),
            // "Adobe" version(2) flags0(2) flags1(2) transform(1)
            0xEE if body.len() >= 12 && &body[..5] == b"Adobe" => {
                adobe_transform = Some(body[11]);
            }
            // SOF0-3, SOF5-7, SOF9-11, SOF13-15 (0xC4 DHT, 0xC8 JPG, 0xCC DAC excluded)
            0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                anyhow::ensure!(pos + 2 + len <= data.len() && len >= 8, "Truncated SOF");
                let height = u16::from_be_bytes([data[pos + 5], data[pos + 6]]) as u32;
                let width = u16::from_be_bytes([data[pos + 7], data[pos + 8]]) as u32;
                return Ok(JpegInfo {
                    width,
                    height,
                    components: data[pos + 9],
                    adobe_transform,
                    dpi,
                });
            }
            _ => {}
        }
        pos += 2 + len;
    }
    anyhow::bail!("No SOF marker found in JPEG")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pages(s: &str, n: usize) -> Vec<usize> {
        parse_page_ranges(s, n).unwrap().as_slice().to_vec()
    }

    #[test]
    fn parse_pages_single() {
        assert_eq!(pages("1", 10), vec![0]);
        assert_eq!(pages("5", 10), vec![4]);
        assert_eq!(pages("10", 10), vec![9]);
    }

    #[test]
    fn parse_pages_mixed() {
        assert_eq!(pages("1-3, 5, 7-9", 10), vec![0, 1, 2, 4, 6, 7, 8]);
        assert_eq!(pages("1,3-5,10", 10), vec![0, 2, 3, 4, 9]);
    }

    #[test]
    fn parse_pages_whitespace() {
        assert_eq!(pages(" 1 , 3 - 5 , 10 ", 10), vec![0, 2, 3, 4, 9]);
    }

    #[test]
    fn parse_pages_trailing_and_doubled_commas() {
        assert_eq!(pages("1,2,", 5), vec![0, 1]);
        assert_eq!(pages(",,2,,", 5), vec![1]);
    }

    #[test]
    fn parse_pages_dedup_across_segment_kinds() {
        assert_eq!(pages("1,1,2", 5), vec![0, 1]);
        assert_eq!(pages("2-4,3,1-2", 5), vec![0, 1, 2, 3]);
    }

    #[test]
    fn parse_pages_sorted_regardless_of_input_order() {
        assert_eq!(pages("5,1,3", 5), vec![0, 2, 4]);
    }

    #[test]
    fn parse_pages_empty_is_not_an_error() {
        assert!(parse_page_ranges("", 10).unwrap().is_empty());
        assert!(parse_page_ranges("   ", 10).unwrap().is_empty());
        assert!(parse_page_ranges("", 0).unwrap().is_empty());
        assert!(parse_page_ranges(" , ", 0).unwrap().is_empty());
    }

    #[test]
    fn parse_pages_range_end_is_clamped() {
        assert_eq!(pages("1-100", 10), (0..10).collect::<Vec<_>>());
        assert_eq!(pages("8-12", 10), vec![7, 8, 9]);
    }

    #[test]
    fn parse_pages_single_page_past_end_is_rejected() {
        assert!(matches!(
            parse_page_ranges("11", 10),
            Err(Error::InvalidPageNumber { total: 10, .. })
        ));
        assert!(matches!(
            parse_page_ranges("101", 10),
            Err(Error::InvalidPageNumber { .. })
        ));
    }

    #[test]
    fn parse_pages_err_zero() {
        assert!(matches!(
            parse_page_ranges("0", 10),
            Err(Error::InvalidPageNumber { .. })
        ));
        assert!(matches!(
            parse_page_ranges("0-3", 10),
            Err(Error::InvalidRange { .. })
        ));
    }

    #[test]
    fn parse_pages_err_reversed_range() {
        assert!(matches!(
            parse_page_ranges("3-1", 10),
            Err(Error::InvalidRange { .. })
        ));
    }

    #[test]
    fn parse_pages_err_range_start_past_end() {
        assert!(matches!(
            parse_page_ranges("11-12", 10),
            Err(Error::InvalidRange { .. })
        ));
    }

    #[test]
    fn parse_pages_err_garbage() {
        assert!(matches!(
            parse_page_ranges("abc", 10),
            Err(Error::InvalidPageNumber { .. })
        ));
        assert!(matches!(
            parse_page_ranges("1-x", 10),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            parse_page_ranges("1-2-3", 10),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            parse_page_ranges("-1", 10),
            Err(Error::InvalidRange { .. })
        ));
    }

    #[test]
    fn parse_pages_fails_on_first_bad_segment() {
        let err = parse_page_ranges("1, 99, x", 10).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidPageNumber {
                segment: "99".into(),
                total: 10
            }
        );
    }

    #[test]
    fn require_non_empty_reports_empty_result() {
        let set = parse_page_ranges(" ", 4).unwrap();
        assert_eq!(set.require_non_empty(), Err(Error::EmptyResult));
        assert!(parse_page_ranges("2", 4).unwrap().require_non_empty().is_ok());
    }

    #[test]
    fn segments_parse_independently() {
        let parts = parse_range_segments("1-2, 9, 3-4,", 5);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].as_ref().unwrap().as_slice(), &[0, 1]);
        assert!(parts[1].is_err());
        assert_eq!(parts[2].as_ref().unwrap().as_slice(), &[2, 3]);
    }

    #[test]
    fn huge_range_end_is_clamped() {
        assert_eq!(pages("2-99999999999999999999999", 4), vec![1, 2, 3]);
        assert!(matches!(
            parse_page_ranges("99999999999999999999999-99999999999999999999999", 4),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            parse_page_ranges("99999999999999999999999", 4),
            Err(Error::InvalidPageNumber { .. })
        ));
    }

    #[test]
    fn page_index_set_helpers() {
        let set = parse_page_ranges("4,2", 5).unwrap();
        assert_eq!((set.first(), set.last()), (Some(1), Some(3)));
        assert_eq!(PageIndexSet::all(3).as_slice(), &[0, 1, 2]);
    }

    proptest! {
        #[test]
        fn parsed_pages_strictly_ascending_and_in_bounds(
            total in 1usize..60,
            segments in prop::collection::vec((1usize..80, 0usize..10, any::<bool>()), 1..8),
        ) {
            let expr = segments
                .iter()
                .map(|&(start, span, is_range)| {
                    let start = (start % total) + 1;
                    if is_range {
                        format!("{}-{}", start, start + span)
                    } else {
                        start.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            let set = parse_page_ranges(&expr, total).unwrap();
            prop_assert!(!set.is_empty());
            prop_assert!(set.as_slice().windows(2).all(|w| w[0] < w[1]));
            prop_assert!(set.iter().all(|i| i < total));
        }

        #[test]
        fn single_pages_past_end_always_rejected(total in 0usize..50, extra in 1usize..50) {
            let expr = (total + extra).to_string();
            let rejected = matches!(
                parse_page_ranges(&expr, total),
                Err(Error::InvalidPageNumber { .. })
            );
            prop_assert!(rejected);
        }
    }

    fn make_minimal_jpeg(width: u16, height: u16, components: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0xFF, 0xD8]);
        let sof_len: u16 = 8 + 3 * components as u16;
        buf.extend_from_slice(&[0xFF, 0xC0]);
        buf.extend_from_slice(&sof_len.to_be_bytes());
        buf.push(8);
        buf.extend_from_slice(&height.to_be_bytes());
        buf.extend_from_slice(&width.to_be_bytes());
        buf.push(components);
        for i in 0..components {
            buf.push(i + 1);
            buf.push(0x11);
            buf.push(0);
        }
        buf.extend_from_slice(&[0xFF, 0xD9]);
        buf
    }

    fn with_segment(jpeg: Vec<u8>, marker: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = jpeg[..2].to_vec();
        buf.extend_from_slice(&[0xFF, marker]);
        buf.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        buf.extend_from_slice(payload);
        buf.extend_from_slice(&jpeg[2..]);
        buf
    }

    #[test]
    fn jpeg_header_rgb() {
        let info = parse_jpeg_header(&make_minimal_jpeg(640, 480, 3)).unwrap();
        assert_eq!((info.width, info.height, info.components), (640, 480, 3));
        assert_eq!(info.adobe_transform, None);
        assert_eq!(info.dpi, None);
    }

    #[test]
    fn jpeg_header_jfif_density() {
        let mut jfif = b"JFIF\0".to_vec();
        jfif.extend_from_slice(&[1, 1, 1, 0, 150, 0, 150, 0, 0]);
        let data = with_segment(make_minimal_jpeg(100, 200, 1), 0xE0, &jfif);
        let info = parse_jpeg_header(&data).unwrap();
        assert_eq!((info.width, info.height, info.components), (100, 200, 1));
        assert_eq!(info.dpi, Some(150));
    }

    #[test]
    fn jpeg_header_adobe_marker() {
        let adobe = b"Adobe\0\x64\0\0\0\0\x02";
        let data = with_segment(make_minimal_jpeg(8, 8, 4), 0xEE, adobe);
        let info = parse_jpeg_header(&data).unwrap();
        assert_eq!(info.components, 4);
        assert_eq!(info.adobe_transform, Some(2));
    }

    #[test]
    fn jpeg_header_err_not_jpeg() {
        assert!(parse_jpeg_header(&[0x89, 0x50]).is_err());
        assert!(parse_jpeg_header(&[0xFF]).is_err());
        assert!(parse_jpeg_header(&[0xFF, 0xD8, 0xFF, 0xD9]).is_err());
    }

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("quire_test_parse_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn expand_paths_directory_filters_and_sorts() {
        let dir = tmp_dir("dir");
        std::fs::write(dir.join("c.png"), b"fake").unwrap();
        std::fs::write(dir.join("a.JPG"), b"fake").unwrap();
        std::fs::write(dir.join("b.tiff"), b"fake").unwrap();
        std::fs::write(dir.join("notes.txt"), b"not an image").unwrap();
        let result = expand_input_paths(&[dir.clone()], IMAGE_EXTENSIONS).unwrap();
        let names: Vec<_> = result
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.tiff", "c.png"]);
    }

    #[test]
    fn expand_paths_glob() {
        let dir = tmp_dir("glob");
        std::fs::write(dir.join("2.pdf"), b"fake").unwrap();
        std::fs::write(dir.join("1.pdf"), b"fake").unwrap();
        std::fs::write(dir.join("x.png"), b"fake").unwrap();
        let pattern = dir.join("*.pdf");
        let result = expand_input_paths(&[pattern], PDF_EXTENSIONS).unwrap();
        assert_eq!(result, vec![dir.join("1.pdf"), dir.join("2.pdf")]);
    }

    #[test]
    fn expand_paths_explicit_files_keep_order() {
        let dir = tmp_dir("explicit");
        let p1 = dir.join("z.pdf");
        let p2 = dir.join("a.pdf");
        std::fs::write(&p1, b"fake").unwrap();
        std::fs::write(&p2, b"fake").unwrap();
        let result = expand_input_paths(&[p1.clone(), p2.clone()], PDF_EXTENSIONS).unwrap();
        assert_eq!(result, vec![p1, p2]);
    }

    #[test]
    fn expand_paths_empty_dir_fails() {
        let dir = tmp_dir("empty");
        assert!(expand_input_paths(&[dir], PDF_EXTENSIONS).is_err());
    }
}
