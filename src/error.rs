use thiserror::Error;

/// failures of the page-range parser and the page-fit calculator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid page range \"{segment}\": {reason}")]
    InvalidRange { segment: String, reason: String },

    #[error("Invalid page number \"{segment}\" (document has {total} pages)")]
    InvalidPageNumber { segment: String, total: usize },

    #[error("No pages selected")]
    EmptyResult,

    #[error("Margin {margin} leaves no room on a {page_width}x{page_height} page")]
    MarginTooLarge {
        margin: f32,
        page_width: f32,
        page_height: f32,
    },

    #[error("Invalid dimensions {width}x{height}")]
    InvalidDimensions { width: f32, height: f32 },
}

pub type Result<T> = std::result::Result<T, Error>;
