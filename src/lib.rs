//! quire: a PDF toolbox. Merge, extract, split, rotate, number and compress
//! existing documents, or build new ones from images and DOCX text.

pub mod compress;
pub mod docx;
pub mod error;
pub mod images;
pub mod layout;
pub mod merge;
pub mod metrics;
pub mod number;
pub mod parse;
pub mod pdf;
pub mod rotate;
pub mod split;

pub use error::Error;
