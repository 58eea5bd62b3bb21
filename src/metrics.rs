//! Standard-14 Helvetica metrics and WinAnsi encoding, enough to place and
//! wrap text without embedding a font.

use lopdf::{dictionary, Dictionary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Helvetica,
    HelveticaBold,
}

/// advance widths for 0x20..=0x7E, in 1/1000 em (Adobe AFM, WinAnsi order)
#[rustfmt::skip]
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

/// Unicode punctuation that WinAnsi keeps in 0x80..=0x9F
const WIN_ANSI_EXTRA: &[(char, u8)] = &[
    ('\u{20AC}', 0x80),
    ('\u{2026}', 0x85),
    ('\u{2018}', 0x91),
    ('\u{2019}', 0x92),
    ('\u{201C}', 0x93),
    ('\u{201D}', 0x94),
    ('\u{2022}', 0x95),
    ('\u{2013}', 0x96),
    ('\u{2014}', 0x97),
];

impl Font {
    pub fn base_font(self) -> &'static str {
        match self {
            Font::Helvetica => "Helvetica",
            Font::HelveticaBold => "Helvetica-Bold",
        }
    }

    /// Type1 font dictionary referencing the built-in font
    pub fn dictionary(self) -> Dictionary {
        dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => self.base_font(),
            "Encoding" => "WinAnsiEncoding",
        }
    }

    /// width of one WinAnsi code, in 1/1000 em
    fn code_width(self, code: u8) -> u16 {
        let (table, quote, dquote) = match self {
            Font::Helvetica => (&HELVETICA, 222, 333),
            Font::HelveticaBold => (&HELVETICA_BOLD, 278, 500),
        };
        match code {
            0x20..=0x7E => table[(code - 0x20) as usize],
            0x85 | 0x97 => 1000,
            0x91 | 0x92 => quote,
            0x93 | 0x94 => dquote,
            0x95 => 350,
            // Latin-1 letters are close to the lowercase average
            _ => 556,
        }
    }

    /// rendered width of `text` at `size` points
    pub fn text_width(self, text: &str, size: f32) -> f32 {
        let units: u32 = encode_win_ansi(text)
            .into_iter()
            .map(|b| self.code_width(b) as u32)
            .sum();
        units as f32 * size / 1000.0
    }
}

/// map text to WinAnsi bytes; anything unrepresentable becomes '?'
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '\u{A0}'..='\u{FF}' => c as u32 as u8,
            '\t' => b' ',
            _ => WIN_ANSI_EXTRA
                .iter()
                .find(|&&(u, _)| u == c)
                .map_or(b'?', |&(_, b)| b),
        })
        .collect()
}
