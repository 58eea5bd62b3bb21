use clap::ValueEnum;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PageSize {
    A3,
    A4,
    A5,
    Letter,
    Legal,
}

impl PageSize {
    /// portrait (width, height) in points
    pub fn dimensions_pt(self) -> (f32, f32) {
        match self {
            PageSize::A3 => (841.89, 1190.55),
            PageSize::A4 => (595.28, 841.89),
            PageSize::A5 => (419.53, 595.28),
            PageSize::Letter => (612.0, 792.0),
            PageSize::Legal => (612.0, 1008.0),
        }
    }

    /// page dimensions turned to `orientation`; `Auto` follows the image's
    /// own shape
    pub fn oriented(self, orientation: Orientation, image_w: f32, image_h: f32) -> (f32, f32) {
        let (w, h) = self.dimensions_pt();
        let landscape = match orientation {
            Orientation::Portrait => false,
            Orientation::Landscape => true,
            Orientation::Auto => image_w > image_h,
        };
        // natural orientation of every named size is portrait
        if landscape {
            (h, w)
        } else {
            (w, h)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Orientation {
    /// landscape for wide images, portrait otherwise
    #[default]
    Auto,
    Portrait,
    Landscape,
}

/// where to draw an image on a page, in points from the bottom-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageFitRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

/// scale an image to the largest size that fits the page minus `margin` on
/// every side, keeping its aspect ratio, and center it in that area
pub fn compute_fit(
    image_width: f32,
    image_height: f32,
    page_width: f32,
    page_height: f32,
    margin: f32,
) -> Result<PageFitRect> {
    if !positive(image_width) || !positive(image_height) {
        return Err(Error::InvalidDimensions {
            width: image_width,
            height: image_height,
        });
    }
    if !positive(page_width) || !positive(page_height) {
        return Err(Error::InvalidDimensions {
            width: page_width,
            height: page_height,
        });
    }
    let available_w = page_width - 2.0 * margin;
    let available_h = page_height - 2.0 * margin;
    if !margin.is_finite() || margin < 0.0 || available_w <= 0.0 || available_h <= 0.0 {
        return Err(Error::MarginTooLarge {
            margin,
            page_width,
            page_height,
        });
    }

    let image_aspect = image_width / image_height;
    let page_aspect = available_w / available_h;
    let (width, height) = if image_aspect > page_aspect {
        (available_w, available_w / image_aspect)
    } else {
        (available_h * image_aspect, available_h)
    };

    Ok(PageFitRect {
        x: margin + (available_w - width) / 2.0,
        y: margin + (available_h - height) / 2.0,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn wide_image_fills_width_and_centers_vertically() {
        let r = compute_fit(200.0, 100.0, 600.0, 800.0, 20.0).unwrap();
        assert!(close(r.x, 20.0));
        assert!(close(r.y, 260.0));
        assert!(close(r.width, 560.0));
        assert!(close(r.height, 280.0));
    }

    #[test]
    fn tall_image_fills_height_and_centers_horizontally() {
        let r = compute_fit(100.0, 400.0, 600.0, 800.0, 0.0).unwrap();
        assert!(close(r.height, 800.0));
        assert!(close(r.width, 200.0));
        assert!(close(r.x, 200.0));
        assert!(close(r.y, 0.0));
    }

    #[test]
    fn matching_aspect_fills_available_area() {
        let r = compute_fit(56.0, 76.0, 600.0, 800.0, 20.0).unwrap();
        assert!(close(r.x, 20.0));
        assert!(close(r.y, 20.0));
        assert!(close(r.width, 560.0));
        assert!(close(r.height, 760.0));
    }

    #[test]
    fn small_images_are_scaled_up() {
        let r = compute_fit(1.0, 1.0, 100.0, 200.0, 10.0).unwrap();
        assert!(close(r.width, 80.0));
        assert!(close(r.height, 80.0));
        assert!(close(r.y, 60.0));
    }

    #[test]
    fn margin_too_large() {
        assert!(matches!(
            compute_fit(10.0, 10.0, 600.0, 800.0, 300.0),
            Err(Error::MarginTooLarge { .. })
        ));
        assert!(matches!(
            compute_fit(10.0, 10.0, 600.0, 800.0, 400.0),
            Err(Error::MarginTooLarge { .. })
        ));
        assert!(matches!(
            compute_fit(10.0, 10.0, 600.0, 800.0, -1.0),
            Err(Error::MarginTooLarge { .. })
        ));
    }

    #[test]
    fn degenerate_dimensions_rejected() {
        assert!(matches!(
            compute_fit(0.0, 10.0, 600.0, 800.0, 0.0),
            Err(Error::InvalidDimensions { .. })
        ));
        assert!(matches!(
            compute_fit(10.0, 10.0, 600.0, f32::NAN, 0.0),
            Err(Error::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn page_size_dimensions() {
        let (w, h) = PageSize::A4.dimensions_pt();
        assert!(close(w, 595.28) && close(h, 841.89));
        let (w, h) = PageSize::Letter.dimensions_pt();
        assert!(close(w, 612.0) && close(h, 792.0));
        for ps in [
            PageSize::A3,
            PageSize::A4,
            PageSize::A5,
            PageSize::Letter,
            PageSize::Legal,
        ] {
            let (w, h) = ps.dimensions_pt();
            assert!(h > w);
        }
    }

    #[test]
    fn orientation_swaps_page_dimensions() {
        let a4 = PageSize::A4;
        assert_eq!(a4.oriented(Orientation::Portrait, 900.0, 100.0), (595.28, 841.89));
        assert_eq!(a4.oriented(Orientation::Landscape, 100.0, 900.0), (841.89, 595.28));
        assert_eq!(a4.oriented(Orientation::Auto, 900.0, 100.0), (841.89, 595.28));
        assert_eq!(a4.oriented(Orientation::Auto, 100.0, 900.0), (595.28, 841.89));
        assert_eq!(a4.oriented(Orientation::Auto, 100.0, 100.0), (595.28, 841.89));
    }

    proptest! {
        #[test]
        fn fit_keeps_aspect_and_stays_inside(
            iw in 1.0f32..5000.0,
            ih in 1.0f32..5000.0,
            pw in 50.0f32..2000.0,
            ph in 50.0f32..2000.0,
            margin in 0.0f32..20.0,
        ) {
            let r = compute_fit(iw, ih, pw, ph, margin).unwrap();
            let tol = 1e-2;
            prop_assert!(((r.width / r.height) - (iw / ih)).abs() / (iw / ih) < 1e-3);
            prop_assert!(r.x >= margin - tol && r.y >= margin - tol);
            prop_assert!(r.x + r.width <= pw - margin + tol);
            prop_assert!(r.y + r.height <= ph - margin + tol);
            // centered: equal slack on both sides of each axis
            prop_assert!(((r.x - margin) - (pw - margin - r.x - r.width)).abs() < tol);
            prop_assert!(((r.y - margin) - (ph - margin - r.y - r.height)).abs() < tol);
        }
    }
}
