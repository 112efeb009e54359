//! Full-page screenshot capture
//!
//! The remote endpoint only screenshots the viewport, so full pages are
//! captured as strips while scrolling by the viewport height, then
//! stitched vertically. The final strip overlaps the previous one when the
//! page height is not a viewport multiple; only its bottom remainder is
//! drawn so no rows repeat.

use image::{GenericImageView, ImageFormat, RgbaImage};
use serde_json::Value;
use std::io::Cursor;
use std::time::Duration;

use crate::browser::Page;
use crate::error::{CrawlError, Result};

/// Settle time after each scroll before the strip is captured.
const SCROLL_SETTLE: Duration = Duration::from_secs(1);

/// Capture the whole page as one PNG. `max_height` of zero means the full
/// document height.
pub async fn capture_stitched(page: &dyn Page, max_height: u32) -> Result<Vec<u8>> {
    let viewport = page
        .execute_script("return [window.innerHeight, window.innerWidth]", Vec::new())
        .await?;
    let window_height = script_u32(viewport.get(0))
        .ok_or_else(|| CrawlError::DriverUnavailable("viewport height unavailable".into()))?;
    let window_width = script_u32(viewport.get(1))
        .ok_or_else(|| CrawlError::DriverUnavailable("viewport width unavailable".into()))?;

    let document_height = page
        .execute_script("return document.body.parentNode.scrollHeight", Vec::new())
        .await
        .ok()
        .and_then(|v| script_u32(Some(&v)))
        .unwrap_or(window_height);
    let total_height = if max_height > 0 {
        document_height.min(max_height)
    } else {
        document_height
    };

    let mut strips = Vec::new();
    let mut offset = 0u32;
    while offset < total_height {
        page.execute_script(&format!("window.scrollTo(0, {offset});"), Vec::new())
            .await?;
        tokio::time::sleep(SCROLL_SETTLE).await;
        strips.push(page.screenshot().await?);
        offset = offset.saturating_add(window_height.max(1));
    }

    stitch(&strips, window_width, total_height)
}

fn script_u32(value: Option<&Value>) -> Option<u32> {
    let value = value?;
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|f| f as u64))
        .map(|v| v as u32)
}

/// Stitch PNG strips vertically into a `width` x `total_height` image.
/// The last strip is clipped to the rows still missing, drawn from its
/// bottom edge.
pub fn stitch(strips: &[Vec<u8>], width: u32, total_height: u32) -> Result<Vec<u8>> {
    let mut canvas = RgbaImage::new(width, total_height);
    let mut current_y = 0u32;

    for (index, strip) in strips.iter().enumerate() {
        let decoded = image::load_from_memory(strip)
            .map_err(|e| CrawlError::DriverUnavailable(format!("bad screenshot strip: {e}")))?;
        let strip_height = decoded.height();
        let remaining = total_height.saturating_sub(current_y);

        // Last strip: draw only the bottom `remaining` rows
        let source_y_start = if index == strips.len() - 1 && remaining < strip_height {
            strip_height - remaining
        } else {
            0
        };

        for source_y in source_y_start..strip_height {
            if current_y >= total_height {
                break;
            }
            for x in 0..width.min(decoded.width()) {
                canvas.put_pixel(x, current_y, decoded.get_pixel(x, source_y));
            }
            current_y += 1;
        }
    }

    let mut encoded = Vec::new();
    image::DynamicImage::ImageRgba8(canvas)
        .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
        .map_err(|e| CrawlError::DriverUnavailable(format!("png encode failed: {e}")))?;
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid_strip(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(rgba));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn gradient_strip(width: u32, height: u32) -> Vec<u8> {
        // Each row's red channel equals its row index, so clipping is
        // observable in the output.
        let img = RgbaImage::from_fn(width, height, |_, y| Rgba([y as u8, 0, 0, 255]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn stitched_output_matches_document_dimensions() {
        let strips = vec![
            solid_strip(4, 3, [10, 0, 0, 255]),
            solid_strip(4, 3, [20, 0, 0, 255]),
        ];
        let png = stitch(&strips, 4, 6).unwrap();
        let out = image::load_from_memory(&png).unwrap();
        assert_eq!(out.width(), 4);
        assert_eq!(out.height(), 6);
    }

    #[test]
    fn final_strip_is_clipped_to_its_bottom_remainder() {
        // 3-row strips over a 5-row document: the second strip re-renders
        // rows 2..5, so its bottom two rows (indices 1 and 2) must land at
        // output rows 3 and 4.
        let strips = vec![gradient_strip(2, 3), gradient_strip(2, 3)];
        let png = stitch(&strips, 2, 5).unwrap();
        let out = image::load_from_memory(&png).unwrap().to_rgba8();

        assert_eq!(out.height(), 5);
        // First strip drawn whole
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(0, 2).0[0], 2);
        // Remainder rows come from the bottom of the last strip
        assert_eq!(out.get_pixel(0, 3).0[0], 1);
        assert_eq!(out.get_pixel(0, 4).0[0], 2);
    }

    #[test]
    fn single_exact_strip_passes_through() {
        let strips = vec![solid_strip(3, 4, [7, 7, 7, 255])];
        let png = stitch(&strips, 3, 4).unwrap();
        let out = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!((out.width(), out.height()), (3, 4));
        assert_eq!(out.get_pixel(1, 1).0, [7, 7, 7, 255]);
    }
}
