use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use serde::Serialize;
use std::path::Path;

/// Pixels trimmed from each edge of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CropMargins {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl CropMargins {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Loads a mask image as grayscale. Black pixels blank the frame.
pub fn load_mask(path: &Path) -> Result<GrayImage> {
    let mask = image::open(path).with_context(|| format!("Failed to open mask {}", path.display()))?;
    Ok(mask.to_luma8())
}

/// Zeroes every frame pixel where the mask is black. A mask of a different
/// size is stretched to the frame first.
pub fn apply_mask(frame: &mut RgbImage, mask: &GrayImage) {
    let resized;
    let mask = if mask.dimensions() == frame.dimensions() {
        mask
    } else {
        resized = imageops::resize(mask, frame.width(), frame.height(), FilterType::Nearest);
        &resized
    };
    for (pixel, m) in frame.pixels_mut().zip(mask.pixels()) {
        if m.0[0] == 0 {
            pixel.0 = [0, 0, 0];
        }
    }
}

/// Trims the margins off a frame.
pub fn apply_crop(frame: &RgbImage, margins: &CropMargins) -> Result<RgbImage> {
    let (width, height) = frame.dimensions();
    let keep_w = margins
        .left
        .checked_add(margins.right)
        .and_then(|m| width.checked_sub(m))
        .filter(|w| *w > 0);
    let keep_h = margins
        .top
        .checked_add(margins.bottom)
        .and_then(|m| height.checked_sub(m))
        .filter(|h| *h > 0);

    let (Some(w), Some(h)) = (keep_w, keep_h) else {
        anyhow::bail!(
            "Invalid crop dimensions: margins {:?} leave nothing of a {}x{} frame",
            margins,
            width,
            height
        );
    };

    Ok(imageops::crop_imm(frame, margins.left, margins.top, w, h).to_image())
}
