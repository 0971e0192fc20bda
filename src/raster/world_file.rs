//! Georeferenced images described by ESRI world files
//!
//! `ortho.png` is georeferenced by `ortho.pgw` (or `ortho.pngw` / `ortho.wld`):
//! six lines holding pixel width, two rotation terms, negative pixel height, and
//! the center of the upper-left pixel.

use super::{Interpolation, RasterDataset, RasterDriver};
use crate::types::Envelope;
use crate::{Result, StoreError};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::debug;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Opens images with a world file sidecar
#[derive(Debug, Default, Clone, Copy)]
pub struct WorldFileDriver;

impl RasterDriver for WorldFileDriver {
    fn open(&self, path: &Path) -> Result<Box<dyn RasterDataset>> {
        let world = read_world_file(&world_file_path(path)?)?;
        let image = image::open(path)?.to_rgba8();
        debug!(path = %path.display(), width = image.width(), height = image.height(), "opened raster");
        Ok(Box::new(GeoreferencedImage::new(image, world)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WorldFile {
    pixel_width: f64,
    pixel_height: f64,
    /// Upper-left corner of the upper-left pixel
    origin_x: f64,
    origin_y: f64,
}

fn world_file_path(image_path: &Path) -> Result<PathBuf> {
    let ext = image_path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let mut candidates = Vec::new();
    let mut chars = ext.chars();
    if let (Some(first), Some(last)) = (chars.next(), ext.chars().last()) {
        candidates.push(format!("{}{}w", first, last));
    }
    candidates.push(format!("{}w", ext));
    candidates.push("wld".to_string());

    candidates
        .into_iter()
        .map(|c| image_path.with_extension(c))
        .find(|p| p.is_file())
        .ok_or_else(|| StoreError::NotFound(format!("no world file for {}", image_path.display())))
}

fn read_world_file(path: &Path) -> Result<WorldFile> {
    let text = std::fs::read_to_string(path)?;
    let terms = text
        .split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|e| StoreError::Config(format!("{}: bad world file term '{}': {}", path.display(), t, e)))
        })
        .collect::<Result<Vec<f64>>>()?;

    let [a, d, b, e, c, f] = terms[..] else {
        return Err(StoreError::Config(format!(
            "{}: world file needs 6 terms, found {}",
            path.display(),
            terms.len()
        )));
    };
    if d != 0.0 || b != 0.0 {
        return Err(StoreError::Unsupported(format!("{}: rotated rasters", path.display())));
    }
    if a <= 0.0 || e >= 0.0 {
        return Err(StoreError::Config(format!("{}: unexpected pixel size", path.display())));
    }

    Ok(WorldFile {
        pixel_width: a,
        pixel_height: -e,
        origin_x: c - a / 2.0,
        origin_y: f - e / 2.0,
    })
}

struct GeoreferencedImage {
    image: RgbaImage,
    world: WorldFile,
    envelope: Envelope,
}

impl GeoreferencedImage {
    fn new(image: RgbaImage, world: WorldFile) -> Self {
        let envelope = Envelope::new(
            world.origin_x,
            world.origin_y - image.height() as f64 * world.pixel_height,
            world.origin_x + image.width() as f64 * world.pixel_width,
            world.origin_y,
        );
        Self { image, world, envelope }
    }

    /// Continuous pixel coordinates of a world position
    fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.world.origin_x) / self.world.pixel_width,
            (self.world.origin_y - y) / self.world.pixel_height,
        )
    }

    fn sample_nearest(&self, px: f64, py: f64) -> Rgba<u8> {
        let (w, h) = self.image.dimensions();
        let (ix, iy) = (px.floor(), py.floor());
        if ix < 0.0 || iy < 0.0 || ix >= w as f64 || iy >= h as f64 {
            return TRANSPARENT;
        }
        *self.image.get_pixel(ix as u32, iy as u32)
    }

    fn sample_bilinear(&self, px: f64, py: f64) -> Rgba<u8> {
        let (w, h) = self.image.dimensions();
        if px < 0.0 || py < 0.0 || px >= w as f64 || py >= h as f64 {
            return TRANSPARENT;
        }
        // Shift to pixel-center space and clamp the 2x2 neighbourhood at the edges
        let fx = (px - 0.5).max(0.0);
        let fy = (py - 0.5).max(0.0);
        let x0 = (fx.floor() as u32).min(w - 1);
        let y0 = (fy.floor() as u32).min(h - 1);
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let tx = fx - x0 as f64;
        let ty = fy - y0 as f64;

        let p00 = self.image.get_pixel(x0, y0).0;
        let p10 = self.image.get_pixel(x1, y0).0;
        let p01 = self.image.get_pixel(x0, y1).0;
        let p11 = self.image.get_pixel(x1, y1).0;

        let mut out = [0u8; 4];
        for (c, slot) in out.iter_mut().enumerate() {
            let top = p00[c] as f64 * (1.0 - tx) + p10[c] as f64 * tx;
            let bottom = p01[c] as f64 * (1.0 - tx) + p11[c] as f64 * tx;
            *slot = (top * (1.0 - ty) + bottom * ty).round().clamp(0.0, 255.0) as u8;
        }
        Rgba(out)
    }
}

impl RasterDataset for GeoreferencedImage {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn extract(
        &mut self,
        region: &Envelope,
        width: u32,
        height: u32,
        interpolation: Interpolation,
    ) -> Result<RgbaImage> {
        if width == 0 || height == 0 {
            return Err(StoreError::ContractViolation("empty pixel region requested".into()));
        }
        let step_x = region.width() / width as f64;
        let step_y = region.height() / height as f64;

        let out = RgbaImage::from_fn(width, height, |i, j| {
            let x = region.min_x + (i as f64 + 0.5) * step_x;
            let y = region.max_y - (j as f64 + 0.5) * step_y;
            let (px, py) = self.to_pixel(x, y);
            match interpolation {
                Interpolation::NearestNeighbor => self.sample_nearest(px, py),
                Interpolation::Bilinear => self.sample_bilinear(px, py),
            }
        });
        Ok(out)
    }
}
