use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use locus_match::Correspondence;

use crate::describer::QueryImage;

const MARK_HALF: i64 = 2;

/// Dump matches to `<dir>/<name>.ppm`, inliers bright and outliers dim.
///
/// Pure side effect for human inspection: any I/O failure is logged and
/// swallowed, never touching the localization outcome.
pub(crate) fn dump_matches(
    dir: &Path,
    name: &str,
    image: Option<&QueryImage>,
    size: (usize, usize),
    correspondences: &[Correspondence],
    inliers: &HashSet<usize>,
) {
    let (width, height) = match image {
        Some(img) => (img.width, img.height),
        None => size,
    };
    if width == 0 || height == 0 {
        return;
    }

    // grayscale background, black when only features are available
    let mut rgb = vec![0u8; width * height * 3];
    if let Some(img) = image {
        for (i, &v) in img.pixels.iter().enumerate().take(width * height) {
            rgb[3 * i] = v;
            rgb[3 * i + 1] = v;
            rgb[3 * i + 2] = v;
        }
    }

    for c in correspondences {
        let color: [u8; 3] = if inliers.contains(&c.feature) {
            [64, 255, 64]
        } else {
            [160, 64, 64]
        };
        draw_mark(&mut rgb, width, height, c.pixel, color);
    }

    if let Err(e) = write_ppm(dir, name, width, height, &rgb) {
        log::warn!("failed to write match debug image {name}: {e}");
    }
}

fn draw_mark(rgb: &mut [u8], width: usize, height: usize, pixel: [f64; 2], color: [u8; 3]) {
    let cx = pixel[0].round() as i64;
    let cy = pixel[1].round() as i64;
    for dy in -MARK_HALF..=MARK_HALF {
        for dx in -MARK_HALF..=MARK_HALF {
            let x = cx + dx;
            let y = cy + dy;
            if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                continue;
            }
            let idx = 3 * (y as usize * width + x as usize);
            rgb[idx] = color[0];
            rgb[idx + 1] = color[1];
            rgb[idx + 2] = color[2];
        }
    }
}

fn write_ppm(
    dir: &Path,
    name: &str,
    width: usize,
    height: usize,
    rgb: &[u8],
) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{name}.ppm"));
    let mut file = std::fs::File::create(path)?;
    write!(file, "P6\n{width} {height}\n255\n")?;
    file.write_all(rgb)
}
