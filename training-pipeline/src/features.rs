use image::{imageops::FilterType, DynamicImage};

/// Images are reduced to a coarse grid of mean-RGB cells. Enough signal to
/// separate the label vocabulary by colour; model architecture is explicitly
/// out of scope.
pub const GRID: u32 = 4;
const CELL: u32 = 8;
const SIDE: u32 = GRID * CELL;

pub const FEATURE_DIM: usize = (GRID * GRID * 3) as usize;

/// Mean RGB per grid cell, scaled to `[0, 1]`, row-major.
pub fn feature_vector(img: &DynamicImage) -> Vec<f32> {
    let small = img.resize_exact(SIDE, SIDE, FilterType::Triangle).to_rgb8();

    let mut features = vec![0f32; FEATURE_DIM];
    for (x, y, pixel) in small.enumerate_pixels() {
        let cell = ((y / CELL) * GRID + (x / CELL)) as usize;
        for (channel, value) in pixel.0.iter().enumerate() {
            features[cell * 3 + channel] += f32::from(*value);
        }
    }

    let per_cell = (CELL * CELL) as f32 * 255.0;
    for value in &mut features {
        *value /= per_cell;
    }

    features
}

pub fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}
