use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, Ix4};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy)]
pub struct PreprocessConfig {
    pub shortest_edge: u32,
    pub longest_edge: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            shortest_edge: 800,
            longest_edge: 1333,
        }
    }
}

/// Target `(width, height)` keeping aspect ratio: the short side becomes
/// `shortest_edge` unless that pushes the long side past `longest_edge`.
pub fn resized_dimensions(width: u32, height: u32, config: &PreprocessConfig) -> (u32, u32) {
    let (w, h) = (width as f64, height as f64);
    let (min_side, max_side) = (w.min(h), w.max(h));

    let mut size = config.shortest_edge as f64;
    if max_side / min_side * size > config.longest_edge as f64 {
        size = (config.longest_edge as f64 * min_side / max_side).round();
    }

    if (height <= width && h == size) || (width <= height && w == size) {
        return (width, height);
    }

    let (new_w, new_h) = if width < height {
        (size, (size * h / w).floor())
    } else {
        ((size * w / h).floor(), size)
    };

    ((new_w as u32).max(1), (new_h as u32).max(1))
}

/// Resizes and normalizes an RGB image into a `[1, 3, H, W]` tensor.
pub fn transform_image(image: &RgbImage, config: &PreprocessConfig) -> Array<f32, Ix4> {
    let (width, height) = resized_dimensions(image.width(), image.height(), config);
    let resized = if (width, height) == image.dimensions() {
        image.clone()
    } else {
        image::imageops::resize(image, width, height, FilterType::Triangle)
    };

    let mut input = Array::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            input[[0, c, y, x]] = (pixel[c] as f32 / 255. - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    input
}
