use image::{GrayImage, Luma};

/// Images brighter than this on average are treated as dark-edges-on-light.
pub const INVERT_ABOVE_MEAN: f64 = 127.0;

/// Pixels at or below this become 0, the rest 255.
pub const EDGE_THRESHOLD: u8 = 32;

pub fn mean_intensity(image: &GrayImage) -> f64 {
    let pixels = image.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = pixels.iter().map(|&p| u64::from(p)).sum();
    sum as f64 / pixels.len() as f64
}

pub fn invert(image: &GrayImage) -> GrayImage {
    let mut inverted = image.clone();
    for Luma([value]) in inverted.pixels_mut() {
        *value = u8::MAX - *value;
    }
    inverted
}

/// Normalize edge polarity, then cut at a fixed threshold.
///
/// The result only ever contains 0 and 255.
pub fn binarize(gray: &GrayImage) -> GrayImage {
    let source = if mean_intensity(gray) > INVERT_ABOVE_MEAN {
        invert(gray)
    } else {
        gray.clone()
    };

    GrayImage::from_fn(source.width(), source.height(), |x, y| {
        let Luma([value]) = *source.get_pixel(x, y);
        if value > EDGE_THRESHOLD {
            Luma([u8::MAX])
        } else {
            Luma([0])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_white_image_inverts_to_zero() {
        let white = GrayImage::from_pixel(2, 2, Luma([255]));
        let result = binarize(&white);
        assert!(result.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_black_image_stays_zero() {
        let black = GrayImage::from_pixel(2, 2, Luma([0]));
        let result = binarize(&black);
        assert!(result.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_threshold_boundary() {
        // mean 40.5, no inversion
        let image = GrayImage::from_raw(4, 1, vec![0, 32, 33, 97]).unwrap();
        let result = binarize(&image);
        assert_eq!(result.as_raw(), &vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_dark_edges_on_light_background() {
        // light paper with one dark stroke: the stroke becomes the bright edge
        let mut image = GrayImage::from_pixel(3, 3, Luma([250]));
        image.put_pixel(1, 1, Luma([10]));
        let result = binarize(&image);

        assert_eq!(result.get_pixel(1, 1).0[0], 255);
        assert_eq!(result.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_mean_exactly_127_is_not_inverted() {
        let image = GrayImage::from_pixel(2, 1, Luma([127]));
        let result = binarize(&image);
        assert!(result.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_output_is_strictly_binary() {
        let image = GrayImage::from_fn(16, 16, |x, y| Luma([(x * 16 + y) as u8]));
        let result = binarize(&image);
        assert!(result.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert_eq!(result.dimensions(), image.dimensions());
    }

    #[test]
    fn test_empty_image() {
        let empty = GrayImage::new(0, 0);
        assert_eq!(mean_intensity(&empty), 0.0);
        assert_eq!(binarize(&empty).dimensions(), (0, 0));
    }
}
