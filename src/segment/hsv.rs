use image::{GrayImage, Luma, RgbImage};

use crate::config::SegmentationSettings;

/// Hue in degrees (0..360), saturation and value in 0..=255.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hsv {
    pub hue: f32,
    pub saturation: u8,
    pub value: u8,
}

pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> Hsv {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = (max - min) as f32;

    let saturation = if max == 0 {
        0
    } else {
        (delta * 255.0 / max as f32).round() as u8
    };

    let hue = if delta == 0.0 {
        0.0
    } else {
        let (rf, gf, bf) = (r as f32, g as f32, b as f32);
        let h = if max == r {
            60.0 * (gf - bf) / delta
        } else if max == g {
            120.0 + 60.0 * (bf - rf) / delta
        } else {
            240.0 + 60.0 * (rf - gf) / delta
        };
        if h < 0.0 {
            h + 360.0
        } else {
            h
        }
    };

    Hsv {
        hue,
        saturation,
        value: max,
    }
}

/// Binary mask (255 = foliage candidate) of pixels inside the green band.
pub fn green_band_mask(image: &RgbImage, settings: &SegmentationSettings) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let hsv = rgb_to_hsv(image.get_pixel(x, y).0);
        let inside = hsv.hue >= settings.hue_min_deg
            && hsv.hue <= settings.hue_max_deg
            && hsv.saturation >= settings.saturation_min
            && hsv.value >= settings.value_min;
        Luma([if inside { 255 } else { 0 }])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn primaries_map_to_expected_hues() {
        assert_eq!(rgb_to_hsv([255, 0, 0]).hue, 0.0);
        assert_eq!(rgb_to_hsv([0, 255, 0]).hue, 120.0);
        assert_eq!(rgb_to_hsv([0, 0, 255]).hue, 240.0);
        assert_eq!(rgb_to_hsv([255, 0, 255]).hue, 300.0);
    }

    #[test]
    fn gray_has_no_saturation() {
        let hsv = rgb_to_hsv([90, 90, 90]);
        assert_eq!(hsv.saturation, 0);
        assert_eq!(hsv.value, 90);
    }

    #[test]
    fn mask_keeps_foliage_and_drops_sky() {
        let mut image = RgbImage::from_pixel(4, 1, Rgb([135, 206, 235]));
        image.put_pixel(1, 0, Rgb([34, 139, 34]));
        image.put_pixel(2, 0, Rgb([10, 30, 12]));
        let mask = green_band_mask(&image, &SegmentationSettings::default());
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert_eq!(mask.get_pixel(1, 0)[0], 255);
        // Too dark to count.
        assert_eq!(mask.get_pixel(2, 0)[0], 0);
    }
}
