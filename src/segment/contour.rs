use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use serde::Serialize;

/// Axis-aligned pixel rectangle, inclusive of both edge rows/columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// width / height; zero-height boxes report 0.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x
            && y >= self.y
            && x < self.x + self.width as i32
            && y < self.y + self.height as i32
    }

    pub fn intersection_over_union(&self, other: &BoundingBox) -> f64 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width as i32).min(other.x + other.width as i32);
        let bottom = (self.y + self.height as i32).min(other.y + other.height as i32);
        if right <= left || bottom <= top {
            return 0.0;
        }
        let inter = (right - left) as f64 * (bottom - top) as f64;
        let union = self.area() as f64 + other.area() as f64 - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Closed boundary of one connected region, in image coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Contour {
    points: Vec<Point<i32>>,
}

impl Contour {
    pub fn new(mut points: Vec<Point<i32>>) -> Self {
        while points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        Self { points }
    }

    pub fn points(&self) -> &[Point<i32>] {
        &self.points
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let Some(first) = self.points.first() else {
            return BoundingBox::new(0, 0, 0, 0);
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &self.points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        BoundingBox::new(
            min_x,
            min_y,
            (max_x - min_x + 1) as u32,
            (max_y - min_y + 1) as u32,
        )
    }

    /// Enclosed polygon area in square pixels.
    pub fn area(&self) -> f64 {
        polygon_area(&self.points)
    }

    pub fn hull_area(&self) -> f64 {
        if self.points.len() < 3 {
            return 0.0;
        }
        polygon_area(&convex_hull(&self.points[..]))
    }

    /// area / convex-hull area; 0 for degenerate outlines.
    pub fn solidity(&self) -> f64 {
        let hull = self.hull_area();
        if hull > 0.0 {
            (self.area() / hull).min(1.0)
        } else {
            0.0
        }
    }

    /// Filled binary mask (255 inside) of the region, sized `width` x `height`.
    pub fn rasterize(&self, width: u32, height: u32) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        self.fill_into(&mut mask);
        mask
    }

    /// Paint the filled region onto an existing mask.
    pub fn fill_into(&self, mask: &mut GrayImage) {
        if self.points.len() >= 3 {
            draw_polygon_mut(mask, &self.points, Luma([255u8]));
        }
        let (width, height) = mask.dimensions();
        for p in &self.points {
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < width && (p.y as u32) < height {
                mask.put_pixel(p.x as u32, p.y as u32, Luma([255u8]));
            }
        }
    }
}

/// Shoelace area of a closed polygon.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: i32, y: i32, side: i32) -> Contour {
        Contour::new(vec![
            Point::new(x, y),
            Point::new(x + side, y),
            Point::new(x + side, y + side),
            Point::new(x, y + side),
        ])
    }

    #[test]
    fn bounding_box_is_inclusive() {
        let bbox = square(2, 3, 9).bounding_box();
        assert_eq!(bbox, BoundingBox::new(2, 3, 10, 10));
        assert!(bbox.contains(11, 12));
        assert!(!bbox.contains(12, 12));
    }

    #[test]
    fn iou_of_shifted_boxes() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 0, 10, 10);
        assert!((a.intersection_over_union(&b) - 50.0 / 150.0).abs() < 1e-9);
        assert_eq!(a.intersection_over_union(&BoundingBox::new(20, 20, 5, 5)), 0.0);
        assert_eq!(a.intersection_over_union(&a), 1.0);
    }

    #[test]
    fn convex_outline_is_fully_solid() {
        let c = square(0, 0, 10);
        assert_eq!(c.area(), 100.0);
        assert!((c.solidity() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn notched_outline_loses_solidity() {
        // L-shape: 10x10 square with the top-right 5x5 quadrant removed.
        let c = Contour::new(vec![
            Point::new(0, 0),
            Point::new(5, 0),
            Point::new(5, 5),
            Point::new(10, 5),
            Point::new(10, 10),
            Point::new(0, 10),
        ]);
        assert_eq!(c.area(), 75.0);
        assert!(c.solidity() < 0.95);
    }

    #[test]
    fn closing_point_is_dropped() {
        let c = Contour::new(vec![
            Point::new(0, 0),
            Point::new(4, 0),
            Point::new(4, 4),
            Point::new(0, 0),
        ]);
        assert_eq!(c.points().len(), 3);
    }

    #[test]
    fn rasterize_fills_interior() {
        let mask = square(2, 2, 6).rasterize(12, 12);
        assert_eq!(mask.get_pixel(5, 5)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert_eq!(mask.get_pixel(11, 11)[0], 0);
    }

    #[test]
    fn single_point_contour_is_degenerate() {
        let c = Contour::new(vec![Point::new(3, 3)]);
        assert_eq!(c.area(), 0.0);
        assert_eq!(c.solidity(), 0.0);
        assert_eq!(c.bounding_box(), BoundingBox::new(3, 3, 1, 1));
        assert_eq!(c.rasterize(5, 5).get_pixel(3, 3)[0], 255);
    }
}
