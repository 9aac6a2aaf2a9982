//! Gradient Hough circle search
//!
//! Every edge pixel votes along its gradient direction, on both sides, for
//! all radii in the band. Local accumulator maxima above the vote threshold
//! are center candidates; each surviving candidate gets its radius from the
//! edge-distance histogram.

use image::GrayImage;
use imageproc::edges::canny;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

/// Search parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughParams {
    /// Minimum distance between accepted centers (pixels)
    pub min_dist: f32,
    /// Upper Canny threshold; the lower one is half of it
    pub edge_threshold: f32,
    /// Votes a center needs to become a candidate
    pub accumulator_threshold: u32,
    pub min_radius: u32,
    pub max_radius: u32,
}

/// A detected circle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub x: u32,
    pub y: u32,
    pub radius: u32,
    /// Center votes, used for ordering
    pub votes: u32,
}

struct EdgePoint {
    x: u32,
    y: u32,
    dx: f32,
    dy: f32,
}

/// Find circles in a smoothed grayscale image, strongest first
pub fn find_circles(image: &GrayImage, params: &HoughParams) -> Vec<Circle> {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 || params.min_radius > params.max_radius {
        return Vec::new();
    }

    let points = edge_points(image, params.edge_threshold);
    if points.is_empty() {
        return Vec::new();
    }

    let accumulator = accumulate(&points, width, height, params);
    let centers = local_maxima(&accumulator, width, height, params.accumulator_threshold);

    let min_dist_sq = params.min_dist * params.min_dist;
    let mut circles: Vec<Circle> = Vec::new();

    for (x, y, votes) in centers {
        let too_close = circles.iter().any(|c| {
            let ddx = c.x as f32 - x as f32;
            let ddy = c.y as f32 - y as f32;
            ddx * ddx + ddy * ddy < min_dist_sq
        });
        if too_close {
            continue;
        }

        if let Some(radius) = best_radius(&points, x, y, params) {
            circles.push(Circle {
                x,
                y,
                radius,
                votes,
            });
        }
    }

    circles
}

fn edge_points(image: &GrayImage, high: f32) -> Vec<EdgePoint> {
    let edges = canny(image, high / 2.0, high);
    let gx = horizontal_sobel(image);
    let gy = vertical_sobel(image);

    let mut points = Vec::new();
    for (x, y, px) in edges.enumerate_pixels() {
        if px.0[0] == 0 {
            continue;
        }
        let sx = gx.get_pixel(x, y).0[0] as f32;
        let sy = gy.get_pixel(x, y).0[0] as f32;
        let mag = (sx * sx + sy * sy).sqrt();
        if mag <= f32::EPSILON {
            continue;
        }
        points.push(EdgePoint {
            x,
            y,
            dx: sx / mag,
            dy: sy / mag,
        });
    }
    points
}

fn accumulate(points: &[EdgePoint], width: u32, height: u32, params: &HoughParams) -> Vec<u32> {
    let mut acc = vec![0u32; (width * height) as usize];

    for p in points {
        for sign in [1.0f32, -1.0] {
            // Skip cells already hit along this ray so each ray votes once per cell
            let mut last = usize::MAX;
            for r in params.min_radius..=params.max_radius {
                let cx = (p.x as f32 + sign * p.dx * r as f32).round();
                let cy = (p.y as f32 + sign * p.dy * r as f32).round();
                if cx < 0.0 || cy < 0.0 || cx >= width as f32 || cy >= height as f32 {
                    break;
                }
                let idx = cy as usize * width as usize + cx as usize;
                if idx != last {
                    acc[idx] += 1;
                    last = idx;
                }
            }
        }
    }

    acc
}

/// Cells above `threshold` that dominate their 4-neighbourhood, strongest first
fn local_maxima(acc: &[u32], width: u32, height: u32, threshold: u32) -> Vec<(u32, u32, u32)> {
    let w = width as usize;
    let mut centers = Vec::new();

    for y in 1..height as usize - 1 {
        for x in 1..w - 1 {
            let idx = y * w + x;
            let v = acc[idx];
            if v > threshold
                && v > acc[idx - 1]
                && v >= acc[idx + 1]
                && v > acc[idx - w]
                && v >= acc[idx + w]
            {
                centers.push((x as u32, y as u32, v));
            }
        }
    }

    // Ties resolve in raster order
    centers.sort_by(|a, b| b.2.cmp(&a.2).then(a.1.cmp(&b.1)).then(a.0.cmp(&b.0)));
    centers
}

/// Radius with the most edge support around `(cx, cy)`
fn best_radius(points: &[EdgePoint], cx: u32, cy: u32, params: &HoughParams) -> Option<u32> {
    let min_r = params.min_radius as usize;
    let max_r = params.max_radius as usize;
    let mut histogram = vec![0u32; max_r + 2];

    for p in points {
        let ddx = p.x as f32 - cx as f32;
        let ddy = p.y as f32 - cy as f32;
        let r = (ddx * ddx + ddy * ddy).sqrt().round() as usize;
        if r + 1 >= min_r && r <= max_r + 1 {
            histogram[r.min(max_r + 1)] += 1;
        }
    }

    // Edges of a rasterized circle straddle two or three integer radii
    (min_r..=max_r)
        .map(|r| {
            let support = histogram[r.saturating_sub(1)] + histogram[r] + histogram[r + 1];
            (r, support)
        })
        .filter(|&(_, support)| support >= params.accumulator_threshold)
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(r, _)| r as u32)
}
