//! Software rasteriser for overlay plans.
//!
//! Paints ellipses and rectangles with source-over alpha blending. Glow and
//! label glyphs are not rasterised; a label shows up as its backing box.

use crate::presenter::{Color, DrawOp, OverlayPlan};
use image::{imageops, Rgba, RgbaImage, RgbImage};

/// Render `plan` onto a transparent canvas, or onto a copy of `base`.
///
/// `base` is expected to be already mirrored and is scaled by nothing:
/// pixels outside it stay transparent.
pub fn render(plan: &OverlayPlan, base: Option<&RgbaImage>) -> RgbaImage {
    let mut canvas = RgbaImage::new(plan.width, plan.height);
    if let Some(base) = base {
        imageops::replace(&mut canvas, base, 0, 0);
    }

    for op in &plan.ops {
        match op {
            DrawOp::Ellipse {
                center,
                radii,
                fill,
                stroke,
                ..
            } => {
                if let Some(fill) = fill {
                    fill_ellipse(&mut canvas, *center, *radii, *fill);
                }
                if let Some(stroke) = stroke {
                    stroke_ellipse(&mut canvas, *center, *radii, stroke.width, stroke.color);
                }
            }
            DrawOp::Rect { xywh, fill } => fill_rect(&mut canvas, *xywh, *fill),
            DrawOp::Label { .. } => {}
        }
    }

    canvas
}

/// Flip a captured RGB frame into the selfie orientation the overlay uses.
pub fn mirror(frame: &RgbImage) -> RgbaImage {
    let flipped = imageops::flip_horizontal(frame);
    image::DynamicImage::ImageRgb8(flipped).to_rgba8()
}

fn fill_ellipse(canvas: &mut RgbaImage, center: (f32, f32), radii: (f32, f32), color: Color) {
    let (rx, ry) = radii;
    if rx <= 0.0 || ry <= 0.0 {
        return;
    }
    for_each_in_box(canvas, center, (rx, ry), color, |dx, dy| {
        (dx / rx).powi(2) + (dy / ry).powi(2) <= 1.0
    });
}

fn stroke_ellipse(
    canvas: &mut RgbaImage,
    center: (f32, f32),
    radii: (f32, f32),
    width: f32,
    color: Color,
) {
    let (rx, ry) = radii;
    if rx <= 0.0 || ry <= 0.0 || width <= 0.0 {
        return;
    }
    let half = width / 2.0;
    let scale = rx.min(ry);
    for_each_in_box(canvas, center, (rx + half, ry + half), color, |dx, dy| {
        let r = ((dx / rx).powi(2) + (dy / ry).powi(2)).sqrt();
        ((r - 1.0) * scale).abs() <= half
    });
}

fn fill_rect(canvas: &mut RgbaImage, xywh: (f32, f32, f32, f32), color: Color) {
    let (x, y, w, h) = xywh;
    let x0 = x.max(0.0) as u32;
    let y0 = y.max(0.0) as u32;
    let x1 = ((x + w).max(0.0) as u32).min(canvas.width());
    let y1 = ((y + h).max(0.0) as u32).min(canvas.height());
    for py in y0..y1 {
        for px in x0..x1 {
            blend(canvas.get_pixel_mut(px, py), color);
        }
    }
}

fn for_each_in_box(
    canvas: &mut RgbaImage,
    center: (f32, f32),
    extent: (f32, f32),
    color: Color,
    inside: impl Fn(f32, f32) -> bool,
) {
    let (cx, cy) = center;
    let x0 = (cx - extent.0).floor().max(0.0) as u32;
    let y0 = (cy - extent.1).floor().max(0.0) as u32;
    let x1 = ((cx + extent.0).ceil().max(0.0) as u32).min(canvas.width());
    let y1 = ((cy + extent.1).ceil().max(0.0) as u32).min(canvas.height());

    for py in y0..y1 {
        for px in x0..x1 {
            let dx = px as f32 + 0.5 - cx;
            let dy = py as f32 + 0.5 - cy;
            if inside(dx, dy) {
                blend(canvas.get_pixel_mut(px, py), color);
            }
        }
    }
}

/// Source-over compositing of `src` onto `dst`.
fn blend(dst: &mut Rgba<u8>, src: Color) {
    let sa = src[3] as f32 / 255.0;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for i in 0..3 {
        let s = src[i] as f32;
        let d = dst[i] as f32;
        let c = (s * sa + d * da * (1.0 - sa)) / out_a;
        dst[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::Stroke;

    fn plan(ops: Vec<DrawOp>) -> OverlayPlan {
        OverlayPlan {
            width: 100,
            height: 100,
            ops,
        }
    }

    #[test]
    fn test_empty_plan_is_transparent() {
        let img = render(&OverlayPlan::empty(8, 4), None);
        assert_eq!(img.dimensions(), (8, 4));
        assert!(img.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_ellipse_fill_covers_centre_only() {
        let img = render(
            &plan(vec![DrawOp::Ellipse {
                center: (50.0, 50.0),
                radii: (20.0, 10.0),
                fill: Some([255, 0, 0, 255]),
                stroke: None,
                glow: 0.0,
            }]),
            None,
        );
        assert_eq!(img.get_pixel(50, 50).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(50, 70)[3], 0);
        assert_eq!(img.get_pixel(5, 5)[3], 0);
    }

    #[test]
    fn test_stroke_leaves_interior_empty() {
        let img = render(
            &plan(vec![DrawOp::Ellipse {
                center: (50.0, 50.0),
                radii: (30.0, 30.0),
                fill: None,
                stroke: Some(Stroke {
                    color: [0, 255, 0, 255],
                    width: 4.0,
                }),
                glow: 0.0,
            }]),
            None,
        );
        assert_eq!(img.get_pixel(50, 50)[3], 0);
        assert_eq!(img.get_pixel(80, 50).0, [0, 255, 0, 255]);
    }

    #[test]
    fn test_translucent_rect_blends_over_base() {
        let base = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        let img = render(
            &plan(vec![DrawOp::Rect {
                xywh: (10.0, 10.0, 20.0, 20.0),
                fill: [255, 255, 255, 51],
            }]),
            Some(&base),
        );
        let p = img.get_pixel(15, 15);
        assert_eq!(p[3], 255);
        assert_eq!(p[0], 51);
        assert_eq!(img.get_pixel(40, 40).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_ops_outside_canvas_are_clipped() {
        let img = render(
            &plan(vec![
                DrawOp::Rect {
                    xywh: (-50.0, -50.0, 60.0, 60.0),
                    fill: [1, 2, 3, 255],
                },
                DrawOp::Ellipse {
                    center: (120.0, 50.0),
                    radii: (30.0, 30.0),
                    fill: Some([9, 9, 9, 255]),
                    stroke: None,
                    glow: 0.0,
                },
            ]),
            None,
        );
        assert_eq!(img.get_pixel(0, 0).0, [1, 2, 3, 255]);
        assert_eq!(img.get_pixel(10, 10)[3], 0);
        assert_eq!(img.get_pixel(99, 50).0, [9, 9, 9, 255]);
    }

    #[test]
    fn test_mirror_flips_columns() {
        let mut frame = RgbImage::new(2, 1);
        frame.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        let mirrored = mirror(&frame);
        assert_eq!(mirrored.get_pixel(1, 0).0, [255, 0, 0, 255]);
        assert_eq!(mirrored.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }
}
