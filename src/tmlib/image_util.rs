use crate::{
    domain::{BoundingBox, ShapeI},
    result::{to_tm, TmResult},
    tmerr,
};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use std::path::Path;

pub const COMMITTED_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
pub const DRAWING_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const OUTLINE_THICKNESS: u32 = 2;

pub fn read_image(path: &Path) -> TmResult<DynamicImage> {
    image::ImageReader::open(path)
        .map_err(to_tm)?
        .with_guessed_format()
        .map_err(to_tm)?
        .decode()
        .map_err(|e| tmerr!("could not decode image {:?}. {:?}", path, e))
}

/// Draws the outline of a box onto the image, growing inwards with the thickness.
///
/// Parts outside of the image are clipped.
pub fn draw_bb_outline(im: &mut RgbImage, bb: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let w = bb.w() + 1;
    let h = bb.h() + 1;
    for t in 0..thickness {
        let (w_t, h_t) = (w.saturating_sub(2 * t), h.saturating_sub(2 * t));
        if w_t == 0 || h_t == 0 {
            break;
        }
        let rect = Rect::at(bb.x_min() + t as i32, bb.y_min() + t as i32).of_size(w_t, h_t);
        draw_hollow_rect_mut(im, rect, color);
    }
}

pub fn shape_of(im: &DynamicImage) -> ShapeI {
    ShapeI::from_im(im)
}

#[test]
fn test_draw_outline() {
    let mut im = RgbImage::new(20, 20);
    let bb = BoundingBox::new(15, 12, 5, 2);
    draw_bb_outline(&mut im, &bb, COMMITTED_COLOR, OUTLINE_THICKNESS);
    assert_eq!(*im.get_pixel(5, 2), COMMITTED_COLOR);
    assert_eq!(*im.get_pixel(15, 12), COMMITTED_COLOR);
    assert_eq!(*im.get_pixel(6, 3), COMMITTED_COLOR);
    assert_eq!(*im.get_pixel(7, 4), Rgb([0, 0, 0]));
    assert_eq!(*im.get_pixel(10, 7), Rgb([0, 0, 0]));

    // degenerate and partially outside boxes must not panic
    draw_bb_outline(&mut im, &BoundingBox::new(3, 3, 3, 3), DRAWING_COLOR, 2);
    draw_bb_outline(&mut im, &BoundingBox::new(-5, -5, 30, 30), DRAWING_COLOR, 2);
}
