use serde::{Deserialize, Serialize};

pub type TPtI = i32;
pub type TPtF = f64;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Point<T> {
    pub x: T,
    pub y: T,
}
pub type PtI = Point<TPtI>;
pub type PtF = Point<TPtF>;

impl<T> From<(T, T)> for Point<T> {
    fn from(value: (T, T)) -> Self {
        Point {
            x: value.0,
            y: value.1,
        }
    }
}
impl<T> From<Point<T>> for (T, T) {
    fn from(p: Point<T>) -> Self {
        (p.x, p.y)
    }
}
impl From<PtF> for PtI {
    fn from(p: PtF) -> Self {
        PtI {
            x: p.x.round() as TPtI,
            y: p.y.round() as TPtI,
        }
    }
}
impl From<PtI> for PtF {
    fn from(p: PtI) -> Self {
        PtF {
            x: TPtF::from(p.x),
            y: TPtF::from(p.y),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ShapeI {
    pub w: u32,
    pub h: u32,
}
impl ShapeI {
    pub fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }
    pub fn square(size: u32) -> Self {
        Self { w: size, h: size }
    }
    pub fn from_im<I>(im: &I) -> Self
    where
        I: image::GenericImageView,
    {
        Self {
            w: im.width(),
            h: im.height(),
        }
    }
    /// Clamps a position to the last valid pixel of this shape.
    pub fn clamp(&self, p: PtF) -> PtF {
        let x_max = TPtF::from(self.w.saturating_sub(1));
        let y_max = TPtF::from(self.h.saturating_sub(1));
        PtF {
            x: p.x.clamp(0.0, x_max),
            y: p.y.clamp(0.0, y_max),
        }
    }
}

/// Box spanned by two corners in pixel coordinates of a tile.
///
/// `(x1, y1)` is the drag anchor and `(x2, y2)` the release point. The corners are kept
/// as drawn, so `x1 > x2` is possible. Normalization orders them.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub x1: TPtI,
    pub y1: TPtI,
    pub x2: TPtI,
    pub y2: TPtI,
}

impl BoundingBox {
    pub fn new(x1: TPtI, y1: TPtI, x2: TPtI, y2: TPtI) -> Self {
        Self { x1, y1, x2, y2 }
    }
    pub fn from_points(p1: PtI, p2: PtI) -> Self {
        Self::new(p1.x, p1.y, p2.x, p2.y)
    }
    pub fn coordinates(&self) -> (TPtI, TPtI, TPtI, TPtI) {
        (self.x1, self.y1, self.x2, self.y2)
    }
    pub fn x_min(&self) -> TPtI {
        self.x1.min(self.x2)
    }
    pub fn y_min(&self) -> TPtI {
        self.y1.min(self.y2)
    }
    pub fn x_max(&self) -> TPtI {
        self.x1.max(self.x2)
    }
    pub fn y_max(&self) -> TPtI {
        self.y1.max(self.y2)
    }
    pub fn w(&self) -> u32 {
        self.x1.abs_diff(self.x2)
    }
    pub fn h(&self) -> u32 {
        self.y1.abs_diff(self.y2)
    }
    /// Normalizes the box by the shape of its tile.
    pub fn to_yolo(&self, shape: ShapeI) -> YoloBox {
        let w_im = TPtF::from(shape.w);
        let h_im = TPtF::from(shape.h);
        let (x1, x2) = (TPtF::from(self.x_min()), TPtF::from(self.x_max()));
        let (y1, y2) = (TPtF::from(self.y_min()), TPtF::from(self.y_max()));
        YoloBox {
            x_center: (x1 + x2) / 2.0 / w_im,
            y_center: (y1 + y2) / 2.0 / h_im,
            width: (x2 - x1) / w_im,
            height: (y2 - y1) / h_im,
        }
    }
}

/// Center, width and height of a box relative to the tile shape.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub struct YoloBox {
    pub x_center: TPtF,
    pub y_center: TPtF,
    pub width: TPtF,
    pub height: TPtF,
}

impl YoloBox {
    /// Pixel box on a tile of `shape`. Corners outside of the tile end up on its border.
    pub fn to_bb(&self, shape: ShapeI) -> BoundingBox {
        let w_im = TPtF::from(shape.w);
        let h_im = TPtF::from(shape.h);
        let xc = self.x_center * w_im;
        let yc = self.y_center * h_im;
        let w_half = self.width * w_im / 2.0;
        let h_half = self.height * h_im / 2.0;
        BoundingBox::from_points(
            shape
                .clamp(PtF {
                    x: xc - w_half,
                    y: yc - h_half,
                })
                .into(),
            shape
                .clamp(PtF {
                    x: xc + w_half,
                    y: yc + h_half,
                })
                .into(),
        )
    }
    pub fn is_normalized(&self) -> bool {
        [self.x_center, self.y_center, self.width, self.height]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }
}

#[cfg(test)]
fn close_px(bb1: &BoundingBox, bb2: &BoundingBox) -> bool {
    let (a, b) = (bb1.coordinates(), bb2.coordinates());
    (a.0 - b.0).abs() <= 1 && (a.1 - b.1).abs() <= 1 && (a.2 - b.2).abs() <= 1 && (a.3 - b.3).abs() <= 1
}

#[test]
fn test_yolo_roundtrip() {
    let shapes = [ShapeI::square(640), ShapeI::new(1280, 720), ShapeI::new(17, 33)];
    for shape in shapes {
        let w = shape.w as TPtI;
        let h = shape.h as TPtI;
        let bbs = [
            BoundingBox::new(0, 0, w - 1, h - 1),
            BoundingBox::new(1, 2, 3, 4),
            BoundingBox::new(w / 3, h / 5, w / 2, h - 2),
            BoundingBox::new(5, 5, 5, 5),
        ];
        for bb in bbs {
            let yolo = bb.to_yolo(shape);
            assert!(yolo.is_normalized(), "{yolo:?}");
            assert!(close_px(&yolo.to_bb(shape), &bb), "{bb:?} vs {:?}", yolo.to_bb(shape));
        }
    }
}

#[test]
fn test_reversed_corners() {
    let shape = ShapeI::square(640);
    let drawn = BoundingBox::new(300, 400, 100, 100);
    let yolo = drawn.to_yolo(shape);
    assert!(yolo.is_normalized());
    assert_eq!(yolo, BoundingBox::new(100, 100, 300, 400).to_yolo(shape));
    assert_eq!(yolo.to_bb(shape), BoundingBox::new(100, 100, 300, 400));
    assert_eq!(drawn.w(), 200);
    assert_eq!(drawn.h(), 300);
}

#[test]
fn test_clamp() {
    let shape = ShapeI::square(640);
    assert_eq!(shape.clamp((-3.0, 700.0).into()), PtF { x: 0.0, y: 639.0 });
    let p: PtI = shape.clamp((12.4, 12.6).into()).into();
    assert_eq!(p, PtI { x: 12, y: 13 });
}

#[test]
fn test_to_bb_out_of_range() {
    let shape = ShapeI::square(640);
    let huge = YoloBox {
        x_center: 0.5,
        y_center: 0.5,
        width: 1e12,
        height: 1e12,
    };
    assert!(!huge.is_normalized());
    assert_eq!(huge.to_bb(shape), BoundingBox::new(0, 0, 639, 639));
    let shifted = YoloBox {
        x_center: 1.5,
        y_center: -0.5,
        width: 0.1,
        height: 0.1,
    };
    assert_eq!(shifted.to_bb(shape), BoundingBox::new(639, 0, 639, 0));
}
