use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgb, RgbImage};

use crate::{
    domain::ShapeI, file_util, model::AnnotatorModel, record::RecordStore,
    tracing_setup::init_tracing_for_tests,
};

pub const TILE_SHAPE: ShapeI = ShapeI { w: 640, h: 640 };

pub fn images_folder(root: &Path) -> PathBuf {
    root.join("cropped_images")
}
pub fn labels_folder(root: &Path) -> PathBuf {
    root.join("cropped_labels")
}

/// Model for an in-memory gray tile, the image file itself is never touched.
pub fn make_model(root: &Path, stem: &str) -> AnnotatorModel {
    init_tracing_for_tests();
    let im = DynamicImage::ImageRgb8(RgbImage::from_pixel(
        TILE_SHAPE.w,
        TILE_SHAPE.h,
        Rgb([90, 90, 90]),
    ));
    let image_path = images_folder(root).join(format!("{stem}.jpg"));
    AnnotatorModel::from_image(&image_path, im, RecordStore::new(labels_folder(root)), 0).unwrap()
}

/// Writes small jpg tiles with the given stems and returns their paths.
pub fn write_tiles(folder: &Path, stems: &[&str], shape: ShapeI) -> Vec<PathBuf> {
    init_tracing_for_tests();
    file_util::create_dir_all(folder).unwrap();
    stems
        .iter()
        .map(|stem| {
            let p = folder.join(format!("{stem}.jpg"));
            RgbImage::from_pixel(shape.w, shape.h, Rgb([30, 60, 90]))
                .save(&p)
                .unwrap();
            p
        })
        .collect()
}
