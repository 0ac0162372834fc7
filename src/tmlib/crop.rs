use crate::{
    domain::ShapeI,
    file_util::{self, to_stem_str},
    image_util,
    result::{to_tm, TmResult},
    tmerr,
};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Source images directly in `dir` with the given extension.
pub fn source_images(dir: &Path, extension: &str) -> TmResult<Vec<PathBuf>> {
    let mut paths = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .map(|entry| entry.map_err(to_tm))
        .filter(|entry| match entry {
            Err(_) => true,
            Ok(e) => {
                e.file_type().is_file()
                    && e.path().extension().and_then(|x| x.to_str()) == Some(extension)
            }
        })
        .map(|entry| Ok(entry?.into_path()))
        .collect::<TmResult<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

/// Top left corners of all full tiles, row by row.
pub fn tile_corners(shape: ShapeI, crop_shape: ShapeI, overlap: u32) -> TmResult<Vec<(u32, u32)>> {
    if overlap >= crop_shape.w || overlap >= crop_shape.h {
        return Err(tmerr!(
            "overlap {} needs to be smaller than the crop shape {:?}",
            overlap,
            crop_shape
        ));
    }
    if shape.w < crop_shape.w || shape.h < crop_shape.h {
        return Ok(vec![]);
    }
    let step_x = (crop_shape.w - overlap) as usize;
    let step_y = (crop_shape.h - overlap) as usize;
    Ok((0..=(shape.h - crop_shape.h))
        .step_by(step_y)
        .flat_map(|top| {
            (0..=(shape.w - crop_shape.w))
                .step_by(step_x)
                .map(move |left| (left, top))
        })
        .collect())
}

/// Cuts every image into tiles of `crop_shape` and saves them as `<stem>_crop_<n>.jpg`.
///
/// Tiles that would reach over the right or bottom border are dropped.
pub fn crop_images(
    image_paths: &[PathBuf],
    output_dir: &Path,
    crop_shape: ShapeI,
    overlap: u32,
) -> TmResult<Vec<PathBuf>> {
    file_util::create_dir_all(output_dir)?;
    let mut written = vec![];
    for image_path in image_paths {
        let im = image_util::read_image(image_path)?;
        let stem = to_stem_str(image_path)?;
        let corners = tile_corners(image_util::shape_of(&im), crop_shape, overlap)?;
        for (i, (left, top)) in corners.iter().enumerate() {
            let tile = im.crop_imm(*left, *top, crop_shape.w, crop_shape.h);
            let save_path = output_dir.join(format!("{stem}_crop_{}.jpg", i + 1));
            tile.to_rgb8()
                .save(&save_path)
                .map_err(|e| tmerr!("could not save tile {:?} due to {:?}", save_path, e))?;
            info!("cropped and saved image {save_path:?}");
            written.push(save_path);
        }
        info!("total crops for {image_path:?}: {}", corners.len());
    }
    Ok(written)
}

#[cfg(test)]
use crate::{defer_folder_removal, file_util::DEFAULT_TMPDIR, test_helpers::write_tiles};

#[test]
fn test_tile_corners() {
    let crop = ShapeI::square(640);
    let corners = tile_corners(ShapeI::new(1300, 700), crop, 0).unwrap();
    assert_eq!(corners, vec![(0, 0), (640, 0)]);
    let corners = tile_corners(ShapeI::new(1300, 700), crop, 20).unwrap();
    assert_eq!(corners, vec![(0, 0), (620, 0)]);
    let corners = tile_corners(ShapeI::new(1300, 1300), crop, 20).unwrap();
    assert_eq!(corners, vec![(0, 0), (620, 0), (0, 620), (620, 620)]);
    assert_eq!(tile_corners(ShapeI::new(640, 640), crop, 0).unwrap(), vec![(0, 0)]);
    assert!(tile_corners(ShapeI::new(639, 2000), crop, 0).unwrap().is_empty());
    assert!(tile_corners(ShapeI::new(2000, 2000), crop, 640).is_err());
}

#[test]
fn test_crop_images() {
    let root = DEFAULT_TMPDIR.join("test_crop_images");
    defer_folder_removal!(&root);
    let sources = write_tiles(&root.join("selection"), &["73", "74"], ShapeI::new(50, 30));
    assert_eq!(source_images(&root.join("selection"), "jpg").unwrap(), sources);
    let out = root.join("cropped_images");
    let written = crop_images(&sources, &out, ShapeI::square(20), 5).unwrap();
    // rows at y = 0 and the columns at x = 0, 15, 30
    assert_eq!(written.len(), 6);
    assert_eq!(written[0], out.join("73_crop_1.jpg"));
    assert_eq!(written[5], out.join("74_crop_3.jpg"));
    let tile = image_util::read_image(&written[2]).unwrap();
    assert_eq!(image_util::shape_of(&tile), ShapeI::square(20));
}
