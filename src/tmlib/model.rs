use crate::{
    domain::{BoundingBox, ShapeI},
    file_util::to_stem_str,
    image_util,
    record::{MalformedRecordPolicy, RecordLine, RecordStore, SaveMode},
    result::TmResult,
};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The boxes of one tile together with the tile itself and the store they are flushed to.
#[derive(Clone, Debug)]
pub struct AnnotatorModel {
    image_path: PathBuf,
    stem: String,
    image: DynamicImage,
    shape: ShapeI,
    class_id: u32,
    boxes: Vec<BoundingBox>,
    /// class of each box, loaded boxes keep the class of their record
    box_classes: Vec<u32>,
    store: RecordStore,
}

impl AnnotatorModel {
    /// Decodes the tile. Fails if the image cannot be read.
    pub fn new(image_path: &Path, store: RecordStore, class_id: u32) -> TmResult<Self> {
        let image = image_util::read_image(image_path)?;
        Self::from_image(image_path, image, store, class_id)
    }

    pub fn from_image(
        image_path: &Path,
        image: DynamicImage,
        store: RecordStore,
        class_id: u32,
    ) -> TmResult<Self> {
        let stem = to_stem_str(image_path)?.to_string();
        let shape = image_util::shape_of(&image);
        Ok(Self {
            image_path: image_path.to_path_buf(),
            stem,
            image,
            shape,
            class_id,
            boxes: vec![],
            box_classes: vec![],
            store,
        })
    }

    pub fn add_bounding_box(&mut self, bb: BoundingBox) {
        self.boxes.push(bb);
        self.box_classes.push(self.class_id);
    }

    fn to_record_line(&self, idx: usize) -> RecordLine {
        RecordLine {
            class_id: self.box_classes[idx],
            bb: self.boxes[idx].to_yolo(self.shape),
        }
    }

    /// Flushes the last box in append mode or all boxes in overwrite mode.
    pub fn save_annotations(&self, mode: SaveMode) -> TmResult<()> {
        let lines = match mode {
            SaveMode::Append => match self.boxes.len().checked_sub(1) {
                Some(last) => vec![self.to_record_line(last)],
                None => {
                    warn!("nothing to append for {}", self.stem);
                    return Ok(());
                }
            },
            SaveMode::Overwrite => (0..self.boxes.len())
                .map(|idx| self.to_record_line(idx))
                .collect(),
        };
        self.store.write(&self.stem, &lines, mode)?;
        Ok(())
    }

    /// Appends the boxes of an existing record, denormalized with the shape of this tile.
    pub fn load_record(&mut self, path: &Path, policy: MalformedRecordPolicy) -> TmResult<usize> {
        let lines = self.store.read(path, policy)?;
        for line in &lines {
            if line.class_id != self.class_id {
                warn!(
                    "{path:?} contains class {} but {} is annotated, keeping the box with its class",
                    line.class_id, self.class_id
                );
            }
            self.boxes.push(line.bb.to_bb(self.shape));
            self.box_classes.push(line.class_id);
        }
        info!("loaded {} box(es) from {path:?}", lines.len());
        Ok(lines.len())
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }
    pub fn shape(&self) -> ShapeI {
        self.shape
    }
    pub fn class_id(&self) -> u32 {
        self.class_id
    }
    pub fn box_classes(&self) -> &[u32] {
        &self.box_classes
    }
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
    pub fn image_path(&self) -> &Path {
        &self.image_path
    }
    pub fn stem(&self) -> &str {
        &self.stem
    }
    pub fn record_path(&self) -> PathBuf {
        self.store.record_path(&self.stem)
    }
}

#[cfg(test)]
use crate::{defer_folder_removal, file_util::DEFAULT_TMPDIR, test_helpers::make_model};

#[test]
fn test_overwrite_lines() {
    let folder = DEFAULT_TMPDIR.join("test_overwrite_lines");
    defer_folder_removal!(&folder);
    let mut model = make_model(&folder, "tile_crop_1");
    let bbs = [
        BoundingBox::new(100, 100, 300, 400),
        BoundingBox::new(0, 0, 639, 639),
        BoundingBox::new(500, 20, 10, 30),
    ];
    for bb in bbs {
        model.add_bounding_box(bb);
    }
    model.save_annotations(SaveMode::Overwrite).unwrap();
    let content = std::fs::read_to_string(model.record_path()).unwrap();
    let lines = content.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), bbs.len());
    assert_eq!(lines[0], "0 0.312500 0.390625 0.312500 0.468750");
    for (line, bb) in lines.iter().zip(bbs.iter()) {
        let fields = line.split(' ').collect::<Vec<_>>();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[0], "0");
        for f in &fields[1..] {
            let v = f.parse::<f64>().unwrap();
            assert!((0.0..=1.0).contains(&v));
            assert_eq!(f.split('.').nth(1).map(str::len), Some(6));
        }
        let parsed = line.parse::<RecordLine>().unwrap();
        let back = parsed.bb.to_bb(model.shape());
        assert!((back.x_min() - bb.x_min()).abs() <= 1);
        assert!((back.y_max() - bb.y_max()).abs() <= 1);
    }
}

#[test]
fn test_append_then_overwrite() {
    let folder = DEFAULT_TMPDIR.join("test_append_then_overwrite");
    defer_folder_removal!(&folder);
    let mut model = make_model(&folder, "t");
    model.save_annotations(SaveMode::Append).unwrap();
    assert!(!model.record_path().exists());
    for i in 0..4 {
        model.add_bounding_box(BoundingBox::new(i * 10, i * 10, i * 10 + 50, i * 10 + 60));
        model.save_annotations(SaveMode::Append).unwrap();
    }
    let record_path = model.record_path();
    let n_lines = || {
        std::fs::read_to_string(&record_path)
            .unwrap()
            .lines()
            .count()
    };
    assert_eq!(n_lines(), 4);
    model.add_bounding_box(BoundingBox::new(1, 1, 2, 2));
    model.save_annotations(SaveMode::Overwrite).unwrap();
    assert_eq!(n_lines(), model.boxes().len());
}

#[test]
fn test_load_record() {
    let folder = DEFAULT_TMPDIR.join("test_load_record");
    defer_folder_removal!(&folder);
    let mut model = make_model(&folder, "T1");
    model.add_bounding_box(BoundingBox::new(100, 100, 300, 400));
    model.save_annotations(SaveMode::Append).unwrap();
    let mut resumed = make_model(&folder, "T1");
    let n = resumed
        .load_record(&model.record_path(), MalformedRecordPolicy::Abort)
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(resumed.boxes(), &[BoundingBox::new(100, 100, 300, 400)]);
}

#[test]
fn test_foreign_class_survives_overwrite() {
    let folder = DEFAULT_TMPDIR.join("test_foreign_class_survives_overwrite");
    defer_folder_removal!(&folder);
    let mut model = make_model(&folder, "T1");
    let record_path = model.record_path();
    crate::file_util::create_dir_all(record_path.parent().unwrap()).unwrap();
    crate::file_util::write(&record_path, "3 0.5 0.5 0.25 0.25\n").unwrap();
    model
        .load_record(&record_path, MalformedRecordPolicy::Abort)
        .unwrap();
    model.add_bounding_box(BoundingBox::new(100, 100, 300, 400));
    assert_eq!(model.box_classes(), &[3, 0]);
    model.save_annotations(SaveMode::Overwrite).unwrap();
    let content = std::fs::read_to_string(model.record_path()).unwrap();
    assert_eq!(
        content,
        "3 0.500000 0.500000 0.250000 0.250000\n0 0.312500 0.390625 0.312500 0.468750\n"
    );
}
