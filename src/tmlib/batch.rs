use crate::{
    domain::ShapeI,
    file_util::{self, to_stem_str},
    model::AnnotatorModel,
    record::{MalformedRecordPolicy, RecordStore},
    result::{trace_ok_err, TmResult},
    session::{Session, SessionEnd},
    tmerr,
};
use rand::Rng;
use std::{
    collections::{BTreeSet, VecDeque},
    path::{Path, PathBuf},
};
use tracing::{error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchCfg {
    pub image_dir: PathBuf,
    pub label_dir: PathBuf,
    pub batch_size: usize,
    /// file name or stem of a record to resume instead of sampling
    pub pinned_record: Option<String>,
    pub class_id: u32,
    pub image_extension: String,
    pub tile_size: u32,
    pub malformed_policy: MalformedRecordPolicy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchItem {
    pub image_path: PathBuf,
    pub resume_from: Option<PathBuf>,
}

/// All tiles of the image folder. Fails with "missing path" if there are none.
pub fn validate_image_dir(image_dir: &Path, extension: &str) -> TmResult<Vec<PathBuf>> {
    if !image_dir.is_dir() {
        return Err(tmerr!("missing path: image folder {:?} does not exist", image_dir));
    }
    let tiles = file_util::files_in_folder(image_dir, extension)?;
    if tiles.is_empty() {
        Err(tmerr!(
            "missing path: no '.{}' tiles found in {:?}",
            extension,
            image_dir
        ))
    } else {
        Ok(tiles)
    }
}

/// Stems of tiles without a record, sorted.
pub fn unlabeled_stems(tile_stems: &BTreeSet<String>, record_stems: &BTreeSet<String>) -> Vec<String> {
    tile_stems.difference(record_stems).cloned().collect()
}

fn tile_stems(tiles: &[PathBuf]) -> TmResult<BTreeSet<String>> {
    tiles
        .iter()
        .map(|p| to_stem_str(p).map(str::to_string))
        .collect()
}

/// Picks the tiles to annotate. Either exactly the pinned one or a uniform sample without
/// replacement from the unlabeled tiles.
pub fn select_batch<R>(cfg: &BatchCfg, rng: &mut R) -> TmResult<Vec<BatchItem>>
where
    R: Rng + ?Sized,
{
    let tiles = validate_image_dir(&cfg.image_dir, &cfg.image_extension)?;
    let store = RecordStore::new(&cfg.label_dir);
    let tile_path = |stem: &str| cfg.image_dir.join(format!("{stem}.{}", cfg.image_extension));
    if let Some(pinned) = &cfg.pinned_record {
        let stem = to_stem_str(Path::new(pinned))?;
        let image_path = tile_path(stem);
        if !tiles.contains(&image_path) {
            return Err(tmerr!(
                "missing path: no tile {:?} for record '{}'",
                image_path,
                pinned
            ));
        }
        let record_path = store.record_path(stem);
        return Ok(vec![BatchItem {
            image_path,
            resume_from: record_path.exists().then_some(record_path),
        }]);
    }
    let unlabeled = unlabeled_stems(&tile_stems(&tiles)?, &store.record_stems()?);
    if cfg.batch_size > unlabeled.len() {
        return Err(tmerr!(
            "cannot sample {} tiles from {} unlabeled ones",
            cfg.batch_size,
            unlabeled.len()
        ));
    }
    info!(
        "sampling {} of {} unlabeled tiles ({} in total)",
        cfg.batch_size,
        unlabeled.len(),
        tiles.len()
    );
    Ok(
        rand::seq::index::sample(rng, unlabeled.len(), cfg.batch_size)
            .into_iter()
            .map(|idx| BatchItem {
                image_path: tile_path(&unlabeled[idx]),
                resume_from: None,
            })
            .collect(),
    )
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub n_saved: usize,
    pub n_quit: usize,
    pub n_failed: usize,
}

/// Hands out one session per selected tile, strictly one after the other.
#[derive(Debug)]
pub struct BatchOrchestrator {
    cfg: BatchCfg,
    queue: VecDeque<BatchItem>,
    n_total: usize,
}

impl BatchOrchestrator {
    /// Selects the batch up front, configuration errors surface here before any session.
    pub fn new<R>(cfg: BatchCfg, rng: &mut R) -> TmResult<Self>
    where
        R: Rng + ?Sized,
    {
        let queue = select_batch(&cfg, rng)?.into_iter().collect::<VecDeque<_>>();
        let n_total = queue.len();
        Ok(Self {
            cfg,
            queue,
            n_total,
        })
    }

    fn make_session(&self, item: &BatchItem) -> TmResult<Session> {
        let store = RecordStore::new(&self.cfg.label_dir);
        let model = AnnotatorModel::new(&item.image_path, store, self.cfg.class_id)?;
        if model.shape() != ShapeI::square(self.cfg.tile_size) {
            warn!(
                "tile {:?} has shape {:?}, expected {}x{}",
                item.image_path,
                model.shape(),
                self.cfg.tile_size,
                self.cfg.tile_size
            );
        }
        match &item.resume_from {
            Some(record_path) => Session::resume(model, record_path, self.cfg.malformed_policy),
            None => Ok(Session::new(model)),
        }
    }

    /// Session for the next tile. Tiles that cannot be loaded are reported and skipped.
    pub fn next_session(&mut self) -> Option<Session> {
        while let Some(item) = self.queue.pop_front() {
            match self.make_session(&item) {
                Ok(session) => {
                    info!(
                        "annotating {:?} ({}/{})",
                        item.image_path,
                        self.position(),
                        self.n_total
                    );
                    return Some(session);
                }
                Err(e) => error!("skipping tile {:?} due to {e}", item.image_path),
            }
        }
        None
    }

    /// Runs the whole batch, `annotate` drives one session until it ends.
    pub fn run<F>(&mut self, mut annotate: F) -> BatchSummary
    where
        F: FnMut(&mut Session) -> TmResult<SessionEnd>,
    {
        let mut summary = BatchSummary::default();
        let n_initial = self.queue.len();
        let mut n_started = 0;
        while let Some(mut session) = self.next_session() {
            n_started += 1;
            match trace_ok_err(annotate(&mut session)) {
                Some(SessionEnd::Saved) => summary.n_saved += 1,
                Some(SessionEnd::Quit) => summary.n_quit += 1,
                None => summary.n_failed += 1,
            }
        }
        summary.n_failed += n_initial - n_started;
        info!("batch done {summary:?}");
        summary
    }

    /// 1-based index of the tile handed out last.
    pub fn position(&self) -> usize {
        self.n_total - self.queue.len()
    }
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
    pub fn n_total(&self) -> usize {
        self.n_total
    }
}

#[cfg(test)]
use {
    crate::{
        defer_folder_removal,
        events::{Event, Events, KeyCode},
        file_util::DEFAULT_TMPDIR,
        test_helpers::{images_folder, labels_folder, write_tiles},
    },
    rand::{rngs::StdRng, SeedableRng},
};

#[cfg(test)]
fn make_cfg(root: &Path, batch_size: usize) -> BatchCfg {
    BatchCfg {
        image_dir: images_folder(root),
        label_dir: labels_folder(root),
        batch_size,
        pinned_record: None,
        class_id: 0,
        image_extension: "jpg".to_string(),
        tile_size: 16,
        malformed_policy: MalformedRecordPolicy::Skip,
    }
}

#[test]
fn test_unlabeled() {
    let tiles: BTreeSet<String> = ["a", "b", "c", "d"].map(String::from).into_iter().collect();
    let records: BTreeSet<String> = ["b", "d", "x"].map(String::from).into_iter().collect();
    assert_eq!(unlabeled_stems(&tiles, &records), vec!["a", "c"]);
}

#[test]
fn test_missing_path() {
    let root = DEFAULT_TMPDIR.join("test_batch_missing_path");
    defer_folder_removal!(&root);
    let cfg = make_cfg(&root, 1);
    let mut rng = StdRng::seed_from_u64(0);
    let err = select_batch(&cfg, &mut rng).unwrap_err();
    assert!(err.msg().starts_with("missing path"), "{err}");
    file_util::create_dir_all(&cfg.image_dir).unwrap();
    file_util::write(cfg.image_dir.join("note.txt"), "").unwrap();
    let err = select_batch(&cfg, &mut rng).unwrap_err();
    assert!(err.msg().starts_with("missing path"), "{err}");
}

#[test]
fn test_selection_skips_labeled() {
    let root = DEFAULT_TMPDIR.join("test_selection_skips_labeled");
    defer_folder_removal!(&root);
    let stems = ["t_crop_1", "t_crop_2", "t_crop_3", "t_crop_4", "t_crop_5"];
    write_tiles(&images_folder(&root), &stems, ShapeI::square(16));
    let store = RecordStore::new(labels_folder(&root));
    store.write("t_crop_2", &[], crate::record::SaveMode::Overwrite).unwrap();
    store.write("t_crop_4", &[], crate::record::SaveMode::Overwrite).unwrap();
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let batch = select_batch(&make_cfg(&root, 3), &mut rng).unwrap();
        let mut picked = batch
            .iter()
            .map(|item| to_stem_str(&item.image_path).unwrap().to_string())
            .collect::<Vec<_>>();
        assert!(batch.iter().all(|item| item.resume_from.is_none()));
        picked.sort();
        assert_eq!(picked, vec!["t_crop_1", "t_crop_3", "t_crop_5"]);
    }
    let mut rng = StdRng::seed_from_u64(1);
    assert_eq!(select_batch(&make_cfg(&root, 1), &mut rng).unwrap().len(), 1);
    for _ in 0..3 {
        let err = select_batch(&make_cfg(&root, 4), &mut rng).unwrap_err();
        assert!(err.msg().contains("cannot sample 4"), "{err}");
    }
}

#[test]
fn test_pinned() {
    let root = DEFAULT_TMPDIR.join("test_batch_pinned");
    defer_folder_removal!(&root);
    write_tiles(&images_folder(&root), &["a", "b"], ShapeI::square(16));
    let store = RecordStore::new(labels_folder(&root));
    store.write("a", &[], crate::record::SaveMode::Overwrite).unwrap();
    let mut cfg = make_cfg(&root, 100);
    cfg.pinned_record = Some("a.txt".to_string());
    let mut rng = StdRng::seed_from_u64(0);
    let batch = select_batch(&cfg, &mut rng).unwrap();
    assert_eq!(
        batch,
        vec![BatchItem {
            image_path: images_folder(&root).join("a.jpg"),
            resume_from: Some(store.record_path("a")),
        }]
    );
    cfg.pinned_record = Some("zzz.txt".to_string());
    assert!(select_batch(&cfg, &mut rng).is_err());
}

#[test]
fn test_run_sequentially() {
    let root = DEFAULT_TMPDIR.join("test_batch_run");
    defer_folder_removal!(&root);
    write_tiles(&images_folder(&root), &["a", "b", "c"], ShapeI::square(16));
    file_util::write(images_folder(&root).join("broken.jpg"), "no image").unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let mut orchestrator = BatchOrchestrator::new(make_cfg(&root, 4), &mut rng).unwrap();
    assert_eq!(orchestrator.remaining(), 4);
    let mut seen = vec![];
    let summary = orchestrator.run(|session| {
        seen.push(session.model().stem().to_string());
        let drag = Events::default()
            .events(vec![
                Event::Pressed(KeyCode::MouseLeft),
                Event::Held(KeyCode::MouseLeft),
                Event::Released(KeyCode::MouseLeft),
                Event::Pressed(KeyCode::C),
            ])
            .presspos_orig(Some((1.0, 1.0).into()))
            .mousepos_orig(Some((8.0, 8.0).into()));
        session.on_events(&drag)?;
        let key = if seen.len() == 1 { KeyCode::Q } else { KeyCode::S };
        let end = session.on_events(&Events::default().events(vec![Event::Pressed(key)]))?;
        end.ok_or_else(|| tmerr!("session did not end"))
    });
    assert_eq!(
        summary,
        BatchSummary {
            n_saved: 2,
            n_quit: 1,
            n_failed: 1
        }
    );
    assert_eq!(seen.len(), 3);
    assert!(!seen.contains(&"broken".to_string()));
    let stems = RecordStore::new(labels_folder(&root)).record_stems().unwrap();
    assert_eq!(stems.len(), 3);
    assert_eq!(orchestrator.remaining(), 0);
}
