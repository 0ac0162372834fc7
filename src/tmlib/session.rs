use crate::{
    domain::{BoundingBox, PtF, PtI},
    events::{Event, Events, KeyCode},
    image_util::{draw_bb_outline, COMMITTED_COLOR, DRAWING_COLOR, OUTLINE_THICKNESS},
    model::AnnotatorModel,
    record::{MalformedRecordPolicy, SaveMode},
    result::TmResult,
};
use image::RgbImage;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DrawState {
    #[default]
    Idle,
    Dragging {
        anchor: PtI,
        current: PtI,
    },
    PendingCommit {
        pending: BoundingBox,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// left without writing anything beyond earlier commits
    Quit,
    /// all committed boxes have been written in overwrite mode
    Saved,
}

/// Drawing session for one tile.
///
/// The session owns its model exclusively. Persistence only happens on commit and save,
/// every other transition touches the raster alone.
#[derive(Debug)]
pub struct Session {
    model: AnnotatorModel,
    state: DrawState,
    committed_raster: RgbImage,
    raster: RgbImage,
    raster_generation: u64,
    end: Option<SessionEnd>,
}

impl Session {
    pub fn new(model: AnnotatorModel) -> Self {
        let base = model.image().to_rgb8();
        let mut session = Self {
            model,
            state: DrawState::Idle,
            committed_raster: base.clone(),
            raster: base,
            raster_generation: 0,
            end: None,
        };
        session.render_committed();
        session
    }

    /// Starts a session on top of a previously saved record. The record is loaded into the
    /// model before the first interaction.
    pub fn resume(
        mut model: AnnotatorModel,
        record_path: &Path,
        policy: MalformedRecordPolicy,
    ) -> TmResult<Self> {
        let n_loaded = model.load_record(record_path, policy)?;
        info!("resuming {} with {n_loaded} box(es)", model.stem());
        Ok(Self::new(model))
    }

    fn render_committed(&mut self) {
        let mut im = self.model.image().to_rgb8();
        for bb in self.model.boxes() {
            draw_bb_outline(&mut im, bb, COMMITTED_COLOR, OUTLINE_THICKNESS);
        }
        self.committed_raster = im;
        self.render_live(None);
    }

    fn render_live(&mut self, drawing: Option<BoundingBox>) {
        let mut im = self.committed_raster.clone();
        if let Some(bb) = drawing {
            draw_bb_outline(&mut im, &bb, DRAWING_COLOR, OUTLINE_THICKNESS);
        }
        self.raster = im;
        self.raster_generation += 1;
    }

    pub fn on_press(&mut self, p: PtI) {
        if self.is_terminal() {
            return;
        }
        if let DrawState::PendingCommit { pending } = self.state {
            debug!("discarding uncommitted box {pending:?}");
        }
        self.state = DrawState::Dragging {
            anchor: p,
            current: p,
        };
        self.render_live(None);
    }

    pub fn on_move(&mut self, p: PtI) {
        if let DrawState::Dragging { anchor, current } = self.state {
            if current != p && !self.is_terminal() {
                self.state = DrawState::Dragging { anchor, current: p };
                self.render_live(Some(BoundingBox::from_points(anchor, p)));
            }
        }
    }

    pub fn on_release(&mut self, p: PtI) {
        if let DrawState::Dragging { anchor, .. } = self.state {
            if self.is_terminal() {
                return;
            }
            let pending = BoundingBox::from_points(anchor, p);
            self.state = DrawState::PendingCommit { pending };
            self.render_live(Some(pending));
        }
    }

    /// Appends the pending box to the model and flushes it in append mode.
    pub fn on_commit(&mut self) -> TmResult<()> {
        if self.is_terminal() {
            return Ok(());
        }
        if let DrawState::PendingCommit { pending } = self.state {
            self.model.add_bounding_box(pending);
            self.state = DrawState::Idle;
            self.render_committed();
            self.model.save_annotations(SaveMode::Append)?;
            info!("committed {pending:?} to {:?}", self.model.record_path());
        }
        Ok(())
    }

    /// Rewrites the record with all committed boxes and ends the session.
    pub fn on_save(&mut self) -> TmResult<()> {
        if self.is_terminal() {
            return Ok(());
        }
        if let DrawState::PendingCommit { pending } = self.state {
            warn!("box {pending:?} was not committed and is not saved");
        }
        self.model.save_annotations(SaveMode::Overwrite)?;
        info!(
            "saved {} box(es) to {:?}",
            self.model.boxes().len(),
            self.model.record_path()
        );
        self.state = DrawState::Idle;
        self.end = Some(SessionEnd::Saved);
        Ok(())
    }

    pub fn on_quit(&mut self) {
        if !self.is_terminal() {
            info!("quitting {} without saving", self.model.stem());
            self.state = DrawState::Idle;
            self.end = Some(SessionEnd::Quit);
        }
    }

    fn to_tile_pos(&self, p: Option<PtF>) -> Option<PtI> {
        p.map(|p| self.model.shape().clamp(p).into())
    }

    /// Dispatches the events of one frame in order and reports whether the session ended.
    pub fn on_events(&mut self, events: &Events) -> TmResult<Option<SessionEnd>> {
        let mouse_pos = self.to_tile_pos(events.mouse_pos_on_orig);
        let press_pos = self
            .to_tile_pos(events.press_pos_on_orig)
            .or(mouse_pos);
        for e in events.iter() {
            if self.is_terminal() {
                break;
            }
            match e {
                Event::Pressed(KeyCode::MouseLeft) => {
                    if let Some(p) = press_pos {
                        self.on_press(p);
                    }
                }
                Event::Held(KeyCode::MouseLeft) => {
                    if let Some(p) = mouse_pos {
                        self.on_move(p);
                    }
                }
                Event::Released(KeyCode::MouseLeft) => {
                    if let Some(p) = mouse_pos {
                        self.on_release(p);
                    }
                }
                Event::Pressed(KeyCode::C) => self.on_commit()?,
                Event::Pressed(KeyCode::S) => self.on_save()?,
                Event::Pressed(KeyCode::Q | KeyCode::Escape) => self.on_quit(),
                _ => (),
            }
        }
        Ok(self.end)
    }

    pub fn state(&self) -> DrawState {
        self.state
    }
    pub fn model(&self) -> &AnnotatorModel {
        &self.model
    }
    pub fn into_model(self) -> AnnotatorModel {
        self.model
    }
    pub fn raster(&self) -> &RgbImage {
        &self.raster
    }
    /// Changes whenever the raster has been redrawn.
    pub fn raster_generation(&self) -> u64 {
        self.raster_generation
    }
    pub fn end(&self) -> Option<SessionEnd> {
        self.end
    }
    pub fn is_terminal(&self) -> bool {
        self.end.is_some()
    }
}

#[cfg(test)]
use crate::{defer_folder_removal, file_util::DEFAULT_TMPDIR, test_helpers::make_model};

#[cfg(test)]
fn drag(from: (f64, f64), to: (f64, f64)) -> Vec<Events> {
    let mid = ((from.0 + to.0) / 2.0, (from.1 + to.1) / 2.0);
    vec![
        Events::default()
            .events(vec![Event::Pressed(KeyCode::MouseLeft)])
            .presspos_orig(Some(from.into()))
            .mousepos_orig(Some(mid.into())),
        Events::default()
            .events(vec![Event::Held(KeyCode::MouseLeft)])
            .mousepos_orig(Some(to.into())),
        Events::default()
            .events(vec![Event::Released(KeyCode::MouseLeft)])
            .mousepos_orig(Some(to.into())),
    ]
}
#[cfg(test)]
fn key(k: KeyCode) -> Events {
    Events::default().events(vec![Event::Pressed(k), Event::Held(k)])
}

#[test]
fn test_transitions() {
    let folder = DEFAULT_TMPDIR.join("test_session_transitions");
    defer_folder_removal!(&folder);
    let mut session = Session::new(make_model(&folder, "tile"));
    assert_eq!(session.state(), DrawState::Idle);

    session.on_press((10, 10).into());
    assert_eq!(
        session.state(),
        DrawState::Dragging {
            anchor: (10, 10).into(),
            current: (10, 10).into()
        }
    );
    let gen = session.raster_generation();
    session.on_move((50, 60).into());
    assert!(session.raster_generation() > gen);
    assert_eq!(*session.raster().get_pixel(50, 60), DRAWING_COLOR);
    session.on_release((40, 45).into());
    let pending = BoundingBox::new(10, 10, 40, 45);
    assert_eq!(session.state(), DrawState::PendingCommit { pending });
    assert_eq!(*session.raster().get_pixel(40, 45), DRAWING_COLOR);
    assert_ne!(*session.raster().get_pixel(50, 60), DRAWING_COLOR);
    assert!(session.model().boxes().is_empty());
    assert!(!session.model().record_path().exists());

    session.on_commit().unwrap();
    assert_eq!(session.state(), DrawState::Idle);
    assert_eq!(session.model().boxes(), &[pending]);
    assert_eq!(*session.raster().get_pixel(40, 45), COMMITTED_COLOR);
    assert!(session.model().record_path().exists());

    // commit without a pending box does nothing
    session.on_commit().unwrap();
    assert_eq!(session.model().boxes().len(), 1);

    // moves and releases while idle are ignored
    session.on_move((1, 1).into());
    session.on_release((1, 1).into());
    assert_eq!(session.state(), DrawState::Idle);
}

#[test]
fn test_press_discards_pending() {
    let folder = DEFAULT_TMPDIR.join("test_press_discards_pending");
    defer_folder_removal!(&folder);
    let mut session = Session::new(make_model(&folder, "tile"));
    session.on_press((10, 10).into());
    session.on_release((20, 20).into());
    session.on_press((30, 30).into());
    session.on_release((50, 50).into());
    session.on_commit().unwrap();
    assert_eq!(session.model().boxes(), &[BoundingBox::new(30, 30, 50, 50)]);
}

#[test]
fn test_scenario_commit() {
    let folder = DEFAULT_TMPDIR.join("test_scenario_commit");
    defer_folder_removal!(&folder);
    let mut session = Session::new(make_model(&folder, "T1"));
    for events in drag((100.0, 100.0), (300.0, 400.0)) {
        assert_eq!(session.on_events(&events).unwrap(), None);
    }
    session.on_events(&key(KeyCode::C)).unwrap();
    let content = std::fs::read_to_string(session.model().record_path()).unwrap();
    assert_eq!(content, "0 0.312500 0.390625 0.312500 0.468750\n");
    assert_eq!(
        session.on_events(&key(KeyCode::Q)).unwrap(),
        Some(SessionEnd::Quit)
    );
    // quitting does not touch the record
    let content_after = std::fs::read_to_string(session.model().record_path()).unwrap();
    assert_eq!(content, content_after);
}

#[test]
fn test_save_overwrites() {
    let folder = DEFAULT_TMPDIR.join("test_save_overwrites");
    defer_folder_removal!(&folder);
    let mut session = Session::new(make_model(&folder, "tile"));
    for (from, to) in [((1.0, 1.0), (20.0, 20.0)), ((30.0, 30.0), (80.0, 90.0))] {
        for events in drag(from, to) {
            session.on_events(&events).unwrap();
        }
        session.on_events(&key(KeyCode::C)).unwrap();
    }
    // a pending box is not part of the save
    for events in drag((5.0, 5.0), (6.0, 600.0)) {
        session.on_events(&events).unwrap();
    }
    let end = session.on_events(&key(KeyCode::S)).unwrap();
    assert_eq!(end, Some(SessionEnd::Saved));
    let content = std::fs::read_to_string(session.model().record_path()).unwrap();
    assert_eq!(content.lines().count(), 2);

    // after the end nothing happens anymore
    for events in drag((100.0, 100.0), (200.0, 200.0)) {
        session.on_events(&events).unwrap();
    }
    session.on_events(&key(KeyCode::C)).unwrap();
    assert_eq!(session.state(), DrawState::Idle);
    assert_eq!(session.into_model().boxes().len(), 2);
}

#[test]
fn test_pointer_outside_is_clamped() {
    let folder = DEFAULT_TMPDIR.join("test_pointer_outside_is_clamped");
    defer_folder_removal!(&folder);
    let mut session = Session::new(make_model(&folder, "tile"));
    for events in drag((600.0, 600.0), (700.0, -20.0)) {
        session.on_events(&events).unwrap();
    }
    assert_eq!(
        session.state(),
        DrawState::PendingCommit {
            pending: BoundingBox::new(600, 600, 639, 0)
        }
    );
}

#[test]
fn test_resume() {
    let folder = DEFAULT_TMPDIR.join("test_session_resume");
    defer_folder_removal!(&folder);
    let mut session = Session::new(make_model(&folder, "T1"));
    for events in drag((100.0, 100.0), (300.0, 400.0)) {
        session.on_events(&events).unwrap();
    }
    session.on_events(&key(KeyCode::C)).unwrap();
    let record_path = session.model().record_path();

    let resumed = Session::resume(
        make_model(&folder, "T1"),
        &record_path,
        MalformedRecordPolicy::Abort,
    )
    .unwrap();
    let boxes = resumed.model().boxes();
    assert_eq!(boxes.len(), 1);
    let (x1, y1, x2, y2) = boxes[0].coordinates();
    for (v, expected) in [(x1, 100), (y1, 100), (x2, 300), (y2, 400)] {
        assert!((v - expected).abs() <= 1);
    }
    assert_eq!(resumed.state(), DrawState::Idle);
    assert_eq!(*resumed.raster().get_pixel(100, 100), COMMITTED_COLOR);
}

#[test]
fn test_resume_out_of_range_record() {
    let folder = DEFAULT_TMPDIR.join("test_resume_out_of_range_record");
    defer_folder_removal!(&folder);
    let model = make_model(&folder, "T1");
    let record_path = model.record_path();
    crate::file_util::create_dir_all(record_path.parent().unwrap()).unwrap();
    crate::file_util::write(&record_path, "0 0.5 0.5 1e12 1e12\n").unwrap();
    let resumed = Session::resume(model, &record_path, MalformedRecordPolicy::Skip).unwrap();
    assert_eq!(resumed.model().boxes(), &[BoundingBox::new(0, 0, 639, 639)]);
    assert_eq!(*resumed.raster().get_pixel(0, 0), COMMITTED_COLOR);
}

#[test]
fn test_failed_persistence() {
    let folder = DEFAULT_TMPDIR.join("test_failed_persistence");
    defer_folder_removal!(&folder);
    let model = make_model(&folder, "tile");
    // a regular file where the label folder should be
    let label_dir = model.record_path().parent().unwrap().to_path_buf();
    crate::file_util::create_dir_all(&folder).unwrap();
    crate::file_util::write(&label_dir, "").unwrap();
    let mut session = Session::new(model);
    for events in drag((10.0, 10.0), (40.0, 50.0)) {
        session.on_events(&events).unwrap();
    }
    assert!(session.on_commit().is_err());
    assert_eq!(session.model().boxes(), &[BoundingBox::new(10, 10, 40, 50)]);
    assert_eq!(session.state(), DrawState::Idle);

    assert!(session.on_events(&key(KeyCode::S)).is_err());
    assert!(!session.is_terminal());
    assert_eq!(session.end(), None);

    // the session stays usable and can still be quit
    assert_eq!(
        session.on_events(&key(KeyCode::Q)).unwrap(),
        Some(SessionEnd::Quit)
    );
}
