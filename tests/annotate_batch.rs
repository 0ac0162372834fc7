#[cfg(test)]
use image::{Rgb, RgbImage};
#[cfg(test)]
use rand::{rngs::StdRng, SeedableRng};
#[cfg(test)]
use std::{
    fs,
    path::{Path, PathBuf},
};
#[cfg(test)]
use tmlib::{
    defer_folder_removal, file_util::DEFAULT_TMPDIR, tracing_setup::init_tracing_for_tests,
    BatchCfg, BatchOrchestrator, Event, Events, KeyCode, MalformedRecordPolicy, Session,
    SessionEnd,
};

#[cfg(test)]
fn setup(root: &Path, stems: &[&str]) -> BatchCfg {
    init_tracing_for_tests();
    let image_dir = root.join("cropped_images");
    fs::create_dir_all(&image_dir).unwrap();
    for stem in stems {
        RgbImage::from_pixel(640, 640, Rgb([120, 120, 120]))
            .save(image_dir.join(format!("{stem}.jpg")))
            .unwrap();
    }
    BatchCfg {
        image_dir,
        label_dir: root.join("cropped_labels"),
        batch_size: 1,
        pinned_record: None,
        class_id: 0,
        image_extension: "jpg".to_string(),
        tile_size: 640,
        malformed_policy: MalformedRecordPolicy::Skip,
    }
}

#[cfg(test)]
fn draw(session: &mut Session, from: (f64, f64), to: (f64, f64)) {
    let frames = [
        Events::default()
            .events(vec![Event::Pressed(KeyCode::MouseLeft)])
            .presspos_orig(Some(from.into()))
            .mousepos_orig(Some(from.into())),
        Events::default()
            .events(vec![Event::Held(KeyCode::MouseLeft)])
            .mousepos_orig(Some(to.into())),
        Events::default()
            .events(vec![Event::Released(KeyCode::MouseLeft)])
            .mousepos_orig(Some(to.into())),
        Events::default().events(vec![Event::Pressed(KeyCode::C)]),
    ];
    for events in &frames {
        assert_eq!(session.on_events(events).unwrap(), None);
    }
}

#[cfg(test)]
fn press(session: &mut Session, key: KeyCode) -> Option<SessionEnd> {
    session
        .on_events(&Events::default().events(vec![Event::Pressed(key)]))
        .unwrap()
}

#[cfg(test)]
fn record(cfg: &BatchCfg, stem: &str) -> PathBuf {
    cfg.label_dir.join(format!("{stem}.txt"))
}

#[test]
fn test_batch_annotates_unlabeled_tiles_only() {
    let root = DEFAULT_TMPDIR.join("test_batch_annotates_unlabeled_tiles_only");
    defer_folder_removal!(&root);
    let mut cfg = setup(&root, &["T1", "T2", "T3", "T4", "T5"]);
    fs::create_dir_all(&cfg.label_dir).unwrap();
    let labeled = "0 0.500000 0.500000 0.100000 0.100000\n";
    fs::write(record(&cfg, "T2"), labeled).unwrap();

    cfg.batch_size = 4;
    let mut orchestrator = BatchOrchestrator::new(cfg.clone(), &mut StdRng::seed_from_u64(7)).unwrap();
    assert_eq!(orchestrator.remaining(), 4);
    let mut visited = vec![];
    let summary = orchestrator.run(|session| {
        visited.push(session.model().stem().to_string());
        assert!(session.model().boxes().is_empty());
        draw(session, (10.0, 10.0), (110.0, 60.0));
        draw(session, (200.0, 200.0), (260.0, 330.0));
        Ok(press(session, KeyCode::S).unwrap())
    });
    assert_eq!(summary.n_saved, 4);
    assert_eq!(summary.n_failed, 0);
    assert_eq!(orchestrator.remaining(), 0);
    visited.sort();
    assert_eq!(visited, vec!["T1", "T3", "T4", "T5"]);
    for stem in &visited {
        let content = fs::read_to_string(record(&cfg, stem)).unwrap();
        assert_eq!(content.lines().count(), 2);
        for line in content.lines() {
            assert_eq!(line.split_whitespace().count(), 5);
        }
    }
    assert_eq!(fs::read_to_string(record(&cfg, "T2")).unwrap(), labeled);

    // everything is labeled now
    cfg.batch_size = 1;
    let err = BatchOrchestrator::new(cfg, &mut StdRng::seed_from_u64(7)).unwrap_err();
    assert!(err.msg().contains("cannot sample 1 tiles from 0"));
}

#[test]
fn test_resume_pinned_record() {
    let root = DEFAULT_TMPDIR.join("test_resume_pinned_record");
    defer_folder_removal!(&root);
    let mut cfg = setup(&root, &["T1", "T2"]);
    cfg.pinned_record = Some("T1".to_string());
    let mut rng = StdRng::seed_from_u64(1);

    let mut orchestrator = BatchOrchestrator::new(cfg.clone(), &mut rng).unwrap();
    let mut session = orchestrator.next_session().unwrap();
    assert!(orchestrator.next_session().is_none());
    draw(&mut session, (100.0, 100.0), (300.0, 400.0));
    assert_eq!(
        fs::read_to_string(record(&cfg, "T1")).unwrap(),
        "0 0.312500 0.390625 0.312500 0.468750\n"
    );
    assert_eq!(press(&mut session, KeyCode::Q), Some(SessionEnd::Quit));

    cfg.pinned_record = Some("T1.txt".to_string());
    let mut orchestrator = BatchOrchestrator::new(cfg.clone(), &mut rng).unwrap();
    let mut session = orchestrator.next_session().unwrap();
    let boxes = session.model().boxes().to_vec();
    assert_eq!(boxes.len(), 1);
    let (x1, y1, x2, y2) = boxes[0].coordinates();
    for (v, expected) in [(x1, 100), (y1, 100), (x2, 300), (y2, 400)] {
        assert!((v - expected).abs() <= 1);
    }
    draw(&mut session, (400.0, 400.0), (500.0, 500.0));
    assert_eq!(press(&mut session, KeyCode::S), Some(SessionEnd::Saved));
    let content = fs::read_to_string(record(&cfg, "T1")).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert!(content.starts_with("0 0.312500 0.390625 0.312500 0.468750\n"));

    cfg.pinned_record = Some("T9.txt".to_string());
    assert!(BatchOrchestrator::new(cfg, &mut rng).is_err());
}

#[test]
fn test_malformed_record_policies() {
    let root = DEFAULT_TMPDIR.join("test_malformed_record_policies");
    defer_folder_removal!(&root);
    let mut cfg = setup(&root, &["T1"]);
    fs::create_dir_all(&cfg.label_dir).unwrap();
    fs::write(
        record(&cfg, "T1"),
        "0 0.312500 0.390625 0.312500 0.468750\n0 0.5 0.5\n",
    )
    .unwrap();
    cfg.pinned_record = Some("T1.txt".to_string());
    let mut rng = StdRng::seed_from_u64(3);

    let mut orchestrator = BatchOrchestrator::new(cfg.clone(), &mut rng).unwrap();
    let session = orchestrator.next_session().unwrap();
    assert_eq!(session.model().boxes().len(), 1);

    cfg.malformed_policy = MalformedRecordPolicy::Abort;
    let mut orchestrator = BatchOrchestrator::new(cfg, &mut rng).unwrap();
    let summary = orchestrator.run(|_| panic!("tile with a broken record must be skipped"));
    assert_eq!(summary.n_failed, 1);
}
