use crate::{
    file_util::{self, DEFAULT_HOMEDIR},
    record::MalformedRecordPolicy,
    result::{to_tm, TmResult},
    tmerr,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn, Level};

const CFG_DEFAULT: &str = r#"
    image_dir = "data/cropped_images"
    label_dir = "data/cropped_labels"
    source_dir = "data/selection"
    source_extension = "JPG"
    image_extension = "jpg"
    class_id = 0
    batch_size = 10
    tile_size = 640
    overlap = 0
    repaint_millis = 16
    malformed_records = "Skip"  # "Skip" or "Abort"
    log_level = "info"  # "error", "warn", "info", "debug" or "trace"
    "#;

pub fn get_default_cfg() -> Cfg {
    toml::from_str(CFG_DEFAULT).expect("default config broken")
}

pub fn get_cfg_path() -> PathBuf {
    DEFAULT_HOMEDIR.join("tm_cfg.toml")
}

pub fn get_log_folder() -> PathBuf {
    DEFAULT_HOMEDIR.join("logs")
}

/// Reads the config from `path` and falls back to the defaults if there is no such file.
pub fn read_cfg_from(path: &Path) -> TmResult<Cfg> {
    if path.exists() {
        let toml_str = file_util::read_to_string(path)?;
        toml::from_str(&toml_str).map_err(|e| tmerr!("could not parse cfg {:?} due to {:?}", path, e))
    } else {
        warn!("cfg file {path:?} does not exist. using default cfg");
        Ok(get_default_cfg())
    }
}

pub fn read_cfg() -> TmResult<Cfg> {
    read_cfg_from(&get_cfg_path())
}

pub fn write_cfg_to(cfg: &Cfg, path: &Path) -> TmResult<()> {
    if let Some(cfg_parent) = path.parent() {
        fs::create_dir_all(cfg_parent).map_err(to_tm)?;
    }
    let cfg_str = toml::to_string_pretty(cfg).map_err(to_tm)?;
    file_util::write(path, cfg_str)?;
    info!("wrote cfg to {path:?}");
    Ok(())
}

pub fn write_cfg(cfg: &Cfg) -> TmResult<()> {
    write_cfg_to(cfg, &get_cfg_path())
}

fn default_repaint_millis() -> u64 {
    16
}
fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Cfg {
    pub image_dir: PathBuf,
    pub label_dir: PathBuf,
    pub source_dir: PathBuf,
    pub source_extension: String,
    pub image_extension: String,
    pub class_id: u32,
    pub batch_size: usize,
    pub tile_size: u32,
    pub overlap: u32,
    #[serde(default = "default_repaint_millis")]
    pub repaint_millis: u64,
    #[serde(default)]
    pub malformed_records: MalformedRecordPolicy,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Cfg {
    /// Unknown level names fall back to info.
    pub fn log_level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }
}

impl Default for Cfg {
    fn default() -> Self {
        get_default_cfg()
    }
}

#[cfg(test)]
use crate::{defer_folder_removal, file_util::DEFAULT_TMPDIR};

#[test]
fn test_default_cfg() {
    let cfg = get_default_cfg();
    assert_eq!(cfg.tile_size, 640);
    assert_eq!(cfg.class_id, 0);
    assert_eq!(cfg.malformed_records, MalformedRecordPolicy::Skip);
    assert_eq!(cfg.image_dir, PathBuf::from("data/cropped_images"));
    assert_eq!(cfg.log_level(), Level::INFO);
    let cfg = Cfg {
        log_level: "DEBUG".to_string(),
        ..Cfg::default()
    };
    assert_eq!(cfg.log_level(), Level::DEBUG);
    let cfg = Cfg {
        log_level: "chatty".to_string(),
        ..Cfg::default()
    };
    assert_eq!(cfg.log_level(), Level::INFO);
}

#[test]
fn test_cfg_roundtrip() {
    let folder = DEFAULT_TMPDIR.join("test_cfg_roundtrip");
    defer_folder_removal!(&folder);
    let path = folder.join("tm_cfg.toml");
    assert_eq!(read_cfg_from(&path).unwrap(), get_default_cfg());
    let cfg = Cfg {
        batch_size: 3,
        malformed_records: MalformedRecordPolicy::Abort,
        ..Cfg::default()
    };
    write_cfg_to(&cfg, &path).unwrap();
    assert_eq!(read_cfg_from(&path).unwrap(), cfg);

    // older files without the optional keys still load
    let minimal = r#"
        image_dir = "a"
        label_dir = "b"
        source_dir = "c"
        source_extension = "png"
        image_extension = "png"
        class_id = 2
        batch_size = 1
        tile_size = 320
        overlap = 10
    "#;
    file_util::write(&path, minimal).unwrap();
    let cfg = read_cfg_from(&path).unwrap();
    assert_eq!(cfg.repaint_millis, 16);
    assert_eq!(cfg.malformed_records, MalformedRecordPolicy::Skip);
    assert_eq!(cfg.log_level(), Level::INFO);
    file_util::write(&path, "batch_size = ").unwrap();
    assert!(read_cfg_from(&path).is_err());
}
