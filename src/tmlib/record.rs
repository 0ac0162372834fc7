//! Plain text records in the YOLO format, one record per tile, one line per box.
//!
//! A line reads `<class_id> <x_center> <y_center> <width> <height>` where all but the class
//! id are normalized by the tile shape and written with 6 decimals.
use crate::{
    domain::YoloBox,
    file_util::{self, RECORD_EXTENSION},
    result::{TmError, TmResult},
    tmerr,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::{self, Display, Formatter},
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// flush only the box added last
    Append,
    /// truncate and rewrite all boxes
    #[default]
    Overwrite,
}

/// What to do with lines of an existing record that cannot be parsed.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MalformedRecordPolicy {
    #[default]
    Skip,
    Abort,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct RecordLine {
    pub class_id: u32,
    pub bb: YoloBox,
}

impl Display for RecordLine {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{} {:.6} {:.6} {:.6} {:.6}",
            self.class_id, self.bb.x_center, self.bb.y_center, self.bb.width, self.bb.height
        )
    }
}

impl FromStr for RecordLine {
    type Err = TmError;
    fn from_str(s: &str) -> TmResult<Self> {
        let fields = s.split_whitespace().collect::<Vec<_>>();
        if fields.len() != 5 {
            return Err(tmerr!(
                "expected 5 fields in record line '{}', found {}",
                s,
                fields.len()
            ));
        }
        let class_id = fields[0]
            .parse::<u32>()
            .map_err(|e| tmerr!("invalid class id '{}' due to {:?}", fields[0], e))?;
        let mut vals = [0.0; 4];
        for (v, field) in vals.iter_mut().zip(&fields[1..]) {
            *v = field
                .parse::<f64>()
                .map_err(|e| tmerr!("invalid coordinate '{}' due to {:?}", field, e))?;
            if !v.is_finite() {
                return Err(tmerr!("coordinate '{}' is not finite", field));
            }
        }
        Ok(RecordLine {
            class_id,
            bb: YoloBox {
                x_center: vals[0],
                y_center: vals[1],
                width: vals[2],
                height: vals[3],
            },
        })
    }
}

pub fn parse_record(
    content: &str,
    policy: MalformedRecordPolicy,
    origin: &Path,
) -> TmResult<Vec<RecordLine>> {
    let mut lines = vec![];
    for (line_idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match (line.parse::<RecordLine>(), policy) {
            (Ok(rl), _) => lines.push(rl),
            (Err(e), MalformedRecordPolicy::Skip) => {
                warn!("skipping line {} of {origin:?}: {e}", line_idx + 1);
            }
            (Err(e), MalformedRecordPolicy::Abort) => {
                return Err(tmerr!("line {} of {:?}: {}", line_idx + 1, origin, e));
            }
        }
    }
    Ok(lines)
}

fn lacks_final_newline(path: &Path) -> TmResult<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let content = fs::read(path).map_err(|e| tmerr!("could not read record {:?} due to {:?}", path, e))?;
    Ok(content.last().is_some_and(|c| *c != b'\n'))
}

/// Folder holding one record per tile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordStore {
    label_dir: PathBuf,
}

impl RecordStore {
    pub fn new(label_dir: impl Into<PathBuf>) -> Self {
        Self {
            label_dir: label_dir.into(),
        }
    }
    pub fn label_dir(&self) -> &Path {
        &self.label_dir
    }
    pub fn record_path(&self, stem: &str) -> PathBuf {
        self.label_dir.join(format!("{stem}.{RECORD_EXTENSION}"))
    }

    /// Writes the lines to the record of `stem`, creating the label folder if necessary.
    ///
    /// Returns the path of the record. A failure in the middle of an overwrite leaves a
    /// truncated record behind.
    pub fn write(&self, stem: &str, lines: &[RecordLine], mode: SaveMode) -> TmResult<PathBuf> {
        file_util::create_dir_all(&self.label_dir)?;
        let path = self.record_path(stem);
        // records edited elsewhere may lack the final newline
        let continue_last_line = mode == SaveMode::Append && lacks_final_newline(&path)?;
        let mut file = match mode {
            SaveMode::Append => OpenOptions::new().create(true).append(true).open(&path),
            SaveMode::Overwrite => OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path),
        }
        .map_err(|e| tmerr!("could not open record {:?} due to {:?}", path, e))?;
        let mut content = if continue_last_line {
            "\n".to_string()
        } else {
            String::new()
        };
        content.extend(lines.iter().map(|l| format!("{l}\n")));
        file.write_all(content.as_bytes())
            .map_err(|e| tmerr!("could not write record {:?} due to {:?}", path, e))?;
        info!("wrote {} line(s) to {path:?} in mode {mode:?}", lines.len());
        Ok(path)
    }

    pub fn read(&self, path: &Path, policy: MalformedRecordPolicy) -> TmResult<Vec<RecordLine>> {
        let content = file_util::read_to_string(path)?;
        parse_record(&content, policy, path)
    }

    /// Stems of all records in the label folder. A missing folder has no records.
    pub fn record_stems(&self) -> TmResult<BTreeSet<String>> {
        if !self.label_dir.exists() {
            return Ok(BTreeSet::new());
        }
        file_util::files_in_folder(&self.label_dir, RECORD_EXTENSION)?
            .iter()
            .map(|p| file_util::to_stem_str(p).map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
use crate::{defer_folder_removal, file_util::DEFAULT_TMPDIR};

#[test]
fn test_line_format() {
    let line = RecordLine {
        class_id: 0,
        bb: YoloBox {
            x_center: 0.3125,
            y_center: 0.390625,
            width: 0.3125,
            height: 0.46875,
        },
    };
    assert_eq!(line.to_string(), "0 0.312500 0.390625 0.312500 0.468750");
    assert_eq!("0 0.312500 0.390625 0.312500 0.468750".parse::<RecordLine>().unwrap(), line);
    assert_eq!("  0\t0.3125 0.390625   0.3125 0.46875 ".parse::<RecordLine>().unwrap(), line);
}

#[test]
fn test_malformed_lines() {
    assert!("0 0.1 0.2 0.3".parse::<RecordLine>().is_err());
    assert!("0 0.1 0.2 0.3 0.4 0.5".parse::<RecordLine>().is_err());
    assert!("a 0.1 0.2 0.3 0.4".parse::<RecordLine>().is_err());
    assert!("-1 0.1 0.2 0.3 0.4".parse::<RecordLine>().is_err());
    assert!("0 0.1 x 0.3 0.4".parse::<RecordLine>().is_err());
    assert!("0 inf 0.2 0.3 0.4".parse::<RecordLine>().is_err());
    assert!("0 0.1 0.2 NaN 0.4".parse::<RecordLine>().is_err());
    let content = "0 0.5 0.5 0.1 0.1\nbroken\n\n1 0.25 0.25 0.5 0.5\n";
    let origin = Path::new("some.txt");
    let lines = parse_record(content, MalformedRecordPolicy::Skip, origin).unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1].class_id, 1);
    let err = parse_record(content, MalformedRecordPolicy::Abort, origin).unwrap_err();
    assert!(err.msg().contains("line 2"), "{err}");
}

#[test]
fn test_store_modes() {
    let label_dir = DEFAULT_TMPDIR.join("test_store_modes").join("labels");
    let root = label_dir.parent().unwrap().to_path_buf();
    defer_folder_removal!(&root);
    let store = RecordStore::new(&label_dir);
    assert!(store.record_stems().unwrap().is_empty());
    let line = "0 0.5 0.5 0.25 0.25".parse::<RecordLine>().unwrap();
    let path = store.write("tile", &[line], SaveMode::Append).unwrap();
    assert_eq!(path, label_dir.join("tile.txt"));
    store.write("tile", &[line], SaveMode::Append).unwrap();
    let policy = MalformedRecordPolicy::Abort;
    assert_eq!(store.read(&path, policy).unwrap().len(), 2);
    store.write("tile", &[line; 3], SaveMode::Overwrite).unwrap();
    assert_eq!(store.read(&path, policy).unwrap().len(), 3);
    store.write("other", &[], SaveMode::Overwrite).unwrap();
    let stems = store.record_stems().unwrap();
    assert_eq!(
        stems.into_iter().collect::<Vec<_>>(),
        vec!["other".to_string(), "tile".to_string()]
    );
}

#[test]
fn test_append_after_missing_newline() {
    let label_dir = DEFAULT_TMPDIR.join("test_append_after_missing_newline");
    defer_folder_removal!(&label_dir);
    let store = RecordStore::new(&label_dir);
    file_util::create_dir_all(&label_dir).unwrap();
    let path = store.record_path("T1");
    file_util::write(&path, "0 0.5 0.5 0.1 0.1").unwrap();
    let line = "0 0.3125 0.390625 0.3125 0.46875".parse::<RecordLine>().unwrap();
    store.write("T1", &[line], SaveMode::Append).unwrap();
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "0 0.5 0.5 0.1 0.1\n0 0.312500 0.390625 0.312500 0.468750\n"
    );
    store.write("T1", &[line], SaveMode::Append).unwrap();
    let lines = store.read(&path, MalformedRecordPolicy::Abort).unwrap();
    assert_eq!(lines.len(), 3);
}
