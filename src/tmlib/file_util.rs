use crate::{
    result::{to_tm, TmResult},
    tmerr,
};
use lazy_static::lazy_static;
use std::{
    ffi::OsStr,
    fmt::Debug,
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{error, info};

lazy_static! {
    pub static ref DEFAULT_TMPDIR: PathBuf = std::env::temp_dir().join("tilemark");
}
lazy_static! {
    pub static ref DEFAULT_HOMEDIR: PathBuf = match dirs::home_dir() {
        Some(p) => p.join(".tilemark"),
        _ => std::env::temp_dir().join("tilemark"),
    };
}

pub const RECORD_EXTENSION: &str = "txt";

pub fn read_to_string<P>(p: P) -> TmResult<String>
where
    P: AsRef<Path> + Debug,
{
    fs::read_to_string(&p).map_err(|e| tmerr!("could not read {:?} due to {:?}", p, e))
}

pub fn write<P, C>(path: P, contents: C) -> TmResult<()>
where
    P: AsRef<Path> + Debug,
    C: AsRef<[u8]>,
{
    fs::write(&path, contents).map_err(|e| tmerr!("could not write to {:?} since {:?}", path, e))
}

pub fn create_dir_all<P>(path: P) -> TmResult<()>
where
    P: AsRef<Path> + Debug,
{
    fs::create_dir_all(&path).map_err(|e| tmerr!("could not create folder {:?} due to {:?}", path, e))
}

pub fn osstr_to_str(p: Option<&OsStr>) -> io::Result<&str> {
    p.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{p:?} not found")))?
        .to_str()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{p:?} not convertible to unicode"),
            )
        })
}

pub fn to_stem_str(p: &Path) -> TmResult<&str> {
    osstr_to_str(p.file_stem())
        .map_err(|e| tmerr!("could not transform '{:?}' due to '{:?}'", p, e))
}

pub fn to_name_str(p: &Path) -> TmResult<&str> {
    osstr_to_str(p.file_name())
        .map_err(|e| tmerr!("could not transform '{:?}' due to '{:?}'", p, e))
}

/// Regular files directly inside `folder` with the given extension, sorted by path.
pub fn files_in_folder(folder: &Path, extension: &str) -> TmResult<Vec<PathBuf>> {
    let mut files = fs::read_dir(folder)
        .map_err(|e| tmerr!("could not open folder {:?} due to {}", folder, e))?
        .flatten()
        .map(|de| de.path())
        .filter(|p| p.is_file() && p.extension() == Some(OsStr::new(extension)))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

fn modified(p: &Path) -> TmResult<SystemTime> {
    fs::metadata(p)
        .and_then(|md| md.modified())
        .map_err(to_tm)
}

/// The file with the latest modification time, `None` if the folder has no such file.
pub fn most_recently_modified(folder: &Path, extension: &str) -> TmResult<Option<PathBuf>> {
    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for p in files_in_folder(folder, extension)? {
        let t = modified(&p)?;
        if latest.as_ref().map(|(t_latest, _)| t >= *t_latest) != Some(false) {
            latest = Some((t, p));
        }
    }
    Ok(latest.map(|(_, p)| p))
}

pub struct Defer<F: FnMut()> {
    pub func: F,
}
impl<F: FnMut()> Drop for Defer<F> {
    fn drop(&mut self) {
        (self.func)();
    }
}
#[macro_export]
macro_rules! defer {
    ($f:expr) => {
        let _dfr = $crate::file_util::Defer { func: $f };
    };
}
pub fn checked_remove<'a, P: AsRef<Path> + Debug>(
    path: &'a P,
    func: fn(p: &'a P) -> io::Result<()>,
) {
    match func(path) {
        Ok(_) => info!("removed {path:?}"),
        Err(e) => error!("could not remove {path:?} due to {e:?}"),
    }
}
#[macro_export]
macro_rules! defer_folder_removal {
    ($path:expr) => {
        let func = || $crate::file_util::checked_remove($path, std::fs::remove_dir_all);
        $crate::defer!(func);
    };
}

#[test]
fn test_files_in_folder() {
    let folder = DEFAULT_TMPDIR.join("test_files_in_folder");
    create_dir_all(&folder).unwrap();
    defer_folder_removal!(&folder);
    write(folder.join("b.txt"), "").unwrap();
    write(folder.join("a.txt"), "").unwrap();
    write(folder.join("c.jpg"), "").unwrap();
    create_dir_all(folder.join("d.txt")).unwrap();
    let files = files_in_folder(&folder, "txt").unwrap();
    let names = files
        .iter()
        .map(|p| to_name_str(p).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
    assert!(files_in_folder(&folder.join("nope"), "txt").is_err());
}

#[test]
fn test_most_recently_modified() {
    let folder = DEFAULT_TMPDIR.join("test_most_recently_modified");
    create_dir_all(&folder).unwrap();
    defer_folder_removal!(&folder);
    assert_eq!(most_recently_modified(&folder, "txt").unwrap(), None);
    write(folder.join("new.txt"), "").unwrap();
    write(folder.join("old.txt"), "").unwrap();
    let long_ago = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
    fs::File::options()
        .write(true)
        .open(folder.join("old.txt"))
        .unwrap()
        .set_modified(long_ago)
        .unwrap();
    let latest = most_recently_modified(&folder, "txt").unwrap().unwrap();
    assert_eq!(to_stem_str(&latest).unwrap(), "new");
}
