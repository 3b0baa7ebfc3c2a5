use std::{
    fs::{self, File, ReadDir},
    io::Read,
    path::{Path, PathBuf},
};

pub mod error {
    use std::{io, path::PathBuf};

    pub type Result<T> = std::result::Result<T, self::Error>;

    type Msg = &'static str;

    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        #[error("{0} ({1}): {2}")]
        SingleIO(Msg, PathBuf, #[source] io::Error),

        #[error("{0} (from='{1}', to='{2}'): {3}")]
        FromToIO(Msg, PathBuf, PathBuf, #[source] io::Error),
    }
}
pub use error::{Error, Result};

#[must_use]
pub fn mkdir_all(path: impl AsRef<Path>) -> Result<()> {
    let dir = path.as_ref();
    fs::create_dir_all(dir).map_err(|e| Error::SingleIO("Cannot create dir", dir.to_owned(), e))
}

#[must_use]
pub fn write<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    fs::write(&filepath, contents)
        .map_err(|e| Error::SingleIO("Cannot write file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn write_with_mkdir<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    if let Some(dir) = filepath.as_ref().parent() {
        self::mkdir_all(dir)?;
    }
    self::write(filepath, contents)
}

#[must_use]
pub fn read_to_string(filepath: impl AsRef<Path>) -> Result<String> {
    fs::read_to_string(&filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn read_bytes(filepath: impl AsRef<Path>) -> Result<Vec<u8>> {
    fs::read(&filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.as_ref().to_owned(), e))
}

/// Read at most `limit` bytes from the head of a file. Lossy on non-UTF8 input.
#[must_use]
pub fn read_head(filepath: impl AsRef<Path>, limit: usize) -> Result<String> {
    let filepath = filepath.as_ref();
    let f = File::open(filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.to_owned(), e))?;
    let mut buf = Vec::with_capacity(limit.min(64 * 1024));
    f.take(limit as u64)
        .read_to_end(&mut buf)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.to_owned(), e))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[must_use]
pub fn copy_file(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<u64> {
    fs::copy(&from, &to).map_err(|e| {
        Error::FromToIO(
            "Cannot copy file",
            from.as_ref().to_owned(),
            to.as_ref().to_owned(),
            e,
        )
    })
}

#[must_use]
pub fn copy_file_with_mkdir(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<u64> {
    if let Some(dir) = to.as_ref().parent() {
        self::mkdir_all(dir)?;
    }
    self::copy_file(from, to)
}

#[must_use]
pub fn read_dir(dir: impl AsRef<Path>) -> Result<ReadDir> {
    fs::read_dir(&dir).map_err(|e| Error::SingleIO("Cannot read dir", dir.as_ref().to_owned(), e))
}

/// Immediate subdirectories of `dir`, sorted by name.
#[must_use]
pub fn immediate_subdirs(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut res: Vec<PathBuf> = self::read_dir(&dir)?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    res.sort();
    Ok(res)
}

/// Regular files directly under `dir` whose extension equals `ext`
/// (without the leading dot), sorted by name.
#[must_use]
pub fn files_with_extension(dir: impl AsRef<Path>, ext: &str) -> Result<Vec<PathBuf>> {
    let mut res: Vec<PathBuf> = self::read_dir(&dir)?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|x| x == ext).unwrap_or(false))
        .collect();
    res.sort();
    Ok(res)
}

/// Regular files anywhere under `dir`, sorted by path.
#[must_use]
pub fn files_recursively(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    fn walk(dir: &Path, acc: &mut Vec<PathBuf>) -> Result<()> {
        for entry in self::read_dir(dir)?.filter_map(std::result::Result::ok) {
            let Ok(ft) = entry.file_type() else {
                continue;
            };
            if ft.is_dir() {
                walk(&entry.path(), acc)?;
            } else if ft.is_file() {
                acc.push(entry.path());
            }
        }
        Ok(())
    }
    let mut res = Vec::new();
    walk(dir.as_ref(), &mut res)?;
    res.sort();
    Ok(res)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        write_with_mkdir(&path, "hello").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "hello");
        assert_eq!(read_bytes(&path).unwrap(), b"hello");
    }

    #[test]
    fn read_head_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        write(&path, "abcdefgh").unwrap();
        assert_eq!(read_head(&path, 3).unwrap(), "abc");
        assert_eq!(read_head(&path, 100).unwrap(), "abcdefgh");
    }

    #[test]
    fn immediate_subdirs_are_sorted_and_dirs_only() {
        let dir = tempfile::tempdir().unwrap();
        mkdir_all(dir.path().join("zeta")).unwrap();
        mkdir_all(dir.path().join("alpha")).unwrap();
        write(dir.path().join("file.txt"), "x").unwrap();

        let subdirs = immediate_subdirs(dir.path()).unwrap();
        let names: Vec<_> = subdirs
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }

    #[test]
    fn files_with_extension_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("02.in"), "").unwrap();
        write(dir.path().join("01.in"), "").unwrap();
        write(dir.path().join("01.out"), "").unwrap();
        mkdir_all(dir.path().join("10.in")).unwrap();

        let files = files_with_extension(dir.path(), "in").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["01.in", "02.in"]);
    }

    #[test]
    fn files_recursively_walks_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mkdir(dir.path().join("a/one.txt"), "").unwrap();
        write_with_mkdir(dir.path().join("two.txt"), "").unwrap();

        let files = files_recursively(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a/one.txt"));
        assert!(files[1].ends_with("two.txt"));
    }
}
