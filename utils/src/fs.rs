use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open file {path:?}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not read file {path:?}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not create directories {path:?}")]
    CreateDirectories {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Error::OpenFile { path, .. }
            | Error::ReadFile { path, .. }
            | Error::CreateDirectories { path, .. } => path,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::OpenFile { source, .. }
            | Error::ReadFile { source, .. }
            | Error::CreateDirectories { source, .. } => source,
        }
    }
}

#[inline]
pub fn open_readable(path: impl AsRef<Path>) -> Result<std::io::BufReader<std::fs::File>, Error> {
    let path = path.as_ref();
    let file = std::fs::OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|source| Error::OpenFile {
            source,
            path: path.to_path_buf(),
        })?;
    Ok(std::io::BufReader::new(file))
}

/// Read a whole config or trace file into memory.
#[inline]
pub fn read_to_string(path: impl AsRef<Path>) -> Result<String, Error> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|source| Error::ReadFile {
        source,
        path: path.to_path_buf(),
    })
}

/// Open a file for writing, creating missing parent directories.
#[inline]
pub fn open_writable(path: impl AsRef<Path>) -> Result<std::io::BufWriter<std::fs::File>, Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dirs(parent)?;
        }
    }
    let file = std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .create(true)
        .open(path)
        .map_err(|source| Error::OpenFile {
            source,
            path: path.to_path_buf(),
        })?;
    Ok(std::io::BufWriter::new(file))
}

#[inline]
pub fn create_dirs(path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    match std::fs::DirBuilder::new().recursive(true).create(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(source) => Err(Error::CreateDirectories {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::eyre;
    use std::io::{Read, Write};

    #[test]
    fn test_write_then_read_nested_file() -> eyre::Result<()> {
        let dir = std::env::temp_dir().join(format!("utils-fs-test-{}", std::process::id()));
        let path = dir.join("nested/stats.json");
        {
            let mut writer = super::open_writable(&path)?;
            writer.write_all(b"{\"cycles\": 42}")?;
        }
        let mut content = String::new();
        super::open_readable(&path)?.read_to_string(&mut content)?;
        assert_eq!(content, "{\"cycles\": 42}");
        assert_eq!(super::read_to_string(&path)?, content);
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn test_open_missing_file_reports_path() {
        let path = std::path::Path::new("/definitely/not/here.yaml");
        let err = super::open_readable(path).unwrap_err();
        assert_eq!(err.path(), path);
        assert!(matches!(err, super::Error::OpenFile { .. }));
    }
}
