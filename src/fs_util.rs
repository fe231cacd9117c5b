use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::FetchError;

pub const PARTIAL_SUFFIX: &str = "part";

pub fn partial_path(destination: &Utf8Path) -> Utf8PathBuf {
    let mut name = destination.file_name().unwrap_or_default().to_string();
    name.push('.');
    name.push_str(PARTIAL_SUFFIX);
    destination.with_file_name(name)
}

pub fn ensure_dir(dir: &Utf8Path) -> Result<(), FetchError> {
    fs::create_dir_all(dir.as_std_path())
        .map_err(|err| FetchError::Filesystem(format!("create {dir}: {err}")))
}

pub fn promote(partial: &Utf8Path, destination: &Utf8Path) -> Result<(), FetchError> {
    fs::rename(partial.as_std_path(), destination.as_std_path())
        .map_err(|err| FetchError::Filesystem(format!("rename {partial} -> {destination}: {err}")))
}

pub fn discard(partial: &Utf8Path) -> Result<(), FetchError> {
    match fs::remove_file(partial.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(FetchError::Filesystem(format!("remove {partial}: {err}"))),
    }
}
