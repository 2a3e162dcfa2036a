//! Persisted frame logs: a JSON array of frames, written once and read once.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{error::LogError, types::Frame};

const LOG_EXTENSION: &str = "json";

pub fn serialize_log(frames: &[Frame]) -> Result<String, LogError> {
    serde_json::to_string(frames).map_err(LogError::Encode)
}

/// Parses a log and checks every frame's invariants.
pub fn parse_log(raw: &str) -> Result<Vec<Frame>, LogError> {
    let frames: Vec<Frame> =
        serde_json::from_str(raw).map_err(|err| LogError::Malformed(err.to_string()))?;
    for (idx, frame) in frames.iter().enumerate() {
        frame
            .validate()
            .map_err(|err| LogError::Malformed(format!("frame {idx}: {err}")))?;
    }
    Ok(frames)
}

pub fn write_log(path: &Path, frames: &[Frame]) -> Result<(), LogError> {
    let encoded = serialize_log(frames)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| LogError::io(parent, err))?;
    }

    let tmp_path = path.with_extension("partial");
    let mut file = fs::File::create(&tmp_path).map_err(|err| LogError::io(&tmp_path, err))?;
    file.write_all(encoded.as_bytes())
        .map_err(|err| LogError::io(&tmp_path, err))?;
    file.sync_all().map_err(|err| LogError::io(&tmp_path, err))?;
    fs::rename(&tmp_path, path).map_err(|err| LogError::io(path, err))?;
    Ok(())
}

pub fn read_log(path: &Path) -> Result<Vec<Frame>, LogError> {
    let raw = fs::read_to_string(path).map_err(|err| LogError::io(path, err))?;
    parse_log(&raw)
}

/// A directory of named frame logs.
#[derive(Clone, Debug)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf, LogError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(LogError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.{LOG_EXTENSION}")))
    }

    pub fn save(&self, name: &str, frames: &[Frame]) -> Result<PathBuf, LogError> {
        let path = self.path_for(name)?;
        write_log(&path, frames)?;
        log::info!("stored {} frames in {}", frames.len(), path.display());
        Ok(path)
    }

    /// Saves under `base`, or `base-1`, `base-2`, ... when that name is
    /// already taken. Returns the name used.
    pub fn save_new(&self, base: &str, frames: &[Frame]) -> Result<String, LogError> {
        let mut name = base.to_string();
        let mut suffix = 0u32;
        while self.path_for(&name)?.exists() {
            suffix += 1;
            name = format!("{base}-{suffix}");
        }
        self.save(&name, frames)?;
        Ok(name)
    }

    pub fn load(&self, name: &str) -> Result<Vec<Frame>, LogError> {
        read_log(&self.path_for(name)?)
    }

    /// Names of the stored logs, sorted.
    pub fn list(&self) -> Result<Vec<String>, LogError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(LogError::io(&self.dir, err)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| LogError::io(&self.dir, err))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
