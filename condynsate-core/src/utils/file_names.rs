use std::path::{Path, PathBuf};

use crate::{
    constants::MAX_VIDEO_SUFFIX,
    errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult},
};

const ILLEGAL_CHARS: [char; 9] = ['<', '>', ':', '|', '?', '*', '.', '"', '\''];

/// Finds a free output path in `dir` for `base_name` with the given extension.
///
/// Tries `{base}.{ext}` first, then `{base}_01.{ext}` up to `{base}_99.{ext}`.
///
/// ## Errors
/// `RecordingError` when the name is empty, contains one of `< > : | ? * . " '`
/// or when every suffix is taken.
pub fn available_file_name(dir: &Path, base_name: &str, extension: &str) -> CondynsateResult<PathBuf> {
    if base_name.is_empty() {
        return Err(CondynsateError::new(
            CondynsateErrorTypes::RecordingError,
            "File name cannot be empty".to_string(),
        ));
    }
    if let Some(c) = base_name.chars().find(|c| ILLEGAL_CHARS.contains(c)) {
        return Err(CondynsateError::new(
            CondynsateErrorTypes::RecordingError,
            format!("File name \"{base_name}\" contains the illegal character '{c}'"),
        ));
    }

    let candidate = dir.join(format!("{base_name}.{extension}"));
    if !candidate.exists() {
        return Ok(candidate);
    }
    for i in 1..=MAX_VIDEO_SUFFIX {
        let candidate = dir.join(format!("{base_name}_{i:02}.{extension}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(CondynsateError::new(
        CondynsateErrorTypes::RecordingError,
        format!("Too many files named \"{base_name}\" already exist in {}", dir.display()),
    ))
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    #[test]
    pub fn first_free_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = available_file_name(dir.path(), "animation", "mp4").unwrap();
        assert_eq!(path, dir.path().join("animation.mp4"));
        File::create(&path).unwrap();
        let path = available_file_name(dir.path(), "animation", "mp4").unwrap();
        assert_eq!(path, dir.path().join("animation_01.mp4"));
        File::create(&path).unwrap();
        File::create(dir.path().join("animation_02.mp4")).unwrap();
        let path = available_file_name(dir.path(), "animation", "mp4").unwrap();
        assert_eq!(path, dir.path().join("animation_03.mp4"));
    }

    #[test]
    pub fn exhausted_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("v.mp4")).unwrap();
        for i in 1..=99 {
            File::create(dir.path().join(format!("v_{i:02}.mp4"))).unwrap();
        }
        let err = available_file_name(dir.path(), "v", "mp4").unwrap_err();
        assert_eq!(err.error_type(), CondynsateErrorTypes::RecordingError);
    }

    #[test]
    pub fn illegal_names() {
        let dir = tempfile::tempdir().unwrap();
        assert!(available_file_name(dir.path(), "", "mp4").is_err());
        assert!(available_file_name(dir.path(), "my.video", "mp4").is_err());
        assert!(available_file_name(dir.path(), "what?", "mp4").is_err());
        assert!(available_file_name(dir.path(), "pendulum run", "mp4").is_ok());
    }
}
