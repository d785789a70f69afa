//! Whole-file literal byte substitution.
//!
//! A patch replaces every non-overlapping occurrence of one byte sequence
//! with another, scanning left to right. The firmware format is never
//! interpreted: Intel-HEX records and raw images are treated the same way.
//!
//! The result is written to an output directory as
//! `modified_<original file name>`; the source image is left untouched.

use {
    crate::error::{Error, Result},
    log::debug,
    std::{
        fs,
        io::Write as _,
        path::{Path, PathBuf},
    },
};

/// File name prefix of every patched image.
pub const PATCHED_PREFIX: &str = "modified_";

/// A find/replace pair of raw byte sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PatchSpec {
    /// Sequence to look for.
    pub find: Vec<u8>,
    /// Sequence written in its place. May differ in length from `find`.
    pub replace: Vec<u8>,
}

impl PatchSpec {
    /// Create a patch from raw byte sequences.
    pub fn new(find: impl Into<Vec<u8>>, replace: impl Into<Vec<u8>>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
        }
    }

    /// Decode a patch from two hexadecimal strings (e.g. `"BB"` and `"8080"`).
    pub fn from_hex(find: &str, replace: &str) -> Result<Self> {
        Ok(Self {
            find: decode_hex(find)?,
            replace: decode_hex(replace)?,
        })
    }

    /// Apply the substitution to an in-memory buffer.
    ///
    /// Returns the patched bytes and the number of replaced occurrences.
    pub fn apply(&self, data: &[u8]) -> (Vec<u8>, usize) {
        replace_all(data, &self.find, &self.replace)
    }
}

/// Outcome of a successful [`patch_file`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PatchOutcome {
    /// Path of the newly written image.
    pub path: PathBuf,
    /// Number of replaced occurrences.
    pub occurrences: usize,
    /// Size of the source image.
    pub original_len: usize,
    /// Size of the written image.
    pub patched_len: usize,
}

/// Decode hexadecimal text into bytes.
///
/// Each pair of hex digits is one byte. An optional `0x`/`0X` prefix is
/// accepted and ASCII whitespace is ignored, so `"de ad be ef"` and
/// `"0xDEADBEEF"` decode the same way.
pub fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let digits: Vec<u8> = body
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    if digits.len() % 2 != 0 {
        return Err(Error::InvalidHex(format!(
            "'{text}' has an odd number of hex digits"
        )));
    }

    digits
        .chunks_exact(2)
        .map(|pair| {
            let high = hex_value(pair[0]);
            let low = hex_value(pair[1]);
            match (high, low) {
                (Some(h), Some(l)) => Ok((h << 4) | l),
                _ => Err(Error::InvalidHex(format!(
                    "'{}{}' in '{text}' is not a hex byte",
                    char::from(pair[0]),
                    char::from(pair[1])
                ))),
            }
        })
        .collect()
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

/// Replace every non-overlapping occurrence of `find` in `data`.
///
/// The scan runs left to right and resumes right after each match, so
/// `replace_all(b"aaa", b"aa", b"b")` yields `b"ba"`. An empty `find`
/// leaves the input unchanged.
pub fn replace_all(data: &[u8], find: &[u8], replace: &[u8]) -> (Vec<u8>, usize) {
    if find.is_empty() || data.len() < find.len() {
        return (data.to_vec(), 0);
    }

    let mut out = Vec::with_capacity(data.len());
    let mut occurrences = 0;
    let mut pos = 0;

    while pos + find.len() <= data.len() {
        if data[pos..].starts_with(find) {
            out.extend_from_slice(replace);
            pos += find.len();
            occurrences += 1;
        } else {
            out.push(data[pos]);
            pos += 1;
        }
    }
    out.extend_from_slice(&data[pos..]);

    (out, occurrences)
}

/// Build the output path for a patched copy of `source`.
pub fn patched_path(source: &Path, output_dir: &Path) -> Result<PathBuf> {
    let name = source.file_name().ok_or_else(|| {
        Error::Config(format!("'{}' does not name a file", source.display()))
    })?;

    let mut file_name = std::ffi::OsString::from(PATCHED_PREFIX);
    file_name.push(name);
    Ok(output_dir.join(file_name))
}

/// Default directory for patched images: the user's desktop.
///
/// Falls back to `<home>/Desktop` when the platform does not report a
/// desktop directory.
pub fn default_output_dir() -> Option<PathBuf> {
    let dirs = directories::UserDirs::new()?;
    Some(
        dirs.desktop_dir()
            .map_or_else(|| dirs.home_dir().join("Desktop"), Path::to_path_buf),
    )
}

/// Patch `source` and write the result into `output_dir`.
///
/// The new file replaces any previous one atomically: data goes to a
/// temporary file in `output_dir` first and is renamed into place only once
/// fully written. Every failure is reported as [`Error::Patch`].
pub fn patch_file(source: &Path, spec: &PatchSpec, output_dir: &Path) -> Result<PatchOutcome> {
    patch_file_inner(source, spec, output_dir).map_err(|err| Error::Patch {
        path: source.to_path_buf(),
        source: Box::new(err),
    })
}

fn patch_file_inner(source: &Path, spec: &PatchSpec, output_dir: &Path) -> Result<PatchOutcome> {
    if spec.find.is_empty() {
        return Err(Error::Config("find pattern is empty".into()));
    }

    let target = patched_path(source, output_dir)?;
    let data = fs::read(source)?;
    let (patched, occurrences) = spec.apply(&data);

    debug!(
        "Replacing {:02X?} with {:02X?} in {} ({} occurrences)",
        spec.find,
        spec.replace,
        source.display(),
        occurrences
    );

    let mut tmp = tempfile::NamedTempFile::new_in(output_dir)?;
    tmp.write_all(&patched)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&target).map_err(|e| Error::Io(e.error))?;

    debug!("Modified file saved as {}", target.display());

    Ok(PatchOutcome {
        path: target,
        occurrences,
        original_len: data.len(),
        patched_len: patched.len(),
    })
}
