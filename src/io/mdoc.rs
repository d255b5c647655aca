use crate::core::error::{PipelineError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref RE_KEY_VALUE: Regex =
        Regex::new(r"^\s*(?P<key>[A-Za-z][A-Za-z0-9_]*)\s*=\s*(?P<value>.*?)\s*$").unwrap();
}

/// Container extensions stripped from `ImageFile` to form the series name.
const STACK_EXTENSIONS: &[&str] = &["mrc", "mrcs", "st"];

/// What the pipeline needs from one SerialEM `.mdoc`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesMetadata {
    pub name: String,
    /// Movie paths, resolved next to the `.mdoc`, in acquisition order.
    pub frames: Vec<PathBuf>,
    /// Index-aligned with `frames`.
    pub tilt_angles: Vec<f64>,
}

/// Parses an `.mdoc` file.
///
/// Only `ImageFile`, `SubFramePath` and `TiltAngle` are read; every other
/// line (including `[ZValue = n]` section headers) is ignored.
pub fn parse(path: &Path) -> Result<SeriesMetadata> {
    let contents = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    parse_contents(&contents, path, base_dir)
}

fn parse_contents(contents: &str, path: &Path, base_dir: &Path) -> Result<SeriesMetadata> {
    let mut image_file: Option<String> = None;
    let mut frames = Vec::new();
    let mut tilt_angles = Vec::new();

    for (line_no, line) in contents.lines().enumerate() {
        let Some(caps) = RE_KEY_VALUE.captures(line) else {
            continue;
        };
        let value = &caps["value"];

        match &caps["key"] {
            "ImageFile" => {
                if image_file.is_some() {
                    return Err(PipelineError::malformed(path, "more than one ImageFile entry"));
                }
                if value.is_empty() {
                    return Err(PipelineError::malformed(path, "empty ImageFile entry"));
                }
                image_file = Some(value.to_string());
            }
            "SubFramePath" => {
                let file_name = windows_file_name(value);
                if file_name.is_empty() {
                    return Err(PipelineError::malformed(
                        path,
                        format!("empty SubFramePath on line {}", line_no + 1),
                    ));
                }
                frames.push(base_dir.join(file_name));
            }
            "TiltAngle" => {
                let angle: f64 = value.parse().map_err(|_| {
                    PipelineError::malformed(
                        path,
                        format!("TiltAngle '{}' on line {} is not a number", value, line_no + 1),
                    )
                })?;
                if !angle.is_finite() {
                    return Err(PipelineError::malformed(
                        path,
                        format!("TiltAngle on line {} is not finite", line_no + 1),
                    ));
                }
                tilt_angles.push(angle);
            }
            _ => {}
        }
    }

    let image_file = image_file.ok_or_else(|| PipelineError::malformed(path, "no ImageFile entry"))?;

    if frames.len() != tilt_angles.len() {
        return Err(PipelineError::malformed(
            path,
            format!(
                "{} SubFramePath entries but {} TiltAngle entries",
                frames.len(),
                tilt_angles.len()
            ),
        ));
    }
    if frames.is_empty() {
        return Err(PipelineError::malformed(path, "no frames listed"));
    }

    Ok(SeriesMetadata {
        name: series_name(&image_file),
        frames,
        tilt_angles,
    })
}

/// Last component of a path that may use either separator. SerialEM
/// records Windows paths of the acquisition PC.
fn windows_file_name(value: &str) -> &str {
    value.rsplit(|c: char| c == '\\' || c == '/').next().unwrap_or(value)
}

/// `tomo200528_100.mrc` -> `tomo200528_100`.
fn series_name(image_file: &str) -> String {
    let file_name = windows_file_name(image_file);
    match file_name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && STACK_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)) =>
        {
            stem.to_string()
        }
        _ => file_name.to_string(),
    }
}
