use crate::core::error::{PipelineError, Result};
use std::fs;
use std::path::Path;

/// Writes one angle per line in degrees (IMOD `.rawtlt`).
pub fn write_angles(path: &Path, angles: &[f64]) -> Result<()> {
    let mut contents = String::with_capacity(angles.len() * 8);
    for angle in angles {
        contents.push_str(&format_angle(*angle));
        contents.push('\n');
    }
    fs::write(path, contents).map_err(|e| PipelineError::io(path, e))
}

/// Reads an angle file back, skipping blank lines.
pub fn read_angles(path: &Path) -> Result<Vec<f64>> {
    let contents = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            l.parse::<f64>()
                .map_err(|_| PipelineError::malformed(path, format!("bad angle '{}'", l)))
        })
        .collect()
}

// Whole degrees keep a trailing ".0"; everything else uses the shortest
// representation that parses back to the same value.
fn format_angle(angle: f64) -> String {
    if angle.fract() == 0.0 {
        format!("{:.1}", angle)
    } else {
        angle.to_string()
    }
}
