use crate::core::error::Result;
use crate::io::mrc::MrcFile;
use crate::math::stats;
use std::path::Path;
use tracing::{info, warn};

/// Rescales a volume in place to unit standard deviation and refreshes its
/// header statistics.
///
/// Returns the standard deviation divided out, or `None` for a volume with
/// no variance, which is left untouched.
pub fn normalise_volume(path: &Path) -> Result<Option<f64>> {
    let mut volume = MrcFile::read(path)?;
    let before = volume.stats();

    if !(before.std.is_finite() && before.std > 0.0) {
        warn!(path = %path.display(), std = before.std, "volume has no variance; not normalised");
        return Ok(None);
    }

    stats::scale(&mut volume.sections, (1.0 / before.std) as f32);
    volume.add_label("tomo_prepper: scaled to unit standard deviation");
    volume.write(path)?;

    info!(path = %path.display(), std = before.std, "normalised volume");
    Ok(Some(before.std))
}
