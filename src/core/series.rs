use crate::core::error::{PipelineError, Result};
use crate::io::mdoc;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

// ============================================================================
// VOLUME KINDS
// ============================================================================

/// The full-dose reconstruction and its two half-dose counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeKind {
    Full,
    Even,
    Odd,
}

impl VolumeKind {
    pub const ALL: [VolumeKind; 3] = [VolumeKind::Full, VolumeKind::Even, VolumeKind::Odd];

    pub fn label(self) -> &'static str {
        match self {
            VolumeKind::Full => "full",
            VolumeKind::Even => "even",
            VolumeKind::Odd => "odd",
        }
    }
}

/// One path per [`VolumeKind`].
#[derive(Debug, Clone, PartialEq)]
pub struct KindPaths {
    pub full: PathBuf,
    pub even: PathBuf,
    pub odd: PathBuf,
}

impl KindPaths {
    pub fn get(&self, kind: VolumeKind) -> &Path {
        match kind {
            VolumeKind::Full => &self.full,
            VolumeKind::Even => &self.even,
            VolumeKind::Odd => &self.odd,
        }
    }
}

// ============================================================================
// FRAMES
// ============================================================================

/// The three sums MotionCor2 writes next to a corrected movie.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedSums(pub KindPaths);

impl CorrectedSums {
    /// `<stem>_motcor.mrc`, `<stem>_motcor_EVN.mrc`, `<stem>_motcor_ODD.mrc`
    /// in the movie's directory.
    pub fn for_movie(movie: &Path) -> Self {
        let dir = movie.parent().unwrap_or_else(|| Path::new(""));
        let stem = movie
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        CorrectedSums(KindPaths {
            full: dir.join(format!("{stem}_motcor.mrc")),
            even: dir.join(format!("{stem}_motcor_EVN.mrc")),
            odd: dir.join(format!("{stem}_motcor_ODD.mrc")),
        })
    }

    pub fn get(&self, kind: VolumeKind) -> &Path {
        self.0.get(kind)
    }
}

/// One tilt: raw movie, stage angle, and the corrected sums once available.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub raw: PathBuf,
    pub tilt_angle: f64,
    pub corrected: Option<CorrectedSums>,
}

impl Frame {
    pub fn new(raw: PathBuf, tilt_angle: f64) -> Self {
        Self {
            raw,
            tilt_angle,
            corrected: None,
        }
    }

    /// The file actually handed to motion correction. EER movies are
    /// expected to have been converted to a sibling TIFF.
    pub fn correction_input(&self) -> PathBuf {
        let is_eer = self
            .raw
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("eer"));
        if is_eer {
            self.raw.with_extension("tif")
        } else {
            self.raw.clone()
        }
    }
}

// ============================================================================
// DERIVED ARTIFACTS
// ============================================================================

/// The three tilt stacks of a series plus their shared angle file.
#[derive(Debug, Clone, PartialEq)]
pub struct StackSet {
    pub stacks: KindPaths,
    pub angle_file: PathBuf,
}

/// The three reconstructions of a series plus the alignment they share.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSet {
    pub volumes: KindPaths,
    pub alignment: PathBuf,
}

// ============================================================================
// TILT SERIES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TiltSeries {
    /// Canonical name, used for every derived file.
    pub name: String,
    /// The `.mdoc` this series was read from.
    pub metadata: PathBuf,
    pub frames: Vec<Frame>,
    pub stacks: Option<StackSet>,
    pub volumes: Option<VolumeSet>,
}

impl TiltSeries {
    pub fn from_metadata(path: &Path) -> Result<Self> {
        let meta = mdoc::parse(path)?;
        let frames = meta
            .frames
            .into_iter()
            .zip(meta.tilt_angles)
            .map(|(raw, angle)| Frame::new(raw, angle))
            .collect();

        Ok(Self {
            name: meta.name,
            metadata: path.to_path_buf(),
            frames,
            stacks: None,
            volumes: None,
        })
    }

    /// Metadata file name without `.mdoc`, e.g. `tomo_100.mrc`. This is the
    /// prefix AreTomo3 gives its outputs.
    pub fn metadata_stem(&self) -> String {
        self.metadata
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn tilt_angles(&self) -> Vec<f64> {
        self.frames.iter().map(|f| f.tilt_angle).collect()
    }

    /// Stable ascending sort. Each frame moves with its angle and all of its
    /// corrected sums.
    pub fn sort_by_angle(&mut self) {
        self.frames.sort_by(|a, b| {
            a.tilt_angle
                .partial_cmp(&b.tilt_angle)
                .unwrap_or(Ordering::Equal)
        });
    }

    /// Fails on the first frame whose input file, as chosen by `input_of`,
    /// is not on disk.
    pub fn check_frames(&self, input_of: impl Fn(&Frame) -> PathBuf) -> Result<()> {
        for frame in &self.frames {
            let input = input_of(frame);
            if !input.is_file() {
                return Err(PipelineError::MissingInput(input));
            }
        }
        Ok(())
    }
}
