use crate::core::error::{PipelineError, Result};
use crate::core::project::ProjectLayout;
use crate::core::series::{StackSet, TiltSeries, VolumeKind};
use crate::io::mrc::MrcFile;
use crate::io::rawtlt;
use std::path::Path;
use tracing::info;

/// Concatenates per-tilt images into tilt stacks.
pub struct StackAssembler {
    /// Å/pixel written into every stack header.
    pixel_size: f32,
}

impl StackAssembler {
    pub fn new(pixel_size: f64) -> Self {
        Self { pixel_size: pixel_size as f32 }
    }

    /// Sorts the series by tilt angle, then writes the full, even and odd
    /// stacks and the `.rawtlt` angle file.
    ///
    /// Every frame must already carry its corrected sums.
    pub fn assemble(&self, layout: &ProjectLayout, series: &mut TiltSeries) -> Result<StackSet> {
        // The one place frames are reordered.
        series.sort_by_angle();

        let set = layout.stack_set(&series.name);
        for kind in VolumeKind::ALL {
            let images = series
                .frames
                .iter()
                .map(|frame| match &frame.corrected {
                    Some(sums) => Ok(sums.get(kind)),
                    None => Err(PipelineError::MissingInput(frame.correction_input())),
                })
                .collect::<Result<Vec<&Path>>>()?;

            let stack = self.build_stack(&images)?;
            let target = set.stacks.get(kind);
            stack.write(target)?;
            info!(
                series = %series.name,
                kind = kind.label(),
                tilts = images.len(),
                path = %target.display(),
                "wrote stack"
            );
        }

        rawtlt::write_angles(&set.angle_file, &series.tilt_angles())?;
        series.stacks = Some(set.clone());
        Ok(set)
    }

    /// Reads each 2-D image and stacks them, in the given order, along a new
    /// leading axis: K images of (Y, X) give a (K, Y, X) volume.
    pub fn build_stack(&self, images: &[&Path]) -> Result<MrcFile> {
        let mut sections = Vec::with_capacity(images.len());
        let mut expected: Option<(usize, usize)> = None;

        for &path in images {
            let image = MrcFile::read(path)?;
            let (nz, ny, nx) = image.shape();
            if nz != 1 {
                return Err(PipelineError::mrc(
                    path,
                    format!("expected a single image, found {} sections", nz),
                ));
            }
            match expected {
                None => expected = Some((ny, nx)),
                Some(shape) if shape != (ny, nx) => {
                    return Err(PipelineError::mrc(
                        path,
                        format!("image is {}x{}, earlier tilts are {}x{}", nx, ny, shape.1, shape.0),
                    ));
                }
                Some(_) => {}
            }
            sections.extend(image.sections);
        }

        Ok(MrcFile::new(sections, self.pixel_size))
    }
}
