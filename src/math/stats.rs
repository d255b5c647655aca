use nalgebra::DMatrix;

/// Summary statistics over every voxel of a section list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeStats {
    pub min: f32,
    pub max: f32,
    pub mean: f64,
    /// Population standard deviation (divides by N).
    pub std: f64,
}

pub fn summarize(sections: &[DMatrix<f32>]) -> VolumeStats {
    let count: usize = sections.iter().map(|s| s.len()).sum();
    if count == 0 {
        return VolumeStats {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            std: 0.0,
        };
    }

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0_f64;
    for &v in sections.iter().flat_map(|s| s.iter()) {
        min = min.min(v);
        max = max.max(v);
        sum += v as f64;
    }
    let mean = sum / count as f64;

    // Two-pass variance.
    let variance = sections
        .iter()
        .flat_map(|s| s.iter())
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / count as f64;

    VolumeStats {
        min,
        max,
        mean,
        std: variance.sqrt(),
    }
}

/// Multiplies every voxel by `factor`.
pub fn scale(sections: &mut [DMatrix<f32>], factor: f32) {
    for section in sections.iter_mut() {
        *section *= factor;
    }
}
