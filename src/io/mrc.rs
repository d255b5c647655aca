//! Minimal MRC-2014 reader/writer.
//!
//! Reads modes 0, 1, 2 and 6 in either byte order; always writes
//! little-endian float32. Pixel data is held as one `DMatrix<f32>` per Z
//! section with rows along Y and columns along X.

use crate::core::error::{PipelineError, Result};
use crate::math::stats::{self, VolumeStats};
use nalgebra::DMatrix;
use std::fs;
use std::path::Path;

pub const HEADER_LEN: usize = 1024;
const LABEL_LEN: usize = 80;
const MAX_LABELS: usize = 10;
const LABEL_OFFSET: usize = 224;
const MRC_VERSION: i32 = 20141;
const VOLUME_SPACE_GROUP: i32 = 1;

// Word indices (4-byte units) into the main header.
const W_MODE: usize = 3;
const W_START: usize = 4;
const W_SAMPLING: usize = 7;
const W_CELL: usize = 10;
const W_ANGLES: usize = 13;
const W_AXES: usize = 16;
const W_DMIN: usize = 19;
const W_DMAX: usize = 20;
const W_DMEAN: usize = 21;
const W_ISPG: usize = 22;
const W_NSYMBT: usize = 23;
const W_VERSION: usize = 27;
const W_ORIGIN: usize = 49;
const W_RMS: usize = 54;
const W_NLABL: usize = 55;

const EXTTYP_OFFSET: usize = 104;
const MAP_OFFSET: usize = 208;
const MACHST_OFFSET: usize = 212;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

/// Pixel storage modes this codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Int8,
    Int16,
    Float32,
    Uint16,
}

impl Mode {
    fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Mode::Int8),
            1 => Some(Mode::Int16),
            2 => Some(Mode::Float32),
            6 => Some(Mode::Uint16),
            _ => None,
        }
    }

    fn code(self) -> i32 {
        match self {
            Mode::Int8 => 0,
            Mode::Int16 => 1,
            Mode::Float32 => 2,
            Mode::Uint16 => 6,
        }
    }

    fn bytes_per_pixel(self) -> usize {
        match self {
            Mode::Int8 => 1,
            Mode::Int16 | Mode::Uint16 => 2,
            Mode::Float32 => 4,
        }
    }
}

/// Header fields carried through a read/modify/write cycle. Dimensions and
/// statistics are always derived from the pixel data on write.
#[derive(Debug, Clone, PartialEq)]
pub struct MrcHeader {
    /// Mode as found on disk.
    pub mode: Mode,
    pub start: [i32; 3],
    pub sampling: [i32; 3],
    pub cell_lengths: [f32; 3],
    pub cell_angles: [f32; 3],
    pub axis_order: [i32; 3],
    pub space_group: i32,
    pub ext_type: [u8; 4],
    pub extended: Vec<u8>,
    pub origin: [f32; 3],
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MrcFile {
    pub header: MrcHeader,
    pub sections: Vec<DMatrix<f32>>,
}

impl MrcFile {
    /// A new volume with cubic voxels of `voxel_size` (Å). All sections must
    /// share one shape; [`MrcFile::write`] rejects anything else.
    pub fn new(sections: Vec<DMatrix<f32>>, voxel_size: f32) -> Self {
        let nz = sections.len();
        let (ny, nx) = sections.first().map(|s| s.shape()).unwrap_or((0, 0));
        let sampling = [nx as i32, ny as i32, nz as i32];
        let header = MrcHeader {
            mode: Mode::Float32,
            start: [0; 3],
            sampling,
            cell_lengths: sampling.map(|m| m as f32 * voxel_size),
            cell_angles: [90.0; 3],
            axis_order: [1, 2, 3],
            space_group: VOLUME_SPACE_GROUP,
            ext_type: [0; 4],
            extended: Vec::new(),
            origin: [0.0; 3],
            labels: Vec::new(),
        };
        Self { header, sections }
    }

    /// `(nz, ny, nx)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        let (ny, nx) = self.sections.first().map(|s| s.shape()).unwrap_or((0, 0));
        (self.sections.len(), ny, nx)
    }

    /// Voxel size along X, Y, Z; zero where the sampling is undefined.
    pub fn voxel_size(&self) -> [f32; 3] {
        let mut size = [0.0; 3];
        for (i, s) in size.iter_mut().enumerate() {
            if self.header.sampling[i] > 0 {
                *s = self.header.cell_lengths[i] / self.header.sampling[i] as f32;
            }
        }
        size
    }

    pub fn stats(&self) -> VolumeStats {
        stats::summarize(&self.sections)
    }

    /// Appends a text label, dropping the oldest once all ten slots are used.
    pub fn add_label(&mut self, label: &str) {
        if self.header.labels.len() == MAX_LABELS {
            self.header.labels.remove(0);
        }
        self.header.labels.push(label.chars().take(LABEL_LEN).collect());
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
        Self::decode(&bytes).map_err(|reason| PipelineError::mrc(path, reason))
    }

    /// Writes the file as little-endian float32 with refreshed statistics.
    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.encode().map_err(|reason| PipelineError::mrc(path, reason))?;
        fs::write(path, bytes).map_err(|e| PipelineError::io(path, e))
    }

    // ------------------------------------------------------------------------
    // Decoding
    // ------------------------------------------------------------------------

    fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < HEADER_LEN {
            return Err(format!("{} bytes is shorter than the header", bytes.len()));
        }
        let order = detect_byte_order(bytes);
        let word = |i: usize| read_i32(bytes, i * 4, order);
        let real = |i: usize| read_f32(bytes, i * 4, order);

        let (nx, ny, nz) = (word(0), word(1), word(2));
        if nx <= 0 || ny <= 0 || nz <= 0 {
            return Err(format!("invalid dimensions {}x{}x{}", nx, ny, nz));
        }
        let mode = Mode::from_code(word(W_MODE))
            .ok_or_else(|| format!("unsupported mode {}", word(W_MODE)))?;
        let nsymbt = usize::try_from(word(W_NSYMBT))
            .map_err(|_| format!("negative extended header size {}", word(W_NSYMBT)))?;

        let (nx, ny, nz) = (nx as usize, ny as usize, nz as usize);
        let data_start = HEADER_LEN + nsymbt;
        let needed = nx
            .checked_mul(ny)
            .and_then(|n| n.checked_mul(nz))
            .and_then(|n| n.checked_mul(mode.bytes_per_pixel()))
            .ok_or_else(|| "dimensions overflow".to_string())?;
        if bytes.len() < data_start + needed {
            return Err(format!(
                "truncated: {} data bytes expected, {} present",
                needed,
                bytes.len().saturating_sub(data_start)
            ));
        }

        let nlabl = word(W_NLABL).clamp(0, MAX_LABELS as i32) as usize;
        let labels = (0..nlabl)
            .map(|i| {
                let start = LABEL_OFFSET + i * LABEL_LEN;
                String::from_utf8_lossy(&bytes[start..start + LABEL_LEN])
                    .trim_end_matches(|c: char| c == ' ' || c == '\0')
                    .to_string()
            })
            .collect();

        let mut ext_type = [0u8; 4];
        ext_type.copy_from_slice(&bytes[EXTTYP_OFFSET..EXTTYP_OFFSET + 4]);

        let header = MrcHeader {
            mode,
            start: [word(W_START), word(W_START + 1), word(W_START + 2)],
            sampling: [word(W_SAMPLING), word(W_SAMPLING + 1), word(W_SAMPLING + 2)],
            cell_lengths: [real(W_CELL), real(W_CELL + 1), real(W_CELL + 2)],
            cell_angles: [real(W_ANGLES), real(W_ANGLES + 1), real(W_ANGLES + 2)],
            axis_order: [word(W_AXES), word(W_AXES + 1), word(W_AXES + 2)],
            space_group: word(W_ISPG),
            ext_type,
            extended: bytes[HEADER_LEN..data_start].to_vec(),
            origin: [real(W_ORIGIN), real(W_ORIGIN + 1), real(W_ORIGIN + 2)],
            labels,
        };

        let pixels = decode_pixels(&bytes[data_start..data_start + needed], mode, order);
        let sections = pixels
            .chunks_exact(nx * ny)
            .map(|plane| DMatrix::from_row_slice(ny, nx, plane))
            .collect();

        Ok(Self { header, sections })
    }

    // ------------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------------

    fn encode(&self) -> std::result::Result<Vec<u8>, String> {
        let (nz, ny, nx) = self.shape();
        if nz == 0 || ny == 0 || nx == 0 {
            return Err("no pixel data".to_string());
        }
        if let Some(z) = self.sections.iter().position(|s| s.shape() != (ny, nx)) {
            return Err(format!(
                "section {} is {:?}, expected ({}, {})",
                z,
                self.sections[z].shape(),
                ny,
                nx
            ));
        }

        let h = &self.header;
        let stats = self.stats();
        let dims = [nx as i32, ny as i32, nz as i32];
        let sampling = if h.sampling.iter().all(|&m| m > 0) { h.sampling } else { dims };
        let axes = if h.axis_order.iter().all(|&a| a > 0) { h.axis_order } else { [1, 2, 3] };

        let mut out = vec![0u8; HEADER_LEN];
        for i in 0..3 {
            put_i32(&mut out, i, dims[i]);
            put_i32(&mut out, W_START + i, h.start[i]);
            put_i32(&mut out, W_SAMPLING + i, sampling[i]);
            put_f32(&mut out, W_CELL + i, h.cell_lengths[i]);
            put_f32(&mut out, W_ANGLES + i, h.cell_angles[i]);
            put_i32(&mut out, W_AXES + i, axes[i]);
            put_f32(&mut out, W_ORIGIN + i, h.origin[i]);
        }
        put_i32(&mut out, W_MODE, Mode::Float32.code());
        put_f32(&mut out, W_DMIN, stats.min);
        put_f32(&mut out, W_DMAX, stats.max);
        put_f32(&mut out, W_DMEAN, stats.mean as f32);
        put_i32(&mut out, W_ISPG, h.space_group);
        put_i32(&mut out, W_NSYMBT, h.extended.len() as i32);
        out[EXTTYP_OFFSET..EXTTYP_OFFSET + 4].copy_from_slice(&h.ext_type);
        put_i32(&mut out, W_VERSION, MRC_VERSION);
        out[MAP_OFFSET..MAP_OFFSET + 4].copy_from_slice(b"MAP ");
        out[MACHST_OFFSET..MACHST_OFFSET + 4].copy_from_slice(&[0x44, 0x44, 0x00, 0x00]);
        put_f32(&mut out, W_RMS, stats.std as f32);

        let labels = &h.labels[..h.labels.len().min(MAX_LABELS)];
        put_i32(&mut out, W_NLABL, labels.len() as i32);
        for (i, label) in labels.iter().enumerate() {
            let start = LABEL_OFFSET + i * LABEL_LEN;
            let slot = &mut out[start..start + LABEL_LEN];
            slot.fill(b' ');
            let text = label.as_bytes();
            let n = text.len().min(LABEL_LEN);
            slot[..n].copy_from_slice(&text[..n]);
        }

        out.extend_from_slice(&h.extended);
        out.reserve(nx * ny * nz * 4);
        for section in &self.sections {
            for row in 0..ny {
                for col in 0..nx {
                    out.extend_from_slice(&section[(row, col)].to_le_bytes());
                }
            }
        }
        Ok(out)
    }
}

// ============================================================================
// BYTE HELPERS
// ============================================================================

fn detect_byte_order(bytes: &[u8]) -> ByteOrder {
    match bytes[MACHST_OFFSET] {
        0x44 | 0x41 => ByteOrder::Little,
        0x11 => ByteOrder::Big,
        // No usable stamp: trust whichever order gives a known mode.
        _ => {
            if Mode::from_code(read_i32(bytes, W_MODE * 4, ByteOrder::Little)).is_some() {
                ByteOrder::Little
            } else {
                ByteOrder::Big
            }
        }
    }
}

fn read_i32(bytes: &[u8], offset: usize, order: ByteOrder) -> i32 {
    let b = [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]];
    match order {
        ByteOrder::Little => i32::from_le_bytes(b),
        ByteOrder::Big => i32::from_be_bytes(b),
    }
}

fn read_f32(bytes: &[u8], offset: usize, order: ByteOrder) -> f32 {
    f32::from_bits(read_i32(bytes, offset, order) as u32)
}

fn put_i32(out: &mut [u8], word: usize, value: i32) {
    out[word * 4..word * 4 + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_f32(out: &mut [u8], word: usize, value: f32) {
    out[word * 4..word * 4 + 4].copy_from_slice(&value.to_le_bytes());
}

fn decode_pixels(data: &[u8], mode: Mode, order: ByteOrder) -> Vec<f32> {
    let two = |c: &[u8]| [c[0], c[1]];
    match (mode, order) {
        (Mode::Int8, _) => data.iter().map(|&b| b as i8 as f32).collect(),
        (Mode::Int16, ByteOrder::Little) => data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes(two(c)) as f32)
            .collect(),
        (Mode::Int16, ByteOrder::Big) => data
            .chunks_exact(2)
            .map(|c| i16::from_be_bytes(two(c)) as f32)
            .collect(),
        (Mode::Uint16, ByteOrder::Little) => data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes(two(c)) as f32)
            .collect(),
        (Mode::Uint16, ByteOrder::Big) => data
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes(two(c)) as f32)
            .collect(),
        (Mode::Float32, _) => data
            .chunks_exact(4)
            .map(|c| read_f32(c, 0, order))
            .collect(),
    }
}
