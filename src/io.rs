//! Minimal file format for this engine's own input/output images: a raw
//! little-endian binary data file plus a JSON sidecar carrying the header.
//! Real neuroimaging formats are out of scope (see the crate root); this is
//! just enough I/O for the CLI binary to read an input and write a noise
//! map without depending on an external format library.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array4;
use num_complex::{Complex32, Complex64};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::header::Header;
use crate::image::Image;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    Float32,
    Float64,
    ComplexFloat32,
    ComplexFloat64,
}

/// The JSON sidecar: everything needed to interpret the raw data file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sidecar {
    pub affine: [[f64; 4]; 3],
    pub size: [usize; 3],
    pub volumes: usize,
    pub spacing: [f64; 3],
    pub datatype: Datatype,
    pub metadata: std::collections::HashMap<String, String>,
}

impl Sidecar {
    fn from_header(header: &Header, datatype: Datatype) -> Self {
        Sidecar {
            affine: header.affine,
            size: header.size,
            volumes: header.volumes,
            spacing: header.spacing,
            datatype,
            metadata: header.metadata.clone(),
        }
    }

    fn into_header(self) -> Header {
        Header {
            affine: self.affine,
            size: self.size,
            volumes: self.volumes,
            spacing: self.spacing,
            metadata: self.metadata,
        }
    }
}

/// An element type this I/O layer can serialize to/from the raw format.
pub trait RawElement: Sized + Copy {
    const DATATYPE: Datatype;
    fn write_le(self, w: &mut impl Write) -> std::io::Result<()>;
    fn read_le(r: &mut impl Read) -> std::io::Result<Self>;
}

impl RawElement for f32 {
    const DATATYPE: Datatype = Datatype::Float32;
    fn write_le(self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_f32::<LittleEndian>(self)
    }
    fn read_le(r: &mut impl Read) -> std::io::Result<Self> {
        r.read_f32::<LittleEndian>()
    }
}

impl RawElement for f64 {
    const DATATYPE: Datatype = Datatype::Float64;
    fn write_le(self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_f64::<LittleEndian>(self)
    }
    fn read_le(r: &mut impl Read) -> std::io::Result<Self> {
        r.read_f64::<LittleEndian>()
    }
}

impl RawElement for Complex32 {
    const DATATYPE: Datatype = Datatype::ComplexFloat32;
    fn write_le(self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_f32::<LittleEndian>(self.re)?;
        w.write_f32::<LittleEndian>(self.im)
    }
    fn read_le(r: &mut impl Read) -> std::io::Result<Self> {
        let re = r.read_f32::<LittleEndian>()?;
        let im = r.read_f32::<LittleEndian>()?;
        Ok(Complex32::new(re, im))
    }
}

impl RawElement for Complex64 {
    const DATATYPE: Datatype = Datatype::ComplexFloat64;
    fn write_le(self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_f64::<LittleEndian>(self.re)?;
        w.write_f64::<LittleEndian>(self.im)
    }
    fn read_le(r: &mut impl Read) -> std::io::Result<Self> {
        let re = r.read_f64::<LittleEndian>()?;
        let im = r.read_f64::<LittleEndian>()?;
        Ok(Complex64::new(re, im))
    }
}

fn sidecar_path(data_path: &Path) -> std::path::PathBuf {
    let mut s = data_path.as_os_str().to_owned();
    s.push(".json");
    std::path::PathBuf::from(s)
}

pub fn write_image<T: RawElement>(path: &Path, image: &Image<T>) -> Result<()> {
    let sidecar = Sidecar::from_header(image.header(), T::DATATYPE);
    let sidecar_file = File::create(sidecar_path(path))?;
    serde_json::to_writer_pretty(sidecar_file, &sidecar)?;

    let mut writer = BufWriter::new(File::create(path)?);
    let size = image.spatial_size();
    for v in 0..image.num_volumes() {
        for z in 0..size[2] {
            for y in 0..size[1] {
                for x in 0..size[0] {
                    image.get(x, y, z, v).write_le(&mut writer)?;
                }
            }
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn read_image<T: RawElement>(path: &Path) -> Result<Image<T>> {
    let sidecar_reader = File::open(sidecar_path(path))?;
    let sidecar: Sidecar = serde_json::from_reader(sidecar_reader)?;
    if sidecar.datatype != T::DATATYPE {
        return Err(EngineError::Configuration(format!(
            "sidecar declares datatype {:?}, reader expects {:?}",
            sidecar.datatype,
            T::DATATYPE
        )));
    }
    let size = sidecar.size;
    let volumes = sidecar.volumes;
    let header = sidecar.into_header();

    let mut reader = BufReader::new(File::open(path)?);
    let total = size[0] * size[1] * size[2] * volumes;
    let mut flat = Vec::with_capacity(total);
    for _ in 0..total {
        flat.push(T::read_le(&mut reader)?);
    }
    // `flat` is in (v, z, y, x) order, x fastest, matching `write_image`;
    // build with that shape directly, then permute back to (x, y, z, v).
    let raw = Array4::from_shape_vec((volumes, size[2], size[1], size[0]), flat)
        .map_err(|e| EngineError::Configuration(format!("raw data length mismatch: {e}")))?;
    let data = raw.permuted_axes([3, 2, 1, 0]);

    Image::new(header, data.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_f32_image() {
        let dir = std::env::temp_dir().join(format!("mppca-noise-io-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("volume.raw");

        let header = Header::new([3, 2, 2], 4, [1.5, 1.5, 1.5]);
        let data = Array4::<f32>::from_shape_fn((3, 2, 2, 4), |(x, y, z, v)| (x + y + z + v) as f32);
        let image = Image::new(header, data).unwrap();

        write_image(&path, &image).unwrap();
        let loaded: Image<f32> = read_image(&path).unwrap();

        assert_eq!(loaded.spatial_size(), image.spatial_size());
        assert_eq!(loaded.num_volumes(), image.num_volumes());
        for v in 0..4 {
            assert_eq!(loaded.column(1, 1, 1), image.column(1, 1, 1));
            let _ = v;
        }

        let _ = std::fs::remove_dir_all(&dir);
    }
}
