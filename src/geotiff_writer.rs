//! GeoTIFF writer for cropped band windows
//!
//! Writes a [`RasterBlock`] with its transform, CRS and nodata value as a
//! tiled GeoTIFF. Tiles are compressed here with `flate2` and handed to the
//! `tiff` crate's low-level directory encoder, so the output carries the
//! same tags a GDAL `TILED=YES COMPRESS=DEFLATE` profile would.
//!
//! # Example
//!
//! ```rust,no_run
//! use eventcog::{GeoTiffWriter, GeoTransform, MemoryRaster, RasterSource, Window};
//!
//! let raster = MemoryRaster::filled(64, 64, 1, GeoTransform::north_up(0.0, 64.0, 1.0, 1.0), Some(32651), 1.0);
//! let block = raster.read_window(&Window::new(0, 0, 32, 32))?;
//! GeoTiffWriter::new(&block, raster.transform())
//!     .crs(Some(32651))
//!     .write("crop.tif")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use flate2::write::ZlibEncoder;
use thiserror::Error;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

use crate::geometry::projection::is_geographic_crs;
use crate::raster::RasterBlock;
use crate::window::GeoTransform;

// GeoAsciiParams tag ID, referenced from inside the GeoKey directory
const GEOTIFF_GEOASCIIPARAMS: u16 = 34737;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GT_CITATION_GEO_KEY: u16 = 1026;
pub(crate) const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
pub(crate) const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Tile edge length used for extracted windows
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Compression method for GeoTIFF output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeoTiffCompression {
    /// No compression
    None,
    /// Deflate (zlib)
    #[default]
    Deflate,
}

impl GeoTiffCompression {
    fn tag_value(self) -> u16 {
        match self {
            Self::None => 1,
            Self::Deflate => 8,
        }
    }
}

/// Error type for GeoTIFF writing operations
#[derive(Debug, Error)]
pub enum GeoTiffWriteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF encoding error: {0}")]
    TiffEncode(#[from] tiff::TiffError),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Builder for configuring GeoTIFF output
pub struct GeoTiffWriter<'a> {
    block: &'a RasterBlock,
    transform: GeoTransform,
    crs: Option<i32>,
    nodata: Option<f64>,
    compression: GeoTiffCompression,
    tile_size: u32,
}

impl<'a> GeoTiffWriter<'a> {
    /// Writer for `block`, whose pixel (0, 0) maps through `transform`.
    #[must_use]
    pub fn new(block: &'a RasterBlock, transform: GeoTransform) -> Self {
        Self {
            block,
            transform,
            crs: None,
            nodata: None,
            compression: GeoTiffCompression::default(),
            tile_size: DEFAULT_TILE_SIZE,
        }
    }

    #[must_use]
    pub fn crs(mut self, crs: Option<i32>) -> Self {
        self.crs = crs;
        self
    }

    #[must_use]
    pub fn nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Tile edge length. Must be a positive multiple of 16.
    #[must_use]
    pub fn tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Write to a file path, replacing any existing file
    ///
    /// # Errors
    /// I/O, encoding, or invalid block errors.
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<(), GeoTiffWriteError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Write to bytes
    ///
    /// # Errors
    /// Encoding or invalid block errors.
    pub fn to_bytes(self) -> Result<Vec<u8>, GeoTiffWriteError> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        self.write_to(&mut buffer)?;
        Ok(buffer.into_inner())
    }

    /// Write to any writer that implements Write + Seek
    ///
    /// # Errors
    /// I/O, encoding, or invalid block errors.
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<(), GeoTiffWriteError> {
        let block = self.block;
        if block.width == 0 || block.height == 0 || block.bands == 0 {
            return Err(GeoTiffWriteError::InvalidData(
                "Raster has zero dimensions".to_string(),
            ));
        }
        if block.pixels.len() != block.width * block.height * block.bands {
            return Err(GeoTiffWriteError::InvalidData(format!(
                "expected {} samples for {}x{}x{}, got {}",
                block.width * block.height * block.bands,
                block.width,
                block.height,
                block.bands,
                block.pixels.len()
            )));
        }
        if self.tile_size == 0 || self.tile_size % 16 != 0 {
            return Err(GeoTiffWriteError::InvalidData(format!(
                "tile size {} is not a positive multiple of 16",
                self.tile_size
            )));
        }

        let width = to_u32(block.width, "width")?;
        let height = to_u32(block.height, "height")?;
        let bands = u16::try_from(block.bands)
            .map_err(|_| GeoTiffWriteError::InvalidData(format!("{} bands", block.bands)))?;

        let mut encoder = TiffEncoder::new(writer)?;
        let mut dir = encoder.new_directory()?;

        dir.write_tag(Tag::ImageWidth, width)?;
        dir.write_tag(Tag::ImageLength, height)?;
        dir.write_tag(Tag::BitsPerSample, vec![32u16; block.bands].as_slice())?;
        dir.write_tag(Tag::Compression, self.compression.tag_value())?;

        // RGB for three-band composites, BlackIsZero plus extras otherwise
        if block.bands == 3 {
            dir.write_tag(Tag::PhotometricInterpretation, 2u16)?;
        } else {
            dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
            if block.bands > 1 {
                dir.write_tag(Tag::ExtraSamples, vec![0u16; block.bands - 1].as_slice())?;
            }
        }

        dir.write_tag(Tag::SamplesPerPixel, bands)?;
        dir.write_tag(Tag::SampleFormat, vec![3u16; block.bands].as_slice())?;
        dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
        dir.write_tag(Tag::TileWidth, self.tile_size)?;
        dir.write_tag(Tag::TileLength, self.tile_size)?;

        self.write_geotiff_tags(&mut dir)?;

        let tiles_across = width.div_ceil(self.tile_size);
        let tiles_down = height.div_ceil(self.tile_size);
        let mut offsets = Vec::with_capacity((tiles_across * tiles_down) as usize);
        let mut byte_counts = Vec::with_capacity(offsets.capacity());
        for tile_row in 0..tiles_down {
            for tile_col in 0..tiles_across {
                let data = self.encode_tile(tile_col, tile_row)?;
                let offset = dir.write_data(data.as_slice())?;
                offsets.push(u32::try_from(offset).map_err(|_| {
                    GeoTiffWriteError::InvalidData("output exceeds 4 GiB".to_string())
                })?);
                byte_counts.push(to_u32(data.len(), "tile byte count")?);
            }
        }
        dir.write_tag(Tag::TileOffsets, offsets.as_slice())?;
        dir.write_tag(Tag::TileByteCounts, byte_counts.as_slice())?;

        dir.finish()?;
        Ok(())
    }

    /// Samples of one tile, padded with nodata (or 0) past the raster edge,
    /// in native byte order to match the encoder's header.
    fn encode_tile(&self, tile_col: u32, tile_row: u32) -> Result<Vec<u8>, GeoTiffWriteError> {
        let block = self.block;
        let size = self.tile_size as usize;
        #[allow(clippy::cast_possible_truncation)]
        let fill = self.nodata.map_or(0.0, |v| v as f32);
        let col0 = tile_col as usize * size;
        let row0 = tile_row as usize * size;

        let mut raw = Vec::with_capacity(size * size * block.bands * 4);
        for row in row0..row0 + size {
            for col in col0..col0 + size {
                for band in 0..block.bands {
                    let value = block.get(col, row, band).unwrap_or(fill);
                    raw.extend_from_slice(&value.to_ne_bytes());
                }
            }
        }

        match self.compression {
            GeoTiffCompression::None => Ok(raw),
            GeoTiffCompression::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&raw)?;
                Ok(encoder.finish()?)
            }
        }
    }

    fn write_geotiff_tags<W: Write + Seek, K: tiff::encoder::TiffKind>(
        &self,
        dir: &mut tiff::encoder::DirectoryEncoder<W, K>,
    ) -> Result<(), GeoTiffWriteError> {
        let gt = &self.transform;

        if gt.is_rectilinear() {
            // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
            let pixel_scale = [gt.pixel_width, -gt.pixel_height, 0.0];
            dir.write_tag(Tag::ModelPixelScaleTag, pixel_scale.as_slice())?;

            // ModelTiepoint: pixel (0, 0) to the transform origin
            let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
            dir.write_tag(Tag::ModelTiepointTag, tiepoint.as_slice())?;
        } else {
            let matrix = [
                gt.pixel_width, gt.row_rotation, 0.0, gt.origin_x,
                gt.col_rotation, gt.pixel_height, 0.0, gt.origin_y,
                0.0, 0.0, 0.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ];
            dir.write_tag(Tag::ModelTransformationTag, matrix.as_slice())?;
        }

        if let Some(crs) = self.crs {
            let citation = format!("EPSG:{crs}|");
            let geokeys = build_geokey_directory(crs, &citation)?;
            dir.write_tag(Tag::GeoKeyDirectoryTag, geokeys.as_slice())?;
            dir.write_tag(Tag::GeoAsciiParamsTag, citation.as_str())?;
        }

        if let Some(nodata) = self.nodata {
            dir.write_tag(Tag::GdalNodata, nodata.to_string().as_str())?;
        }

        Ok(())
    }
}

/// GeoKeyDirectory: header `[version, revision, minor, count]` followed by
/// `[key, location, count, value]` entries sorted by key.
fn build_geokey_directory(crs: i32, citation: &str) -> Result<Vec<u16>, GeoTiffWriteError> {
    let code = u16::try_from(crs)
        .map_err(|_| GeoTiffWriteError::InvalidData(format!("EPSG:{crs} is not a GeoKey code")))?;
    let citation_len = u16::try_from(citation.len())
        .map_err(|_| GeoTiffWriteError::InvalidData("citation too long".to_string()))?;
    let is_geographic = is_geographic_crs(crs);

    let mut keys = vec![1, 1, 0, 4];
    keys.extend_from_slice(&[
        GT_MODEL_TYPE_GEO_KEY,
        0,
        1,
        if is_geographic {
            MODEL_TYPE_GEOGRAPHIC
        } else {
            MODEL_TYPE_PROJECTED
        },
    ]);
    keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
    keys.extend_from_slice(&[GT_CITATION_GEO_KEY, GEOTIFF_GEOASCIIPARAMS, citation_len, 0]);
    if is_geographic {
        keys.extend_from_slice(&[GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, code]);
    } else {
        keys.extend_from_slice(&[PROJECTED_CS_TYPE_GEO_KEY, 0, 1, code]);
    }
    Ok(keys)
}

fn to_u32(value: usize, what: &str) -> Result<u32, GeoTiffWriteError> {
    u32::try_from(value).map_err(|_| GeoTiffWriteError::InvalidData(format!("{what} {value} too large")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::Window;
    use tiff::decoder::{Decoder, DecodingResult};

    fn create_test_block(bands: usize, width: usize, height: usize) -> RasterBlock {
        #[allow(clippy::cast_precision_loss)]
        let pixels: Vec<f32> = (0..width * height * bands).map(|i| (i % 251) as f32).collect();
        RasterBlock {
            pixels,
            bands,
            width,
            height,
            window: Window::new(0, 0, width, height),
        }
    }

    fn utm_transform() -> GeoTransform {
        GeoTransform::north_up(300_000.0, 2_780_000.0, 10.0, 10.0)
    }

    #[test]
    fn test_write_tiled_geotiff() {
        let block = create_test_block(1, 40, 30);
        let bytes = GeoTiffWriter::new(&block, utm_transform())
            .crs(Some(32651))
            .tile_size(16)
            .to_bytes()
            .unwrap();

        let mut decoder = Decoder::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (40, 30));
        assert_eq!(decoder.chunk_dimensions(), (16, 16));
        assert_eq!(decoder.get_tag_u32(Tag::Compression).unwrap(), 8);

        let DecodingResult::F32(tile) = decoder.read_chunk(0).unwrap() else {
            panic!("expected f32 samples");
        };
        assert_eq!(tile[0], block.get(0, 0, 0).unwrap());
        assert_eq!(tile[2 * 16 + 3], block.get(3, 2, 0).unwrap());
    }

    #[test]
    fn test_georeferencing_tags() {
        let block = create_test_block(1, 8, 8);
        let bytes = GeoTiffWriter::new(&block, utm_transform())
            .crs(Some(32651))
            .nodata(Some(0.0))
            .tile_size(16)
            .to_bytes()
            .unwrap();

        let mut decoder = Decoder::new(std::io::Cursor::new(bytes)).unwrap();
        let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).unwrap();
        assert_eq!(scale, vec![10.0, 10.0, 0.0]);
        let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).unwrap();
        assert_eq!(tiepoint[3..5], [300_000.0, 2_780_000.0]);

        let keys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).unwrap();
        let projected = keys[4..]
            .chunks(4)
            .find(|entry| entry[0] == PROJECTED_CS_TYPE_GEO_KEY)
            .unwrap();
        assert_eq!(projected[3], 32651);

        let nodata = decoder.get_tag_ascii_string(Tag::GdalNodata).unwrap();
        assert_eq!(nodata.trim_end_matches('\0'), "0");
    }

    #[test]
    fn test_geokey_directory_geographic() {
        let keys = build_geokey_directory(4326, "EPSG:4326|").unwrap();
        assert_eq!(keys[3], 4);
        assert_eq!(keys[7], MODEL_TYPE_GEOGRAPHIC);
        assert_eq!(keys[16], GEOGRAPHIC_TYPE_GEO_KEY);
        assert_eq!(keys[19], 4326);
    }

    #[test]
    fn test_rotated_transform_uses_model_transformation() {
        let block = create_test_block(1, 4, 4);
        let mut transform = utm_transform();
        transform.row_rotation = 0.5;
        let bytes = GeoTiffWriter::new(&block, transform)
            .tile_size(16)
            .to_bytes()
            .unwrap();

        let mut decoder = Decoder::new(std::io::Cursor::new(bytes)).unwrap();
        let matrix = decoder
            .get_tag_f64_vec(Tag::ModelTransformationTag)
            .unwrap();
        assert_eq!(matrix.len(), 16);
        assert_eq!(matrix[1], 0.5);
        assert!(decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).is_err());
    }

    #[test]
    fn test_uncompressed_three_band() {
        let block = create_test_block(3, 20, 20);
        let bytes = GeoTiffWriter::new(&block, utm_transform())
            .crs(Some(32651))
            .compression(GeoTiffCompression::None)
            .tile_size(16)
            .to_bytes()
            .unwrap();

        let mut decoder = Decoder::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(decoder.get_tag_u32(Tag::Compression).unwrap(), 1);
        assert_eq!(decoder.get_tag_u32(Tag::SamplesPerPixel).unwrap(), 3);
        let DecodingResult::F32(tile) = decoder.read_chunk(0).unwrap() else {
            panic!("expected f32 samples");
        };
        assert_eq!(tile[(16 + 1) * 3 + 2], block.get(1, 1, 2).unwrap());
    }

    #[test]
    fn test_sample_count_mismatch_rejected() {
        let mut block = create_test_block(1, 8, 8);
        block.pixels.pop();
        let result = GeoTiffWriter::new(&block, utm_transform()).to_bytes();
        assert!(matches!(result, Err(GeoTiffWriteError::InvalidData(_))));
    }

    #[test]
    fn test_bad_tile_size_rejected() {
        let block = create_test_block(1, 8, 8);
        let result = GeoTiffWriter::new(&block, utm_transform()).tile_size(100).to_bytes();
        assert!(matches!(result, Err(GeoTiffWriteError::InvalidData(_))));
    }

    #[test]
    fn test_write_overwrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop.tif");
        std::fs::write(&path, b"stale").unwrap();

        let block = create_test_block(1, 64, 64);
        GeoTiffWriter::new(&block, utm_transform())
            .crs(Some(32651))
            .write(&path)
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"II") || bytes.starts_with(b"MM"));
        assert!(bytes.len() > 8);
    }
}
