//! Windowed GeoTIFF / COG reader.
//!
//! Opens a TIFF through a [`RangeReader`], parses the georeferencing tags
//! once, and serves [`RasterSource::read_pixels`] by decoding only the
//! tiles (or strips) a window touches. Samples are widened to `f32`.
//!
//! Georeferencing comes from `ModelTransformation`, from a tiepoint plus
//! `ModelPixelScale`, or from a set of ground control points (tiepoints with
//! no pixel scale, as in Sentinel-1 GRD measurements), which are fitted to an
//! affine transform by least squares.

use std::sync::{Arc, Mutex};

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tracing::{debug, warn};

use crate::error::RasterError;
use crate::geotiff_writer::{GEOGRAPHIC_TYPE_GEO_KEY, PROJECTED_CS_TYPE_GEO_KEY};
use crate::range_reader::{RangeCursor, RangeReader};
use crate::raster::RasterSource;
use crate::window::{GeoTransform, Window};

/// GeoKey value for "user defined"
const USER_DEFINED: u16 = 32767;

/// Georeferenced TIFF opened over a byte-range source.
pub struct CogReader {
    reader: Arc<dyn RangeReader>,
    decoder: Mutex<Decoder<RangeCursor>>,
    width: usize,
    height: usize,
    bands: usize,
    chunk_width: usize,
    chunk_height: usize,
    transform: GeoTransform,
    crs: Option<i32>,
    nodata: Option<f64>,
}

impl CogReader {
    /// Parse the first image directory of `reader`.
    ///
    /// # Errors
    /// Returns an error if the bytes are not a TIFF, the layout is planar,
    /// or no pixel-to-world transform is present.
    pub fn open(reader: Arc<dyn RangeReader>) -> Result<Self, RasterError> {
        let mut decoder = Decoder::new(RangeCursor::new(Arc::clone(&reader)))?;

        let (width, height) = decoder.dimensions()?;
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();

        let bands = match decoder.find_tag(Tag::SamplesPerPixel)? {
            Some(value) => usize::from(value.into_u16()?),
            None => 1,
        };
        if let Some(planar) = decoder.find_tag(Tag::PlanarConfiguration)? {
            if planar.into_u16()? == 2 {
                return Err(RasterError::Unsupported(
                    "planar (band-separate) sample layout".to_string(),
                ));
            }
        }

        let transform = read_transform(&mut decoder)?;
        let crs = read_epsg(&mut decoder)?;
        let nodata = match decoder.find_tag(Tag::GdalNodata)? {
            Some(value) => parse_nodata(&value.into_string()?, reader.identifier()),
            None => None,
        };

        debug!(
            source = reader.identifier(),
            width,
            height,
            bands,
            chunk_width,
            chunk_height,
            crs = ?crs,
            nodata = ?nodata,
            "Opened GeoTIFF"
        );

        Ok(Self {
            reader,
            decoder: Mutex::new(decoder),
            width: width as usize,
            height: height as usize,
            bands,
            chunk_width: chunk_width as usize,
            chunk_height: chunk_height as usize,
            transform,
            crs,
            nodata,
        })
    }

    /// Identifier of the underlying byte source.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    fn chunks_across(&self) -> usize {
        self.width.div_ceil(self.chunk_width)
    }
}

fn read_transform(decoder: &mut Decoder<RangeCursor>) -> Result<GeoTransform, RasterError> {
    if let Some(value) = decoder.find_tag(Tag::ModelTransformationTag)? {
        let matrix: [f64; 16] = value
            .into_f64_vec()?
            .try_into()
            .map_err(|_| RasterError::MissingGeoreference("ModelTransformation with 16 values"))?;
        return Ok(GeoTransform::from_model_transformation(&matrix));
    }

    let tiepoints = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .ok_or(RasterError::MissingGeoreference("ModelTiepoint"))?
        .into_f64_vec()?;

    let Some(scale) = decoder.find_tag(Tag::ModelPixelScaleTag)? else {
        // Ground control points: (I, J, K, X, Y, Z) per point
        let points: Vec<(f64, f64, f64, f64)> = tiepoints
            .chunks_exact(6)
            .map(|t| (t[0], t[1], t[3], t[4]))
            .collect();
        debug!(points = points.len(), "Fitting transform to control points");
        return GeoTransform::from_control_points(&points).ok_or(RasterError::MissingGeoreference(
            "ModelPixelScale or three non-collinear tiepoints",
        ));
    };
    let scale = scale.into_f64_vec()?;

    // With a pixel scale only the first tiepoint is used
    let tiepoint: [f64; 6] = tiepoints
        .get(..6)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(RasterError::MissingGeoreference("ModelTiepoint with 6 values"))?;
    let scale: [f64; 3] = scale
        .get(..3)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(RasterError::MissingGeoreference("ModelPixelScale with 3 values"))?;
    Ok(GeoTransform::from_tiepoint_and_scale(&tiepoint, &scale))
}

/// GDAL nodata is stored as ASCII text.
fn parse_nodata(text: &str, source: &str) -> Option<f64> {
    let trimmed = text.trim_matches(char::from(0)).trim();
    match trimmed.parse::<f64>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(source, value = trimmed, "Ignoring unparseable GDAL_NODATA");
            None
        }
    }
}

/// EPSG code from the GeoKey directory, projected CRS first.
fn read_epsg(decoder: &mut Decoder<RangeCursor>) -> Result<Option<i32>, RasterError> {
    let Some(value) = decoder.find_tag(Tag::GeoKeyDirectoryTag)? else {
        return Ok(None);
    };
    let keys = value.into_u16_vec()?;
    Ok(epsg_from_geokeys(&keys))
}

fn epsg_from_geokeys(keys: &[u16]) -> Option<i32> {
    let entries = keys.get(4..)?;
    let lookup = |wanted: u16| {
        entries
            .chunks_exact(4)
            .find(|entry| entry[0] == wanted && entry[1] == 0)
            .map(|entry| entry[3])
            .filter(|code| *code != 0 && *code != USER_DEFINED)
            .map(i32::from)
    };
    lookup(PROJECTED_CS_TYPE_GEO_KEY).or_else(|| lookup(GEOGRAPHIC_TYPE_GEO_KEY))
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn into_f32(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
    }
}

impl RasterSource for CogReader {
    fn crs(&self) -> Option<i32> {
        self.crs
    }

    fn transform(&self) -> GeoTransform {
        self.transform
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn bands(&self) -> usize {
        self.bands
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn read_pixels(&self, window: &Window) -> Result<Vec<f32>, RasterError> {
        let (Ok(col0), Ok(row0)) = (usize::try_from(window.col_off), usize::try_from(window.row_off)) else {
            return Err(RasterError::EmptyRead(window.to_string()));
        };
        let (col1, row1) = (col0 + window.width, row0 + window.height);
        if window.width == 0 || window.height == 0 || col1 > self.width || row1 > self.height {
            return Err(RasterError::EmptyRead(window.to_string()));
        }

        let bands = self.bands;
        #[allow(clippy::cast_possible_truncation)]
        let fill = self.nodata.map_or(0.0, |v| v as f32);
        let mut out = vec![fill; window.width * window.height * bands];

        let (cw, ch) = (self.chunk_width, self.chunk_height);
        let across = self.chunks_across();
        let mut decoder = self.decoder.lock().map_err(|_| RasterError::Poisoned)?;
        let mut decoded = 0usize;

        for chunk_row in row0 / ch..=(row1 - 1) / ch {
            for chunk_col in col0 / cw..=(col1 - 1) / cw {
                let index = u32::try_from(chunk_row * across + chunk_col)
                    .map_err(|_| RasterError::Unsupported("chunk index overflow".to_string()))?;
                let samples = into_f32(decoder.read_chunk(index)?);
                decoded += 1;

                // Edge chunks are decoded cropped to the image
                let (x0, y0) = (chunk_col * cw, chunk_row * ch);
                let data_width = cw.min(self.width - x0);

                for row in row0.max(y0)..row1.min(y0 + ch) {
                    let c_start = col0.max(x0);
                    let c_end = col1.min(x0 + data_width);
                    if c_start >= c_end {
                        continue;
                    }
                    let src = ((row - y0) * data_width + (c_start - x0)) * bands;
                    let dst = ((row - row0) * window.width + (c_start - col0)) * bands;
                    let len = (c_end - c_start) * bands;
                    let line = samples.get(src..src + len).ok_or_else(|| {
                        RasterError::Unsupported(format!("short chunk {index} in {}", self.identifier()))
                    })?;
                    out[dst..dst + len].copy_from_slice(line);
                }
            }
        }

        debug!(source = self.identifier(), window = %window, chunks = decoded, "Read window");
        Ok(out)
    }
}
