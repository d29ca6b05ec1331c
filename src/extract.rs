//! Band extraction: one item, one band, one cropped GeoTIFF.
//!
//! [`BandExtractor`] looks up the band's asset, opens it through a
//! [`RasterOpener`], resolves the pixel window with the request's
//! [`WindowProtocol`], reads it, and writes a tiled deflate GeoTIFF named
//! after the event, item, acquisition date and band. Every failure is
//! scoped to that band: [`BandExtractor::extract`] logs it and returns
//! `None`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::catalog::ImageryItem;
use crate::cog_reader::CogReader;
use crate::config::Settings;
use crate::error::{ExtractError, RasterError};
use crate::geometry::BoundingBox;
use crate::geotiff_writer::{GeoTiffCompression, GeoTiffWriter, DEFAULT_TILE_SIZE};
use crate::range_reader::{AssetLocation, HttpRangeReader, LocalRangeReader, RangeReader};
use crate::raster::RasterSource;
use crate::s3::{S3Config, S3RangeReaderSync};
use crate::warp::WarpedView;
use crate::window::WindowProtocol;

/// Opens an asset href as a raster.
pub trait RasterOpener {
    /// Open `href` for reading. The returned source owns its session.
    ///
    /// # Errors
    /// Any failure to reach or interpret the asset.
    fn open(&self, href: &str) -> Result<Box<dyn RasterSource>, RasterError>;
}

impl<O: RasterOpener + ?Sized> RasterOpener for &O {
    fn open(&self, href: &str) -> Result<Box<dyn RasterSource>, RasterError> {
        (**self).open(href)
    }
}

/// Opens GeoTIFF assets from local disk, HTTP, or the configured object store.
#[derive(Debug, Clone)]
pub struct RemoteRasterOpener {
    s3: S3Config,
    timeout: Duration,
}

impl RemoteRasterOpener {
    #[must_use]
    pub fn new(s3: S3Config, timeout: Duration) -> Self {
        Self { s3, timeout }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.s3_config(), settings.http_timeout)
    }
}

impl RasterOpener for RemoteRasterOpener {
    fn open(&self, href: &str) -> Result<Box<dyn RasterSource>, RasterError> {
        let location = AssetLocation::parse(href, Some(&self.s3.endpoint));
        debug!(href, location = %location.display(), "Opening asset");

        let reader: Arc<dyn RangeReader> = match location {
            AssetLocation::Local(path) => Arc::new(LocalRangeReader::new(path)?),
            AssetLocation::Http(url) => Arc::new(HttpRangeReader::new(&url, self.timeout)?),
            AssetLocation::S3 { bucket, key } => {
                Arc::new(S3RangeReaderSync::open(&self.s3, &bucket, &key)?)
            }
        };
        Ok(Box::new(CogReader::open(reader)?))
    }
}

/// Where and how one event's bands are extracted.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionTarget<'a> {
    pub event_id: &'a str,
    /// WGS84 request box
    pub bbox: BoundingBox,
    pub out_dir: &'a Path,
    pub protocol: WindowProtocol,
}

/// `{event_id}_{item_id}_{YYYYMMDD}_{band}.tif`
#[must_use]
pub fn output_filename(event_id: &str, item: &ImageryItem, band: &str) -> String {
    let date = item
        .datetime()
        .map_or_else(|| "00000000".to_string(), |dt| dt.format("%Y%m%d").to_string());
    format!("{event_id}_{}_{date}_{band}.tif", item.id)
}

pub struct BandExtractor<O> {
    opener: O,
    compression: GeoTiffCompression,
    tile_size: u32,
}

impl<O: RasterOpener> BandExtractor<O> {
    #[must_use]
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            compression: GeoTiffCompression::Deflate,
            tile_size: DEFAULT_TILE_SIZE,
        }
    }

    /// Extract `band` of `item`, logging any failure.
    pub fn extract(&self, item: &ImageryItem, band: &str, target: &ExtractionTarget<'_>) -> Option<PathBuf> {
        match self.try_extract(item, band, target) {
            Ok(path) => {
                info!(
                    event_id = target.event_id,
                    item_id = %item.id,
                    band,
                    path = %path.display(),
                    "Band extracted"
                );
                Some(path)
            }
            Err(ExtractError::BandNotFound { .. }) => {
                warn!(
                    event_id = target.event_id,
                    item_id = %item.id,
                    band,
                    bbox = %target.bbox,
                    available = ?item.asset_keys(),
                    "Band not found in item assets"
                );
                None
            }
            Err(error) => {
                warn!(
                    event_id = target.event_id,
                    item_id = %item.id,
                    band,
                    bbox = %target.bbox,
                    protocol = %target.protocol,
                    error = %error,
                    "Band extraction failed"
                );
                None
            }
        }
    }

    /// Extract `band` of `item`, returning the absolute output path.
    ///
    /// # Errors
    /// Missing band, no overlap, degenerate window, read or write failure.
    pub fn try_extract(
        &self,
        item: &ImageryItem,
        band: &str,
        target: &ExtractionTarget<'_>,
    ) -> Result<PathBuf, ExtractError> {
        let asset = item.asset(band).ok_or_else(|| ExtractError::BandNotFound {
            item_id: item.id.clone(),
            band: band.to_string(),
        })?;
        let href = asset.read_href();
        let source = self.opener.open(href).map_err(|source| ExtractError::Open {
            href: href.to_string(),
            source,
        })?;

        fs::create_dir_all(target.out_dir)?;
        let path = target.out_dir.join(output_filename(target.event_id, item, band));

        match target.protocol {
            WindowProtocol::Direct => self.write_crop(source.as_ref(), target, &path)?,
            WindowProtocol::Reprojecting { dst_crs } => {
                let view = WarpedView::new(source.as_ref(), dst_crs).map_err(ExtractError::Read)?;
                self.write_crop(&view, target, &path)?;
            }
        }

        Ok(fs::canonicalize(&path)?)
    }

    /// Resolve, read and write the window of `source` covering the request.
    fn write_crop(
        &self,
        source: &dyn RasterSource,
        target: &ExtractionTarget<'_>,
        path: &Path,
    ) -> Result<(), ExtractError> {
        let window = target.protocol.resolve_window(source, &target.bbox)?;
        let block = source.read_window(&window).map_err(ExtractError::Read)?;
        if block.window != window {
            debug!(requested = %window, read = %block.window, "Window truncated at source bounds");
        }

        let transform = source.transform().window_transform(&block.window);
        GeoTiffWriter::new(&block, transform)
            .crs(target.protocol.output_crs(source.crs()))
            .nodata(source.nodata())
            .compression(self.compression)
            .tile_size(self.tile_size)
            .write(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    use serde_json::json;

    use crate::catalog::Asset;
    use crate::cog_reader::tests::{control_point_tiff, rotated_geographic_raster};
    use crate::error::WindowError;
    use crate::geometry::projection::reproject_wgs84_bbox;
    use crate::raster::MemoryRaster;
    use crate::window::{GeoTransform, Window};

    /// Serves one in-memory raster for every href and records the calls.
    struct FakeOpener {
        raster: Option<MemoryRaster>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeOpener {
        fn serving(raster: MemoryRaster) -> Self {
            Self {
                raster: Some(raster),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl RasterOpener for FakeOpener {
        fn open(&self, href: &str) -> Result<Box<dyn RasterSource>, RasterError> {
            self.calls.borrow_mut().push(href.to_string());
            match &self.raster {
                Some(raster) => Ok(Box::new(raster.clone())),
                None => Err(RasterError::Unsupported("offline".to_string())),
            }
        }
    }

    fn utm_raster() -> MemoryRaster {
        MemoryRaster::filled(
            1000,
            1500,
            1,
            GeoTransform::north_up(340_000.0, 2_790_000.0, 20.0, 20.0),
            Some(32651),
            7.0,
        )
    }

    fn item(bands: &[&str]) -> ImageryItem {
        let assets: BTreeMap<String, Asset> = bands
            .iter()
            .map(|band| {
                (
                    (*band).to_string(),
                    Asset {
                        href: format!("mem://{band}"),
                        alternate: BTreeMap::new(),
                    },
                )
            })
            .collect();
        ImageryItem {
            id: "S2B_TEST".to_string(),
            collection: Some("sentinel-2-l2a".to_string()),
            properties: json!({"datetime": "2024-12-10T02:31:21Z", "eo:cloud_cover": 10.0})
                .as_object()
                .unwrap()
                .clone(),
            assets,
        }
    }

    fn target<'a>(out_dir: &'a Path, protocol: WindowProtocol) -> ExtractionTarget<'a> {
        ExtractionTarget {
            event_id: "E001",
            bbox: BoundingBox::new(121.5, 25.0, 121.6, 25.1),
            out_dir,
            protocol,
        }
    }

    fn remote_opener() -> RemoteRasterOpener {
        RemoteRasterOpener::new(
            S3Config {
                endpoint: "eodata.dataspace.copernicus.eu".to_string(),
                region: "default".to_string(),
                access_key_id: None,
                secret_access_key: None,
                timeout: Duration::from_secs(1),
            },
            Duration::from_secs(1),
        )
    }

    fn open_output(path: &Path) -> CogReader {
        CogReader::open(Arc::new(LocalRangeReader::new(path).unwrap())).unwrap()
    }

    #[test]
    fn test_output_filename() {
        assert_eq!(
            output_filename("E001", &item(&[]), "B04_10m"),
            "E001_S2B_TEST_20241210_B04_10m.tif"
        );

        let mut undated = item(&[]);
        undated.properties.clear();
        assert_eq!(output_filename("E001", &undated, "VV"), "E001_S2B_TEST_00000000_VV.tif");
    }

    #[test]
    fn test_direct_extraction_writes_crop() {
        let dir = tempfile::tempdir().unwrap();
        let opener = FakeOpener::serving(utm_raster());
        let extractor = BandExtractor::new(&opener);

        let path = extractor
            .extract(&item(&["B04_10m"]), "B04_10m", &target(dir.path(), WindowProtocol::Direct))
            .unwrap();

        assert!(path.is_absolute());
        assert!(path.ends_with("E001_S2B_TEST_20241210_B04_10m.tif"));
        assert_eq!(*opener.calls.borrow(), vec!["mem://B04_10m".to_string()]);

        let written = open_output(&path);
        assert_eq!(written.crs(), Some(32651));
        assert!(written.width() > 400 && written.width() < 600, "{}", written.width());
        let block = written.read_window(&Window::new(0, 0, 4, 4)).unwrap();
        assert!(block.pixels.iter().all(|v| *v == 7.0));
    }

    #[test]
    fn test_missing_band_skips_open() {
        let dir = tempfile::tempdir().unwrap();
        let opener = FakeOpener::serving(utm_raster());
        let extractor = BandExtractor::new(&opener);

        let result = extractor.try_extract(&item(&["B04_10m"]), "B08_10m", &target(dir.path(), WindowProtocol::Direct));
        assert!(matches!(result, Err(ExtractError::BandNotFound { .. })));
        assert!(opener.calls.borrow().is_empty());
    }

    #[test]
    fn test_reprojecting_no_overlap_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // Same zone, roughly 10 degrees further south
        let far = MemoryRaster::filled(
            100,
            100,
            1,
            GeoTransform::north_up(300_000.0, 1_100_000.0, 20.0, 20.0),
            Some(32651),
            1.0,
        );
        let opener = FakeOpener::serving(far);
        let extractor = BandExtractor::new(&opener);
        let protocol = WindowProtocol::Reprojecting { dst_crs: 32651 };

        let result = extractor.try_extract(&item(&["VV"]), "VV", &target(dir.path(), protocol));
        assert!(matches!(
            result,
            Err(ExtractError::Window(WindowError::NoOverlap))
        ));
        assert!(extractor.extract(&item(&["VV"]), "VV", &target(dir.path(), protocol)).is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_reprojecting_writes_destination_crs() {
        let dir = tempfile::tempdir().unwrap();
        let geographic = MemoryRaster::filled(
            200,
            200,
            1,
            GeoTransform::north_up(121.45, 25.15, 0.001, 0.001),
            Some(4326),
            3.0,
        );
        let opener = FakeOpener::serving(geographic);
        let extractor = BandExtractor::new(&opener);
        let protocol = WindowProtocol::Reprojecting { dst_crs: 32651 };

        let path = extractor
            .extract(&item(&["VV"]), "VV", &target(dir.path(), protocol))
            .unwrap();
        let written = open_output(&path);
        assert_eq!(written.crs(), Some(32651));
        assert!(written.transform().origin_x > 100_000.0);
    }

    #[test]
    fn test_reprojecting_sliver_overlap_is_invalid_window() {
        let dir = tempfile::tempdir().unwrap();
        let request = BoundingBox::new(121.5, 25.0, 121.6, 25.1);
        let utm = reproject_wgs84_bbox(&request, 32651).unwrap();
        // West edge 10 m (half a pixel) inside the request's east edge
        let sliver = MemoryRaster::filled(
            1000,
            1500,
            1,
            GeoTransform::north_up(utm.maxx - 10.0, utm.maxy + 1000.0, 20.0, 20.0),
            Some(32651),
            1.0,
        );
        let opener = FakeOpener::serving(sliver);
        let extractor = BandExtractor::new(&opener);
        let protocol = WindowProtocol::Reprojecting { dst_crs: 32651 };

        let result = extractor.try_extract(&item(&["VV"]), "VV", &target(dir.path(), protocol));
        assert!(matches!(
            result,
            Err(ExtractError::Window(WindowError::InvalidWindow { width, .. })) if width < 1.0
        ));
        assert!(extractor.extract(&item(&["VV"]), "VV", &target(dir.path(), protocol)).is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_direct_partial_overlap_uses_truncated_transform() {
        let dir = tempfile::tempdir().unwrap();
        let request = BoundingBox::new(121.5, 25.0, 121.6, 25.1);
        let utm = reproject_wgs84_bbox(&request, 32651).unwrap();
        // Source starts 2 km east and 1 km south of the request's north-west corner
        let origin = (utm.minx + 2000.0, utm.maxy - 1000.0);
        let partial = MemoryRaster::filled(
            1000,
            1500,
            1,
            GeoTransform::north_up(origin.0, origin.1, 20.0, 20.0),
            Some(32651),
            5.0,
        );
        let requested = Window::from_bounds(&utm, &partial.transform).unwrap();
        assert!(requested.col_off < 0 && requested.row_off < 0);

        let opener = FakeOpener::serving(partial);
        let path = BandExtractor::new(&opener)
            .extract(&item(&["B04_10m"]), "B04_10m", &target(dir.path(), WindowProtocol::Direct))
            .unwrap();

        let written = open_output(&path);
        assert_eq!(written.transform().origin_x, origin.0);
        assert_eq!(written.transform().origin_y, origin.1);
        assert!(written.width() < requested.width);
        assert!(written.height() < requested.height);
        let block = written.read_window(&Window::new(0, 0, 2, 2)).unwrap();
        assert!(block.pixels.iter().all(|v| *v == 5.0));
    }

    #[test]
    fn test_reprojecting_rotated_source() {
        let dir = tempfile::tempdir().unwrap();
        let opener = FakeOpener::serving(rotated_geographic_raster());
        let extractor = BandExtractor::new(&opener);
        let protocol = WindowProtocol::Reprojecting { dst_crs: 32651 };

        let path = extractor
            .try_extract(&item(&["VV"]), "VV", &target(dir.path(), protocol))
            .unwrap();
        let written = open_output(&path);
        assert_eq!(written.crs(), Some(32651));
        assert!(written.transform().is_rectilinear());
    }

    #[test]
    fn test_control_point_asset_through_remote_opener() {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("measurement-vv.tiff");
        fs::write(&asset, control_point_tiff(&rotated_geographic_raster(), 50)).unwrap();

        let mut grd = item(&["VV"]);
        grd.assets.insert(
            "VV".to_string(),
            Asset {
                href: asset.display().to_string(),
                alternate: BTreeMap::new(),
            },
        );
        let out_dir = dir.path().join("E001");
        let protocol = WindowProtocol::Reprojecting { dst_crs: 32651 };

        let path = BandExtractor::new(remote_opener())
            .try_extract(&grd, "VV", &target(&out_dir, protocol))
            .unwrap();
        let written = open_output(&path);
        assert_eq!(written.crs(), Some(32651));
        assert!(written.transform().origin_x > 100_000.0);

        // Column values increase west to east across the crop
        let mid = written.height() / 2;
        let block = written
            .read_window(&Window::new(0, mid as i64, written.width(), 1))
            .unwrap();
        let first = block.get(0, 0, 0).unwrap();
        let last = block.get(written.width() - 1, 0, 0).unwrap();
        assert!(last > first, "first {first} last {last}");
    }

    #[test]
    fn test_open_failure_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let opener = FakeOpener {
            raster: None,
            calls: RefCell::new(Vec::new()),
        };
        let extractor = BandExtractor::new(&opener);

        let result = extractor.try_extract(&item(&["B04_10m"]), "B04_10m", &target(dir.path(), WindowProtocol::Direct));
        assert!(matches!(result, Err(ExtractError::Open { .. })));
    }

    #[test]
    fn test_remote_opener_reads_local_geotiff() {
        let dir = tempfile::tempdir().unwrap();
        let opener = FakeOpener::serving(utm_raster());
        let path = BandExtractor::new(&opener)
            .extract(&item(&["B04_10m"]), "B04_10m", &target(dir.path(), WindowProtocol::Direct))
            .unwrap();

        let remote = remote_opener();
        let href = format!("file://{}", path.display());
        let source = remote.open(&href).unwrap();
        assert_eq!(source.crs(), Some(32651));

        // Object storage without credentials fails at open time
        let missing = remote.open("s3://eodata/Sentinel-2/B04.tif");
        assert!(matches!(missing, Err(RasterError::Range(_))));
    }
}
