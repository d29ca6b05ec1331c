//! Benchmarks for bounding-box reprojection and window resolution.
//!
//! Run with: `cargo bench`
//!
//! These benchmarks measure the per-band setup cost:
//! - Densified bounds reprojection WGS84 -> UTM
//! - Direct and reprojecting window resolution
//! - Warped view reads

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use eventcog::{
    transform_bounds, BoundingBox, GeoTransform, MemoryRaster, RasterSource, WarpedView, Window,
    WindowProtocol,
};

fn taipei() -> BoundingBox {
    BoundingBox::new(121.5, 25.0, 121.6, 25.1)
}

fn utm_raster() -> MemoryRaster {
    MemoryRaster::filled(
        1000,
        1500,
        1,
        GeoTransform::north_up(340_000.0, 2_790_000.0, 20.0, 20.0),
        Some(32651),
        1.0,
    )
}

fn bench_transform_bounds(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_bounds");
    for epsg in [4326, 32651, 3857] {
        group.bench_with_input(BenchmarkId::new("epsg", epsg), &epsg, |b, &epsg| {
            b.iter(|| transform_bounds(4326, black_box(epsg), black_box(&taipei())));
        });
    }
    group.finish();
}

fn bench_resolve_window(c: &mut Criterion) {
    let raster = utm_raster();
    let bbox = taipei();

    let mut group = c.benchmark_group("resolve_window");
    group.bench_function("direct", |b| {
        b.iter(|| WindowProtocol::Direct.resolve_window(black_box(&raster), black_box(&bbox)));
    });

    let view = WarpedView::new(&raster, 32651).expect("warped view");
    let reprojecting = WindowProtocol::Reprojecting { dst_crs: 32651 };
    group.bench_function("reprojecting", |b| {
        b.iter(|| reprojecting.resolve_window(black_box(&view), black_box(&bbox)));
    });
    group.finish();
}

fn bench_warped_read(c: &mut Criterion) {
    let raster = utm_raster();
    let view = WarpedView::new(&raster, 32651).expect("warped view");

    let mut group = c.benchmark_group("warped_read");
    for size in [64usize, 256] {
        group.bench_with_input(BenchmarkId::new("window", size), &size, |b, &size| {
            b.iter(|| view.read_window(black_box(&Window::new(100, 100, size, size))));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_transform_bounds, bench_resolve_window, bench_warped_read);
criterion_main!(benches);
