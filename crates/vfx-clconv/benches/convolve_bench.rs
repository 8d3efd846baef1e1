//! Benchmarks for vfx-clconv.
//!
//! Run with: `cargo bench -p vfx-clconv` (add `--features opencl` for GPU numbers)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use vfx_clconv::{
    ConvolutionEngine, ConvolutionMask, DeviceSelector, EngineConfig, HostContext, PixelLayout, ProgramSource,
    Raster, pack_rgb, reference,
};

fn test_image(width: u32, height: u32) -> Raster {
    let data = (0..width * height)
        .map(|i| pack_rgb((i % 256) as u8, (i / 7 % 256) as u8, (i / 13 % 256) as u8))
        .collect();
    Raster::from_pixels(data, width, height, PixelLayout::IntRgb).unwrap()
}

/// Benchmark the host reference convolution.
fn bench_reference(c: &mut Criterion) {
    let mut group = c.benchmark_group("reference");

    for size in [256u32, 512, 1024].iter() {
        let img = test_image(*size, *size);
        group.throughput(Throughput::Elements((*size * *size) as u64));

        for mask_size in [3u32, 5, 9] {
            let mask = ConvolutionMask::box_blur(mask_size);
            group.bench_with_input(BenchmarkId::new(format!("box_{}", mask_size), size), &img, |b, img| {
                b.iter(|| reference::convolve(black_box(img), &mask))
            });
        }
    }

    group.finish();
}

/// Benchmark full filter calls on the host device (upload, dispatch, readback).
fn bench_host_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_engine");

    let ctx = HostContext::new(&DeviceSelector::default()).unwrap();
    let engine = ConvolutionEngine::new(
        ctx,
        ConvolutionMask::gaussian(5, 1.5),
        &ProgramSource::embedded(),
        &EngineConfig::default(),
    )
    .unwrap();

    for size in [256u32, 1024].iter() {
        let img = test_image(*size, *size);
        let mut dst = engine.create_compatible_dest(&img);
        group.throughput(Throughput::Elements((*size * *size) as u64));

        group.bench_with_input(BenchmarkId::new("gaussian_5", size), &img, |b, img| {
            b.iter(|| engine.filter_into(black_box(img), &mut dst).unwrap())
        });
    }

    group.finish();
}

#[cfg(feature = "opencl")]
fn bench_opencl_engine(c: &mut Criterion) {
    use vfx_clconv::OpenClContext;

    let selector = DeviceSelector::default();
    if !OpenClContext::is_available(&selector) {
        return;
    }
    let mut group = c.benchmark_group("opencl_engine");
    let ctx = OpenClContext::new(&selector).unwrap();
    let engine = ConvolutionEngine::new(
        ctx,
        ConvolutionMask::gaussian(5, 1.5),
        &ProgramSource::embedded(),
        &EngineConfig::default(),
    )
    .unwrap();

    for size in [1024u32, 2048].iter() {
        let img = test_image(*size, *size);
        let mut dst = engine.create_compatible_dest(&img);
        group.throughput(Throughput::Elements((*size * *size) as u64));
        group.bench_with_input(BenchmarkId::new("gaussian_5", size), &img, |b, img| {
            b.iter(|| engine.filter_into(black_box(img), &mut dst).unwrap())
        });
    }

    group.finish();
}

#[cfg(not(feature = "opencl"))]
fn bench_opencl_engine(_c: &mut Criterion) {}

criterion_group!(benches, bench_reference, bench_host_engine, bench_opencl_engine);
criterion_main!(benches);
