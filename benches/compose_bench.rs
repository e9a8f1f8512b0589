use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Rgba, RgbaImage};

use deepzoom_capture::capture::CaptureStage;
use deepzoom_capture::rendering::{compose, encode, Background, ImageFormat};
use deepzoom_capture::Surface;

fn surface(width: u32, height: u32) -> Surface {
    Surface::new(RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    }))
}

fn bench_compose(c: &mut Criterion) {
    let source = surface(800, 600);
    let overlays = vec![RgbaImage::from_pixel(800, 600, Rgba([0, 0, 0, 64]))];

    let mut group = c.benchmark_group("compose");
    for scale in [1.0, 2.0] {
        group.bench_with_input(BenchmarkId::from_parameter(scale), &scale, |b, &scale| {
            b.iter(|| {
                let stage = CaptureStage::new(source.clone(), &overlays, scale);
                compose(&stage, Background::Transparent).unwrap()
            })
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let image = surface(800, 600).pixels().clone();

    c.bench_function("encode_png_800x600", |b| {
        b.iter(|| encode(&image, ImageFormat::Png, 0.9).unwrap())
    });

    if cfg!(feature = "jpeg") {
        c.bench_function("encode_jpeg_800x600", |b| {
            b.iter(|| encode(&image, ImageFormat::Jpeg, 0.9).unwrap())
        });
    }
}

criterion_group!(benches, bench_compose, bench_encode);
criterion_main!(benches);
