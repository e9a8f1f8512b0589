use std::fs;
use std::path::PathBuf;

use image::{Rgba, RgbaImage};
use sha2::{Digest, Sha256};

use deepzoom_capture::capture::CaptureStage;
use deepzoom_capture::rendering::{compose, encode, Background, ImageFormat};
use deepzoom_capture::Surface;

fn golden_path(name: &str) -> PathBuf {
    let mut p = PathBuf::from("tests/goldens/expected");
    p.push(name);
    p
}

/// Surface with scattered translucent pixels, plus two opaque marker layers
/// where the second partly covers the first.
fn fixture() -> (Surface, Vec<RgbaImage>) {
    let surface = RgbaImage::from_fn(160, 120, |x, y| {
        let alpha = if (x + y) % 7 == 0 { 100 } else { 255 };
        Rgba([(x * 3 % 256) as u8, (y * 2 % 256) as u8, ((x ^ y) % 256) as u8, alpha])
    });

    let mut markers = RgbaImage::new(160, 120);
    for (x, y, p) in markers.enumerate_pixels_mut() {
        if (40..120).contains(&x) && (30..90).contains(&y) {
            *p = if x < 80 { Rgba([255, 0, 0, 255]) } else { Rgba([0, 0, 255, 255]) };
        }
    }
    let mut highlight = RgbaImage::new(160, 120);
    for (x, y, p) in highlight.enumerate_pixels_mut() {
        if (60..100).contains(&x) && (50..70).contains(&y) {
            *p = Rgba([0, 255, 0, 255]);
        }
    }

    (Surface::new(surface), vec![markers, highlight])
}

fn composite(scale: f64) -> RgbaImage {
    let (surface, overlays) = fixture();
    let stage = CaptureStage::new(surface, &overlays, scale);
    compose(&stage, Background::OpaqueBlack).expect("compose").image
}

#[test]
fn scaled_png_is_deterministic() {
    let digest = |img: &RgbaImage| {
        let blob = encode(img, ImageFormat::Png, 0.9).expect("encode");
        hex::encode(Sha256::digest(blob.as_bytes()))
    };
    assert_eq!(digest(&composite(1.5)), digest(&composite(1.5)));
}

#[test]
fn png_preserves_the_composite() {
    let image = composite(1.0);
    let blob = encode(&image, ImageFormat::Png, 0.9).expect("encode");
    let decoded = image::load_from_memory(blob.as_bytes()).expect("decode").to_rgba8();
    assert_eq!(decoded, image);
}

#[test]
fn golden_composite_matches_fixture() {
    let image = composite(1.0);
    assert_eq!(image.dimensions(), (160, 120));
    let digest = hex::encode(Sha256::digest(image.as_raw()));

    let expected_path = golden_path("composite.sha256");
    if std::env::var("UPDATE_GOLDENS").is_ok() {
        fs::create_dir_all("tests/goldens/expected").ok();
        fs::write(&expected_path, &digest).expect("write golden");
        println!("Updated golden: {:?}", expected_path);
        return;
    }

    let expected = fs::read_to_string(&expected_path).expect("unable to read golden");
    assert_eq!(digest, expected.trim());
}
