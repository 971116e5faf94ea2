#![allow(dead_code)]

use image::{Rgb, RgbImage};
use std::path::Path;

/// Writes `count` noisy photos of a single dominant colour into `root/name`.
pub fn raw_folder(root: &Path, name: &str, colour: [u8; 3], count: usize) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        let (w, h) = (48 + 4 * i as u32, 36);
        let img = RgbImage::from_fn(w, h, |x, y| {
            let jitter = ((x * 7 + y * 13 + i as u32 * 5) % 21) as i16 - 10;
            Rgb(colour.map(|c| (c as i16 + jitter).clamp(0, 255) as u8))
        });
        img.save(dir.join(format!("photo_{i:02}.png"))).unwrap();
    }
}

/// Same as [`raw_folder`] but already square and named like a processed folder.
pub fn processed_folder(root: &Path, name: &str, colour: [u8; 3], count: usize, size: u32) {
    let dir = root.join(format!("{name}_processed"));
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        let img = RgbImage::from_fn(size, size, |x, y| {
            let jitter = ((x * 3 + y * 11 + i as u32 * 7) % 31) as i16 - 15;
            Rgb(colour.map(|c| (c as i16 + jitter).clamp(0, 255) as u8))
        });
        img.save(dir.join(format!("{i:02}.jpg"))).unwrap();
    }
}
