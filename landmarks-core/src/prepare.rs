use crate::error::{self, LandmarkError};
use crate::utils::create_dir;
use burn::config::Config;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, Rgb, RgbImage};
use std::{
    fmt,
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

pub const PROCESSED_SUFFIX: &str = "_processed";

pub const DEFAULT_FOLDERS: [&str; 15] = [
    "brandenburg_gate",
    "museum_island",
    "berlin_cathedral",
    "east_side_gallery",
    "checkpoint_charlie",
    "gendarmenmarkt",
    "charlottenburg_palace",
    "tempelhofer_feld",
    "tiergarten_park",
    "potsdamer_platz",
    "victory_column",
    "berlin_zoo",
    "hackescher_markt",
    "prenzlauer_berg",
    "olympic_stadium",
];

const EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Config, Debug)]
pub struct PrepareConfig {
    /// Directory holding the landmark folders
    root: PathBuf,
    /// Landmark folder names under `root`
    folders: Vec<String>,
    #[config(default = 224)]
    size: u32,
    #[config(default = 85)]
    quality: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderReport {
    Missing { name: String },
    Done {
        name: String,
        found: usize,
        processed: usize,
    },
}

impl FolderReport {
    pub fn processed(&self) -> usize {
        match self {
            Self::Missing { .. } => 0,
            Self::Done { processed, .. } => *processed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrepareReport {
    pub folders: Vec<FolderReport>,
}

impl PrepareReport {
    pub fn total(&self) -> usize {
        self.folders.iter().map(FolderReport::processed).sum()
    }
}

impl fmt::Display for PrepareReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for folder in &self.folders {
            match folder {
                FolderReport::Missing { name } => writeln!(f, "{name}\tnot found")?,
                FolderReport::Done {
                    name,
                    found,
                    processed,
                } => writeln!(f, "{name}\t{processed}/{found}")?,
            }
        }
        write!(f, "Total images processed: {}", self.total())
    }
}

pub fn prepare(config: &PrepareConfig) -> error::Result<PrepareReport> {
    let mut report = PrepareReport::default();
    for name in &config.folders {
        let folder = config.root.join(name);
        if !folder.is_dir() {
            log::warn!("folder {} not found", folder.display());
            report.folders.push(FolderReport::Missing { name: name.clone() });
            continue;
        }
        report.folders.push(prepare_folder(config, name, &folder)?);
    }
    Ok(report)
}

fn prepare_folder(config: &PrepareConfig, name: &str, folder: &Path) -> error::Result<FolderReport> {
    log::info!("processing {}", folder.display());
    let output = config.root.join(format!("{name}{PROCESSED_SUFFIX}"));
    create_dir(&output)?;

    let images = source_images(folder)?;
    if images.is_empty() {
        log::warn!("no images found in {}", folder.display());
    }
    let mut processed = 0;
    for path in &images {
        let Some(stem) = path.file_stem() else {
            continue;
        };
        let target = output.join(stem).with_extension("jpg");
        match resize_into(path, &target, config.size, config.quality) {
            Ok(()) => processed += 1,
            Err(e) => log::error!("skipping {}: {e}", path.display()),
        }
    }
    log::info!("{name}: processed {processed}/{} images", images.len());
    Ok(FolderReport::Done {
        name: name.to_string(),
        found: images.len(),
        processed,
    })
}

/// Files in `folder` whose extension is one of [`EXTENSIONS`], ignoring case.
fn source_images(folder: &Path) -> error::Result<Vec<PathBuf>> {
    let mut res = vec![];
    for entry in std::fs::read_dir(folder).map_err(LandmarkError::io(folder))? {
        let path = entry.map_err(LandmarkError::io(folder))?.path();
        let accepted = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if accepted && path.is_file() {
            res.push(path);
        }
    }
    res.sort();
    Ok(res)
}

fn resize_into(source: &Path, target: &Path, size: u32, quality: u8) -> error::Result<()> {
    let img = image::open(source).map_err(LandmarkError::image(source))?;
    let canvas = pad_to_square(img, size);
    let file = File::create(target).map_err(LandmarkError::io(target))?;
    JpegEncoder::new_with_quality(BufWriter::new(file), quality)
        .encode_image(&canvas)
        .map_err(LandmarkError::image(target))
}

/// Shrinks `img` to fit in a `size`×`size` square, keeping its aspect ratio,
/// and centres it on a white canvas. Smaller images are padded, not enlarged.
pub fn pad_to_square(img: DynamicImage, size: u32) -> RgbImage {
    let img = if img.width() > size || img.height() > size {
        img.resize(size, size, FilterType::Lanczos3)
    } else {
        img
    };
    let img = img.to_rgb8();
    let mut background = RgbImage::from_pixel(size, size, Rgb([255, 255, 255]));
    image::imageops::overlay(
        &mut background,
        &img,
        ((size - img.width()) / 2) as i64,
        ((size - img.height()) / 2) as i64,
    );
    background
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_image_is_padded_vertically() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(448, 224, Rgb([0, 0, 0])));
        let out = pad_to_square(img, 224);
        assert_eq!(out.dimensions(), (224, 224));
        assert_eq!(out.get_pixel(112, 0), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(112, 112), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(112, 223), &Rgb([255, 255, 255]));
    }

    #[test]
    fn small_image_is_not_enlarged() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 20, Rgb([0, 0, 0])));
        let out = pad_to_square(img, 224);
        assert_eq!(out.dimensions(), (224, 224));
        assert_eq!(out.get_pixel(112, 112), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(100, 112), &Rgb([255, 255, 255]));
    }

    #[test]
    fn extensions_ignore_case() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.JPG", "b.png", "c.txt", "d.Bmp"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let names = source_images(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, ["a.JPG", "b.png", "d.Bmp"]);
    }
}
