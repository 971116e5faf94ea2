use crate::dataset::Sample;
use burn::{
    data::dataloader::{batcher::Batcher, Dataset},
    prelude::*,
};
use image::{imageops::flip_horizontal_in_place, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use rand::{thread_rng, Rng};
use std::sync::Arc;

const ROTATION_DEGREES: f32 = 20.;
const SHIFT: f32 = 0.2;
const ZOOM: f32 = 0.2;
const BRIGHTNESS: (f32, f32) = (0.8, 1.2);

#[derive(Debug, Clone)]
pub(crate) struct ImageData {
    /// `[3, size, size]`, channel-major, in [0, 1]
    data: Vec<f32>,
    size: usize,
    label: usize,
}

/// A view of some samples; training views are augmented on every access.
pub(crate) struct ImageDataSet {
    samples: Arc<Vec<Sample>>,
    indices: Vec<usize>,
    augment: bool,
}

impl ImageDataSet {
    pub(crate) fn train(samples: Arc<Vec<Sample>>, indices: Vec<usize>) -> Self {
        Self {
            samples,
            indices,
            augment: true,
        }
    }

    pub(crate) fn eval(samples: Arc<Vec<Sample>>, indices: Vec<usize>) -> Self {
        Self {
            samples,
            indices,
            augment: false,
        }
    }

    pub(crate) fn targets(&self) -> Vec<usize> {
        self.indices.iter().map(|&i| self.samples[i].label).collect()
    }
}

impl Dataset<ImageData> for ImageDataSet {
    fn get(&self, index: usize) -> Option<ImageData> {
        let sample = &self.samples[*self.indices.get(index)?];
        let data = if self.augment {
            to_chw(&augment(&sample.image, &mut thread_rng()))
        } else {
            to_chw(&sample.image)
        };
        Some(ImageData {
            data,
            size: sample.image.width() as usize,
            label: sample.label,
        })
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

#[derive(Clone)]
pub(crate) struct ImageBatcher<B: Backend> {
    device: B::Device,
}

#[derive(Debug, Clone)]
pub(crate) struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatcher<B> {
    pub(crate) fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<ImageData, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageData>) -> ImageBatch<B> {
        let targets = items.iter().map(|item| item.label as i64).collect::<Vec<_>>();
        let images = items
            .into_iter()
            .map(|item| {
                let shape = [1, 3, item.size, item.size];
                Tensor::<B, 4>::from_data(TensorData::new(item.data, shape), &self.device)
            })
            .collect::<Vec<_>>();

        let images = Tensor::cat(images, 0);
        let n = targets.len();
        let targets = Tensor::from_data(TensorData::new(targets, [n]), &self.device);

        ImageBatch { images, targets }
    }
}

pub(crate) fn to_chw(img: &RgbImage) -> Vec<f32> {
    let plane = (img.width() * img.height()) as usize;
    let mut data = vec![0.; 3 * plane];
    for (i, p) in img.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = p[c] as f32 / 255.;
        }
    }
    data
}

/// Random rotation, shift, zoom, horizontal flip and brightness scaling.
/// Uncovered areas are filled with white, like the padding of the
/// prepared images.
pub(crate) fn augment(img: &RgbImage, rng: &mut impl Rng) -> RgbImage {
    let (w, h) = (img.width() as f32, img.height() as f32);
    let theta = rng
        .gen_range(-ROTATION_DEGREES..=ROTATION_DEGREES)
        .to_radians();
    let zoom = rng.gen_range(1. - ZOOM..=1. + ZOOM);
    let dx = rng.gen_range(-SHIFT..=SHIFT) * w;
    let dy = rng.gen_range(-SHIFT..=SHIFT) * h;
    let projection = Projection::translate(w / 2. + dx, h / 2. + dy)
        * Projection::rotate(theta)
        * Projection::scale(zoom, zoom)
        * Projection::translate(-w / 2., -h / 2.);
    let mut out = warp(img, &projection, Interpolation::Bilinear, Rgb([255, 255, 255]));
    if rng.gen_bool(0.5) {
        flip_horizontal_in_place(&mut out);
    }
    let factor = rng.gen_range(BRIGHTNESS.0..=BRIGHTNESS.1);
    for p in out.pixels_mut() {
        for c in p.0.iter_mut() {
            *c = (*c as f32 * factor).clamp(0., 255.) as u8;
        }
    }
    out
}
