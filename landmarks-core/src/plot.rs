use crate::{
    error::{LandmarkError, Result},
    utils::{json_from, json_into},
};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut},
    rect::Rect,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

const PANEL: (u32, u32) = (600, 400);
const MARGIN: u32 = 40;
const TRAIN: Rgb<u8> = Rgb([31, 119, 180]);
const VALID: Rgb<u8> = Rgb([255, 127, 14]);
const AXIS: Rgb<u8> = Rgb([60, 60, 60]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
    pub learning_rate: f64,
}

/// Per-epoch metrics of a deep training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn save(&self, path: &Path) -> Result<()> {
        json_into(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        json_from(path)
    }

    /// Two side-by-side panels: accuracy on the left, loss on the right.
    /// Training curves are blue, validation curves orange.
    pub fn render(&self) -> RgbImage {
        let mut canvas = RgbImage::from_pixel(PANEL.0 * 2, PANEL.1, Rgb([255, 255, 255]));
        let accuracy = |r: &EpochRecord| (r.train_accuracy, r.valid_accuracy);
        let loss = |r: &EpochRecord| (r.train_loss, r.valid_loss);
        self.panel(&mut canvas, 0, accuracy);
        self.panel(&mut canvas, PANEL.0, loss);
        canvas
    }

    pub fn plot(&self, path: &Path) -> Result<()> {
        self.render().save(path).map_err(LandmarkError::image(path))
    }

    fn panel(&self, canvas: &mut RgbImage, x0: u32, series: impl Fn(&EpochRecord) -> (f64, f64)) {
        let (w, h) = (PANEL.0 - 2 * MARGIN, PANEL.1 - 2 * MARGIN);
        let (left, top) = ((x0 + MARGIN) as f32, MARGIN as f32);
        for i in 1..4 {
            let y = top + h as f32 * i as f32 / 4.;
            draw_line_segment_mut(canvas, (left, y), (left + w as f32, y), GRID);
        }
        draw_hollow_rect_mut(canvas, Rect::at(left as i32, top as i32).of_size(w, h), AXIS);

        let points = self.epochs.iter().map(&series).collect::<Vec<_>>();
        if points.is_empty() {
            return;
        }
        let max = points
            .iter()
            .flat_map(|&(t, v)| [t, v])
            .filter(|v| v.is_finite())
            .fold(0., f64::max);
        let max = if max > 0. { max } else { 1. };
        let step = if points.len() > 1 {
            w as f32 / (points.len() - 1) as f32
        } else {
            0.
        };
        let at = |i: usize, v: f64| {
            let v = if v.is_finite() { v.clamp(0., max) } else { max };
            (left + step * i as f32, top + h as f32 * (1. - (v / max) as f32))
        };

        for (pick, color) in [(0, TRAIN), (1, VALID)] {
            let value = |p: &(f64, f64)| if pick == 0 { p.0 } else { p.1 };
            for (i, pair) in points.windows(2).enumerate() {
                draw_line_segment_mut(canvas, at(i, value(&pair[0])), at(i + 1, value(&pair[1])), color);
            }
            for (i, p) in points.iter().enumerate() {
                let (x, y) = at(i, value(p));
                draw_filled_circle_mut(canvas, (x as i32, y as i32), 3, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> TrainingHistory {
        TrainingHistory {
            epochs: (1..=4)
                .map(|epoch| EpochRecord {
                    epoch,
                    train_loss: 2. / epoch as f64,
                    train_accuracy: 0.2 * epoch as f64,
                    valid_loss: 2.5 / epoch as f64,
                    valid_accuracy: 0.15 * epoch as f64,
                    learning_rate: 1e-3,
                })
                .collect(),
        }
    }

    #[test]
    fn curves_are_drawn_in_both_colours() {
        let img = history().render();
        assert_eq!(img.dimensions(), (PANEL.0 * 2, PANEL.1));
        assert!(img.pixels().any(|p| *p == TRAIN));
        assert!(img.pixels().any(|p| *p == VALID));
    }

    #[test]
    fn empty_history_still_renders() {
        let img = TrainingHistory::default().render();
        assert!(!img.pixels().any(|p| *p == TRAIN));
    }

    #[test]
    fn json_and_png_written() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("history.json");
        let png = dir.path().join("history.png");
        history().save(&json).unwrap();
        history().plot(&png).unwrap();
        assert_eq!(TrainingHistory::load(&json).unwrap(), history());
        assert!(png.exists());
    }

    #[test]
    fn floats_reload_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("history.json");
        let record = EpochRecord {
            epoch: 7,
            train_loss: 0.1 + 0.2,
            train_accuracy: 2. / 3.,
            valid_loss: std::f64::consts::PI * 1e-5,
            valid_accuracy: 0.15 * 3.,
            learning_rate: 1e-3 * 0.5f64.powi(13),
        };
        let history = TrainingHistory {
            epochs: vec![record],
        };
        history.save(&json).unwrap();
        let loaded = TrainingHistory::load(&json).unwrap();
        let bits = |r: &EpochRecord| {
            [r.train_loss, r.train_accuracy, r.valid_loss, r.valid_accuracy, r.learning_rate].map(f64::to_bits)
        };
        assert_eq!(bits(&loaded.epochs[0]), bits(&history.epochs[0]));
    }
}
