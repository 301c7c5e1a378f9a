//! Summaries collected while building a model: kernel grids, weight histograms and
//! scalar values. They are registered in the named collections of the
//! [`ModelContext`](crate::context::ModelContext) and can be written to a directory.
use std::fs;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use log::info;
use ndarray::{s, Array4, ArrayBase, Data, Dimension};
use serde_derive::Serialize;

use crate::errors::{ModelError, ModelResult};
use crate::WeightPrecision;

/// Number of buckets of a histogram summary.
const HISTOGRAM_BUCKETS: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub num: usize,
    pub sum: f64,
    pub sum_squares: f64,
    /// Upper edge of each bucket.
    pub bucket_limits: Vec<f64>,
    pub bucket_counts: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Summary {
    /// Image in (batch, height, width, channels) layout. Channels are 1 (grayscale),
    /// 3 (rgb) or 4 (rgba).
    Image { name: String, image: Array4<u8> },
    Histogram { name: String, histogram: Histogram },
    Scalar { name: String, value: f64 },
}

impl Summary {
    pub fn image(name: &str, image: Array4<u8>) -> Self {
        Summary::Image {
            name: name.to_string(),
            image,
        }
    }

    pub fn histogram<S, D>(name: &str, values: &ArrayBase<S, D>) -> Self
    where
        S: Data<Elem = WeightPrecision>,
        D: Dimension,
    {
        Summary::Histogram {
            name: name.to_string(),
            histogram: Histogram::new(values),
        }
    }

    pub fn scalar(name: &str, value: f64) -> Self {
        Summary::Scalar {
            name: name.to_string(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Summary::Image { name, .. } => name,
            Summary::Histogram { name, .. } => name,
            Summary::Scalar { name, .. } => name,
        }
    }
}

impl Histogram {
    pub fn new<S, D>(values: &ArrayBase<S, D>) -> Self
    where
        S: Data<Elem = WeightPrecision>,
        D: Dimension,
    {
        let num = values.len();
        if num == 0 {
            return Histogram {
                min: 0.0,
                max: 0.0,
                num,
                sum: 0.0,
                sum_squares: 0.0,
                bucket_limits: Vec::new(),
                bucket_counts: Vec::new(),
            };
        }

        let min = values.fold(f64::INFINITY, |m, &x| m.min(x as f64));
        let max = values.fold(f64::NEG_INFINITY, |m, &x| m.max(x as f64));
        let sum = values.fold(0.0, |acc, &x| acc + x as f64);
        let sum_squares = values.fold(0.0, |acc, &x| acc + (x as f64).powi(2));

        let width = (max - min) / HISTOGRAM_BUCKETS as f64;
        let mut bucket_counts = vec![0; HISTOGRAM_BUCKETS];
        for &x in values.iter() {
            let idx = if width > 0.0 {
                (((x as f64) - min) / width) as usize
            } else {
                0
            };
            bucket_counts[idx.min(HISTOGRAM_BUCKETS - 1)] += 1;
        }
        let bucket_limits = (1..=HISTOGRAM_BUCKETS)
            .map(|i| min + width * i as f64)
            .collect();

        Histogram {
            min,
            max,
            num,
            sum,
            sum_squares,
            bucket_limits,
            bucket_counts,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum SummaryRecord<'a> {
    Histogram {
        name: &'a str,
        #[serde(flatten)]
        histogram: &'a Histogram,
    },
    Scalar {
        name: &'a str,
        value: f64,
    },
    Image {
        name: &'a str,
        files: Vec<String>,
    },
}

/// Summary names are scoped with "/", which we turn into file name friendly strings.
fn file_stem(name: &str) -> String {
    name.replace('/', "_")
}

/// Converts the i-th image of a summary into an RGBA image.
pub fn to_rgba_image(image: &Array4<u8>, index: usize) -> ModelResult<RgbaImage> {
    let (_, height, width, channels) = image.dim();
    let img = image.slice(s![index, .., .., ..]);
    let mut raw = Vec::with_capacity(height * width * 4);
    for row in 0..height {
        for col in 0..width {
            let px = img.slice(s![row, col, ..]);
            match channels {
                1 => raw.extend_from_slice(&[px[0], px[0], px[0], 255]),
                3 => raw.extend_from_slice(&[px[0], px[1], px[2], 255]),
                4 => raw.extend_from_slice(&[px[0], px[1], px[2], px[3]]),
                c => {
                    return Err(ModelError::InvalidShapeError(format!(
                        "image summaries need 1, 3 or 4 channels, got {}",
                        c
                    )))
                }
            }
        }
    }
    RgbaImage::from_raw(width as u32, height as u32, raw).ok_or_else(|| {
        ModelError::InvalidShapeError("image buffer does not match its dimensions".to_string())
    })
}

/// Writes the summaries into `dir`: every image of an image summary becomes a PNG file,
/// everything else (and an index of the images) goes into `summaries.json`.
/// Returns the path of the JSON file.
pub fn write_summaries<P: AsRef<Path>>(summaries: &[Summary], dir: P) -> ModelResult<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let mut records = Vec::with_capacity(summaries.len());
    for summary in summaries {
        match summary {
            Summary::Image { name, image } => {
                let mut files = Vec::new();
                for i in 0..image.len_of(ndarray::Axis(0)) {
                    let filename = format!("{}_{}.png", file_stem(name), i);
                    to_rgba_image(image, i)?.save(dir.join(&filename))?;
                    files.push(filename);
                }
                records.push(SummaryRecord::Image { name, files });
            }
            Summary::Histogram { name, histogram } => {
                records.push(SummaryRecord::Histogram { name, histogram })
            }
            Summary::Scalar { name, value } => records.push(SummaryRecord::Scalar {
                name,
                value: *value,
            }),
        }
    }

    let path = dir.join("summaries.json");
    fs::write(&path, serde_json::to_string_pretty(&records)?)?;
    info!("Wrote {} summaries to {}", summaries.len(), dir.display());
    Ok(path)
}
