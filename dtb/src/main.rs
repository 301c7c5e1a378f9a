//! Command line interface to the dataset and model utilities: converts labeled images
//! to TFRecord files, inspects them and visualizes colorspaces and trained kernels.

use dtb::{array_to_image, channel_to_image, image_to_array};
use env_logger::Builder;
use image::io::Reader as ImageReader;
use inputs::{
    colorspace::{rgb2yuv, yuv2rgb},
    tfrecord::{convert_split, TfRecordReader},
    Dataset, ImageRecord, InputType,
};
use log::{info, warn};
use ml::{
    checkpoint::NpzWeightLoader,
    summaries::to_rgba_image,
    visualization::{grid_side, put_kernels_on_grid},
};
use ndarray::{s, Array1, Array4, Axis, Ix4};
use ndarray_npy::read_npy;
use quicli::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use structopt::StructOpt;

/// Converts a dataset stored as numpy arrays into a TFRecord file
#[derive(Debug, StructOpt)]
struct ConvertOpts {
    /// Images of shape (num_examples, rows, cols, depth), stored as uint8
    #[structopt(long = "images", parse(from_os_str))]
    images: PathBuf,
    /// Labels of shape (num_examples,), stored as int64
    #[structopt(long = "labels", parse(from_os_str))]
    labels: PathBuf,
    /// Split of the dataset, one of train, validation, test. Names the output file.
    #[structopt(long = "split", default_value = "train")]
    split: InputType,
    /// Directory the TFRecord file is written to
    #[structopt(long = "data-dir", default_value = ".", parse(from_os_str))]
    data_dir: PathBuf,
    /// Images are stored as float32 instead of uint8
    #[structopt(long = "float")]
    float: bool,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Prints the records of a TFRecord file
#[derive(Debug, StructOpt)]
struct InspectOpts {
    /// Path to the TFRecord file
    #[structopt(parse(from_os_str))]
    records: PathBuf,
    /// Number of records that are printed, all records are counted
    #[structopt(short = "n", long = "limit", default_value = "10")]
    limit: usize,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Converts an image to YUV and back
#[derive(Debug, StructOpt)]
struct YuvOpts {
    /// Path to the input image
    #[structopt(parse(from_os_str))]
    image: PathBuf,
    /// Output path, writes to /path/to/image-yuv.png if not available.
    /// The luma channel is saved next to it with the suffix "-luma".
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    output: Option<PathBuf>,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Renders a convolution kernel of a checkpoint as a grid image
#[derive(Debug, StructOpt)]
struct KernelsOpts {
    /// Checkpoint in the npz format
    #[structopt(parse(from_os_str))]
    weights: PathBuf,
    /// Name of the kernel variable, e.g. conv1/weights
    #[structopt(long = "name")]
    name: String,
    /// Black pixels around every kernel
    #[structopt(long = "pad", default_value = "1")]
    pad: usize,
    /// Output path, writes to <name>-grid.png if not available
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    output: Option<PathBuf>,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Prepare image datasets and look into trained models.
#[derive(Debug, StructOpt)]
#[structopt(name = "dtb")]
enum Dtb {
    #[structopt(
        name = "convert",
        about = "Converts images and labels stored as .npy files to a TFRecord file."
    )]
    Convert(ConvertOpts),
    #[structopt(name = "inspect", about = "Prints the records of a TFRecord file.")]
    Inspect(InspectOpts),
    #[structopt(
        name = "yuv",
        about = "Does a round trip of an image through the YUV colorspace."
    )]
    Yuv(YuvOpts),
    #[structopt(
        name = "kernels",
        about = "Puts the kernels of a convolution layer on a grid and saves it as image."
    )]
    Kernels(KernelsOpts),
}

/// Trait for the subcommands that dtb uses
trait DtbOpts {
    /// Performs the subcommand
    fn run(&self) -> CliResult;
    /// Returns the verbosity command
    fn get_verbosity(&self) -> &Verbosity;
    /// Sets up logging
    fn setup_env_logger(&self) -> CliResult {
        let mut builder = Builder::from_default_env();

        builder
            .filter(None, self.get_verbosity().log_level().to_level_filter())
            .init();

        Ok(())
    }
}

impl DtbOpts for ConvertOpts {
    fn run(&self) -> CliResult {
        let labels: Array1<i64> = read_npy(&self.labels)?;
        fs::create_dir_all(&self.data_dir)?;

        let path = if self.float {
            let images: Array4<f32> = read_npy(&self.images)?;
            convert_split(&Dataset::new(images, labels), self.split, &self.data_dir)?
        } else {
            let images: Array4<u8> = read_npy(&self.images)?;
            convert_split(&Dataset::new(images, labels), self.split, &self.data_dir)?
        };
        println!("{}", path.display());
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl DtbOpts for InspectOpts {
    fn run(&self) -> CliResult {
        let mut count = 0;
        for data in TfRecordReader::open(&self.records)? {
            let record = ImageRecord::decode(&data?)?;
            if count < self.limit {
                println!(
                    "{:>6}: label {:>4}, image {}x{}x{}, {} bytes",
                    count,
                    record.label,
                    record.height,
                    record.width,
                    record.depth,
                    record.image_raw.len()
                );
            }
            count += 1;
        }
        println!("{} records in {}", count, self.records.display());
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

/// /path/to/image.png -> /path/to/image-<suffix>.png
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}-{}.png", stem, suffix))
}

impl DtbOpts for YuvOpts {
    fn run(&self) -> CliResult {
        let img = ImageReader::open(&self.image)?.decode()?;
        let rgb = image_to_array(&img);

        let yuv = rgb2yuv(&rgb)?;
        let reconstructed = yuv2rgb(&yuv)?;
        let max_error = reconstructed
            .iter()
            .zip(rgb.iter())
            .fold(0.0f32, |m, (a, b)| m.max((a - b).abs()));
        info!("Maximum round trip error: {}", max_error);

        let output = self
            .output
            .clone()
            .unwrap_or_else(|| with_suffix(&self.image, "yuv"));
        array_to_image(&reconstructed)?.save(&output)?;
        channel_to_image(yuv.index_axis(Axis(2), 0)).save(with_suffix(&output, "luma"))?;
        info!("Saved reconstruction to {}", output.display());
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl DtbOpts for KernelsOpts {
    fn run(&self) -> CliResult {
        let mut loader = NpzWeightLoader::from_path(&self.weights)?;
        let kernel = loader.by_name(&self.name)?.into_dimensionality::<Ix4>()?;

        let num_kernels = kernel.len_of(Axis(3));
        let side = grid_side(num_kernels);
        if side * side != num_kernels {
            warn!(
                "Showing the first {} of {} kernels",
                side * side,
                num_kernels
            );
        }
        let grid = put_kernels_on_grid(&kernel.slice(s![.., .., .., ..side * side]), side, self.pad)?;

        let output = self
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}-grid.png", self.name.replace('/', "_"))));
        to_rgba_image(&grid, 0)?.save(&output)?;
        info!("Saved kernel grid to {}", output.display());
        Ok(())
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl DtbOpts for Dtb {
    fn run(&self) -> CliResult {
        match self {
            Dtb::Convert(c) => c.run(),
            Dtb::Inspect(c) => c.run(),
            Dtb::Yuv(c) => c.run(),
            Dtb::Kernels(c) => c.run(),
        }
    }

    fn get_verbosity(&self) -> &Verbosity {
        match self {
            Dtb::Convert(c) => c.get_verbosity(),
            Dtb::Inspect(c) => c.get_verbosity(),
            Dtb::Yuv(c) => c.get_verbosity(),
            Dtb::Kernels(c) => c.get_verbosity(),
        }
    }
}

fn main() -> CliResult {
    let args = Dtb::from_args();
    args.setup_env_logger()?;
    args.run()
}
