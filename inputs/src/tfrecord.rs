//! Reading and writing image datasets in the TFRecord format.
//!
//! A TFRecord file is a sequence of records, each framed as
//!
//! ```text
//! u64 length (little endian)
//! u32 masked crc32c of the length bytes
//! [u8; length] data
//! u32 masked crc32c of the data
//! ```
//!
//! The data of an image record is an encoded tf.Example with the features
//! `height`, `width`, `depth`, `label` (int64) and `image_raw` (bytes).
use log::{debug, info};
use ndarray::{Array, Array1, Array3, Array4};
use prost::Message;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::errors::{InputError, InputResult};
use crate::input_type::InputType;
use crate::proto::{Example, Feature};

const MASK_DELTA: u32 = 0xa282_ead8;

fn masked_crc(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

pub struct TfRecordWriter<W: Write> {
    writer: W,
}

impl TfRecordWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> InputResult<Self> {
        Ok(TfRecordWriter::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> TfRecordWriter<W> {
    pub fn new(writer: W) -> Self {
        TfRecordWriter { writer }
    }

    pub fn write_record(&mut self, data: &[u8]) -> InputResult<()> {
        let length = (data.len() as u64).to_le_bytes();
        self.writer.write_all(&length)?;
        self.writer.write_all(&masked_crc(&length).to_le_bytes())?;
        self.writer.write_all(data)?;
        self.writer.write_all(&masked_crc(data).to_le_bytes())?;
        Ok(())
    }

    pub fn flush(&mut self) -> InputResult<()> {
        Ok(self.writer.flush()?)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Iterates over the records of a TFRecord stream, checking both checksums of every record.
pub struct TfRecordReader<R: Read> {
    reader: R,
}

impl TfRecordReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> InputResult<Self> {
        Ok(TfRecordReader::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> TfRecordReader<R> {
    pub fn new(reader: R) -> Self {
        TfRecordReader { reader }
    }

    /// Reads into buf until it is full or the stream ends, returns the number of bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> InputResult<usize> {
        let mut read = 0;
        while read < buf.len() {
            match self.reader.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(read)
    }

    fn read_exact_or_corrupt(&mut self, buf: &mut [u8], what: &str) -> InputResult<()> {
        if self.fill(buf)? != buf.len() {
            return Err(InputError::CorruptedRecordError(format!("truncated {}", what)));
        }
        Ok(())
    }

    fn read_crc(&mut self, what: &str) -> InputResult<u32> {
        let mut crc = [0u8; 4];
        self.read_exact_or_corrupt(&mut crc, what)?;
        Ok(u32::from_le_bytes(crc))
    }

    /// Returns the next record or None at the end of the stream.
    pub fn read_record(&mut self) -> InputResult<Option<Vec<u8>>> {
        let mut length = [0u8; 8];
        match self.fill(&mut length)? {
            0 => return Ok(None),
            8 => (),
            _ => {
                return Err(InputError::CorruptedRecordError(
                    "truncated length".to_string(),
                ))
            }
        }
        if self.read_crc("length checksum")? != masked_crc(&length) {
            return Err(InputError::CorruptedRecordError(
                "length checksum mismatch".to_string(),
            ));
        }

        let mut data = vec![0u8; u64::from_le_bytes(length) as usize];
        self.read_exact_or_corrupt(&mut data, "data")?;
        if self.read_crc("data checksum")? != masked_crc(&data) {
            return Err(InputError::CorruptedRecordError(
                "data checksum mismatch".to_string(),
            ));
        }
        Ok(Some(data))
    }
}

impl<R: Read> Iterator for TfRecordReader<R> {
    type Item = InputResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Element type of images that can be stored in a record, serialized little endian.
pub trait ImageElement: Copy {
    const SIZE: usize;

    fn write_le(&self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
}

impl ImageElement for u8 {
    const SIZE: usize = 1;

    fn write_le(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl ImageElement for f32 {
    const SIZE: usize = 4;

    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub height: i64,
    pub width: i64,
    pub depth: i64,
    pub label: i64,
    pub image_raw: Vec<u8>,
}

impl ImageRecord {
    /// Record of a single image of shape (height, width, depth).
    pub fn from_image<A: ImageElement>(image: &Array3<A>, label: i64) -> ImageRecord {
        let (height, width, depth) = image.dim();
        let mut image_raw = Vec::with_capacity(image.len() * A::SIZE);
        for px in image.iter() {
            px.write_le(&mut image_raw);
        }
        ImageRecord {
            height: height as i64,
            width: width as i64,
            depth: depth as i64,
            label,
            image_raw,
        }
    }

    pub fn to_example(&self) -> Example {
        Example::from_features(vec![
            ("height".to_string(), Feature::int64(self.height)),
            ("width".to_string(), Feature::int64(self.width)),
            ("depth".to_string(), Feature::int64(self.depth)),
            ("label".to_string(), Feature::int64(self.label)),
            ("image_raw".to_string(), Feature::bytes(self.image_raw.clone())),
        ])
    }

    pub fn from_example(example: &Example) -> InputResult<ImageRecord> {
        let int64 = |name: &str| {
            example
                .feature(name)
                .and_then(Feature::as_int64)
                .ok_or_else(|| InputError::MissingFeatureError(name.to_string()))
        };
        let image_raw = example
            .feature("image_raw")
            .and_then(Feature::as_bytes)
            .ok_or_else(|| InputError::MissingFeatureError("image_raw".to_string()))?
            .to_vec();

        Ok(ImageRecord {
            height: int64("height")?,
            width: int64("width")?,
            depth: int64("depth")?,
            label: int64("label")?,
            image_raw,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_example().encode_to_vec()
    }

    pub fn decode(bytes: &[u8]) -> InputResult<ImageRecord> {
        ImageRecord::from_example(&Example::decode(bytes)?)
    }

    /// Interprets the raw bytes as an image of shape (height, width, depth).
    pub fn image<A: ImageElement>(&self) -> InputResult<Array3<A>> {
        let size_error = || InputError::ImageSizeError {
            height: self.height,
            width: self.width,
            depth: self.depth,
            len: self.image_raw.len(),
        };
        if self.height < 0 || self.width < 0 || self.depth < 0 {
            return Err(size_error());
        }
        let shape = (
            self.height as usize,
            self.width as usize,
            self.depth as usize,
        );
        let num_bytes = [shape.1, shape.2, A::SIZE]
            .iter()
            .try_fold(shape.0, |acc, &d| acc.checked_mul(d));
        if num_bytes != Some(self.image_raw.len()) {
            return Err(size_error());
        }
        let values = self.image_raw.chunks_exact(A::SIZE).map(A::read_le).collect();
        Ok(Array::from_shape_vec(shape, values)?)
    }
}

/// Images of shape (num_examples, rows, cols, depth) with one label per image.
#[derive(Debug, Clone)]
pub struct Dataset<A> {
    pub images: Array4<A>,
    pub labels: Array1<i64>,
}

impl<A> Dataset<A> {
    pub fn new(images: Array4<A>, labels: Array1<i64>) -> Dataset<A> {
        Dataset { images, labels }
    }

    pub fn num_examples(&self) -> usize {
        self.labels.len()
    }
}

/// Writes the dataset to `<data_dir>/<name>.tfrecords`, one record per image.
/// Returns the path of the written file.
pub fn convert_to_tfrecords<A, P>(
    dataset: &Dataset<A>,
    name: &str,
    data_dir: P,
) -> InputResult<PathBuf>
where
    A: ImageElement,
    P: AsRef<Path>,
{
    let num_examples = dataset.num_examples();
    let num_images = dataset.images.len_of(ndarray::Axis(0));
    if num_images != num_examples {
        return Err(InputError::SizeMismatchError(num_images, num_examples));
    }

    let filename = data_dir.as_ref().join(format!("{}.tfrecords", name));
    info!("Writing {}", filename.display());
    let mut writer = TfRecordWriter::create(&filename)?;
    for (image, &label) in dataset.images.outer_iter().zip(dataset.labels.iter()) {
        let record = ImageRecord::from_image(&image.to_owned(), label);
        writer.write_record(&record.encode())?;
    }
    writer.flush()?;
    debug!("Wrote {} records to {}", num_examples, filename.display());
    Ok(filename)
}

/// Writes the dataset as the given split, see [`convert_to_tfrecords`].
pub fn convert_split<A, P>(
    dataset: &Dataset<A>,
    split: InputType,
    data_dir: P,
) -> InputResult<PathBuf>
where
    A: ImageElement,
    P: AsRef<Path>,
{
    convert_to_tfrecords(dataset, split.as_str(), data_dir)
}

/// Reads all image records of a TFRecord file.
pub fn read_tfrecords<P: AsRef<Path>>(path: P) -> InputResult<Vec<ImageRecord>> {
    TfRecordReader::open(path)?
        .map(|data| ImageRecord::decode(&data?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn dataset(n_images: usize, n_labels: usize) -> Dataset<u8> {
        let images =
            Array::from_shape_fn((n_images, 2, 3, 1), |(n, i, j, _)| (n * 6 + i * 3 + j) as u8);
        let labels = Array::from_shape_fn(n_labels, |i| i as i64 % 10);
        Dataset::new(images, labels)
    }

    #[test]
    fn test_masked_crc() {
        // crc32c check value
        assert_eq!(crc32c::crc32c(b"123456789"), 0xe306_9283);
        let crc = crc32c::crc32c(&[]);
        assert_eq!(masked_crc(&[]), crc.wrapping_add(MASK_DELTA));
    }

    #[test]
    fn test_record_framing() {
        let mut writer = TfRecordWriter::new(Vec::new());
        writer.write_record(b"abc").unwrap();
        writer.write_record(b"").unwrap();
        let bytes = writer.into_inner();

        assert_eq!(bytes.len(), 2 * 16 + 3);
        assert_eq!(&bytes[..8], &3u64.to_le_bytes());
        assert_eq!(&bytes[12..15], b"abc");

        let records: Vec<Vec<u8>> = TfRecordReader::new(Cursor::new(bytes))
            .collect::<InputResult<_>>()
            .unwrap();
        assert_eq!(records, vec![b"abc".to_vec(), vec![]]);
    }

    #[test]
    fn test_corrupted_record() {
        let mut writer = TfRecordWriter::new(Vec::new());
        writer.write_record(b"some data").unwrap();
        let bytes = writer.into_inner();

        let mut flipped = bytes.clone();
        flipped[13] ^= 0x01;
        let mut reader = TfRecordReader::new(Cursor::new(flipped));
        assert!(matches!(
            reader.read_record(),
            Err(InputError::CorruptedRecordError(_))
        ));

        let mut bad_length = bytes.clone();
        bad_length[0] = 4;
        let mut reader = TfRecordReader::new(Cursor::new(bad_length));
        assert!(matches!(
            reader.read_record(),
            Err(InputError::CorruptedRecordError(_))
        ));

        let truncated = bytes[..bytes.len() - 2].to_vec();
        let mut reader = TfRecordReader::new(Cursor::new(truncated));
        assert!(reader.read_record().is_err());
    }

    #[test]
    fn test_image_record() {
        let image = array![[[0.5f32], [1.0]], [[-1.0], [2.0]]];
        let record = ImageRecord::from_image(&image, 3);
        assert_eq!((record.height, record.width, record.depth), (2, 2, 1));
        assert_eq!(record.image_raw.len(), 16);

        let decoded = ImageRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.image::<f32>().unwrap(), image);
        assert!(matches!(
            decoded.image::<u8>(),
            Err(InputError::ImageSizeError { len: 16, .. })
        ));
    }

    #[test]
    fn test_image_size_overflow() {
        let record = ImageRecord {
            height: 1 << 32,
            width: 1 << 32,
            depth: 1,
            label: 0,
            image_raw: vec![],
        };
        let decoded = ImageRecord::decode(&record.encode()).unwrap();
        assert!(matches!(
            decoded.image::<u8>(),
            Err(InputError::ImageSizeError { len: 0, .. })
        ));

        let negative = ImageRecord {
            height: -1,
            ..record
        };
        assert!(negative.image::<f32>().is_err());
    }

    #[test]
    fn test_missing_feature() {
        let example = Example::from_features(vec![("label".to_string(), Feature::int64(1))]);
        assert!(matches!(
            ImageRecord::from_example(&example),
            Err(InputError::MissingFeatureError(_))
        ));
    }

    #[test]
    fn test_convert_and_read() {
        let dir = tempdir().unwrap();
        let data = dataset(5, 5);

        let path = convert_split(&data, InputType::Train, dir.path()).unwrap();
        assert_eq!(path, dir.path().join("train.tfrecords"));

        let records = read_tfrecords(&path).unwrap();
        assert_eq!(records.len(), 5);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.label, data.labels[i]);
            assert_eq!((record.height, record.width, record.depth), (2, 3, 1));
            let image = record.image::<u8>().unwrap();
            assert_eq!(image, data.images.index_axis(ndarray::Axis(0), i));
        }
    }

    #[test]
    fn test_size_mismatch_writes_nothing() {
        let dir = tempdir().unwrap();
        let data = dataset(10, 9);

        let result = convert_to_tfrecords(&data, "validation", dir.path());
        match result {
            Err(e @ InputError::SizeMismatchError(10, 9)) => assert_eq!(
                e.to_string(),
                "Images size 10 does not match label size 9."
            ),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!dir.path().join("validation.tfrecords").exists());
    }
}
