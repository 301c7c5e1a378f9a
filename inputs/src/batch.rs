//! Queued batching of labeled images.
//!
//! Worker threads pull examples from the source, preprocess them and push them into a
//! bounded queue. The consumer assembles batches from the queue, either in arrival order
//! or by drawing random examples from a buffer of at least `min_queue_examples` elements.
use log::debug;
use ndarray::{stack, Array1, Array3, Array4, ArrayView3, Axis};
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::errors::{InputError, InputResult};

/// Number of threads that fill the queue.
pub const NUM_PREPROCESS_THREADS: usize = 16;

/// An image of shape (height, width, depth) and its label.
pub type LabeledImage = (Array3<f32>, i64);

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Minimum number of examples retained in the queue that provides batches.
    pub min_queue_examples: usize,
    pub shuffle: bool,
    pub num_threads: usize,
    pub seed: Option<u64>,
}

impl BatchConfig {
    pub fn new(batch_size: usize, min_queue_examples: usize, shuffle: bool) -> BatchConfig {
        BatchConfig {
            batch_size,
            min_queue_examples,
            shuffle,
            num_threads: NUM_PREPROCESS_THREADS,
            seed: None,
        }
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> BatchConfig {
        self.num_threads = num_threads;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> BatchConfig {
        self.seed = Some(seed);
        self
    }

    pub fn capacity(&self) -> usize {
        self.min_queue_examples + 3 * self.batch_size
    }
}

/// Iterator over batches of shape (batch_size, height, width, depth) with their labels.
///
/// Only full batches are returned, remaining examples at the end of the source are dropped.
/// Without shuffling the examples keep the order of the source when a single thread is used.
pub struct BatchQueue {
    receiver: Option<Receiver<LabeledImage>>,
    buffer: Vec<LabeledImage>,
    exhausted: bool,
    config: BatchConfig,
    rng: StdRng,
    workers: Vec<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl BatchQueue {
    pub fn new<I>(examples: I, config: BatchConfig) -> InputResult<BatchQueue>
    where
        I: IntoIterator<Item = LabeledImage>,
        I::IntoIter: Send + 'static,
    {
        BatchQueue::with_preprocessing(examples, config, |image| image)
    }

    /// Applies `preprocess` to every image on the worker threads before it is queued.
    pub fn with_preprocessing<I, F>(
        examples: I,
        config: BatchConfig,
        preprocess: F,
    ) -> InputResult<BatchQueue>
    where
        I: IntoIterator<Item = LabeledImage>,
        I::IntoIter: Send + 'static,
        F: Fn(Array3<f32>) -> Array3<f32> + Send + Sync + 'static,
    {
        if config.batch_size == 0 {
            return Err(InputError::BatchSizeError);
        }
        debug!(
            "Filling queue with {} images before starting to train.",
            config.min_queue_examples
        );

        let (sender, receiver) = mpsc::sync_channel(config.capacity());
        let source = Arc::new(Mutex::new(examples.into_iter()));
        let preprocess = Arc::new(preprocess);
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = (0..config.num_threads.max(1))
            .map(|_| {
                let source = Arc::clone(&source);
                let preprocess = Arc::clone(&preprocess);
                let shutdown = Arc::clone(&shutdown);
                let sender = sender.clone();
                thread::spawn(move || {
                    while !shutdown.load(Ordering::Relaxed) {
                        let next = match source.lock() {
                            Ok(mut source) => source.next(),
                            Err(_) => break,
                        };
                        let (image, label) = match next {
                            Some(example) => example,
                            None => break,
                        };
                        if sender.send((preprocess(image), label)).is_err() {
                            break; // Receiver has been dropped
                        }
                    }
                })
            })
            .collect();

        // The queue is closed once all workers have dropped their senders.
        drop(sender);

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(BatchQueue {
            receiver: Some(receiver),
            buffer: Vec::with_capacity(config.min_queue_examples + 1),
            exhausted: false,
            config,
            rng,
            workers,
            shutdown,
        })
    }

    fn receive(&mut self) -> Option<LabeledImage> {
        let example = self.receiver.as_ref().and_then(|r| r.recv().ok());
        if example.is_none() {
            self.exhausted = true;
        }
        example
    }

    fn dequeue(&mut self) -> Option<LabeledImage> {
        if !self.config.shuffle {
            return self.receive();
        }
        // Keep at least min_queue_examples in the buffer after taking one out,
        // until the source runs dry.
        while !self.exhausted && self.buffer.len() <= self.config.min_queue_examples {
            match self.receive() {
                Some(example) => self.buffer.push(example),
                None => break,
            }
        }
        if self.buffer.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.buffer.len());
        Some(self.buffer.swap_remove(index))
    }
}

impl Iterator for BatchQueue {
    type Item = InputResult<(Array4<f32>, Array1<i64>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut images = Vec::with_capacity(self.config.batch_size);
        let mut labels = Vec::with_capacity(self.config.batch_size);
        while images.len() < self.config.batch_size {
            let (image, label) = self.dequeue()?;
            images.push(image);
            labels.push(label);
        }

        let views: Vec<ArrayView3<f32>> = images.iter().map(|i| i.view()).collect();
        Some(
            stack(Axis(0), &views)
                .map(|batch| (batch, Array1::from(labels)))
                .map_err(InputError::from),
        )
    }
}

impl Drop for BatchQueue {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Unblocks workers waiting on a full queue.
        drop(self.receiver.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Constructs a queued batch of images and labels.
///
/// With `shuffle` examples are drawn randomly from a queue that holds at least
/// `min_queue_examples` examples, otherwise they are batched in the order they arrive.
pub fn generate_image_and_label_batch<I>(
    examples: I,
    min_queue_examples: usize,
    batch_size: usize,
    shuffle: bool,
) -> InputResult<BatchQueue>
where
    I: IntoIterator<Item = LabeledImage>,
    I::IntoIter: Send + 'static,
{
    BatchQueue::new(
        examples,
        BatchConfig::new(batch_size, min_queue_examples, shuffle),
    )
}
