use super::AudioChunk;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::mpsc::{error::TrySendError, Sender};

/// Downmix interleaved input to mono while applying `convert`, so the rest of the
/// pipeline sees one channel whatever the microphone layout.
pub(super) fn append_downmixed_samples<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

/// Cuts the device callback's variable-size buffers into fixed blocks and hands
/// them to the session without ever blocking the audio thread.
///
/// A block the session cannot take right now is dropped and counted; stale
/// microphone audio is worth less than a stalled callback.
pub(super) struct BlockDispatcher {
    block_samples: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    sender: Sender<AudioChunk>,
    dropped: Arc<AtomicUsize>,
    closed: bool,
}

impl BlockDispatcher {
    pub(super) fn new(
        block_samples: usize,
        sample_rate: u32,
        sender: Sender<AudioChunk>,
        dropped: Arc<AtomicUsize>,
    ) -> Self {
        let block_samples = block_samples.max(1);
        Self {
            block_samples,
            sample_rate,
            pending: Vec::with_capacity(block_samples * 2),
            scratch: Vec::new(),
            sender,
            dropped,
            closed: false,
        }
    }

    pub(super) fn push<T, F>(&mut self, data: &[T], channels: usize, convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        if self.closed {
            return;
        }
        self.scratch.clear();
        append_downmixed_samples(&mut self.scratch, data, channels, convert);
        self.pending.extend_from_slice(&self.scratch);

        while self.pending.len() >= self.block_samples {
            let block: Vec<f32> = self.pending.drain(..self.block_samples).collect();
            match self
                .sender
                .try_send(AudioChunk::new(block, self.sample_rate))
            {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Closed(_)) => {
                    self.closed = true;
                    self.pending.clear();
                    break;
                }
            }
        }
    }
}
