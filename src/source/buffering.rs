//! Prefetch buffering between a slow producer and the real-time thread

use crate::buffer::{AudioBuffer, ReadRequest};
use crate::error::{Result, SonoflowError};
use crate::source::{AudioSource, PositionableSource, StreamState};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Cursor and status words shared between the real-time reader and the
/// background fill thread. The sample payload itself lives in the SPSC ring;
/// only these words are shared mutably.
struct Shared {
    /// Bumped by every seek/flush before the command is sent.
    seek_epoch: AtomicU64,
    /// Set by the fill thread once it has repositioned the wrapped source.
    producer_epoch: AtomicU64,
    /// Set by the reader once it has discarded data older than the epoch.
    consumer_ack: AtomicU64,
    /// The wrapped source's own cursor, for observing the prefetch lead.
    wrapped_position: AtomicU64,
    /// True once the wrapped source has been drained to its end.
    end_reached: AtomicBool,
    underruns: AtomicU64,
    read_faults: AtomicU64,
}

enum Command {
    Reposition { pos: u64, epoch: u64 },
    Shutdown,
}

/// Wraps a possibly slow [`PositionableSource`] with a fixed-capacity ring
/// that a background thread keeps filled ahead of the real-time read cursor.
///
/// `read` never blocks: it copies whatever the ring holds and zero-fills the
/// deficit, counting an underrun when the fill thread fell behind. Seeks are
/// applied through an epoch handshake so a concurrent read can never observe
/// a half-applied seek or pre-seek samples afterwards.
///
/// While open, the wrapped source lives on the fill thread and its cursor
/// leads the externally visible position by up to the ring capacity; that
/// lead is inherent to prefetching, not drift.
pub struct BufferingSource {
    state: StreamState,
    channels: usize,
    ring_frames: usize,
    source: Option<Box<dyn PositionableSource + Send>>,
    shared: Arc<Shared>,
    consumer: Option<HeapCons<f32>>,
    cmd_tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<Box<dyn PositionableSource + Send>>>,
    staging: Vec<f32>,
    consumer_epoch: u64,
    primed: bool,
    position: u64,
    length: Option<u64>,
}

impl BufferingSource {
    /// `ring_frames` is the prefetch capacity in frames; it should comfortably
    /// exceed the device block size.
    pub fn new(
        source: Box<dyn PositionableSource + Send>,
        channels: usize,
        ring_frames: usize,
    ) -> Self {
        let length = source.length();
        Self {
            state: StreamState::default(),
            channels,
            ring_frames,
            source: Some(source),
            shared: Arc::new(Shared::new(0)),
            consumer: None,
            cmd_tx: None,
            worker: None,
            staging: Vec::new(),
            consumer_epoch: 0,
            primed: false,
            position: 0,
            length,
        }
    }

    /// Number of reads that found less data than requested while the fill
    /// thread was still live. Resets when the source is reopened.
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    /// Number of failed pulls observed by the fill thread.
    pub fn read_faults(&self) -> u64 {
        self.shared.read_faults.load(Ordering::Relaxed)
    }

    /// The wrapped source's own read cursor. Normally leads
    /// [`next_read_position`](PositionableSource::next_read_position) by up
    /// to the ring capacity.
    pub fn wrapped_position(&self) -> u64 {
        self.shared.wrapped_position.load(Ordering::Acquire)
    }

    pub fn ring_frames(&self) -> usize {
        self.ring_frames
    }

    /// Drops all buffered-but-unread data and refills from the current
    /// position. Use when the wrapped source's content may have changed.
    pub fn flush(&mut self) {
        if let Some(tx) = &self.cmd_tx {
            let epoch = self.shared.seek_epoch.fetch_add(1, Ordering::AcqRel) + 1;
            let _ = tx.send(Command::Reposition {
                pos: self.position,
                epoch,
            });
            self.primed = false;
        }
    }

    fn stop_worker(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Command::Shutdown);
        }
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(mut source) => {
                    source.close();
                    self.source = Some(source);
                }
                Err(_) => log::error!("BufferingSource: fill thread panicked"),
            }
        }
        self.consumer = None;
    }
}

impl AudioSource for BufferingSource {
    fn open(&mut self, buffer_size: usize, sample_rate: u32) -> Result<()> {
        if self.state.is_open() {
            self.close();
        }
        if self.ring_frames < buffer_size {
            return Err(SonoflowError::Configuration(format!(
                "Ring capacity ({} frames) must not be smaller than the buffer size ({})",
                self.ring_frames, buffer_size
            )));
        }
        let mut source = self.source.take().ok_or_else(|| {
            SonoflowError::Buffering("Wrapped source is unavailable".to_string())
        })?;
        if let Err(e) = source.open(buffer_size, sample_rate) {
            self.source = Some(source);
            return Err(e);
        }
        source.set_next_read_position(self.position);
        self.length = source.length();

        let ring = HeapRb::<f32>::new(self.ring_frames * self.channels);
        let (producer, consumer) = ring.split();
        let (cmd_tx, cmd_rx) = bounded(16);
        self.shared = Arc::new(Shared::new(self.position));
        self.consumer = Some(consumer);
        self.cmd_tx = Some(cmd_tx);
        self.consumer_epoch = 0;
        self.primed = false;
        self.staging = vec![0.0; self.ring_frames.max(buffer_size) * self.channels];

        let shared = Arc::clone(&self.shared);
        let channels = self.channels;
        let worker = std::thread::Builder::new()
            .name("sonoflow-buffering".to_string())
            .spawn(move || fill_loop(source, producer, shared, cmd_rx, channels, buffer_size))
            .map_err(|e| {
                SonoflowError::Buffering(format!("Failed to spawn fill thread: {}", e))
            })?;
        self.worker = Some(worker);
        self.state.open(buffer_size, sample_rate);
        log::debug!(
            "BufferingSource: opened with ring capacity {} frames, block size {}",
            self.ring_frames,
            buffer_size
        );
        Ok(())
    }

    fn close(&mut self) {
        self.stop_worker();
        self.state.close();
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn buffer_size(&self) -> usize {
        self.state.buffer_size()
    }

    fn sample_rate(&self) -> u32 {
        self.state.sample_rate()
    }

    fn read(&mut self, request: &mut ReadRequest) -> usize {
        let Some(consumer) = self.consumer.as_mut() else {
            request.fill_silence();
            return 0;
        };

        let seek_epoch = self.shared.seek_epoch.load(Ordering::Acquire);
        let producer_epoch = self.shared.producer_epoch.load(Ordering::Acquire);
        if producer_epoch != self.consumer_epoch {
            // The fill thread switched epochs: everything currently in the
            // ring predates the switch and must not be heard.
            consumer.clear();
            self.consumer_epoch = producer_epoch;
            self.primed = false;
            self.shared
                .consumer_ack
                .store(producer_epoch, Ordering::Release);
        }
        if producer_epoch != seek_epoch {
            // A seek is still being applied; stale data may be in flight.
            request.fill_silence();
            return 0;
        }

        let want_frames = request.frames.min(self.staging.len() / self.channels);
        let got = consumer.pop_slice(&mut self.staging[..want_frames * self.channels]);
        // The fill thread only pushes whole frames.
        let got_frames = got / self.channels;

        let channels = self.channels.min(request.dest.channel_count());
        for frame in 0..got_frames {
            for ch in 0..channels {
                request.dest.set_sample(
                    ch,
                    request.dest_start + frame,
                    self.staging[frame * self.channels + ch],
                );
            }
        }
        for ch in 0..request.dest.channel_count() {
            let silent_from = if ch < channels { got_frames } else { 0 };
            request.dest.clear_range(
                ch,
                request.dest_start + silent_from,
                request.frames - silent_from,
            );
        }

        if got_frames < request.frames && !self.shared.end_reached.load(Ordering::Acquire) {
            if self.primed || got_frames > 0 {
                self.shared.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }
        if got_frames > 0 {
            self.primed = true;
        }
        self.position += got_frames as u64;
        got_frames
    }
}

impl PositionableSource for BufferingSource {
    fn next_read_position(&self) -> u64 {
        self.position
    }

    fn set_next_read_position(&mut self, pos: u64) {
        let pos = match self.length {
            Some(len) => pos.min(len),
            None => pos,
        };
        if pos == self.position && self.primed {
            return;
        }
        self.position = pos;
        if let Some(tx) = &self.cmd_tx {
            let epoch = self.shared.seek_epoch.fetch_add(1, Ordering::AcqRel) + 1;
            let _ = tx.send(Command::Reposition { pos, epoch });
            self.primed = false;
        } else if let Some(source) = &mut self.source {
            source.set_next_read_position(pos);
        }
    }

    fn length(&self) -> Option<u64> {
        self.length
    }
}

impl Drop for BufferingSource {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

impl Shared {
    fn new(position: u64) -> Self {
        Self {
            seek_epoch: AtomicU64::new(0),
            producer_epoch: AtomicU64::new(0),
            consumer_ack: AtomicU64::new(0),
            wrapped_position: AtomicU64::new(position),
            end_reached: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
            read_faults: AtomicU64::new(0),
        }
    }
}

/// Background fill loop. Owns the wrapped source and the ring producer;
/// returns the source when shut down so the control side can reuse it.
fn fill_loop(
    mut source: Box<dyn PositionableSource + Send>,
    mut producer: HeapProd<f32>,
    shared: Arc<Shared>,
    cmd_rx: Receiver<Command>,
    channels: usize,
    chunk_frames: usize,
) -> Box<dyn PositionableSource + Send> {
    let mut chunk = AudioBuffer::new(channels, chunk_frames);
    let mut interleaved = vec![0.0f32; chunk_frames * channels];

    'run: loop {
        match cmd_rx.try_recv() {
            Ok(cmd) => {
                if !handle_command(cmd, &mut source, &shared, &cmd_rx) {
                    break 'run;
                }
                continue;
            }
            Err(crossbeam_channel::TryRecvError::Empty) => {}
            Err(crossbeam_channel::TryRecvError::Disconnected) => break 'run,
        }

        let writable = (producer.vacant_len() / channels).min(chunk_frames);
        if writable == 0 || shared.end_reached.load(Ordering::Acquire) {
            // Ring full or source drained: park on the command channel so
            // shutdown and seeks stay responsive.
            match cmd_rx.recv_timeout(Duration::from_millis(1)) {
                Ok(cmd) => {
                    if !handle_command(cmd, &mut source, &shared, &cmd_rx) {
                        break 'run;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break 'run,
            }
            continue;
        }

        let mut request = ReadRequest::new(&mut chunk, 0, writable);
        let content = source.read(&mut request);
        if content == 0 {
            let at_end = source
                .length()
                .is_some_and(|len| source.next_read_position() >= len);
            if at_end {
                shared.end_reached.store(true, Ordering::Release);
            } else {
                // A live source produced nothing: transient fault, retry.
                shared.read_faults.fetch_add(1, Ordering::Relaxed);
                std::thread::sleep(Duration::from_millis(1));
            }
            continue;
        }
        chunk.write_interleaved(0, content, &mut interleaved[..content * channels]);
        let pushed = producer.push_slice(&interleaved[..content * channels]);
        debug_assert_eq!(pushed, content * channels);
        shared
            .wrapped_position
            .store(source.next_read_position(), Ordering::Release);
    }
    source
}

/// Applies one command; returns false on shutdown.
fn handle_command(
    cmd: Command,
    source: &mut Box<dyn PositionableSource + Send>,
    shared: &Arc<Shared>,
    cmd_rx: &Receiver<Command>,
) -> bool {
    match cmd {
        Command::Shutdown => false,
        Command::Reposition { pos, epoch } => {
            source.set_next_read_position(pos);
            shared.end_reached.store(false, Ordering::Release);
            shared.wrapped_position.store(pos, Ordering::Release);
            shared.producer_epoch.store(epoch, Ordering::Release);
            // Hold off writing until the reader has discarded pre-seek data,
            // unless an even newer seek supersedes this one.
            while shared.consumer_ack.load(Ordering::Acquire) != epoch {
                if shared.seek_epoch.load(Ordering::Acquire) != epoch {
                    return true;
                }
                match cmd_rx.recv_timeout(Duration::from_micros(200)) {
                    Ok(next) => return handle_command(next, source, shared, cmd_rx),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return false,
                }
            }
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use std::time::Instant;

    fn ramp_source(channels: usize, frames: usize) -> Box<dyn PositionableSource + Send> {
        let mut buf = AudioBuffer::new(channels, frames);
        for ch in 0..channels {
            for i in 0..frames {
                let sign = if ch % 2 == 0 { 1.0 } else { -1.0 };
                buf.set_sample(ch, i, sign * i as f32);
            }
        }
        Box::new(MemorySource::new(buf))
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for refill");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Reads `frames` frames of content, tolerating transient silence while
    /// the fill thread catches up.
    fn read_content(src: &mut BufferingSource, channels: usize, frames: usize) -> Vec<f32> {
        let mut content = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while content.len() < frames {
            assert!(Instant::now() < deadline, "timed out reading content");
            let want = 64.min(frames - content.len());
            let mut buf = AudioBuffer::new(channels, 64);
            let mut request = ReadRequest::new(&mut buf, 0, want);
            let n = src.read(&mut request);
            content.extend_from_slice(&buf.channel(0)[..n]);
        }
        content
    }

    #[test]
    fn test_prefetch_lead_scenario() {
        // 2ch 44.1k source of 500000 frames, ring 4096, read in 1024-frame
        // chunks: after 4 full reads the visible cursor is 4096 and the
        // wrapped cursor leads it by at most the ring capacity.
        let mut src = BufferingSource::new(ramp_source(2, 500_000), 2, 4096);
        src.open(1024, 44100).unwrap();
        wait_for(|| src.wrapped_position() >= 4096);

        for block in 0..4u64 {
            let mut buf = AudioBuffer::new(2, 1024);
            let mut request = ReadRequest::new(&mut buf, 0, 1024);
            assert_eq!(src.read(&mut request), 1024);
            assert_eq!(buf.sample(0, 0), (block * 1024) as f32);
            assert_eq!(buf.sample(1, 0), -((block * 1024) as f32));
        }

        assert_eq!(src.next_read_position(), 4096);
        let wrapped = src.wrapped_position();
        assert!(wrapped >= 4096, "wrapped cursor {} should lead", wrapped);
        assert!(
            wrapped <= 4096 + src.ring_frames() as u64,
            "lead {} exceeds ring capacity",
            wrapped - 4096
        );
        assert_eq!(src.underruns(), 0);
        src.close();
    }

    #[test]
    fn test_seek_then_refill_matches_wrapped_source() {
        let mut src = BufferingSource::new(ramp_source(1, 100_000), 1, 4096);
        src.open(512, 44100).unwrap();
        wait_for(|| src.wrapped_position() >= 512);

        // Consume a little, then jump.
        let _ = read_content(&mut src, 1, 512);
        src.set_next_read_position(50_000);
        assert_eq!(src.next_read_position(), 50_000);

        let content = read_content(&mut src, 1, 256);
        let expected: Vec<f32> = (50_000..50_256).map(|i| i as f32).collect();
        assert_eq!(content, expected);
        src.close();
    }

    #[test]
    fn test_flush_refills_from_current_position() {
        let mut src = BufferingSource::new(ramp_source(1, 10_000), 1, 2048);
        src.open(256, 44100).unwrap();
        let _ = read_content(&mut src, 1, 1000);
        assert_eq!(src.next_read_position(), 1000);

        src.flush();
        let content = read_content(&mut src, 1, 128);
        let expected: Vec<f32> = (1000..1128).map(|i| i as f32).collect();
        assert_eq!(content, expected);
        assert_eq!(src.next_read_position(), 1128);
        src.close();
    }

    #[test]
    fn test_read_never_blocks_on_stalled_producer() {
        struct StallingSource {
            inner: MemorySource,
            gate: Arc<AtomicBool>,
        }
        impl AudioSource for StallingSource {
            fn open(&mut self, buffer_size: usize, sample_rate: u32) -> Result<()> {
                self.inner.open(buffer_size, sample_rate)
            }
            fn close(&mut self) {
                self.inner.close();
            }
            fn is_open(&self) -> bool {
                self.inner.is_open()
            }
            fn buffer_size(&self) -> usize {
                self.inner.buffer_size()
            }
            fn sample_rate(&self) -> u32 {
                self.inner.sample_rate()
            }
            fn read(&mut self, request: &mut ReadRequest) -> usize {
                while !self.gate.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                self.inner.read(request)
            }
        }
        impl PositionableSource for StallingSource {
            fn next_read_position(&self) -> u64 {
                self.inner.next_read_position()
            }
            fn set_next_read_position(&mut self, pos: u64) {
                self.inner.set_next_read_position(pos);
            }
            fn length(&self) -> Option<u64> {
                self.inner.length()
            }
        }

        let gate = Arc::new(AtomicBool::new(false));
        let stalled = StallingSource {
            inner: MemorySource::new(AudioBuffer::new(1, 100_000)),
            gate: Arc::clone(&gate),
        };
        let mut src = BufferingSource::new(Box::new(stalled), 1, 4096);
        src.open(1024, 48000).unwrap();

        // The producer is stalled; the real-time read must return promptly
        // with a fully silence-padded buffer.
        let mut buf = AudioBuffer::new(1, 1024);
        let started = Instant::now();
        let mut request = ReadRequest::new(&mut buf, 0, 1024);
        let n = src.read(&mut request);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(n, 0);
        assert!(buf.channel(0).iter().all(|&s| s == 0.0));

        gate.store(true, Ordering::Release);
        src.close();
    }

    #[test]
    fn test_bounded_source_drains_without_underrun_noise() {
        let mut src = BufferingSource::new(ramp_source(1, 3000), 1, 4096);
        src.open(256, 44100).unwrap();
        wait_for(|| src.wrapped_position() >= 3000);
        // Let the fill thread observe the end before draining.
        std::thread::sleep(Duration::from_millis(20));

        let content = read_content(&mut src, 1, 3000);
        assert_eq!(content.len(), 3000);
        assert_eq!(content[2999], 2999.0);

        // Past the end: silence, no underrun counted.
        let mut buf = AudioBuffer::new(1, 256);
        let mut request = ReadRequest::new(&mut buf, 0, 256);
        assert_eq!(src.read(&mut request), 0);
        assert_eq!(src.underruns(), 0);
        src.close();
    }
}
