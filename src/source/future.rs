//! Placeholder source for audio that is still being produced elsewhere

use crate::buffer::ReadRequest;
use crate::error::Result;
use crate::source::{AudioSource, PositionableSource, StreamState};
use crossbeam_channel::{Receiver, Sender, unbounded};

enum FutureMessage {
    Progress(u8),
    Ready(Box<dyn PositionableSource + Send>),
    Failed(String),
}

/// Producer half of a [`source_promise`] pair. Hand this to whatever is
/// rendering or downloading the audio.
pub struct SourcePromise {
    tx: Sender<FutureMessage>,
}

impl SourcePromise {
    /// Reports completion progress in percent. Values above 100 are clamped.
    pub fn set_progress(&self, percent: u8) {
        let _ = self.tx.send(FutureMessage::Progress(percent.min(100)));
    }

    /// Fulfills the promise with the finished source.
    pub fn resolve(self, source: Box<dyn PositionableSource + Send>) {
        let _ = self.tx.send(FutureMessage::Ready(source));
    }

    /// Rejects the promise. The consuming [`FutureSource`] stays silent.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(FutureMessage::Failed(reason.into()));
    }
}

/// Consumer half of a [`source_promise`] pair; feed it to
/// [`FutureSource::new`].
pub struct SourceFuture {
    rx: Receiver<FutureMessage>,
}

/// Creates a promise/future pair for a source that will exist later.
pub fn source_promise() -> (SourcePromise, SourceFuture) {
    let (tx, rx) = unbounded();
    (SourcePromise { tx }, SourceFuture { rx })
}

/// Resolution state of a [`FutureSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FutureStatus {
    /// Not yet resolved; `progress` is the last reported percentage.
    Pending { progress: u8 },
    Ready,
    Failed(String),
}

/// A [`PositionableSource`] that stands in for one still being produced.
///
/// Until the promise resolves, reads yield silence and the length is
/// unknown. Once resolved the inner source takes over transparently,
/// inheriting the negotiated stream parameters and any seek issued while
/// pending. A failed promise leaves the source permanently silent.
pub struct FutureSource {
    state: StreamState,
    rx: Receiver<FutureMessage>,
    inner: Option<Box<dyn PositionableSource + Send>>,
    status: FutureStatus,
    pending_position: u64,
}

impl FutureSource {
    pub fn new(future: SourceFuture) -> Self {
        Self {
            state: StreamState::default(),
            rx: future.rx,
            inner: None,
            status: FutureStatus::Pending { progress: 0 },
            pending_position: 0,
        }
    }

    pub fn status(&mut self) -> FutureStatus {
        self.poll();
        self.status.clone()
    }

    /// Drains resolution messages without blocking.
    fn poll(&mut self) {
        if !matches!(self.status, FutureStatus::Pending { .. }) {
            return;
        }
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                FutureMessage::Progress(p) => {
                    self.status = FutureStatus::Pending { progress: p };
                }
                FutureMessage::Ready(source) => {
                    self.adopt(source);
                    return;
                }
                FutureMessage::Failed(reason) => {
                    log::warn!("FutureSource: promise failed: {}", reason);
                    self.status = FutureStatus::Failed(reason);
                    return;
                }
            }
        }
    }

    fn adopt(&mut self, mut source: Box<dyn PositionableSource + Send>) {
        if self.state.is_open() {
            if let Err(e) = source.open(self.state.buffer_size(), self.state.sample_rate()) {
                log::warn!("FutureSource: resolved source failed to open: {}", e);
                self.status = FutureStatus::Failed(e.to_string());
                return;
            }
        }
        source.set_next_read_position(self.pending_position);
        self.inner = Some(source);
        self.status = FutureStatus::Ready;
        log::debug!("FutureSource: promise resolved");
    }
}

impl AudioSource for FutureSource {
    fn open(&mut self, buffer_size: usize, sample_rate: u32) -> Result<()> {
        self.poll();
        if let Some(inner) = &mut self.inner {
            inner.open(buffer_size, sample_rate)?;
        }
        self.state.open(buffer_size, sample_rate);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(inner) = &mut self.inner {
            inner.close();
        }
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
        self.poll();
        match &mut self.inner {
            Some(inner) => inner.read(request),
            None => {
                request.fill_silence();
                0
            }
        }
    }
}

impl PositionableSource for FutureSource {
    fn next_read_position(&self) -> u64 {
        match &self.inner {
            Some(inner) => inner.next_read_position(),
            None => self.pending_position,
        }
    }

    fn set_next_read_position(&mut self, pos: u64) {
        self.poll();
        match &mut self.inner {
            Some(inner) => inner.set_next_read_position(pos),
            None => self.pending_position = pos,
        }
    }

    fn length(&self) -> Option<u64> {
        self.inner.as_ref().and_then(|inner| inner.length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBuffer;
    use crate::source::MemorySource;

    fn ramp(frames: usize) -> Box<dyn PositionableSource + Send> {
        let mut buf = AudioBuffer::new(1, frames);
        for i in 0..frames {
            buf.set_sample(0, i, i as f32);
        }
        Box::new(MemorySource::new(buf))
    }

    #[test]
    fn test_silence_until_resolved_then_content() {
        let (promise, future) = source_promise();
        let mut src = FutureSource::new(future);
        src.open(64, 44100).unwrap();

        let mut buf = AudioBuffer::new(1, 16);
        let mut request = ReadRequest::new(&mut buf, 0, 16);
        assert_eq!(src.read(&mut request), 0);
        assert!(buf.channel(0).iter().all(|&s| s == 0.0));
        assert_eq!(src.length(), None);
        assert_eq!(src.status(), FutureStatus::Pending { progress: 0 });

        promise.set_progress(40);
        assert_eq!(src.status(), FutureStatus::Pending { progress: 40 });

        promise.resolve(ramp(100));
        let mut request = ReadRequest::new(&mut buf, 0, 16);
        assert_eq!(src.read(&mut request), 16);
        assert_eq!(buf.sample(0, 0), 0.0);
        assert_eq!(buf.sample(0, 15), 15.0);
        assert_eq!(src.status(), FutureStatus::Ready);
        assert_eq!(src.length(), Some(100));
    }

    #[test]
    fn test_seek_while_pending_applies_on_resolve() {
        let (promise, future) = source_promise();
        let mut src = FutureSource::new(future);
        src.open(64, 44100).unwrap();
        src.set_next_read_position(50);
        assert_eq!(src.next_read_position(), 50);

        promise.resolve(ramp(100));
        let mut buf = AudioBuffer::new(1, 8);
        let mut request = ReadRequest::new(&mut buf, 0, 8);
        assert_eq!(src.read(&mut request), 8);
        assert_eq!(buf.sample(0, 0), 50.0);
    }

    #[test]
    fn test_failed_promise_stays_silent() {
        let (promise, future) = source_promise();
        let mut src = FutureSource::new(future);
        src.open(64, 44100).unwrap();
        promise.fail("render aborted");

        let mut buf = AudioBuffer::new(1, 16);
        let mut request = ReadRequest::new(&mut buf, 0, 16);
        assert_eq!(src.read(&mut request), 0);
        assert_eq!(
            src.status(),
            FutureStatus::Failed("render aborted".to_string())
        );
        let mut request = ReadRequest::new(&mut buf, 0, 16);
        assert_eq!(src.read(&mut request), 0);
    }

    #[test]
    fn test_resolved_source_inherits_open_parameters() {
        let (promise, future) = source_promise();
        let mut src = FutureSource::new(future);
        src.open(128, 48000).unwrap();
        promise.resolve(ramp(10));
        let _ = src.status();
        assert_eq!(src.buffer_size(), 128);
        assert_eq!(src.sample_rate(), 48000);
        assert_eq!(src.length(), Some(10));
    }
}
