//! The sequential detection pipeline.
//!
//! Source → detector → windower runs on one thread, strictly in order: a
//! frame is classified against its immediate predecessor, so frame n+1 is
//! never touched before frame n's result exists. Sinks hang off the loop
//! through bounded queues and never run on this thread.
//!
//! Cancellation is cooperative. The token is checked before each reconnect
//! attempt and each dispatch; a decode in progress runs to completion. There
//! is no mid-frame cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::detect::MotionDetector;
use crate::error::SourceError;
use crate::frame::Frame;
use crate::ingest::{ConnectMode, FrameSource};
use crate::sink::SinkSender;
use crate::window::{Event, EventWindower};

/// Shared shutdown flag. Cloned into the reconnect loops and every sink
/// thread; all of them observe a cancel at their next suspension point.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep in short slices, bailing out early on cancel. Returns false if
    /// the token was cancelled before the duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(50);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.is_cancelled() {
                return false;
            }
            let slice = remaining.min(SLICE);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
        !self.is_cancelled()
    }
}

/// The detection-and-windowing loop.
pub struct Pipeline {
    source: FrameSource,
    detector: MotionDetector,
    windower: EventWindower,
    frame_sinks: Vec<SinkSender<(Frame, bool)>>,
    event_sinks: Vec<SinkSender<Event>>,
}

impl Pipeline {
    pub fn new(source: FrameSource, detector: MotionDetector, windower: EventWindower) -> Self {
        Self {
            source,
            detector,
            windower,
            frame_sinks: Vec::new(),
            event_sinks: Vec::new(),
        }
    }

    /// Tee of the classified frame stream (frame, motion flag).
    pub fn add_frame_sink(&mut self, sink: SinkSender<(Frame, bool)>) {
        self.frame_sinks.push(sink);
    }

    /// Consumer of sealed events.
    pub fn add_event_sink(&mut self, sink: SinkSender<Event>) {
        self.event_sinks.push(sink);
    }

    /// Run until cancelled, the optional frame budget is exhausted, or the
    /// source fails fatally.
    ///
    /// The first frame after connect seeds the previous-frame pointer and is
    /// not classified. Only the current and previous frames are retained
    /// here; everything else lives in the windower or in sink queues.
    pub fn run(
        &mut self,
        cancel: &CancelToken,
        mode: ConnectMode,
        frame_limit: Option<u64>,
    ) -> Result<(), SourceError> {
        match self.source.connect(mode, cancel) {
            Ok(()) => {}
            Err(SourceError::Cancelled) => return self.finish(),
            Err(err) => return Err(err),
        }
        log::info!("pipeline started on {}", self.source.describe());

        let mut prev = match self.source.next_frame(cancel) {
            Ok(frame) => frame,
            Err(SourceError::Cancelled) => return self.finish(),
            Err(err) => return Err(err),
        };
        log::info!(
            "first frame received ({}); motion detection active",
            prev.geometry()
        );

        let mut classified: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if frame_limit.is_some_and(|limit| classified >= limit) {
                log::info!("frame budget of {} reached", classified);
                break;
            }

            let frame = match self.source.next_frame(cancel) {
                Ok(frame) => frame,
                Err(SourceError::Cancelled) => break,
                Err(err) => {
                    self.finish()?;
                    return Err(err);
                }
            };

            let motion = self.detector.classify(&prev, &frame);
            classified += 1;

            for sink in &self.frame_sinks {
                sink.send((frame.clone(), motion));
            }
            if let Some(event) = self.windower.offer(frame.clone(), motion) {
                for sink in &self.event_sinks {
                    sink.send(event.clone());
                }
            }
            prev = frame;
        }

        self.finish()
    }

    /// Close sink queues so consumers drain and exit. An event still open at
    /// shutdown is discarded; its frames were never sealed.
    fn finish(&mut self) -> Result<(), SourceError> {
        if !self.windower.is_idle() {
            log::warn!("shutting down with an open motion event; unsealed frames discarded");
        }
        for sink in &self.frame_sinks {
            sink.close();
        }
        for sink in &self.event_sinks {
            sink.close();
        }
        Ok(())
    }

    pub fn source_stats(&self) -> crate::ingest::SourceStats {
        self.source.stats()
    }
}
