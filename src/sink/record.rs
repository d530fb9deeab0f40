//! Event persistence sink.
//!
//! Owns the capture store and consumes sealed events from its queue. With
//! guaranteed capture the queue blocks the pipeline instead of dropping;
//! otherwise a lagging store drops the oldest queued event with a warning.
//!
//! A `StorageError` from a save is reported and the sink moves on: the event
//! is lost but never silently — the failure, the record path, and the frame
//! count all reach the log.

use crate::pipeline::CancelToken;
use crate::sink::{bounded, OverflowPolicy, SinkHandle, SinkSender};
use crate::store::CaptureStore;
use crate::window::Event;

/// Queued events waiting for the store. Events are rare compared to frames;
/// a small queue is enough to ride out slow disks.
const QUEUE_CAPACITY: usize = 8;

/// Spawn the persistence sink. `policy` should be `Block` for guaranteed
/// capture, `DropOldest` otherwise.
pub fn spawn_record_sink(
    mut store: CaptureStore,
    policy: OverflowPolicy,
    cancel: CancelToken,
) -> (SinkSender<Event>, SinkHandle) {
    let (tx, rx) = bounded("record", QUEUE_CAPACITY, policy, log::Level::Warn);
    let join = std::thread::spawn(move || {
        while let Some(event) = rx.recv(&cancel) {
            match store.save_event(&event) {
                Ok(record) => {
                    log::info!(
                        "captured {} frames to {}",
                        record.frames_written,
                        record.path.display()
                    );
                }
                Err(err) => {
                    log::error!("failed to persist motion event: {}", err);
                }
            }
        }
        log::debug!("record sink stopped");
    });
    (tx, SinkHandle::new("record", join))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, CHANNELS};
    use crate::store::FixedProbe;
    use crate::window::EventWindower;

    fn event_of(len: usize) -> Event {
        let mut windower = EventWindower::new(0, 0);
        for seq in 0..len as u64 {
            let frame = Frame::new(vec![10u8; 4 * 4 * CHANNELS], 4, 4, seq);
            assert!(windower.offer(frame, true).is_none());
        }
        let quiet = Frame::new(vec![10u8; 4 * 4 * CHANNELS], 4, 4, len as u64);
        // Zero after-count: the quiet frame seals without being consumed.
        windower
            .offer(quiet, false)
            .expect("windower seals the event")
    }

    #[test]
    fn sink_persists_queued_events_then_stops() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = CaptureStore::open(
            dir.path(),
            1024,
            Box::new(FixedProbe::new(u64::MAX)),
        )
        .expect("open store");
        let reader =
            CaptureStore::open(dir.path(), 1024, Box::new(FixedProbe::new(u64::MAX)))
                .expect("open reader");

        let cancel = CancelToken::new();
        let (tx, handle) = spawn_record_sink(store, OverflowPolicy::Block, cancel);

        assert!(tx.send(event_of(3)));
        assert!(tx.send(event_of(2)));
        tx.close();
        handle.stop();

        let records = reader.records().expect("list records");
        assert_eq!(records.len(), 2);
        assert_eq!(
            reader.load_record(&records[0]).expect("load").len(),
            3
        );
        assert_eq!(
            reader.load_record(&records[1]).expect("load").len(),
            2
        );
    }
}
