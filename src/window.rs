//! Event windowing.
//!
//! Turns the per-frame motion-flag stream into discrete, non-overlapping
//! events with configurable lead-in and lead-out padding. The windower is an
//! explicit three-state machine (idle, recording, tailing) driven one frame
//! at a time, so its edge cases — tail cancellation, immediate sealing with
//! zero lead-out — are testable in isolation.
//!
//! Invariants:
//! - at most one event is open at a time;
//! - sealed events are strictly ordered and share no frames;
//! - every observed frame lands in at most one event, or in the bounded
//!   before-ring (which is either drained into the next event or overwritten).

use std::collections::VecDeque;
use std::mem;

use crate::frame::Frame;

/// One contiguous motion occurrence plus its padding. Non-empty; frames are
/// in strictly increasing capture order.
#[derive(Clone, Debug)]
pub struct Event {
    frames: Vec<Frame>,
}

impl Event {
    fn new(frames: Vec<Frame>) -> Self {
        debug_assert!(!frames.is_empty());
        debug_assert!(frames.windows(2).all(|pair| pair[0].seq < pair[1].seq));
        Self { frames }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn first_seq(&self) -> u64 {
        self.frames[0].seq
    }

    pub fn last_seq(&self) -> u64 {
        self.frames[self.frames.len() - 1].seq
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WindowState {
    Idle,
    Recording,
    Tailing { remaining: u32 },
}

/// State machine over the (frame, motion) stream.
///
/// `before_count` frames of context are kept ahead of each occurrence,
/// `after_count` behind it. A motion frame during the tail cancels the
/// countdown and the event keeps growing.
pub struct EventWindower {
    before_count: usize,
    after_count: u32,
    before: VecDeque<Frame>,
    open: Vec<Frame>,
    state: WindowState,
}

impl EventWindower {
    pub fn new(before_count: usize, after_count: u32) -> Self {
        Self {
            before_count,
            after_count,
            before: VecDeque::with_capacity(before_count),
            open: Vec::new(),
            state: WindowState::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == WindowState::Idle
    }

    /// Feed one classified frame. Returns the sealed event when this frame
    /// closes one.
    pub fn offer(&mut self, frame: Frame, motion: bool) -> Option<Event> {
        match self.state {
            WindowState::Idle => {
                if motion {
                    self.open = Vec::with_capacity(self.before.len() + 1);
                    self.open.extend(self.before.drain(..));
                    self.open.push(frame);
                    self.state = WindowState::Recording;
                    log::info!("motion event opened at seq {}", self.open_last_seq());
                    None
                } else {
                    self.stash_before(frame);
                    None
                }
            }
            WindowState::Recording => {
                if motion {
                    self.open.push(frame);
                    return None;
                }
                if self.after_count == 0 {
                    // Zero lead-out: the sealing frame is not part of the
                    // event and becomes before-context for the next one.
                    let event = self.seal();
                    self.stash_before(frame);
                    return Some(event);
                }
                self.open.push(frame);
                let remaining = self.after_count - 1;
                if remaining == 0 {
                    return Some(self.seal());
                }
                self.state = WindowState::Tailing { remaining };
                None
            }
            WindowState::Tailing { remaining } => {
                self.open.push(frame);
                if motion {
                    // Tail cancelled; the event keeps growing.
                    self.state = WindowState::Recording;
                    return None;
                }
                let remaining = remaining - 1;
                if remaining == 0 {
                    return Some(self.seal());
                }
                self.state = WindowState::Tailing { remaining };
                None
            }
        }
    }

    fn stash_before(&mut self, frame: Frame) {
        if self.before_count == 0 {
            return;
        }
        if self.before.len() == self.before_count {
            self.before.pop_front();
        }
        self.before.push_back(frame);
    }

    fn seal(&mut self) -> Event {
        self.state = WindowState::Idle;
        // Frames consumed by the sealed event are never reused as
        // before-context for the next one.
        self.before.clear();
        let event = Event::new(mem::take(&mut self.open));
        log::info!(
            "motion event sealed: {} frames (seq {}..={})",
            event.len(),
            event.first_seq(),
            event.last_seq()
        );
        event
    }

    fn open_last_seq(&self) -> u64 {
        self.open.last().map(|frame| frame.seq).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CHANNELS;

    fn frame(seq: u64) -> Frame {
        Frame::new(vec![0u8; 2 * 2 * CHANNELS], 2, 2, seq)
    }

    /// Drive a motion-flag script through the windower, returning sealed
    /// events keyed by their frame sequence numbers.
    fn run(windower: &mut EventWindower, flags: &[bool]) -> Vec<Vec<u64>> {
        let mut events = Vec::new();
        for (seq, &motion) in flags.iter().enumerate() {
            if let Some(event) = windower.offer(frame(seq as u64), motion) {
                events.push(event.frames().iter().map(|f| f.seq).collect());
            }
        }
        events
    }

    #[test]
    fn single_burst_with_padding() {
        let mut windower = EventWindower::new(2, 2);
        // F F F T T F F F F
        let events = run(
            &mut windower,
            &[false, false, false, true, true, false, false, false, false],
        );
        assert_eq!(events, vec![vec![1, 2, 3, 4, 5, 6]]);
        assert!(windower.is_idle());
    }

    #[test]
    fn separated_bursts_produce_distinct_events() {
        let mut windower = EventWindower::new(1, 1);
        // Gap of 4 non-motion frames, longer than after_count = 1.
        let events = run(
            &mut windower,
            &[false, true, false, false, false, false, true, false],
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], vec![0, 1, 2]);
        assert_eq!(events[1], vec![5, 6, 7]);
        // Non-overlapping and strictly ordered.
        assert!(events[0].last().unwrap() < events[1].first().unwrap());
    }

    #[test]
    fn burst_resuming_in_tail_spans_one_event() {
        let mut windower = EventWindower::new(0, 3);
        // T F F T F F F : second burst arrives with the tail still open.
        let events = run(&mut windower, &[true, false, false, true, false, false, false]);
        assert_eq!(events, vec![vec![0, 1, 2, 3, 4, 5, 6]]);
        assert!(windower.is_idle());
    }

    #[test]
    fn zero_after_count_seals_immediately() {
        let mut windower = EventWindower::new(1, 0);
        // F T T F F T F
        let events = run(&mut windower, &[false, true, true, false, false, true, false]);
        // First event: before frame 0 + motion 1, 2. Sealing frame 3 is not
        // consumed and becomes before-context for the second event.
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], vec![0, 1, 2]);
        assert_eq!(events[1], vec![4, 5]);
    }

    #[test]
    fn zero_before_count_keeps_no_context() {
        let mut windower = EventWindower::new(0, 1);
        let events = run(&mut windower, &[false, false, true, false]);
        assert_eq!(events, vec![vec![2, 3]]);
    }

    #[test]
    fn before_ring_drops_oldest() {
        let mut windower = EventWindower::new(2, 1);
        // Five quiet frames: only the last two are context.
        let events = run(&mut windower, &[false, false, false, false, false, true, false]);
        assert_eq!(events, vec![vec![3, 4, 5, 6]]);
    }

    #[test]
    fn ring_is_not_reused_across_events() {
        let mut windower = EventWindower::new(2, 1);
        // Event seals at frame 3; frames 0..=3 are consumed. The second
        // event's context can only come from frames after the seal.
        let events = run(
            &mut windower,
            &[false, false, true, false, false, true, false],
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], vec![0, 1, 2, 3]);
        assert_eq!(events[1], vec![4, 5, 6]);
    }

    #[test]
    fn after_count_one_seals_on_first_quiet_frame() {
        let mut windower = EventWindower::new(0, 1);
        let events = run(&mut windower, &[true, false]);
        assert_eq!(events, vec![vec![0, 1]]);
        assert!(windower.is_idle());
    }
}
