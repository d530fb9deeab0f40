use motiond::{CaptureStore, EventWindower, FixedProbe, Frame};

const W: u32 = 16;
const H: u32 = 12;

fn flat_frame(value: u8, seq: u64) -> Frame {
    Frame::new(vec![value; (W * H * 3) as usize], W, H, seq)
}

/// Seal an event whose frames have the given flat intensities.
fn event_with_values(values: &[u8]) -> motiond::Event {
    let mut windower = EventWindower::new(0, 0);
    for (seq, &value) in values.iter().enumerate() {
        assert!(windower.offer(flat_frame(value, seq as u64), true).is_none());
    }
    windower
        .offer(flat_frame(0, values.len() as u64), false)
        .expect("event seals")
}

fn open_store(root: &std::path::Path, reservation: u64, probe: FixedProbe) -> CaptureStore {
    CaptureStore::open(root, reservation, Box::new(probe)).expect("open store")
}

fn mean_intensity(frame: &Frame) -> f64 {
    let sum: u64 = frame.pixels().iter().map(|&b| b as u64).sum();
    sum as f64 / frame.pixels().len() as f64
}

#[test]
fn saved_event_round_trips_in_order() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut store = open_store(dir.path(), 1024, FixedProbe::new(u64::MAX));

    // Distinct, well-separated intensities survive JPEG compression enough
    // to witness ordering.
    let event = event_with_values(&[0, 100, 200]);
    let record = store.save_event(&event).expect("save event");
    assert_eq!(record.frames_written, 3);

    let frames = store.load_record(&record.name).expect("load record");
    assert_eq!(frames.len(), event.len());
    for (original, restored) in event.frames().iter().zip(&frames) {
        assert_eq!(restored.geometry(), original.geometry());
    }

    let means: Vec<f64> = frames.iter().map(mean_intensity).collect();
    assert!(means[0] < 30.0);
    assert!((means[1] - 100.0).abs() < 30.0);
    assert!(means[2] > 170.0);
}

#[test]
fn record_names_sort_in_creation_order() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut store = open_store(dir.path(), 1024, FixedProbe::new(u64::MAX));

    let first = store
        .save_event(&event_with_values(&[10]))
        .expect("save first");
    let second = store
        .save_event(&event_with_values(&[20]))
        .expect("save second");
    let third = store
        .save_event(&event_with_values(&[30]))
        .expect("save third");

    let records = store.records().expect("list records");
    assert_eq!(records, vec![first.name, second.name, third.name]);
}

#[test]
fn low_space_evicts_oldest_records_but_never_the_current_one() {
    let dir = tempfile::tempdir().expect("temp dir");
    let probe = FixedProbe::new(u64::MAX);
    let mut store = open_store(dir.path(), 1024, probe.clone());

    let first = store
        .save_event(&event_with_values(&[10]))
        .expect("save first");
    let second = store
        .save_event(&event_with_values(&[20]))
        .expect("save second");
    assert_eq!(store.records().expect("list").len(), 2);

    // Space exhausted: the next save must evict the two older records
    // (oldest first) and still write its own frames.
    probe.set(0);
    let third = store
        .save_event(&event_with_values(&[30, 40]))
        .expect("save third");

    let records = store.records().expect("list records");
    assert_eq!(records, vec![third.name.clone()]);
    assert!(!records.contains(&first.name));
    assert!(!records.contains(&second.name));

    // The surviving record is complete.
    assert_eq!(store.load_record(&third.name).expect("load").len(), 2);
}

#[test]
fn sufficient_space_never_evicts() {
    let dir = tempfile::tempdir().expect("temp dir");
    let probe = FixedProbe::new(1024 * 1024);
    let mut store = open_store(dir.path(), 1024, probe);

    store.save_event(&event_with_values(&[10])).expect("save");
    store.save_event(&event_with_values(&[20])).expect("save");
    assert_eq!(store.records().expect("list").len(), 2);
}

#[test]
fn missing_root_is_created_on_open() {
    let dir = tempfile::tempdir().expect("temp dir");
    let root = dir.path().join("nested").join("captures");
    let mut store = open_store(&root, 1024, FixedProbe::new(u64::MAX));

    store.save_event(&event_with_values(&[10])).expect("save");
    assert!(root.is_dir());
    assert_eq!(store.records().expect("list").len(), 1);
}
