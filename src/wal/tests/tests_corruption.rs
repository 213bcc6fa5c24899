//! Corruption handling: checksum damage, torn frames, oversized lengths.
//! Replay must stop at the last verified record, never fail hard.

use std::fs::OpenOptions;
use std::io::Write;

use tempfile::TempDir;

use crate::triple::Triple;
use crate::wal::{self, Wal, WalEvent};

/// Appends three auto-commit adds and returns (path, end offsets).
fn wal_with_three_records(dir: &TempDir) -> (std::path::PathBuf, Vec<u64>) {
    let path = dir.path().join("db.wal");
    let mut wal = Wal::open(&path).unwrap();
    let mut ends = Vec::new();
    for i in 1..=3u32 {
        ends.push(wal.append_add_triple(Triple::new(i, i, i)).unwrap());
    }
    wal.sync().unwrap();
    (path, ends)
}

#[test]
fn flipped_payload_byte_stops_replay() {
    let dir = TempDir::new().unwrap();
    let (path, ends) = wal_with_three_records(&dir);

    // Flip one payload byte of the second record.
    let mut raw = std::fs::read(&path).unwrap();
    let second_payload = ends[0] as usize + 9 + 2;
    raw[second_payload] ^= 0xFF;
    std::fs::write(&path, &raw).unwrap();

    let replay = wal::replay(&path, None).unwrap();
    assert_eq!(replay.events, vec![WalEvent::AddTriple(Triple::new(1, 1, 1))]);
    assert_eq!(replay.safe_offset, ends[0]);
    assert_eq!(replay.warnings, 1);
}

#[test]
fn torn_final_record_is_discarded() {
    let dir = TempDir::new().unwrap();
    let (path, ends) = wal_with_three_records(&dir);

    // Cut the file mid-way through the last record.
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(ends[2] - 5).unwrap();

    let replay = wal::replay(&path, None).unwrap();
    assert_eq!(replay.events.len(), 2);
    assert_eq!(replay.safe_offset, ends[1]);
    assert_eq!(replay.warnings, 1);
}

#[test]
fn oversized_length_field_stops_replay() {
    let dir = TempDir::new().unwrap();
    let (path, ends) = wal_with_three_records(&dir);

    // Overwrite the third record's length field with an absurd value.
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    use std::io::Seek;
    file.seek(std::io::SeekFrom::Start(ends[1] + 1)).unwrap();
    file.write_all(&u32::MAX.to_le_bytes()).unwrap();

    let replay = wal::replay(&path, None).unwrap();
    assert_eq!(replay.events.len(), 2);
    assert_eq!(replay.safe_offset, ends[1]);
    assert_eq!(replay.warnings, 1);
}

#[test]
fn unknown_record_type_stops_replay() {
    let dir = TempDir::new().unwrap();
    let (path, ends) = wal_with_three_records(&dir);

    let mut raw = std::fs::read(&path).unwrap();
    raw[ends[1] as usize] = 0xEE; // type byte of record 3
    std::fs::write(&path, &raw).unwrap();

    let replay = wal::replay(&path, None).unwrap();
    assert_eq!(replay.events.len(), 2);
    assert_eq!(replay.warnings, 1);
}

#[test]
fn garbage_after_safe_offset_can_be_truncated_away() {
    let dir = TempDir::new().unwrap();
    let (path, ends) = wal_with_three_records(&dir);

    let mut raw = std::fs::read(&path).unwrap();
    raw.truncate(ends[2] as usize - 3);
    std::fs::write(&path, &raw).unwrap();

    let replay = wal::replay(&path, None).unwrap();
    assert_eq!(replay.safe_offset, ends[1]);

    // The writer truncates to the safe offset and appends cleanly.
    let mut wal = Wal::open(&path).unwrap();
    wal.truncate_to(replay.safe_offset).unwrap();
    wal.append_add_triple(Triple::new(9, 9, 9)).unwrap();
    wal.sync().unwrap();
    drop(wal);

    let replay = wal::replay(&path, None).unwrap();
    assert_eq!(replay.warnings, 0);
    assert_eq!(replay.events.len(), 3);
    assert_eq!(
        replay.events[2],
        WalEvent::AddTriple(Triple::new(9, 9, 9))
    );
}
