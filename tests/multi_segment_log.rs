//! Exercises the on-disk log across a rollover and a process restart
//! without going through the replicator — the store/index/segment/log
//! layer's own durability contract (spec §4.1–4.4).

use distlog::config::SegmentConfig;
use distlog::log::Log;
use distlog::pb::Record;

fn cfg() -> SegmentConfig {
    SegmentConfig {
        max_store_bytes: 64,
        max_index_bytes: 48,
        initial_offset: 0,
    }
}

fn rec(value: &[u8]) -> Record {
    Record {
        value: value.to_vec(),
        offset: 0,
        server: String::new(),
    }
}

#[test]
fn appends_survive_rollover_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let log = Log::new(dir.path(), cfg()).unwrap();
        for i in 0..50u32 {
            log.append(rec(format!("rec-{i:03}").as_bytes())).unwrap();
        }
        log.close().unwrap();
    }

    let log = Log::new(dir.path(), cfg()).unwrap();
    assert_eq!(log.highest_offset(), Some(49));
    for i in 0..50u64 {
        assert_eq!(log.read(i).unwrap().value, format!("rec-{i:03}").as_bytes());
    }
}

#[test]
fn truncate_then_append_continues_from_kept_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let log = Log::new(dir.path(), cfg()).unwrap();
    for i in 0..10u32 {
        log.append(rec(format!("rec-{i}").as_bytes())).unwrap();
    }

    log.truncate(5).unwrap();
    let lowest = log.lowest_offset();
    assert!(lowest <= 5, "truncate never drops offsets at or above the requested lowest");
    assert!(log.read(lowest).unwrap().value == format!("rec-{lowest}").as_bytes());
    for offset in 0..lowest {
        assert!(log.read(offset).is_err(), "offset {offset} should have been dropped");
    }

    let next = log.append(rec(b"rec-10")).unwrap();
    assert_eq!(next, 10);
}
