//! End-to-end scenarios against `Engine::dispatch`, independent of the network transport.

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use lumen_core::clock::{Clock, FakeClock};
use lumen_core::{Engine, Request, Response};

fn open(dir: &std::path::Path, clock: Arc<dyn Clock>) -> Engine {
    Engine::open_with_clock(dir, false, clock).unwrap()
}

#[test]
fn set_get_del_get_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path(), Arc::new(FakeClock::new(0)));

    assert_eq!(
        engine.dispatch(Request::Set {
            key: b"hello".to_vec(),
            value: b"world".to_vec(),
        }),
        Response::Ok
    );
    assert_eq!(
        engine.dispatch(Request::Get {
            key: b"hello".to_vec()
        }),
        Response::Value(Bytes::from_static(b"world"))
    );
    assert_eq!(
        engine.dispatch(Request::Del {
            key: b"hello".to_vec()
        }),
        Response::Int(1)
    );
    assert_eq!(
        engine.dispatch(Request::Get {
            key: b"hello".to_vec()
        }),
        Response::NotFound
    );
}

#[test]
fn setex_expires_after_ttl_tick() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FakeClock::new(0));
    let engine = open(dir.path(), clock.clone());

    assert_eq!(
        engine.dispatch(Request::SetEx {
            key: b"temp".to_vec(),
            ttl_secs: 1,
            value: b"x".to_vec(),
        }),
        Response::Ok
    );
    clock.advance(1200);
    assert_eq!(
        engine.dispatch(Request::Get {
            key: b"temp".to_vec()
        }),
        Response::NotFound
    );
}

#[test]
fn two_writers_then_restart_recovers_both() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = open(dir.path(), Arc::new(FakeClock::new(0)));
        engine.dispatch(Request::Set {
            key: b"a".to_vec(),
            value: b"1".to_vec(),
        });
        engine.dispatch(Request::Set {
            key: b"b".to_vec(),
            value: b"2".to_vec(),
        });
    }

    let engine = open(dir.path(), Arc::new(FakeClock::new(0)));
    assert_eq!(
        engine.dispatch(Request::Get { key: b"a".to_vec() }),
        Response::Value(Bytes::from_static(b"1"))
    );
    assert_eq!(
        engine.dispatch(Request::Get { key: b"b".to_vec() }),
        Response::Value(Bytes::from_static(b"2"))
    );
}

#[test]
fn fifty_concurrent_writers_each_see_their_own_value() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path(), Arc::new(FakeClock::new(0)));

    let handles: Vec<_> = (0..50)
        .map(|id| {
            let engine = engine.clone();
            thread::spawn(move || {
                let key = format!("k:{id}").into_bytes();
                for _ in 0..50 {
                    engine.dispatch(Request::Set {
                        key: key.clone(),
                        value: b"x".to_vec(),
                    });
                    let resp = engine.dispatch(Request::Get { key: key.clone() });
                    assert_eq!(resp, Response::Value(Bytes::from_static(b"x")));
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn keys_prefix_match_is_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path(), Arc::new(FakeClock::new(0)));

    for (k, v) in [("alpha", "a"), ("alphabet", "b"), ("beta", "c")] {
        engine.dispatch(Request::Set {
            key: k.as_bytes().to_vec(),
            value: v.as_bytes().to_vec(),
        });
    }

    assert_eq!(
        engine.dispatch(Request::Keys {
            prefix: b"alpha".to_vec()
        }),
        Response::Array(vec!["alpha".to_string(), "alphabet".to_string()])
    );
}

#[test]
fn garbage_tail_is_skipped_and_subsequent_writes_survive_two_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("wal.log");

    {
        let engine = open(dir.path(), Arc::new(FakeClock::new(0)));
        engine.dispatch(Request::Set {
            key: b"first".to_vec(),
            value: b"1".to_vec(),
        });
    }

    // Simulate a crash-induced torn tail write: append 7 garbage bytes after the clean record.
    use std::io::Write;
    {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&wal_path)
            .unwrap();
        f.write_all(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02]).unwrap();
    }

    {
        let engine = open(dir.path(), Arc::new(FakeClock::new(0)));
        assert_eq!(
            engine.dispatch(Request::Get {
                key: b"first".to_vec()
            }),
            Response::Value(Bytes::from_static(b"1"))
        );
        engine.dispatch(Request::Set {
            key: b"second".to_vec(),
            value: b"2".to_vec(),
        });
    }

    let engine = open(dir.path(), Arc::new(FakeClock::new(0)));
    assert_eq!(
        engine.dispatch(Request::Get {
            key: b"first".to_vec()
        }),
        Response::Value(Bytes::from_static(b"1"))
    );
    assert_eq!(
        engine.dispatch(Request::Get {
            key: b"second".to_vec()
        }),
        Response::Value(Bytes::from_static(b"2"))
    );
}

#[test]
fn empty_value_set_is_legal() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path(), Arc::new(FakeClock::new(0)));

    engine.dispatch(Request::Set {
        key: b"k".to_vec(),
        value: Vec::new(),
    });
    assert_eq!(
        engine.dispatch(Request::Get { key: b"k".to_vec() }),
        Response::Value(Bytes::new())
    );
}

#[test]
fn stats_command_reports_sorted_counters() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path(), Arc::new(FakeClock::new(0)));

    engine.dispatch(Request::Ping);
    engine.dispatch(Request::Set {
        key: b"k".to_vec(),
        value: b"v".to_vec(),
    });
    engine.dispatch(Request::Get { key: b"k".to_vec() });

    match engine.dispatch(Request::Stats) {
        Response::Array(items) => {
            let names: Vec<&str> = items
                .iter()
                .map(|line| line.split_whitespace().next().unwrap())
                .collect();
            let mut sorted = names.clone();
            sorted.sort();
            assert_eq!(names, sorted);
        }
        other => panic!("expected Array, got {other:?}"),
    }
}
