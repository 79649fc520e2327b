//! Command translation behavior tests.
//!
//! Drives the parser and translator together the way a connection
//! does, plus the flag matrices the unit tests do not cover.

mod common;

use bytes::Bytes;
use tessera::core::error::Status;
use tessera::translate::{
    translate, DataType, GetKind, RangeKind, ReadVerb, SubKey, TranslatedRequest, WriteMode,
    WriteVerb, MAX_TTL_SECONDS,
};
use tessera::wire::{encode_command, CommandParser};

fn cmd(parts: &[&str]) -> Vec<Bytes> {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

// ============================================================================
// Parser to translator pipeline
// ============================================================================

#[test]
fn parsed_command_translates() {
    let mut parser = CommandParser::new();
    parser.update(&[encode_command(&cmd(&["SET", "k", "v", "EX", "30"]))]);
    assert!(parser.next_command().unwrap() > 0);

    let request = translate(parser.args()).unwrap();
    match request {
        TranslatedRequest::Write(write) => {
            assert_eq!(write.kv.data_type, DataType::String);
            match write.verb {
                WriteVerb::Set(spec) => assert_eq!(spec.ttl_ms, Some(30_000)),
                other => panic!("unexpected verb {:?}", other),
            }
        }
        other => panic!("expected write, got {:?}", other),
    }
}

#[test]
fn translation_error_leaves_connection_usable() {
    // Two commands on one connection; the first fails translation, the
    // second still parses and translates.
    let mut stream = encode_command(&cmd(&["ZADD", "z", "NX", "XX", "1", "a"])).to_vec();
    stream.extend_from_slice(&encode_command(&cmd(&["GET", "k"])));

    let mut parser = CommandParser::new();
    parser.update(&[Bytes::from(stream)]);

    assert!(parser.next_command().unwrap() > 0);
    assert!(translate(parser.args()).is_err());

    assert!(parser.next_command().unwrap() > 0);
    assert!(translate(parser.args()).is_ok());
}

// ============================================================================
// Sorted set flag matrix
// ============================================================================

#[test]
fn zadd_flag_matrix() {
    // NX XX together: invalid.
    let err = translate(&cmd(&["ZADD", "k", "NX", "XX", "1", "a"])).unwrap_err();
    assert!(matches!(err, Status::InvalidArgument(_)));

    // INCR with two pairs: invalid.
    let err = translate(&cmd(&["ZADD", "k", "INCR", "1", "a", "2", "b"])).unwrap_err();
    assert!(matches!(err, Status::InvalidArgument(_)));

    // CH with two pairs: ok, options carried through.
    match translate(&cmd(&["ZADD", "k", "CH", "1", "a", "2", "b"])).unwrap() {
        TranslatedRequest::Write(write) => match write.verb {
            WriteVerb::Set(spec) => {
                let options = spec.sorted_set.expect("sorted set options");
                assert!(options.ch);
                assert_eq!(options.mode, WriteMode::Upsert);
            }
            other => panic!("unexpected verb {:?}", other),
        },
        other => panic!("expected write, got {:?}", other),
    }

    // Duplicate flags behave like a single one.
    assert!(translate(&cmd(&["ZADD", "k", "NX", "NX", "1", "a"])).is_ok());
}

// ============================================================================
// TTL bounds
// ============================================================================

#[test]
fn ttl_boundaries() {
    assert!(translate(&cmd(&["SET", "k", "v", "EX", "1"])).is_ok());
    assert!(translate(&cmd(&["SET", "k", "v", "EX", "0"])).is_err());

    let max = MAX_TTL_SECONDS.to_string();
    assert!(translate(&cmd(&["SET", "k", "v", "EX", &max])).is_ok());
    let over = (MAX_TTL_SECONDS + 1).to_string();
    assert!(translate(&cmd(&["SET", "k", "v", "EX", &over])).is_err());

    // Timeseries expiry honors the same bounds.
    assert!(translate(&cmd(&["TSADD", "t", "1", "v", "EXPIREIN", "1"])).is_ok());
    assert!(translate(&cmd(&["TSADD", "t", "1", "v", "EXPIREIN", "0"])).is_err());
}

// ============================================================================
// Range reads
// ============================================================================

#[test]
fn range_bound_forms() {
    match translate(&cmd(&["ZRANGEBYSCORE", "z", "(1", "+inf", "WITHSCORES"])).unwrap() {
        TranslatedRequest::Read(read) => match read.verb {
            ReadVerb::Range(spec) => {
                assert_eq!(spec.kind, RangeKind::ByScore);
                assert!(spec.lower.exclusive);
                assert!(spec.upper.infinity.is_some());
                assert!(spec.with_scores);
            }
            other => panic!("unexpected verb {:?}", other),
        },
        other => panic!("expected read, got {:?}", other),
    }

    // Too many arguments.
    assert!(translate(&cmd(&["ZRANGEBYSCORE", "z", "1", "2", "WITHSCORES", "x"])).is_err());
}

#[test]
fn membership_reads_dedup_but_hmget_keeps_order() {
    match translate(&cmd(&["HMGET", "h", "b", "a", "b"])).unwrap() {
        TranslatedRequest::Read(read) => {
            assert_eq!(read.verb, ReadVerb::Get(GetKind::HMGet));
            assert_eq!(read.kv.subkeys.len(), 3);
            assert!(matches!(&read.kv.subkeys[0], SubKey::Str(b) if b.as_ref() == b"b"));
        }
        other => panic!("expected read, got {:?}", other),
    }
}
