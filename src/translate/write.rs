//! Write-command translation.
//!
//! Each parser produces a [`WriteRequest`] from the raw argument
//! vector. Argument zero is the command name; shape errors surface as
//! `InvalidCommand`, token-level errors as `InvalidArgument`.

use super::request::{
    DataType, KeyValue, SetSpec, SortedSetOptions, SubKey, WriteMode, WriteRequest, WriteVerb,
};
use super::{
    arg_eq_ignore_case, check_ttl_seconds, current_time_seconds, lower, parse_i32, parse_i64,
    parse_f64, MILLISECONDS_PER_SECOND,
};
use crate::core::error::{Result, Status};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};

pub(super) fn parse_set(args: &[Bytes]) -> Result<WriteRequest> {
    if args.len() < 3 {
        return Err(Status::invalid_command(format!(
            "wrong number of arguments: {} for command: set",
            args.len()
        )));
    }
    if args[1].is_empty() {
        return Err(Status::invalid_command(
            "A SET request must have a non empty key field",
        ));
    }

    let mut spec = SetSpec::default();
    let mut idx = 3;
    while idx < args.len() {
        let flag = lower(&args[idx]);
        match flag.as_str() {
            "ex" | "px" => {
                if args.len() < idx + 2 {
                    return Err(Status::invalid_command(
                        "Expected TTL field after the EX flag, no value found",
                    ));
                }
                let ttl = parse_i64(&args[idx + 1], "TTL")?;
                check_ttl_seconds(ttl, &String::from_utf8_lossy(&args[idx + 1]))?;
                let per_unit = if flag == "ex" { MILLISECONDS_PER_SECOND } else { 1 };
                spec.ttl_ms = Some(ttl * per_unit);
                idx += 2;
            }
            "xx" => {
                if spec.mode == WriteMode::Insert {
                    return Err(Status::invalid_command(
                        "XX and NX options at the same time are not compatible",
                    ));
                }
                spec.mode = WriteMode::Update;
                idx += 1;
            }
            "nx" => {
                if spec.mode == WriteMode::Update {
                    return Err(Status::invalid_command(
                        "XX and NX options at the same time are not compatible",
                    ));
                }
                spec.mode = WriteMode::Insert;
                idx += 1;
            }
            _ => {
                return Err(Status::invalid_command(format!(
                    "Unidentified argument {:?} found while parsing set command",
                    String::from_utf8_lossy(&args[idx])
                )));
            }
        }
    }

    Ok(WriteRequest {
        kv: KeyValue {
            key: args[1].clone(),
            data_type: DataType::String,
            subkeys: Vec::new(),
            values: vec![args[2].clone()],
        },
        verb: WriteVerb::Set(spec),
    })
}

pub(super) fn parse_mset(args: &[Bytes]) -> Result<WriteRequest> {
    if args.len() < 3 || args.len() % 2 == 0 {
        return Err(Status::invalid_command(format!(
            "An MSET request must have at least 3, odd number of arguments, found {}",
            args.len()
        )));
    }
    Err(Status::invalid_command("MSET command not yet supported"))
}

pub(super) fn parse_getset(args: &[Bytes]) -> Result<WriteRequest> {
    Ok(WriteRequest {
        kv: string_kv(&args[1], &args[2]),
        verb: WriteVerb::GetSet,
    })
}

pub(super) fn parse_append(args: &[Bytes]) -> Result<WriteRequest> {
    Ok(WriteRequest {
        kv: string_kv(&args[1], &args[2]),
        verb: WriteVerb::Append,
    })
}

pub(super) fn parse_setrange(args: &[Bytes]) -> Result<WriteRequest> {
    let offset = parse_i32(&args[2], "offset")?;
    if offset < 0 {
        return Err(Status::invalid_argument(format!(
            "offset field of SETRANGE must be non-negative, found: {}",
            offset
        )));
    }
    Ok(WriteRequest {
        kv: string_kv(&args[1], &args[3]),
        verb: WriteVerb::SetRange { offset },
    })
}

pub(super) fn parse_incr(args: &[Bytes]) -> Result<WriteRequest> {
    Ok(WriteRequest {
        kv: KeyValue {
            key: args[1].clone(),
            data_type: DataType::String,
            subkeys: Vec::new(),
            values: Vec::new(),
        },
        verb: WriteVerb::Incr { by: 1 },
    })
}

pub(super) fn parse_incrby(args: &[Bytes]) -> Result<WriteRequest> {
    let by = parse_i64(&args[2], "INCR_BY")?;
    Ok(WriteRequest {
        kv: KeyValue {
            key: args[1].clone(),
            data_type: DataType::String,
            subkeys: Vec::new(),
            values: Vec::new(),
        },
        verb: WriteVerb::Incr { by },
    })
}

// Deleting a single top-level key; applies to every data type.
pub(super) fn parse_del(args: &[Bytes]) -> Result<WriteRequest> {
    Ok(WriteRequest {
        kv: KeyValue {
            key: args[1].clone(),
            data_type: DataType::None,
            subkeys: Vec::new(),
            values: Vec::new(),
        },
        verb: WriteVerb::Del,
    })
}

pub(super) fn parse_hset(args: &[Bytes]) -> Result<WriteRequest> {
    Ok(WriteRequest {
        kv: KeyValue {
            key: args[1].clone(),
            data_type: DataType::Hash,
            subkeys: vec![SubKey::Str(args[2].clone())],
            values: vec![args[3].clone()],
        },
        verb: WriteVerb::Set(SetSpec::default()),
    })
}

pub(super) fn parse_hincrby(args: &[Bytes]) -> Result<WriteRequest> {
    let by = parse_i64(&args[3], "INCR_BY")?;
    Ok(WriteRequest {
        kv: KeyValue {
            key: args[1].clone(),
            data_type: DataType::Hash,
            subkeys: vec![SubKey::Str(args[2].clone())],
            values: Vec::new(),
        },
        verb: WriteVerb::Incr { by },
    })
}

pub(super) fn parse_hmset(args: &[Bytes]) -> Result<WriteRequest> {
    if args.len() < 4 || args.len() % 2 == 1 {
        return Err(Status::invalid_argument(format!(
            "wrong number of arguments: {} for command: {}",
            args.len(),
            lower(&args[0])
        )));
    }
    // Fields deduplicate with the last value winning.
    let mut pairs: BTreeMap<Bytes, Bytes> = BTreeMap::new();
    let mut i = 2;
    while i < args.len() {
        pairs.insert(args[i].clone(), args[i + 1].clone());
        i += 2;
    }
    let mut kv = KeyValue {
        key: args[1].clone(),
        data_type: DataType::Hash,
        subkeys: Vec::with_capacity(pairs.len()),
        values: Vec::with_capacity(pairs.len()),
    };
    for (field, value) in pairs {
        kv.subkeys.push(SubKey::Str(field));
        kv.values.push(value);
    }
    Ok(WriteRequest {
        kv,
        verb: WriteVerb::Set(SetSpec {
            expect_ok_response: true,
            ..Default::default()
        }),
    })
}

pub(super) fn parse_tsadd(args: &[Bytes]) -> Result<WriteRequest> {
    if args.len() < 4 {
        return Err(Status::invalid_argument(format!(
            "wrong number of arguments: {} for command: {}",
            args.len(),
            lower(&args[0])
        )));
    }

    let mut spec = SetSpec::default();
    let mut pairs: BTreeMap<i64, Bytes> = BTreeMap::new();
    let mut i = 2;
    while i < args.len() {
        if arg_eq_ignore_case(&args[i], "EXPIREAT") || arg_eq_ignore_case(&args[i], "EXPIREIN") {
            // The expiry clause must be the final pair of the command.
            if i + 2 != args.len() {
                return Err(Status::invalid_command(format!(
                    "{} should be at the end of the command",
                    String::from_utf8_lossy(&args[i])
                )));
            }
            let raw = parse_i64(&args[i + 1], "TTL")?;
            let ttl = if arg_eq_ignore_case(&args[i], "EXPIREIN") {
                raw
            } else {
                raw - current_time_seconds()
            };
            if check_ttl_seconds(ttl, &ttl.to_string()).is_err() {
                return Err(Status::invalid_command(format!(
                    "TTL: {} needs be in the range [{}, {}]",
                    ttl,
                    super::MIN_TTL_SECONDS,
                    super::MAX_TTL_SECONDS
                )));
            }
            spec.ttl_ms = Some(ttl * MILLISECONDS_PER_SECOND);
            i += 2;
            continue;
        }
        if i + 1 >= args.len() {
            return Err(Status::invalid_argument(format!(
                "Expect even and non-zero number of arguments for command: {}, found {}",
                lower(&args[0]),
                args.len() - 2
            )));
        }
        let ts = parse_i64(&args[i], "timestamp")?;
        pairs.insert(ts, args[i + 1].clone());
        i += 2;
    }
    if pairs.is_empty() {
        return Err(Status::invalid_argument(format!(
            "Expect even and non-zero number of arguments for command: {}, found 0",
            lower(&args[0])
        )));
    }

    let mut kv = KeyValue {
        key: args[1].clone(),
        data_type: DataType::Timeseries,
        subkeys: Vec::with_capacity(pairs.len()),
        values: Vec::with_capacity(pairs.len()),
    };
    for (ts, value) in pairs {
        kv.subkeys.push(SubKey::Timestamp(ts));
        kv.values.push(value);
    }
    Ok(WriteRequest {
        kv,
        verb: WriteVerb::Set(spec),
    })
}

/// Flag scan at the head of ZADD: advances `idx` past any of
/// CH / INCR / NX / XX. Duplicated flags behave like a single one.
fn parse_zadd_options(args: &[Bytes], idx: &mut usize) -> Result<SortedSetOptions> {
    let mut options = SortedSetOptions::default();
    while *idx < args.len() {
        if arg_eq_ignore_case(&args[*idx], "CH") {
            options.ch = true;
        } else if arg_eq_ignore_case(&args[*idx], "INCR") {
            options.incr = true;
        } else if arg_eq_ignore_case(&args[*idx], "NX") {
            if options.mode == WriteMode::Update {
                return Err(Status::invalid_argument(
                    "XX and NX options at the same time are not compatible",
                ));
            }
            options.mode = WriteMode::Insert;
        } else if arg_eq_ignore_case(&args[*idx], "XX") {
            if options.mode == WriteMode::Insert {
                return Err(Status::invalid_argument(
                    "XX and NX options at the same time are not compatible",
                ));
            }
            options.mode = WriteMode::Update;
        } else {
            break;
        }
        *idx += 1;
    }
    Ok(options)
}

pub(super) fn parse_zadd(args: &[Bytes]) -> Result<WriteRequest> {
    if args.len() < 4 {
        return Err(Status::invalid_argument(format!(
            "wrong number of arguments: {} for command: {}",
            args.len(),
            lower(&args[0])
        )));
    }

    let mut start_idx = 2;
    let options = parse_zadd_options(args, &mut start_idx)?;

    if options.incr && args.len() - start_idx != 2 {
        return Err(Status::invalid_argument(format!(
            "wrong number of tokens after INCR flag specified: Need 2 but found {} for command: {}",
            args.len() - start_idx,
            lower(&args[0])
        )));
    }
    if (args.len() - start_idx) % 2 == 1 || args.len() - start_idx == 0 {
        return Err(Status::invalid_argument(format!(
            "Expect even and non-zero number of arguments for command: {}, found {}",
            lower(&args[0]),
            args.len() - start_idx
        )));
    }

    // Members are distinct, scores are not: deduplicate by member with
    // the last score winning.
    let mut by_member: BTreeMap<Bytes, f64> = BTreeMap::new();
    let mut i = start_idx;
    while i < args.len() {
        let score = parse_f64(&args[i], "score")?;
        by_member.insert(args[i + 1].clone(), score);
        i += 2;
    }

    let mut kv = KeyValue {
        key: args[1].clone(),
        data_type: DataType::SortedSet,
        subkeys: Vec::with_capacity(by_member.len()),
        values: Vec::with_capacity(by_member.len()),
    };
    for (member, score) in by_member {
        kv.subkeys.push(SubKey::Score(score));
        kv.values.push(member);
    }
    Ok(WriteRequest {
        kv,
        verb: WriteVerb::Set(SetSpec {
            sorted_set: Some(options),
            ..Default::default()
        }),
    })
}

pub(super) fn parse_hdel(args: &[Bytes]) -> Result<WriteRequest> {
    collection_write(args, DataType::Hash, WriteVerb::Del, SubKeyKind::Str)
}

pub(super) fn parse_tsrem(args: &[Bytes]) -> Result<WriteRequest> {
    collection_write(args, DataType::Timeseries, WriteVerb::Del, SubKeyKind::Timestamp)
}

pub(super) fn parse_zrem(args: &[Bytes]) -> Result<WriteRequest> {
    collection_write(args, DataType::SortedSet, WriteVerb::Del, SubKeyKind::Str)
}

pub(super) fn parse_sadd(args: &[Bytes]) -> Result<WriteRequest> {
    collection_write(args, DataType::Set, WriteVerb::Add, SubKeyKind::Str)
}

pub(super) fn parse_srem(args: &[Bytes]) -> Result<WriteRequest> {
    collection_write(args, DataType::Set, WriteVerb::Del, SubKeyKind::Str)
}

enum SubKeyKind {
    Str,
    Timestamp,
}

/// `CMD KEY SUBKEY [SUBKEY]*` with idempotent membership semantics:
/// duplicate subkeys collapse.
fn collection_write(
    args: &[Bytes],
    data_type: DataType,
    verb: WriteVerb,
    kind: SubKeyKind,
) -> Result<WriteRequest> {
    let subkeys = match kind {
        SubKeyKind::Str => {
            let set: BTreeSet<Bytes> = args[2..].iter().cloned().collect();
            set.into_iter().map(SubKey::Str).collect()
        }
        SubKeyKind::Timestamp => {
            let mut set = BTreeSet::new();
            for arg in &args[2..] {
                set.insert(parse_i64(arg, "timestamp")?);
            }
            set.into_iter().map(SubKey::Timestamp).collect()
        }
    };
    Ok(WriteRequest {
        kv: KeyValue {
            key: args[1].clone(),
            data_type,
            subkeys,
            values: Vec::new(),
        },
        verb,
    })
}

fn string_kv(key: &Bytes, value: &Bytes) -> KeyValue {
    KeyValue {
        key: key.clone(),
        data_type: DataType::String,
        subkeys: Vec::new(),
        values: vec![value.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::super::{translate, TranslatedRequest, MAX_TTL_SECONDS};
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<Bytes> {
        parts
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect()
    }

    fn write(parts: &[&str]) -> WriteRequest {
        match translate(&cmd(parts)).unwrap() {
            TranslatedRequest::Write(w) => w,
            other => panic!("expected write, got {:?}", other),
        }
    }

    #[test]
    fn test_set_basic() {
        let req = write(&["SET", "k", "v"]);
        assert_eq!(req.kv.key.as_ref(), b"k");
        assert_eq!(req.kv.values[0].as_ref(), b"v");
        match req.verb {
            WriteVerb::Set(spec) => {
                assert_eq!(spec.ttl_ms, None);
                assert_eq!(spec.mode, WriteMode::Upsert);
            }
            other => panic!("unexpected verb {:?}", other),
        }
    }

    #[test]
    fn test_set_empty_key_rejected() {
        let err = translate(&cmd(&["SET", "", "v"])).unwrap_err();
        assert!(matches!(err, Status::InvalidCommand(_)));
    }

    #[test]
    fn test_set_ex_normalizes_to_millis() {
        let req = write(&["SET", "k", "v", "EX", "10"]);
        match req.verb {
            WriteVerb::Set(spec) => assert_eq!(spec.ttl_ms, Some(10_000)),
            other => panic!("unexpected verb {:?}", other),
        }
    }

    #[test]
    fn test_set_px_keeps_millis() {
        let req = write(&["SET", "k", "v", "px", "500"]);
        match req.verb {
            WriteVerb::Set(spec) => assert_eq!(spec.ttl_ms, Some(500)),
            other => panic!("unexpected verb {:?}", other),
        }
    }

    #[test]
    fn test_set_ttl_bounds() {
        // Just inside.
        assert!(translate(&cmd(&["SET", "k", "v", "EX", "1"])).is_ok());
        let max = MAX_TTL_SECONDS.to_string();
        assert!(translate(&cmd(&["SET", "k", "v", "EX", &max])).is_ok());
        // Just outside.
        assert!(translate(&cmd(&["SET", "k", "v", "EX", "0"])).is_err());
        let over = (MAX_TTL_SECONDS + 1).to_string();
        assert!(translate(&cmd(&["SET", "k", "v", "EX", &over])).is_err());
    }

    #[test]
    fn test_set_nx_xx_conflict() {
        assert!(translate(&cmd(&["SET", "k", "v", "NX", "XX"])).is_err());
        let req = write(&["SET", "k", "v", "XX"]);
        match req.verb {
            WriteVerb::Set(spec) => assert_eq!(spec.mode, WriteMode::Update),
            other => panic!("unexpected verb {:?}", other),
        }
    }

    #[test]
    fn test_set_unknown_flag_rejected() {
        let err = translate(&cmd(&["SET", "k", "v", "KEEPTTL"])).unwrap_err();
        assert!(matches!(err, Status::InvalidCommand(_)));
    }

    #[test]
    fn test_mset_unsupported() {
        let err = translate(&cmd(&["MSET", "a", "1", "b", "2"])).unwrap_err();
        assert!(matches!(err, Status::InvalidCommand(_)));
    }

    #[test]
    fn test_hmset_pairs_dedup_last_wins() {
        let req = write(&["HMSET", "h", "f1", "old", "f2", "x", "f1", "new"]);
        assert_eq!(req.kv.subkeys.len(), 2);
        let f1_index = req
            .kv
            .subkeys
            .iter()
            .position(|s| matches!(s, SubKey::Str(b) if b.as_ref() == b"f1"))
            .unwrap();
        assert_eq!(req.kv.values[f1_index].as_ref(), b"new");
    }

    #[test]
    fn test_hmset_odd_pairs_rejected() {
        let err = translate(&cmd(&["HMSET", "h", "f1", "v1", "f2"])).unwrap_err();
        assert!(matches!(err, Status::InvalidArgument(_)));
    }

    #[test]
    fn test_zadd_nx_xx_conflict() {
        let err = translate(&cmd(&["ZADD", "z", "NX", "XX", "1", "a"])).unwrap_err();
        assert!(matches!(err, Status::InvalidArgument(_)));
    }

    #[test]
    fn test_zadd_incr_requires_single_pair() {
        let err = translate(&cmd(&["ZADD", "z", "INCR", "1", "a", "2", "b"])).unwrap_err();
        assert!(matches!(err, Status::InvalidArgument(_)));
        assert!(translate(&cmd(&["ZADD", "z", "INCR", "1", "a"])).is_ok());
    }

    #[test]
    fn test_zadd_ch_with_pairs() {
        let req = write(&["ZADD", "z", "CH", "1", "a", "2", "b"]);
        match req.verb {
            WriteVerb::Set(spec) => {
                let opts = spec.sorted_set.unwrap();
                assert!(opts.ch);
                assert!(!opts.incr);
            }
            other => panic!("unexpected verb {:?}", other),
        }
        assert_eq!(req.kv.subkeys.len(), 2);
    }

    #[test]
    fn test_zadd_member_dedup_last_score_wins() {
        let req = write(&["ZADD", "z", "1", "a", "5", "a"]);
        assert_eq!(req.kv.subkeys.len(), 1);
        assert!(matches!(req.kv.subkeys[0], SubKey::Score(s) if s == 5.0));
        assert_eq!(req.kv.values[0].as_ref(), b"a");
    }

    #[test]
    fn test_zadd_rejects_non_finite_score() {
        assert!(translate(&cmd(&["ZADD", "z", "nan", "a"])).is_err());
    }

    #[test]
    fn test_tsadd_expirein_must_be_last() {
        let err = translate(&cmd(&["TSADD", "t", "EXPIREIN", "60", "1", "v"])).unwrap_err();
        assert!(matches!(err, Status::InvalidCommand(_)));
        let req = write(&["TSADD", "t", "1", "v", "EXPIREIN", "60"]);
        match req.verb {
            WriteVerb::Set(spec) => assert_eq!(spec.ttl_ms, Some(60_000)),
            other => panic!("unexpected verb {:?}", other),
        }
    }

    #[test]
    fn test_tsadd_ttl_out_of_bounds_rejected() {
        let err = translate(&cmd(&["TSADD", "t", "1", "v", "EXPIREIN", "0"])).unwrap_err();
        assert!(matches!(err, Status::InvalidCommand(_)));
    }

    #[test]
    fn test_tsadd_timestamps_sorted_and_deduped() {
        let req = write(&["TSADD", "t", "30", "c", "10", "a", "30", "d"]);
        assert_eq!(req.kv.subkeys.len(), 2);
        assert!(matches!(req.kv.subkeys[0], SubKey::Timestamp(10)));
        assert!(matches!(req.kv.subkeys[1], SubKey::Timestamp(30)));
        assert_eq!(req.kv.values[1].as_ref(), b"d");
    }

    #[test]
    fn test_sadd_dedups_members() {
        let req = write(&["SADD", "s", "b", "a", "b"]);
        assert_eq!(req.kv.subkeys.len(), 2);
        assert_eq!(req.verb, WriteVerb::Add);
    }

    #[test]
    fn test_del_applies_to_any_type() {
        let req = write(&["DEL", "k"]);
        assert_eq!(req.kv.data_type, DataType::None);
        assert_eq!(req.verb, WriteVerb::Del);
    }

    #[test]
    fn test_setrange_negative_offset_rejected() {
        let err = translate(&cmd(&["SETRANGE", "k", "-1", "v"])).unwrap_err();
        assert!(matches!(err, Status::InvalidArgument(_)));
    }

    #[test]
    fn test_incrby_parses_delta() {
        let req = write(&["INCRBY", "k", "-7"]);
        assert_eq!(req.verb, WriteVerb::Incr { by: -7 });
    }

    #[test]
    fn test_hincrby_carries_subkey() {
        let req = write(&["HINCRBY", "h", "f", "3"]);
        assert_eq!(req.verb, WriteVerb::Incr { by: 3 });
        assert!(matches!(&req.kv.subkeys[0], SubKey::Str(b) if b.as_ref() == b"f"));
    }
}
