//! Read-command translation.
//!
//! Point reads share the `CMD KEY [SUBKEY]*` shape; range reads parse
//! bounds supporting `+inf` / `-inf` sentinels and a leading `(` for
//! exclusive ends. An absent `(` means inclusive.

use super::request::{
    BoundValue, DataType, GetKind, KeyValue, RangeBound, RangeKind, RangeSpec, ReadRequest,
    ReadVerb, SubKey,
};
use super::{arg_eq_ignore_case, parse_i32, parse_i64, parse_f64};
use crate::core::error::{Result, Status};
use bytes::Bytes;
use std::collections::BTreeSet;

const POSITIVE_INFINITY: &str = "+inf";
const NEGATIVE_INFINITY: &str = "-inf";

pub(super) fn parse_get(args: &[Bytes]) -> Result<ReadRequest> {
    if args[1].is_empty() {
        return Err(Status::invalid_command(
            "A GET request must have non empty key field",
        ));
    }
    Ok(ReadRequest {
        kv: keyed(&args[1]),
        verb: ReadVerb::Get(GetKind::Get),
    })
}

pub(super) fn parse_mget(_args: &[Bytes]) -> Result<ReadRequest> {
    Err(Status::invalid_command("MGET command not yet supported"))
}

/// `CMD KEY [SUBKEY]*` family: HGET, HMGET, HGETALL, HSTRLEN, HEXISTS,
/// SMEMBERS, SISMEMBER, cardinalities. Membership-style commands
/// collapse duplicate subkeys; the rest keep order.
pub(super) fn parse_hget_like(
    args: &[Bytes],
    kind: GetKind,
    remove_duplicates: bool,
) -> Result<ReadRequest> {
    let subkeys = if remove_duplicates {
        let set: BTreeSet<Bytes> = args[2..].iter().cloned().collect();
        set.into_iter().map(SubKey::Str).collect()
    } else {
        args[2..].iter().cloned().map(SubKey::Str).collect()
    };
    Ok(ReadRequest {
        kv: KeyValue {
            key: args[1].clone(),
            data_type: DataType::None,
            subkeys,
            values: Vec::new(),
        },
        verb: ReadVerb::Get(kind),
    })
}

pub(super) fn parse_tsget(args: &[Bytes]) -> Result<ReadRequest> {
    let timestamp = parse_i64(&args[2], "timestamp")?;
    Ok(ReadRequest {
        kv: KeyValue {
            key: args[1].clone(),
            data_type: DataType::None,
            subkeys: vec![SubKey::Timestamp(timestamp)],
            values: Vec::new(),
        },
        verb: ReadVerb::Get(GetKind::TsGet),
    })
}

// TSLASTN is a TSRANGEBYTIME over (-inf, +inf) with an entry limit,
// returning the highest N timestamps.
pub(super) fn parse_tslastn(args: &[Bytes]) -> Result<ReadRequest> {
    let limit = parse_i32(&args[2], "limit")?;
    Ok(ReadRequest {
        kv: keyed(&args[1]),
        verb: ReadVerb::Range(RangeSpec {
            kind: RangeKind::ByTime,
            lower: RangeBound::negative_infinity(),
            upper: RangeBound::positive_infinity(),
            with_scores: false,
            limit: Some(limit),
        }),
    })
}

pub(super) fn parse_tsrangebytime(args: &[Bytes]) -> Result<ReadRequest> {
    let lower = parse_subkey_bound(&args[2], RangeKind::ByTime)?;
    let upper = parse_subkey_bound(&args[3], RangeKind::ByTime)?;
    Ok(ReadRequest {
        kv: keyed(&args[1]),
        verb: ReadVerb::Range(RangeSpec {
            kind: RangeKind::ByTime,
            lower,
            upper,
            with_scores: false,
            limit: None,
        }),
    })
}

pub(super) fn parse_zrangebyscore(args: &[Bytes]) -> Result<ReadRequest> {
    let lower = parse_subkey_bound(&args[2], RangeKind::ByScore)?;
    let upper = parse_subkey_bound(&args[3], RangeKind::ByScore)?;
    let with_scores = if args.len() == 5 {
        parse_with_scores(&args[4])?
    } else {
        false
    };
    Ok(ReadRequest {
        kv: keyed(&args[1]),
        verb: ReadVerb::Range(RangeSpec {
            kind: RangeKind::ByScore,
            lower,
            upper,
            with_scores,
            limit: None,
        }),
    })
}

pub(super) fn parse_zrevrange(args: &[Bytes]) -> Result<ReadRequest> {
    let lower = parse_index_bound(&args[2])?;
    let upper = parse_index_bound(&args[3])?;
    let with_scores = if args.len() == 5 {
        parse_with_scores(&args[4])?
    } else {
        false
    };
    Ok(ReadRequest {
        kv: keyed(&args[1]),
        verb: ReadVerb::Range(RangeSpec {
            kind: RangeKind::RevByIndex,
            lower,
            upper,
            with_scores,
            limit: None,
        }),
    })
}

pub(super) fn parse_strlen(args: &[Bytes]) -> Result<ReadRequest> {
    Ok(ReadRequest {
        kv: keyed(&args[1]),
        verb: ReadVerb::StrLen,
    })
}

// Checking existence of a single key.
pub(super) fn parse_exists(args: &[Bytes]) -> Result<ReadRequest> {
    Ok(ReadRequest {
        kv: keyed(&args[1]),
        verb: ReadVerb::Exists,
    })
}

pub(super) fn parse_getrange(args: &[Bytes]) -> Result<ReadRequest> {
    let start = parse_i32(&args[2], "Start")?;
    let end = parse_i32(&args[3], "End")?;
    Ok(ReadRequest {
        kv: keyed(&args[1]),
        verb: ReadVerb::GetRange { start, end },
    })
}

/// A timestamp or score bound: `(` prefix marks exclusive, `+inf` and
/// `-inf` are accepted sentinels.
fn parse_subkey_bound(arg: &Bytes, kind: RangeKind) -> Result<RangeBound> {
    if arg.is_empty() {
        return Err(Status::invalid_command("range bound key cannot be empty"));
    }
    if arg[0] == b'(' && arg.len() > 1 {
        parse_bound_value(&arg.slice(1..), kind, true)
    } else {
        parse_bound_value(arg, kind, false)
    }
}

fn parse_bound_value(arg: &Bytes, kind: RangeKind, exclusive: bool) -> Result<RangeBound> {
    if arg_eq_ignore_case(arg, POSITIVE_INFINITY) {
        return Ok(RangeBound::positive_infinity());
    }
    if arg_eq_ignore_case(arg, NEGATIVE_INFINITY) {
        return Ok(RangeBound::negative_infinity());
    }
    let value = match kind {
        RangeKind::ByTime => BoundValue::Timestamp(parse_i64(arg, "timestamp bound")?),
        RangeKind::ByScore => BoundValue::Score(parse_f64(arg, "score bound")?),
        RangeKind::RevByIndex => BoundValue::Index(parse_i64(arg, "index bound")?),
    };
    Ok(RangeBound {
        value: Some(value),
        infinity: None,
        exclusive,
    })
}

fn parse_index_bound(arg: &Bytes) -> Result<RangeBound> {
    if arg.is_empty() {
        return Err(Status::invalid_argument("range bound index cannot be empty"));
    }
    if arg[0] == b'(' && arg.len() > 1 {
        parse_bound_value(&arg.slice(1..), RangeKind::RevByIndex, true)
    } else {
        parse_bound_value(arg, RangeKind::RevByIndex, false)
    }
}

fn parse_with_scores(arg: &Bytes) -> Result<bool> {
    if !arg_eq_ignore_case(arg, "WITHSCORES") {
        return Err(Status::invalid_argument(format!(
            "unexpected argument {:?}",
            String::from_utf8_lossy(arg)
        )));
    }
    Ok(true)
}

fn keyed(key: &Bytes) -> KeyValue {
    KeyValue {
        key: key.clone(),
        data_type: DataType::None,
        subkeys: Vec::new(),
        values: Vec::new(),
    }
}
