//! Command translator: parsed arguments to typed request records.
//!
//! The translator validates argument shape and numeric ranges and
//! produces a [`TranslatedRequest`] for the session to buffer. Parser
//! output feeds straight in: `args[0]` is the command name, the rest
//! are raw argument bytes. All failures surface as `InvalidCommand` or
//! `InvalidArgument` carrying the offending token; the connection stays
//! alive and only the single command fails.

pub mod read;
pub mod request;
pub mod write;

pub use request::{
    BoundValue, DataType, GetKind, Infinity, KeyValue, RangeBound, RangeKind, RangeSpec,
    ReadRequest, ReadVerb, SetSpec, SortedSetOptions, SubKey, TranslatedRequest, WriteMode,
    WriteRequest, WriteVerb,
};

use crate::core::error::{Result, Status};
use bytes::Bytes;

/// Smallest accepted TTL, in seconds.
pub const MIN_TTL_SECONDS: i64 = 1;

/// Largest accepted TTL, in seconds. Chosen so that the
/// millisecond-normalized value cannot overflow downstream arithmetic.
pub const MAX_TTL_SECONDS: i64 = i64::MAX / 1_000_000;

pub(crate) const MILLISECONDS_PER_SECOND: i64 = 1000;

/// Translate one parsed command into a typed request.
pub fn translate(args: &[Bytes]) -> Result<TranslatedRequest> {
    if args.is_empty() {
        return Err(Status::invalid_command("empty command"));
    }
    let name = lower(&args[0]);
    match name.as_str() {
        // Writes.
        "set" => write::parse_set(args).map(TranslatedRequest::Write),
        "mset" => write::parse_mset(args).map(TranslatedRequest::Write),
        "getset" => with_arity(args, 3, 3, write::parse_getset).map(TranslatedRequest::Write),
        "append" => with_arity(args, 3, 3, write::parse_append).map(TranslatedRequest::Write),
        "setrange" => with_arity(args, 4, 4, write::parse_setrange).map(TranslatedRequest::Write),
        "incr" => with_arity(args, 2, 2, write::parse_incr).map(TranslatedRequest::Write),
        "incrby" => with_arity(args, 3, 3, write::parse_incrby).map(TranslatedRequest::Write),
        "del" => with_arity(args, 2, 2, write::parse_del).map(TranslatedRequest::Write),
        "hset" => with_arity(args, 4, 4, write::parse_hset).map(TranslatedRequest::Write),
        "hincrby" => with_arity(args, 4, 4, write::parse_hincrby).map(TranslatedRequest::Write),
        "hmset" => write::parse_hmset(args).map(TranslatedRequest::Write),
        "hdel" => with_min_arity(args, 3, write::parse_hdel).map(TranslatedRequest::Write),
        "sadd" => with_min_arity(args, 3, write::parse_sadd).map(TranslatedRequest::Write),
        "srem" => with_min_arity(args, 3, write::parse_srem).map(TranslatedRequest::Write),
        "zadd" => write::parse_zadd(args).map(TranslatedRequest::Write),
        "zrem" => with_min_arity(args, 3, write::parse_zrem).map(TranslatedRequest::Write),
        "tsadd" => write::parse_tsadd(args).map(TranslatedRequest::Write),
        "tsrem" => with_min_arity(args, 3, write::parse_tsrem).map(TranslatedRequest::Write),

        // Reads.
        "get" => with_arity(args, 2, 2, read::parse_get).map(TranslatedRequest::Read),
        "mget" => read::parse_mget(args).map(TranslatedRequest::Read),
        "hget" => with_arity(args, 3, 3, |a| read::parse_hget_like(a, GetKind::HGet, false))
            .map(TranslatedRequest::Read),
        "hmget" => with_min_arity(args, 3, |a| read::parse_hget_like(a, GetKind::HMGet, false))
            .map(TranslatedRequest::Read),
        "hgetall" => with_arity(args, 2, 2, |a| read::parse_hget_like(a, GetKind::HGetAll, false))
            .map(TranslatedRequest::Read),
        "hkeys" => with_arity(args, 2, 2, |a| read::parse_hget_like(a, GetKind::HKeys, false))
            .map(TranslatedRequest::Read),
        "hvals" => with_arity(args, 2, 2, |a| read::parse_hget_like(a, GetKind::HVals, false))
            .map(TranslatedRequest::Read),
        "hlen" => with_arity(args, 2, 2, |a| read::parse_hget_like(a, GetKind::HLen, false))
            .map(TranslatedRequest::Read),
        "hstrlen" => with_arity(args, 3, 3, |a| read::parse_hget_like(a, GetKind::HStrLen, false))
            .map(TranslatedRequest::Read),
        "hexists" => with_arity(args, 3, 3, |a| read::parse_hget_like(a, GetKind::HExists, false))
            .map(TranslatedRequest::Read),
        "smembers" => {
            with_arity(args, 2, 2, |a| read::parse_hget_like(a, GetKind::SMembers, true))
                .map(TranslatedRequest::Read)
        }
        "sismember" => {
            with_arity(args, 3, 3, |a| read::parse_hget_like(a, GetKind::SIsMember, true))
                .map(TranslatedRequest::Read)
        }
        "scard" => with_arity(args, 2, 2, |a| read::parse_hget_like(a, GetKind::SCard, false))
            .map(TranslatedRequest::Read),
        "zcard" => with_arity(args, 2, 2, |a| read::parse_hget_like(a, GetKind::ZCard, false))
            .map(TranslatedRequest::Read),
        "tsget" => with_arity(args, 3, 3, read::parse_tsget).map(TranslatedRequest::Read),
        "tscard" => with_arity(args, 2, 2, |a| read::parse_hget_like(a, GetKind::TsCard, false))
            .map(TranslatedRequest::Read),
        "tslastn" => with_arity(args, 3, 3, read::parse_tslastn).map(TranslatedRequest::Read),
        "tsrangebytime" => {
            with_arity(args, 4, 4, read::parse_tsrangebytime).map(TranslatedRequest::Read)
        }
        "zrangebyscore" => {
            with_arity(args, 4, 5, read::parse_zrangebyscore).map(TranslatedRequest::Read)
        }
        "zrevrange" => with_arity(args, 4, 5, read::parse_zrevrange).map(TranslatedRequest::Read),
        "strlen" => with_arity(args, 2, 2, read::parse_strlen).map(TranslatedRequest::Read),
        "exists" => with_arity(args, 2, 2, read::parse_exists).map(TranslatedRequest::Read),
        "getrange" => with_arity(args, 4, 4, read::parse_getrange).map(TranslatedRequest::Read),

        other => Err(Status::invalid_command(format!(
            "unknown command {:?}",
            other
        ))),
    }
}

fn with_arity<T>(
    args: &[Bytes],
    min: usize,
    max: usize,
    parse: impl FnOnce(&[Bytes]) -> Result<T>,
) -> Result<T> {
    if args.len() < min || args.len() > max {
        return Err(Status::invalid_command(format!(
            "wrong number of arguments: {} for command: {}",
            args.len(),
            lower(&args[0])
        )));
    }
    parse(args)
}

fn with_min_arity<T>(
    args: &[Bytes],
    min: usize,
    parse: impl FnOnce(&[Bytes]) -> Result<T>,
) -> Result<T> {
    if args.len() < min {
        return Err(Status::invalid_command(format!(
            "wrong number of arguments: {} for command: {}",
            args.len(),
            lower(&args[0])
        )));
    }
    parse(args)
}

pub(crate) fn lower(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).to_lowercase()
}

pub(crate) fn arg_eq_ignore_case(arg: &Bytes, literal: &str) -> bool {
    arg.len() == literal.len() && arg.eq_ignore_ascii_case(literal.as_bytes())
}

pub(crate) fn parse_i64(arg: &Bytes, field: &str) -> Result<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            Status::invalid_argument(format!(
                "{} field {:?} is not a valid number",
                field,
                String::from_utf8_lossy(arg)
            ))
        })
}

pub(crate) fn parse_i32(arg: &Bytes, field: &str) -> Result<i32> {
    let value = parse_i64(arg, field)?;
    i32::try_from(value).map_err(|_| {
        Status::invalid_argument(format!(
            "{} field {:?} is not within valid bounds",
            field,
            String::from_utf8_lossy(arg)
        ))
    })
}

pub(crate) fn parse_f64(arg: &Bytes, field: &str) -> Result<f64> {
    let value = std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| {
            Status::invalid_argument(format!(
                "{} field {:?} is not a valid number",
                field,
                String::from_utf8_lossy(arg)
            ))
        })?;
    if !value.is_finite() {
        return Err(Status::invalid_argument(format!(
            "{} field {:?} must be finite",
            field,
            String::from_utf8_lossy(arg)
        )));
    }
    Ok(value)
}

pub(crate) fn check_ttl_seconds(ttl: i64, token: &str) -> Result<()> {
    if !(MIN_TTL_SECONDS..=MAX_TTL_SECONDS).contains(&ttl) {
        return Err(Status::invalid_command(format!(
            "TTL field {} is not within valid bounds",
            token
        )));
    }
    Ok(())
}

pub(crate) fn current_time_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
