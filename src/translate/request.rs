//! Typed request records produced by the translator.
//!
//! A translated command is either a write or a read against a named key
//! space. The record carries the primary key, optional sub-keys, values,
//! flags, TTL, and write mode in a form the session can buffer and the
//! planner can execute without re-validating shape.

use bytes::Bytes;

/// Key space a command operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    /// Top-level deletes apply to any type.
    #[default]
    None,
    String,
    Hash,
    Set,
    SortedSet,
    Timeseries,
}

/// A sub-key within a composite key space.
#[derive(Debug, Clone, PartialEq)]
pub enum SubKey {
    Str(Bytes),
    Timestamp(i64),
    Score(f64),
}

impl SubKey {
    pub fn str(data: impl Into<Bytes>) -> Self {
        Self::Str(data.into())
    }
}

/// Primary key, sub-keys and values shared by all request shapes.
#[derive(Debug, Clone, Default)]
pub struct KeyValue {
    pub key: Bytes,
    pub data_type: DataType,
    pub subkeys: Vec<SubKey>,
    pub values: Vec<Bytes>,
}

/// Write-mode flag of SET-style commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Insert or update.
    #[default]
    Upsert,
    /// Insert-only (`NX`).
    Insert,
    /// Update-only (`XX`).
    Update,
}

/// Sorted-set write options (`ZADD` flags).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SortedSetOptions {
    /// Report changed (added or updated) member count.
    pub ch: bool,
    /// Increment the single given member's score.
    pub incr: bool,
    pub mode: WriteMode,
}

/// Shared options of the SET-style family.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetSpec {
    /// TTL normalized to milliseconds.
    pub ttl_ms: Option<i64>,
    pub mode: WriteMode,
    pub sorted_set: Option<SortedSetOptions>,
    /// Respond with a simple OK rather than a count.
    pub expect_ok_response: bool,
}

/// The write operation to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteVerb {
    Set(SetSpec),
    GetSet,
    Append,
    SetRange { offset: i32 },
    Incr { by: i64 },
    Del,
    Add,
}

/// A validated write request.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub kv: KeyValue,
    pub verb: WriteVerb,
}

/// Point-read request kinds sharing the `CMD KEY [SUBKEY]*` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetKind {
    Get,
    HGet,
    HMGet,
    HGetAll,
    HKeys,
    HVals,
    HLen,
    HStrLen,
    HExists,
    SMembers,
    SIsMember,
    SCard,
    ZCard,
    TsGet,
    TsCard,
}

/// Range-read request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// `TSRANGEBYTIME`: timestamp sub-key bounds.
    ByTime,
    /// `ZRANGEBYSCORE`: double score bounds.
    ByScore,
    /// `ZREVRANGE`: reversed rank (index) bounds.
    RevByIndex,
}

/// One end of a range read.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RangeBound {
    pub value: Option<BoundValue>,
    pub infinity: Option<Infinity>,
    pub exclusive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundValue {
    Timestamp(i64),
    Score(f64),
    Index(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Infinity {
    Positive,
    Negative,
}

impl RangeBound {
    pub fn positive_infinity() -> Self {
        Self {
            infinity: Some(Infinity::Positive),
            ..Default::default()
        }
    }

    pub fn negative_infinity() -> Self {
        Self {
            infinity: Some(Infinity::Negative),
            ..Default::default()
        }
    }
}

/// A validated range read.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSpec {
    pub kind: RangeKind,
    pub lower: RangeBound,
    pub upper: RangeBound,
    pub with_scores: bool,
    /// Cap on returned entries (`TSLASTN`).
    pub limit: Option<i32>,
}

/// The read operation to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadVerb {
    Get(GetKind),
    StrLen,
    Exists,
    GetRange { start: i32, end: i32 },
    Range(RangeSpec),
}

/// A validated read request.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub kv: KeyValue,
    pub verb: ReadVerb,
}

/// A translated command, ready to buffer on a session.
#[derive(Debug, Clone)]
pub enum TranslatedRequest {
    Write(WriteRequest),
    Read(ReadRequest),
}

impl TranslatedRequest {
    /// The primary key the request routes by.
    pub fn partition_key(&self) -> &Bytes {
        match self {
            Self::Write(w) => &w.kv.key,
            Self::Read(r) => &r.kv.key,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write(_))
    }
}
