//! Streaming wire protocol: incremental command decoding.
//!
//! The wire layer turns a possibly-fragmented inbound byte stream into
//! complete commands, each a sequence of argument byte slices. Input
//! arrives as a rope of I/O buffers; consumed bytes are compacted away
//! by the connection and the parser's offsets adjusted. Argument slices
//! reference the original buffers where possible, so callers must use
//! them before compacting.
//!
//! Two request forms are accepted:
//!
//! - inline: `cmd arg arg\r\n`
//! - bulk: `*N\r\n` followed by N arguments, each `$L\r\nbytes\r\n`
//!
//! Limits: `N` in `[1, 1_048_576]`, `L` in `[0, MAX_VALUE_SIZE]`,
//! number tokens at most 25 characters, CRLF strictly enforced.

pub mod parser;

pub use parser::CommandParser;

use crate::core::error::{Result, Status};
use bytes::Bytes;

/// Upper bound on the number of arguments in one bulk command.
pub const MAX_NUMBER_OF_ARGS: i64 = 1 << 20;

/// Upper bound on a single argument body.
pub const MAX_VALUE_SIZE: i64 = 64 * 1024 * 1024;

/// Longest accepted ASCII decimal token.
pub const MAX_NUMBER_LENGTH: usize = 25;

pub(crate) const LINE_END_LENGTH: usize = 2;

/// Encode a command into the bulk wire form.
///
/// Decoding a valid bulk command and re-encoding its arguments yields
/// a byte-identical stream.
pub fn encode_command(args: &[Bytes]) -> Bytes {
    let mut buf = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    buf.push(b'*');
    buf.extend_from_slice(args.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    for arg in args {
        buf.push(b'$');
        buf.extend_from_slice(arg.len().to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
    Bytes::from(buf)
}

/// Parse a bounded ASCII decimal integer.
pub(crate) fn checked_stoll(data: &[u8]) -> Result<i64> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Status::invalid_argument("number is not valid ascii"))?;
    text.parse::<i64>()
        .map_err(|_| Status::invalid_argument(format!("{:?} is not a valid number", text)))
}

/// Split an inline command line into arguments.
///
/// Whitespace separates arguments; single or double quotes group one
/// argument, with `\"` accepted inside double quotes. Unbalanced quotes
/// fail the whole line.
pub(crate) fn split_args(line: &[u8]) -> Result<Vec<Bytes>> {
    let mut args = Vec::new();
    let mut i = 0;
    while i < line.len() {
        while i < line.len() && line[i].is_ascii_whitespace() {
            i += 1;
        }
        if i == line.len() {
            break;
        }
        let mut current = Vec::new();
        match line[i] {
            quote @ (b'"' | b'\'') => {
                i += 1;
                let mut closed = false;
                while i < line.len() {
                    if line[i] == b'\\' && quote == b'"' && i + 1 < line.len() {
                        current.push(line[i + 1]);
                        i += 2;
                        continue;
                    }
                    if line[i] == quote {
                        closed = true;
                        i += 1;
                        break;
                    }
                    current.push(line[i]);
                    i += 1;
                }
                if !closed {
                    return Err(Status::invalid_argument("unbalanced quotes in request"));
                }
                // A closing quote must be followed by whitespace or end.
                if i < line.len() && !line[i].is_ascii_whitespace() {
                    return Err(Status::invalid_argument("unbalanced quotes in request"));
                }
            }
            _ => {
                while i < line.len() && !line[i].is_ascii_whitespace() {
                    current.push(line[i]);
                    i += 1;
                }
            }
        }
        args.push(Bytes::from(current));
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_stoll_bounds() {
        assert_eq!(checked_stoll(b"0").unwrap(), 0);
        assert_eq!(checked_stoll(b"-42").unwrap(), -42);
        assert_eq!(
            checked_stoll(b"-9223372036854775808").unwrap(),
            i64::MIN
        );
        assert!(checked_stoll(b"12x").is_err());
        assert!(checked_stoll(b"").is_err());
    }

    #[test]
    fn test_split_args_plain() {
        let args = split_args(b"SET key value").unwrap();
        assert_eq!(args.len(), 3);
        assert_eq!(args[0].as_ref(), b"SET");
        assert_eq!(args[2].as_ref(), b"value");
    }

    #[test]
    fn test_split_args_quoted() {
        let args = split_args(b"SET \"a key\" 'a value'").unwrap();
        assert_eq!(args.len(), 3);
        assert_eq!(args[1].as_ref(), b"a key");
        assert_eq!(args[2].as_ref(), b"a value");
    }

    #[test]
    fn test_split_args_escaped_quote() {
        let args = split_args(br#"SET "say \"hi\"" v"#).unwrap();
        assert_eq!(args[1].as_ref(), br#"say "hi""#);
    }

    #[test]
    fn test_split_args_unbalanced() {
        assert!(split_args(b"SET \"open").is_err());
        assert!(split_args(b"SET 'x'y").is_err());
    }
}
