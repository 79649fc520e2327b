//! Incremental command parser over a rope of I/O buffers.
//!
//! The parser is a small state machine with offsets into the rope:
//! `token_begin <= pos <= full_size` at every quiescent point. When the
//! buffer runs short of a terminator or body the parser records that
//! the command is incomplete, advances `pos` to the end of input, and
//! returns zero; the next `update` appends data and parsing resumes
//! without re-scanning consumed bytes.

use super::{
    checked_stoll, split_args, LINE_END_LENGTH, MAX_NUMBER_LENGTH, MAX_NUMBER_OF_ARGS,
    MAX_VALUE_SIZE,
};
use crate::core::error::{Result, Status};
use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Initial,
    SingleLine,
    BulkHeader,
    BulkArgumentSize,
    BulkArgumentBody,
    Finished,
}

/// Streaming command parser. One instance per connection.
#[derive(Debug)]
pub struct CommandParser {
    source: Vec<Bytes>,
    full_size: usize,
    state: ParseState,
    token_begin: usize,
    pos: usize,
    arguments_left: usize,
    current_argument_size: usize,
    incomplete: bool,
    args: Vec<Bytes>,
    number_buffer: Vec<u8>,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandParser {
    pub fn new() -> Self {
        Self {
            source: Vec::new(),
            full_size: 0,
            state: ParseState::Initial,
            token_begin: 0,
            pos: 0,
            arguments_left: 0,
            current_argument_size: 0,
            incomplete: false,
            args: Vec::new(),
            number_buffer: Vec::with_capacity(MAX_NUMBER_LENGTH),
        }
    }

    /// New data arrived: replace the rope view with the current buffers.
    pub fn update(&mut self, data: &[Bytes]) {
        self.source = data.to_vec();
        self.full_size = data.iter().map(|b| b.len()).sum();
        debug_assert!(self.pos <= self.full_size);
    }

    /// The beginning of input was compacted away; shift offsets.
    pub fn consume(&mut self, count: usize) {
        self.pos -= count;
        self.token_begin = self.token_begin.saturating_sub(count);
    }

    /// Arguments of the most recently completed command.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Take ownership of the completed command's arguments.
    pub fn take_args(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.args)
    }

    /// Parse the next command.
    ///
    /// Returns the offset one past the command's last byte when a full
    /// command was decoded (the caller may compact up to it), or zero
    /// when more data is needed. Parser state survives across calls.
    pub fn next_command(&mut self) -> Result<usize> {
        while self.pos != self.full_size {
            self.incomplete = false;
            self.advance_to_next_token()?;
            if self.incomplete {
                self.pos = self.full_size;
                return Ok(0);
            }
            if self.state == ParseState::Finished {
                self.state = ParseState::Initial;
                return Ok(self.pos);
            }
        }
        Ok(0)
    }

    fn advance_to_next_token(&mut self) -> Result<()> {
        match self.state {
            ParseState::Initial => self.initial(),
            ParseState::SingleLine => self.single_line(),
            ParseState::BulkHeader => self.bulk_header(),
            ParseState::BulkArgumentSize => self.bulk_argument_size(),
            ParseState::BulkArgumentBody => self.bulk_argument_body(),
            ParseState::Finished => Err(Status::illegal_state(
                "parser should not advance in the finished state",
            )),
        }
    }

    fn initial(&mut self) -> Result<()> {
        self.token_begin = self.pos;
        self.state = if self.byte_at(self.pos) == b'*' {
            ParseState::BulkHeader
        } else {
            ParseState::SingleLine
        };
        Ok(())
    }

    fn single_line(&mut self) -> Result<()> {
        self.find_end_of_line()?;
        if self.incomplete {
            return Ok(());
        }
        let mut start = self.token_begin;
        let finish = self.pos - LINE_END_LENGTH;
        while start < finish && self.byte_at(start).is_ascii_whitespace() {
            start += 1;
        }
        if start >= finish {
            return Err(Status::corruption("empty line"));
        }
        let line = self.copy_range(start, finish);
        self.args = split_args(&line)?;
        self.state = ParseState::Finished;
        Ok(())
    }

    fn bulk_header(&mut self) -> Result<()> {
        self.find_end_of_line()?;
        if self.incomplete {
            return Ok(());
        }
        let num_args = self.parse_number(b'*', 1, MAX_NUMBER_OF_ARGS, "number of arguments")?;
        self.args.clear();
        self.args.reserve(num_args as usize);
        self.state = ParseState::BulkArgumentSize;
        self.token_begin = self.pos;
        self.arguments_left = num_args as usize;
        Ok(())
    }

    fn bulk_argument_size(&mut self) -> Result<()> {
        self.find_end_of_line()?;
        if self.incomplete {
            return Ok(());
        }
        let size = self.parse_number(b'$', 0, MAX_VALUE_SIZE, "argument size")?;
        self.state = ParseState::BulkArgumentBody;
        self.token_begin = self.pos;
        self.current_argument_size = size as usize;
        Ok(())
    }

    fn bulk_argument_body(&mut self) -> Result<()> {
        let desired_position = self.token_begin + self.current_argument_size + LINE_END_LENGTH;
        if desired_position > self.full_size {
            self.incomplete = true;
            self.pos = self.full_size;
            return Ok(());
        }
        if self.byte_at(desired_position - 1) != b'\n'
            || self.byte_at(desired_position - 2) != b'\r'
        {
            return Err(Status::corruption("no CRLF after bulk argument"));
        }
        let arg = self.slice_range(
            self.token_begin,
            self.token_begin + self.current_argument_size,
        );
        self.args.push(arg);
        self.arguments_left -= 1;
        self.pos = desired_position;
        self.token_begin = self.pos;
        self.state = if self.arguments_left == 0 {
            ParseState::Finished
        } else {
            ParseState::BulkArgumentSize
        };
        Ok(())
    }

    /// Advance `pos` one past the next `\n`, validating the preceding
    /// `\r`. Sets the incomplete flag when no newline is in the buffer.
    fn find_end_of_line(&mut self) -> Result<()> {
        let newline = self.find_byte(self.pos, b'\n');
        self.incomplete = newline.is_none();
        if let Some(newline_offset) = newline {
            if newline_offset == self.token_begin {
                return Err(Status::corruption(
                    "end of line at the beginning of a command",
                ));
            }
            if self.byte_at(newline_offset - 1) != b'\r' {
                return Err(Status::corruption(
                    "newline is not prefixed with carriage return",
                ));
            }
            self.pos = newline_offset + 1;
        }
        Ok(())
    }

    /// Parse the number between `token_begin` and the line end at `pos`,
    /// requiring `prefix` as the first byte and `[min, max]` bounds.
    fn parse_number(&mut self, prefix: u8, min: i64, max: i64, name: &str) -> Result<i64> {
        if self.byte_at(self.token_begin) != prefix {
            return Err(Status::corruption(format!(
                "invalid character before number, expected: {}, but found: {}",
                prefix as char,
                self.byte_at(self.token_begin) as char
            )));
        }
        let number_begin = self.token_begin + 1;
        let expected_stop = self.pos - LINE_END_LENGTH;
        if expected_stop - number_begin > MAX_NUMBER_LENGTH {
            return Err(Status::corruption(format!(
                "too long {} of length {}",
                name,
                expected_stop - number_begin
            )));
        }
        self.number_buffer.clear();
        for offset in number_begin..expected_stop {
            self.number_buffer.push(self.byte_at(offset));
        }
        let parsed = checked_stoll(&self.number_buffer)
            .map_err(|err| Status::corruption(err.to_string()))?;
        if parsed < min || parsed > max {
            return Err(Status::corruption(format!(
                "{} out of expected range [{}, {}] : {}",
                name, min, max, parsed
            )));
        }
        Ok(parsed)
    }

    fn byte_at(&self, offset: usize) -> u8 {
        let (idx, local) = self.locate(offset);
        self.source[idx][local]
    }

    /// Map a rope offset to (buffer index, offset within buffer).
    fn locate(&self, mut offset: usize) -> (usize, usize) {
        for (idx, buf) in self.source.iter().enumerate() {
            if offset < buf.len() {
                return (idx, offset);
            }
            offset -= buf.len();
        }
        panic!("offset {} past end of source", offset);
    }

    /// Find `needle` at or after `from`, as a rope offset.
    fn find_byte(&self, from: usize, needle: u8) -> Option<usize> {
        let mut base = 0;
        for buf in &self.source {
            let end = base + buf.len();
            if from < end {
                let local_from = from.saturating_sub(base);
                if let Some(found) = buf[local_from..].iter().position(|&b| b == needle) {
                    return Some(base + local_from + found);
                }
            }
            base = end;
        }
        None
    }

    /// Slice `[start, end)` out of the rope. Zero-copy when the range
    /// lies within one buffer; copies only across a buffer boundary.
    fn slice_range(&self, start: usize, end: usize) -> Bytes {
        let (idx, local) = self.locate(start);
        if local + (end - start) <= self.source[idx].len() {
            return self.source[idx].slice(local..local + (end - start));
        }
        Bytes::from(self.copy_range(start, end))
    }

    fn copy_range(&self, start: usize, end: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(end - start);
        for offset in start..end {
            out.push(self.byte_at(offset));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(data: &[u8]) -> Result<(usize, Vec<Bytes>)> {
        let mut parser = CommandParser::new();
        parser.update(&[Bytes::copy_from_slice(data)]);
        let end = parser.next_command()?;
        Ok((end, parser.take_args()))
    }

    #[test]
    fn test_parse_bulk_command() {
        let (end, args) = parse_one(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nvalue\r\n").unwrap();
        assert_eq!(end, 31);
        assert_eq!(args.len(), 3);
        assert_eq!(args[0].as_ref(), b"SET");
        assert_eq!(args[1].as_ref(), b"k");
        assert_eq!(args[2].as_ref(), b"value");
    }

    #[test]
    fn test_parse_inline_command() {
        let (end, args) = parse_one(b"GET mykey\r\n").unwrap();
        assert_eq!(end, 11);
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].as_ref(), b"GET");
    }

    #[test]
    fn test_inline_trims_leading_whitespace() {
        let (_, args) = parse_one(b"   PING\r\n").unwrap();
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].as_ref(), b"PING");
    }

    #[test]
    fn test_empty_line_rejected() {
        assert!(parse_one(b" \r\n").is_err());
    }

    #[test]
    fn test_missing_cr_rejected() {
        let err = parse_one(b"*1\n$4\r\nPING\r\n").unwrap_err();
        assert!(matches!(err, Status::Corruption(_)));
    }

    #[test]
    fn test_zero_argument_header_rejected() {
        let err = parse_one(b"*0\r\n").unwrap_err();
        assert!(matches!(err, Status::Corruption(_)));
    }

    #[test]
    fn test_max_argument_header_bounds() {
        // 2^20 is accepted as a count (the body is simply incomplete).
        let mut parser = CommandParser::new();
        parser.update(&[Bytes::from_static(b"*1048576\r\n")]);
        assert_eq!(parser.next_command().unwrap(), 0);

        let err = parse_one(b"*1048577\r\n").unwrap_err();
        assert!(matches!(err, Status::Corruption(_)));
    }

    #[test]
    fn test_wrong_size_prefix_rejected() {
        let err = parse_one(b"*1\r\n#3\r\nfoo\r\n").unwrap_err();
        assert!(matches!(err, Status::Corruption(_)));
    }

    #[test]
    fn test_missing_crlf_after_body_rejected() {
        let err = parse_one(b"*1\r\n$3\r\nfooxx").unwrap_err();
        assert!(matches!(err, Status::Corruption(_)));
    }

    #[test]
    fn test_number_too_long_rejected() {
        let err = parse_one(b"*11111111111111111111111111111\r\n").unwrap_err();
        assert!(matches!(err, Status::Corruption(_)));
    }

    #[test]
    fn test_incomplete_then_resume() {
        let mut parser = CommandParser::new();
        let first = Bytes::from_static(b"*3\r\n$3\r\nSET\r\n$1\r\n");
        parser.update(&[first.clone()]);
        assert_eq!(parser.next_command().unwrap(), 0);

        let second = Bytes::from_static(b"k\r\n$5\r\nvalue\r\n");
        parser.update(&[first, second]);
        let end = parser.next_command().unwrap();
        assert_eq!(end, 31);
        let args = parser.take_args();
        assert_eq!(args.len(), 3);
        assert_eq!(args[0].as_ref(), b"SET");
        assert_eq!(args[1].as_ref(), b"k");
        assert_eq!(args[2].as_ref(), b"value");
    }

    #[test]
    fn test_consume_shifts_offsets() {
        let mut parser = CommandParser::new();
        parser.update(&[Bytes::from_static(b"PING\r\nNEXT\r\n")]);
        let end = parser.next_command().unwrap();
        assert_eq!(end, 6);
        parser.consume(end);
        parser.update(&[Bytes::from_static(b"NEXT\r\n")]);
        let end = parser.next_command().unwrap();
        assert_eq!(end, 6);
        assert_eq!(parser.args()[0].as_ref(), b"NEXT");
    }

    #[test]
    fn test_two_commands_back_to_back() {
        let mut parser = CommandParser::new();
        parser.update(&[Bytes::from_static(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPONG\r\n")]);
        let first = parser.next_command().unwrap();
        assert_eq!(first, 14);
        assert_eq!(parser.args()[0].as_ref(), b"PING");
        let second = parser.next_command().unwrap();
        assert_eq!(second, 28);
        assert_eq!(parser.args()[0].as_ref(), b"PONG");
    }

    #[test]
    fn test_empty_argument_body() {
        let (_, args) = parse_one(b"*2\r\n$3\r\nGET\r\n$0\r\n\r\n").unwrap();
        assert_eq!(args[1].len(), 0);
    }

    #[test]
    fn test_zero_copy_args_share_buffer() {
        let buf = Bytes::from_static(b"*1\r\n$4\r\nPING\r\n");
        let mut parser = CommandParser::new();
        parser.update(&[buf.clone()]);
        parser.next_command().unwrap();
        let arg = parser.args()[0].clone();
        // A slice of the source buffer, not a copy.
        assert_eq!(arg.as_ptr(), buf[8..].as_ptr());
    }
}
