//! Length-prefixed text protocol shared by the server and the client.
//!
//! Every message is a single line `LLL PAYLOAD`, where `LLL` is the
//! zero-padded character count of `PAYLOAD`. Requests carry an opcode and a
//! key (`R key`, `G key`, `P key value`); responses carry a status word and a
//! free-form message (`OK (key, value) read`, `ERR key does not exist`).

use std::{fmt, io};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload a three-digit length code can describe.
pub const MAX_PAYLOAD_LEN: usize = 999;
pub const MAX_KEY_LEN: usize = 999;
pub const MAX_VALUE_LEN: usize = 999;
/// Cap on `key + " " + value` for PUT requests.
pub const MAX_TUPLE_LEN: usize = 970;

const LENGTH_CODE_WIDTH: usize = 3;
const MIN_FRAME_LEN: usize = LENGTH_CODE_WIDTH + 1;
/// Byte budget for one line: the longest frame at four bytes per character,
/// plus `\r\n`.
pub const MAX_LINE_BYTES: usize = 4 * (LENGTH_CODE_WIDTH + 1 + MAX_PAYLOAD_LEN) + 2;
const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Read { key: String },
    Get { key: String },
    Put { key: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Err,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub message: String,
}

/// Constraints a tuple must satisfy before it is framed or reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    #[error("key is {0} characters long, the limit is 999")]
    KeyTooLong(usize),
    #[error("value is {0} characters long, the limit is 999")]
    ValueTooLong(usize),
    #[error("tuple is {0} characters long, the limit is 970")]
    TupleTooLong(usize),
    #[error("key is empty")]
    EmptyKey,
    #[error("key contains whitespace")]
    KeyWhitespace,
    #[error("value starts with whitespace")]
    ValueLeadingWhitespace,
    #[error("value contains a line break")]
    LineBreak,
}

impl LimitError {
    pub fn is_size(&self) -> bool {
        matches!(
            self,
            LimitError::KeyTooLong(_) | LimitError::ValueTooLong(_) | LimitError::TupleTooLong(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame is shorter than 4 characters")]
    TooShort,
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("line exceeds 4014 bytes")]
    LineTooLong,
    #[error("length code is not three ASCII digits")]
    InvalidLengthCode,
    #[error("length code announces {declared} characters but the payload has {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("payload needs an opcode and a key")]
    MissingFields,
    #[error("unknown opcode `{0}`")]
    UnknownOpcode(String),
    #[error("unknown status `{0}`")]
    UnknownStatus(String),
    #[error("payload of {0} characters does not fit a three-digit length code")]
    PayloadTooLong(usize),
    #[error(transparent)]
    Oversized(#[from] LimitError),
}

impl FrameError {
    /// The fixed ERR response sent back for a frame that could not be decoded.
    pub fn reply(&self) -> Response {
        let message = match self {
            FrameError::TooShort | FrameError::InvalidUtf8 => "invalid request",
            FrameError::InvalidLengthCode | FrameError::LengthMismatch { .. } => "invalid length",
            FrameError::MissingFields => "invalid format",
            FrameError::Oversized(limit) if !limit.is_size() => "invalid format",
            FrameError::UnknownOpcode(_) | FrameError::UnknownStatus(_) => "invalid command",
            FrameError::PayloadTooLong(_) | FrameError::LineTooLong | FrameError::Oversized(_) => {
                "request too large"
            }
        };
        Response::err(message)
    }
}

impl Request {
    pub fn key(&self) -> &str {
        match self {
            Request::Read { key } | Request::Get { key } | Request::Put { key, .. } => key,
        }
    }

    pub fn opcode(&self) -> char {
        match self {
            Request::Read { .. } => 'R',
            Request::Get { .. } => 'G',
            Request::Put { .. } => 'P',
        }
    }

    /// Rejects oversized tuples and any key or value that would not decode
    /// back to itself: empty keys, keys with whitespace, values with leading
    /// whitespace or line breaks.
    pub fn check_limits(&self) -> Result<(), LimitError> {
        let key = self.key();
        let key_len = char_len(key);
        if key_len > MAX_KEY_LEN {
            return Err(LimitError::KeyTooLong(key_len));
        }
        if key.is_empty() {
            return Err(LimitError::EmptyKey);
        }
        if key.contains(char::is_whitespace) {
            return Err(LimitError::KeyWhitespace);
        }

        if let Request::Put { value, .. } = self {
            let value_len = char_len(value);
            if value_len > MAX_VALUE_LEN {
                return Err(LimitError::ValueTooLong(value_len));
            }
            let tuple_len = key_len + 1 + value_len;
            if tuple_len > MAX_TUPLE_LEN {
                return Err(LimitError::TupleTooLong(tuple_len));
            }
            if value.starts_with(char::is_whitespace) {
                return Err(LimitError::ValueLeadingWhitespace);
            }
            if value.contains(LINE_ENDINGS) {
                return Err(LimitError::LineBreak);
            }
        }

        Ok(())
    }

    fn payload(&self) -> String {
        match self {
            Request::Put { key, value } => format!("P {key} {value}"),
            other => format!("{} {}", other.opcode(), other.key()),
        }
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        self.check_limits()?;
        frame(&self.payload())
    }

    pub fn decode(frame: &str) -> Result<Self, FrameError> {
        let payload = unframe(frame)?;
        let (opcode, key, value) = split_fields(payload);
        if key.is_empty() {
            return Err(FrameError::MissingFields);
        }

        let key = key.to_string();
        let request = match opcode {
            "R" => Request::Read { key },
            "G" => Request::Get { key },
            "P" => Request::Put {
                key,
                value: value.to_string(),
            },
            other => return Err(FrameError::UnknownOpcode(other.to_string())),
        };

        request.check_limits()?;
        Ok(request)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Read { key } => write!(f, "READ {key}"),
            Request::Get { key } => write!(f, "GET {key}"),
            Request::Put { key, value } => write!(f, "PUT {key} {value}"),
        }
    }
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Err => "ERR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            status: Status::Err,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// The response as it appears after the length code.
    pub fn payload(&self) -> String {
        format!("{} {}", self.status, self.message)
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        frame(&self.payload())
    }

    pub fn decode(frame: &str) -> Result<Self, FrameError> {
        let payload = unframe(frame)?;
        let (status, message) = payload.split_once(' ').unwrap_or((payload, ""));
        match status {
            "OK" => Ok(Response::ok(message)),
            "ERR" => Ok(Response::err(message)),
            other => Err(FrameError::UnknownStatus(other.to_string())),
        }
    }
}

/// Prefixes `payload` with its zero-padded length code.
pub fn frame(payload: &str) -> Result<String, FrameError> {
    let len = char_len(payload);
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLong(len));
    }
    Ok(format!("{len:03} {payload}"))
}

/// Validates the length code of `frame` and returns the payload it guards.
///
/// The space between the length code and the payload is optional, so both
/// `003 R a` and `003R a` decode to the payload `R a`.
pub fn unframe(frame: &str) -> Result<&str, FrameError> {
    let frame = frame.trim_end_matches(LINE_ENDINGS);
    if char_len(frame) < MIN_FRAME_LEN {
        return Err(FrameError::TooShort);
    }

    let declared = frame
        .get(..LENGTH_CODE_WIDTH)
        .filter(|code| code.bytes().all(|byte| byte.is_ascii_digit()))
        .and_then(|code| code.parse::<usize>().ok())
        .ok_or(FrameError::InvalidLengthCode)?;

    let rest = &frame[LENGTH_CODE_WIDTH..];
    let payload = rest.strip_prefix(' ').unwrap_or(rest);
    let actual = char_len(payload);
    if declared != actual {
        return Err(FrameError::LengthMismatch { declared, actual });
    }

    Ok(payload)
}

/// Splits text on whitespace into at most three fields; missing fields are
/// empty and the third field keeps any inner whitespace.
pub(crate) fn split_fields(text: &str) -> (&str, &str, &str) {
    let (first, rest) = split_word(text);
    let (second, rest) = split_word(rest);
    (first, second, rest)
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (text, ""),
    }
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Reads newline-delimited frames with a bounded per-line buffer.
///
/// Lines that are not UTF-8 or run past [`MAX_LINE_BYTES`] come back as
/// `Some(Err(_))` so the caller can answer them; the rest of an overlong
/// line is dropped before the next frame is read.
pub struct FrameReader<R> {
    inner: R,
    skipping: bool,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            skipping: false,
        }
    }

    /// Returns the next line without its line ending. `None` means the peer
    /// closed the stream.
    pub async fn next_frame(&mut self) -> io::Result<Option<Result<String, FrameError>>> {
        if self.skipping {
            if !skip_line(&mut self.inner).await? {
                return Ok(None);
            }
            self.skipping = false;
        }

        let mut line = Vec::new();
        let bytes = (&mut self.inner)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if bytes == 0 {
            return Ok(None);
        }
        if bytes == MAX_LINE_BYTES && line.last() != Some(&b'\n') {
            self.skipping = true;
            return Ok(Some(Err(FrameError::LineTooLong)));
        }

        let frame = match String::from_utf8(line) {
            Ok(mut frame) => {
                let len = frame.trim_end_matches(LINE_ENDINGS).len();
                frame.truncate(len);
                Ok(frame)
            }
            Err(_) => Err(FrameError::InvalidUtf8),
        };
        Ok(Some(frame))
    }
}

/// Consumes input up to and including the next newline. Returns `false` if
/// the stream ended first.
async fn skip_line<R>(reader: &mut R) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let buffer = reader.fill_buf().await?;
        if buffer.is_empty() {
            return Ok(false);
        }
        match buffer.iter().position(|&byte| byte == b'\n') {
            Some(newline) => {
                reader.consume(newline + 1);
                return Ok(true);
            }
            None => {
                let len = buffer.len();
                reader.consume(len);
            }
        }
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(frame.len() + 1);
    encoded.extend_from_slice(frame.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

pub(crate) fn to_io_error(err: FrameError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
