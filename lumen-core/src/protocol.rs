//! The line-oriented text wire protocol: request/response vocabulary, header parsing, and
//! response encoding.
//!
//! Parsing is split into two steps so the byte-reading glue (`lumen-server`) can stay async
//! without this crate depending on an executor: `parse_header` reads a complete text line and
//! either produces a finished `Request` or a `Pending` value request that still needs its
//! *N*-byte payload; `finish_value_request` attaches that payload once the caller has read it.

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty request line")]
    EmptyLine,

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("wrong number of arguments for {0}")]
    WrongArity(&'static str),

    #[error("expected an integer argument for {0}")]
    BadInteger(&'static str),

    #[error("invalid response line")]
    InvalidResponse,
}

/// A fully-parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    Get { key: Vec<u8> },
    Set { key: Vec<u8>, value: Vec<u8> },
    SetEx { key: Vec<u8>, ttl_secs: i64, value: Vec<u8> },
    Del { key: Vec<u8> },
    Exists { key: Vec<u8> },
    Expire { key: Vec<u8>, ttl_secs: i64 },
    Keys { prefix: Vec<u8> },
    Stats,
}

/// A `SET`/`SETEX` header that has been parsed but whose value bytes haven't been read yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingValue {
    kind: PendingKind,
    key: Vec<u8>,
    ttl_secs: i64,
    len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Set,
    SetEx,
}

impl PendingValue {
    /// Number of value bytes the caller still needs to read before calling
    /// `finish_value_request`.
    pub fn len(&self) -> usize {
        self.len
    }
}

/// Result of parsing one request header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedHeader {
    Complete(Request),
    NeedsValue(PendingValue),
}

/// Parse one newline-stripped request line.
///
/// `SET`/`SETEX` return `NeedsValue`; every other command is immediately `Complete`.
pub fn parse_header(line: &str) -> Result<ParsedHeader, ProtocolError> {
    let mut fields = line.split_whitespace();
    let cmd = fields.next().ok_or(ProtocolError::EmptyLine)?.to_ascii_uppercase();

    let rest: Vec<&str> = fields.collect();

    match cmd.as_str() {
        "PING" => {
            require_arity(&rest, 0, "PING")?;
            Ok(ParsedHeader::Complete(Request::Ping))
        }
        "GET" => {
            require_arity(&rest, 1, "GET")?;
            Ok(ParsedHeader::Complete(Request::Get {
                key: rest[0].as_bytes().to_vec(),
            }))
        }
        "DEL" => {
            require_arity(&rest, 1, "DEL")?;
            Ok(ParsedHeader::Complete(Request::Del {
                key: rest[0].as_bytes().to_vec(),
            }))
        }
        "EXISTS" => {
            require_arity(&rest, 1, "EXISTS")?;
            Ok(ParsedHeader::Complete(Request::Exists {
                key: rest[0].as_bytes().to_vec(),
            }))
        }
        "EXPIRE" => {
            require_arity(&rest, 2, "EXPIRE")?;
            let ttl_secs = parse_i64(rest[1], "EXPIRE")?;
            Ok(ParsedHeader::Complete(Request::Expire {
                key: rest[0].as_bytes().to_vec(),
                ttl_secs,
            }))
        }
        "KEYS" => {
            require_arity(&rest, 1, "KEYS")?;
            let prefix = rest[0].strip_suffix('*').unwrap_or(rest[0]);
            Ok(ParsedHeader::Complete(Request::Keys {
                prefix: prefix.as_bytes().to_vec(),
            }))
        }
        "STATS" => {
            require_arity(&rest, 0, "STATS")?;
            Ok(ParsedHeader::Complete(Request::Stats))
        }
        "SET" => {
            require_arity(&rest, 2, "SET")?;
            let len = parse_len(rest[1], "SET")?;
            Ok(ParsedHeader::NeedsValue(PendingValue {
                kind: PendingKind::Set,
                key: rest[0].as_bytes().to_vec(),
                ttl_secs: 0,
                len,
            }))
        }
        "SETEX" => {
            require_arity(&rest, 3, "SETEX")?;
            let ttl_secs = parse_i64(rest[1], "SETEX")?;
            let len = parse_len(rest[2], "SETEX")?;
            Ok(ParsedHeader::NeedsValue(PendingValue {
                kind: PendingKind::SetEx,
                key: rest[0].as_bytes().to_vec(),
                ttl_secs,
                len,
            }))
        }
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

/// Attach the value bytes read for a pending `SET`/`SETEX` to produce the finished request.
pub fn finish_value_request(pending: PendingValue, value: Vec<u8>) -> Request {
    match pending.kind {
        PendingKind::Set => Request::Set {
            key: pending.key,
            value,
        },
        PendingKind::SetEx => Request::SetEx {
            key: pending.key,
            ttl_secs: pending.ttl_secs,
            value,
        },
    }
}

fn require_arity(fields: &[&str], n: usize, name: &'static str) -> Result<(), ProtocolError> {
    if fields.len() == n {
        Ok(())
    } else {
        Err(ProtocolError::WrongArity(name))
    }
}

fn parse_i64(s: &str, name: &'static str) -> Result<i64, ProtocolError> {
    s.parse::<i64>().map_err(|_| ProtocolError::BadInteger(name))
}

fn parse_len(s: &str, name: &'static str) -> Result<usize, ProtocolError> {
    s.parse::<u32>()
        .map(|n| n as usize)
        .map_err(|_| ProtocolError::BadInteger(name))
}

/// A response, ready to be written to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Err(String),
    NotFound,
    Value(Bytes),
    Int(i64),
    Array(Vec<String>),
}

impl Response {
    pub fn err(message: impl Into<String>) -> Self {
        Response::Err(message.into())
    }
}

/// Render a response as the bytes that go out over the wire.
pub fn encode_response(resp: &Response) -> Vec<u8> {
    let mut out = Vec::new();
    match resp {
        Response::Ok => out.extend_from_slice(b"OK\n"),
        Response::Err(msg) => {
            out.extend_from_slice(b"ERR ");
            out.extend_from_slice(msg.as_bytes());
            out.push(b'\n');
        }
        Response::NotFound => out.extend_from_slice(b"NOT_FOUND\n"),
        Response::Value(value) => {
            out.extend_from_slice(format!("VALUE {}\n", value.len()).as_bytes());
            out.extend_from_slice(value);
            out.push(b'\n');
        }
        Response::Int(n) => out.extend_from_slice(format!("INT {n}\n").as_bytes()),
        Response::Array(items) => {
            out.extend_from_slice(format!("ARRAY {}\n", items.len()).as_bytes());
            for item in items {
                out.extend_from_slice(item.as_bytes());
                out.push(b'\n');
            }
        }
    }
    out
}

/// Render a request as the bytes a client would send over the wire.
///
/// The counterpart to `parse_header`/`finish_value_request`, used by `lumen-bench` so the
/// load-testing client speaks the exact same grammar the server parses.
pub fn encode_request(req: &Request) -> Vec<u8> {
    let mut out = Vec::new();
    match req {
        Request::Ping => out.extend_from_slice(b"PING\n"),
        Request::Get { key } => {
            out.extend_from_slice(b"GET ");
            out.extend_from_slice(key);
            out.push(b'\n');
        }
        Request::Set { key, value } => {
            out.extend_from_slice(b"SET ");
            out.extend_from_slice(key);
            out.extend_from_slice(format!(" {}\n", value.len()).as_bytes());
            out.extend_from_slice(value);
            out.push(b'\n');
        }
        Request::SetEx {
            key,
            ttl_secs,
            value,
        } => {
            out.extend_from_slice(b"SETEX ");
            out.extend_from_slice(key);
            out.extend_from_slice(format!(" {ttl_secs} {}\n", value.len()).as_bytes());
            out.extend_from_slice(value);
            out.push(b'\n');
        }
        Request::Del { key } => {
            out.extend_from_slice(b"DEL ");
            out.extend_from_slice(key);
            out.push(b'\n');
        }
        Request::Exists { key } => {
            out.extend_from_slice(b"EXISTS ");
            out.extend_from_slice(key);
            out.push(b'\n');
        }
        Request::Expire { key, ttl_secs } => {
            out.extend_from_slice(b"EXPIRE ");
            out.extend_from_slice(key);
            out.extend_from_slice(format!(" {ttl_secs}\n").as_bytes());
        }
        Request::Keys { prefix } => {
            out.extend_from_slice(b"KEYS ");
            out.extend_from_slice(prefix);
            out.extend_from_slice(b"*\n");
        }
        Request::Stats => out.extend_from_slice(b"STATS\n"),
    }
    out
}

/// A response header that has been parsed but may still need trailing payload lines read
/// (a `VALUE`'s bytes, or an `ARRAY`'s items) before the `Response` is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponseHeader {
    Complete(Response),
    NeedsValue(usize),
    NeedsArrayItems(usize),
}

/// Parse one newline-stripped response line, the client-side counterpart to `parse_header`.
pub fn parse_response_header(line: &str) -> Result<ParsedResponseHeader, ProtocolError> {
    let mut fields = line.split_whitespace();
    let kind = fields.next().ok_or(ProtocolError::InvalidResponse)?;
    let rest: Vec<&str> = fields.collect();

    match kind {
        "OK" => Ok(ParsedResponseHeader::Complete(Response::Ok)),
        "NOT_FOUND" => Ok(ParsedResponseHeader::Complete(Response::NotFound)),
        "ERR" => {
            let msg = line.strip_prefix("ERR ").unwrap_or("").to_string();
            Ok(ParsedResponseHeader::Complete(Response::Err(msg)))
        }
        "VALUE" => {
            let n = rest
                .first()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or(ProtocolError::InvalidResponse)?;
            Ok(ParsedResponseHeader::NeedsValue(n))
        }
        "INT" => {
            let n = rest
                .first()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(ProtocolError::InvalidResponse)?;
            Ok(ParsedResponseHeader::Complete(Response::Int(n)))
        }
        "ARRAY" => {
            let n = rest
                .first()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or(ProtocolError::InvalidResponse)?;
            Ok(ParsedResponseHeader::NeedsArrayItems(n))
        }
        _ => Err(ProtocolError::InvalidResponse),
    }
}

/// Attach a `VALUE`'s trailing payload bytes to produce the final `Response`.
pub fn finish_value_response(value: Vec<u8>) -> Response {
    Response::Value(Bytes::from(value))
}

/// Attach an `ARRAY`'s trailing item lines to produce the final `Response`.
pub fn finish_array_response(items: Vec<String>) -> Response {
    Response::Array(items)
}
