pub mod clock;
pub mod engine;
pub mod memtable;
pub mod protocol;
pub mod stats;
pub mod wal;

pub use clock::{Clock, FakeClock, SystemClock};
pub use engine::{Engine, EngineError};
pub use memtable::{Entry, MemTable};
pub use protocol::{
    encode_request, encode_response, finish_array_response, finish_value_request,
    finish_value_response, parse_header, parse_response_header, ParsedHeader,
    ParsedResponseHeader, PendingValue, ProtocolError, Request, Response,
};
pub use stats::Stats;
pub use wal::{Op, WalError, WalRecord, WriteAheadLog};
