//! RESP Protocol Client Side
//!
//! The network store speaks RESP2 to Redis-compatible servers. This module
//! holds the value type used for both requests and replies, and the
//! incremental parser for replies read off the socket.
//!
//! ## Example
//!
//! ```
//! use shardbits::protocol::{parse_reply, RespValue};
//!
//! let request = RespValue::command(["GETBIT", "bf:0", "7"]).serialize();
//! assert!(request.starts_with(b"*3\r\n"));
//!
//! let (reply, consumed) = parse_reply(b":1\r\n").unwrap().unwrap();
//! assert_eq!(reply, RespValue::Integer(1));
//! assert_eq!(consumed, 4);
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_reply, ParseError, ParseResult};
pub use types::RespValue;
