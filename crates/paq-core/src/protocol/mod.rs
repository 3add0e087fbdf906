//! The line-oriented message protocol spoken with method subprocesses.
//!
//! A message is a status line `<code> <reason>\n` followed by zero or more
//! `Key: Value\n` header lines and a terminating blank line. Methods report
//! 1xx/2xx/4xx codes on stdout; the engine sends 6xx requests on stdin.

mod codec;
mod message;

pub use codec::{MessageReader, ProtocolError};
pub use message::Message;

// method -> engine
pub const CAPABILITIES: u16 = 100;
pub const LOG: u16 = 101;
pub const STATUS: u16 = 102;
pub const URI_START: u16 = 200;
pub const URI_DONE: u16 = 201;
pub const URI_FAILURE: u16 = 400;
pub const GENERAL_FAILURE: u16 = 401;
pub const AUTH_REQUIRED: u16 = 402;
pub const MEDIA_CHANGE: u16 = 403;

// engine -> method
pub const URI_ACQUIRE: u16 = 600;
pub const CONFIGURATION: u16 = 601;
pub const AUTH_CREDENTIALS: u16 = 602;
pub const MEDIA_CHANGED: u16 = 603;
