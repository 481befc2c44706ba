//! Wire-level constants: protocol version codes, magic numbers, and the
//! message type bytes the core must recognise (spec §6).

/// Protocol version 3.0, encoded as `major << 16 | minor`.
pub const PROTOCOL_VERSION_3_0: i32 = 0x0003_0000;

/// `SSLRequest` magic code, sent in place of a protocol version.
pub const SSL_REQUEST_CODE: i32 = 80_877_103; // 0x04D2162F

/// `CancelRequest` magic code, sent in place of a protocol version.
pub const CANCEL_REQUEST_CODE: i32 = 80_877_102; // 0x04D2162E

// Frontend message tags.
pub const FRONTEND_QUERY: u8 = b'Q';
pub const FRONTEND_PARSE: u8 = b'P';
pub const FRONTEND_BIND: u8 = b'B';
pub const FRONTEND_DESCRIBE: u8 = b'D';
pub const FRONTEND_EXECUTE: u8 = b'E';
pub const FRONTEND_CLOSE: u8 = b'C';
pub const FRONTEND_FLUSH: u8 = b'H';
pub const FRONTEND_SYNC: u8 = b'S';
pub const FRONTEND_TERMINATE: u8 = b'X';
pub const FRONTEND_PASSWORD: u8 = b'p';

// Backend message tags.
pub const BACKEND_AUTHENTICATION: u8 = b'R';
pub const BACKEND_BACKEND_KEY_DATA: u8 = b'K';
pub const BACKEND_PARAMETER_STATUS: u8 = b'S';
pub const BACKEND_READY_FOR_QUERY: u8 = b'Z';
pub const BACKEND_ROW_DESCRIPTION: u8 = b'T';
pub const BACKEND_DATA_ROW: u8 = b'D';
pub const BACKEND_COMMAND_COMPLETE: u8 = b'C';
pub const BACKEND_EMPTY_QUERY_RESPONSE: u8 = b'I';
pub const BACKEND_ERROR_RESPONSE: u8 = b'E';
pub const BACKEND_NOTICE_RESPONSE: u8 = b'N';
pub const BACKEND_PARSE_COMPLETE: u8 = b'1';
pub const BACKEND_BIND_COMPLETE: u8 = b'2';
pub const BACKEND_CLOSE_COMPLETE: u8 = b'3';
pub const BACKEND_NO_DATA: u8 = b'n';
pub const BACKEND_PARAMETER_DESCRIPTION: u8 = b't';
pub const BACKEND_PORTAL_SUSPENDED: u8 = b's';
pub const BACKEND_NOTIFICATION_RESPONSE: u8 = b'A';

// AuthenticationXXX sub-codes (follow the `R` tag as an int32).
pub const AUTH_OK: i32 = 0;
pub const AUTH_CLEARTEXT_PASSWORD: i32 = 3;
pub const AUTH_MD5_PASSWORD: i32 = 5;

/// ReadyForQuery status bytes, spec §6.
pub const STATUS_IDLE: u8 = b'I';
pub const STATUS_IN_TRANSACTION: u8 = b'T';
pub const STATUS_FAILED_TRANSACTION: u8 = b'E';
