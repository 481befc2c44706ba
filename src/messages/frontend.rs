//! Frontend message catalog: parses a decoded [`Frame`] into a closed
//! [`FrontendMessage`] enum (spec §2 "message catalog", §6 binding
//! contract).

use super::codec::{Frame, PayloadReader};
use super::constants::*;
use super::types::{FormatCode, Value};
use crate::errors::{Error, Result};

#[derive(Debug, Clone)]
pub enum StartupRequest {
    Startup {
        major: i16,
        minor: i16,
        params: Vec<(String, String)>,
    },
    Ssl,
    Cancel { pid: i32, secret: i32 },
}

/// Parses the very first frame on a connection, which has no `kind` byte
/// and may be a StartupMessage, an SSLRequest, or a CancelRequest.
pub fn parse_startup(frame: &Frame) -> Result<StartupRequest> {
    let mut reader = PayloadReader::new(&frame.payload);
    let code = reader.read_i32()?;
    if code == SSL_REQUEST_CODE {
        return Ok(StartupRequest::Ssl);
    }
    if code == CANCEL_REQUEST_CODE {
        let pid = reader.read_i32()?;
        let secret = reader.read_i32()?;
        return Ok(StartupRequest::Cancel { pid, secret });
    }
    let major = (code >> 16) as i16;
    let minor = (code & 0xFFFF) as i16;
    let mut params = Vec::new();
    loop {
        let key = reader.read_cstr()?;
        if key.is_empty() {
            break;
        }
        let value = reader.read_cstr()?;
        if key.contains('\0') || value.contains('\0') {
            return Err(Error::InvalidStartup("embedded NUL in parameter".into()));
        }
        params.push((key, value));
    }
    Ok(StartupRequest::Startup {
        major,
        minor,
        params,
    })
}

#[derive(Debug, Clone)]
pub struct ParseMessage {
    pub statement: String,
    pub sql: String,
    pub param_oids: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct BindMessage {
    pub portal: String,
    pub statement: String,
    pub param_formats: Vec<FormatCode>,
    pub params_raw: Vec<Option<Vec<u8>>>,
    pub result_formats: Vec<FormatCode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Statement,
    Portal,
}

#[derive(Debug, Clone)]
pub enum FrontendMessage {
    Query(String),
    Parse(ParseMessage),
    Bind(BindMessage),
    Describe { kind: ObjectKind, name: String },
    Execute { portal: String, max_rows: i32 },
    Close { kind: ObjectKind, name: String },
    Sync,
    Flush,
    Terminate,
    PasswordMessage(String),
}

fn object_kind(byte: u8) -> Result<ObjectKind> {
    match byte {
        b'S' => Ok(ObjectKind::Statement),
        b'P' => Ok(ObjectKind::Portal),
        other => Err(Error::ProtocolViolation(format!(
            "unknown describe/close target '{}'",
            other as char
        ))),
    }
}

/// Parses a tagged post-startup frame into a [`FrontendMessage`].
pub fn parse_tagged(frame: &Frame) -> Result<FrontendMessage> {
    let kind = frame
        .kind
        .ok_or_else(|| Error::ProtocolViolation("missing message tag".into()))?;
    let mut reader = PayloadReader::new(&frame.payload);
    match kind {
        FRONTEND_QUERY => Ok(FrontendMessage::Query(reader.read_cstr()?)),
        FRONTEND_TERMINATE => Ok(FrontendMessage::Terminate),
        FRONTEND_SYNC => Ok(FrontendMessage::Sync),
        FRONTEND_FLUSH => Ok(FrontendMessage::Flush),
        FRONTEND_PASSWORD => Ok(FrontendMessage::PasswordMessage(reader.read_cstr()?)),
        FRONTEND_PARSE => {
            let statement = reader.read_cstr()?;
            let sql = reader.read_cstr()?;
            let nparams = reader.read_i16()?;
            let mut param_oids = Vec::with_capacity(nparams.max(0) as usize);
            for _ in 0..nparams {
                param_oids.push(reader.read_i32()?);
            }
            Ok(FrontendMessage::Parse(ParseMessage {
                statement,
                sql,
                param_oids,
            }))
        }
        FRONTEND_BIND => {
            let portal = reader.read_cstr()?;
            let statement = reader.read_cstr()?;

            let n_param_formats = reader.read_i16()?;
            let mut param_formats = Vec::with_capacity(n_param_formats.max(0) as usize);
            for _ in 0..n_param_formats {
                param_formats.push(FormatCode::from_i16(reader.read_i16()?));
            }

            let n_params = reader.read_i16()?;
            let mut params_raw = Vec::with_capacity(n_params.max(0) as usize);
            for _ in 0..n_params {
                params_raw.push(reader.read_sized_bytes()?.map(|b| b.to_vec()));
            }

            let n_result_formats = reader.read_i16()?;
            let mut result_formats = Vec::with_capacity(n_result_formats.max(0) as usize);
            for _ in 0..n_result_formats {
                result_formats.push(FormatCode::from_i16(reader.read_i16()?));
            }

            Ok(FrontendMessage::Bind(BindMessage {
                portal,
                statement,
                param_formats,
                params_raw,
                result_formats,
            }))
        }
        FRONTEND_DESCRIBE => {
            let kind = object_kind(reader.read_u8()?)?;
            let name = reader.read_cstr()?;
            Ok(FrontendMessage::Describe { kind, name })
        }
        FRONTEND_EXECUTE => {
            let portal = reader.read_cstr()?;
            let max_rows = reader.read_i32()?;
            Ok(FrontendMessage::Execute { portal, max_rows })
        }
        FRONTEND_CLOSE => {
            let kind = object_kind(reader.read_u8()?)?;
            let name = reader.read_cstr()?;
            Ok(FrontendMessage::Close { kind, name })
        }
        other => Err(Error::ProtocolViolation(format!(
            "unrecognised frontend message '{}'",
            other as char
        ))),
    }
}

/// Materialises a `Value` for a bound parameter, given its declared OID
/// (or `unknown` if the client didn't specify one).
pub fn value_from_raw(type_oid: i32, format: FormatCode, raw: Option<Vec<u8>>) -> Value {
    Value {
        type_oid,
        format,
        bytes: raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::codec::{encode_tagged, put_cstr, Decoder};
    use bytes::{BufMut, BytesMut};

    fn untagged(code: i32, extra: impl FnOnce(&mut BytesMut)) -> Frame {
        let mut payload = BytesMut::new();
        payload.put_i32(code);
        extra(&mut payload);
        Frame::untagged(payload)
    }

    #[test]
    fn parses_startup_message() {
        let frame = untagged(PROTOCOL_VERSION_3_0, |p| {
            put_cstr(p, "user");
            put_cstr(p, "alice");
            put_cstr(p, "database");
            put_cstr(p, "postgres");
            p.put_u8(0);
        });
        match parse_startup(&frame).unwrap() {
            StartupRequest::Startup { major, minor, params } => {
                assert_eq!((major, minor), (3, 0));
                assert_eq!(params[0], ("user".to_string(), "alice".to_string()));
            }
            _ => panic!("expected startup"),
        }
    }

    #[test]
    fn recognises_ssl_request() {
        let frame = untagged(SSL_REQUEST_CODE, |_| {});
        assert!(matches!(parse_startup(&frame).unwrap(), StartupRequest::Ssl));
    }

    #[test]
    fn recognises_cancel_request() {
        let frame = untagged(CANCEL_REQUEST_CODE, |p| {
            p.put_i32(4242);
            p.put_i32(99);
        });
        match parse_startup(&frame).unwrap() {
            StartupRequest::Cancel { pid, secret } => {
                assert_eq!((pid, secret), (4242, 99));
            }
            _ => panic!("expected cancel"),
        }
    }

    #[test]
    fn parses_simple_query() {
        let encoded = encode_tagged(FRONTEND_QUERY, |out| put_cstr(out, "SELECT 1;"));
        let mut decoder = Decoder::new(1024);
        decoder.push_bytes(&encoded);
        let frame = decoder.try_decode_tagged().unwrap().unwrap();
        match parse_tagged(&frame).unwrap() {
            FrontendMessage::Query(sql) => assert_eq!(sql, "SELECT 1;"),
            _ => panic!("expected query"),
        }
    }
}
