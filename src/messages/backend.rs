//! Backend message builders: the encoding half of the message catalog
//! (spec §2, §6). Each function returns one fully-framed message ready to
//! be written to the socket.

use bytes::{BufMut, BytesMut};

use super::codec::{encode_tagged, put_cstr, put_sized_bytes};
use super::constants::*;
use super::types::ColumnDesc;

pub fn authentication_ok() -> BytesMut {
    encode_tagged(BACKEND_AUTHENTICATION, |out| out.put_i32(AUTH_OK))
}

pub fn authentication_cleartext_password() -> BytesMut {
    encode_tagged(BACKEND_AUTHENTICATION, |out| {
        out.put_i32(AUTH_CLEARTEXT_PASSWORD)
    })
}

pub fn authentication_md5_password(salt: [u8; 4]) -> BytesMut {
    encode_tagged(BACKEND_AUTHENTICATION, |out| {
        out.put_i32(AUTH_MD5_PASSWORD);
        out.put_slice(&salt);
    })
}

pub fn backend_key_data(pid: i32, secret: i32) -> BytesMut {
    encode_tagged(BACKEND_BACKEND_KEY_DATA, |out| {
        out.put_i32(pid);
        out.put_i32(secret);
    })
}

pub fn parameter_status(name: &str, value: &str) -> BytesMut {
    encode_tagged(BACKEND_PARAMETER_STATUS, |out| {
        put_cstr(out, name);
        put_cstr(out, value);
    })
}

pub fn ready_for_query(status: u8) -> BytesMut {
    encode_tagged(BACKEND_READY_FOR_QUERY, |out| out.put_u8(status))
}

pub fn row_description(columns: &[ColumnDesc]) -> BytesMut {
    encode_tagged(BACKEND_ROW_DESCRIPTION, |out| {
        out.put_i16(columns.len() as i16);
        for col in columns {
            put_cstr(out, &col.name);
            out.put_i32(col.table_oid);
            out.put_i16(col.column_attnum);
            out.put_i32(col.type_oid);
            out.put_i16(col.type_size);
            out.put_i32(col.type_modifier);
            out.put_i16(col.format.as_i16());
        }
    })
}

pub fn no_data() -> BytesMut {
    encode_tagged(BACKEND_NO_DATA, |_| {})
}

pub fn parameter_description(param_oids: &[i32]) -> BytesMut {
    encode_tagged(BACKEND_PARAMETER_DESCRIPTION, |out| {
        out.put_i16(param_oids.len() as i16);
        for oid in param_oids {
            out.put_i32(*oid);
        }
    })
}

pub fn data_row(values: &[Option<Vec<u8>>]) -> BytesMut {
    encode_tagged(BACKEND_DATA_ROW, |out| {
        out.put_i16(values.len() as i16);
        for v in values {
            put_sized_bytes(out, v.as_deref());
        }
    })
}

pub fn command_complete(tag: &str) -> BytesMut {
    encode_tagged(BACKEND_COMMAND_COMPLETE, |out| put_cstr(out, tag))
}

pub fn empty_query_response() -> BytesMut {
    encode_tagged(BACKEND_EMPTY_QUERY_RESPONSE, |_| {})
}

pub fn parse_complete() -> BytesMut {
    encode_tagged(BACKEND_PARSE_COMPLETE, |_| {})
}

pub fn bind_complete() -> BytesMut {
    encode_tagged(BACKEND_BIND_COMPLETE, |_| {})
}

pub fn close_complete() -> BytesMut {
    encode_tagged(BACKEND_CLOSE_COMPLETE, |_| {})
}

pub fn portal_suspended() -> BytesMut {
    encode_tagged(BACKEND_PORTAL_SUSPENDED, |_| {})
}

/// One field of an ErrorResponse/NoticeResponse: severity, SQLSTATE,
/// message, and optionally detail/hint/position (spec §6).
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    pub severity: &'static str,
    pub severity_localized: &'static str,
    pub code: &'static str,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub position: Option<i32>,
}

impl ErrorFields {
    pub fn new(severity: &'static str, code: &'static str, message: impl Into<String>) -> Self {
        ErrorFields {
            severity,
            severity_localized: severity,
            code,
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
        }
    }

    fn encode_fields(&self, out: &mut BytesMut) {
        out.put_u8(b'S');
        put_cstr(out, self.severity);
        out.put_u8(b'V');
        put_cstr(out, self.severity_localized);
        out.put_u8(b'C');
        put_cstr(out, self.code);
        out.put_u8(b'M');
        put_cstr(out, &self.message);
        if let Some(detail) = &self.detail {
            out.put_u8(b'D');
            put_cstr(out, detail);
        }
        if let Some(hint) = &self.hint {
            out.put_u8(b'H');
            put_cstr(out, hint);
        }
        if let Some(position) = self.position {
            out.put_u8(b'P');
            put_cstr(out, &position.to_string());
        }
        out.put_u8(0);
    }
}

pub fn error_response(fields: &ErrorFields) -> BytesMut {
    encode_tagged(BACKEND_ERROR_RESPONSE, |out| fields.encode_fields(out))
}

pub fn notice_response(fields: &ErrorFields) -> BytesMut {
    encode_tagged(BACKEND_NOTICE_RESPONSE, |out| fields.encode_fields(out))
}
