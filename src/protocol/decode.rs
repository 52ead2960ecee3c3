//! Protocol message decoding

use super::constants::{auth, tags};
use super::message::{AuthenticationMessage, BackendMessage, ErrorFields, FieldDescription};
use bytes::Bytes;
use std::io;

/// Upper bound on a single message. Only startup and small result sets flow
/// through this crate, so anything larger is treated as a corrupt header.
const MAX_MESSAGE_LENGTH: usize = 64 * 1024 * 1024;

/// Decode one backend message from the front of `data`
///
/// Returns `Ok(None)` when more bytes are needed, or the message and the
/// number of bytes it occupied.
pub fn decode_message(data: &[u8]) -> io::Result<Option<(BackendMessage, usize)>> {
    if data.len() < 5 {
        return Ok(None);
    }

    let tag = data[0];
    let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    if len < 4 || len as usize > MAX_MESSAGE_LENGTH {
        return Err(invalid(format!("invalid message length {}", len)));
    }
    let len = len as usize;

    if data.len() < len + 1 {
        return Ok(None);
    }

    let mut body = Reader::new(&data[5..len + 1]);
    let msg = match tag {
        tags::AUTHENTICATION => decode_authentication(&mut body)?,
        tags::BACKEND_KEY_DATA => BackendMessage::BackendKeyData {
            process_id: body.i32()?,
            secret_key: body.i32()?,
        },
        tags::COMMAND_COMPLETE => BackendMessage::CommandComplete(body.cstr()?),
        tags::DATA_ROW => decode_data_row(&mut body)?,
        tags::EMPTY_QUERY_RESPONSE => BackendMessage::EmptyQueryResponse,
        tags::ERROR_RESPONSE => BackendMessage::ErrorResponse(decode_error_fields(&mut body)?),
        tags::NOTICE_RESPONSE => BackendMessage::NoticeResponse(decode_error_fields(&mut body)?),
        tags::PARAMETER_STATUS => BackendMessage::ParameterStatus {
            name: body.cstr()?,
            value: body.cstr()?,
        },
        tags::READY_FOR_QUERY => BackendMessage::ReadyForQuery { status: body.u8()? },
        tags::ROW_DESCRIPTION => decode_row_description(&mut body)?,
        other => return Err(invalid(format!("unknown message tag: 0x{:02X}", other))),
    };

    Ok(Some((msg, len + 1)))
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Bounds-checked cursor over a message body
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.remaining().len() < n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "message body truncated",
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> io::Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> io::Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr(&mut self) -> io::Result<String> {
        let end = self
            .remaining()
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| invalid("missing null terminator in string".into()))?;
        let s = String::from_utf8_lossy(self.take(end)?).into_owned();
        self.pos += 1;
        Ok(s)
    }
}

fn decode_authentication(body: &mut Reader<'_>) -> io::Result<BackendMessage> {
    let auth_msg = match body.i32()? {
        auth::OK => AuthenticationMessage::Ok,
        auth::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
        auth::MD5_PASSWORD => AuthenticationMessage::Md5Password,
        auth::SASL => {
            let mut mechanisms = Vec::new();
            while !body.remaining().is_empty() {
                let mechanism = body.cstr()?;
                if mechanism.is_empty() {
                    break;
                }
                mechanisms.push(mechanism);
            }
            AuthenticationMessage::Sasl { mechanisms }
        }
        other => AuthenticationMessage::Other(other),
    };
    Ok(BackendMessage::Authentication(auth_msg))
}

fn decode_data_row(body: &mut Reader<'_>) -> io::Result<BackendMessage> {
    let count = body.i16()?.max(0) as usize;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let len = body.i32()?;
        let field = if len < 0 {
            None
        } else {
            Some(Bytes::copy_from_slice(body.take(len as usize)?))
        };
        fields.push(field);
    }
    Ok(BackendMessage::DataRow(fields))
}

fn decode_row_description(body: &mut Reader<'_>) -> io::Result<BackendMessage> {
    let count = body.i16()?.max(0) as usize;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let name = body.cstr()?;
        let _table_oid = body.i32()?;
        let _column_attr = body.i16()?;
        let type_oid = body.i32()? as u32;
        let _type_size = body.i16()?;
        let _type_modifier = body.i32()?;
        let _format_code = body.i16()?;
        fields.push(FieldDescription { name, type_oid });
    }
    Ok(BackendMessage::RowDescription(fields))
}

fn decode_error_fields(body: &mut Reader<'_>) -> io::Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    loop {
        let field_type = body.u8()?;
        if field_type == 0 {
            break;
        }
        let value = body.cstr()?;
        match field_type {
            b'S' => fields.severity = Some(value),
            b'C' => fields.code = Some(value),
            b'M' => fields.message = Some(value),
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            _ => {}
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_authentication_ok() {
        let data = [b'R', 0, 0, 0, 8, 0, 0, 0, 0];
        let (msg, consumed) = decode_message(&data).unwrap().unwrap();
        assert!(matches!(
            msg,
            BackendMessage::Authentication(AuthenticationMessage::Ok)
        ));
        assert_eq!(consumed, 9);
    }

    #[test]
    fn test_decode_cleartext_request() {
        let data = [b'R', 0, 0, 0, 8, 0, 0, 0, 3];
        let (msg, _) = decode_message(&data).unwrap().unwrap();
        assert!(matches!(
            msg,
            BackendMessage::Authentication(AuthenticationMessage::CleartextPassword)
        ));
    }

    #[test]
    fn test_decode_incomplete_needs_more() {
        assert!(decode_message(&[b'Z', 0, 0]).unwrap().is_none());
        assert!(decode_message(&[b'Z', 0, 0, 0, 5]).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let err = decode_message(&[b'D', 0x7F, 0xFF, 0xFF, 0xFF]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = decode_message(&[b'D', 0, 0, 0, 2]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_decode_data_row_with_null() {
        let data = [
            b'D', 0, 0, 0, 15, // length
            0, 2, // two fields
            0, 0, 0, 1, b'1', // "1"
            0xFF, 0xFF, 0xFF, 0xFF, // NULL
        ];
        let (msg, consumed) = decode_message(&data).unwrap().unwrap();
        assert_eq!(consumed, 16);
        match msg {
            BackendMessage::DataRow(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].as_deref(), Some(&b"1"[..]));
                assert!(fields[1].is_none());
            }
            other => panic!("expected DataRow, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_response() {
        let mut data = vec![b'E', 0, 0, 0, 0];
        data.extend_from_slice(b"SFATAL\0C28P01\0Mpassword authentication failed\0\0");
        let len = (data.len() - 1) as i32;
        data[1..5].copy_from_slice(&len.to_be_bytes());

        let (msg, _) = decode_message(&data).unwrap().unwrap();
        match msg {
            BackendMessage::ErrorResponse(fields) => {
                assert_eq!(fields.severity.as_deref(), Some("FATAL"));
                assert!(fields.is_auth_failure());
                assert_eq!(
                    fields.to_string(),
                    "password authentication failed (28P01)"
                );
            }
            other => panic!("expected ErrorResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_ready_for_query() {
        let data = [b'Z', 0, 0, 0, 5, b'I'];
        let (msg, consumed) = decode_message(&data).unwrap().unwrap();
        assert!(matches!(msg, BackendMessage::ReadyForQuery { status: b'I' }));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_decode_unknown_tag() {
        let data = [b'?', 0, 0, 0, 4];
        assert!(decode_message(&data).is_err());
    }
}
