//! Protocol message encoding

use super::constants::SSL_REQUEST_CODE;
use super::message::FrontendMessage;
use bytes::{BufMut, BytesMut};

/// Encode a frontend message into bytes
pub fn encode_message(msg: &FrontendMessage) -> BytesMut {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::Startup { version, params } => {
            // Startup has no type byte
            framed(&mut buf, None, |buf| {
                buf.put_i32(*version);
                for (key, value) in params {
                    put_cstr(buf, key);
                    put_cstr(buf, value);
                }
                buf.put_u8(0);
            });
        }
        FrontendMessage::Password(password) => {
            framed(&mut buf, Some(b'p'), |buf| put_cstr(buf, password));
        }
        FrontendMessage::Query(query) => {
            framed(&mut buf, Some(b'Q'), |buf| put_cstr(buf, query));
        }
        FrontendMessage::Terminate => {
            framed(&mut buf, Some(b'X'), |_| {});
        }
        FrontendMessage::SslRequest => {
            framed(&mut buf, None, |buf| buf.put_i32(SSL_REQUEST_CODE));
        }
    }

    buf
}

/// Write an optional tag, then a length-prefixed body (length includes itself)
fn framed(buf: &mut BytesMut, tag: Option<u8>, body: impl FnOnce(&mut BytesMut)) {
    if let Some(tag) = tag {
        buf.put_u8(tag);
    }
    let len_pos = buf.len();
    buf.put_i32(0);
    body(buf);
    let len = (buf.len() - len_pos) as i32;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}
