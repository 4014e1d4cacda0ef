//! Frontend message decoding
//!
//! Every function takes one complete message as produced by
//! [`MessageBuffer`](super::MessageBuffer): untyped `length + payload` before startup,
//! `type + length + payload` afterwards.

use super::codec::Reader;
use super::constants::{
    frontend, CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, SSL_REQUEST_CODE,
};
use super::message::{InitialMessage, StartupMessage};
use crate::{Error, Result};

/// Decode the first message of a connection (or the one following an `SSLRequest`).
///
/// The request code decides between negotiation requests and a real startup message;
/// negotiation codes are only honored when the length matches the request exactly.
pub fn decode_initial_message(msg: &[u8]) -> Result<InitialMessage> {
    let mut reader = Reader::new(msg);
    let len = reader.int32()?;
    if len as usize != msg.len() {
        return Err(Error::Protocol(format!(
            "startup length {} does not match message size {}",
            len,
            msg.len()
        )));
    }

    let code = reader.int32()?;
    match (code, len) {
        (SSL_REQUEST_CODE, 8) => Ok(InitialMessage::SslRequest),
        (GSSENC_REQUEST_CODE, 8) => Ok(InitialMessage::GssEncRequest),
        (CANCEL_REQUEST_CODE, 16) => Ok(InitialMessage::CancelRequest {
            process_id: reader.int32()?,
            secret_key: reader.int32()?,
        }),
        _ => decode_startup(msg).map(InitialMessage::Startup),
    }
}

/// Decode a startup message: `int32 len, int16 major, int16 minor`, then `key\0value\0`
/// pairs closed by an empty key.
///
/// The version is returned as sent; checking it is the caller's job so that an
/// unsupported version can be reported with its own error.
pub fn decode_startup(msg: &[u8]) -> Result<StartupMessage> {
    let mut reader = Reader::new(msg);
    let _len = reader.int32()?;
    let major_version = reader.int16()?;
    let minor_version = reader.int16()?;

    let mut parameters = Vec::new();
    loop {
        // A missing final terminator is tolerated when the pairs end cleanly
        if reader.remaining() == 0 {
            break;
        }
        let key = reader.cstring()?;
        if key.is_empty() {
            break;
        }
        let value = reader.cstring()?;
        parameters.push((key.to_string(), value.to_string()));
    }

    Ok(StartupMessage {
        major_version,
        minor_version,
        parameters,
    })
}

/// Message type byte of a typed message
pub fn message_tag(msg: &[u8]) -> Result<u8> {
    msg.first()
        .copied()
        .ok_or_else(|| Error::Protocol("empty message".to_string()))
}

/// Reader positioned after the `type + length` header, after checking the type
fn typed_body(msg: &[u8], expected: u8) -> Result<Reader<'_>> {
    let mut reader = Reader::new(msg);
    let tag = reader.byte()?;
    if tag != expected {
        return Err(Error::Protocol(format!(
            "expected message '{}', got '{}'",
            expected as char, tag as char
        )));
    }
    let _len = reader.int32()?;
    Ok(reader)
}

/// Decode a `PasswordMessage`: the raw cstring bytes of the password (or MD5 hash)
pub fn decode_password(msg: &[u8]) -> Result<&[u8]> {
    typed_body(msg, frontend::PASSWORD)?.cstring_bytes()
}

/// Body of a `SASLInitialResponse`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslInitialResponse<'a> {
    /// Selected mechanism
    pub mechanism: &'a str,
    /// Client-first message (empty when the client sent length -1)
    pub data: &'a [u8],
}

/// Decode a `SASLInitialResponse`: mechanism cstring, int32 length, client-first message
pub fn decode_sasl_initial_response(msg: &[u8]) -> Result<SaslInitialResponse<'_>> {
    let mut reader = typed_body(msg, frontend::PASSWORD)?;
    let mechanism = reader.cstring()?;
    let len = reader.int32()?;
    let data = if len < 0 { &[][..] } else { reader.bytes(len as usize)? };
    Ok(SaslInitialResponse { mechanism, data })
}

/// Decode a `SASLResponse`: the rest of the message is the SASL payload
pub fn decode_sasl_response(msg: &[u8]) -> Result<&[u8]> {
    let mut reader = typed_body(msg, frontend::PASSWORD)?;
    let remaining = reader.remaining();
    reader.bytes(remaining)
}

/// Decode a simple `Query`
pub fn decode_query(msg: &[u8]) -> Result<&str> {
    typed_body(msg, frontend::QUERY)?.cstring()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn startup(params: &[(&str, &str)], major: i16, minor: i16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&major.to_be_bytes());
        body.extend_from_slice(&minor.to_be_bytes());
        for (k, v) in params {
            body.extend_from_slice(k.as_bytes());
            body.push(0);
            body.extend_from_slice(v.as_bytes());
            body.push(0);
        }
        body.push(0);
        let mut msg = ((body.len() + 4) as i32).to_be_bytes().to_vec();
        msg.extend(body);
        msg
    }

    fn typed(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut msg = vec![tag];
        msg.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        msg.extend_from_slice(body);
        msg
    }

    #[test]
    fn test_decode_ssl_request() {
        let msg = [0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F];
        assert_eq!(decode_initial_message(&msg).unwrap(), InitialMessage::SslRequest);
    }

    #[test]
    fn test_decode_gssenc_request() {
        let msg = [0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x30];
        assert_eq!(decode_initial_message(&msg).unwrap(), InitialMessage::GssEncRequest);
    }

    #[test]
    fn test_decode_cancel_request() {
        let mut msg = vec![0, 0, 0, 16, 0x04, 0xD2, 0x16, 0x2E];
        msg.extend_from_slice(&42i32.to_be_bytes());
        msg.extend_from_slice(&7i32.to_be_bytes());
        assert_eq!(
            decode_initial_message(&msg).unwrap(),
            InitialMessage::CancelRequest {
                process_id: 42,
                secret_key: 7
            }
        );
    }

    #[test]
    fn test_decode_startup() {
        let msg = startup(&[("user", "alice"), ("database", "app")], 3, 0);
        match decode_initial_message(&msg).unwrap() {
            InitialMessage::Startup(s) => {
                assert_eq!((s.major_version, s.minor_version), (3, 0));
                assert_eq!(s.get("user"), Some("alice"));
                assert_eq!(s.parameters[1], ("database".into(), "app".into()));
            }
            other => panic!("expected startup, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_startup_keeps_unsupported_version() {
        let s = decode_startup(&startup(&[("user", "u")], 3, 1)).unwrap();
        assert_eq!(s.minor_version, 1);
    }

    #[test]
    fn test_decode_startup_truncated_value() {
        let mut msg = vec![0, 0, 0, 14, 0, 3, 0, 0];
        msg.extend_from_slice(b"user\0a");
        assert!(matches!(decode_startup(&msg), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_startup_length_mismatch() {
        let mut msg = startup(&[("user", "u")], 3, 0);
        msg[3] += 1;
        assert!(decode_initial_message(&msg).is_err());
    }

    #[test]
    fn test_decode_password() {
        let msg = typed(b'p', b"md5abc\0");
        assert_eq!(decode_password(&msg).unwrap(), b"md5abc");
    }

    #[test]
    fn test_decode_sasl_initial_response() {
        let mut body = b"SCRAM-SHA-256\0".to_vec();
        let first = b"n,,n=*,r=abc";
        body.extend_from_slice(&(first.len() as i32).to_be_bytes());
        body.extend_from_slice(first);

        let msg = typed(b'p', &body);
        let resp = decode_sasl_initial_response(&msg).unwrap();
        assert_eq!(resp.mechanism, "SCRAM-SHA-256");
        assert_eq!(resp.data, first);
    }

    #[test]
    fn test_decode_sasl_initial_response_overlong_data() {
        let mut body = b"SCRAM-SHA-256\0".to_vec();
        body.extend_from_slice(&100i32.to_be_bytes());
        body.extend_from_slice(b"short");
        assert!(decode_sasl_initial_response(&typed(b'p', &body)).is_err());
    }

    #[test]
    fn test_decode_sasl_response() {
        let msg = typed(b'p', b"c=biws,r=abc,p=xyz");
        assert_eq!(decode_sasl_response(&msg).unwrap(), b"c=biws,r=abc,p=xyz");
    }

    #[test]
    fn test_decode_query_checks_tag() {
        assert_eq!(decode_query(&typed(b'Q', b"SELECT 1\0")).unwrap(), "SELECT 1");
        assert!(decode_query(&typed(b'p', b"SELECT 1\0")).is_err());
    }
}
