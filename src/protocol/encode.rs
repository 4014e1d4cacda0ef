//! Backend message encoding

use super::codec::Writer;
use super::constants::{auth, tags, tx_status};
use super::message::{AuthenticationMessage, BackendError, BackendMessage};
use bytes::Bytes;

/// Encode a backend message into one owned buffer
pub fn encode_message(msg: &BackendMessage) -> Bytes {
    let mut writer = Writer::new();

    match msg {
        BackendMessage::Authentication(auth) => encode_authentication(&mut writer, auth),
        BackendMessage::CommandComplete(tag) => {
            writer.add_cstring(tag);
            writer.flush(Some(tags::COMMAND_COMPLETE))
        }
        BackendMessage::ErrorResponse(err) => {
            write_error_fields(&mut writer, err);
            writer.flush(Some(tags::ERROR_RESPONSE))
        }
        BackendMessage::NoticeResponse(err) => {
            write_error_fields(&mut writer, err);
            writer.flush(Some(tags::NOTICE_RESPONSE))
        }
        BackendMessage::ParameterStatus { name, value } => {
            writer.add_cstring(name).add_cstring(value);
            writer.flush(Some(tags::PARAMETER_STATUS))
        }
        BackendMessage::ReadyForQuery { status } => {
            writer.add_bytes(&[*status]);
            writer.flush(Some(tags::READY_FOR_QUERY))
        }
    }
}

fn encode_authentication(writer: &mut Writer, msg: &AuthenticationMessage) -> Bytes {
    match msg {
        AuthenticationMessage::Ok => {
            writer.add_int32(auth::OK);
        }
        AuthenticationMessage::CleartextPassword => {
            writer.add_int32(auth::CLEARTEXT_PASSWORD);
        }
        AuthenticationMessage::Md5Password { salt } => {
            writer.add_int32(auth::MD5_PASSWORD).add_bytes(salt);
        }
        AuthenticationMessage::Sasl { mechanisms } => {
            writer.add_int32(auth::SASL);
            for mechanism in mechanisms {
                writer.add_cstring(mechanism);
            }
            // Empty string terminates the mechanism list
            writer.add_bytes(&[0]);
        }
        AuthenticationMessage::SaslContinue { data } => {
            writer.add_int32(auth::SASL_CONTINUE).add_bytes(data);
        }
        AuthenticationMessage::SaslFinal { data } => {
            writer.add_int32(auth::SASL_FINAL).add_bytes(data);
        }
    }
    writer.flush(Some(tags::AUTHENTICATION))
}

fn write_error_fields(writer: &mut Writer, err: &BackendError) {
    let severity = err.severity.as_str();
    writer.add_bytes(b"S").add_cstring(severity);
    writer.add_bytes(b"V").add_cstring(severity);
    writer.add_bytes(b"C").add_cstring(&err.code);
    writer.add_bytes(b"M").add_cstring(&err.message);

    let text_fields = [
        (b'D', &err.detail),
        (b'H', &err.hint),
    ];
    for (code, value) in text_fields {
        if let Some(value) = value {
            writer.add_bytes(&[code]).add_cstring(value);
        }
    }
    if let Some(position) = err.position {
        writer.add_bytes(b"P").add_cstring(&position.to_string());
    }
    if let Some(position) = err.internal_position {
        writer.add_bytes(b"p").add_cstring(&position.to_string());
    }

    let text_fields = [
        (b'q', &err.internal_query),
        (b'W', &err.where_),
        (b's', &err.schema),
        (b't', &err.table),
        (b'c', &err.column),
        (b'd', &err.data_type),
        (b'n', &err.constraint),
        (b'F', &err.file),
    ];
    for (code, value) in text_fields {
        if let Some(value) = value {
            writer.add_bytes(&[code]).add_cstring(value);
        }
    }
    if let Some(line) = err.line {
        writer.add_bytes(b"L").add_cstring(&line.to_string());
    }
    if let Some(routine) = &err.routine {
        writer.add_bytes(b"R").add_cstring(routine);
    }

    writer.add_bytes(&[0]);
}

/// Encode an `ErrorResponse`
pub fn encode_error_response(err: &BackendError) -> Bytes {
    encode_message(&BackendMessage::ErrorResponse(err.clone()))
}

/// Encode a `NoticeResponse`
pub fn encode_notice_response(err: &BackendError) -> Bytes {
    encode_message(&BackendMessage::NoticeResponse(err.clone()))
}

/// Encode an `Authentication` request
pub fn encode_authentication_message(msg: AuthenticationMessage) -> Bytes {
    encode_message(&BackendMessage::Authentication(msg))
}

/// Encode `ReadyForQuery` with idle transaction status
pub fn encode_ready_for_query() -> Bytes {
    encode_message(&BackendMessage::ReadyForQuery {
        status: tx_status::IDLE,
    })
}

/// Encode a `ParameterStatus`
pub fn encode_parameter_status(name: &str, value: &str) -> Bytes {
    encode_message(&BackendMessage::ParameterStatus {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Single-byte answer to an `SSLRequest` or `GSSENCRequest`: `S` to proceed, `N` to decline
pub fn encode_ssl_response(accept: bool) -> Bytes {
    let mut writer = Writer::new();
    writer.add_string(if accept { "S" } else { "N" });
    writer.flush(None)
}
