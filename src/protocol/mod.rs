//! Postgres wire protocol implementation (server side)

pub mod codec;
pub mod constants;
pub mod decode;
pub mod encode;
pub mod framer;
pub mod message;

pub use codec::{Reader, Writer};
pub use constants::sqlstate;
pub use decode::{
    decode_initial_message, decode_password, decode_query, decode_sasl_initial_response,
    decode_sasl_response, decode_startup, message_tag, SaslInitialResponse,
};
pub use encode::{
    encode_authentication_message, encode_error_response, encode_message,
    encode_notice_response, encode_parameter_status, encode_ready_for_query,
    encode_ssl_response,
};
pub use framer::MessageBuffer;
pub use message::{
    AuthenticationMessage, BackendError, BackendMessage, InitialMessage, Severity,
    StartupMessage,
};
