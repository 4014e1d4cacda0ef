//! Postgres protocol constants

/// Protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 0x0003_0000;

/// SSLRequest code (80877103 = 1234 << 16 | 5679)
pub const SSL_REQUEST_CODE: i32 = 0x04D2_162F;

/// GSSENCRequest code (80877104 = 1234 << 16 | 5680)
pub const GSSENC_REQUEST_CODE: i32 = 0x04D2_1630;

/// CancelRequest code (80877102 = 1234 << 16 | 5678)
pub const CANCEL_REQUEST_CODE: i32 = 0x04D2_162E;

/// Maximum message length (1 GB), matching PostgreSQL's own `PQ_LARGE_MESSAGE_LIMIT`.
pub const MAX_MESSAGE_LENGTH: usize = 1_073_741_824;

/// Largest message accepted before startup, PostgreSQL's `MAX_STARTUP_PACKET_LENGTH`.
pub const MAX_STARTUP_MESSAGE_LENGTH: usize = 10_000;

/// Largest message accepted while authenticating, PostgreSQL's `PG_MAX_AUTH_TOKEN_LENGTH`.
pub const MAX_AUTH_MESSAGE_LENGTH: usize = 65_535;

/// Frontend (client → server) message tags
pub mod frontend {
    /// Bind
    pub const BIND: u8 = b'B';
    /// Close
    pub const CLOSE: u8 = b'C';
    /// CopyData
    pub const COPY_DATA: u8 = b'd';
    /// CopyDone
    pub const COPY_DONE: u8 = b'c';
    /// CopyFail
    pub const COPY_FAIL: u8 = b'f';
    /// Describe
    pub const DESCRIBE: u8 = b'D';
    /// Execute
    pub const EXECUTE: u8 = b'E';
    /// Flush
    pub const FLUSH: u8 = b'H';
    /// FunctionCall
    pub const FUNCTION_CALL: u8 = b'F';
    /// Parse
    pub const PARSE: u8 = b'P';
    /// PasswordMessage, SASLInitialResponse and SASLResponse
    pub const PASSWORD: u8 = b'p';
    /// Simple query
    pub const QUERY: u8 = b'Q';
    /// Sync
    pub const SYNC: u8 = b'S';
    /// Terminate
    pub const TERMINATE: u8 = b'X';
}

/// Backend (server → client) message tags
pub mod tags {
    /// Authentication request
    pub const AUTHENTICATION: u8 = b'R';

    /// Backend key data
    pub const BACKEND_KEY_DATA: u8 = b'K';

    /// Command complete
    pub const COMMAND_COMPLETE: u8 = b'C';

    /// Data row
    pub const DATA_ROW: u8 = b'D';

    /// Empty query response
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';

    /// Error response
    pub const ERROR_RESPONSE: u8 = b'E';

    /// Notice response
    pub const NOTICE_RESPONSE: u8 = b'N';

    /// Parameter status
    pub const PARAMETER_STATUS: u8 = b'S';

    /// Ready for query
    pub const READY_FOR_QUERY: u8 = b'Z';

    /// Row description
    pub const ROW_DESCRIPTION: u8 = b'T';
}

/// Authentication types
pub mod auth {
    /// Authentication successful
    pub const OK: i32 = 0;

    /// Cleartext password required
    pub const CLEARTEXT_PASSWORD: i32 = 3;

    /// MD5 password required
    pub const MD5_PASSWORD: i32 = 5;

    /// SASL mechanisms available (Postgres 10+)
    pub const SASL: i32 = 10;

    /// SASL server challenge
    pub const SASL_CONTINUE: i32 = 11;

    /// SASL server final message
    pub const SASL_FINAL: i32 = 12;
}

/// Transaction status
pub mod tx_status {
    /// Idle (not in transaction)
    pub const IDLE: u8 = b'I';

    /// In transaction block
    pub const IN_TRANSACTION: u8 = b'T';

    /// Failed transaction (queries will be rejected until END)
    pub const FAILED: u8 = b'E';
}

/// SQLSTATE codes sent by the gateway
pub mod sqlstate {
    /// connection_exception
    pub const CONNECTION_EXCEPTION: &str = "08000";

    /// protocol_violation
    pub const PROTOCOL_VIOLATION: &str = "08P01";

    /// invalid_authorization_specification
    pub const INVALID_AUTHORIZATION_SPECIFICATION: &str = "28000";

    /// invalid_password
    pub const INVALID_PASSWORD: &str = "28P01";

    /// feature_not_supported
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";

    /// internal_error
    pub const INTERNAL_ERROR: &str = "XX000";
}

/// Human-readable name of a frontend message tag, for logging.
pub fn frontend_message_name(tag: u8) -> &'static str {
    match tag {
        frontend::BIND => "Bind",
        frontend::CLOSE => "Close",
        frontend::COPY_DATA => "CopyData",
        frontend::COPY_DONE => "CopyDone",
        frontend::COPY_FAIL => "CopyFail",
        frontend::DESCRIBE => "Describe",
        frontend::EXECUTE => "Execute",
        frontend::FLUSH => "Flush",
        frontend::FUNCTION_CALL => "FunctionCall",
        frontend::PARSE => "Parse",
        frontend::PASSWORD => "PasswordMessage",
        frontend::QUERY => "Query",
        frontend::SYNC => "Sync",
        frontend::TERMINATE => "Terminate",
        _ => "Unknown",
    }
}

/// Human-readable name of a backend message tag, for logging.
pub fn backend_message_name(tag: u8) -> &'static str {
    match tag {
        tags::AUTHENTICATION => "Authentication",
        tags::BACKEND_KEY_DATA => "BackendKeyData",
        tags::COMMAND_COMPLETE => "CommandComplete",
        tags::DATA_ROW => "DataRow",
        tags::EMPTY_QUERY_RESPONSE => "EmptyQueryResponse",
        tags::ERROR_RESPONSE => "ErrorResponse",
        tags::NOTICE_RESPONSE => "NoticeResponse",
        tags::PARAMETER_STATUS => "ParameterStatus",
        tags::READY_FOR_QUERY => "ReadyForQuery",
        tags::ROW_DESCRIPTION => "RowDescription",
        _ => "Unknown",
    }
}
