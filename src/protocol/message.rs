//! Protocol message types

use std::fmt;

/// First message on a fresh connection (no type byte)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialMessage {
    /// SSLRequest (TLS negotiation)
    SslRequest,

    /// GSSENCRequest (GSSAPI encryption negotiation)
    GssEncRequest,

    /// CancelRequest for another backend
    CancelRequest {
        /// Process ID of the target backend
        process_id: i32,
        /// Secret key of the target backend
        secret_key: i32,
    },

    /// Startup message
    Startup(StartupMessage),
}

/// Parsed startup message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    /// Protocol major version
    pub major_version: i16,
    /// Protocol minor version
    pub minor_version: i16,
    /// Connection parameters, in the order the client sent them
    pub parameters: Vec<(String, String)>,
}

impl StartupMessage {
    /// Look up a startup parameter; a repeated key reads as its last value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Backend message (server → client)
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Authentication request
    Authentication(AuthenticationMessage),

    /// Command complete
    CommandComplete(String),

    /// Error response
    ErrorResponse(BackendError),

    /// Notice response
    NoticeResponse(BackendError),

    /// Parameter status
    ParameterStatus {
        /// Parameter name
        name: String,
        /// Parameter value
        value: String,
    },

    /// Ready for query
    ReadyForQuery {
        /// Transaction status
        status: u8,
    },
}

/// Authentication message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationMessage {
    /// Authentication OK
    Ok,

    /// Cleartext password required
    CleartextPassword,

    /// MD5 password required
    Md5Password {
        /// Salt for MD5 hash
        salt: [u8; 4],
    },

    /// SASL authentication mechanisms available (Postgres 10+)
    Sasl {
        /// List of SASL mechanism names (e.g., ["SCRAM-SHA-256"])
        mechanisms: Vec<String>,
    },

    /// SASL continuation message (server challenge)
    SaslContinue {
        /// SASL server first message data
        data: Vec<u8>,
    },

    /// SASL final message (server verification)
    SaslFinal {
        /// SASL server final message data
        data: Vec<u8>,
    },
}

/// Error severity as sent in the `S`/`V` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// ERROR: the current command failed, the session continues
    Error,
    /// FATAL: the session is terminated
    Fatal,
    /// PANIC
    Panic,
    /// WARNING
    Warning,
    /// NOTICE
    Notice,
    /// DEBUG
    Debug,
    /// INFO
    Info,
    /// LOG
    Log,
}

impl Severity {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
            Severity::Panic => "PANIC",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Log => "LOG",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error/notice record sent to the client.
///
/// Only `severity`, `code` and `message` are mandatory; every optional field that is set
/// becomes one tagged field in the encoded `ErrorResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    /// Severity
    pub severity: Severity,
    /// SQLSTATE code
    pub code: String,
    /// Primary human-readable message
    pub message: String,
    /// Secondary message with more detail
    pub detail: Option<String>,
    /// Suggestion what to do about the problem
    pub hint: Option<String>,
    /// Cursor position in the original query string (1-based, in characters)
    pub position: Option<u32>,
    /// Cursor position in an internally generated command
    pub internal_position: Option<u32>,
    /// Text of the internally generated command
    pub internal_query: Option<String>,
    /// Context in which the error occurred
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file reporting the error
    pub file: Option<String>,
    /// Source line reporting the error
    pub line: Option<u32>,
    /// Source routine reporting the error
    pub routine: Option<String>,
}

impl BackendError {
    /// Create a record with the given severity
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
            internal_position: None,
            internal_query: None,
            where_: None,
            schema: None,
            table: None,
            column: None,
            data_type: None,
            constraint: None,
            file: None,
            line: None,
            routine: None,
        }
    }

    /// FATAL record; the connection closes after sending it
    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, code, message)
    }

    /// ERROR record; the session continues
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    /// Set the detail field
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the hint field
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Whether sending this record ends the session
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity, Severity::Fatal | Severity::Panic)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)
    }
}

impl std::error::Error for BackendError {}
