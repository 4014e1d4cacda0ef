//! Metrics for connection handling and authentication
//!
//! Recorded through the `metrics` facade; nothing is exported unless the embedding
//! application installs a recorder.

/// Metric label values
pub mod labels {
    /// Trust authentication
    pub const MECHANISM_TRUST: &str = "trust";
    /// Cleartext password
    pub const MECHANISM_CLEARTEXT: &str = "password";
    /// MD5 password
    pub const MECHANISM_MD5: &str = "md5";
    /// SCRAM-SHA-256
    pub const MECHANISM_SCRAM: &str = "scram-sha-256";
    /// TLS client certificate
    pub const MECHANISM_CERT: &str = "cert";
}

/// Counter metrics
pub mod counters {
    /// Accepted client connection
    pub fn connection_accepted() {
        metrics::counter!("pgwire_gateway_connections_total").increment(1);
    }

    /// Authentication flow started
    pub fn auth_attempted(mechanism: &'static str) {
        metrics::counter!("pgwire_gateway_auth_attempts_total", "mechanism" => mechanism)
            .increment(1);
    }

    /// Authentication flow completed
    pub fn auth_successful(mechanism: &'static str) {
        metrics::counter!("pgwire_gateway_auth_success_total", "mechanism" => mechanism)
            .increment(1);
    }

    /// Client rejected; `reason` is the SQLSTATE sent back (or a short tag)
    pub fn auth_failed(mechanism: &'static str, reason: impl Into<String>) {
        metrics::counter!(
            "pgwire_gateway_auth_failures_total",
            "mechanism" => mechanism,
            "reason" => reason.into()
        )
        .increment(1);
    }
}

/// Histogram metrics
pub mod histograms {
    /// Time from the startup message to `AuthenticationOk`
    pub fn auth_duration(mechanism: &'static str, duration_ms: u64) {
        metrics::histogram!("pgwire_gateway_auth_duration_ms", "mechanism" => mechanism)
            .record(duration_ms as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        counters::connection_accepted();
        counters::auth_attempted(labels::MECHANISM_SCRAM);
        counters::auth_successful(labels::MECHANISM_SCRAM);
        counters::auth_failed(labels::MECHANISM_MD5, "28P01");
        histograms::auth_duration(labels::MECHANISM_CERT, 12);
    }
}
