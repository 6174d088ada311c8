//! Structured per-request access logging (spec.md §4.E "Access logging").
//!
//! One `tracing` event per completed request, with the log level derived
//! from the response status class so a dashboard full of `200`s doesn't
//! drown out the `5xx`s in a noisy `info` stream.

use std::net::IpAddr;
use std::time::Duration;

pub struct AccessLogEntry<'a> {
    pub connection_token: usize,
    pub transaction_id: &'a str,
    pub method: &'a str,
    pub url: &'a str,
    pub status: u16,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub prep_time: Duration,
    pub total_time: Duration,
    pub client_ip: IpAddr,
    pub client_port: u16,
    pub forwarded_for: Option<&'a str>,
    pub account_id: Option<&'a str>,
    pub user_role: &'a str,
    pub access_mask: &'a str,
}

/// Emit one access log event. Level follows the response status class:
/// `5xx` -> error, `4xx` -> warn, everything else -> info.
pub fn record(entry: &AccessLogEntry) {
    match entry.status / 100 {
        5 => tracing::error!(
            conn = entry.connection_token,
            txn = entry.transaction_id,
            method = entry.method,
            url = entry.url,
            status = entry.status,
            bytes_in = entry.bytes_received,
            bytes_out = entry.bytes_sent,
            prep_ms = entry.prep_time.as_secs_f64() * 1000.0,
            total_ms = entry.total_time.as_secs_f64() * 1000.0,
            client = %entry.client_ip,
            port = entry.client_port,
            forwarded_for = entry.forwarded_for.unwrap_or(""),
            account = entry.account_id.unwrap_or(""),
            role = entry.user_role,
            acl = entry.access_mask,
            "request failed"
        ),
        4 => tracing::warn!(
            conn = entry.connection_token,
            txn = entry.transaction_id,
            method = entry.method,
            url = entry.url,
            status = entry.status,
            bytes_in = entry.bytes_received,
            bytes_out = entry.bytes_sent,
            prep_ms = entry.prep_time.as_secs_f64() * 1000.0,
            total_ms = entry.total_time.as_secs_f64() * 1000.0,
            client = %entry.client_ip,
            port = entry.client_port,
            forwarded_for = entry.forwarded_for.unwrap_or(""),
            account = entry.account_id.unwrap_or(""),
            role = entry.user_role,
            acl = entry.access_mask,
            "request rejected"
        ),
        _ => tracing::info!(
            conn = entry.connection_token,
            txn = entry.transaction_id,
            method = entry.method,
            url = entry.url,
            status = entry.status,
            bytes_in = entry.bytes_received,
            bytes_out = entry.bytes_sent,
            prep_ms = entry.prep_time.as_secs_f64() * 1000.0,
            total_ms = entry.total_time.as_secs_f64() * 1000.0,
            client = %entry.client_ip,
            port = entry.client_port,
            forwarded_for = entry.forwarded_for.unwrap_or(""),
            account = entry.account_id.unwrap_or(""),
            role = entry.user_role,
            acl = entry.access_mask,
            "request served"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_class_selects_level() {
        // Smoke-tests that building the entry and calling record() doesn't
        // panic across each status class; tracing output itself is only
        // observable through a subscriber, which access_log doesn't own.
        for status in [200u16, 404, 500] {
            record(&AccessLogEntry {
                connection_token: 1,
                transaction_id: "txn-1",
                method: "GET",
                url: "/api/v1/info",
                status,
                bytes_received: 128,
                bytes_sent: 256,
                prep_time: Duration::from_millis(1),
                total_time: Duration::from_millis(2),
                client_ip: "127.0.0.1".parse().unwrap(),
                client_port: 51234,
                forwarded_for: None,
                account_id: None,
                user_role: "anonymous",
                access_mask: "dashboard",
            });
        }
    }
}
