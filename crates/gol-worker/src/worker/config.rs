//! Worker Configuration Module

use std::time::Duration;

use gol_protocol::{DEFAULT_BROKER_PORT, DEFAULT_WORKER_PORT};

/// Worker configuration
///
/// Contains everything needed to bring a worker process up: where it listens,
/// how it advertises itself, and how it reaches the broker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier used in logs
    pub worker_id: String,
    /// Interface the ROUTER socket binds to
    pub bind_host: String,
    /// Listening port (0 picks an ephemeral port)
    pub port: u16,
    /// Broker endpoint dialled for self-subscription
    pub broker_endpoint: String,
    /// Host the broker should dial back; "auto" detects the outbound address
    pub advertise_host: String,
    /// Upper bound on dialling the broker
    pub connect_timeout: Duration,
    /// Upper bound on waiting for the Subscribe reply
    pub request_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker".to_string(),
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_WORKER_PORT,
            broker_endpoint: format!("tcp://127.0.0.1:{}", DEFAULT_BROKER_PORT),
            advertise_host: "127.0.0.1".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Config for an in-process worker bound to loopback on an ephemeral port
    pub fn local() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            port: 0,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_broker(mut self, endpoint: impl Into<String>) -> Self {
        self.broker_endpoint = endpoint.into();
        self
    }

    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = host.into();
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    /// ZeroMQ endpoint for the ROUTER socket
    pub fn bind_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.bind_host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.broker_endpoint, "tcp://127.0.0.1:8030");
        assert_eq!(config.bind_endpoint(), "tcp://0.0.0.0:8080");
    }

    #[test]
    fn test_builder() {
        let config = WorkerConfig::local()
            .with_id("w1")
            .with_broker("tcp://10.0.0.1:9000")
            .with_advertise_host("auto");

        assert_eq!(config.worker_id, "w1");
        assert_eq!(config.bind_endpoint(), "tcp://127.0.0.1:0");
        assert_eq!(config.broker_endpoint, "tcp://10.0.0.1:9000");
        assert_eq!(config.advertise_host, "auto");
    }
}
