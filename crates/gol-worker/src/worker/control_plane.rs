//! Worker Control Plane - self-subscription with the broker
//!
//! After the ROUTER socket is bound the worker dials the broker once, sends
//! `Subscribe { worker_address, callback }` and hangs up. From then on the
//! broker dials back and drives the worker; nothing flows on this socket.

use std::net::{IpAddr, UdpSocket};

use anyhow::{Context, Result};

use gol_protocol::{
    BrokerCommand, BrokerResponse, RpcClient, StatusReport, Subscription, EXECUTE_TURN_METHOD,
};

use super::WorkerConfig;

/// Address of the interface used for outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick a route.
pub fn detect_outbound_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}

/// `host:port` the broker should dial back
pub fn advertised_address(config: &WorkerConfig, port: u16) -> Result<String> {
    let host = if config.advertise_host == "auto" {
        detect_outbound_ip()
            .context("Failed to detect outbound interface address")?
            .to_string()
    } else {
        config.advertise_host.clone()
    };
    Ok(format!("{}:{}", host, port))
}

/// Register this worker with the broker
pub async fn subscribe(config: &WorkerConfig, worker_address: &str) -> Result<StatusReport> {
    tracing::info!(
        "Subscribing {} with broker at {}",
        worker_address,
        config.broker_endpoint
    );

    let mut client = RpcClient::connect(
        &config.broker_endpoint,
        config.connect_timeout,
        config.request_timeout,
    )
    .await
    .with_context(|| format!("Failed to dial broker at {}", config.broker_endpoint))?;

    let command = BrokerCommand::Subscribe(Subscription {
        worker_address: worker_address.to_string(),
        callback: EXECUTE_TURN_METHOD.to_string(),
    });

    let response: BrokerResponse = client
        .call(&command)
        .await
        .context("Subscribe request failed")?;

    match response {
        BrokerResponse::Status(status) => {
            tracing::info!("Subscribed: {}", status.message);
            Ok(status)
        }
        BrokerResponse::Error(failure) => Err(anyhow::anyhow!("Subscription rejected: {}", failure)),
        other => Err(anyhow::anyhow!(
            "Unexpected response to Subscribe: {:?}",
            other
        )),
    }
}
