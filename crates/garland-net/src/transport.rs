use libp2p::identity::Keypair;
use tracing::info;

pub fn build_swarm(
    keypair: Keypair,
) -> anyhow::Result<libp2p::Swarm<super::behaviour::GarlandBehaviour>> {
    use std::time::Duration;

    use libp2p::{mdns, request_response, StreamProtocol, SwarmBuilder};

    use garland_shared::constants::{DEFAULT_REQUEST_TIMEOUT_SECS, PROTOCOL_NAME};

    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_behaviour(|key| -> std::result::Result<super::behaviour::GarlandBehaviour, Box<dyn std::error::Error + Send + Sync>> {
            let local_peer_id = key.public().to_peer_id();

            let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;

            // The inner timeout is wider than the envelope-level request
            // timeout so the outer layer always times out first and can
            // clean up its pending slot.
            let messaging_config = request_response::Config::default()
                .with_request_timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS + 10));

            let messaging = request_response::cbor::Behaviour::new(
                [(
                    StreamProtocol::new(PROTOCOL_NAME),
                    request_response::ProtocolSupport::Full,
                )],
                messaging_config,
            );

            Ok(super::behaviour::GarlandBehaviour { mdns, messaging })
        })?
        .with_swarm_config(|cfg| {
            // Sync sessions can idle between the manual trigger and the next
            // phase; keep connections up well past a single request.
            cfg.with_idle_connection_timeout(Duration::from_secs(120))
        })
        .build();

    info!(
        peer_id = %swarm.local_peer_id(),
        "Built Garland swarm with QUIC transport and mDNS discovery"
    );

    Ok(swarm)
}
