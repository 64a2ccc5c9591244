//! Persistent node identity.
//!
//! The libp2p keypair determines the peer id other devices see; keeping it
//! on disk keeps the peer id stable across restarts, which matters because
//! sync partners remember each other by peer id.

use std::path::Path;

use libp2p::identity::Keypair;
use tracing::info;

/// Load the keypair from `path`, generating and persisting a fresh one on
/// first run.
pub fn load_or_generate(path: &Path) -> anyhow::Result<Keypair> {
    if path.exists() {
        let bytes = std::fs::read(path)?;
        let keypair = Keypair::from_protobuf_encoding(&bytes)?;
        info!(path = %path.display(), "Loaded node identity");
        return Ok(keypair);
    }

    let keypair = Keypair::generate_ed25519();
    let bytes = keypair.to_protobuf_encoding()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;

    info!(path = %path.display(), "Generated new node identity");
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");

        let first = load_or_generate(&path).unwrap();
        let second = load_or_generate(&path).unwrap();

        assert_eq!(
            first.public().to_peer_id(),
            second.public().to_peer_id()
        );
    }
}
