//! Node identity discovery from the node's own files.
//!
//! Chain id comes from `config/genesis.json`; node id is derived from
//! the ed25519 key in `config/node_key.json`: the hex encoding of the
//! first 20 bytes of SHA-256 over the public key.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::SigningKey;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("decode node key: {0}")]
    KeyEncoding(#[from] base64::DecodeError),
    #[error("node key is {0} bytes, expected a 64-byte ed25519 keypair")]
    KeyLength(usize),
    #[error("invalid ed25519 keypair: {0}")]
    Key(#[from] ed25519_dalek::SignatureError),
}

#[derive(Deserialize)]
struct GenesisDoc {
    chain_id: String,
}

#[derive(Deserialize)]
struct NodeKey {
    priv_key: PrivKey,
}

#[derive(Deserialize)]
struct PrivKey {
    value: String,
}

pub fn chain_id(node_home: &Path) -> Result<String, DiscoveryError> {
    let path = node_home.join("config").join("genesis.json");
    let doc: GenesisDoc = read_json(&path)?;
    Ok(doc.chain_id)
}

pub fn node_id(node_home: &Path) -> Result<String, DiscoveryError> {
    let path = node_home.join("config").join("node_key.json");
    let node_key: NodeKey = read_json(&path)?;

    let raw = BASE64.decode(node_key.priv_key.value.trim())?;
    let keypair: [u8; 64] = raw
        .try_into()
        .map_err(|bytes: Vec<u8>| DiscoveryError::KeyLength(bytes.len()))?;
    let signing_key = SigningKey::from_keypair_bytes(&keypair)?;

    let digest = Sha256::digest(signing_key.verifying_key().as_bytes());
    Ok(hex_encode(&digest[..20]))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DiscoveryError> {
    let data = std::fs::read(path).map_err(|source| DiscoveryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| DiscoveryError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_node_files(home: &Path, chain: &str, keypair: &[u8; 64]) {
        let config_dir = home.join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("genesis.json"),
            format!(r#"{{"chain_id":"{chain}","app_state":{{}}}}"#),
        )
        .unwrap();
        fs::write(
            config_dir.join("node_key.json"),
            format!(
                r#"{{"priv_key":{{"type":"tendermint/PrivKeyEd25519","value":"{}"}}}}"#,
                BASE64.encode(keypair)
            ),
        )
        .unwrap();
    }

    #[test]
    fn chain_id_comes_from_genesis() {
        let tmp = TempDir::new().unwrap();
        let keypair = SigningKey::from_bytes(&[7u8; 32]).to_keypair_bytes();
        write_node_files(tmp.path(), "testchain-1", &keypair);

        assert_eq!(chain_id(tmp.path()).unwrap(), "testchain-1");
    }

    #[test]
    fn node_id_is_truncated_sha256_of_public_key() {
        let tmp = TempDir::new().unwrap();
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        write_node_files(tmp.path(), "testchain-1", &signing_key.to_keypair_bytes());

        let id = node_id(tmp.path()).unwrap();
        let expected = hex_encode(&Sha256::digest(signing_key.verifying_key().as_bytes())[..20]);

        assert_eq!(id, expected);
        assert_eq!(id.len(), 40);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn missing_genesis_is_a_read_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            chain_id(tmp.path()),
            Err(DiscoveryError::Read { .. })
        ));
    }

    #[test]
    fn truncated_key_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let config_dir = tmp.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("node_key.json"),
            format!(
                r#"{{"priv_key":{{"type":"tendermint/PrivKeyEd25519","value":"{}"}}}}"#,
                BASE64.encode([1u8; 32])
            ),
        )
        .unwrap();

        assert!(matches!(
            node_id(tmp.path()),
            Err(DiscoveryError::KeyLength(32))
        ));
    }
}
