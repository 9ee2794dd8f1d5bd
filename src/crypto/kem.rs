use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use log::debug;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::cipher::{cbc_decrypt, cbc_encrypt, SessionKey, AES_BLOCK_SIZE};
use super::policy::Policy;
use super::CryptoError;

/// Binds a fresh session key to an access policy and recovers it again.
pub trait KeyEncapsulation: Send + Sync {
    /// Returns a new session key together with the capsule that carries it.
    fn encapsulate(&self, policy: &str) -> Result<(SessionKey, Vec<u8>), CryptoError>;

    /// Recovers the session key from a capsule, failing if the holder may not open it.
    fn decapsulate(&self, capsule: &[u8]) -> Result<SessionKey, CryptoError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicParams {
    pub wrap_key: [u8; AES_BLOCK_SIZE],
}

impl PublicParams {
    pub fn generate() -> Self {
        PublicParams {
            wrap_key: rand::random(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        save_json(self, path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    pub attributes: BTreeSet<String>,
}

impl PrivateKey {
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PrivateKey {
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        save_json(self, path)
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, CryptoError> {
    let content = fs::read_to_string(path).map_err(|source| CryptoError::KeyFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|e| CryptoError::InvalidKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<(), CryptoError> {
    let content = serde_json::to_string_pretty(value).map_err(|e| CryptoError::InvalidKey {
        path: PathBuf::from(path),
        reason: e.to_string(),
    })?;
    fs::write(path, content).map_err(|source| CryptoError::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Policy-gated key wrapping.
///
/// Capsule layout: `[u32 BE policy_len][policy utf-8][16-byte wrapped session key]`. The key is
/// wrapped under the public parameters, so anyone holding them can open any capsule; the policy
/// check only models the attribute gate.
#[derive(Debug, Clone)]
pub struct PolicyGate {
    params: PublicParams,
    key: Option<PrivateKey>,
}

impl PolicyGate {
    /// Encapsulation only. Decapsulation fails without a private key.
    pub fn new(params: PublicParams) -> Self {
        PolicyGate { params, key: None }
    }

    pub fn with_private_key(params: PublicParams, key: PrivateKey) -> Self {
        PolicyGate {
            params,
            key: Some(key),
        }
    }
}

impl KeyEncapsulation for PolicyGate {
    fn encapsulate(&self, policy: &str) -> Result<(SessionKey, Vec<u8>), CryptoError> {
        // reject bad policies before they get sealed into a container
        policy.parse::<Policy>()?;
        let policy_len = u32::try_from(policy.len()).map_err(|_| CryptoError::InvalidPolicy {
            policy: policy.to_string(),
            reason: "policy too long".to_string(),
        })?;

        let session_key: SessionKey = rand::random();
        let mut wrapped = session_key;
        cbc_encrypt(&self.params.wrap_key, &mut wrapped)?;

        let mut capsule = Vec::with_capacity(4 + policy.len() + AES_BLOCK_SIZE);
        capsule.extend_from_slice(&policy_len.to_be_bytes());
        capsule.extend_from_slice(policy.as_bytes());
        capsule.extend_from_slice(&wrapped);
        Ok((session_key, capsule))
    }

    fn decapsulate(&self, capsule: &[u8]) -> Result<SessionKey, CryptoError> {
        let key = self.key.as_ref().ok_or(CryptoError::MissingPrivateKey)?;

        if capsule.len() < 4 {
            return Err(CryptoError::MalformedCapsule("missing policy length".to_string()));
        }
        let policy_len = BigEndian::read_u32(&capsule[..4]) as usize;
        let rest = &capsule[4..];
        if rest.len() != policy_len + AES_BLOCK_SIZE {
            return Err(CryptoError::MalformedCapsule(format!(
                "expected {} bytes after the length prefix, found {}",
                policy_len + AES_BLOCK_SIZE,
                rest.len()
            )));
        }
        let policy_text = std::str::from_utf8(&rest[..policy_len])
            .map_err(|e| CryptoError::MalformedCapsule(e.to_string()))?;
        let policy: Policy = policy_text.parse()?;

        if !policy.is_satisfied_by(&key.attributes) {
            debug!("[decryptor] attributes {:?} do not satisfy {policy}", key.attributes);
            return Err(CryptoError::PolicyNotSatisfied(policy_text.to_string()));
        }

        let mut session_key = SessionKey::default();
        session_key.copy_from_slice(&rest[policy_len..]);
        cbc_decrypt(&self.params.wrap_key, &mut session_key)?;
        Ok(session_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capsule_opens_for_matching_attributes() {
        let params = PublicParams::generate();
        let (key, capsule) = PolicyGate::new(params.clone())
            .encapsulate("viewer and (hd or 2 of (a, b, c))")
            .unwrap();

        let gate = PolicyGate::with_private_key(params, PrivateKey::new(["viewer", "a", "c"]));
        assert_eq!(gate.decapsulate(&capsule).unwrap(), key);
    }

    #[test]
    fn capsule_refuses_other_attributes() {
        let params = PublicParams::generate();
        let (_, capsule) = PolicyGate::new(params.clone()).encapsulate("admin").unwrap();

        let gate = PolicyGate::with_private_key(params, PrivateKey::new(["viewer"]));
        assert!(matches!(
            gate.decapsulate(&capsule),
            Err(CryptoError::PolicyNotSatisfied(p)) if p == "admin"
        ));
    }

    #[test]
    fn malformed_capsules() {
        let params = PublicParams::generate();
        let gate = PolicyGate::with_private_key(params.clone(), PrivateKey::new(["a"]));
        let (_, mut capsule) = PolicyGate::new(params).encapsulate("a").unwrap();
        capsule.pop();

        assert!(matches!(gate.decapsulate(&capsule), Err(CryptoError::MalformedCapsule(_))));
        assert!(matches!(gate.decapsulate(&[0, 0]), Err(CryptoError::MalformedCapsule(_))));
    }

    #[test]
    fn decapsulate_needs_private_key() {
        let gate = PolicyGate::new(PublicParams::generate());
        let (_, capsule) = gate.encapsulate("a").unwrap();
        assert!(matches!(gate.decapsulate(&capsule), Err(CryptoError::MissingPrivateKey)));
    }

    #[test]
    fn key_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pub_path = dir.path().join("pub_key");
        let priv_path = dir.path().join("priv_key");

        let params = PublicParams::generate();
        params.save(&pub_path).unwrap();
        assert_eq!(PublicParams::load(&pub_path).unwrap(), params);

        let key = PrivateKey::new(["b", "a"]);
        key.save(&priv_path).unwrap();
        assert_eq!(PrivateKey::load(&priv_path).unwrap(), key);

        assert!(matches!(
            PublicParams::load(&dir.path().join("missing")),
            Err(CryptoError::KeyFile { .. })
        ));
        std::fs::write(&pub_path, "{\"wrap_key\": [1, 2]}").unwrap();
        assert!(matches!(PublicParams::load(&pub_path), Err(CryptoError::InvalidKey { .. })));
    }
}
