//! Field-level encryption of PLY frames.
//!
//! Selected geometry fields are stripped out of every record into a sidecar, the sidecar is
//! encrypted with a per-frame AES-128 session key, and the key travels in a capsule that only
//! opens for private keys whose attributes satisfy the frame's policy.

pub mod cipher;
pub mod container;
pub mod kem;
pub mod policy;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::trace;
use thiserror::Error;

use crate::error::StreamError;
use crate::ply::{FieldMask, FrameCodec};

pub use cipher::SessionKey;
pub use container::{Container, Trailer, TRAILER_MARKER};
pub use kem::{KeyEncapsulation, PolicyGate, PrivateKey, PublicParams};
pub use policy::Policy;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Failed to read key file {path:?}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid key file {path:?}: {reason}")]
    InvalidKey { path: PathBuf, reason: String },
    #[error("Invalid policy {policy:?}: {reason}")]
    InvalidPolicy { policy: String, reason: String },
    #[error("Malformed key capsule: {0}")]
    MalformedCapsule(String),
    #[error("Private key attributes do not satisfy policy {0:?}")]
    PolicyNotSatisfied(String),
    #[error("No private key loaded")]
    MissingPrivateKey,
    #[error("Cipher failure: {0}")]
    Cipher(String),
    #[error("Field mask selects no fields")]
    EmptyMask,
}

/// Everything needed to encrypt or decrypt frames of one session.
#[derive(Clone)]
pub struct CryptoContext {
    kem: Arc<dyn KeyEncapsulation>,
    mask: FieldMask,
    codec: FrameCodec,
}

impl CryptoContext {
    pub fn new(
        kem: Arc<dyn KeyEncapsulation>,
        mask: FieldMask,
        codec: FrameCodec,
    ) -> Result<Self, CryptoError> {
        if mask.is_empty() {
            return Err(CryptoError::EmptyMask);
        }
        Ok(CryptoContext { kem, mask, codec })
    }

    pub fn for_encryption(pub_key: &Path, mask: FieldMask) -> Result<Self, CryptoError> {
        let params = PublicParams::load(pub_key)?;
        Self::new(Arc::new(PolicyGate::new(params)), mask, FrameCodec::default())
    }

    pub fn for_decryption(
        pub_key: &Path,
        priv_key: &Path,
        mask: FieldMask,
    ) -> Result<Self, CryptoError> {
        let params = PublicParams::load(pub_key)?;
        let key = PrivateKey::load(priv_key)?;
        Self::new(
            Arc::new(PolicyGate::with_private_key(params, key)),
            mask,
            FrameCodec::default(),
        )
    }

    pub fn mask(&self) -> FieldMask {
        self.mask
    }

    /// Produces an encrypted container from a full frame.
    pub fn encrypt(&self, full: &[u8], policy: &str) -> Result<Vec<u8>, StreamError> {
        let stripped = self.codec.strip_fields(full, self.mask)?;
        let (key, capsule) = self.kem.encapsulate(policy)?;
        let sidecar_cipher = cipher::encrypt_framed(&key, &stripped.sidecar)?;
        // strip_fields already bounds the sidecar to a u32 length prefix
        let file_len = stripped.sidecar.len() as u32;

        let mut out = stripped.reduced;
        container::write_trailer(&mut out, file_len, &sidecar_cipher, &capsule)?;
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, StreamError> {
        self.decrypt_to(data, None)
    }

    /// Decrypts a container into the full frame, streaming it into `sink` as it is rebuilt.
    pub fn decrypt_to(
        &self,
        data: &[u8],
        sink: Option<&mut dyn Write>,
    ) -> Result<Vec<u8>, StreamError> {
        let container = Container::parse(data, self.mask)?;
        let key = self.kem.decapsulate(container.trailer.capsule)?;
        let sidecar = cipher::decrypt_framed(&key, container.trailer.sidecar_cipher)?;
        trace!(
            "[decryptor] {} records, {} sidecar bytes",
            container.layout.record_count(),
            sidecar.len()
        );
        let full = self
            .codec
            .reconstruct_with_layout(&container.layout, container.reduced, &sidecar, sink)?;
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ply::{fixtures, FormatError};

    fn contexts(attributes: &[&str], mask: &str) -> (CryptoContext, CryptoContext) {
        let params = PublicParams::generate();
        let mask: FieldMask = mask.parse().unwrap();
        let encryptor =
            CryptoContext::new(Arc::new(PolicyGate::new(params.clone())), mask, FrameCodec::default())
                .unwrap();
        let decryptor = CryptoContext::new(
            Arc::new(PolicyGate::with_private_key(
                params,
                PrivateKey::new(attributes.iter().copied()),
            )),
            mask,
            FrameCodec::with_batch_records(1),
        )
        .unwrap();
        (encryptor, decryptor)
    }

    fn frame() -> Vec<u8> {
        fixtures::xyz_rgb_frame(&[(1.0, 2.0, 3.0, 10, 20, 30), (4.0, 5.0, 6.0, 40, 50, 60)])
    }

    #[test]
    fn encrypt_then_decrypt() {
        let (encryptor, decryptor) = contexts(&["member"], "xy");
        let full = frame();
        let container = encryptor.encrypt(&full, "member or admin").unwrap();

        let header_len = fixtures::xyz_rgb_header(2).len();
        assert_eq!(&container[header_len + 14..header_len + 14 + 17], TRAILER_MARKER);
        // stripped x of the first record must not leak
        assert!(!container[header_len..header_len + 14]
            .windows(4)
            .any(|w| w == 1.0f32.to_le_bytes()));

        let mut sink = Vec::new();
        let restored = decryptor.decrypt_to(&container, Some(&mut sink)).unwrap();
        assert_eq!(restored, full);
        assert_eq!(sink, full);
    }

    #[test]
    fn corrupted_marker_is_a_format_error() {
        let (encryptor, decryptor) = contexts(&["member"], "xyz");
        let mut container = encryptor.encrypt(&frame(), "member").unwrap();
        let marker_at = fixtures::xyz_rgb_header(2).len() + 2 * 3;
        container[marker_at + 5] = b'#';

        match decryptor.decrypt(&container) {
            Err(StreamError::Format(FormatError::MissingMarker { offset })) => {
                assert_eq!(offset, marker_at)
            }
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn policy_mismatch_is_a_crypto_error() {
        let (encryptor, decryptor) = contexts(&["guest"], "z");
        let container = encryptor.encrypt(&frame(), "member").unwrap();
        assert!(matches!(
            decryptor.decrypt(&container),
            Err(StreamError::Crypto(CryptoError::PolicyNotSatisfied(_)))
        ));
    }

    #[test]
    fn deeply_nested_capsule_policy_fails_the_segment() {
        let (encryptor, decryptor) = contexts(&["a"], "xy");
        let sealed = encryptor.encrypt(&frame(), "a").unwrap();
        let parsed = Container::parse(&sealed, decryptor.mask()).unwrap();

        let policy = format!("{}a{}", "(".repeat(200_000), ")".repeat(200_000));
        let mut capsule = (policy.len() as u32).to_be_bytes().to_vec();
        capsule.extend_from_slice(policy.as_bytes());
        capsule.extend_from_slice(&[0; 16]);

        let mut forged = parsed.reduced.to_vec();
        container::write_trailer(&mut forged, 0, parsed.trailer.sidecar_cipher, &capsule).unwrap();

        assert!(matches!(
            decryptor.decrypt(&forged),
            Err(StreamError::Crypto(CryptoError::InvalidPolicy { .. }))
        ));
    }

    #[test]
    fn empty_mask_is_rejected() {
        let gate = Arc::new(PolicyGate::new(PublicParams::generate()));
        assert!(matches!(
            CryptoContext::new(gate, FieldMask::default(), FrameCodec::default()),
            Err(CryptoError::EmptyMask)
        ));
    }

    #[test]
    fn contexts_from_key_files() {
        let dir = tempfile::tempdir().unwrap();
        let pub_path = dir.path().join("pub_key");
        let priv_path = dir.path().join("priv_key");
        PublicParams::generate().save(&pub_path).unwrap();
        PrivateKey::new(["member"]).save(&priv_path).unwrap();

        let mask = "xz".parse().unwrap();
        let encryptor = CryptoContext::for_encryption(&pub_path, mask).unwrap();
        let decryptor = CryptoContext::for_decryption(&pub_path, &priv_path, mask).unwrap();
        let container = encryptor.encrypt(&frame(), "member").unwrap();
        assert_eq!(decryptor.decrypt(&container).unwrap(), frame());

        assert!(CryptoContext::for_decryption(&pub_path, &dir.path().join("nope"), mask).is_err());
    }
}
