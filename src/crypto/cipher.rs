use aes::Aes128;
use byteorder::{BigEndian, ByteOrder};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use super::CryptoError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

pub const AES_BLOCK_SIZE: usize = 16;

/// Symmetric AES-128 key shared by the sidecar cipher and the key capsule.
pub type SessionKey = [u8; AES_BLOCK_SIZE];

const ZERO_IV: [u8; AES_BLOCK_SIZE] = [0; AES_BLOCK_SIZE];
const FRAME_PREFIX_LEN: usize = 4;

/// Encrypts `plaintext` framed as `[u32 BE len][plaintext][zero pad to 16]`.
pub fn encrypt_framed(key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let len = u32::try_from(plaintext.len())
        .map_err(|_| CryptoError::Cipher(format!("plaintext of {} bytes", plaintext.len())))?;
    let framed_len = FRAME_PREFIX_LEN + plaintext.len();
    let padded_len = framed_len.div_ceil(AES_BLOCK_SIZE) * AES_BLOCK_SIZE;

    let mut buf = Vec::with_capacity(padded_len);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(plaintext);
    buf.resize(padded_len, 0);
    cbc_encrypt(key, &mut buf)?;
    Ok(buf)
}

/// Reverses [`encrypt_framed`], returning the plaintext without prefix or padding.
pub fn decrypt_framed(key: &SessionKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::Cipher("empty ciphertext".to_string()));
    }
    let mut buf = ciphertext.to_vec();
    cbc_decrypt(key, &mut buf)?;

    let len = BigEndian::read_u32(&buf[..FRAME_PREFIX_LEN]) as usize;
    if FRAME_PREFIX_LEN + len > buf.len() {
        return Err(CryptoError::Cipher(format!(
            "framed length {len} exceeds {} decrypted bytes",
            buf.len() - FRAME_PREFIX_LEN
        )));
    }
    buf.truncate(FRAME_PREFIX_LEN + len);
    buf.drain(..FRAME_PREFIX_LEN);
    Ok(buf)
}

/// Encrypts whole blocks in place with a zero IV.
pub(crate) fn cbc_encrypt(key: &SessionKey, buf: &mut [u8]) -> Result<(), CryptoError> {
    check_blocks(buf.len())?;
    let len = buf.len();
    Aes128CbcEnc::new(key.into(), (&ZERO_IV).into())
        .encrypt_padded_mut::<NoPadding>(buf, len)
        .map_err(|_| CryptoError::Cipher("CBC encryption failed".to_string()))?;
    Ok(())
}

/// Decrypts whole blocks in place with a zero IV.
pub(crate) fn cbc_decrypt(key: &SessionKey, buf: &mut [u8]) -> Result<(), CryptoError> {
    check_blocks(buf.len())?;
    Aes128CbcDec::new(key.into(), (&ZERO_IV).into())
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|_| CryptoError::Cipher("CBC decryption failed".to_string()))?;
    Ok(())
}

fn check_blocks(len: usize) -> Result<(), CryptoError> {
    if len % AES_BLOCK_SIZE != 0 {
        return Err(CryptoError::Cipher(format!(
            "{len} bytes is not a multiple of the {AES_BLOCK_SIZE}-byte block size"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: SessionKey = [7; 16];

    #[test]
    fn framed_round_trip() {
        for len in [0, 1, 11, 12, 13, 100] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let ciphertext = encrypt_framed(&KEY, &plaintext).unwrap();
            assert_eq!(ciphertext.len() % AES_BLOCK_SIZE, 0);
            assert_eq!(ciphertext.len(), (4 + len as usize).div_ceil(16) * 16);
            assert_eq!(decrypt_framed(&KEY, &ciphertext).unwrap(), plaintext);
        }
    }

    #[test]
    fn framing_uses_zero_iv_and_padding() {
        let ciphertext = encrypt_framed(&KEY, b"abc").unwrap();
        let mut plain = ciphertext.clone();
        cbc_decrypt(&KEY, &mut plain).unwrap();
        assert_eq!(&plain[..4], &3u32.to_be_bytes());
        assert_eq!(&plain[4..7], b"abc");
        assert!(plain[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn unaligned_ciphertext_is_rejected() {
        assert!(matches!(decrypt_framed(&KEY, &[0; 17]), Err(CryptoError::Cipher(_))));
        assert!(matches!(decrypt_framed(&KEY, &[]), Err(CryptoError::Cipher(_))));
    }
}
