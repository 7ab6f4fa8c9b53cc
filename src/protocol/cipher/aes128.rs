//! AES-128 ECB single-block decrypt (spec §4.7, Kia V6 decoder).
//!
//! Thin wrapper over the `aes` crate's fixed-function block cipher —
//! there is no mode-of-operation layering here, Kia V6 decrypts exactly
//! one 16-byte block per decoded frame.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, KeyInit};
use aes::Aes128;

/// Decrypts one 16-byte ECB block under `key` in place.
pub fn decrypt_block(key: &[u8; 16], block: &mut [u8; 16]) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut ga = *GenericArray::from_slice(block);
    cipher.decrypt_block(&mut ga);
    block.copy_from_slice(ga.as_slice());
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::{generic_array::GenericArray as GA, BlockEncrypt};

    #[test]
    fn decrypt_inverts_encrypt() {
        let key = [0x2Bu8; 16];
        let cipher = Aes128::new(GA::from_slice(&key));
        let mut block = *GA::from_slice(&[0x11u8; 16]);
        let original = block;
        cipher.encrypt_block(&mut block);
        let mut raw: [u8; 16] = block.into();
        decrypt_block(&key, &mut raw);
        assert_eq!(&raw[..], original.as_slice());
    }
}
