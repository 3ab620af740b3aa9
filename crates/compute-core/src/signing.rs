//! Request signing. Compute resource requests carry a timestamped payload
//! signed with the resource's ed25519 private key; the resource id is the hex
//! public key.

use ed25519_dalek::{Signer, SigningKey};

/// Why a private key could not be used for signing.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The key is not valid hex.
    #[error("private key is not valid hex")]
    InvalidHex,
    /// The decoded key has the wrong length.
    #[error("private key must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

fn signing_key(private_key_hex: &str) -> Result<SigningKey, SigningError> {
    let bytes = hex::decode(private_key_hex.trim()).map_err(|_| SigningError::InvalidHex)?;
    let seed: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SigningError::InvalidLength(bytes.len()))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Signs `payload` with the hex-encoded private key, returning the hex signature.
pub fn sign_payload(private_key_hex: &str, payload: &str) -> Result<String, SigningError> {
    let key = signing_key(private_key_hex)?;
    Ok(hex::encode(key.sign(payload.as_bytes()).to_bytes()))
}

/// Derives the hex public key (the compute resource id) from the private key.
pub fn public_key_hex(private_key_hex: &str) -> Result<String, SigningError> {
    let key = signing_key(private_key_hex)?;
    Ok(hex::encode(key.verifying_key().to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    const KEY: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    #[test]
    fn signature_verifies_against_derived_public_key() {
        let payload = r#"{"path":"/api/x","timestamp":1700000000}"#;
        let signature_hex = sign_payload(KEY, payload).unwrap();

        let public_hex = public_key_hex(KEY).unwrap();
        let public_bytes: [u8; 32] = hex::decode(public_hex).unwrap().try_into().unwrap();
        let verifying = VerifyingKey::from_bytes(&public_bytes).unwrap();
        let signature_bytes: [u8; 64] =
            hex::decode(signature_hex).unwrap().try_into().unwrap();
        let signature = Signature::from_bytes(&signature_bytes);
        assert!(verifying.verify(payload.as_bytes(), &signature).is_ok());
        assert!(verifying.verify(b"tampered", &signature).is_err());
    }

    #[test]
    fn bad_keys_are_rejected() {
        assert!(matches!(sign_payload("zz", "x"), Err(SigningError::InvalidHex)));
        assert!(matches!(
            sign_payload("abcd", "x"),
            Err(SigningError::InvalidLength(2))
        ));
    }
}
