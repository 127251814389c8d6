use std::fmt::{self, Debug, Formatter};

use ring::{
    rand::SystemRandom,
    rsa::PublicKeyComponents,
    signature::{RsaKeyPair, RSA_PKCS1_SHA256},
};
use rsa::{
    pkcs8::{EncodePrivateKey, LineEnding},
    rand_core::OsRng,
    RsaPrivateKey,
};
use rustls_pemfile::Item;

use crate::{AcmeError, Result};

/// The RSA key pair of an ACME account, used to sign every request with
/// `RS256`.
pub struct AccountKey(RsaKeyPair);

impl AccountKey {
    /// Loads the key from a PEM document holding either a PKCS#8
    /// (`PRIVATE KEY`) or a PKCS#1 (`RSA PRIVATE KEY`) RSA private key.
    pub fn from_pem(pem: impl AsRef<[u8]>) -> Result<Self> {
        for item in rustls_pemfile::read_all(&mut pem.as_ref()) {
            match item? {
                Item::Pkcs8Key(key) => return Self::from_pkcs8(key.secret_pkcs8_der()),
                Item::Pkcs1Key(key) => return Self::from_pkcs1(key.secret_pkcs1_der()),
                _ => {}
            }
        }
        Err(AcmeError::InvalidKey(
            "no RSA private key found in pem".to_string(),
        ))
    }

    /// Loads the key from PKCS#8 DER.
    pub fn from_pkcs8(der: impl AsRef<[u8]>) -> Result<Self> {
        RsaKeyPair::from_pkcs8(der.as_ref())
            .map(AccountKey)
            .map_err(|err| AcmeError::InvalidKey(err.to_string()))
    }

    /// Loads the key from PKCS#1 DER.
    pub fn from_pkcs1(der: impl AsRef<[u8]>) -> Result<Self> {
        RsaKeyPair::from_der(der.as_ref())
            .map(AccountKey)
            .map_err(|err| AcmeError::InvalidKey(err.to_string()))
    }

    /// Generates a new RSA private key and returns it as a PKCS#8 PEM
    /// document, suitable for [`AccountKey::from_pem`].
    pub fn generate_pem(bits: usize) -> Result<String> {
        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|err| AcmeError::InvalidKey(format!("failed to generate key: {err}")))?;
        let pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|err| AcmeError::InvalidKey(format!("failed to encode key: {err}")))?;
        Ok(pem.to_string())
    }

    pub(crate) fn sign(&self, message: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let mut signature = vec![0; self.0.public().modulus_len()];
        self.0
            .sign(
                &RSA_PKCS1_SHA256,
                &SystemRandom::new(),
                message.as_ref(),
                &mut signature,
            )
            .map_err(|_| AcmeError::Sign)?;
        Ok(signature)
    }

    /// Big-endian modulus without leading zeros.
    pub(crate) fn modulus(&self) -> Vec<u8> {
        PublicKeyComponents::<Vec<u8>>::from(self.0.public()).n
    }

    /// Big-endian public exponent without leading zeros.
    pub(crate) fn exponent(&self) -> Vec<u8> {
        PublicKeyComponents::<Vec<u8>>::from(self.0.public()).e
    }

    #[cfg(test)]
    pub(crate) fn public_key_der(&self) -> &[u8] {
        self.0.public().as_ref()
    }
}

impl Debug for AccountKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("bits", &(self.0.public().modulus_len() * 8))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use ring::signature::{UnparsedPublicKey, RSA_PKCS1_2048_8192_SHA256};

    use super::*;
    use crate::testing;

    #[test]
    fn load_pkcs8_and_pkcs1() {
        let pkcs8 = AccountKey::from_pem(testing::ACCOUNT_KEY_PEM).unwrap();
        let pkcs1 = AccountKey::from_pem(testing::ACCOUNT_KEY_PKCS1_PEM).unwrap();
        assert_eq!(pkcs8.modulus(), pkcs1.modulus());
        assert_eq!(pkcs8.exponent(), [0x01, 0x00, 0x01]);
        assert_eq!(pkcs8.modulus().len(), 256);
    }

    #[test]
    fn public_components_are_big_endian() {
        let key = testing::account_key();
        assert_eq!(key.modulus()[..3], [0xcf, 0x86, 0x96]);
        assert_eq!(key.exponent()[0], 0x01);
    }

    #[test]
    fn reject_non_rsa_pem() {
        assert!(matches!(
            AccountKey::from_pem("-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n"),
            Err(AcmeError::InvalidKey(_)) | Err(AcmeError::Io(_))
        ));
        assert!(matches!(
            AccountKey::from_pem(""),
            Err(AcmeError::InvalidKey(_))
        ));
    }

    #[test]
    fn signature_verifies() {
        let key = testing::account_key();
        let signature = key.sign(b"protected.payload").unwrap();
        UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, key.public_key_der())
            .verify(b"protected.payload", &signature)
            .unwrap();
    }
}
