use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::digest::{digest, Digest, SHA256};
use serde::Serialize;

use crate::{keypair::AccountKey, Result};

#[derive(Serialize)]
struct Protected<'a> {
    alg: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
    nonce: &'a str,
    url: &'a str,
}

impl<'a> Protected<'a> {
    fn base64(
        key: &AccountKey,
        kid: Option<&'a str>,
        nonce: &'a str,
        url: &'a str,
    ) -> Result<String> {
        let protected = Self {
            alg: "RS256",
            jwk: match kid {
                None => Some(Jwk::new(key)),
                Some(_) => None,
            },
            kid,
            nonce,
            url,
        };
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected)?))
    }
}

/// RSA public key in JWK form.
///
/// The members are declared in lexicographic order, so the serialized form
/// is also the canonical input of the RFC 7638 thumbprint.
#[derive(Serialize)]
struct Jwk {
    e: String,
    kty: &'static str,
    n: String,
}

impl Jwk {
    fn new(key: &AccountKey) -> Self {
        Self {
            e: URL_SAFE_NO_PAD.encode(key.exponent()),
            kty: "RSA",
            n: URL_SAFE_NO_PAD.encode(key.modulus()),
        }
    }

    fn thumb_sha256_base64(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(sha256(json)))
    }
}

fn sha256(data: impl AsRef<[u8]>) -> Digest {
    digest(&SHA256, data.as_ref())
}

#[derive(Serialize)]
struct Body {
    protected: String,
    payload: String,
    signature: String,
}

/// Builds the flattened JWS body of a signed request.
///
/// Without `kid` the account public key is embedded as `jwk`, which is only
/// accepted by the server for account registration.
pub(crate) fn sign(
    key: &AccountKey,
    kid: Option<&str>,
    nonce: &str,
    url: &str,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let protected = Protected::base64(key, kid, nonce, url)?;
    let payload = URL_SAFE_NO_PAD.encode(payload);
    let combined = format!("{}.{}", &protected, &payload);
    let signature = URL_SAFE_NO_PAD.encode(key.sign(combined.as_bytes())?);
    Ok(serde_json::to_vec(&Body {
        protected,
        payload,
        signature,
    })?)
}

pub(crate) fn thumbprint(key: &AccountKey) -> Result<String> {
    Jwk::new(key).thumb_sha256_base64()
}

pub(crate) fn key_authorization(key: &AccountKey, token: &str) -> Result<String> {
    Ok(format!("{}.{}", token, thumbprint(key)?))
}
