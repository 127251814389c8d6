use std::fmt::{self, Debug, Formatter};

use chrono::{DateTime, Utc};
use x509_parser::{
    extensions::GeneralName,
    prelude::{FromDer, X509Certificate},
};

use crate::{AcmeError, Result};

/// A certificate chain, leaf first, as downloaded from the ACME server.
#[derive(Clone, Default)]
pub struct CertificateChain {
    pem: Vec<u8>,
    certs: Vec<Vec<u8>>,
}

impl CertificateChain {
    /// Parses every `CERTIFICATE` block of a PEM document.
    ///
    /// A document without certificates yields an empty chain.
    pub fn from_pem(pem: impl Into<Vec<u8>>) -> Result<Self> {
        let pem = pem.into();
        let certs = rustls_pemfile::certs(&mut pem.as_slice())
            .map(|cert| cert.map(|cert| cert.to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| AcmeError::Certificate(format!("invalid pem: {err}")))?;
        Ok(Self { pem, certs })
    }

    /// Returns `true` if the chain contains no certificates.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Returns the number of certificates in the chain.
    #[inline]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Returns the DER encoded certificates, leaf first.
    pub fn certificates(&self) -> impl Iterator<Item = &[u8]> {
        self.certs.iter().map(Vec::as_slice)
    }

    /// Returns the PEM document the chain was parsed from.
    pub fn pem(&self) -> &[u8] {
        &self.pem
    }

    /// Returns the expiry time of the leaf certificate.
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.leaf().ok().flatten().map(|leaf| leaf.not_after)
    }

    pub(crate) fn leaf(&self) -> Result<Option<Leaf>> {
        let Some(der) = self.certs.first() else {
            return Ok(None);
        };
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|err| AcmeError::Certificate(err.to_string()))?;

        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| AcmeError::Certificate("invalid expiry time".to_string()))?;
        let public_key = cert.public_key().subject_public_key.data.to_vec();

        let mut names = Vec::new();
        if let Some(san) = cert
            .subject_alternative_name()
            .map_err(|err| AcmeError::Certificate(err.to_string()))?
        {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(name) = name {
                    names.push(name.to_string());
                }
            }
        }
        if names.is_empty() {
            names.extend(
                cert.subject()
                    .iter_common_name()
                    .filter_map(|cn| cn.as_str().ok())
                    .map(ToString::to_string),
            );
        }

        Ok(Some(Leaf {
            not_after,
            public_key,
            names,
        }))
    }
}

impl Debug for CertificateChain {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateChain")
            .field("len", &self.certs.len())
            .field("not_after", &self.not_after())
            .finish()
    }
}

/// The parts of a leaf certificate that decide renewal.
pub(crate) struct Leaf {
    pub(crate) not_after: DateTime<Utc>,
    /// Raw subject public key bits.
    pub(crate) public_key: Vec<u8>,
    /// DNS names from the SAN extension, or the common name without one.
    pub(crate) names: Vec<String>,
}

impl Leaf {
    pub(crate) fn covers(&self, host: &str) -> bool {
        self.names.iter().any(|name| host_matches(name, host))
    }
}

fn host_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.');
    let host = host.trim_end_matches('.');

    if pattern.eq_ignore_ascii_case(host) {
        return true;
    }

    match (pattern.strip_prefix("*."), host.split_once('.')) {
        (Some(suffix), Some((label, rest))) => {
            !label.is_empty() && label != "*" && rest.eq_ignore_ascii_case(suffix)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{managed_cert::CertificateKey, testing};

    #[test]
    fn empty_pem() {
        let chain = CertificateChain::from_pem("").unwrap();
        assert!(chain.is_empty());
        assert!(chain.leaf().unwrap().is_none());
        assert!(chain.not_after().is_none());
    }

    #[test]
    fn parse_chain() {
        let key = CertificateKey::generate().unwrap();
        let leaf = testing::self_signed(&key, &["example.com", "www.example.com"], None);
        let other = testing::self_signed(&CertificateKey::generate().unwrap(), &["ca.test"], None);

        let mut pem = leaf.pem().to_vec();
        pem.extend_from_slice(other.pem());
        let chain = CertificateChain::from_pem(pem).unwrap();
        assert_eq!(chain.len(), 2);

        let info = chain.leaf().unwrap().unwrap();
        assert_eq!(info.names, ["example.com", "www.example.com"]);
        assert_eq!(info.public_key, key.public_key_raw());
        assert!(chain.not_after().unwrap() > Utc::now());
    }

    #[test]
    fn host_matching() {
        assert!(host_matches("example.com", "EXAMPLE.com"));
        assert!(host_matches("example.com.", "example.com"));
        assert!(host_matches("*.example.com", "www.example.com"));
        assert!(host_matches("*.example.com", "*.example.com"));
        assert!(!host_matches("*.example.com", "example.com"));
        assert!(!host_matches("*.example.com", "a.b.example.com"));
        assert!(!host_matches("www.example.com", "example.com"));
    }
}
