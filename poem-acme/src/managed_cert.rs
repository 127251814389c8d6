use std::{
    fmt::{self, Debug, Formatter},
    panic::{catch_unwind, AssertUnwindSafe},
    time::{Duration, SystemTime},
};

use chrono::Utc;
use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256,
};

use crate::{AcmeError, CertificateChain, CsrSubject, Result};

/// The private key of a managed certificate.
pub struct CertificateKey(KeyPair);

impl CertificateKey {
    /// Generates a new ECDSA P-256 key.
    pub fn generate() -> Result<Self> {
        Ok(Self(KeyPair::generate(&PKCS_ECDSA_P256_SHA256)?))
    }

    /// Loads a PKCS#8 PEM encoded key (ECDSA, Ed25519 or RSA).
    pub fn from_pem(pem: &str) -> Result<Self> {
        KeyPair::from_pem(pem)
            .map(Self)
            .map_err(|err| AcmeError::InvalidKey(err.to_string()))
    }

    /// Serializes the key as PKCS#8 PEM.
    pub fn serialize_pem(&self) -> String {
        self.0.serialize_pem()
    }

    pub(crate) fn public_key_raw(&self) -> &[u8] {
        self.0.public_key_raw()
    }

    /// Returns a copy of the key pair for a single rcgen signing operation,
    /// which takes ownership of its key.
    pub(crate) fn to_key_pair(&self) -> Result<KeyPair> {
        Ok(KeyPair::from_der(&self.0.serialize_der())?)
    }

    pub(crate) fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        self.0.algorithm()
    }
}

impl Debug for CertificateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateKey")
            .field("algorithm", self.0.algorithm())
            .finish()
    }
}

type Listener = Box<dyn Fn(&ManagedCertificate) + Send + Sync>;

/// A set of domains, the key and the chain that certifies them.
///
/// The certificate is renewed by the [`AcmeAccount`](crate::AcmeAccount)
/// that owns it.
pub struct ManagedCertificate {
    domains: Vec<String>,
    key: CertificateKey,
    chain: CertificateChain,
    wait_until: Option<SystemTime>,
    listeners: Vec<Listener>,
}

impl ManagedCertificate {
    /// Create a managed certificate. The first domain becomes the subject
    /// common name, all of them are listed as subject alternative names.
    pub fn new<I, T>(domains: I, key: CertificateKey, chain: CertificateChain) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
            key,
            chain,
            wait_until: None,
            listeners: Vec::new(),
        }
    }

    /// Splits a whitespace separated domain list.
    pub fn parse_domains(domains: &str) -> Vec<String> {
        domains.split_whitespace().map(ToString::to_string).collect()
    }

    /// Returns the domains.
    #[inline]
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Returns the private key.
    #[inline]
    pub fn key(&self) -> &CertificateKey {
        &self.key
    }

    /// Returns the current certificate chain.
    #[inline]
    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }

    /// Returns `true` if a certificate chain is installed.
    #[inline]
    pub fn has_cert(&self) -> bool {
        !self.chain.is_empty()
    }

    /// The certificate is not attempted again before this time.
    #[inline]
    pub fn wait_until(&self) -> Option<SystemTime> {
        self.wait_until
    }

    /// Adds a callback which is called every time a new chain is installed.
    ///
    /// Listeners are called in registration order. A panicking listener is
    /// logged and does not prevent the remaining ones from running.
    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: Fn(&ManagedCertificate) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Returns `true` if the certificate needs to be replaced within `period`:
    /// there is no chain, the leaf expires within `period`, it was not issued
    /// for the key, or it does not cover every domain.
    pub fn expired_in(&self, period: Duration) -> bool {
        let leaf = match self.chain.leaf() {
            Ok(Some(leaf)) => leaf,
            Ok(None) => return true,
            Err(err) => {
                tracing::warn!(domains = ?self.domains, error = %err, "unreadable certificate");
                return true;
            }
        };

        let remaining = leaf.not_after.timestamp() - Utc::now().timestamp();
        if remaining < i64::try_from(period.as_secs()).unwrap_or(i64::MAX) {
            return true;
        }

        if leaf.public_key != self.key.public_key_raw() {
            return true;
        }

        !self.domains.iter().all(|domain| leaf.covers(domain))
    }

    /// Returns `true` if the certificate should be renewed now: it expires
    /// within `renew_period` and its backoff has passed.
    pub fn is_ready_for_renewal(&self, renew_period: Duration) -> bool {
        if let Some(wait_until) = self.wait_until {
            if SystemTime::now() < wait_until {
                return false;
            }
        }
        self.expired_in(renew_period)
    }

    /// Builds a DER encoded certificate signing request for the domains,
    /// signed with the key.
    pub fn make_csr(&self) -> Result<Vec<u8>> {
        self.make_csr_with_subject(&CsrSubject::default())
    }

    /// Like [`ManagedCertificate::make_csr`], with extra subject entries after
    /// the common name.
    pub fn make_csr_with_subject(&self, subject: &CsrSubject) -> Result<Vec<u8>> {
        let common_name = self.domains.first().ok_or(AcmeError::NoDomains)?;

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, common_name.as_str());
        for (ty, value) in [
            (DnType::OrganizationName, &subject.organization),
            (DnType::OrganizationalUnitName, &subject.organizational_unit),
            (DnType::LocalityName, &subject.locality),
            (DnType::StateOrProvinceName, &subject.state_or_province),
            (DnType::CountryName, &subject.country),
        ] {
            if let Some(value) = value {
                distinguished_name.push(ty, value.as_str());
            }
        }

        let mut params = CertificateParams::new(self.domains.clone());
        params.distinguished_name = distinguished_name;
        params.alg = self.key.algorithm();
        params.key_pair = Some(self.key.to_key_pair()?);
        Ok(Certificate::from_params(params)?.serialize_request_der()?)
    }

    /// Replaces the chain and notifies the listeners.
    pub(crate) fn update_chain(&mut self, chain: CertificateChain) {
        self.chain = chain;

        tracing::info!(
            domains = ?self.domains,
            expires_at = ?self.chain.not_after(),
            "certificate installed",
        );

        for listener in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(self))).is_err() {
                tracing::error!(domains = ?self.domains, "certificate listener panicked");
            }
        }
    }

    pub(crate) fn set_wait_until(&mut self, wait_until: SystemTime) {
        self.wait_until = Some(wait_until);
    }
}

impl Debug for ManagedCertificate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedCertificate")
            .field("domains", &self.domains)
            .field("chain", &self.chain)
            .field("wait_until", &self.wait_until)
            .finish()
    }
}
