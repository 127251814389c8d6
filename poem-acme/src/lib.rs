//! Automatic certificate issuance and renewal for Poem using ACME v2.
//!
//! An [`AcmeAccount`] owns a set of [`ManagedCertificate`]s and renews each
//! of them through the `HTTP-01` challenge once it gets close to expiry. The
//! challenge responses are served by the endpoint returned from
//! [`AcmeAccount::http_01_endpoint`].
//!
//! Reference: <https://datatracker.ietf.org/doc/html/rfc8555>
//!
//! # Example
//!
//! ```no_run
//! use poem::{listener::TcpListener, Server};
//! use poem_acme::{
//!     AccountKey, AcmeAccount, AcmeConfig, CertificateChain, CertificateKey, ManagedCertificate,
//!     LETS_ENCRYPT_PRODUCTION,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AcmeConfig::builder()
//!     .directory_url(LETS_ENCRYPT_PRODUCTION)
//!     .contact("admin@example.com")
//!     .build()?;
//! let key = AccountKey::from_pem(std::fs::read("account.pem")?)?;
//!
//! let mut account = AcmeAccount::new(config, key);
//! let mut cert = ManagedCertificate::new(
//!     ["example.com", "www.example.com"],
//!     CertificateKey::generate()?,
//!     CertificateChain::default(),
//! );
//! cert.add_listener(|cert| {
//!     let _ = std::fs::write("chain.pem", cert.chain().pem());
//! });
//! account.add(cert);
//!
//! let endpoint = account.http_01_endpoint();
//! tokio::spawn(account.run());
//! Server::new(TcpListener::bind("0.0.0.0:80"))
//!     .run(endpoint)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![doc(html_favicon_url = "https://raw.githubusercontent.com/poem-web/poem/master/favicon.ico")]
#![doc(html_logo_url = "https://raw.githubusercontent.com/poem-web/poem/master/logo.png")]
#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

mod account;
mod chain;
mod challenge;
mod client;
mod config;
mod error;
mod jose;
mod keypair;
mod managed_cert;
mod protocol;

#[cfg(test)]
mod testing;

pub use account::{AcmeAccount, State};
pub use chain::CertificateChain;
pub use challenge::{ChallengeResponder, Http01Endpoint, HTTP_01_PATH_PREFIX};
pub use client::{HttpClient, HttpRequest, HttpResponse};
pub use config::{AcmeConfig, AcmeConfigBuilder, CsrSubject};
pub use error::{AcmeError, Result};
pub use keypair::AccountKey;
pub use managed_cert::{CertificateKey, ManagedCertificate};

/// Let's Encrypt production directory url
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory url
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
