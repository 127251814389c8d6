use std::time::Duration;

use http::Uri;

use crate::{AcmeError, Result, LETS_ENCRYPT_STAGING};

const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(1200);
const DEFAULT_RENEW_PERIOD: Duration = Duration::from_secs(15 * 24 * 60 * 60);
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 5);
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Optional subject entries added to every certificate request after the
/// common name.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CsrSubject {
    /// Organization (`O`).
    pub organization: Option<String>,
    /// Organizational unit (`OU`).
    pub organizational_unit: Option<String>,
    /// City or town (`L`).
    pub locality: Option<String>,
    /// State or province (`ST`).
    pub state_or_province: Option<String>,
    /// Two-letter ISO country code (`C`).
    pub country: Option<String>,
}

/// ACME account configuration.
#[derive(Debug, Clone)]
pub struct AcmeConfig {
    pub(crate) directory_url: String,
    pub(crate) contacts: Vec<String>,
    pub(crate) retry_wait: Duration,
    pub(crate) max_retries: u32,
    pub(crate) renew_period: Duration,
    pub(crate) check_interval: Duration,
    pub(crate) subject: CsrSubject,
}

impl AcmeConfig {
    /// Create an ACME configuration builder.
    pub fn builder() -> AcmeConfigBuilder {
        AcmeConfigBuilder::new()
    }

    /// Returns the directory url.
    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    /// Returns the contact emails, without the `mailto:` scheme.
    pub fn contacts(&self) -> &[String] {
        &self.contacts
    }

    /// Returns how long a failed certificate waits before it is attempted
    /// again.
    pub fn retry_wait(&self) -> Duration {
        self.retry_wait
    }

    /// Returns how many times a pending step is polled before the
    /// certificate is failed.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns how long before expiry a certificate is renewed.
    pub fn renew_period(&self) -> Duration {
        self.renew_period
    }

    /// Returns the interval of [`AcmeAccount::run`](crate::AcmeAccount::run).
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Returns the extra subject entries of certificate requests.
    pub fn subject(&self) -> &CsrSubject {
        &self.subject
    }
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            directory_url: LETS_ENCRYPT_STAGING.to_string(),
            contacts: Vec::new(),
            retry_wait: DEFAULT_RETRY_WAIT,
            max_retries: DEFAULT_MAX_RETRIES,
            renew_period: DEFAULT_RENEW_PERIOD,
            check_interval: DEFAULT_CHECK_INTERVAL,
            subject: CsrSubject::default(),
        }
    }
}

/// ACME configuration builder
pub struct AcmeConfigBuilder {
    config: AcmeConfig,
}

impl AcmeConfigBuilder {
    pub(crate) fn new() -> Self {
        Self {
            config: AcmeConfig::default(),
        }
    }

    /// Sets the directory url.
    ///
    /// Defaults to [`LETS_ENCRYPT_STAGING`]
    #[must_use]
    pub fn directory_url(mut self, directory_url: impl Into<String>) -> Self {
        self.config.directory_url = directory_url.into();
        self
    }

    /// Add a contact email for the ACME account.
    #[must_use]
    pub fn contact(mut self, email: impl Into<String>) -> Self {
        let email = email.into();
        if !self.config.contacts.contains(&email) {
            self.config.contacts.push(email);
        }
        self
    }

    /// Add every email of a space separated list.
    #[must_use]
    pub fn contact_emails(self, emails: &str) -> Self {
        emails
            .split_whitespace()
            .fold(self, |builder, email| builder.contact(email))
    }

    /// Sets how long a failed certificate waits before it is attempted again.
    ///
    /// Defaults to 20 minutes.
    #[must_use]
    pub fn retry_wait(mut self, retry_wait: Duration) -> Self {
        self.config.retry_wait = retry_wait;
        self
    }

    /// Sets how many times a pending step is polled before the certificate is
    /// failed. Polls cut short by a challenge request are not counted.
    ///
    /// Defaults to `5`.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Renew certificates this long before they expire.
    ///
    /// Defaults to 15 days.
    #[must_use]
    pub fn renew_period(mut self, renew_period: Duration) -> Self {
        self.config.renew_period = renew_period;
        self
    }

    /// Sets how often [`AcmeAccount::run`](crate::AcmeAccount::run) checks
    /// the certificates.
    ///
    /// Defaults to 5 minutes.
    #[must_use]
    pub fn check_interval(mut self, check_interval: Duration) -> Self {
        self.config.check_interval = check_interval;
        self
    }

    /// Sets the certificate organization.
    #[must_use]
    pub fn organization(mut self, value: impl Into<String>) -> Self {
        self.config.subject.organization = Some(value.into());
        self
    }

    /// Sets the certificate organizational unit.
    #[must_use]
    pub fn organizational_unit(mut self, value: impl Into<String>) -> Self {
        self.config.subject.organizational_unit = Some(value.into());
        self
    }

    /// Sets the certificate city or town.
    #[must_use]
    pub fn locality(mut self, value: impl Into<String>) -> Self {
        self.config.subject.locality = Some(value.into());
        self
    }

    /// Sets the certificate state or province.
    #[must_use]
    pub fn state_or_province(mut self, value: impl Into<String>) -> Self {
        self.config.subject.state_or_province = Some(value.into());
        self
    }

    /// Sets the certificate two-letter ISO country code.
    #[must_use]
    pub fn country(mut self, value: impl Into<String>) -> Self {
        self.config.subject.country = Some(value.into());
        self
    }

    /// Consumes this builder and returns a [`AcmeConfig`] object.
    pub fn build(self) -> Result<AcmeConfig> {
        let uri = self
            .config
            .directory_url
            .parse::<Uri>()
            .map_err(|err| AcmeError::InvalidConfig(format!("invalid directory url: {err}")))?;
        if uri.scheme().is_none() || uri.host().is_none() {
            return Err(AcmeError::InvalidConfig(format!(
                "invalid directory url: `{}` is not absolute",
                self.config.directory_url
            )));
        }
        if self.config.check_interval.is_zero() {
            return Err(AcmeError::InvalidConfig(
                "check interval must be non-zero".to_string(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AcmeConfig::builder().build().unwrap();
        assert_eq!(config.directory_url(), LETS_ENCRYPT_STAGING);
        assert!(config.contacts().is_empty());
        assert_eq!(config.retry_wait(), Duration::from_secs(1200));
        assert_eq!(config.renew_period(), Duration::from_secs(15 * 86400));
        assert_eq!(config.max_retries(), 5);
        assert_eq!(config.subject(), &CsrSubject::default());
    }

    #[test]
    fn contact_emails() {
        let config = AcmeConfig::builder()
            .contact_emails("  a@example.com b@example.com\ta@example.com ")
            .contact("c@example.com")
            .build()
            .unwrap();
        assert_eq!(
            config.contacts(),
            ["a@example.com", "b@example.com", "c@example.com"]
        );
    }

    #[test]
    fn invalid_directory_url() {
        assert!(matches!(
            AcmeConfig::builder().directory_url("not a url").build(),
            Err(AcmeError::InvalidConfig(_))
        ));
        assert!(matches!(
            AcmeConfig::builder().directory_url("/directory").build(),
            Err(AcmeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_check_interval() {
        assert!(matches!(
            AcmeConfig::builder()
                .check_interval(Duration::ZERO)
                .build(),
            Err(AcmeError::InvalidConfig(_))
        ));
    }
}
