use std::{
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use poem::{listener::TcpListener, middleware::Tracing, EndpointExt, Server};
use poem_acme::{
    AccountKey, AcmeAccount, AcmeConfig, CertificateChain, CertificateKey, ManagedCertificate,
    LETS_ENCRYPT_STAGING,
};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Obtains or renews a certificate through the ACME HTTP-01 challenge, then
/// exits.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Space separated list of domains. The first one is the subject.
    #[arg(long, env = "ACME_DOMAINS")]
    domains: String,

    /// ACME directory url
    #[arg(long, env = "ACME_DIRECTORY_URL", default_value = LETS_ENCRYPT_STAGING)]
    directory_url: String,

    /// Space separated list of contact emails
    #[arg(long, env = "ACME_CONTACT_EMAILS", default_value = "")]
    contact_emails: String,

    /// Seconds to wait before retrying a failed certificate
    #[arg(long, env = "ACME_RETRY_WAIT", default_value_t = 1200)]
    retry_wait: u64,

    /// Renew this many days before the certificate expires
    #[arg(long, env = "ACME_RENEWAL_PERIOD", default_value_t = 15)]
    renewal_period: u64,

    /// Address serving the HTTP-01 challenge
    #[arg(long, env = "ACME_LISTEN", default_value = "0.0.0.0:80")]
    listen: String,

    /// Account key, generated if missing
    #[arg(long, env = "ACME_ACCOUNT_KEY", default_value = "account.key")]
    account_key: PathBuf,

    /// Certificate key, generated if missing
    #[arg(long, env = "ACME_CLIENT_KEY", default_value = "client.key")]
    client_key: PathBuf,

    /// Certificate chain, written after renewal
    #[arg(long, env = "ACME_CLIENT_CHAIN", default_value = "client.chain")]
    client_chain: PathBuf,

    /// Certificate organization
    #[arg(long, env = "ACME_CERT_ORG")]
    organization: Option<String>,

    /// Certificate organizational unit
    #[arg(long, env = "ACME_CERT_UNIT")]
    organizational_unit: Option<String>,

    /// Certificate city or town
    #[arg(long, env = "ACME_CERT_LOCATION")]
    locality: Option<String>,

    /// Certificate state or province
    #[arg(long, env = "ACME_CERT_STATE")]
    state_or_province: Option<String>,

    /// Certificate two-letter country code
    #[arg(long, env = "ACME_CERT_COUNTRY")]
    country: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("poem_acme=debug,demo_acme_http_01=info")),
        )
        .init();

    let args = Args::parse();

    let account_key = match std::fs::read(&args.account_key) {
        Ok(pem) => AccountKey::from_pem(pem)?,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::info!(path = %args.account_key.display(), "generating account key");
            let pem = AccountKey::generate_pem(4096)?;
            write_private(&args.account_key, pem.as_bytes())?;
            AccountKey::from_pem(pem)?
        }
        Err(err) => return Err(err.into()),
    };

    let client_key = match std::fs::read_to_string(&args.client_key) {
        Ok(pem) => CertificateKey::from_pem(&pem)?,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::info!(path = %args.client_key.display(), "generating certificate key");
            let key = CertificateKey::generate()?;
            write_private(&args.client_key, key.serialize_pem().as_bytes())?;
            key
        }
        Err(err) => return Err(err.into()),
    };

    let chain = match std::fs::read(&args.client_chain) {
        Ok(pem) => CertificateChain::from_pem(pem)?,
        Err(err) if err.kind() == ErrorKind::NotFound => CertificateChain::default(),
        Err(err) => return Err(err.into()),
    };

    let mut config = AcmeConfig::builder()
        .directory_url(args.directory_url)
        .contact_emails(&args.contact_emails)
        .retry_wait(Duration::from_secs(args.retry_wait))
        .renew_period(Duration::from_secs(args.renewal_period * 24 * 60 * 60));
    if let Some(value) = args.organization {
        config = config.organization(value);
    }
    if let Some(value) = args.organizational_unit {
        config = config.organizational_unit(value);
    }
    if let Some(value) = args.locality {
        config = config.locality(value);
    }
    if let Some(value) = args.state_or_province {
        config = config.state_or_province(value);
    }
    if let Some(value) = args.country {
        config = config.country(value);
    }

    let renewed = Arc::new(Notify::new());
    let mut cert = ManagedCertificate::new(
        ManagedCertificate::parse_domains(&args.domains),
        client_key,
        chain,
    );
    let chain_path = args.client_chain.clone();
    let notify = renewed.clone();
    cert.add_listener(move |cert| {
        match std::fs::write(&chain_path, cert.chain().pem()) {
            Ok(()) => tracing::info!(path = %chain_path.display(), "certificate chain saved"),
            Err(err) => tracing::error!(
                path = %chain_path.display(),
                error = %err,
                "failed to save certificate chain",
            ),
        }
        notify.notify_one();
    });

    let mut account = AcmeAccount::new(config.build()?, account_key);
    account.add(cert);

    if !account.certs_ready_for_renewal() {
        tracing::info!("certificate is not due for renewal");
        return Ok(());
    }

    let app = account.http_01_endpoint().with(Tracing);
    tokio::select! {
        res = Server::new(TcpListener::bind(args.listen)).name("acme-http-01").run(app) => res?,
        _ = account.run() => {}
        _ = renewed.notified() => {}
    }

    Ok(())
}

fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)?.write_all(data)
}
