use std::time::{Duration, SystemTime};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use http::{Method, StatusCode};

use crate::{
    jose,
    protocol::{
        Authorization, Challenge, CsrRequest, Directory, Identifier, NewAccountRequest,
        NewOrderRequest, Order, Problem, Status, CHALLENGE_TYPE_HTTP_01,
    },
    AccountKey, AcmeConfig, AcmeError, CertificateChain, ChallengeResponder, Http01Endpoint,
    HttpClient, HttpRequest, HttpResponse, ManagedCertificate, Result,
};

/// Delay before polling a pending authorization, challenge or order again.
const POLL_DELAY: Duration = Duration::from_secs(5);
/// Backoff after the server answered `429 Too Many Requests`.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60 * 60);
/// Upper bound for backoff deadlines.
const MAX_BACKOFF: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// States of the issuance state machine, in protocol order.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum State {
    /// No request in flight.
    #[default]
    Idle,
    /// Fetching the directory.
    GetDir,
    /// Registering the account.
    Register,
    /// Creating an order for the next certificate due for renewal.
    NewOrder,
    /// Fetching the current authorization.
    GetAuth,
    /// Asking the server to validate the `HTTP-01` challenge.
    Challenge,
    /// Submitting the certificate signing request.
    Finalize,
    /// Polling the order.
    GetOrder,
    /// Downloading the certificate chain.
    GetCert,
}

impl State {
    fn next(self) -> Self {
        match self {
            State::Idle => State::GetDir,
            State::GetDir => State::Register,
            State::Register => State::NewOrder,
            State::NewOrder => State::GetAuth,
            State::GetAuth => State::Challenge,
            State::Challenge => State::Finalize,
            State::Finalize => State::GetOrder,
            State::GetOrder => State::GetCert,
            State::GetCert => State::NewOrder,
        }
    }
}

/// An ACME account renewing a set of [`ManagedCertificate`]s.
///
/// The account drives one certificate at a time through the ACME protocol
/// with at most one request in flight. A certificate that fails is backed
/// off and the account moves on to the next one, so one broken domain never
/// blocks the others.
pub struct AcmeAccount<C = reqwest::Client> {
    config: AcmeConfig,
    key: AccountKey,
    client: C,
    responder: ChallengeResponder,
    certs: Vec<ManagedCertificate>,

    directory: Option<Directory>,
    nonce: Option<String>,
    kid: Option<String>,
    state: State,
    not_before: Option<SystemTime>,

    // Per certificate pass.
    current: usize,
    order: Option<Order>,
    order_link: Option<String>,
    current_auth: usize,
    authorization: Option<Authorization>,
    retries: u32,
}

impl AcmeAccount {
    /// Create an account using a default [`reqwest::Client`].
    pub fn new(config: AcmeConfig, key: AccountKey) -> Self {
        Self::with_client(config, key, reqwest::Client::new())
    }
}

impl<C: HttpClient> AcmeAccount<C> {
    /// Create an account sending its requests through `client`.
    pub fn with_client(config: AcmeConfig, key: AccountKey, client: C) -> Self {
        Self {
            config,
            key,
            client,
            responder: ChallengeResponder::new(),
            certs: Vec::new(),
            directory: None,
            nonce: None,
            kid: None,
            state: State::Idle,
            not_before: None,
            current: 0,
            order: None,
            order_link: None,
            current_auth: 0,
            authorization: None,
            retries: 0,
        }
    }

    /// Adds a certificate to renew.
    pub fn add(&mut self, cert: ManagedCertificate) {
        self.certs.push(cert);
    }

    /// Returns the managed certificates, in processing order.
    #[inline]
    pub fn certificates(&self) -> &[ManagedCertificate] {
        &self.certs
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the account url once the account is registered.
    #[inline]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Returns the configuration.
    #[inline]
    pub fn config(&self) -> &AcmeConfig {
        &self.config
    }

    /// Returns `true` if any certificate is due for renewal.
    pub fn certs_ready_for_renewal(&self) -> bool {
        self.certs
            .iter()
            .any(|cert| cert.is_ready_for_renewal(self.config.renew_period))
    }

    /// Returns the responder answering this account's `HTTP-01` challenges.
    pub fn challenge_responder(&self) -> ChallengeResponder {
        self.responder.clone()
    }

    /// Returns an endpoint serving `/.well-known/acme-challenge/<token>` for
    /// this account. It must be reachable on port 80 of every domain.
    pub fn http_01_endpoint(&self) -> Http01Endpoint {
        self.responder.endpoint()
    }

    /// Renews every certificate that is due, then returns.
    ///
    /// Does nothing if no certificate is due, or while the account itself is
    /// backing off after failing to fetch the directory or to register.
    pub async fn update(&mut self) {
        if self.state != State::Idle {
            return;
        }
        if let Some(not_before) = self.not_before {
            if SystemTime::now() < not_before {
                return;
            }
        }
        if !self.certs_ready_for_renewal() {
            return;
        }

        self.nonce = None;
        self.not_before = None;
        self.start_certificate(0);
        self.state = if self.directory.is_none() {
            State::GetDir
        } else if self.kid.is_none() {
            State::Register
        } else {
            State::NewOrder
        };

        while self.state != State::Idle {
            self.step().await;
        }
    }

    /// Calls [`AcmeAccount::update`] every
    /// [`check_interval`](AcmeConfig::check_interval), forever.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.update().await;
        }
    }

    async fn step(&mut self) {
        let request = match self.next_request() {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(state = ?self.state, error = %err, "failed to build acme request");
                self.fail(self.config.retry_wait);
                return;
            }
        };

        tracing::debug!(
            state = ?self.state,
            method = %request.method,
            url = %request.url,
            "acme request",
        );

        let is_head = request.method == Method::HEAD;
        match self.client.send(request).await {
            Ok(resp) => self.on_response(resp, is_head).await,
            Err(err) => {
                tracing::warn!(state = ?self.state, error = %err, "acme request failed");
                self.fail(self.config.retry_wait);
            }
        }
    }

    /// Builds the request of the current state. Returns `None` after a local
    /// transition that needs no request.
    fn next_request(&mut self) -> Result<Option<HttpRequest>> {
        match self.state {
            State::Idle => return Ok(None),
            State::NewOrder => {
                let renew_period = self.config.renew_period;
                match self.certs[self.current.min(self.certs.len())..]
                    .iter()
                    .position(|cert| cert.is_ready_for_renewal(renew_period))
                {
                    Some(offset) => self.current += offset,
                    None => {
                        tracing::debug!("no more certificates to renew");
                        self.state = State::Idle;
                        return Ok(None);
                    }
                }
            }
            State::GetAuth => {
                if self.current_auth >= self.order()?.authorizations.len() {
                    self.state = State::Finalize;
                }
            }
            _ => {}
        }

        if self.state > State::GetDir && self.nonce.is_none() {
            let url = self.endpoint("newNonce")?;
            return Ok(Some(HttpRequest::head(url)));
        }

        let request = match self.state {
            State::Idle => return Ok(None),
            State::GetDir => HttpRequest::get(self.config.directory_url.clone()),
            State::Register => {
                let url = self.endpoint("newAccount")?;
                let payload = serde_json::to_vec(&NewAccountRequest {
                    terms_of_service_agreed: true,
                    contact: self
                        .config
                        .contacts
                        .iter()
                        .map(|email| format!("mailto:{email}"))
                        .collect(),
                })?;
                self.sign_request(url, &payload)?
            }
            State::NewOrder => {
                let url = self.endpoint("newOrder")?;
                let payload = serde_json::to_vec(&NewOrderRequest {
                    identifiers: self.certs[self.current]
                        .domains()
                        .iter()
                        .map(|domain| Identifier {
                            ty: "dns".to_string(),
                            value: domain.clone(),
                        })
                        .collect(),
                })?;
                self.sign_request(url, &payload)?
            }
            State::GetAuth => {
                let url = self.order()?.authorizations[self.current_auth].clone();
                HttpRequest::get(url)
            }
            State::Challenge => {
                let challenge = self
                    .authorization
                    .as_ref()
                    .ok_or(AcmeError::MissingField("authorization"))?
                    .find_challenge(CHALLENGE_TYPE_HTTP_01)
                    .ok_or(AcmeError::MissingChallenge(CHALLENGE_TYPE_HTTP_01))?;
                let url = challenge.url.clone();
                let token = challenge.token.clone();
                let key_authorization = jose::key_authorization(&self.key, &token)?;
                self.responder.activate(token, key_authorization);
                self.sign_request(url, b"{}")?
            }
            State::Finalize => {
                let url = self.order()?.finalize.clone();
                let csr = self.certs[self.current].make_csr_with_subject(&self.config.subject)?;
                let payload = serde_json::to_vec(&CsrRequest {
                    csr: URL_SAFE_NO_PAD.encode(csr),
                })?;
                self.sign_request(url, &payload)?
            }
            State::GetOrder => {
                let url = self
                    .order_link
                    .clone()
                    .ok_or(AcmeError::MissingField("order location"))?;
                self.sign_request(url, b"")?
            }
            State::GetCert => {
                let url = self
                    .order()?
                    .certificate
                    .clone()
                    .ok_or(AcmeError::MissingField("certificate"))?;
                self.sign_request(url, b"")?
            }
        };

        Ok(Some(request))
    }

    /// Signs `payload` for `url` with the current nonce, which is consumed.
    pub(crate) fn sign_request(&mut self, url: String, payload: &[u8]) -> Result<HttpRequest> {
        let nonce = self.nonce.take().ok_or(AcmeError::MissingNonce)?;
        let body = jose::sign(&self.key, self.kid.as_deref(), &nonce, &url, payload)?;
        Ok(HttpRequest::post(url, body))
    }

    async fn on_response(&mut self, resp: HttpResponse, is_head: bool) {
        if let Some(nonce) = resp.replay_nonce() {
            self.nonce = Some(nonce.to_string());
        }

        if resp.status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(state = ?self.state, "rate limited by acme server");
            self.fail(RATE_LIMIT_BACKOFF);
            return;
        }

        if resp.is_problem() {
            match resp.json::<Problem>() {
                Ok(problem) => tracing::warn!(
                    state = ?self.state,
                    status = %resp.status,
                    problem = %problem,
                    "acme server returned a problem",
                ),
                Err(_) => tracing::warn!(
                    state = ?self.state,
                    status = %resp.status,
                    body = %String::from_utf8_lossy(&resp.body),
                    "acme server returned a malformed problem",
                ),
            }
            self.fail(self.config.retry_wait);
            return;
        }

        if !resp.status.is_success() {
            tracing::warn!(state = ?self.state, status = %resp.status, "unexpected acme response");
            self.fail(self.config.retry_wait);
            return;
        }

        if is_head {
            if self.nonce.is_none() {
                tracing::warn!("acme server returned no nonce");
                self.fail(self.config.retry_wait);
            }
            return;
        }

        if let Err(err) = self.handle(&resp).await {
            tracing::warn!(state = ?self.state, error = %err, "invalid acme response");
            self.fail(self.config.retry_wait);
        }
    }

    async fn handle(&mut self, resp: &HttpResponse) -> Result<()> {
        match self.state {
            State::Idle => {}
            State::GetDir => {
                self.directory = Some(resp.json()?);
                self.advance();
            }
            State::Register => {
                let kid = resp
                    .location()
                    .ok_or(AcmeError::MissingField("account location"))?;
                tracing::info!(kid, "acme account registered");
                self.kid = Some(kid.to_string());
                self.advance();
            }
            State::NewOrder => {
                let order_link = resp
                    .location()
                    .ok_or(AcmeError::MissingField("order location"))?
                    .to_string();
                let order: Order = resp.json()?;
                tracing::debug!(
                    domains = ?self.certs[self.current].domains(),
                    status = ?order.status,
                    "order created",
                );
                self.order = Some(order);
                self.order_link = Some(order_link);
                self.current_auth = 0;
                self.advance();
            }
            State::GetAuth => {
                let authorization: Authorization = resp.json()?;
                let status = authorization.status;
                tracing::debug!(
                    domain = authorization.domain(),
                    status = ?status,
                    "authorization",
                );

                match status {
                    Status::Pending => {
                        self.authorization = Some(authorization);
                        self.advance();
                    }
                    Status::Processing => {
                        self.authorization = Some(authorization);
                        self.retry(POLL_DELAY, resp).await;
                    }
                    Status::Valid => {
                        self.authorization = Some(authorization);
                        self.next_authorization();
                    }
                    _ => {
                        let detail = authorization
                            .find_challenge(CHALLENGE_TYPE_HTTP_01)
                            .and_then(|challenge| challenge.error.as_ref())
                            .map(ToString::to_string)
                            .unwrap_or_default();
                        tracing::error!(
                            domain = authorization.domain(),
                            status = ?status,
                            error = %detail,
                            "authorization failed",
                        );
                        self.fail(self.config.retry_wait);
                    }
                }
            }
            State::Challenge => {
                let challenge: Challenge = resp.json()?;
                match challenge.status {
                    Status::Valid => self.next_authorization(),
                    Status::Pending | Status::Processing => {
                        self.state = State::GetAuth;
                        self.retry(POLL_DELAY, resp).await;
                    }
                    status => {
                        tracing::error!(
                            url = %challenge.url,
                            status = ?status,
                            error = %challenge.error.as_ref().map(ToString::to_string).unwrap_or_default(),
                            "challenge failed",
                        );
                        self.fail(self.config.retry_wait);
                    }
                }
            }
            State::Finalize | State::GetOrder => {
                self.state = State::GetOrder;
                let order: Order = resp.json()?;
                let status = order.status;
                let error = order.error.clone();
                self.order = Some(order);

                match status {
                    Status::Processing => self.retry(POLL_DELAY, resp).await,
                    Status::Valid => {
                        self.retries = 0;
                        self.advance();
                    }
                    status => {
                        tracing::error!(
                            domains = ?self.certs[self.current].domains(),
                            status = ?status,
                            error = %error.map(|err| err.to_string()).unwrap_or_default(),
                            "order failed",
                        );
                        self.fail(self.config.retry_wait);
                    }
                }
            }
            State::GetCert => {
                let chain = CertificateChain::from_pem(resp.body.to_vec())?;
                if chain.is_empty() {
                    return Err(AcmeError::Certificate(
                        "no certificate in response".to_string(),
                    ));
                }
                self.certs[self.current].update_chain(chain);
                self.start_certificate(self.current + 1);
                self.state = State::NewOrder;
            }
        }

        Ok(())
    }

    fn advance(&mut self) {
        self.state = self.state.next();
    }

    fn next_authorization(&mut self) {
        self.responder.clear();
        self.current_auth += 1;
        self.retries = 0;
        self.state = State::GetAuth;
    }

    /// Waits and then repeats the request of the current state. A
    /// `Retry-After` header of `resp` overrides `delay`, up to
    /// [`retry_wait`](AcmeConfig::retry_wait).
    ///
    /// Only waits that run to completion count against
    /// [`max_retries`](AcmeConfig::max_retries). A challenge request cuts the
    /// wait short without using up a retry.
    async fn retry(&mut self, delay: Duration, resp: &HttpResponse) {
        if self.retries >= self.config.max_retries {
            tracing::warn!(
                state = ?self.state,
                retries = self.config.max_retries,
                "giving up after too many retries",
            );
            self.fail(self.config.retry_wait);
            return;
        }

        let delay = resp
            .retry_after()
            .unwrap_or(delay)
            .min(self.config.retry_wait);
        tracing::debug!(state = ?self.state, delay = ?delay, "retry");
        if self.responder.wait(delay).await {
            tracing::debug!(state = ?self.state, "retry woken by challenge request");
        } else {
            self.retries += 1;
        }
    }

    /// Backs off the current certificate and moves on to the next one.
    ///
    /// Before a certificate is in flight the whole account backs off instead.
    fn fail(&mut self, delay: Duration) {
        let until = backoff_until(delay);

        match self.state {
            State::Idle | State::GetDir | State::Register => {
                tracing::error!(retry_in = ?delay, "acme account setup failed");
                self.not_before = Some(until);
                self.state = State::Idle;
            }
            _ => {
                if let Some(cert) = self.certs.get_mut(self.current) {
                    tracing::error!(
                        domains = ?cert.domains(),
                        retry_in = ?delay,
                        "certificate renewal failed",
                    );
                    cert.set_wait_until(until);
                }
                self.start_certificate(self.current + 1);
                self.state = State::NewOrder;
            }
        }
    }

    fn start_certificate(&mut self, index: usize) {
        self.responder.clear();
        self.current = index;
        self.order = None;
        self.order_link = None;
        self.current_auth = 0;
        self.authorization = None;
        self.retries = 0;
    }

    fn order(&self) -> Result<&Order> {
        self.order.as_ref().ok_or(AcmeError::MissingField("order"))
    }

    fn endpoint(&self, name: &str) -> Result<String> {
        self.directory
            .as_ref()
            .and_then(|directory| directory.url(name))
            .map(ToString::to_string)
            .ok_or_else(|| AcmeError::MissingEndpoint(name.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }
}

fn backoff_until(delay: Duration) -> SystemTime {
    let now = SystemTime::now();
    now.checked_add(delay.min(MAX_BACKOFF)).unwrap_or(now)
}
