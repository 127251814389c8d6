use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
    time::Duration,
};

use parking_lot::RwLock;
use poem::{error::NotFoundError, Endpoint, IntoResponse, Request, Response};
use tokio::sync::Notify;

/// Path prefix of `HTTP-01` challenge requests.
pub const HTTP_01_PATH_PREFIX: &str = "/.well-known/acme-challenge/";

struct ActiveChallenge {
    token: String,
    key_authorization: String,
}

#[derive(Default)]
struct Inner {
    active: RwLock<Option<ActiveChallenge>>,
    wakeup: Notify,
}

/// Answers `HTTP-01` challenge requests for the challenge an
/// [`AcmeAccount`](crate::AcmeAccount) is currently verifying.
///
/// A matching request also wakes the account if it is waiting to poll the
/// challenge status, since the server only fetches the path while it is
/// validating.
#[derive(Clone, Default)]
pub struct ChallengeResponder(Arc<Inner>);

impl ChallengeResponder {
    /// Create a responder without an active challenge.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the key authorization if `path` is
    /// `/.well-known/acme-challenge/<token>` for the active token.
    pub fn respond(&self, path: &str) -> Option<String> {
        let token = path.strip_prefix(HTTP_01_PATH_PREFIX)?;
        let key_authorization = {
            let active = self.0.active.read();
            let active = active
                .as_ref()
                .filter(|active| !token.is_empty() && active.token == token)?;
            active.key_authorization.clone()
        };

        tracing::debug!(token, "answering http-01 challenge");
        self.0.wakeup.notify_waiters();
        Some(key_authorization)
    }

    /// Returns the active challenge token.
    pub fn token(&self) -> Option<String> {
        self.0
            .active
            .read()
            .as_ref()
            .map(|active| active.token.clone())
    }

    /// Returns an endpoint serving this responder.
    pub fn endpoint(&self) -> Http01Endpoint {
        Http01Endpoint {
            responder: self.clone(),
        }
    }

    pub(crate) fn activate(&self, token: impl Into<String>, key_authorization: String) {
        *self.0.active.write() = Some(ActiveChallenge {
            token: token.into(),
            key_authorization,
        });
    }

    pub(crate) fn clear(&self) {
        *self.0.active.write() = None;
    }

    /// Sleeps for `delay`, or until a challenge request is answered. Returns
    /// `true` when woken early.
    pub(crate) async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = self.0.wakeup.notified() => true,
        }
    }
}

impl Debug for ChallengeResponder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeResponder")
            .field("token", &self.token())
            .finish()
    }
}

/// An endpoint for `HTTP-01` challenge.
///
/// Responds `404 Not Found` to every request that does not match the active
/// challenge.
#[derive(Debug, Clone)]
pub struct Http01Endpoint {
    responder: ChallengeResponder,
}

impl Http01Endpoint {
    /// Create an endpoint answering from `responder`.
    pub fn new(responder: ChallengeResponder) -> Self {
        Self { responder }
    }
}

impl Endpoint for Http01Endpoint {
    type Output = Response;

    async fn call(&self, req: Request) -> poem::Result<Self::Output> {
        match self.responder.respond(req.uri().path()) {
            Some(key_authorization) => Ok(key_authorization.into_response()),
            None => Err(NotFoundError.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use poem::{http::StatusCode, test::TestClient};

    use super::*;

    #[test]
    fn match_active_token() {
        let responder = ChallengeResponder::new();
        assert_eq!(responder.respond("/.well-known/acme-challenge/abc"), None);

        responder.activate("abc", "abc.thumb".to_string());
        assert_eq!(responder.token().as_deref(), Some("abc"));
        assert_eq!(
            responder.respond("/.well-known/acme-challenge/abc").as_deref(),
            Some("abc.thumb")
        );
        assert_eq!(responder.respond("/.well-known/acme-challenge/abd"), None);
        assert_eq!(responder.respond("/.well-known/acme-challenge/"), None);
        assert_eq!(responder.respond("/abc"), None);

        responder.clear();
        assert_eq!(responder.respond("/.well-known/acme-challenge/abc"), None);
        assert_eq!(responder.token(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out() {
        let responder = ChallengeResponder::new();
        assert!(!responder.wait(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn challenge_request_wakes_waiter() {
        let responder = ChallengeResponder::new();
        responder.activate("abc", "abc.thumb".to_string());

        let waiter = responder.clone();
        let wait = tokio::spawn(async move { waiter.wait(Duration::from_secs(3600)).await });
        while !wait.is_finished() {
            tokio::task::yield_now().await;
            responder.respond("/.well-known/acme-challenge/abc");
        }
        assert!(wait.await.unwrap());
    }

    #[tokio::test]
    async fn endpoint() {
        let responder = ChallengeResponder::new();
        responder.activate("abc", "abc.thumb".to_string());
        let cli = TestClient::new(responder.endpoint());

        let resp = cli.get("/.well-known/acme-challenge/abc").send().await;
        resp.assert_status_is_ok();
        resp.assert_text("abc.thumb").await;

        cli.get("/.well-known/acme-challenge/other")
            .send()
            .await
            .assert_status(StatusCode::NOT_FOUND);
        cli.get("/").send().await.assert_status(StatusCode::NOT_FOUND);
    }
}
