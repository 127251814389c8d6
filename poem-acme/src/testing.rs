use std::{
    collections::VecDeque,
    io::{Error as IoError, Result as IoResult},
    sync::Arc,
};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use parking_lot::Mutex;
use rcgen::{Certificate, CertificateParams};
use time::OffsetDateTime;

use crate::{
    AccountKey, CertificateChain, CertificateKey, HttpClient, HttpRequest, HttpResponse,
};

pub(crate) const ACCOUNT_KEY_PEM: &str = include_str!("../tests/fixtures/account_key.pem");
pub(crate) const ACCOUNT_KEY_PKCS1_PEM: &str =
    include_str!("../tests/fixtures/account_key_pkcs1.pem");

pub(crate) fn account_key() -> AccountKey {
    AccountKey::from_pem(ACCOUNT_KEY_PEM).unwrap()
}

/// A self-signed chain for `key` covering `domains`.
pub(crate) fn self_signed(
    key: &CertificateKey,
    domains: &[&str],
    not_after: Option<OffsetDateTime>,
) -> CertificateChain {
    let mut params =
        CertificateParams::new(domains.iter().map(ToString::to_string).collect::<Vec<_>>());
    params.alg = key.algorithm();
    params.key_pair = Some(key.to_key_pair().unwrap());
    if let Some(not_after) = not_after {
        params.not_after = not_after;
    }
    let cert = Certificate::from_params(params).unwrap();
    CertificateChain::from_pem(cert.serialize_pem().unwrap()).unwrap()
}

pub(crate) fn response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    HttpResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: map,
        body: Bytes::copy_from_slice(body.as_bytes()),
    }
}

/// An [`HttpClient`] answering from a queue of canned responses and
/// recording every request.
#[derive(Clone, Default)]
pub(crate) struct ScriptedClient {
    responses: Arc<Mutex<VecDeque<IoResult<HttpResponse>>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedClient {
    pub(crate) fn push(&self, response: HttpResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    pub(crate) fn push_error(&self) {
        self.responses
            .lock()
            .push_back(Err(IoError::other("connection refused")));
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

impl HttpClient for ScriptedClient {
    async fn send(&self, request: HttpRequest) -> IoResult<HttpResponse> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(IoError::other("no scripted response")))
    }
}
