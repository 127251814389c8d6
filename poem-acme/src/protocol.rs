use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
};

use serde::{Deserialize, Serialize};

/// HTTP-01 challenge
pub(crate) const CHALLENGE_TYPE_HTTP_01: &str = "http-01";

/// Map of directory endpoint names (`newNonce`, `newAccount`, `newOrder`,
/// ...) to their urls. Non-url members such as `meta` are kept but never
/// returned by [`Directory::url`].
#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
pub(crate) struct Directory(HashMap<String, serde_json::Value>);

impl Directory {
    pub(crate) fn url(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(serde_json::Value::as_str)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewAccountRequest {
    pub(crate) terms_of_service_agreed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) contact: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Identifier {
    #[serde(rename = "type")]
    pub(crate) ty: String,
    pub(crate) value: String,
}

#[derive(Serialize)]
pub(crate) struct NewOrderRequest {
    pub(crate) identifiers: Vec<Identifier>,
}

#[derive(Serialize)]
pub(crate) struct CsrRequest {
    pub(crate) csr: String,
}

/// Status of orders, authorizations and challenges.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Status {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
    Revoked,
    Deactivated,
    Expired,
    #[serde(other)]
    Unknown,
}

/// An ACME problem document (`application/problem+json`).
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Problem {
    #[serde(rename = "type", default)]
    pub(crate) ty: String,
    #[serde(default)]
    pub(crate) detail: String,
    pub(crate) identifier: Option<Identifier>,
    #[serde(default)]
    pub(crate) subproblems: Vec<Problem>,
}

impl Problem {
    fn fmt_indented(&self, f: &mut Formatter<'_>, depth: usize) -> fmt::Result {
        f.write_str(&self.ty)?;
        if let Some(identifier) = &self.identifier {
            write!(f, " id: {} {}", identifier.ty, identifier.value)?;
        }
        write!(f, " {}", self.detail)?;
        for subproblem in &self.subproblems {
            write!(f, "\n{:width$}", "", width = (depth + 1) * 2)?;
            subproblem.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Order {
    pub(crate) status: Status,
    #[serde(default)]
    pub(crate) authorizations: Vec<String>,
    pub(crate) finalize: String,
    pub(crate) certificate: Option<String>,
    pub(crate) error: Option<Problem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Challenge {
    #[serde(rename = "type")]
    pub(crate) ty: String,
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) token: String,
    pub(crate) status: Status,
    pub(crate) error: Option<Problem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Authorization {
    pub(crate) identifier: Option<Identifier>,
    pub(crate) status: Status,
    #[serde(default)]
    pub(crate) challenges: Vec<Challenge>,
}

impl Authorization {
    pub(crate) fn find_challenge(&self, ty: &str) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.ty == ty)
    }

    pub(crate) fn domain(&self) -> &str {
        self.identifier
            .as_ref()
            .map(|identifier| identifier.value.as_str())
            .unwrap_or("unknown")
    }
}
