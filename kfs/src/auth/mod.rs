//! Authentication and delegation pipeline.
//!
//! Every request runs SPNEGO first; if the client sent no (or an
//! incomplete) Negotiate token, HTTP Basic credentials are tried as a
//! Kerberos password login against the configured realms. A successful
//! authentication yields the resolved OS user, the delegated credential
//! and its remaining lifetime.

pub mod ccache;
pub mod error;
pub mod gssapi;
pub mod user;

pub use error::Error;
pub use user::OsUser;

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;
use tracing::{debug, warn};

use gssapi::{Delegated, Negotiation, SpnegoServer};

/// Per-request authentication result.
pub enum Outcome {
    /// The caller is authenticated and delegated us a ticket.
    Ok(Authenticated),

    /// No usable credentials; answer 401 with both challenges.
    Challenge,

    /// Password authentication failed; answer 401.
    Denied,
}

pub struct Authenticated {
    /// Kerberos principal, `login@REALM`.
    pub principal: String,
    pub user: OsUser,
    pub delegated: Delegated,
    pub lifetime: Duration,
    /// Mutual-authentication token for the response, if the mechanism
    /// produced one.
    pub token: Option<Vec<u8>>,
}

/// The request-scoped entry point into Kerberos, constructed once at
/// startup from the server credential and realm list.
pub struct Authenticator {
    server: SpnegoServer,
    realms: Vec<String>,
}

impl Authenticator {
    pub fn new(server: SpnegoServer, realms: Vec<String>) -> Self {
        Self { server, realms }
    }

    /// Authenticate one request from its headers.
    ///
    /// `Err` means a library or account-resolution failure the client
    /// only ever sees as a 500.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Outcome, Error> {
        let (principal, delegated, token) = match self.spnego(headers)? {
            Some(done) => done,
            None => {
                let (username, password) = match basic_credentials(headers) {
                    Some(credentials) => credentials,
                    None => return Ok(Outcome::Challenge),
                };

                let mut authenticated = None;

                for candidate in candidates(&username, &self.realms) {
                    match self.server.password_login(&candidate, &password).await {
                        Ok(delegated) => {
                            authenticated = Some((candidate, delegated));
                            break;
                        }
                        Err(err) => debug!("password login {}: {}", candidate, err),
                    }
                }

                match authenticated {
                    Some((principal, delegated)) => (principal, delegated, None),
                    None => {
                        warn!("cannot authenticate user `{}` with password", username);
                        return Ok(Outcome::Denied);
                    }
                }
            }
        };

        let login = principal.split('@').next().unwrap_or(principal.as_str());
        let user = OsUser::lookup(login)
            .map_err(Error::Lookup)?
            .ok_or_else(|| Error::UnknownUser(login.to_string()))?;

        if delegated.is_none() {
            return Err(Error::NoDelegation(principal));
        }

        let lifetime = delegated.lifetime()?;

        Ok(Outcome::Ok(Authenticated {
            principal,
            user,
            delegated,
            lifetime,
            token,
        }))
    }

    /// Run SPNEGO against the request. `None` means the caller must be
    /// challenged (no token, or the negotiation needs more rounds than
    /// one request carries).
    #[allow(clippy::type_complexity)]
    fn spnego(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<(String, Delegated, Option<Vec<u8>>)>, Error> {
        let token = match negotiate_token(headers) {
            Some(token) => token,
            None => return Ok(None),
        };

        match self.server.accept(&token)? {
            Negotiation::Complete {
                principal,
                response,
                delegated,
            } => Ok(Some((principal, delegated, response))),
            Negotiation::Continue { .. } => {
                debug!("incomplete SPNEGO negotiation");
                Ok(None)
            }
        }
    }
}

/// Kerberos principals to try for a Basic login, in order.
pub fn candidates(username: &str, realms: &[String]) -> Vec<String> {
    if !username.contains('@') && !realms.is_empty() {
        realms
            .iter()
            .map(|realm| format!("{}@{}", username, realm))
            .collect()
    } else {
        vec![username.to_string()]
    }
}

fn scheme_value<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let (name, rest) = value.split_once(' ')?;

    if name.eq_ignore_ascii_case(scheme) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Decoded SPNEGO token from an `Authorization: Negotiate` header.
fn negotiate_token(headers: &HeaderMap) -> Option<Vec<u8>> {
    headers
        .get_all(AUTHORIZATION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| scheme_value(value, "Negotiate"))
        .and_then(|token| BASE64.decode(token).ok())
}

/// Username and password from an `Authorization: Basic` header.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get_all(AUTHORIZATION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| scheme_value(value, "Basic"))?;

    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;

    Some((username.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn realms(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_candidates_expand_realms_in_order() {
        let tried = candidates("alice", &realms(&["A", "B"]));
        assert_eq!(tried, vec!["alice@A", "alice@B"]);
    }

    #[test]
    fn test_candidates_verbatim_with_realm() {
        let tried = candidates("alice@C", &realms(&["A", "B"]));
        assert_eq!(tried, vec!["alice@C"]);
    }

    #[test]
    fn test_candidates_verbatim_without_realms() {
        let tried = candidates("alice", &[]);
        assert_eq!(tried, vec!["alice"]);
    }

    #[test]
    fn test_basic_credentials() {
        let mut headers = HeaderMap::new();
        // "alice:s3cret:with:colons"
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_static("Basic YWxpY2U6czNjcmV0OndpdGg6Y29sb25z"),
        );

        let (username, password) = basic_credentials(&headers).unwrap();
        assert_eq!(username, "alice");
        assert_eq!(password, "s3cret:with:colons");
    }

    #[test]
    fn test_basic_credentials_absent() {
        let headers = HeaderMap::new();
        assert!(basic_credentials(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(basic_credentials(&headers).is_none());
    }

    #[test]
    fn test_negotiate_token_picked_from_multiple_headers() {
        let mut headers = HeaderMap::new();
        headers.append(AUTHORIZATION, HeaderValue::from_static("Basic YWxpY2U6cHc="));
        headers.append(AUTHORIZATION, HeaderValue::from_static("Negotiate AAEC"));

        let token = negotiate_token(&headers).unwrap();
        assert_eq!(token, vec![0, 1, 2]);
    }

    #[test]
    fn test_negotiate_token_garbage_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Negotiate !!!"));
        assert!(negotiate_token(&headers).is_none());
    }
}
