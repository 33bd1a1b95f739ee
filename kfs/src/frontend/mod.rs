//! The TLS front door.
//!
//! Terminates TLS, runs the authentication pipeline, persists the
//! delegated credential, makes sure the caller's file server is up and
//! reverse-proxies the request to it over loopback.

pub mod error;

pub use error::Error;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1 as client;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::ctrl_c;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::auth::{ccache, Authenticated, Authenticator, Outcome};
use crate::backend::Supervisor;

type Body = UnsyncBoxBody<Bytes, hyper::Error>;

/// How long in-flight requests get to finish on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Request headers a reverse proxy must not forward.
const HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn full(text: impl Into<Bytes>) -> Body {
    Full::new(text.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// The immutable per-request context: pipeline and supervisor,
/// constructed once at startup.
pub struct Gateway {
    pub auth: Authenticator,
    pub supervisor: Supervisor,
}

/// Client connections listener and handler.
pub struct Listener {
    addr: String,
    tls: TlsAcceptor,
    gateway: Arc<Gateway>,
}

impl Listener {
    pub fn new(addr: String, tls: TlsAcceptor, gateway: Gateway) -> Self {
        Self {
            addr,
            tls,
            gateway: Arc::new(gateway),
        }
    }

    /// Serve until SIGINT, then drain in-flight requests and tear the
    /// user file servers down.
    pub async fn listen(&self) -> Result<(), Error> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!("listening on {}", self.addr);

        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                connection = listener.accept() => {
                    let (stream, peer) = connection?;
                    let tls = self.tls.clone();
                    let gateway = self.gateway.clone();

                    tracker.spawn(async move {
                        handle_connection(tls, gateway, stream, peer).await;
                    });
                }

                _ = ctrl_c() => break,
            }
        }

        info!(
            "shutting down, waiting for {} connections to finish",
            tracker.len()
        );
        tracker.close();

        if timeout(DRAIN_TIMEOUT, tracker.wait()).await.is_err() {
            warn!(
                "terminating {} connections due to shutdown timeout",
                tracker.len()
            );
        }

        self.gateway.supervisor.shutdown_all();

        Ok(())
    }
}

async fn handle_connection(
    tls: TlsAcceptor,
    gateway: Arc<Gateway>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let stream = match tls.accept(stream).await {
        Ok(stream) => stream,
        Err(err) => {
            debug!("TLS handshake with {}: {}", peer, err);
            return;
        }
    };

    let service = service_fn(move |req| {
        let gateway = gateway.clone();
        async move { handle(gateway, peer, req).await }
    });

    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!("connection from {}: {}", peer, err);
    }
}

async fn handle(
    gateway: Arc<Gateway>,
    peer: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Body>, Infallible> {
    let outcome = match gateway.auth.authenticate(req.headers()).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("{}", err);
            return Ok(internal_server_error());
        }
    };

    let auth = match outcome {
        Outcome::Ok(auth) => auth,
        Outcome::Challenge => return Ok(challenge()),
        Outcome::Denied => return Ok(unauthorized()),
    };

    let Authenticated {
        principal,
        user,
        delegated,
        lifetime,
        token,
    } = auth;

    // The mechanism already committed to its mutual-authentication
    // reply, so every response from here on carries it, errors
    // included.
    let token = token.as_deref();

    let credentials = match ccache::save(&user, &delegated) {
        Ok(path) => path,
        Err(err) => {
            error!("saving user {} credential: {}", user.username, err);
            return Ok(with_negotiate_token(internal_server_error(), token));
        }
    };

    // The cache file carries the credential from here on.
    drop(delegated);

    let listen = match gateway.supervisor.ensure(&user, credentials, lifetime).await {
        Ok(listen) => listen,
        Err(err) => {
            error!("[{}] starting user file server: {}", principal, err);
            return Ok(with_negotiate_token(internal_server_error(), token));
        }
    };

    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    info!(
        "[{}] {} {} {} {}",
        principal,
        req.method(),
        req.uri().path(),
        peer,
        user_agent
    );

    match proxy(&listen, req).await {
        Ok(response) => Ok(with_negotiate_token(
            response.map(|body| body.boxed_unsync()),
            token,
        )),
        Err(err) => {
            // Transport error before any response bytes: the child may
            // have hit its end of life between ensure and connect.
            warn!("[{}] proxying to {}: {}", principal, listen, err);
            Ok(with_negotiate_token(bad_gateway(), token))
        }
    }
}

/// Attach the SPNEGO mutual-authentication reply, when there is one.
fn with_negotiate_token(mut response: Response<Body>, token: Option<&[u8]>) -> Response<Body> {
    if let Some(token) = token {
        let value = format!("Negotiate {}", BASE64.encode(token));
        if let Ok(value) = HeaderValue::from_str(&value) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
    }

    response
}

/// Forward the full request (method, path and query, headers, body) to
/// the user's file server.
async fn proxy(listen: &str, req: Request<Incoming>) -> Result<Response<Incoming>, Error> {
    let (mut parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    parts.uri = path_and_query.parse()?;

    strip_hop_headers(&mut parts.headers);
    parts
        .headers
        .insert(header::HOST, HeaderValue::from_str(listen)?);

    let stream = TcpStream::connect(listen).await?;
    let (mut sender, connection) = client::handshake(TokioIo::new(stream)).await?;

    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!("backend connection: {}", err);
        }
    });

    Ok(sender.send_request(Request::from_parts(parts, body)).await?)
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
}

/// 401 with both challenges, `Negotiate` first.
fn challenge() -> Response<Body> {
    let mut response = Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .body(full("Unauthorized.\n"))
        .unwrap_or_else(|_| Response::new(full("Unauthorized.\n")));

    let headers = response.headers_mut();
    headers.append(header::WWW_AUTHENTICATE, HeaderValue::from_static("Negotiate"));
    headers.append(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"Please enter your username and password.\""),
    );

    response
}

fn unauthorized() -> Response<Body> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .body(full("Unauthorized.\n"))
        .unwrap_or_else(|_| Response::new(full("Unauthorized.\n")))
}

fn internal_server_error() -> Response<Body> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(full("Internal server error: contact your administrator.\n"))
        .unwrap_or_else(|_| Response::new(full("")))
}

fn bad_gateway() -> Response<Body> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(full("Bad gateway.\n"))
        .unwrap_or_else(|_| Response::new(full("")))
}
