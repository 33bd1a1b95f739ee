//! The per-user file server.
//!
//! Serves one or more `pattern -> exported path` mounts over plain HTTP
//! on loopback, each mount confined by a [`SandboxDir`]. Spawned by the
//! gateway under the target user's uid; announces its bound address on
//! stdout (see [`crate::handshake`]).

pub mod error;
pub mod sandbox;

pub use error::Error;
pub use sandbox::SandboxDir;

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::io::ReaderStream;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::handshake;

/// Characters escaped in generated directory listing links.
const HREF: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'?')
    .add(b'<')
    .add(b'>');

type Body = UnsyncBoxBody<Bytes, std::io::Error>;

fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn empty() -> Body {
    full(Bytes::new())
}

/// One exported mount.
struct Route {
    pattern: String,
    dir: SandboxDir,
}

/// HTTP file server over a set of sandboxed mounts.
pub struct FileServer {
    // Sorted by pattern length, longest first, so the most specific
    // mount wins.
    routes: Vec<Route>,
}

/// Split a `pattern:path` command line argument.
pub fn parse_route(arg: &str) -> Result<(String, String), Error> {
    let mut fields = arg.splitn(2, ':');

    match (fields.next(), fields.next()) {
        (Some(pattern), Some(path)) if !pattern.is_empty() && !path.is_empty() => {
            Ok((normalize_pattern(pattern), path.to_string()))
        }
        _ => Err(Error::InvalidRoute(arg.to_string())),
    }
}

/// Clean a URL pattern and make it end in `/` (except the literal `/`).
pub fn normalize_pattern(pattern: &str) -> String {
    let cleaned = sandbox::clean(pattern);
    let cleaned = cleaned.to_string_lossy();

    if cleaned.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", cleaned)
    }
}

impl FileServer {
    /// Build a server from `(pattern, exported path)` pairs. Patterns
    /// are expected normalized (see [`parse_route`]).
    pub fn new(routes: &[(String, String)]) -> Result<Self, Error> {
        let mut built = Vec::new();

        for (pattern, path) in routes {
            info!("exporting \"{}\" to \"{}\"", pattern, path);

            let dir = SandboxDir::new(path).map_err(|err| {
                Error::InvalidExport(path.clone(), err)
            })?;

            built.push(Route {
                pattern: pattern.clone(),
                dir,
            });
        }

        if built.is_empty() {
            return Err(Error::NoRoutes);
        }

        built.sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));

        Ok(Self { routes: built })
    }

    /// Bind, print the startup handshake and serve until SIGINT/SIGTERM.
    pub async fn serve(self, listen: &str) -> Result<(), Error> {
        let listener = TcpListener::bind(listen).await?;
        let addr = listener.local_addr()?;

        // The one line of stdout the gateway scans for.
        println!("{}", handshake::announce(&addr.to_string()));

        let server = Arc::new(self);
        let tracker = TaskTracker::new();
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                connection = listener.accept() => {
                    let (stream, _) = connection?;
                    let server = server.clone();

                    tracker.spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let server = server.clone();
                            let method = req.method().clone();
                            let path = req.uri().path().to_string();

                            async move {
                                Ok::<_, Infallible>(server.respond(&method, &path).await)
                            }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("connection error: {}", err);
                        }
                    });
                }

                _ = sigint.recv() => break,
                _ = sigterm.recv() => break,
            }
        }

        info!("got SIGINT/SIGTERM signal, quitting");
        tracker.close();
        tracker.wait().await;

        Ok(())
    }

    fn route(&self, path: &str) -> Option<(&Route, RouteMatch)> {
        for route in &self.routes {
            if route.pattern == "/" || path.starts_with(route.pattern.as_str()) {
                return Some((route, RouteMatch::Prefix));
            }

            // "/sub" for mount "/sub/": redirect to the canonical form.
            if path == &route.pattern[..route.pattern.len() - 1] {
                return Some((route, RouteMatch::NeedsSlash));
            }
        }

        None
    }

    /// Handle one request. Split from the hyper plumbing so tests can
    /// call it directly.
    pub async fn respond(&self, method: &Method, raw_path: &str) -> Response<Body> {
        let path = match percent_decode_str(raw_path).decode_utf8() {
            Ok(path) => path.into_owned(),
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid path"),
        };

        if method != Method::GET && method != Method::HEAD {
            return error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        }

        let (route, matched) = match self.route(&path) {
            Some(found) => found,
            None => return error_response(StatusCode::NOT_FOUND, "not found"),
        };

        if let RouteMatch::NeedsSlash = matched {
            return redirect(&route.pattern);
        }

        let name = if route.pattern == "/" {
            path.trim_start_matches('/')
        } else {
            &path[route.pattern.len()..]
        };

        let opened = match route.dir.open(name) {
            Ok(opened) => opened,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid path"),
        };

        if opened.metadata.is_dir() {
            if !raw_path.ends_with('/') {
                return redirect(&format!("{}/", raw_path));
            }

            let index = if name.is_empty() {
                "index.html".to_string()
            } else {
                format!("{}/index.html", name.trim_end_matches('/'))
            };

            if let Ok(index) = route.dir.open(&index) {
                return serve_file(method, index).await;
            }

            return listing(method, &opened.path);
        }

        serve_file(method, opened).await
    }
}

enum RouteMatch {
    Prefix,
    NeedsSlash,
}

async fn serve_file(method: &Method, opened: sandbox::Opened) -> Response<Body> {
    let len = opened.metadata.len();
    let content_type = content_type(&opened.path);

    let body = if method == Method::HEAD {
        empty()
    } else {
        let file = tokio::fs::File::from_std(opened.file);
        let stream = futures::TryStreamExt::map_ok(ReaderStream::new(file), Frame::data);
        StreamBody::new(stream).boxed_unsync()
    };

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, len)
        .body(body)
        .unwrap_or_else(|_| Response::new(empty()))
}

fn listing(method: &Method, dir: &std::path::Path) -> Response<Body> {
    let mut entries = Vec::new();

    if let Ok(read) = std::fs::read_dir(dir) {
        for entry in read.flatten() {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
    }

    entries.sort();

    let mut html = String::from("<pre>\n");
    for name in entries {
        let href = utf8_percent_encode(&name, HREF).to_string();
        html.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            href,
            escape_html(&name)
        ));
    }
    html.push_str("</pre>\n");

    let body = if method == Method::HEAD {
        empty()
    } else {
        full(html)
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(body)
        .unwrap_or_else(|_| Response::new(empty()))
}

fn redirect(location: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(header::LOCATION, location)
        .body(empty())
        .unwrap_or_else(|_| Response::new(empty()))
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full(format!("{}\n", message)))
        .unwrap_or_else(|_| Response::new(empty()))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn content_type(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") | Some("log") | Some("md") => "text/plain; charset=utf-8",
        Some("xml") => "text/xml; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("mp4") => "video/mp4",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_pattern() {
        assert_eq!(normalize_pattern("/"), "/");
        assert_eq!(normalize_pattern("/sub"), "/sub/");
        assert_eq!(normalize_pattern("/sub/"), "/sub/");
        assert_eq!(normalize_pattern("//a/./b/"), "/a/b/");
    }

    #[test]
    fn test_parse_route() {
        let (pattern, path) = parse_route("/data:/srv/export").unwrap();
        assert_eq!(pattern, "/data/");
        assert_eq!(path, "/srv/export");

        // The exported path may itself contain a colon.
        let (_, path) = parse_route("/:/srv/a:b").unwrap();
        assert_eq!(path, "/srv/a:b");

        assert!(parse_route("/srv/export").is_err());
        assert!(parse_route(":/srv/export").is_err());
        assert!(parse_route("/data:").is_err());
    }

    fn server_for(dir: &std::path::Path) -> FileServer {
        FileServer::new(&[("/".to_string(), dir.to_str().unwrap().to_string())]).unwrap()
    }

    #[tokio::test]
    async fn test_serves_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hello world").unwrap();

        let server = server_for(dir.path());
        let response = server.respond(&Method::GET, "/hello.txt").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.bin"), vec![0u8; 64]).unwrap();

        let server = server_for(dir.path());
        let response = server.respond(&Method::HEAD, "/f.bin").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            "64"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_escape_is_rejected() {
        let dir = tempdir().unwrap();
        let server = server_for(dir.path());

        let response = server.respond(&Method::GET, "/../../etc/passwd").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_longest_pattern_wins() {
        let root = tempdir().unwrap();
        let sub = tempdir().unwrap();
        std::fs::write(root.path().join("f.txt"), b"root").unwrap();
        std::fs::write(sub.path().join("f.txt"), b"sub").unwrap();

        let server = FileServer::new(&[
            ("/".to_string(), root.path().to_str().unwrap().to_string()),
            (
                "/sub/".to_string(),
                sub.path().to_str().unwrap().to_string(),
            ),
        ])
        .unwrap();

        let response = server.respond(&Method::GET, "/sub/f.txt").await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"sub");

        let response = server.respond(&Method::GET, "/f.txt").await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"root");
    }

    #[tokio::test]
    async fn test_directory_serves_index_html() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"<h1>home</h1>").unwrap();

        let server = server_for(dir.path());
        let response = server.respond(&Method::GET, "/").await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_directory_listing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();

        let server = server_for(dir.path());
        let response = server.respond(&Method::GET, "/").await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("<a href=\"a/\">a/</a>"));
        assert!(html.contains("<a href=\"b.txt\">b.txt</a>"));
    }

    #[tokio::test]
    async fn test_directory_redirects_without_slash() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();

        let server = server_for(dir.path());
        let response = server.respond(&Method::GET, "/docs").await;

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/docs/");
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let dir = tempdir().unwrap();
        let server = server_for(dir.path());

        let response = server.respond(&Method::POST, "/").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
