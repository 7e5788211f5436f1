//! Stand-in for the forwarding service under test
//!
//! Listens for plaintext and TLS HTTP/1.1 and answers the way the real
//! service does for a forwarding record: a request for `r.<domain><path>`
//! is redirected with 302 to `https://<domain><path>`. Any other host gets
//! a 404. Every request's Host header and the TLS server names are recorded
//! for assertions.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HOST, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use super::certificates::TestCertificates;

#[derive(Default)]
struct Recorded {
    hosts: Mutex<Vec<String>>,
    server_names: Mutex<Vec<Option<String>>>,
    tls_connections: AtomicUsize,
    plain_connections: AtomicUsize,
    /// Replaces the computed Location when set
    location_override: Mutex<Option<String>>,
}

pub struct MockForwardService {
    pub http_addr: SocketAddr,
    pub https_addr: SocketAddr,
    recorded: Arc<Recorded>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockForwardService {
    pub async fn start(certs: &TestCertificates) -> Self {
        let http_listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind plaintext listener");
        let https_listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind TLS listener");
        let http_addr = http_listener.local_addr().unwrap();
        let https_addr = https_listener.local_addr().unwrap();

        let tls_config = ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .expect("Failed to select TLS versions")
        .with_no_client_auth()
        .with_single_cert(certs.server_chain(), certs.server_key())
        .expect("Failed to build server TLS config");
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let recorded = Arc::new(Recorded::default());

        let plain = {
            let recorded = recorded.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = http_listener.accept().await {
                    recorded.plain_connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, recorded.clone()));
                }
            })
        };

        let tls = {
            let recorded = recorded.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = https_listener.accept().await {
                    let acceptor = acceptor.clone();
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        let Ok(tls_stream) = acceptor.accept(stream).await else {
                            return;
                        };
                        recorded.tls_connections.fetch_add(1, Ordering::SeqCst);
                        let server_name = tls_stream.get_ref().1.server_name().map(str::to_string);
                        recorded.server_names.lock().unwrap().push(server_name);
                        serve(tls_stream, recorded).await;
                    });
                }
            })
        };

        Self {
            http_addr,
            https_addr,
            recorded,
            tasks: vec![plain, tls],
        }
    }

    /// Answer every redirect with this Location instead
    pub fn set_location(&self, location: impl Into<String>) {
        *self.recorded.location_override.lock().unwrap() = Some(location.into());
    }

    /// Host headers of every request, in arrival order
    pub fn hosts(&self) -> Vec<String> {
        self.recorded.hosts.lock().unwrap().clone()
    }

    /// SNI of every completed TLS handshake
    pub fn server_names(&self) -> Vec<Option<String>> {
        self.recorded.server_names.lock().unwrap().clone()
    }

    pub fn tls_connections(&self) -> usize {
        self.recorded.tls_connections.load(Ordering::SeqCst)
    }

    pub fn plain_connections(&self) -> usize {
        self.recorded.plain_connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockForwardService {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn serve<S>(stream: S, recorded: Arc<Recorded>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let recorded = recorded.clone();
        async move { Ok::<_, Infallible>(respond(&req, &recorded)) }
    });

    let _ = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await;
}

fn respond(req: &Request<Incoming>, recorded: &Recorded) -> Response<Full<Bytes>> {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    recorded.hosts.lock().unwrap().push(host.clone());

    let hostname = host.split(':').next().unwrap_or("");
    let Some(domain) = hostname.strip_prefix("r.") else {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from_static(b"no forwarding record\n")))
            .unwrap();
    };

    let location = recorded
        .location_override
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| format!("https://{}{}", domain, req.uri().path()));

    Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, location.as_str())
        .body(Full::new(Bytes::from(format!("Found. Redirecting to {}\n", location))))
        .unwrap()
}
