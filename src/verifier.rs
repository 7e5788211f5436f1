use crate::error::HarnessError;
use crate::scenario::{Expectation, ExpectedAssertion, TargetConfig};
use crate::Result;
use reqwest::header::{HeaderMap, HOST, LOCATION};
use reqwest::{redirect, Certificate, Client, Method, Request, StatusCode};
use std::fmt;
use std::net::{Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::net::lookup_host;
use tracing::{debug, info};

/// How the client decides whether to trust the server certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Built-in web PKI roots
    System,
    /// Built-in roots plus every certificate in a PEM bundle
    Bundle(PathBuf),
    /// Accept any certificate (self-signed test CAs)
    Bypass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => f.write_str("http"),
            Scheme::Https => f.write_str("https"),
        }
    }
}

/// Everything that goes into one request
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub scheme: Scheme,
    /// Host the connection is made to
    pub connect_host: String,
    pub port: u16,
    pub path: String,
    /// Host header sent regardless of the address connected to
    pub host_override: Option<String>,
    /// For TLS, present `host_override` as the server name (SNI and
    /// certificate identity) while still connecting to `connect_host`
    pub pin_server_name: bool,
    pub headers: HeaderMap,
}

impl RequestConfig {
    /// Host part of the URL. A pinned server name goes into the URL and the
    /// client's resolver override points it back at the connect host.
    pub fn url_host(&self) -> &str {
        match (&self.host_override, self.scheme) {
            (Some(host), Scheme::Https) if self.pin_server_name => host,
            _ => &self.connect_host,
        }
    }

    pub fn url(&self) -> String {
        let host = self.url_host();
        if host.parse::<Ipv6Addr>().is_ok() {
            format!("{}://[{}]:{}{}", self.scheme, host, self.port, self.path)
        } else {
            format!("{}://{}:{}{}", self.scheme, host, self.port, self.path)
        }
    }
}

/// The parts of a response the assertions look at
#[derive(Debug, Clone)]
pub struct ObservedResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub body: String,
}

/// Record of a verification step that passed
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: String,
    pub status: StatusCode,
    pub location: Option<String>,
    pub elapsed: Duration,
}

pub fn assert_status(step: &str, response: &ObservedResponse, expected: StatusCode) -> Result<()> {
    if response.status != expected {
        return Err(HarnessError::Assertion {
            step: step.to_string(),
            what: "status code",
            expected: expected.as_u16().to_string(),
            actual: response.status.as_u16().to_string(),
        });
    }
    Ok(())
}

/// Exact match on `Location`; an absent header is a failure.
pub fn assert_redirect_location(step: &str, response: &ObservedResponse, expected: &str) -> Result<()> {
    match response.location.as_deref() {
        Some(location) if location == expected => Ok(()),
        actual => Err(HarnessError::Assertion {
            step: step.to_string(),
            what: "header Location to be",
            expected: format!("'{}'", expected),
            actual: actual.map_or_else(|| "no Location header".to_string(), |l| format!("'{}'", l)),
        }),
    }
}

fn check(step: &str, response: &ObservedResponse, expect: &Expectation) -> Result<()> {
    assert_status(step, response, expect.status)?;
    if let Some(ref location) = expect.location {
        assert_redirect_location(step, response, location)?;
    }
    Ok(())
}

async fn load_bundle(path: &Path) -> Result<Vec<Certificate>> {
    let pem = tokio::fs::read(path)
        .await
        .map_err(|e| HarnessError::Config(format!("failed to read CA bundle {}: {}", path.display(), e)))?;
    let certs = Certificate::from_pem_bundle(&pem)
        .map_err(|e| HarnessError::Config(format!("invalid CA bundle {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(HarnessError::Config(format!(
            "CA bundle {} contains no certificates",
            path.display()
        )));
    }
    Ok(certs)
}

/// Issues requests against the service and checks the answers
///
/// A single client is used for every step: reuse of its connection pool is
/// part of what is being verified. Redirects are never followed.
pub struct Verifier {
    client: Client,
}

impl Verifier {
    pub async fn new(target: &TargetConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .redirect(redirect::Policy::none())
            .no_proxy()
            .timeout(target.request_timeout);

        builder = match target.trust {
            TrustPolicy::System => builder,
            TrustPolicy::Bypass => builder.danger_accept_invalid_certs(true),
            TrustPolicy::Bundle(ref path) => {
                for cert in load_bundle(path).await? {
                    builder = builder.add_root_certificate(cert);
                }
                builder
            }
        };

        // Pinned requests put the virtual host in the URL; send them to the
        // connect host. Port 0 keeps the port from the URL.
        let addrs: Vec<SocketAddr> = lookup_host((target.connect_host.as_str(), 0))
            .await
            .map_err(|e| {
                HarnessError::Config(format!("cannot resolve {}: {}", target.connect_host, e))
            })?
            .collect();
        builder = builder.resolve_to_addrs(&target.virtual_host, &addrs);

        let client = builder
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn build_request(&self, config: &RequestConfig) -> Result<Request> {
        let url = config.url();
        let mut builder = self
            .client
            .request(config.method.clone(), url.as_str())
            .headers(config.headers.clone());
        if let Some(ref host) = config.host_override {
            builder = builder.header(HOST, host.as_str());
        }
        builder
            .build()
            .map_err(|e| HarnessError::Config(format!("invalid request for {}: {}", url, e)))
    }

    /// Sends the request and reads the full body so the connection goes back
    /// to the pool.
    pub async fn execute(&self, step: &str, request: Request) -> Result<ObservedResponse> {
        let url = request.url().to_string();
        let request_error = |source| HarnessError::Request {
            step: step.to_string(),
            url: url.clone(),
            source,
        };

        debug!("{}: {} {}", step, request.method(), url);
        let response = self.client.execute(request).await.map_err(request_error)?;
        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
        let body = response.text().await.map_err(request_error)?;

        Ok(ObservedResponse { status, location, body })
    }

    /// Re-issues `request` on the same client and requires the same status.
    pub async fn assert_reuse(
        &self,
        step: &str,
        request: &Request,
        expected: StatusCode,
    ) -> Result<ObservedResponse> {
        let response = self.execute(step, replayable(step, request)?).await?;
        assert_status(step, &response, expected)?;
        Ok(response)
    }

    /// Runs the assertions in order, stopping at the first failure.
    pub async fn run(&self, scenario: &[ExpectedAssertion]) -> Result<Vec<StepOutcome>> {
        let mut outcomes = Vec::new();

        for assertion in scenario {
            let request = self.build_request(&assertion.request)?;
            let replay = match assertion.reuse_check {
                Some(ref reuse_name) => Some(replayable(reuse_name, &request)?),
                None => None,
            };

            let started = Instant::now();
            let response = self.execute(&assertion.name, request).await?;
            if !response.body.is_empty() {
                debug!("{} body: {}", assertion.name, response.body);
            }
            check(&assertion.name, &response, &assertion.expect)?;
            outcomes.push(passed(&assertion.name, &response, started));

            if let (Some(reuse_name), Some(replay)) = (&assertion.reuse_check, replay) {
                let started = Instant::now();
                let response = self.assert_reuse(reuse_name, &replay, assertion.expect.status).await?;
                outcomes.push(passed(reuse_name, &response, started));
            }
        }

        Ok(outcomes)
    }
}

fn replayable(step: &str, request: &Request) -> Result<Request> {
    request
        .try_clone()
        .ok_or_else(|| HarnessError::Config(format!("{}: request body cannot be replayed", step)))
}

fn passed(name: &str, response: &ObservedResponse, started: Instant) -> StepOutcome {
    info!(
        "{}: {} {}",
        name,
        response.status,
        response.location.as_deref().unwrap_or("")
    );
    StepOutcome {
        name: name.to_string(),
        status: response.status,
        location: response.location.clone(),
        elapsed: started.elapsed(),
    }
}
