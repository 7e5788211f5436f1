//! The fixed verification scenario and the target it runs against.

use crate::error::HarnessError;
use crate::verifier::{RequestConfig, Scheme, TrustPolicy};
use crate::Result;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Method, StatusCode};
use std::time::Duration;

/// Where the service under test listens and what it is expected to answer
#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// Host the TCP connections go to
    pub connect_host: String,
    pub http_port: u16,
    pub https_port: u16,
    /// Virtual host sent in the Host header (and as TLS server name when pinned)
    pub virtual_host: String,
    pub path: String,
    pub expected_status: StatusCode,
    pub expected_location: String,
    pub trust: TrustPolicy,
    /// Use the virtual host as TLS server identity instead of the connect host
    pub pin_server_name: bool,
    pub request_timeout: Duration,
    pub accept: String,
    pub user_agent: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            connect_host: "localhost".to_string(),
            http_port: 8880,
            https_port: 8843,
            virtual_host: "r.forwarddomain.net".to_string(),
            path: "/hello".to_string(),
            expected_status: StatusCode::FOUND,
            expected_location: "https://forwarddomain.net/hello".to_string(),
            trust: TrustPolicy::Bypass,
            pin_server_name: true,
            request_timeout: Duration::from_secs(30),
            accept: "text/plain".to_string(),
            user_agent: "test".to_string(),
        }
    }
}

impl TargetConfig {
    fn fixed_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in [(ACCEPT, &self.accept), (USER_AGENT, &self.user_agent)] {
            let value = HeaderValue::from_str(value).map_err(|_| {
                HarnessError::Config(format!("'{}' is not a valid {} header value", value, name))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn request(&self, scheme: Scheme) -> Result<RequestConfig> {
        let (port, pin_server_name) = match scheme {
            Scheme::Http => (self.http_port, false),
            Scheme::Https => (self.https_port, self.pin_server_name),
        };
        Ok(RequestConfig {
            method: Method::GET,
            scheme,
            connect_host: self.connect_host.clone(),
            port,
            path: self.path.clone(),
            host_override: Some(self.virtual_host.clone()),
            pin_server_name,
            headers: self.fixed_headers()?,
        })
    }
}

/// What a response must look like
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub status: StatusCode,
    /// Exact `Location` value, when one is required
    pub location: Option<String>,
}

/// A request paired with the response it must produce
#[derive(Debug, Clone)]
pub struct ExpectedAssertion {
    pub name: String,
    pub request: RequestConfig,
    pub expect: Expectation,
    /// When set, the identical request is re-issued on the same client under
    /// this step name and must return the same status.
    pub reuse_check: Option<String>,
}

/// The host-routed redirect scenario: plaintext redirect, TLS redirect, then
/// the TLS request again over the pooled connection.
///
/// Fails with `Config` if a fixed header value cannot be sent.
pub fn redirect_scenario(target: &TargetConfig) -> Result<Vec<ExpectedAssertion>> {
    let expect = Expectation {
        status: target.expected_status,
        location: Some(target.expected_location.clone()),
    };

    Ok(vec![
        ExpectedAssertion {
            name: "plaintext redirect".to_string(),
            request: target.request(Scheme::Http)?,
            expect: expect.clone(),
            reuse_check: None,
        },
        ExpectedAssertion {
            name: "tls redirect".to_string(),
            request: target.request(Scheme::Https)?,
            expect,
            reuse_check: Some("tls redirect on reused connection".to_string()),
        },
    ])
}
