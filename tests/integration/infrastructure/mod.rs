pub mod binary_harness;
pub mod certificates;
pub mod mock_forward_service;

pub use binary_harness::BinaryHarness;
pub use certificates::TestCertificates;
pub use mock_forward_service::MockForwardService;

use forward_harness::{TargetConfig, TrustPolicy};
use std::time::Duration;

pub const VIRTUAL_HOST: &str = "r.forwarddomain.net";

/// Target pointing at a running mock, with the default forwarding expectations
pub fn target_for(service: &MockForwardService) -> TargetConfig {
    TargetConfig {
        connect_host: "127.0.0.1".to_string(),
        http_port: service.http_addr.port(),
        https_port: service.https_addr.port(),
        trust: TrustPolicy::Bypass,
        request_timeout: Duration::from_secs(5),
        ..TargetConfig::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
