//! End-to-end integration tests for USB2FA.
//!
//! These tests verify complete flows work correctly:
//! - Escalation of unknown devices against a fake push-auth provider
//! - Ledger contents after approval, denial and provider failure
//! - Control commands routed through the orchestrator
//! - Throttling of repeated escalations

use std::cell::RefCell;
use std::fs;
use std::path::Path;

use daemon::config::Config;
use daemon::devices::{load_file, SysfsEnumerator};
use daemon::protocol::identity_key;
use daemon::{
    Agent, ConfigSource, ControlCommand, DuoClient, HostActions, Orchestrator, OrchestratorState,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Host that records what it was asked to do.
#[derive(Default)]
struct RecordingHost {
    calls: RefCell<Vec<String>>,
}

impl RecordingHost {
    fn count(&self, call: &str) -> usize {
        self.calls.borrow().iter().filter(|c| *c == call).count()
    }
}

impl HostActions for RecordingHost {
    fn notify(&self, _title: &str, _message: &str) {
        self.calls.borrow_mut().push("notify".to_string());
    }

    fn lock_session(&self) {
        self.calls.borrow_mut().push("lock".to_string());
    }

    fn shutdown_host(&self) {
        self.calls.borrow_mut().push("shutdown".to_string());
    }
}

type TestAgent = Agent<SysfsEnumerator, DuoClient, RecordingHost>;

/// Fake sysfs tree plus ledger files in one temporary directory.
struct Fixture {
    temp_dir: TempDir,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("sys")).unwrap();

        let mut config = Config::default();
        config.ledger.devices_file = temp_dir.path().join("usb2fac.json");
        config.ledger.backup_file = temp_dir.path().join("usb2fac.bak");
        config.ledger.rejected_file = temp_dir.path().join("rejected.json");
        config.daemon.loop_delay_ms = 10;
        config.daemon.throttle_ticks = 2;
        config.paranoia.connect = 1;
        config.paranoia.reject = 2;
        config.push_auth.host = "api-abc123.duosecurity.com".to_string();
        config.push_auth.integration_key = "DIABC".to_string();
        config.push_auth.secret_key = "skey-secret".to_string();
        config.push_auth.username = "alice".to_string();
        config.push_auth.timeout_secs = 5;

        Self { temp_dir, config }
    }

    fn attach(&self, name: &str, vendor: &str, product: &str, serial: &str, description: &str) {
        let dir = self.temp_dir.path().join("sys").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("idVendor"), format!("{}\n", vendor)).unwrap();
        fs::write(dir.join("idProduct"), format!("{}\n", product)).unwrap();
        fs::write(dir.join("serial"), format!("{}\n", serial)).unwrap();
        fs::write(dir.join("product"), format!("{}\n", description)).unwrap();
    }

    fn attach_test_drive(&self) {
        self.attach("1-1", "1234", "5678", "AB12", "Test Drive");
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.temp_dir.path().join(name)
    }

    fn agent(&self, server: &MockServer) -> TestAgent {
        let client = DuoClient::new(&self.config.push_auth)
            .unwrap()
            .with_base_url(server.uri());
        Agent::new(
            self.config.clone(),
            ConfigSource::default(),
            SysfsEnumerator::with_root(self.temp_dir.path().join("sys")),
            client,
            RecordingHost::default(),
        )
    }
}

fn ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "stat": "OK",
        "response": "pong"
    }))
}

fn auth(result: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "stat": "OK",
        "response": { "result": result, "status": result, "status_msg": "done" }
    }))
}

/// Mounts ping, check and preauth answering OK.
async fn mount_handshake(server: &MockServer) {
    for (verb, route) in [
        ("GET", "/auth/v2/ping"),
        ("GET", "/auth/v2/check"),
        ("POST", "/auth/v2/preauth"),
    ] {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ok())
            .mount(server)
            .await;
    }
}

fn file_bytes(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}

// =============================================================================
// Escalation Tests
// =============================================================================

#[tokio::test]
async fn test_approved_device_is_trusted() {
    let fixture = Fixture::new();
    fixture.attach_test_drive();

    let server = MockServer::start().await;
    mount_handshake(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/v2/auth"))
        .respond_with(auth("allow"))
        .expect(1)
        .mount(&server)
        .await;

    let mut agent = fixture.agent(&server);
    let report = agent.run_cycle().await.unwrap();
    assert_eq!(report.approved, 1);

    let trusted = load_file(&fixture.path("usb2fac.json"));
    assert_eq!(trusted.len(), 1);
    assert_eq!(trusted[0].identity_key, identity_key("0x1234", "0x5678"));
    assert_eq!(trusted[0].serial_number, "AB12");
    assert_eq!(trusted[0].description, "Test Drive");

    assert!(fixture.path("usb2fac.bak").exists());
    assert!(load_file(&fixture.path("usb2fac.bak")).is_empty());
    assert!(!fixture.path("rejected.json").exists());

    assert_eq!(agent.host().count("lock"), 0);
    assert_eq!(agent.host().count("shutdown"), 0);
}

#[tokio::test]
async fn test_denied_device_is_rejected() {
    let fixture = Fixture::new();
    fixture.attach_test_drive();

    let server = MockServer::start().await;
    mount_handshake(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/v2/auth"))
        .respond_with(auth("deny"))
        .mount(&server)
        .await;

    let mut agent = fixture.agent(&server);
    let report = agent.run_cycle().await.unwrap();
    assert_eq!(report.rejected, 1);

    assert_eq!(load_file(&fixture.path("rejected.json")).len(), 1);
    assert!(!fixture.path("usb2fac.json").exists());
    assert!(!fixture.path("usb2fac.bak").exists());
    assert_eq!(agent.host().count("lock"), 1);
}

#[tokio::test]
async fn test_check_failure_aborts_before_push() {
    let fixture = Fixture::new();
    fixture.attach_test_drive();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v2/ping"))
        .respond_with(ok())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/v2/check"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "stat": "FAIL",
            "code": 40103,
            "message": "Invalid signature in request credentials"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(auth("allow"))
        .expect(0)
        .mount(&server)
        .await;

    let mut agent = fixture.agent(&server);
    agent.run_cycle().await.unwrap();

    let rejected = load_file(&fixture.path("rejected.json"));
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].identity_key, identity_key("0x1234", "0x5678"));
    assert_eq!(agent.host().count("lock"), 1);
}

#[tokio::test]
async fn test_trusted_device_never_escalates() {
    let fixture = Fixture::new();
    fixture.attach_test_drive();

    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ok())
        .expect(0)
        .mount(&server)
        .await;

    let mut agent = fixture.agent(&server);
    agent.force_discovery().unwrap();

    for _ in 0..25 {
        let report = agent.run_cycle().await.unwrap();
        assert_eq!(report.seen, 1);
        assert_eq!(report.escalated, 0);
    }
    assert!(agent.host().calls.borrow().is_empty());
}

#[tokio::test]
async fn test_rejected_device_escalates_once_per_window() {
    let fixture = Fixture::new();
    fixture.attach_test_drive();

    let server = MockServer::start().await;
    mount_handshake(&server).await;
    // threshold 2: escalations on cycles 1, 5 and 9 of ten.
    Mock::given(method("POST"))
        .and(path("/auth/v2/auth"))
        .respond_with(auth("deny"))
        .expect(3)
        .mount(&server)
        .await;

    let mut agent = fixture.agent(&server);
    let mut escalations = 0;
    for _ in 0..10 {
        escalations += agent.run_cycle().await.unwrap().escalated;
    }

    assert_eq!(escalations, 3);
    assert_eq!(load_file(&fixture.path("rejected.json")).len(), 1);
}

#[tokio::test]
async fn test_provider_unreachable_rejects() {
    let fixture = Fixture::new();
    fixture.attach_test_drive();

    let mut agent = {
        let client = DuoClient::new(&fixture.config.push_auth)
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        Agent::new(
            fixture.config.clone(),
            ConfigSource::default(),
            SysfsEnumerator::with_root(fixture.path("sys")),
            client,
            RecordingHost::default(),
        )
    };

    let report = agent.run_cycle().await.unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(agent.ledger().rejected().len(), 1);
}

// =============================================================================
// Control Surface Tests
// =============================================================================

#[tokio::test]
async fn test_reset_rejected_through_orchestrator() {
    let mut fixture = Fixture::new();
    fixture.config.daemon.throttle_ticks = 1000;
    for (i, vendor) in ["0001", "0002", "0003", "0004", "0005"].iter().enumerate() {
        fixture.attach(&format!("1-{}", i + 1), vendor, "beef", "SN", "Stick");
    }

    let server = MockServer::start().await;
    mount_handshake(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/v2/auth"))
        .respond_with(auth("deny"))
        .mount(&server)
        .await;

    let mut agent = fixture.agent(&server);
    agent.run_cycle().await.unwrap();
    assert_eq!(agent.ledger().rejected().len(), 5);
    let trusted_before = agent.ledger().trusted().to_vec();

    let mut orchestrator = Orchestrator::new(agent);
    let handle = orchestrator.control_handle();
    let token = orchestrator.shutdown_token();

    let driver = async move {
        handle.request(ControlCommand::ResetRejected).await.unwrap();
        token.cancel();
    };
    tokio::join!(orchestrator.run(), driver);

    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
    assert!(load_file(&fixture.path("rejected.json")).is_empty());
    assert_eq!(orchestrator.agent().ledger().trusted(), trusted_before.as_slice());
}

#[tokio::test]
async fn test_force_discovery_is_idempotent() {
    let fixture = Fixture::new();
    fixture.attach_test_drive();
    fixture.attach("1-2", "046d", "c52b", "", "USB Receiver");

    let server = MockServer::start().await;
    let mut agent = fixture.agent(&server);

    assert_eq!(agent.force_discovery().unwrap(), 2);
    let first = file_bytes(&fixture.path("usb2fac.json"));

    assert_eq!(agent.force_discovery().unwrap(), 2);
    let second = file_bytes(&fixture.path("usb2fac.json"));

    assert_eq!(first, second);
    assert_eq!(file_bytes(&fixture.path("usb2fac.bak")), first);
}

#[tokio::test]
async fn test_reload_reads_ledger_changes() {
    let fixture = Fixture::new();
    fixture.attach_test_drive();

    let config_path = fixture.path("config.toml");
    fixture.config.save(&config_path).unwrap();

    let server = MockServer::start().await;
    let client = DuoClient::new(&fixture.config.push_auth)
        .unwrap()
        .with_base_url(server.uri());
    let mut agent = Agent::new(
        fixture.config.clone(),
        ConfigSource {
            path: Some(config_path),
            overrides: Default::default(),
        },
        SysfsEnumerator::with_root(fixture.path("sys")),
        client,
        RecordingHost::default(),
    );
    assert!(agent.ledger().trusted().is_empty());

    // Another tool writes the trusted ledger while the agent runs.
    let mut other = fixture.agent(&server);
    other.force_discovery().unwrap();

    agent.reload_config();
    assert_eq!(agent.ledger().trusted().len(), 1);
}
