#![allow(dead_code)]

pub mod vctt_mock;

use std::sync::Arc;

use vctt_client::{ClientConfig, SessionStore, VcttBackend, connect_backend};

use vctt_mock::MockVcttServer;

pub const TEST_USER_ID: &str = "itest-user";

pub fn http_backend_for(server: &MockVcttServer) -> Arc<dyn VcttBackend> {
    let mut env = server.env();
    env.insert("VCTT_USER_ID".to_string(), TEST_USER_ID.to_string());
    let config = ClientConfig::from_map(&env).expect("test config should parse");
    assert!(!config.uses_mock_backend());
    connect_backend(&config).expect("http backend should build")
}

pub fn store_for(server: &MockVcttServer) -> SessionStore<Arc<dyn VcttBackend>> {
    SessionStore::new(http_backend_for(server), TEST_USER_ID)
}
