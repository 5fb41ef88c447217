//! Replica startup tests: TLS material and endpoint binding

use std::io::Write;

use chorus_server::{Server, ServerError, ServerRuntimeConfig, load_tls_material};

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn pem_pair() -> (tempfile::NamedTempFile, tempfile::NamedTempFile) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    (write_temp(&certified.cert.pem()), write_temp(&certified.key_pair.serialize_pem()))
}

fn path(file: &tempfile::NamedTempFile) -> &str {
    file.path().to_str().unwrap()
}

#[test]
fn generates_self_signed_material_without_paths() {
    let (certs, _key) = load_tls_material(None, None).unwrap();
    assert_eq!(certs.len(), 1);
}

#[test]
fn loads_pem_certificate_and_key() {
    let (cert, key) = pem_pair();
    let (certs, _key) = load_tls_material(Some(path(&cert)), Some(path(&key))).unwrap();
    assert_eq!(certs.len(), 1);
}

#[test]
fn rejects_certificate_without_key() {
    let (cert, _key) = pem_pair();
    let result = load_tls_material(Some(path(&cert)), None);
    assert!(matches!(result, Err(ServerError::Config(_))));
}

#[test]
fn rejects_file_without_certificates() {
    let (_cert, key) = pem_pair();
    let empty = write_temp("not a certificate\n");
    let result = load_tls_material(Some(path(&empty)), Some(path(&key)));
    assert!(matches!(result, Err(ServerError::Config(_))));
}

#[test]
fn rejects_missing_files() {
    let result = load_tls_material(Some("/nonexistent/cert.pem"), Some("/nonexistent/key.pem"));
    assert!(matches!(result, Err(ServerError::Config(_))));
}

#[tokio::test]
async fn binds_ephemeral_port() {
    let config =
        ServerRuntimeConfig { bind_address: "127.0.0.1:0".to_string(), ..Default::default() };
    let server = Server::bind(config).unwrap();

    let addr = server.local_addr().unwrap();
    assert_ne!(addr.port(), 0);
    assert_eq!(server.engine().registry().len(), 0);
}

#[tokio::test]
async fn invalid_bind_address_is_config_error() {
    let config = ServerRuntimeConfig { bind_address: "not-an-address".to_string(), ..Default::default() };
    assert!(matches!(Server::bind(config), Err(ServerError::Config(_))));
}

#[tokio::test]
async fn run_until_returns_after_shutdown_signal() {
    let config =
        ServerRuntimeConfig { bind_address: "127.0.0.1:0".to_string(), ..Default::default() };
    let server = Server::bind(config).unwrap();

    server.run_until(async {}).await.unwrap();
}
