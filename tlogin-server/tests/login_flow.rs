//! End-to-end client flows against a running server and a scripted
//! query manager.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey};
use tlogin_crypto::{RsaDecryptor, XteaKey};
use tlogin_protocol::{tag, WireReader, WireWriter};
use tlogin_query::{QueryClient, QueryConfig};
use tlogin_server::config::fnv1a32;
use tlogin_server::handler::message;
use tlogin_server::{Config, LoginService, Server, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TEST_KEY_PEM: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../testdata/login_test_key.pem"));

const SECRET: &str = "qm-secret";
const SESSION_KEY: [u32; 4] = [0x1111_2222, 0x3333_4444, 0x5555_6666, 0x7777_8888];

// ---------------------------------------------------------------------------
// Scripted query manager
// ---------------------------------------------------------------------------

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    let mut payload = vec![0u8; u16::from_le_bytes(header) as usize];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
    let mut frame = (payload.len() as u16).to_le_bytes().to_vec();
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await.unwrap();
}

async fn accept_link(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let login = read_frame(&mut stream).await.unwrap();
    assert_eq!(login[..2], [0, 2]);
    write_frame(&mut stream, &[0]).await;
    stream
}

fn written(buf: &mut Vec<u8>, build: impl FnOnce(&mut WireWriter<'_>)) {
    let mut writer = WireWriter::new(buf);
    build(&mut writer);
    let len = writer.position();
    buf.truncate(len);
}

fn granted_response() -> Vec<u8> {
    let mut buf = vec![0u8; 256];
    written(&mut buf, |writer| {
        writer.write_u8(0);
        writer.write_u8(2);
        for (name, world, port) in [("Alpha", "Antica", 7172), ("Beta", "Secura", 7173)] {
            writer.write_string(name);
            writer.write_string(world);
            writer.write_u32_be(u32::from(Ipv4Addr::new(10, 0, 0, 5)));
            writer.write_u16(port);
        }
        writer.write_u16(12);
    });
    buf
}

fn world_list_response() -> Vec<u8> {
    let mut buf = vec![0u8; 256];
    written(&mut buf, |writer| {
        writer.write_u8(0);
        writer.write_u8(1);
        writer.write_string("Antica");
        writer.write_u8(0);
        writer.write_u16(42);
        writer.write_u16(900);
        writer.write_u16(40);
        writer.write_u32(1_700_000_000);
        writer.write_u32(1_700_000_000);
        writer.write_u32(1_600_000_000);
    });
    buf
}

// ---------------------------------------------------------------------------
// Server under test
// ---------------------------------------------------------------------------

struct Harness {
    server: Arc<Server>,
    addr: SocketAddr,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

async fn start(config: Config, backend_port: u16) -> Harness {
    let decryptor = Arc::new(RsaDecryptor::from_pem(TEST_KEY_PEM).unwrap());
    let query = Arc::new(QueryClient::new(
        QueryConfig::new("127.0.0.1", backend_port)
            .with_password(SECRET)
            .with_connect_timeout(Duration::from_secs(2))
            .with_request_timeout(Duration::from_secs(2)),
    ));
    let service = Arc::new(LoginService::from_config(&config, decryptor, query));
    let server = Arc::new(Server::new(
        ServerConfig::from_config(&config).with_tick(Duration::from_millis(50)),
        service,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });
    Harness { server, addr }
}

/// A port with nothing listening on it.
async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

fn encrypt_block(plaintext: &[u8; 128]) -> [u8; 128] {
    let key = RsaPrivateKey::from_pkcs1_pem(TEST_KEY_PEM).unwrap();
    let cipher = BigUint::from_bytes_be(plaintext).modpow(key.e(), key.n());
    let bytes = cipher.to_bytes_be();
    let mut block = [0u8; 128];
    block[128 - bytes.len()..].copy_from_slice(&bytes);
    block
}

fn credentials_block(account_id: u32, password: &str) -> [u8; 128] {
    let mut plaintext = [0u8; 128];
    let mut writer = WireWriter::new(&mut plaintext);
    writer.write_u8(0);
    for word in SESSION_KEY {
        writer.write_u32(word);
    }
    writer.write_u32(account_id);
    writer.write_string(password);
    encrypt_block(&plaintext)
}

fn login_frame(terminal_type: u16, terminal_version: u16, block: &[u8; 128]) -> Vec<u8> {
    let mut payload = vec![1u8];
    payload.extend_from_slice(&terminal_type.to_le_bytes());
    payload.extend_from_slice(&terminal_version.to_le_bytes());
    payload.extend_from_slice(&[0xAB; 12]);
    payload.extend_from_slice(block);
    assert_eq!(payload.len(), 145);

    let mut frame = (payload.len() as u16).to_le_bytes().to_vec();
    frame.extend_from_slice(&payload);
    frame
}

/// Sends `request` and collects everything until the server closes.
async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("server did not close the connection")
        .unwrap();
    response
}

/// Decrypts a login response and returns the data section.
fn open_response(mut response: Vec<u8>) -> Vec<u8> {
    let encrypted = u16::from_le_bytes([response[0], response[1]]) as usize;
    assert_eq!(response.len(), encrypted + 2);
    assert_eq!(encrypted % 8, 0);

    XteaKey::new(SESSION_KEY).decrypt(&mut response[2..]);
    let data_len = u16::from_le_bytes([response[2], response[3]]) as usize;
    response[4..4 + data_len].to_vec()
}

fn login_error(data: &[u8]) -> String {
    let mut reader = WireReader::new(data);
    assert_eq!(reader.read_u8(), tag::LOGIN_ERROR);
    let text = reader.read_string();
    assert_eq!(reader.remaining(), 0);
    text
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_login_lists_characters() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_port = backend.local_addr().unwrap().port();
    let script = tokio::spawn(async move {
        let mut link = accept_link(&backend).await;
        let request = read_frame(&mut link).await.unwrap();
        let mut reader = WireReader::new(&request);
        assert_eq!(reader.read_u8(), 11);
        assert_eq!(reader.read_u32(), 1001);
        assert_eq!(reader.read_string(), "secret");
        assert_eq!(reader.read_string(), "127.0.0.1");
        write_frame(&mut link, &granted_response()).await;
    });

    let config = Config {
        motd: "Welcome to Antica!".to_string(),
        ..Config::default()
    };
    let harness = start(config, backend_port).await;

    let request = login_frame(2, 770, &credentials_block(1001, "secret"));
    let data = open_response(exchange(harness.addr, &request).await);
    script.await.unwrap();

    let mut reader = WireReader::new(&data);
    assert_eq!(reader.read_u8(), tag::MOTD);
    assert_eq!(
        reader.read_string(),
        format!("{}\nWelcome to Antica!", fnv1a32("Welcome to Antica!"))
    );

    assert_eq!(reader.read_u8(), tag::CHARACTER_LIST);
    assert_eq!(reader.read_u8(), 2);
    assert_eq!(reader.read_string(), "Alpha");
    assert_eq!(reader.read_string(), "Antica");
    assert_eq!(reader.read_u32_be(), u32::from(Ipv4Addr::new(10, 0, 0, 5)));
    assert_eq!(reader.read_u16(), 7172);
    assert_eq!(reader.read_string(), "Beta");
    assert_eq!(reader.read_string(), "Secura");
    assert_eq!(reader.read_u32_be(), u32::from(Ipv4Addr::new(10, 0, 0, 5)));
    assert_eq!(reader.read_u16(), 7173);
    assert_eq!(reader.read_u16(), 12);
    assert_eq!(reader.remaining(), 0);

    let stats = harness.server.stats();
    assert_eq!(stats.login_requests.load(Ordering::Relaxed), 1);
    assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_outdated_terminal_gets_message() {
    let harness = start(Config::default(), dead_port().await).await;

    let request = login_frame(2, 760, &credentials_block(1001, "secret"));
    let data = open_response(exchange(harness.addr, &request).await);
    assert_eq!(login_error(&data), message::TERMINAL_TOO_OLD);
}

#[tokio::test]
async fn test_unknown_terminal_type_gets_message() {
    let harness = start(Config::default(), dead_port().await).await;

    let request = login_frame(3, 770, &credentials_block(1001, "secret"));
    let data = open_response(exchange(harness.addr, &request).await);
    assert_eq!(login_error(&data), message::TERMINAL_TOO_OLD);
}

#[tokio::test]
async fn test_refused_login_gets_message() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_port = backend.local_addr().unwrap().port();
    let script = tokio::spawn(async move {
        let mut link = accept_link(&backend).await;
        read_frame(&mut link).await.unwrap();
        write_frame(&mut link, &[1, 5]).await;
    });

    let harness = start(Config::default(), backend_port).await;
    let request = login_frame(0, 770, &credentials_block(77, "hunter2"));
    let data = open_response(exchange(harness.addr, &request).await);
    script.await.unwrap();

    assert_eq!(login_error(&data), message::ACCOUNT_BANISHED);
}

#[tokio::test]
async fn test_backend_down_gets_internal_error() {
    let harness = start(Config::default(), dead_port().await).await;

    let request = login_frame(1, 770, &credentials_block(1001, "secret"));
    let data = open_response(exchange(harness.addr, &request).await);
    assert_eq!(login_error(&data), message::INTERNAL_ERROR);
}

#[tokio::test]
async fn test_overlong_password_treated_as_empty() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_port = backend.local_addr().unwrap().port();
    let script = tokio::spawn(async move {
        let mut link = accept_link(&backend).await;
        let request = read_frame(&mut link).await.unwrap();
        let mut reader = WireReader::new(&request);
        reader.skip(5);
        assert_eq!(reader.read_string(), "");
        write_frame(&mut link, &[1, 2]).await;
    });

    let harness = start(Config::default(), backend_port).await;
    let password = "p".repeat(30);
    let request = login_frame(0, 770, &credentials_block(1001, &password));
    let data = open_response(exchange(harness.addr, &request).await);
    script.await.unwrap();

    assert_eq!(login_error(&data), message::INVALID_CREDENTIALS);
}

#[tokio::test]
async fn test_handshake_rejection_writes_nothing() {
    let harness = start(Config::default(), dead_port().await).await;

    // Decrypts fine but the plaintext marker byte is not zero.
    let mut plaintext = [0u8; 128];
    plaintext[0] = 1;
    let request = login_frame(0, 770, &encrypt_block(&plaintext));
    assert!(exchange(harness.addr, &request).await.is_empty());

    // Not a valid ciphertext at all.
    let request = login_frame(0, 770, &[0xFF; 128]);
    assert!(exchange(harness.addr, &request).await.is_empty());
}

#[tokio::test]
async fn test_status_request_mixed_case() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_port = backend.local_addr().unwrap().port();
    let script = tokio::spawn(async move {
        let mut link = accept_link(&backend).await;
        let request = read_frame(&mut link).await.unwrap();
        assert_eq!(request, [150]);
        write_frame(&mut link, &world_list_response()).await;
    });

    let mut config = Config::default();
    config.status.world = "antica".to_string();
    config.status.url = "https://example.org".to_string();
    let harness = start(config, backend_port).await;

    let request = [6, 0, 255, 255, b'I', b'N', b'F', b'O'];
    let response = exchange(harness.addr, &request).await;
    script.await.unwrap();

    let document = String::from_utf8(response).unwrap();
    assert!(document.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><tsqp version=\"1.0\">"));
    assert!(document.contains("servername=\"Antica\""));
    assert!(document.contains("url=\"https://example.org\""));
    assert!(document.contains("<players online=\"42\" max=\"900\" peak=\"42\"/>"));
    assert!(document.ends_with("</tsqp>"));

    // Same address again within the interval.
    assert!(exchange(harness.addr, &request).await.is_empty());
    assert_eq!(
        harness.server.stats().status_requests.load(Ordering::Relaxed),
        2
    );
}

#[tokio::test]
async fn test_slots_returned_after_requests() {
    let harness = start(Config::default(), dead_port().await).await;

    for _ in 0..3 {
        let request = login_frame(2, 1, &credentials_block(5, "x"));
        exchange(harness.addr, &request).await;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.server.pool().in_use(), 0);
    assert_eq!(
        harness
            .server
            .stats()
            .connections_active
            .load(Ordering::Relaxed),
        0
    );
}
