//! End to end against a fake TBBOX listening on localhost.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tbbox_gate::comm::{self, Comm};
use tbbox_gate::controller::SwitchController;
use tbbox_gate::directory::ProgramDirectory;
use tbbox_gate::error::{ControlError, SessionError};
use tbbox_gate::http::{self, AppState};
use tbbox_gate::pattern::PatternTranslator;
use tbbox_gate::payload::CommandPayload;
use tbbox_gate::session::{DeviceSession, SessionConfig, TcpConnector};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const LOGIN: &str = "55 aa 00 01";

fn payload(hex: &str) -> CommandPayload {
    CommandPayload::parse(hex).unwrap()
}

fn quick() -> SessionConfig {
    SessionConfig {
        connect_timeout: Duration::from_secs(1),
        io_timeout: Duration::from_secs(1),
        response_timeout: Duration::from_millis(50),
        connect_retries: 3,
        connect_retry_delay: Duration::from_millis(10),
        send_retries: 2,
        send_retry_delay: Duration::from_millis(10),
    }
}

fn directory() -> ProgramDirectory {
    let programs = HashMap::from([
        ("01".parse().unwrap(), payload("a1a1")),
        ("11".parse().unwrap(), payload("b1 b1 b1")),
    ]);
    ProgramDirectory::new(
        programs,
        payload("c1"),
        payload("c2"),
        payload("c3"),
        BTreeMap::new(),
    )
    .unwrap()
}

fn controller(addr: String) -> (SwitchController, JoinHandle<()>) {
    let session = DeviceSession::new(TcpConnector::new(addr), payload(LOGIN), quick());
    let Comm { handle, worker } = comm::spawn(session);
    (SwitchController::new(Arc::new(directory()), handle), worker)
}

/// Accept one connection, answer once, record everything until EOF.
async fn fake_device() -> (String, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let device = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = vec![0u8; 4];
        socket.read_exact(&mut received).await.unwrap();
        socket.write_all(b"OK").await.unwrap();
        socket.read_to_end(&mut received).await.unwrap();
        received
    });
    (addr, device)
}

#[tokio::test]
async fn login_then_command_reach_device() {
    let (addr, device) = fake_device().await;
    let (controller, worker) = controller(addr);

    controller.connect().await.unwrap();
    controller.switch_program("11".parse().unwrap()).await.unwrap();
    controller.pause().await.unwrap();
    controller.close().await;
    drop(controller);
    worker.await.unwrap();

    let received = device.await.unwrap();
    assert_eq!(
        received,
        vec![0x55, 0xaa, 0x00, 0x01, 0xb1, 0xb1, 0xb1, 0xc1]
    );
}

#[tokio::test]
async fn device_hangup_is_followed_by_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let device = tokio::spawn(async move {
        // First connection: take the login, then hang up.
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut login = [0u8; 4];
        socket.read_exact(&mut login).await.unwrap();
        drop(socket);

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        socket.read_to_end(&mut received).await.unwrap();
        received
    });
    let (controller, worker) = controller(addr);

    controller.connect().await.unwrap();
    controller.switch_program("11".parse().unwrap()).await.unwrap();
    controller.switch_program("01".parse().unwrap()).await.unwrap();
    controller.close().await;
    drop(controller);
    worker.await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), device)
        .await
        .unwrap()
        .unwrap();
    assert!(received.starts_with(&[0x55, 0xaa, 0x00, 0x01]), "{:02x?}", received);
    assert!(received.ends_with(&[0xa1, 0xa1]), "{:02x?}", received);
}

#[tokio::test]
async fn unreachable_device_fails_after_bounded_attempts() {
    // Grab a free port, then stop listening on it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let (controller, _worker) = controller(addr);
    let result = controller.switch_program("01".parse().unwrap()).await;
    assert!(matches!(
        result,
        Err(ControlError::Delivery(SessionError::ConnectFailed { attempts: 3 }))
    ));
}

#[tokio::test]
async fn http_alert_drives_device() {
    let (device_addr, device) = fake_device().await;
    let (controller, worker) = controller(device_addr);

    let state = AppState {
        translator: Arc::new(PatternTranslator::default()),
        controller: controller.clone(),
    };
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    // Reserve a port for the gate.
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bind = reserved.local_addr().unwrap().to_string();
    drop(reserved);

    let server_bind = bind.clone();
    let server = tokio::spawn(async move {
        http::serve(&server_bind, state, async move {
            let _ = stop_rx.await;
        })
        .await
    });

    // Wait for the listener to come up and send a raw HTTP request.
    let mut stream = None;
    for _ in 0..50 {
        match tokio::net::TcpStream::connect(&bind).await {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let mut stream = stream.expect("gate HTTP listener up");
    stream
        .write_all(b"GET /api/control?alert=10109999&id=t1 HTTP/1.1\r\nHost: gate\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains(r#""program":"11""#), "{}", response);

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
    controller.close().await;
    drop(controller);
    worker.await.unwrap();

    let received = device.await.unwrap();
    assert_eq!(&received[4..], &[0xb1, 0xb1, 0xb1]);
}
