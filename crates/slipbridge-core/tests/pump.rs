//! Pump mode: received chunks delivered as text until the link closes

mod common;

use std::time::Duration;

use common::connect_sim;
use pretty_assertions::assert_eq;
use slipbridge_core::protocol::{ConnectionState, LinkMode, ProtocolError};
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn test_pump_until_device_hangs_up() {
    let (mut conn, mut device, _lines) = connect_sim(LinkMode::Pump, 1000);

    let writer = tokio::spawn(async move {
        let reading = "T=21.5°C\n".as_bytes();
        // Split inside the two-byte degree sign.
        let split = reading.iter().position(|&b| b == 0xC2).unwrap() + 1;
        device.write_all(&reading[..split]).await.unwrap();
        tokio::task::yield_now().await;
        device.write_all(&reading[split..]).await.unwrap();
        device.write_all(b"T=21.6\xFF\n").await.unwrap();
    });

    let mut received = String::new();
    conn.pump(|text| received.push_str(text)).await.unwrap();
    writer.await.unwrap();

    assert_eq!(received, "T=21.5°C\nT=21.6\u{FFFD}\n");
    assert!(!conn.is_connected());
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_pump_stops_on_close_handle() {
    let (mut conn, mut device, _lines) = connect_sim(LinkMode::Pump, 1000);
    let handle = conn.close_handle().unwrap();

    device.write_all(b"ready\r\n").await.unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.close();
    });

    let mut chunks = Vec::new();
    conn.pump(|text| chunks.push(text.to_string())).await.unwrap();

    assert_eq!(chunks.concat(), "ready\r\n");
    assert!(conn.session().is_none());
    drop(device);
}

#[tokio::test]
async fn test_pump_needs_pump_mode() {
    let (mut conn, _device, _lines) = connect_sim(LinkMode::Raw, 1000);
    let err = conn.pump(|_| {}).await.unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::WrongMode {
            expected: LinkMode::Pump,
            actual: LinkMode::Raw
        }
    ));
    assert!(conn.is_connected());
}
