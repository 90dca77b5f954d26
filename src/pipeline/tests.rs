//! End-to-end pipeline tests over real loopback sockets.

use super::*;
use crate::types::{FieldDef, FieldType, PacketSchema};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

fn registry() -> Arc<PacketRegistry> {
    let registry = PacketRegistry::new(0xFF);
    registry
        .register(
            0x42,
            PacketSchema::new(
                "sample_t",
                8,
                true,
                vec![
                    FieldDef {
                        name: "value".to_string(),
                        ty: FieldType::Int32,
                        offset: 0,
                        size: 4,
                    },
                    FieldDef {
                        name: "tick_ms".to_string(),
                        ty: FieldType::UInt32,
                        offset: 4,
                        size: 4,
                    },
                ],
            )
            .unwrap(),
        )
        .unwrap();
    Arc::new(registry)
}

fn quick_config(source_addr: String) -> PipelineConfig {
    PipelineConfig {
        source_addr,
        reconnect_interval_ms: 10,
        reconnect_max_ms: 50,
        dial_timeout_ms: 1_000,
        shutdown_grace_ms: 2_000,
        ..Default::default()
    }
}

/// COBS-encode a payload and append the wire delimiter.
fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = ::cobs::encode_vec(payload);
    frame.push(0x00);
    frame
}

async fn read_lines(
    reader: tokio::io::DuplexStream,
    count: usize,
) -> Vec<serde_json::Value> {
    let mut lines = Vec::new();
    let mut reader = BufReader::new(reader).lines();
    while lines.len() < count {
        let line = tokio::time::timeout(Duration::from_secs(2), reader.next_line())
            .await
            .expect("timed out waiting for jsonl output")
            .unwrap()
            .expect("jsonl stream ended early");
        lines.push(serde_json::from_str(&line).unwrap());
    }
    lines
}

#[tokio::test]
async fn text_struct_and_raw_packets_reach_the_jsonl_sink() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // Text packet: id 0xFF, payload "hi".
        stream.write_all(&encode_frame(&[0xFF, 0x68, 0x69])).await.unwrap();
        // Raw packet: unregistered id 0x7E.
        stream.write_all(&encode_frame(&[0x7E, 0x01, 0x02])).await.unwrap();
        // Struct packet: id 0x42, value = -12, tick_ms = 123.
        stream
            .write_all(&encode_frame(&[
                0x42, 0xF4, 0xFF, 0xFF, 0xFF, 0x7B, 0x00, 0x00, 0x00,
            ]))
            .await
            .unwrap();
        // Malformed COBS frame (code 0x00): must be dropped silently.
        stream.write_all(&[0x00, 0x01, 0x00]).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::new(quick_config(addr.to_string()), registry())
        .unwrap()
        .with_jsonl(writer);
    let run_cancel = cancel.clone();
    let run = tokio::spawn(pipeline.run(run_cancel));

    let lines = read_lines(reader, 3).await;

    assert_eq!(lines[0]["id"], "0xff");
    assert_eq!(lines[0]["payload_hex"], "6869");
    assert_eq!(lines[0]["text"], "hi");
    assert!(lines[0].get("data").is_none());

    assert_eq!(lines[1]["id"], "0x7e");
    assert_eq!(lines[1]["payload_hex"], "0102");
    assert_eq!(
        lines[1]["data"],
        serde_json::json!({"id": "0x7e", "payload_hex": "0102"})
    );

    assert_eq!(lines[2]["id"], "0x42");
    assert_eq!(
        lines[2]["data"],
        serde_json::json!({"value": -12, "tick_ms": 123})
    );

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(3), run)
        .await
        .expect("pipeline did not stop within the grace period")
        .unwrap();
    assert!(result.is_ok(), "clean cancellation must not be an error");
}

#[tokio::test]
async fn frames_survive_a_source_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(&encode_frame(&[0xFF, 0x41])).await.unwrap();
        drop(stream);

        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(&encode_frame(&[0xFF, 0x42])).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::new(quick_config(addr.to_string()), registry())
        .unwrap()
        .with_jsonl(writer);
    let run_cancel = cancel.clone();
    tokio::spawn(pipeline.run(run_cancel));

    let lines = read_lines(reader, 2).await;
    assert_eq!(lines[0]["text"], "A");
    assert_eq!(lines[1]["text"], "B");

    cancel.cancel();
}

#[tokio::test]
async fn invalid_config_refuses_to_start_with_exit_code_2() {
    let config = PipelineConfig {
        source_addr: String::new(),
        ..Default::default()
    };
    let err = Pipeline::new(config, registry()).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn text_id_disagreeing_with_the_registry_refuses_to_start() {
    // registry() fixes the text id at 0xFF; the config says otherwise.
    let config = PipelineConfig {
        text_packet_id: 0x10,
        ..Default::default()
    };
    let err = Pipeline::new(config, registry()).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("0x10"));
    assert!(err.to_string().contains("0xff"));
}

#[tokio::test]
async fn bridge_bind_failure_is_fatal_with_exit_code_1() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_addr = occupied.local_addr().unwrap();

    // Source address does not matter; bind fails first.
    let pipeline = Pipeline::new(quick_config("127.0.0.1:1".to_string()), registry())
        .unwrap()
        .with_bridge(
            crate::bridge::BridgeConfig {
                listen_addr: ws_addr.to_string(),
                ..Default::default()
            },
            vec![],
        );

    let err = pipeline.run(CancellationToken::new()).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn cancellation_completes_within_the_grace_period() {
    // No source listening: the pipeline sits in dial/backoff.
    let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = placeholder.local_addr().unwrap();
    drop(placeholder);

    let (writer, _reader) = tokio::io::duplex(1024);
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::new(quick_config(addr.to_string()), registry())
        .unwrap()
        .with_jsonl(writer);
    let run_cancel = cancel.clone();
    let run = tokio::spawn(pipeline.run(run_cancel));

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("pipeline did not stop within the grace period")
        .unwrap();
    assert!(result.is_ok());
}
