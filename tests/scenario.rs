// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! End-to-end runs of the engine over the dry-run transport

use std::sync::Arc;
use std::time::{Duration, Instant};

use meshsense::core::EventPayload;
use meshsense::store::RecordSource;
use meshsense::{Config, DryRunTransport, Engine, InboundMessage, ReaderTable, SensorDefinition};
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::sync::{broadcast, mpsc};

fn sensor(name: &str, sensor_type: &str, params: Value) -> SensorDefinition {
    SensorDefinition {
        name: name.to_string(),
        sensor_type: sensor_type.to_string(),
        enabled: true,
        params: params.as_object().cloned().unwrap_or_default(),
    }
}

fn config(dir: &std::path::Path, sensors: Vec<SensorDefinition>) -> Config {
    let mut config = Config::default();
    config.settings.broadcast_interval = 5;
    config.settings.log_file = dir.join("sensor_log.json");
    config.settings.node_num = 0x1234abcd;
    config.settings.min_send_interval = 0.01;
    config.sensors = sensors;
    config
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_single_static_sensor_tick() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path(), vec![sensor("label", "static_value", json!({"value": "X"}))]);
    let mut engine = Engine::new(cfg, ReaderTable::builtin(), None).unwrap();
    let log = engine.log();

    let transport = Arc::new(DryRunTransport::new());
    let (_inbound_tx, inbound_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(1);

    let run = {
        let transport = Arc::clone(&transport);
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            engine.run(transport, inbound_rx, shutdown_tx).await.unwrap();
            engine
        })
    };

    wait_for(|| !transport.sent().is_empty()).await;
    shutdown_tx.send(()).unwrap();
    let engine = run.await.unwrap();

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(Value::Object(sent[0].data.clone()), json!({"label": "X"}));
    assert_eq!(sent[0].source_node_num, 0x1234abcd);

    let records = log.load_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, RecordSource::Local);
    assert_eq!(records[0].origin, "!1234abcd");
    assert_eq!(records[0].payload["data"], json!({"label": "X"}));

    assert_eq!(engine.state().await.ticks, 1);
}

#[tokio::test]
async fn test_inbound_messages_logged_while_running() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path(), vec![]);
    let mut engine = Engine::new(cfg, ReaderTable::builtin(), None).unwrap();
    let log = engine.log();
    let mut events = engine.event_bus().subscribe();

    let transport = Arc::new(DryRunTransport::new());
    let (inbound_tx, inbound_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(1);

    let run = {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move { engine.run(transport, inbound_rx, shutdown_tx).await })
    };

    inbound_tx
        .send(InboundMessage::new("!cafef00d", br#"{"data": {"humidity": 41.2}}"#.to_vec()))
        .await
        .unwrap();
    inbound_tx
        .send(InboundMessage::new("!cafef00d", b"\x00\x01garbage".to_vec()))
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut remote_logged = false;
    while !remote_logged && Instant::now() < deadline {
        if let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
            remote_logged = matches!(event.payload, EventPayload::RemoteLogged { .. });
        }
    }
    assert!(remote_logged);

    shutdown_tx.send(()).unwrap();
    run.await.unwrap().unwrap();

    let remote: Vec<_> = log
        .load_all()
        .unwrap()
        .into_iter()
        .filter(|r| r.source == RecordSource::Remote)
        .collect();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].origin, "!cafef00d");
    assert_eq!(remote[0].payload["data"]["humidity"], json!(41.2));
}

#[tokio::test]
async fn test_corrupt_log_recovered_on_startup_tick() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path(), vec![sensor("label", "static_value", json!({"value": "X"}))]);
    std::fs::write(&cfg.settings.log_file, "[{\"source\": \"local\", \"orig").unwrap();

    let engine = Engine::new(cfg, ReaderTable::builtin(), None).unwrap();
    let log = engine.log();
    let scheduler = engine.scheduler();
    let mut events = engine.event_bus().subscribe();

    let report = scheduler.tick().await;
    assert!(report.logged);
    assert_eq!(log.load_all().unwrap().len(), 1);

    let event = events.recv().await.unwrap();
    match event.payload {
        EventPayload::LogRepaired { archived_to, .. } => {
            let archive = archived_to.unwrap();
            assert!(archive.exists());
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_shutdown_mid_tick_keeps_local_record() {
    let dir = tempdir().unwrap();
    let cfg = config(
        dir.path(),
        vec![sensor(
            "slow",
            "custom_script",
            json!({"script_path": "/bin/sh", "args": ["-c", "sleep 0.5; echo done"], "timeout": 5}),
        )],
    );
    let mut engine = Engine::new(cfg, ReaderTable::builtin(), None).unwrap();
    let log = engine.log();
    let scheduler = engine.scheduler();

    let (_inbound_tx, inbound_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(1);
    let tasks = engine
        .start(Arc::new(DryRunTransport::new()), inbound_rx, &shutdown_tx)
        .await;

    // The first tick is now blocked on the script.
    wait_for(|| scheduler.ticks() == 1).await;
    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), engine.join(tasks))
        .await
        .unwrap()
        .unwrap();

    let records = log.load_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload["data"], json!({"slow": "done"}));

    let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(log.path()).unwrap()).unwrap();
    assert!(on_disk.is_array());
}
