//! 编排器端到端测试：进程内从站 + 点表 + 批次处理器。

use async_trait::async_trait;
use domain::{
    AccessMode, DataPoint, DataValue, PointRegistry, Quality, RegisterKind, ValueData,
    ValueFormat, WriteKind,
};
use mgw_acquisition::{
    AcquisitionConfig, AcquisitionError, ConnectionState, GatewayEvent, Orchestrator,
    ValueBatchHandler,
};
use mgw_protocol::{MasterConfig, ModbusMaster};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// 进程内从站：FC03 返回寄存器值 = 地址 + 序号，FC06 记录写入并回显。
async fn spawn_slave() -> (u16, Arc<StdMutex<Vec<(u16, u16)>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let writes = Arc::new(StdMutex::new(Vec::new()));
    let writes_log = Arc::clone(&writes);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let writes_log = Arc::clone(&writes_log);
            tokio::spawn(async move {
                let mut header = [0u8; 7];
                loop {
                    if stream.read_exact(&mut header).await.is_err() {
                        return;
                    }
                    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
                    let mut pdu = vec![0u8; length - 1];
                    if stream.read_exact(&mut pdu).await.is_err() {
                        return;
                    }
                    let function = pdu[0];
                    let address = u16::from_be_bytes([pdu[1], pdu[2]]);
                    let mut response = Vec::new();
                    response.extend_from_slice(&header[0..2]);
                    response.extend_from_slice(&[0, 0]);
                    match function {
                        0x03 | 0x04 => {
                            let quantity = u16::from_be_bytes([pdu[3], pdu[4]]);
                            let byte_count = quantity as usize * 2;
                            response.extend_from_slice(&((byte_count as u16 + 3).to_be_bytes()));
                            response.push(header[6]);
                            response.push(function);
                            response.push(byte_count as u8);
                            for offset in 0..quantity {
                                response.extend_from_slice(&(address + offset).to_be_bytes());
                            }
                        }
                        0x06 => {
                            let value = u16::from_be_bytes([pdu[3], pdu[4]]);
                            if let Ok(mut log) = writes_log.lock() {
                                log.push((address, value));
                            }
                            response.extend_from_slice(&6u16.to_be_bytes());
                            response.push(header[6]);
                            response.extend_from_slice(&pdu[0..5]);
                        }
                        _ => return,
                    }
                    if stream.write_all(&response).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    (port, writes)
}

fn point(identifier: &str, address: u16, format: ValueFormat, scale: f64) -> DataPoint {
    DataPoint {
        id: identifier.to_string(),
        name: identifier.to_string(),
        identifier: identifier.to_string(),
        address,
        access: AccessMode::ReadWrite,
        read_function: RegisterKind::Holding,
        write_function: WriteKind::SingleRegister,
        format,
        bit_position: None,
        source_identifier: None,
        point_bit_position: None,
        scale,
        offset: 0.0,
        unit: String::new(),
    }
}

fn master(port: u16) -> ModbusMaster {
    let mut config = MasterConfig::default_for_host("127.0.0.1");
    config.port = port;
    config.timeout_ms = 500;
    ModbusMaster::new(config)
}

#[derive(Default)]
struct RecordingHandler {
    batches: Mutex<Vec<HashMap<String, DataValue>>>,
}

#[async_trait]
impl ValueBatchHandler for RecordingHandler {
    async fn handle(
        &self,
        _points: &[DataPoint],
        values: &HashMap<String, DataValue>,
    ) -> Result<(), AcquisitionError> {
        self.batches.lock().await.push(values.clone());
        Ok(())
    }
}

#[tokio::test]
async fn polling_decodes_and_hands_off_batches() {
    let (port, _) = spawn_slave().await;
    // 从站返回寄存器值 = 地址：253 * 0.1 = 25.3
    let registry = Arc::new(
        PointRegistry::new(vec![
            point("temp", 253, ValueFormat::Uint16, 0.1),
            point("count", 7, ValueFormat::Uint16, 1.0),
        ])
        .expect("registry"),
    );
    let handler = Arc::new(RecordingHandler::default());
    let orchestrator = Orchestrator::new(
        master(port),
        registry,
        AcquisitionConfig::default(),
        Some(handler.clone()),
    );

    orchestrator.connect().await.expect("connect");
    orchestrator.start_polling(200).await.expect("start");
    tokio::time::sleep(Duration::from_millis(500)).await;
    orchestrator.stop_polling().await;

    let batches = handler.batches.lock().await;
    assert!(!batches.is_empty());
    let values = batches.last().expect("batch");
    assert_eq!(
        values.get("temp").expect("temp").value,
        ValueData::F64(25.3)
    );
    assert_eq!(values.get("count").expect("count").value, ValueData::F64(7.0));
    drop(batches);

    let cached = orchestrator.latest_value("temp").expect("cached");
    assert_eq!(cached.quality, Quality::Good);
    assert_eq!(cached.formatted, "25.3");

    orchestrator.disconnect().await;
}

#[tokio::test]
async fn derived_point_follows_source_register() {
    let (port, _) = spawn_slave().await;
    // 来源点地址 5 → 寄存器值 0b101：bit0 = 1，bit1 = 0
    let mut derived = point("door_open", 0, ValueFormat::Point, 1.0);
    derived.source_identifier = Some("status".to_string());
    derived.point_bit_position = Some(0);
    let registry = Arc::new(
        PointRegistry::new(vec![point("status", 5, ValueFormat::Uint16, 1.0), derived])
            .expect("registry"),
    );
    let handler = Arc::new(RecordingHandler::default());
    let orchestrator = Orchestrator::new(
        master(port),
        registry,
        AcquisitionConfig::default(),
        Some(handler.clone()),
    );

    orchestrator.connect().await.expect("connect");
    orchestrator.start_polling(200).await.expect("start");
    tokio::time::sleep(Duration::from_millis(400)).await;
    orchestrator.stop_polling().await;
    orchestrator.disconnect().await;

    let batches = handler.batches.lock().await;
    let values = batches.last().expect("batch");
    assert_eq!(
        values.get("door_open").expect("derived").value,
        ValueData::Bool(true)
    );
}

#[tokio::test]
async fn write_scales_and_updates_cache() {
    let (port, writes) = spawn_slave().await;
    let registry = Arc::new(
        PointRegistry::new(vec![point("setpoint", 40, ValueFormat::Uint16, 0.1)])
            .expect("registry"),
    );
    let orchestrator = Orchestrator::new(
        master(port),
        registry,
        AcquisitionConfig::default(),
        None,
    );
    let mut events = orchestrator.subscribe();

    orchestrator.connect().await.expect("connect");
    orchestrator
        .write_point_value("setpoint", 25.3)
        .await
        .expect("write");

    // 反向变换：25.3 / 0.1 = 253
    assert_eq!(writes.lock().expect("log").as_slice(), &[(40, 253)]);
    let cached = orchestrator.latest_value("setpoint").expect("cached");
    assert_eq!(cached.value, ValueData::F64(25.3));

    let mut saw_write_completed = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, GatewayEvent::WriteCompleted { ref identifier } if identifier == "setpoint")
        {
            saw_write_completed = true;
        }
    }
    assert!(saw_write_completed);
    orchestrator.disconnect().await;
}

#[tokio::test]
async fn bit_write_only_touches_target_bit() {
    let (port, writes) = spawn_slave().await;
    let mut bit_point = point("alarm_enable", 7, ValueFormat::Bit, 1.0);
    bit_point.bit_position = Some(3);
    let registry = Arc::new(PointRegistry::new(vec![bit_point]).expect("registry"));
    let orchestrator = Orchestrator::new(
        master(port),
        registry,
        AcquisitionConfig::default(),
        None,
    );

    orchestrator.connect().await.expect("connect");
    orchestrator
        .write_point_value("alarm_enable", 1.0)
        .await
        .expect("write");
    orchestrator.disconnect().await;

    // 读回当前寄存器 7（值 0b111），仅置位 bit3 → 0b1111
    assert_eq!(writes.lock().expect("log").as_slice(), &[(7, 0b1111)]);
}

#[tokio::test]
async fn write_rejects_read_only_point() {
    let (port, _) = spawn_slave().await;
    let mut read_only = point("ro", 1, ValueFormat::Uint16, 1.0);
    read_only.access = AccessMode::Read;
    let registry = Arc::new(PointRegistry::new(vec![read_only]).expect("registry"));
    let orchestrator = Orchestrator::new(
        master(port),
        registry,
        AcquisitionConfig::default(),
        None,
    );
    orchestrator.connect().await.expect("connect");

    let err = orchestrator
        .write_point_value("ro", 1.0)
        .await
        .expect_err("read only");
    assert!(matches!(err, AcquisitionError::Validation(_)));

    let err = orchestrator
        .write_point_value("missing", 1.0)
        .await
        .expect_err("unknown point");
    assert!(matches!(err, AcquisitionError::Validation(_)));
    orchestrator.disconnect().await;
}

#[tokio::test]
async fn reconnect_stops_after_max_attempts() {
    // 绑定后立即释放端口，连接将被拒绝
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let registry = Arc::new(
        PointRegistry::new(vec![point("p1", 0, ValueFormat::Uint16, 1.0)]).expect("registry"),
    );
    let config = AcquisitionConfig {
        max_reconnect_attempts: 2,
        reconnect_base_delay_ms: 10,
        ..AcquisitionConfig::default()
    };
    let orchestrator = Orchestrator::new(master(port), registry, config, None);
    let mut events = orchestrator.subscribe();

    let _ = orchestrator.connect().await;

    // 等待重连流程收敛到终态
    let mut reconnecting = 0;
    let mut failed_attempts = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while failed_attempts.is_none() && tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
            Ok(Ok(GatewayEvent::Reconnecting { .. })) => reconnecting += 1,
            Ok(Ok(GatewayEvent::ReconnectFailed { attempts })) => {
                failed_attempts = Some(attempts);
            }
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => break,
        }
    }

    assert_eq!(reconnecting, 2);
    assert_eq!(failed_attempts, Some(2));
    assert_eq!(
        orchestrator.connection_state(),
        ConnectionState::Disconnected
    );

    // 终态后不再有定时器触发新的重连
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(
        events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}
