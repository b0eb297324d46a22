//! 主站对真实 TCP 套接字的集成测试：用进程内从站模拟响应。

use mgw_protocol::{LinkEvent, MasterConfig, ModbusMaster, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// 进程内从站行为。
enum SlaveMode {
    /// 正常响应：寄存器值 = 地址 + 偏移序号
    Echo,
    /// 收帧后不响应（触发超时）
    Silent,
    /// 返回非法数据地址异常
    Exception,
}

/// 启动进程内从站，返回监听端口。
async fn spawn_slave(mode: SlaveMode) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move {
        let (mut stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(_) => return,
        };
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

            match mode {
                SlaveMode::Silent => continue,
                SlaveMode::Exception => {
                    let response = [
                        header[0], header[1], 0, 0, 0, 3, header[6],
                        pdu[0] | 0x80, 0x02,
                    ];
                    if stream.write_all(&response).await.is_err() {
                        return;
                    }
                }
                SlaveMode::Echo => {
                    let function = pdu[0];
                    let address = u16::from_be_bytes([pdu[1], pdu[2]]);
                    let quantity = u16::from_be_bytes([pdu[3], pdu[4]]);
                    let mut response = Vec::new();
                    response.extend_from_slice(&header[0..2]);
                    response.extend_from_slice(&[0, 0]);
                    match function {
                        0x03 | 0x04 => {
                            let byte_count = quantity as usize * 2;
                            response
                                .extend_from_slice(&((byte_count as u16 + 3).to_be_bytes()));
                            response.push(header[6]);
                            response.push(function);
                            response.push(byte_count as u8);
                            for offset in 0..quantity {
                                response
                                    .extend_from_slice(&(address + offset).to_be_bytes());
                            }
                        }
                        0x06 => {
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
            }
        }
    });
    port
}

fn config(port: u16, timeout_ms: u64) -> MasterConfig {
    let mut config = MasterConfig::default_for_host("127.0.0.1");
    config.port = port;
    config.timeout_ms = timeout_ms;
    config
}

#[tokio::test]
async fn read_holding_registers_roundtrip() {
    let port = spawn_slave(SlaveMode::Echo).await;
    let master = ModbusMaster::new(config(port, 1000));
    master.connect().await.expect("connect");

    let words = master.read_holding_registers(100, 3).await.expect("read");
    assert_eq!(words, vec![100, 101, 102]);

    master.write_single_register(5, 99).await.expect("write");
    master.disconnect().await;
}

#[tokio::test]
async fn concurrent_reads_correlate_by_transaction_id() {
    let port = spawn_slave(SlaveMode::Echo).await;
    let master = ModbusMaster::new(config(port, 1000));
    master.connect().await.expect("connect");

    let a = master.read_holding_registers(10, 1);
    let b = master.read_holding_registers(20, 1);
    let c = master.read_holding_registers(30, 1);
    let (a, b, c) = tokio::join!(a, b, c);
    assert_eq!(a.expect("a"), vec![10]);
    assert_eq!(b.expect("b"), vec![20]);
    assert_eq!(c.expect("c"), vec![30]);
}

#[tokio::test]
async fn silent_slave_times_out_and_emits_event() {
    let port = spawn_slave(SlaveMode::Silent).await;
    let master = ModbusMaster::new(config(port, 200));
    let mut events = master.subscribe();
    master.connect().await.expect("connect");

    let err = master
        .read_holding_registers(0, 1)
        .await
        .expect_err("timeout");
    assert!(matches!(err, ProtocolError::Timeout(_)));
    assert_eq!(master.pending_count().await, 0);

    // Connected 之后应观察到 Timeout 事件
    let mut saw_timeout = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, LinkEvent::Timeout { .. }) {
            saw_timeout = true;
        }
    }
    assert!(saw_timeout);
}

#[tokio::test]
async fn exception_response_maps_to_error() {
    let port = spawn_slave(SlaveMode::Exception).await;
    let master = ModbusMaster::new(config(port, 1000));
    master.connect().await.expect("connect");

    let err = master
        .read_holding_registers(0, 1)
        .await
        .expect_err("exception");
    match err {
        ProtocolError::Exception { code, .. } => assert_eq!(code, 0x02),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn disconnect_cancels_pending_transactions() {
    let port = spawn_slave(SlaveMode::Silent).await;
    let master = ModbusMaster::new(config(port, 60_000));
    master.connect().await.expect("connect");

    let pending = {
        let master = master.clone();
        tokio::spawn(async move { master.read_holding_registers(0, 1).await })
    };
    // 等待请求发出后再断开
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    master.disconnect().await;

    let result = pending.await.expect("join");
    assert!(matches!(result, Err(ProtocolError::Cancelled)));
    assert_eq!(master.pending_count().await, 0);

    // 幂等断开
    master.disconnect().await;
}

#[tokio::test]
async fn connect_refused_surfaces_connection_error() {
    // 占用后立即释放端口，使连接被拒绝
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let master = ModbusMaster::new(config(port, 1000));
    let err = master.connect().await.expect_err("refused");
    assert!(matches!(
        err,
        ProtocolError::Connection(_) | ProtocolError::Timeout(_)
    ));
    assert!(!master.is_connected().await);
}
