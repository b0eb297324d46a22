//! 未完成事务表
//!
//! 以事务号为键登记在途请求，收到响应、超时扫描或断开取消时
//! 恰好完成一次。完成通过 oneshot 通道交付，发送端被消费后
//! 同一事务不可能二次完成。

use crate::error::ProtocolError;
use crate::frame::Response;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// 在途事务登记项。
struct Pending {
    issued_at: Instant,
    deadline: Instant,
    expected_function: u8,
    sink: oneshot::Sender<Result<Response, ProtocolError>>,
}

/// 在途事务表。
pub(crate) struct PendingTable {
    entries: HashMap<u16, Pending>,
    next_id: u16,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 0,
        }
    }

    /// 分配事务号并登记，返回事务号与完成接收端。
    pub(crate) fn register(
        &mut self,
        expected_function: u8,
        timeout: Duration,
    ) -> (u16, oneshot::Receiver<Result<Response, ProtocolError>>) {
        // 事务号 16 位回绕；跳过仍在途的事务号
        let mut id = self.next_id;
        while self.entries.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        self.next_id = id.wrapping_add(1);

        let (sink, completion) = oneshot::channel();
        let now = Instant::now();
        self.entries.insert(
            id,
            Pending {
                issued_at: now,
                deadline: now + timeout,
                expected_function,
                sink,
            },
        );
        (id, completion)
    }

    /// 取出事务的期望功能码（响应解码用）。
    pub(crate) fn expected_function(&self, transaction_id: u16) -> Option<u8> {
        self.entries
            .get(&transaction_id)
            .map(|pending| pending.expected_function)
    }

    /// 以响应或错误完成事务。未知事务号返回 false（来帧被丢弃）。
    pub(crate) fn complete(
        &mut self,
        transaction_id: u16,
        result: Result<Response, ProtocolError>,
    ) -> bool {
        match self.entries.remove(&transaction_id) {
            Some(pending) => {
                // 接收端可能已被放弃，忽略发送失败
                let _ = pending.sink.send(result);
                true
            }
            None => false,
        }
    }

    /// 扫描过期事务，逐个以超时错误完成，返回过期事务号。
    pub(crate) fn sweep_expired(&mut self, now: Instant) -> Vec<u16> {
        let expired: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, pending)| now >= pending.deadline)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(pending) = self.entries.remove(id) {
                let waited = now.duration_since(pending.issued_at).as_millis();
                let _ = pending.sink.send(Err(ProtocolError::Timeout(format!(
                    "transaction {id} expired after {waited}ms"
                ))));
            }
        }
        expired
    }

    /// 断开连接时取消全部在途事务。
    pub(crate) fn cancel_all(&mut self) -> usize {
        let cancelled = self.entries.len();
        for (_, pending) in self.entries.drain() {
            let _ = pending.sink.send(Err(ProtocolError::Cancelled));
        }
        cancelled
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FC_READ_HOLDING_REGISTERS;

    #[test]
    fn register_assigns_distinct_ids() {
        let mut table = PendingTable::new();
        let (id_1, _rx_1) = table.register(FC_READ_HOLDING_REGISTERS, Duration::from_secs(1));
        let (id_2, _rx_2) = table.register(FC_READ_HOLDING_REGISTERS, Duration::from_secs(1));
        assert_ne!(id_1, id_2);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn complete_resolves_exactly_once() {
        let mut table = PendingTable::new();
        let (id, completion) = table.register(FC_READ_HOLDING_REGISTERS, Duration::from_secs(1));

        assert!(table.complete(id, Ok(Response::Words(vec![1]))));
        // 二次完成：事务已不存在
        assert!(!table.complete(id, Ok(Response::Words(vec![2]))));

        let result = completion.await.expect("delivered");
        assert_eq!(result.expect("ok"), Response::Words(vec![1]));
    }

    #[tokio::test]
    async fn sweep_expires_overdue_transactions() {
        let mut table = PendingTable::new();
        let (id, completion) = table.register(FC_READ_HOLDING_REGISTERS, Duration::from_millis(0));

        let expired = table.sweep_expired(Instant::now() + Duration::from_millis(1));
        assert_eq!(expired, vec![id]);
        assert_eq!(table.len(), 0);

        // 过期后到达的响应被当作未知事务丢弃
        assert!(!table.complete(id, Ok(Response::Words(vec![1]))));

        let result = completion.await.expect("delivered");
        assert!(matches!(result, Err(ProtocolError::Timeout(_))));
    }

    #[tokio::test]
    async fn cancel_all_drains_table() {
        let mut table = PendingTable::new();
        let (_, completion_1) = table.register(FC_READ_HOLDING_REGISTERS, Duration::from_secs(1));
        let (_, completion_2) = table.register(FC_READ_HOLDING_REGISTERS, Duration::from_secs(1));

        assert_eq!(table.cancel_all(), 2);
        assert_eq!(table.len(), 0);
        assert!(matches!(
            completion_1.await.expect("delivered"),
            Err(ProtocolError::Cancelled)
        ));
        assert!(matches!(
            completion_2.await.expect("delivered"),
            Err(ProtocolError::Cancelled)
        ));
    }
}
