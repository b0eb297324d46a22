//! # MGW Storage 模块
//!
//! 本模块提供变化感知的双槽存储：只追加的历史表 + 原地更新的
//! 最新值快照表。
//!
//! ## 架构设计
//!
//! 该模块采用分层架构，遵循以下原则：
//!
//! 1. **接口抽象层** (`traits.rs`)：落库（ValueSink）与查询（ValueQuery）的异步 Trait 接口
//! 2. **数据模型层** (`models.rs`)：历史行、快照行、缓存项、统计结构
//! 3. **错误处理层** (`error.rs`)：统一的存储错误类型
//! 4. **引擎层** (`recorder.rs`)：变化检测落库引擎（容差判定、强制快照、统计）
//! 5. **连接管理层** (`connection.rs`)：数据库连接池管理
//! 6. **实现层**：
//!    - `in_memory`：内存存储实现（用于测试和演示）
//!    - `postgres`：PostgreSQL 存储实现（生产环境使用）
//!    - `redis`：Redis 快照镜像（落库成功后的尽力而为镜像）
//!
//! ## 核心特性
//!
//! - **变化检测**：组合容差（绝对 0.001 或相对 0.001）判定值相等，
//!   仅在实质变化时追加历史行
//! - **强制快照**：值未变但距上次落历史超过强制间隔（默认 1 小时）
//!   仍插入一行，保证数据连续性
//! - **批次原子性**：一次落库调用一个事务，部分失败整体回滚，
//!   引擎缓存保持最后已知良好状态
//! - **快照不变式**：每个点位在快照表中恰好一行（幂等 upsert）
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use mgw_storage::{InMemoryValueStore, ValueRecorder};
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryValueStore::new());
//! let recorder = ValueRecorder::new(store.clone());
//! let report = recorder.store_latest_values(&points, &values).await?;
//! println!("changed: {}", report.changed);
//! ```
//!
//! ## 测试覆盖
//!
//! - 单元测试：Redis 键编码、统计速率
//! - 集成测试：容差判定、强制快照、落库失败后的缓存语义、
//!   快照唯一性、历史时间窗查询

// 模块导出：将子模块的内容导出到 crate 根目录
pub mod connection;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod recorder;
pub mod redis;
pub mod traits;

// 导出常用类型到 crate 根目录，方便外部引用
pub use connection::*;
pub use error::*;
pub use in_memory::InMemoryValueStore;
pub use models::*;
pub use postgres::PgValueStore;
pub use recorder::ValueRecorder;
pub use redis::RedisLatestStore;
pub use traits::*;
