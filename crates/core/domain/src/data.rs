//! 采集值数据模型。

use serde::{Deserialize, Serialize};

/// 点位值的数据类型。
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
}

impl ValueData {
    /// 数值视图（Bool 映射为 0/1，String 尝试解析）。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ValueData::I64(v) => Some(*v as f64),
            ValueData::F64(v) => Some(*v),
            ValueData::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            ValueData::String(v) => v.parse::<f64>().ok(),
        }
    }

    /// 文本视图（落库用）。
    pub fn display(&self) -> String {
        match self {
            ValueData::I64(v) => v.to_string(),
            ValueData::F64(v) => v.to_string(),
            ValueData::Bool(v) => v.to_string(),
            ValueData::String(v) => v.clone(),
        }
    }
}

/// 采集质量标记。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quality {
    Good,
    Bad,
    Unknown,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Good => "GOOD",
            Quality::Bad => "BAD",
            Quality::Unknown => "UNKNOWN",
        }
    }
}

/// 未解码的原始读数。
///
/// 寄存器类功能码返回字序列，线圈类返回位序列。
/// BIT/POINT 解码后仍保留原始寄存器字，供读-改-写与派生点使用。
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Words(Vec<u16>),
    Bits(Vec<bool>),
}

impl RawValue {
    /// 首个寄存器字（位派生与读-改-写使用）。
    pub fn first_word(&self) -> Option<u16> {
        match self {
            RawValue::Words(words) => words.first().copied(),
            RawValue::Bits(_) => None,
        }
    }
}

/// 单次成功读取产生的点位值。
///
/// 生命周期：每个轮询周期生成一次，合并进编排器的最新值缓存后
/// 交给存储引擎判定是否落历史。
#[derive(Debug, Clone)]
pub struct DataValue {
    /// 点位标识（与点表中的 identifier 一致）
    pub identifier: String,
    /// 原始读数（未缩放）
    pub raw: RawValue,
    /// 工程量（已应用 scale/offset）
    pub value: ValueData,
    /// 展示文本（含单位）
    pub formatted: String,
    /// 采集质量
    pub quality: Quality,
    /// 采集时间戳（毫秒）
    pub ts_ms: i64,
    /// 本次读取耗时（毫秒）
    pub read_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_data_as_f64() {
        assert_eq!(ValueData::I64(-3).as_f64(), Some(-3.0));
        assert_eq!(ValueData::F64(2.5).as_f64(), Some(2.5));
        assert_eq!(ValueData::Bool(true).as_f64(), Some(1.0));
        assert_eq!(ValueData::String("1.25".to_string()).as_f64(), Some(1.25));
        assert_eq!(ValueData::String("x".to_string()).as_f64(), None);
    }

    #[test]
    fn value_data_display_uses_shortest_float() {
        assert_eq!(ValueData::F64(25.0).display(), "25");
        assert_eq!(ValueData::F64(20.0005).display(), "20.0005");
    }

    #[test]
    fn raw_value_first_word() {
        assert_eq!(RawValue::Words(vec![7, 8]).first_word(), Some(7));
        assert_eq!(RawValue::Bits(vec![true]).first_word(), None);
    }
}
