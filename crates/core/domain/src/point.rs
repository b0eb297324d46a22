//! 数据点与点表（数据点注册表）。
//!
//! 点表由外部配置提供（JSON 文件），网关只读不写。
//! 加载后经 [`PointRegistry::new`] 校验点位不变式。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 点位访问模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn readable(&self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    pub fn writable(&self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

impl Default for AccessMode {
    fn default() -> Self {
        Self::Read
    }
}

/// 读取使用的寄存器区域。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    /// 保持寄存器 (FC03)
    Holding,
    /// 输入寄存器 (FC04)
    Input,
    /// 线圈 (FC01)
    Coil,
    /// 离散输入 (FC02)
    DiscreteInput,
}

impl Default for RegisterKind {
    fn default() -> Self {
        Self::Holding
    }
}

/// 写入使用的功能码。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    /// 写单寄存器 (FC06)
    SingleRegister,
    /// 写多寄存器 (FC16)
    MultipleRegisters,
}

impl Default for WriteKind {
    fn default() -> Self {
        Self::SingleRegister
    }
}

/// 点位值格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    /// 16位无符号整数
    Uint16,
    /// 16位有符号整数
    Int16,
    /// 32位无符号整数（2个寄存器，大端字序）
    Uint32,
    /// 32位有符号整数（2个寄存器，大端字序）
    Int32,
    /// 32位浮点数（2个寄存器，大端字序）
    Float32,
    /// 寄存器内单个位
    Bit,
    /// 派生位：从另一点位的寄存器字中取位，不直接上总线
    Point,
}

impl ValueFormat {
    /// 该格式占用的寄存器数量。
    pub fn register_count(&self) -> u16 {
        match self {
            ValueFormat::Uint32 | ValueFormat::Int32 | ValueFormat::Float32 => 2,
            _ => 1,
        }
    }

    /// 落库 data_type 列使用的名称。
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueFormat::Uint16 => "uint16",
            ValueFormat::Int16 => "int16",
            ValueFormat::Uint32 => "uint32",
            ValueFormat::Int32 => "int32",
            ValueFormat::Float32 => "float32",
            ValueFormat::Bit => "bit",
            ValueFormat::Point => "point",
        }
    }
}

impl Default for ValueFormat {
    fn default() -> Self {
        Self::Uint16
    }
}

fn default_scale() -> f64 {
    1.0
}

/// 数据点定义（点表中的一行）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    /// 点位主键
    pub id: String,
    /// 展示名称
    pub name: String,
    /// 采集标识（缓存与落库的键）
    pub identifier: String,
    /// 寄存器/线圈起始地址
    #[serde(default)]
    pub address: u16,
    /// 访问模式
    #[serde(default)]
    pub access: AccessMode,
    /// 读取区域
    #[serde(default)]
    pub read_function: RegisterKind,
    /// 写入功能码
    #[serde(default)]
    pub write_function: WriteKind,
    /// 值格式
    #[serde(default)]
    pub format: ValueFormat,
    /// BIT 格式的位号（0-15）
    #[serde(default)]
    pub bit_position: Option<u8>,
    /// POINT 格式的来源点位标识
    #[serde(default)]
    pub source_identifier: Option<String>,
    /// POINT 格式从来源寄存器字中取的位号（0-15）
    #[serde(default)]
    pub point_bit_position: Option<u8>,
    /// 缩放系数
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// 偏移量
    #[serde(default)]
    pub offset: f64,
    /// 工程单位
    #[serde(default)]
    pub unit: String,
}

impl DataPoint {
    /// 实际写入的功能码：多字格式强制走写多寄存器。
    pub fn effective_write_kind(&self) -> WriteKind {
        if self.format.register_count() > 1 {
            WriteKind::MultipleRegisters
        } else {
            self.write_function
        }
    }
}

/// 点表校验错误。
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),
    #[error("point {0}: bit format requires bit_position in 0..=15")]
    InvalidBitPosition(String),
    #[error("point {0}: point format requires source_identifier")]
    MissingSource(String),
    #[error("point {0}: source {1} not found")]
    UnknownSource(String, String),
    #[error("point {0}: source {1} must be uint16 or int16")]
    InvalidSourceFormat(String, String),
    #[error("point {0}: point format requires point_bit_position in 0..=15")]
    InvalidPointBitPosition(String),
}

/// 数据点注册表：校验后的只读点表。
#[derive(Debug, Clone)]
pub struct PointRegistry {
    points: Vec<DataPoint>,
    by_identifier: HashMap<String, usize>,
}

impl PointRegistry {
    /// 校验并建立索引。
    pub fn new(points: Vec<DataPoint>) -> Result<Self, RegistryError> {
        let mut by_identifier = HashMap::with_capacity(points.len());
        for (index, point) in points.iter().enumerate() {
            if by_identifier
                .insert(point.identifier.clone(), index)
                .is_some()
            {
                return Err(RegistryError::DuplicateIdentifier(point.identifier.clone()));
            }
        }

        for point in &points {
            match point.format {
                ValueFormat::Bit => match point.bit_position {
                    Some(bit) if bit <= 15 => {}
                    _ => return Err(RegistryError::InvalidBitPosition(point.identifier.clone())),
                },
                ValueFormat::Point => {
                    let source_id = point
                        .source_identifier
                        .as_deref()
                        .ok_or_else(|| RegistryError::MissingSource(point.identifier.clone()))?;
                    let source_index = by_identifier.get(source_id).ok_or_else(|| {
                        RegistryError::UnknownSource(
                            point.identifier.clone(),
                            source_id.to_string(),
                        )
                    })?;
                    let source = &points[*source_index];
                    if !matches!(source.format, ValueFormat::Uint16 | ValueFormat::Int16) {
                        return Err(RegistryError::InvalidSourceFormat(
                            point.identifier.clone(),
                            source_id.to_string(),
                        ));
                    }
                    match point.point_bit_position {
                        Some(bit) if bit <= 15 => {}
                        _ => {
                            return Err(RegistryError::InvalidPointBitPosition(
                                point.identifier.clone(),
                            ));
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            points,
            by_identifier,
        })
    }

    /// 全部点位。
    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    /// 按采集标识查找。
    pub fn find(&self, identifier: &str) -> Option<&DataPoint> {
        self.by_identifier
            .get(identifier)
            .map(|index| &self.points[*index])
    }

    /// 可读点位（含派生点）。
    pub fn readable(&self) -> Vec<&DataPoint> {
        self.points
            .iter()
            .filter(|point| point.access.readable())
            .collect()
    }

    /// 需要上总线轮询的点位（派生点除外）。
    pub fn pollable(&self) -> Vec<&DataPoint> {
        self.points
            .iter()
            .filter(|point| point.access.readable() && point.format != ValueFormat::Point)
            .collect()
    }

    /// 依赖指定来源点位的派生点。
    pub fn derived_from(&self, identifier: &str) -> Vec<&DataPoint> {
        self.points
            .iter()
            .filter(|point| {
                point.format == ValueFormat::Point
                    && point.source_identifier.as_deref() == Some(identifier)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_point(identifier: &str, format: ValueFormat) -> DataPoint {
        DataPoint {
            id: identifier.to_string(),
            name: identifier.to_string(),
            identifier: identifier.to_string(),
            address: 0,
            access: AccessMode::Read,
            read_function: RegisterKind::Holding,
            write_function: WriteKind::SingleRegister,
            format,
            bit_position: None,
            source_identifier: None,
            point_bit_position: None,
            scale: 1.0,
            offset: 0.0,
            unit: String::new(),
        }
    }

    #[test]
    fn registry_rejects_duplicate_identifier() {
        let err = PointRegistry::new(vec![
            plain_point("p1", ValueFormat::Uint16),
            plain_point("p1", ValueFormat::Uint16),
        ])
        .expect_err("duplicate");
        assert_eq!(err, RegistryError::DuplicateIdentifier("p1".to_string()));
    }

    #[test]
    fn registry_requires_bit_position_for_bit_format() {
        let mut point = plain_point("b1", ValueFormat::Bit);
        point.bit_position = Some(16);
        let err = PointRegistry::new(vec![point]).expect_err("bit position");
        assert_eq!(err, RegistryError::InvalidBitPosition("b1".to_string()));
    }

    #[test]
    fn registry_validates_point_source() {
        let mut derived = plain_point("d1", ValueFormat::Point);
        derived.source_identifier = Some("s1".to_string());
        derived.point_bit_position = Some(3);

        let err = PointRegistry::new(vec![derived.clone()]).expect_err("unknown source");
        assert_eq!(
            err,
            RegistryError::UnknownSource("d1".to_string(), "s1".to_string())
        );

        let registry =
            PointRegistry::new(vec![plain_point("s1", ValueFormat::Uint16), derived.clone()])
                .expect("valid");
        assert_eq!(registry.derived_from("s1").len(), 1);
        assert_eq!(registry.pollable().len(), 1);

        let err = PointRegistry::new(vec![plain_point("s1", ValueFormat::Float32), derived])
            .expect_err("bad source format");
        assert_eq!(
            err,
            RegistryError::InvalidSourceFormat("d1".to_string(), "s1".to_string())
        );
    }

    #[test]
    fn data_point_parses_from_json_with_defaults() {
        let json = r#"{
            "id": "dp-1",
            "name": "机组温度",
            "identifier": "temp_1",
            "address": 253,
            "access": "read_write",
            "read_function": "input",
            "format": "float32",
            "scale": 0.1,
            "unit": "℃"
        }"#;
        let point: DataPoint = serde_json::from_str(json).expect("parse");
        assert_eq!(point.identifier, "temp_1");
        assert_eq!(point.address, 253);
        assert_eq!(point.access, AccessMode::ReadWrite);
        assert_eq!(point.read_function, RegisterKind::Input);
        assert_eq!(point.format, ValueFormat::Float32);
        assert_eq!(point.scale, 0.1);
        assert_eq!(point.offset, 0.0);
        assert_eq!(point.write_function, WriteKind::SingleRegister);
        assert!(point.bit_position.is_none());
    }

    #[test]
    fn multi_word_formats_write_multiple_registers() {
        let mut point = plain_point("f1", ValueFormat::Float32);
        point.write_function = WriteKind::SingleRegister;
        assert_eq!(point.effective_write_kind(), WriteKind::MultipleRegisters);
        assert_eq!(
            plain_point("u1", ValueFormat::Uint16).effective_write_kind(),
            WriteKind::SingleRegister
        );
    }
}
