//! 原始读数解码与写入值编码
//!
//! 解码：寄存器字/线圈位 → 工程量（`value * scale + offset`）。
//! 编码：工程量 → 寄存器字（反向变换后按格式范围校验）。
//! 多字格式均为大端字序（高字在前）。

use crate::error::AcquisitionError;
use domain::{DataPoint, RawValue, ValueData, ValueFormat};
use mgw_protocol::register_bit;

/// 按点位格式解码原始读数。
pub fn decode_value(point: &DataPoint, raw: &RawValue) -> Result<ValueData, AcquisitionError> {
    match raw {
        // 线圈/离散输入：布尔直通
        RawValue::Bits(bits) => {
            let bit = bits
                .first()
                .ok_or_else(|| AcquisitionError::Decode("empty bit response".to_string()))?;
            Ok(ValueData::Bool(*bit))
        }
        RawValue::Words(words) => decode_words(point, words),
    }
}

fn decode_words(point: &DataPoint, words: &[u16]) -> Result<ValueData, AcquisitionError> {
    if words.is_empty() {
        return Err(AcquisitionError::Decode("empty registers".to_string()));
    }

    let value = match point.format {
        ValueFormat::Uint16 => words[0] as f64,
        ValueFormat::Int16 => words[0] as i16 as f64,
        ValueFormat::Uint32 => {
            let [high, low] = word_pair(point, words)?;
            (((high as u32) << 16) | low as u32) as f64
        }
        ValueFormat::Int32 => {
            let [high, low] = word_pair(point, words)?;
            (((high as u32) << 16) | low as u32) as i32 as f64
        }
        ValueFormat::Float32 => {
            let [high, low] = word_pair(point, words)?;
            let bits = ((high as u32) << 16) | low as u32;
            f32::from_bits(bits) as f64
        }
        ValueFormat::Bit => {
            let bit = point.bit_position.unwrap_or(0);
            return Ok(ValueData::Bool(register_bit(words[0], bit)));
        }
        ValueFormat::Point => {
            let bit = point.point_bit_position.unwrap_or(0);
            return Ok(ValueData::Bool(register_bit(words[0], bit)));
        }
    };

    Ok(ValueData::F64(value * point.scale + point.offset))
}

fn word_pair(point: &DataPoint, words: &[u16]) -> Result<[u16; 2], AcquisitionError> {
    if words.len() < 2 {
        return Err(AcquisitionError::Decode(format!(
            "point {} needs 2 registers, got {}",
            point.identifier,
            words.len()
        )));
    }
    Ok([words[0], words[1]])
}

/// 将 FLOAT32 工程量编码为大端字序的寄存器对。
pub fn encode_float32(value: f64) -> [u16; 2] {
    let bits = (value as f32).to_bits();
    [(bits >> 16) as u16, bits as u16]
}

/// 展示文本：最短浮点表示，带单位后缀。
pub fn format_value(point: &DataPoint, value: &ValueData) -> String {
    let text = value.display();
    if point.unit.is_empty() {
        text
    } else {
        format!("{} {}", text, point.unit)
    }
}

/// 写入值编码：反向变换（`raw = (value - offset) / scale`）后按格式
/// 范围校验并编码为寄存器字。越界属校验错误，同步拒绝。
pub fn encode_write(point: &DataPoint, value: f64) -> Result<Vec<u16>, AcquisitionError> {
    let scale = if point.scale == 0.0 { 1.0 } else { point.scale };
    let raw = (value - point.offset) / scale;

    match point.format {
        ValueFormat::Uint16 => {
            ensure_range(point, raw, 0.0, u16::MAX as f64)?;
            Ok(vec![raw.round() as u16])
        }
        ValueFormat::Int16 => {
            ensure_range(point, raw, -(i16::MAX as f64), i16::MAX as f64)?;
            Ok(vec![raw.round() as i16 as u16])
        }
        ValueFormat::Uint32 => {
            ensure_range(point, raw, 0.0, u32::MAX as f64)?;
            let encoded = raw.round() as u32;
            Ok(vec![(encoded >> 16) as u16, encoded as u16])
        }
        ValueFormat::Int32 => {
            ensure_range(point, raw, i32::MIN as f64, i32::MAX as f64)?;
            let encoded = raw.round() as i32 as u32;
            Ok(vec![(encoded >> 16) as u16, encoded as u16])
        }
        ValueFormat::Float32 => Ok(encode_float32(raw).to_vec()),
        ValueFormat::Bit => Err(AcquisitionError::Validation(
            "bit points are written via read-modify-write".to_string(),
        )),
        ValueFormat::Point => Err(AcquisitionError::Validation(format!(
            "point {} is derived and not writable",
            point.identifier
        ))),
    }
}

fn ensure_range(
    point: &DataPoint,
    raw: f64,
    min: f64,
    max: f64,
) -> Result<(), AcquisitionError> {
    if !raw.is_finite() || raw < min || raw > max {
        return Err(AcquisitionError::Validation(format!(
            "value {raw} for point {} out of range {min}..={max}",
            point.identifier
        )));
    }
    Ok(())
}
