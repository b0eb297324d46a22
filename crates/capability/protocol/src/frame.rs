//! Modbus TCP 帧编解码
//!
//! ADU = MBAP 头（事务号 2 + 协议号 2 + 长度 2 + 单元号 1）+ PDU（功能码 + 载荷）。
//! 长度字段计数为单元号 + PDU 字节数。响应仅凭事务号与请求关联。

use crate::error::ProtocolError;

/// MBAP 头长度（事务号 2 + 协议号 2 + 长度 2 + 单元号 1）
pub const MBAP_HEADER_LEN: usize = 7;

/// Modbus TCP 协议号恒为 0
pub const PROTOCOL_ID: u16 = 0;

/// PDU 最大字节数（继承自 RS485 ADU 256 字节限制）
pub const MAX_PDU_SIZE: usize = 253;

/// FC03/FC04 单次可读寄存器上限：(253 - 2) / 2 = 125
pub const MAX_READ_REGISTERS: u16 = 125;

/// FC16 单次可写寄存器上限：(253 - 6) / 2 = 123
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// FC01/FC02 单次可读位数量上限
pub const MAX_READ_BITS: u16 = 2000;

/// 读线圈 (FC01)
pub const FC_READ_COILS: u8 = 0x01;
/// 读离散输入 (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
/// 读保持寄存器 (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
/// 读输入寄存器 (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
/// 写单寄存器 (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
/// 写多寄存器 (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// 异常响应的功能码高位标记
pub const EXCEPTION_FLAG: u8 = 0x80;

/// 异常码名称（日志用）。
pub fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "server device failure",
        0x05 => "acknowledge",
        0x06 => "server device busy",
        0x08 => "memory parity error",
        0x0a => "gateway path unavailable",
        0x0b => "gateway target failed to respond",
        _ => "unknown exception",
    }
}

/// 主站请求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// FC01/FC02：按位读取
    ReadBits {
        function: u8,
        address: u16,
        quantity: u16,
    },
    /// FC03/FC04：按寄存器读取
    ReadWords {
        function: u8,
        address: u16,
        quantity: u16,
    },
    /// FC06：写单寄存器
    WriteSingle { address: u16, value: u16 },
    /// FC16：写多寄存器
    WriteMultiple { address: u16, values: Vec<u16> },
}

impl Request {
    /// 请求的功能码。
    pub fn function(&self) -> u8 {
        match self {
            Request::ReadBits { function, .. } => *function,
            Request::ReadWords { function, .. } => *function,
            Request::WriteSingle { .. } => FC_WRITE_SINGLE_REGISTER,
            Request::WriteMultiple { .. } => FC_WRITE_MULTIPLE_REGISTERS,
        }
    }

    /// 校验数量限制与功能码归属。
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Request::ReadBits {
                function, quantity, ..
            } => {
                if !matches!(*function, FC_READ_COILS | FC_READ_DISCRETE_INPUTS) {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "function 0x{function:02x} is not a bit read"
                    )));
                }
                if *quantity == 0 || *quantity > MAX_READ_BITS {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "bit quantity {quantity} out of range 1..={MAX_READ_BITS}"
                    )));
                }
            }
            Request::ReadWords {
                function, quantity, ..
            } => {
                if !matches!(
                    *function,
                    FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS
                ) {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "function 0x{function:02x} is not a register read"
                    )));
                }
                if *quantity == 0 || *quantity > MAX_READ_REGISTERS {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "register quantity {quantity} out of range 1..={MAX_READ_REGISTERS}"
                    )));
                }
            }
            Request::WriteSingle { .. } => {}
            Request::WriteMultiple { values, .. } => {
                if values.is_empty() || values.len() > MAX_WRITE_REGISTERS as usize {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "write quantity {} out of range 1..={MAX_WRITE_REGISTERS}",
                        values.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// 编码为完整 ADU（MBAP + PDU）。
    pub fn encode(&self, transaction_id: u16, unit_id: u8) -> Vec<u8> {
        let pdu = self.encode_pdu();
        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
        frame.extend_from_slice(&((pdu.len() as u16 + 1).to_be_bytes()));
        frame.push(unit_id);
        frame.extend_from_slice(&pdu);
        frame
    }

    fn encode_pdu(&self) -> Vec<u8> {
        match self {
            Request::ReadBits {
                function,
                address,
                quantity,
            }
            | Request::ReadWords {
                function,
                address,
                quantity,
            } => {
                let mut pdu = Vec::with_capacity(5);
                pdu.push(*function);
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&quantity.to_be_bytes());
                pdu
            }
            Request::WriteSingle { address, value } => {
                let mut pdu = Vec::with_capacity(5);
                pdu.push(FC_WRITE_SINGLE_REGISTER);
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&value.to_be_bytes());
                pdu
            }
            Request::WriteMultiple { address, values } => {
                let byte_count = values.len() * 2;
                let mut pdu = Vec::with_capacity(6 + byte_count);
                pdu.push(FC_WRITE_MULTIPLE_REGISTERS);
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
                pdu.push(byte_count as u8);
                for value in values {
                    pdu.extend_from_slice(&value.to_be_bytes());
                }
                pdu
            }
        }
    }
}

/// 从站响应（已按功能码解码）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// FC01/FC02 的位序列
    Bits(Vec<bool>),
    /// FC03/FC04 的寄存器序列
    Words(Vec<u16>),
    /// FC06/FC16 的回显确认
    WriteAck { address: u16, value: u16 },
}

impl Response {
    /// 寄存器视图（写确认与位响应返回错误）。
    pub fn into_words(self) -> Result<Vec<u16>, ProtocolError> {
        match self {
            Response::Words(words) => Ok(words),
            other => Err(ProtocolError::Frame(format!(
                "expected register response, got {other:?}"
            ))),
        }
    }

    /// 位视图。
    pub fn into_bits(self) -> Result<Vec<bool>, ProtocolError> {
        match self {
            Response::Bits(bits) => Ok(bits),
            other => Err(ProtocolError::Frame(format!(
                "expected bit response, got {other:?}"
            ))),
        }
    }
}

/// MBAP 头。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// 单元号 + PDU 的字节数
    pub length: u16,
    pub unit_id: u8,
}

/// 解码 MBAP 头。
pub fn decode_header(buf: &[u8; MBAP_HEADER_LEN]) -> FrameHeader {
    FrameHeader {
        transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
        protocol_id: u16::from_be_bytes([buf[2], buf[3]]),
        length: u16::from_be_bytes([buf[4], buf[5]]),
        unit_id: buf[6],
    }
}

/// 校验 MBAP 头的协议号与长度字段。
pub fn validate_header(header: &FrameHeader) -> Result<(), ProtocolError> {
    if header.protocol_id != PROTOCOL_ID {
        return Err(ProtocolError::Frame(format!(
            "unexpected protocol id {}",
            header.protocol_id
        )));
    }
    let length = header.length as usize;
    if length < 2 || length > MAX_PDU_SIZE + 1 {
        return Err(ProtocolError::Frame(format!(
            "mbap length {length} out of range"
        )));
    }
    Ok(())
}

/// 按发出的功能码解码响应 PDU。
///
/// 异常帧（功能码 | 0x80）解码为 [`ProtocolError::Exception`]。
pub fn decode_response(expected_function: u8, pdu: &[u8]) -> Result<Response, ProtocolError> {
    let function = *pdu
        .first()
        .ok_or_else(|| ProtocolError::Frame("empty pdu".to_string()))?;

    if function == expected_function | EXCEPTION_FLAG {
        let code = pdu.get(1).copied().unwrap_or(0);
        return Err(ProtocolError::Exception {
            function: expected_function,
            code,
        });
    }

    if function != expected_function {
        return Err(ProtocolError::Frame(format!(
            "function mismatch: sent 0x{expected_function:02x}, got 0x{function:02x}"
        )));
    }

    match function {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS => {
            let byte_count = *pdu
                .get(1)
                .ok_or_else(|| ProtocolError::Frame("missing byte count".to_string()))?
                as usize;
            let data = &pdu[2..];
            if data.len() != byte_count {
                return Err(ProtocolError::Frame(format!(
                    "bit payload length {} != byte count {byte_count}",
                    data.len()
                )));
            }
            let mut bits = Vec::with_capacity(byte_count * 8);
            for byte in data {
                for bit in 0..8 {
                    bits.push(byte & (1 << bit) != 0);
                }
            }
            Ok(Response::Bits(bits))
        }
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
            let byte_count = *pdu
                .get(1)
                .ok_or_else(|| ProtocolError::Frame("missing byte count".to_string()))?
                as usize;
            let data = &pdu[2..];
            if data.len() != byte_count || byte_count % 2 != 0 {
                return Err(ProtocolError::Frame(format!(
                    "register payload length {} != byte count {byte_count}",
                    data.len()
                )));
            }
            let words = data
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            Ok(Response::Words(words))
        }
        FC_WRITE_SINGLE_REGISTER | FC_WRITE_MULTIPLE_REGISTERS => {
            if pdu.len() < 5 {
                return Err(ProtocolError::Frame(format!(
                    "write ack too short: {} bytes",
                    pdu.len()
                )));
            }
            Ok(Response::WriteAck {
                address: u16::from_be_bytes([pdu[1], pdu[2]]),
                value: u16::from_be_bytes([pdu[3], pdu[4]]),
            })
        }
        other => Err(ProtocolError::Frame(format!(
            "unsupported function 0x{other:02x}"
        ))),
    }
}
