//! Modbus RTU frame construction and parsing
//!
//! Request:   `SS FF AH AL QH QL CRCL CRCH`
//! Response:  `SS FF BC D0H D0L ... CRCL CRCH`
//! Exception: `SS FF|0x80 EC CRCL CRCH`

use errors::{protocol_error, SimResult};
use serde::{Deserialize, Serialize};

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const EXCEPTION_FLAG: u8 = 0x80;
/// Largest register count a single read may ask for
pub const MAX_READ_QUANTITY: u16 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    GatewayTargetFailedToRespond = 0x0B,
}

impl ExceptionCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::ServerDeviceFailure),
            0x0B => Some(ExceptionCode::GatewayTargetFailedToRespond),
            _ => None,
        }
    }

    /// Short name recorded in the log's `error` field
    pub fn as_str(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "illegal_function",
            ExceptionCode::IllegalDataAddress => "illegal_data_address",
            ExceptionCode::IllegalDataValue => "illegal_data_value",
            ExceptionCode::ServerDeviceFailure => "server_device_failure",
            ExceptionCode::GatewayTargetFailedToRespond => "gateway_target_failed",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal function",
            ExceptionCode::IllegalDataAddress => "Illegal data address",
            ExceptionCode::IllegalDataValue => "Illegal data value",
            ExceptionCode::ServerDeviceFailure => "Server device failure",
            ExceptionCode::GatewayTargetFailedToRespond => "Gateway target device failed to respond",
        }
    }
}

/// CRC-16/MODBUS (init 0xFFFF, reflected poly 0xA001)
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC, low byte first
pub fn append_crc(mut body: Vec<u8>) -> Vec<u8> {
    let crc = crc16_modbus(&body);
    body.extend_from_slice(&crc.to_le_bytes());
    body
}

pub fn verify_crc(frame: &[u8]) -> bool {
    if frame.len() < 4 {
        return false;
    }
    let (body, crc) = frame.split_at(frame.len() - 2);
    crc16_modbus(body).to_le_bytes() == [crc[0], crc[1]]
}

/// Flip every bit of the trailing CRC so the frame no longer verifies
pub fn corrupt_crc(frame: &mut [u8]) {
    let len = frame.len();
    if len >= 2 {
        frame[len - 2] ^= 0xFF;
        frame[len - 1] ^= 0xFF;
    }
}

/// A register read addressed to one slave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub slave_id: u8,
    pub function: u8,
    pub start_address: u16,
    pub quantity: u16,
}

impl ReadRequest {
    pub fn new(slave_id: u8, function: u8, start_address: u16, quantity: u16) -> Self {
        Self {
            slave_id,
            function,
            start_address,
            quantity,
        }
    }

    pub fn read_input(slave_id: u8, start_address: u16, quantity: u16) -> Self {
        Self::new(slave_id, READ_INPUT_REGISTERS, start_address, quantity)
    }

    pub fn read_holding(slave_id: u8, start_address: u16, quantity: u16) -> Self {
        Self::new(slave_id, READ_HOLDING_REGISTERS, start_address, quantity)
    }

    pub fn to_frame(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(8);
        body.push(self.slave_id);
        body.push(self.function);
        body.extend_from_slice(&self.start_address.to_be_bytes());
        body.extend_from_slice(&self.quantity.to_be_bytes());
        append_crc(body)
    }

    pub fn from_frame(frame: &[u8]) -> SimResult<Self> {
        if frame.len() != 8 {
            return Err(protocol_error!(
                ExceptionCode::IllegalDataValue.code(),
                format!("read request must be 8 bytes, got {}", frame.len())
            ));
        }
        if !verify_crc(frame) {
            return Err(protocol_error!(0, "request CRC mismatch"));
        }
        Ok(Self {
            slave_id: frame[0],
            function: frame[1],
            start_address: u16::from_be_bytes([frame[2], frame[3]]),
            quantity: u16::from_be_bytes([frame[4], frame[5]]),
        })
    }
}

pub fn read_response(slave_id: u8, function: u8, values: &[u16]) -> Vec<u8> {
    let mut body = Vec::with_capacity(5 + values.len() * 2);
    body.push(slave_id);
    body.push(function);
    body.push((values.len() * 2) as u8);
    for value in values {
        body.extend_from_slice(&value.to_be_bytes());
    }
    append_crc(body)
}

pub fn exception_response(slave_id: u8, function: u8, code: ExceptionCode) -> Vec<u8> {
    append_crc(vec![slave_id, function | EXCEPTION_FLAG, code.code()])
}

/// Decode a read response the way a master would: CRC first, then exception, then data
pub fn parse_read_response(frame: &[u8]) -> SimResult<Vec<u16>> {
    if !verify_crc(frame) {
        return Err(protocol_error!(0, "response CRC mismatch"));
    }
    let body = &frame[..frame.len() - 2];
    if body[1] & EXCEPTION_FLAG != 0 {
        let code = body.get(2).copied().unwrap_or(0);
        let message = ExceptionCode::from_code(code)
            .map_or("Unknown exception", ExceptionCode::description);
        return Err(protocol_error!(code, message));
    }
    let byte_count = usize::from(*body.get(2).unwrap_or(&0));
    let data = body.get(3..).unwrap_or(&[]);
    if data.len() != byte_count || byte_count % 2 != 0 {
        return Err(protocol_error!(0, "response byte count mismatch"));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}
