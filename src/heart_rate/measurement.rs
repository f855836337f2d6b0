use super::{Reading, SensorContact};
use crate::errors::DecodeError;

const FLAG_HR_WIDE: u8 = 1 << 0;
const FLAG_ENERGY_EXPENDED: u8 = 1 << 3;
const FLAG_RR_INTERVALS: u8 = 1 << 4;

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(DecodeError::MalformedPayload(field))?;
        self.pos += 1;
        Ok(byte)
    }
    fn u16_le(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        if self.remaining() < 2 {
            return Err(DecodeError::MalformedPayload(field));
        }
        let value = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }
}

/// Decodes a Heart Rate Measurement characteristic value.
///
/// The returned reading has a zero timestamp, callers stamp it on receipt.
/// RR intervals are left in their raw 1/1024 second units.
pub fn decode(data: &[u8]) -> Result<Reading, DecodeError> {
    let mut cursor = Cursor { data, pos: 0 };
    let flags = cursor.u8("empty payload")?;

    let hr_format_wide = flags & FLAG_HR_WIDE != 0;
    let sensor_contact = match (flags >> 1) & 0b11 {
        2 => SensorContact::NoContact,
        3 => SensorContact::Contact,
        _ => SensorContact::NotSupported,
    };

    let heart_rate = if hr_format_wide {
        cursor.u16_le("truncated 16-bit heart rate")?
    } else {
        u16::from(cursor.u8("missing heart rate")?)
    };

    let energy_expended = if flags & FLAG_ENERGY_EXPENDED != 0 {
        Some(cursor.u16_le("truncated energy expended")?)
    } else {
        None
    };

    let mut rr_intervals = Vec::new();
    if flags & FLAG_RR_INTERVALS != 0 {
        if cursor.remaining() % 2 != 0 {
            return Err(DecodeError::MalformedPayload("odd trailing RR byte"));
        }
        while cursor.remaining() > 0 {
            rr_intervals.push(cursor.u16_le("truncated RR interval")?);
        }
    }

    Ok(Reading {
        heart_rate,
        rr_intervals,
        energy_expended,
        sensor_contact,
        hr_format_wide,
        timestamp: 0,
    })
}
