use crate::error::Error;

/// CRC-24Q (Qualcomm) as used by RTCM 3 frames
const CRC24Q: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_24_LTE_A);

pub(crate) fn crc24q(data: &[u8]) -> u32 {
    CRC24Q.checksum(data)
}

/// MSB first bit reader over one RTCM message
pub(crate) struct BitReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bits left to read
    pub fn remaining(&self) -> usize {
        (self.buf.len() * 8).saturating_sub(self.pos)
    }

    /// Reads `n` (up to 64) bits as unsigned integer
    pub fn u(&mut self, n: usize) -> Result<u64, Error> {
        if n > 64 || n > self.remaining() {
            return Err(Error::TruncatedMessage);
        }
        let mut value = 0_u64;
        for _ in 0..n {
            let byte = self.buf[self.pos / 8];
            let bit = (byte >> (7 - (self.pos % 8))) & 0x01;
            value = (value << 1) | bit as u64;
            self.pos += 1;
        }
        Ok(value)
    }

    /// Reads `n` (up to 64) bits as two's complement signed integer
    pub fn s(&mut self, n: usize) -> Result<i64, Error> {
        let value = self.u(n)?;
        if n == 0 || n == 64 {
            return Ok(value as i64);
        }
        if value & (1 << (n - 1)) != 0 {
            Ok(value as i64 - (1_i64 << n))
        } else {
            Ok(value as i64)
        }
    }
}
