//! Trailing checksum algorithms for frame validation
//!
//! A configured checksum is transmitted right after the end delimiter (or at
//! the tail of the frame when only a start delimiter is used). All multi-byte
//! checksums are big-endian on the wire.

use crc::{Crc, CRC_16_ARC, CRC_16_IBM_3740, CRC_16_MODBUS, CRC_32_ISO_HDLC, CRC_8_SMBUS};
use serde::{Deserialize, Serialize};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);
const CRC16_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);
const CRC16_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Checksum algorithm appended to each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChecksumAlgorithm {
    #[default]
    None,
    Xor8,
    Mod256,
    Crc8,
    Crc16,
    Crc16Modbus,
    Crc16Ccitt,
    Crc32,
}

impl ChecksumAlgorithm {
    /// Every supported algorithm, in display order
    pub const ALL: [ChecksumAlgorithm; 8] = [
        ChecksumAlgorithm::None,
        ChecksumAlgorithm::Xor8,
        ChecksumAlgorithm::Mod256,
        ChecksumAlgorithm::Crc8,
        ChecksumAlgorithm::Crc16,
        ChecksumAlgorithm::Crc16Modbus,
        ChecksumAlgorithm::Crc16Ccitt,
        ChecksumAlgorithm::Crc32,
    ];

    /// Project-file name of the algorithm
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::None => "",
            ChecksumAlgorithm::Xor8 => "XOR-8",
            ChecksumAlgorithm::Mod256 => "MOD-256",
            ChecksumAlgorithm::Crc8 => "CRC-8",
            ChecksumAlgorithm::Crc16 => "CRC-16",
            ChecksumAlgorithm::Crc16Modbus => "CRC-16-MODBUS",
            ChecksumAlgorithm::Crc16Ccitt => "CRC-16-CCITT",
            ChecksumAlgorithm::Crc32 => "CRC-32",
        }
    }

    /// Number of checksum bytes on the wire
    pub fn len(&self) -> usize {
        match self {
            ChecksumAlgorithm::None => 0,
            ChecksumAlgorithm::Xor8 | ChecksumAlgorithm::Mod256 | ChecksumAlgorithm::Crc8 => 1,
            ChecksumAlgorithm::Crc16
            | ChecksumAlgorithm::Crc16Modbus
            | ChecksumAlgorithm::Crc16Ccitt => 2,
            ChecksumAlgorithm::Crc32 => 4,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ChecksumAlgorithm::None)
    }

    /// Compute the checksum bytes for a payload
    pub fn compute(&self, data: &[u8]) -> Vec<u8> {
        match self {
            ChecksumAlgorithm::None => Vec::new(),
            ChecksumAlgorithm::Xor8 => vec![data.iter().fold(0u8, |acc, b| acc ^ b)],
            ChecksumAlgorithm::Mod256 => vec![data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))],
            ChecksumAlgorithm::Crc8 => vec![CRC8.checksum(data)],
            ChecksumAlgorithm::Crc16 => CRC16.checksum(data).to_be_bytes().to_vec(),
            ChecksumAlgorithm::Crc16Modbus => CRC16_MODBUS.checksum(data).to_be_bytes().to_vec(),
            ChecksumAlgorithm::Crc16Ccitt => CRC16_CCITT.checksum(data).to_be_bytes().to_vec(),
            ChecksumAlgorithm::Crc32 => CRC32.checksum(data).to_be_bytes().to_vec(),
        }
    }

    /// Check a payload against received checksum bytes
    pub fn verify(&self, data: &[u8], received: &[u8]) -> bool {
        self.compute(data) == received
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::None => write!(f, "None"),
            other => write!(f, "{}", other.name()),
        }
    }
}

impl TryFrom<String> for ChecksumAlgorithm {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Ok(ChecksumAlgorithm::None);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|alg| alg.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown checksum algorithm '{}'", value))
    }
}

impl From<ChecksumAlgorithm> for String {
    fn from(value: ChecksumAlgorithm) -> Self {
        value.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths() {
        assert_eq!(ChecksumAlgorithm::None.len(), 0);
        assert_eq!(ChecksumAlgorithm::Xor8.len(), 1);
        assert_eq!(ChecksumAlgorithm::Crc16Modbus.len(), 2);
        assert_eq!(ChecksumAlgorithm::Crc32.len(), 4);

        for alg in ChecksumAlgorithm::ALL {
            assert_eq!(alg.compute(b"123456789").len(), alg.len(), "{}", alg);
        }
    }

    #[test]
    fn test_known_vectors() {
        // Standard "123456789" check values
        assert_eq!(ChecksumAlgorithm::Crc16Modbus.compute(b"123456789"), vec![0x4B, 0x37]);
        assert_eq!(ChecksumAlgorithm::Crc16Ccitt.compute(b"123456789"), vec![0x29, 0xB1]);
        assert_eq!(
            ChecksumAlgorithm::Crc32.compute(b"123456789"),
            vec![0xCB, 0xF4, 0x39, 0x26]
        );
        assert_eq!(ChecksumAlgorithm::Xor8.compute(&[0x01, 0x02, 0x04]), vec![0x07]);
        assert_eq!(ChecksumAlgorithm::Mod256.compute(&[0xFF, 0x02]), vec![0x01]);
    }

    #[test]
    fn test_name_round_trip() {
        for alg in ChecksumAlgorithm::ALL {
            let name: String = alg.into();
            assert_eq!(ChecksumAlgorithm::try_from(name).unwrap(), alg);
        }
        assert!(ChecksumAlgorithm::try_from("FLETCHER-99".to_string()).is_err());
    }
}
