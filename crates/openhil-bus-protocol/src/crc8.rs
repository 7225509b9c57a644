//! SAE-J1850 CRC-8 used by the end-to-end protection profile.
//!
//! Polynomial `0x1D`, table-driven. The protection profile supplies the
//! `0xFF` seed and final complement itself (see [`crate::encode`]); this
//! module only exposes the raw table update.

const POLY: u8 = 0x1D;

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut index = 0;
    while index < 256 {
        let mut crc = index as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[index] = crc;
        index += 1;
    }
    table
}

static TABLE: [u8; 256] = build_table();

/// Feed `bytes` into a running CRC value.
#[must_use]
pub fn update(crc: u8, bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(crc, |crc, &byte| TABLE[usize::from(crc ^ byte)])
}
