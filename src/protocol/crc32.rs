//! CRC-32/ISO-HDLC (the zlib/Ethernet checksum): reflected polynomial
//! 0xEDB88320, initial value and final xor 0xFFFFFFFF.

const POLYNOMIAL: u32 = 0xEDB8_8320;

static TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

pub fn checksum(data: &[u8]) -> u32 {
    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input() {
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn single_bit_flip_changes_checksum() {
        let data = b"the quick brown fox".to_vec();
        let mut flipped = data.clone();
        flipped[4] ^= 0x01;
        assert_ne!(checksum(&data), checksum(&flipped));
    }
}
