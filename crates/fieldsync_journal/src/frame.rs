//! Frame encoding with length and CRC32 checksum.

use crate::error::{JournalError, JournalResult};

/// Magic bytes at the start of every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"FSJR";

/// Size of the frame header: magic, payload length, payload checksum.
pub const FRAME_HEADER_LEN: usize = 12;

/// Wraps a payload in a frame.
pub fn encode_frame(payload: &[u8]) -> JournalResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| JournalError::RecordTooLarge {
        size: payload.len(),
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&compute_crc32(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Result of scanning a journal image for frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrames {
    /// Payloads of every intact frame, in order.
    pub payloads: Vec<Vec<u8>>,
    /// Number of leading bytes covered by intact frames.
    pub valid_len: usize,
    /// Why scanning stopped early, if it did.
    pub damage: Option<String>,
}

impl DecodedFrames {
    /// Returns true if bytes after `valid_len` were discarded.
    pub fn is_damaged(&self) -> bool {
        self.damage.is_some()
    }
}

/// Scans `bytes` for consecutive frames.
///
/// Scanning stops at the first frame that is truncated, has bad magic or
/// fails its checksum. Everything before it is returned.
pub fn decode_frames(bytes: &[u8]) -> DecodedFrames {
    let mut payloads = Vec::new();
    let mut offset = 0usize;
    let mut damage = None;

    while offset < bytes.len() {
        let remaining = &bytes[offset..];
        if remaining.len() < FRAME_HEADER_LEN {
            damage = Some(format!("truncated header at offset {offset}"));
            break;
        }
        if remaining[0..4] != FRAME_MAGIC {
            damage = Some(format!("bad magic at offset {offset}"));
            break;
        }

        let len = u32::from_le_bytes([remaining[4], remaining[5], remaining[6], remaining[7]])
            as usize;
        let crc = u32::from_le_bytes([remaining[8], remaining[9], remaining[10], remaining[11]]);

        let end = FRAME_HEADER_LEN.saturating_add(len);
        if remaining.len() < end {
            damage = Some(format!("truncated payload at offset {offset}"));
            break;
        }

        let payload = &remaining[FRAME_HEADER_LEN..end];
        if compute_crc32(payload) != crc {
            damage = Some(format!("checksum mismatch at offset {offset}"));
            break;
        }

        payloads.push(payload.to_vec());
        offset += end;
    }

    DecodedFrames {
        payloads,
        valid_len: offset,
        damage,
    }
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn crc32_known_vector() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn frames_decode_in_order() {
        let mut image = encode_frame(b"first").unwrap();
        image.extend(encode_frame(b"second").unwrap());

        let decoded = decode_frames(&image);
        assert_eq!(decoded.payloads, vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(decoded.valid_len, image.len());
        assert!(!decoded.is_damaged());
    }

    #[test]
    fn torn_tail_is_cut_off() {
        let first = encode_frame(b"kept").unwrap();
        let second = encode_frame(b"torn write").unwrap();
        let mut image = first.clone();
        image.extend_from_slice(&second[..second.len() - 3]);

        let decoded = decode_frames(&image);
        assert_eq!(decoded.payloads, vec![b"kept".to_vec()]);
        assert_eq!(decoded.valid_len, first.len());
        assert!(decoded.is_damaged());
    }

    #[test]
    fn flipped_bit_fails_checksum() {
        let mut image = encode_frame(b"payload").unwrap();
        let last = image.len() - 1;
        image[last] ^= 0x01;

        let decoded = decode_frames(&image);
        assert!(decoded.payloads.is_empty());
        assert!(decoded.damage.unwrap().contains("checksum"));
    }

    proptest! {
        #[test]
        fn any_prefix_decodes_to_whole_frames(payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8), cut in 0usize..512) {
            let mut image = Vec::new();
            for p in &payloads {
                image.extend(encode_frame(p).unwrap());
            }
            let cut = cut.min(image.len());
            let decoded = decode_frames(&image[..cut]);
            prop_assert!(decoded.valid_len <= cut);
            prop_assert_eq!(&decoded.payloads[..], &payloads[..decoded.payloads.len()]);
        }
    }
}
