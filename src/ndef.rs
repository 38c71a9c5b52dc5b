//! NTAG memory reads and just enough NDEF to pull one Text record out
//! of a Type 2 tag.
//!
//! Two fixed 16-byte reads cover the capability container and the
//! first message: pages 3..=6 and the spill-over pages 7..=10. Tags
//! with longer messages get their text truncated, which is fine for
//! the labels this reader exists to scan.

use embedded_hal::delay::DelayNs;

use crate::{
    commands::picc,
    interface::Interface,
    iso14443a::Uid,
    Error, FrameTimeout, Mfrc522, Result,
};

/// Bytes returned by one READ command (four 4-byte pages)
pub const PAGE_READ_LEN: usize = 16;
/// READ reply on the wire: payload plus CRC trailer
const READ_REPLY_LEN: usize = PAGE_READ_LEN + 2;

/// First page of the capability container window
const CC_WINDOW_PAGE: u8 = 3;
/// First page of the spill-over window, contiguous with the first
const SPILL_WINDOW_PAGE: u8 = 7;

/// Capability container length, start of TLV space within the window
const CC_LEN: usize = 4;
/// TLV scan stays inside the first two pages after the container
const TLV_SCAN_END: usize = 12;

/// Longest reassembled NDEF message
pub const NDEF_MSG_CAP: usize = 32;
/// Longest decoded text payload
pub const TEXT_CAP: usize = 32;

// a decoded text is always at least 5 bytes shorter than its record
const _: () = assert!(TEXT_CAP >= NDEF_MSG_CAP - 5);

/// Tags need a breather between consecutive READs
const INTER_READ_DELAY_MS: u32 = 5;

mod tlv {
    pub const NULL: u8 = 0x00;
    pub const LOCK_CONTROL: u8 = 0x01;
    pub const NDEF_MESSAGE: u8 = 0x03;
    pub const TERMINATOR: u8 = 0xFE;
}

/// NDEF record header mask and expected value: MB+ME set, short
/// record, TNF well-known
const RECORD_HEADER_MASK: u8 = 0xF0;
const RECORD_HEADER_TEXT: u8 = 0xD0;

impl<I: Interface, D: DelayNs> Mfrc522<I, D> {
    /// READ: fetches four pages starting at `page`
    ///
    /// Both directions are CRC-protected; the reply CRC is verified
    /// through the chip's coprocessor.
    pub fn read_page(&mut self, page: u8, timeout: FrameTimeout) -> Result<[u8; PAGE_READ_LEN], I::Error> {
        let mut tx = [picc::READ, page, 0, 0];
        let crc = self.calculate_crc(&tx[..2])?;
        tx[2..].copy_from_slice(&crc);

        let mut rx = [0u8; READ_REPLY_LEN];
        let info = self.transceive(&tx, &mut rx, 0, 0, true, timeout)?;
        if info.len != READ_REPLY_LEN {
            return Err(Error::Protocol);
        }

        let mut out = [0u8; PAGE_READ_LEN];
        out.copy_from_slice(&rx[..PAGE_READ_LEN]);
        Ok(out)
    }

    /// Reads the tag's message area and decodes a Text record if one
    /// is there
    ///
    /// Only the NTAG/Ultralight family (SAK 0x00) is attempted; other
    /// tag types report no text rather than an error, as does any
    /// structural mismatch in the tag content. Errors are reserved for
    /// the RF exchanges themselves.
    pub fn extract_text(
        &mut self,
        uid: &Uid,
        timeout: FrameTimeout,
    ) -> Result<Option<heapless::String<TEXT_CAP>>, I::Error> {
        if uid.sak() != picc::SAK_NTAG {
            debug!("SAK {=u8:#04x} is not an NTAG, skipping content read", uid.sak());
            return Ok(None);
        }

        let first = self.read_page(CC_WINDOW_PAGE, timeout)?;
        self.delay.delay_ms(INTER_READ_DELAY_MS);
        let second = self.read_page(SPILL_WINDOW_PAGE, timeout)?;

        Ok(parse_text_record(&first, &second))
    }
}

/// Locates the NDEF message TLV in the first window
///
/// Returns the message start offset (within the window) and its
/// declared length. The scan covers the bytes right after the
/// capability container and gives up at a terminator.
fn find_message_tlv(window: &[u8; PAGE_READ_LEN]) -> Option<(usize, usize)> {
    let mut i = CC_LEN;
    while i < TLV_SCAN_END {
        match window[i] {
            tlv::NULL => i += 1,
            tlv::TERMINATOR => return None,
            tlv::LOCK_CONTROL => {
                let len = *window.get(i + 1)? as usize;
                i += 2 + len;
            }
            tlv::NDEF_MESSAGE => {
                let len = *window.get(i + 1)? as usize;
                if len == 0 {
                    return None;
                }
                return Some((i + 2, len));
            }
            // not TLV structured, resync byte by byte
            _ => i += 1,
        }
    }
    None
}

/// Reassembles the message across the two windows and decodes it
///
/// The windows are contiguous tag memory, so the message is a plain
/// concatenation clipped to what was actually read.
pub fn parse_text_record(
    first: &[u8; PAGE_READ_LEN],
    second: &[u8; PAGE_READ_LEN],
) -> Option<heapless::String<TEXT_CAP>> {
    let (start, declared_len) = find_message_tlv(first)?;

    let available = 2 * PAGE_READ_LEN - start;
    let take = declared_len.min(available).min(NDEF_MSG_CAP);

    let mut msg = heapless::Vec::<u8, NDEF_MSG_CAP>::new();
    for n in 0..take {
        let idx = start + n;
        let byte = if idx < PAGE_READ_LEN {
            first[idx]
        } else {
            second[idx - PAGE_READ_LEN]
        };
        // cannot overflow, take is clipped to the capacity
        let _ = msg.push(byte);
    }

    decode_text(&msg)
}

/// Decodes a short well-known Text record
///
/// Layout: header, type length, payload length, type byte 'T', status
/// byte (low bits are the language code length), language code, text.
/// The language code is skipped, not surfaced.
fn decode_text(msg: &[u8]) -> Option<heapless::String<TEXT_CAP>> {
    if msg.len() < 5 {
        return None;
    }
    if msg[0] & RECORD_HEADER_MASK != RECORD_HEADER_TEXT {
        return None;
    }
    let type_len = msg[1] as usize;
    let payload_len = msg[2] as usize;
    if type_len != 1 || msg[3] != b'T' {
        return None;
    }
    let lang_len = (msg[4] & 0x3F) as usize;
    if payload_len < 1 + lang_len {
        return None;
    }

    let text_start = 5 + lang_len;
    if text_start > msg.len() {
        return None;
    }
    let text_len = (payload_len - 1 - lang_len).min(msg.len() - text_start);

    let text = core::str::from_utf8(&msg[text_start..text_start + text_len]).ok()?;
    let mut out = heapless::String::new();
    out.push_str(text).ok()?;
    Some(out)
}
