//! HID injection frame encoders for wireless keyboard/mouse dongles
//! learned via [`crate::nrf`] (spec §4.9 expansion).
//!
//! Only the Enhanced ShockBurst payload an injected keystroke/mouse
//! report is wrapped in is this module's job; the RF choreography that
//! actually schedules and retransmits those frames against a live
//! dongle is explicitly out of scope (see DESIGN.md). Both vendors wrap
//! a standard HID report in an XOR keystream keyed by the device's
//! learned address, the same "obfuscation, not cryptography" shape the
//! rolling-code ciphers in [`crate::protocol::cipher`] implement for
//! real encryption.

/// A standard boot-protocol HID keyboard report: 1 modifier byte, 1
/// reserved byte, 6 keycodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardReport {
    pub modifiers: u8,
    pub keys: [u8; 6],
}

impl KeyboardReport {
    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0] = self.modifiers;
        out[2..8].copy_from_slice(&self.keys);
        out
    }
}

/// A standard boot-protocol HID mouse report: button mask plus relative
/// X/Y/wheel deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseReport {
    pub buttons: u8,
    pub dx: i8,
    pub dy: i8,
    pub wheel: i8,
}

impl MouseReport {
    pub fn to_bytes(self) -> [u8; 4] {
        [self.buttons, self.dx as u8, self.dy as u8, self.wheel as u8]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HidReport {
    Keyboard(KeyboardReport),
    Mouse(MouseReport),
}

impl HidReport {
    fn payload_bytes(self) -> Vec<u8> {
        match self {
            HidReport::Keyboard(k) => k.to_bytes().to_vec(),
            HidReport::Mouse(m) => m.to_bytes().to_vec(),
        }
    }
}

/// Derives a repeating keystream from the dongle's 5-byte learned
/// address and a per-frame sequence counter, then XORs `data` with it in
/// place. Both vendor dongles use the address itself (rather than a
/// negotiated session key) as the obfuscation seed, which is why a
/// learned address is enough to forge frames without ever recovering a
/// real key.
fn xor_keystream(data: &mut [u8], address: &[u8; 5], seq: u8) {
    for (i, byte) in data.iter_mut().enumerate() {
        let key_byte = address[i % address.len()] ^ seq.wrapping_add(i as u8);
        *byte ^= key_byte;
    }
}

/// Logitech Unifying-style frame: `[seq][reportType][payload...][checksum]`,
/// checksum = two's-complement sum of every preceding byte (the same
/// "cheap integrity, not authentication" shape the dongle firmware
/// itself uses).
pub fn build_logitech_frame(report: HidReport, address: &[u8; 5], seq: u8) -> Vec<u8> {
    let report_type: u8 = match report {
        HidReport::Keyboard(_) => 0xC1,
        HidReport::Mouse(_) => 0xC2,
    };
    let mut payload = report.payload_bytes();
    xor_keystream(&mut payload, address, seq);

    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(seq);
    frame.push(report_type);
    frame.extend_from_slice(&payload);
    let checksum = frame.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    frame.push(checksum.wrapping_neg());
    frame
}

/// Microsoft wireless-desktop-style frame: `[deviceId][reportType][seq][payload...]`,
/// no trailing checksum (the real dongle relies on the ESB CRC alone).
pub fn build_microsoft_frame(report: HidReport, address: &[u8; 5], seq: u8) -> Vec<u8> {
    let report_type: u8 = match report {
        HidReport::Keyboard(_) => 0x0A,
        HidReport::Mouse(_) => 0x0C,
    };
    let mut payload = report.payload_bytes();
    xor_keystream(&mut payload, address, seq);

    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(address[0]);
    frame.push(report_type);
    frame.push(seq);
    frame.extend_from_slice(&payload);
    frame
}

/// Reverses [`build_logitech_frame`]'s envelope, checking the checksum
/// and recovering the plaintext HID report bytes. Used by tests to prove
/// the keystream round-trips; not part of the injection path itself.
#[cfg(test)]
fn decode_logitech_frame(frame: &[u8], address: &[u8; 5]) -> Option<(u8, Vec<u8>)> {
    if frame.len() < 3 {
        return None;
    }
    let (body, checksum) = frame.split_at(frame.len() - 1);
    let computed = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)).wrapping_neg();
    if computed != checksum[0] {
        return None;
    }
    let seq = body[0];
    let report_type = body[1];
    let mut payload = body[2..].to_vec();
    xor_keystream(&mut payload, address, seq);
    Some((report_type, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: [u8; 5] = [0x11, 0x22, 0x33, 0x44, 0x55];

    #[test]
    fn logitech_frame_round_trips_through_its_own_checksum_and_keystream() {
        let report = HidReport::Keyboard(KeyboardReport { modifiers: 0, keys: [0x04, 0, 0, 0, 0, 0] });
        let frame = build_logitech_frame(report, &ADDR, 7);
        let (report_type, payload) = decode_logitech_frame(&frame, &ADDR).expect("valid checksum");
        assert_eq!(report_type, 0xC1);
        assert_eq!(payload, report.payload_bytes());
    }

    #[test]
    fn logitech_frame_rejects_corrupted_checksum() {
        let report = HidReport::Mouse(MouseReport { buttons: 1, dx: 5, dy: -5, wheel: 0 });
        let mut frame = build_logitech_frame(report, &ADDR, 1);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(decode_logitech_frame(&frame, &ADDR).is_none());
    }

    #[test]
    fn microsoft_frame_leads_with_device_id_and_report_type() {
        let report = HidReport::Keyboard(KeyboardReport { modifiers: 0x02, keys: [0; 6] });
        let frame = build_microsoft_frame(report, &ADDR, 3);
        assert_eq!(frame[0], ADDR[0]);
        assert_eq!(frame[1], 0x0A);
        assert_eq!(frame[2], 3);
    }

    #[test]
    fn different_sequence_numbers_produce_different_ciphertext() {
        let report = HidReport::Keyboard(KeyboardReport { modifiers: 0, keys: [0x05, 0, 0, 0, 0, 0] });
        let a = build_logitech_frame(report, &ADDR, 1);
        let b = build_logitech_frame(report, &ADDR, 2);
        assert_ne!(a, b);
    }
}
