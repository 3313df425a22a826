// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

// PSID/RSID header field offsets (big-endian format)
const HEADER_V1_SIZE: usize = 0x76;
const HEADER_V2_SIZE: usize = 0x7C;
const OFFSET_VERSION: usize = 0x04;
const OFFSET_DATA: usize = 0x06;
const OFFSET_LOAD: usize = 0x08;
const OFFSET_INIT: usize = 0x0A;
const OFFSET_PLAY: usize = 0x0C;
const OFFSET_SONGS: usize = 0x0E;
const OFFSET_START: usize = 0x10;
const OFFSET_SPEED: usize = 0x12;
const OFFSET_NAME: usize = 0x16;
const OFFSET_AUTHOR: usize = 0x36;
const OFFSET_RELEASED: usize = 0x56;
const OFFSET_FLAGS: usize = 0x76;

const TEXT_FIELD_SIZE: usize = 32;

/// Parsed PSID/RSID file containing a C64 SID tune.
///
/// The PSID format stores 6502 machine code along with metadata
/// (title, author, release info) and playback parameters.
#[derive(Debug, Clone)]
pub struct SidFile {
    /// File format identifier ("PSID" or "RSID")
    pub magic: String,
    /// PSID version (1, 2, 3, or 4)
    pub version: u16,
    /// Offset to binary data in original file
    pub data_offset: u16,
    /// C64 memory address where data is loaded
    pub load_address: u16,
    /// Entry point for song initialization
    pub init_address: u16,
    /// Entry point called each frame during playback
    pub play_address: u16,
    /// Number of songs in the file
    pub songs: u16,
    /// Default song to play (1-indexed)
    pub start_song: u16,
    /// Per-song timing flags (bit set = CIA, clear = VBI)
    pub speed: u32,
    /// Song title from file header
    pub name: String,
    /// Composer/artist name
    pub author: String,
    /// Release year and publisher
    pub released: String,
    /// v2+ flags: video standard, SID model, etc.
    pub flags: u16,
    /// 6502 machine code and data
    pub data: Vec<u8>,
}

impl SidFile {
    /// Loads and parses a PSID/RSID file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::parse(&bytes)
    }

    /// Parses PSID/RSID data from a byte slice.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_V1_SIZE {
            return Err(Error::format(0, "at least a 118-byte PSID header"));
        }

        let magic = String::from_utf8_lossy(&bytes[0..4]).to_string();
        if magic != "PSID" && magic != "RSID" {
            return Err(Error::format(0, format!("PSID or RSID magic, got {magic:?}")));
        }

        let version = read_u16_be(&bytes[OFFSET_VERSION..]);
        if !(1..=4).contains(&version) {
            return Err(Error::format(
                OFFSET_VERSION,
                format!("version 1-4, got {version}"),
            ));
        }
        let data_offset = read_u16_be(&bytes[OFFSET_DATA..]);
        let mut load_address = read_u16_be(&bytes[OFFSET_LOAD..]);
        let init_address = read_u16_be(&bytes[OFFSET_INIT..]);
        let play_address = read_u16_be(&bytes[OFFSET_PLAY..]);
        let songs = read_u16_be(&bytes[OFFSET_SONGS..]);
        let start_song = read_u16_be(&bytes[OFFSET_START..]);
        let speed = read_u32_be(&bytes[OFFSET_SPEED..]);

        let name = read_string(&bytes[OFFSET_NAME..OFFSET_AUTHOR]);
        let author = read_string(&bytes[OFFSET_AUTHOR..OFFSET_RELEASED]);
        let released = read_string(&bytes[OFFSET_RELEASED..OFFSET_FLAGS]);

        let flags = if version >= 2 && bytes.len() > OFFSET_FLAGS + 1 {
            read_u16_be(&bytes[OFFSET_FLAGS..])
        } else {
            0
        };

        let data_start = data_offset as usize;
        if data_start > bytes.len() {
            return Err(Error::format(OFFSET_DATA, "data offset inside the file"));
        }

        let mut data = bytes[data_start..].to_vec();

        // PSID spec: load_address == 0 means the actual address is stored
        // in the first two bytes of the data section (little-endian C64 format)
        if load_address == 0 && data.len() >= 2 {
            load_address = u16::from_le_bytes([data[0], data[1]]);
            data.drain(..2);
        }

        Ok(Self {
            magic,
            version,
            data_offset,
            load_address,
            init_address,
            play_address,
            songs,
            start_song,
            speed,
            name,
            author,
            released,
            flags,
            data,
        })
    }

    /// Serializes as a PSID v2 file: 124-byte header plus payload.
    ///
    /// The load address is written into the header field rather than the
    /// payload prefix, and text fields are NUL-padded to 32 bytes. This is
    /// the canonical form referenced by the roundtrip guarantees.
    pub fn write(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_V2_SIZE];
        out[0..4].copy_from_slice(b"PSID");
        write_u16_be(&mut out[OFFSET_VERSION..], 2);
        write_u16_be(&mut out[OFFSET_DATA..], HEADER_V2_SIZE as u16);
        write_u16_be(&mut out[OFFSET_LOAD..], self.load_address);
        write_u16_be(&mut out[OFFSET_INIT..], self.init_address);
        write_u16_be(&mut out[OFFSET_PLAY..], self.play_address);
        write_u16_be(&mut out[OFFSET_SONGS..], self.songs.max(1));
        write_u16_be(&mut out[OFFSET_START..], self.start_song.max(1));
        out[OFFSET_SPEED..OFFSET_SPEED + 4].copy_from_slice(&self.speed.to_be_bytes());
        write_string(&mut out[OFFSET_NAME..OFFSET_AUTHOR], &self.name);
        write_string(&mut out[OFFSET_AUTHOR..OFFSET_RELEASED], &self.author);
        write_string(&mut out[OFFSET_RELEASED..OFFSET_FLAGS], &self.released);
        write_u16_be(&mut out[OFFSET_FLAGS..], self.flags);
        // Remaining v2 fields (start page, page length, reserved) stay zero
        out.extend_from_slice(&self.data);
        out
    }

    /// Saves the file to disk in PSID v2 form.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.write())?;
        Ok(())
    }

    /// Returns true if the tune should use PAL timing (50Hz).
    ///
    /// Most European C64 software used PAL; NTSC (60Hz) was common in North
    /// America. Defaults to PAL for v1 files or when the flag indicates
    /// PAL-compatible.
    pub const fn is_pal(&self) -> bool {
        if self.version >= 2 {
            let video_standard = (self.flags >> 2) & 0x03;
            video_standard != 2 // Not NTSC-only
        } else {
            true // Default to PAL
        }
    }

    /// Returns true if the file likely requires full C64 emulation.
    ///
    /// RSID files and interrupt-driven tunes need CIA/VIC emulation
    /// that this converter doesn't provide, so extraction may misbehave.
    pub fn requires_full_emulation(&self) -> bool {
        self.magic == "RSID" || self.play_address == 0 || self.speed != 0
    }
}

fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn write_u16_be(bytes: &mut [u8], value: u16) {
    bytes[0..2].copy_from_slice(&value.to_be_bytes());
}

/// Reads a null-terminated Latin-1 string (ISO-8859-1, used in SID headers).
fn read_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes[..end]
        .iter()
        .map(|&b| b as char) // Latin-1 maps directly to Unicode code points
        .collect::<String>()
        .trim()
        .to_string()
}

/// Writes a string as Latin-1, truncated and NUL-padded to the field size.
fn write_string(field: &mut [u8], text: &str) {
    for (slot, ch) in field
        .iter_mut()
        .zip(text.chars().chain(std::iter::repeat('\0')))
    {
        *slot = if (ch as u32) < 256 { ch as u8 } else { b'?' };
    }
    // Last byte of the 32-byte field is always NUL per the PSID spec
    if let Some(last) = field.get_mut(TEXT_FIELD_SIZE - 1) {
        *last = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! test_sid {
        () => {
            SidFile {
                magic: "PSID".to_string(),
                version: 2,
                data_offset: 0x7c,
                load_address: 0x1000,
                init_address: 0x1000,
                play_address: 0x1003,
                songs: 1,
                start_song: 1,
                speed: 0,
                name: "Test Tune".to_string(),
                author: "Nobody".to_string(),
                released: "2026".to_string(),
                flags: 0,
                data: vec![0x60, 0x60, 0x60],
            }
        };
    }

    #[test]
    fn write_parse_roundtrip() {
        let sid = test_sid!();
        let bytes = sid.write();
        assert_eq!(bytes.len(), 0x7C + 3);
        let parsed = SidFile::parse(&bytes).expect("parse own output");
        assert_eq!(parsed.load_address, 0x1000);
        assert_eq!(parsed.init_address, 0x1000);
        assert_eq!(parsed.play_address, 0x1003);
        assert_eq!(parsed.name, "Test Tune");
        assert_eq!(parsed.author, "Nobody");
        assert_eq!(parsed.data, vec![0x60, 0x60, 0x60]);
    }

    #[test]
    fn header_only_file_has_empty_payload() {
        let mut sid = test_sid!();
        sid.data.clear();
        let bytes = sid.write();
        assert_eq!(bytes.len(), 0x7C);
        let parsed = SidFile::parse(&bytes).expect("parse header-only");
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn load_address_zero_reads_payload_prefix() {
        let mut sid = test_sid!();
        sid.data = vec![0x34, 0x12, 0x60];
        let mut bytes = sid.write();
        bytes[OFFSET_LOAD] = 0;
        bytes[OFFSET_LOAD + 1] = 0;
        let parsed = SidFile::parse(&bytes).expect("parse");
        assert_eq!(parsed.load_address, 0x1234);
        assert_eq!(parsed.data, vec![0x60]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = test_sid!().write();
        bytes[0] = b'X';
        assert!(SidFile::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_bad_version() {
        let mut bytes = test_sid!().write();
        bytes[OFFSET_VERSION] = 0;
        bytes[OFFSET_VERSION + 1] = 9;
        assert!(SidFile::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(SidFile::parse(&[0x50; 16]).is_err());
    }

    #[test]
    fn rsid_is_accepted_and_flagged() {
        let mut bytes = test_sid!().write();
        bytes[0..4].copy_from_slice(b"RSID");
        let parsed = SidFile::parse(&bytes).expect("parse RSID");
        assert_eq!(parsed.magic, "RSID");
        assert!(parsed.requires_full_emulation());
    }

    #[test]
    fn text_fields_are_nul_padded() {
        let sid = test_sid!();
        let bytes = sid.write();
        // "Test Tune" is 9 chars; the rest of the 32-byte field is NUL
        assert_eq!(bytes[OFFSET_NAME + 9], 0);
        assert_eq!(bytes[OFFSET_AUTHOR - 1], 0);
    }

    #[test]
    fn overlong_title_is_truncated_with_trailing_nul() {
        let mut sid = test_sid!();
        sid.name = "X".repeat(64);
        let bytes = sid.write();
        assert_eq!(bytes[OFFSET_AUTHOR - 1], 0);
        let parsed = SidFile::parse(&bytes).expect("parse");
        assert_eq!(parsed.name.len(), 31);
    }

    #[test]
    fn pal_detection() {
        let mut sid = test_sid!();
        assert!(sid.is_pal());
        sid.flags = 2 << 2; // NTSC-only
        assert!(!sid.is_pal());
    }
}
