// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Static table extraction for the Laxity NewPlayer v21 family.
//!
//! NP21 keeps its music data at fixed offsets from the player's load
//! address. The offsets below are empirical constants taken from rips of
//! the player; the pattern matcher vouches that we are actually looking at
//! NP21 before they are trusted. Tunes assembled at other bases (commonly
//! $A000) work the same way since everything is base-relative.

use crate::memory::MemoryImage;
use crate::model::{
    CommandTable, FilterTable, Instrument, MusicModel, Orderlist, PulseTable, Sequence,
    WaveTable, MAX_COMMANDS, MAX_FILTER_ENTRIES, MAX_INSTRUMENTS, MAX_PULSE_ENTRIES,
    MAX_SEQUENCE_BYTES, SEQ_END, WAVE_ENTRIES,
};
use log::warn;

/// Player code size in bytes; everything below this offset is executable.
pub const PLAYER_CODE_SIZE: u16 = 0x07BB;
/// Waveform column of the wave table.
pub const WAVE_FORMS_OFFSET: u16 = 0x16DA;
/// Note-offset column; NP21 stores it 0x32 bytes above the forms.
pub const WAVE_NOTES_OFFSET: u16 = 0x170C;
/// Sequence pointer tables, low bytes then high bytes.
pub const SEQ_PTR_LO_OFFSET: u16 = 0x17DA;
pub const SEQ_PTR_HI_OFFSET: u16 = 0x185A;
/// Command table, 64 rows of three bytes.
pub const COMMANDS_OFFSET: u16 = 0x18DA;
/// Three voice orderlists packed back to back.
pub const ORDERLISTS_OFFSET: u16 = 0x199F;
/// Filter program.
pub const FILTER_OFFSET: u16 = 0x1A1E;
/// Pulse program.
pub const PULSE_OFFSET: u16 = 0x1A3B;
/// Instruments, column-major: 32 attack/decays, then 32 sustain/releases...
pub const INSTRUMENTS_OFFSET: u16 = 0x1A6B;
/// Upper bound on sequences the pointer tables can address.
pub const MAX_SEQUENCES: usize = 128;

/// What a byte range of the player image is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    PlayerCode,
    WaveTable,
    SequencePointers,
    CommandTable,
    Orderlists,
    FilterTable,
    PulseTable,
    Instruments,
    Sequences,
}

/// A classified byte range, used by the packer to tell code from data.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub start: u16,
    pub end: u16,
    pub kind: RegionKind,
}

/// Code/data classification of the player image.
#[derive(Debug, Clone, Default)]
pub struct MemoryMap {
    pub regions: Vec<Region>,
}

impl MemoryMap {
    fn push(&mut self, start: u16, end: u16, kind: RegionKind) {
        self.regions.push(Region { start, end, kind });
    }

    /// Kind of the region containing `address`, if classified.
    pub fn kind_at(&self, address: u16) -> Option<RegionKind> {
        self.regions
            .iter()
            .find(|r| (r.start..r.end).contains(&address))
            .map(|r| r.kind)
    }
}

/// Result of a Laxity extraction: the model, a memory map for the packer,
/// and any structure problems found on the way. Problems never abort the
/// extraction; the model is best-effort.
#[derive(Debug)]
pub struct Extraction {
    pub base: u16,
    pub model: MusicModel,
    pub memory_map: MemoryMap,
    /// Where each voice's orderlist started in the source image
    pub orderlist_addresses: [u16; 3],
    /// Where each extracted sequence started, parallel to `model.sequences`
    pub sequence_addresses: Vec<u16>,
    pub warnings: Vec<String>,
}

impl Extraction {
    /// Strict view of the extraction: the first recorded table problem
    /// becomes a hard error. Conversion pipelines stay best-effort; this is
    /// for callers that would rather reject a rip than guess.
    pub fn strict(self) -> crate::error::Result<MusicModel> {
        match self.warnings.into_iter().next() {
            Some(reason) => Err(crate::error::Error::Extraction {
                table: "laxity",
                reason,
            }),
            None => Ok(self.model),
        }
    }
}

/// Extracts the music model from a memory image holding an NP21 player
/// loaded at `base`.
pub fn extract(memory: &MemoryImage, base: u16) -> Extraction {
    let mut warnings = Vec::new();
    let mut model = MusicModel::default();
    let mut map = MemoryMap::default();

    map.push(base, base.wrapping_add(PLAYER_CODE_SIZE), RegionKind::PlayerCode);

    // Orderlists: three lists packed back to back, each 0xFF-terminated
    // with a trailing loop byte.
    let mut cursor = base.wrapping_add(ORDERLISTS_OFFSET);
    let orderlists_start = cursor;
    let mut orderlist_addresses = [0u16; 3];
    for voice in 0..3 {
        orderlist_addresses[voice] = cursor;
        let slice = memory.slice(cursor, 512);
        match Orderlist::parse(slice) {
            Ok(list) => {
                let consumed = list.entries.len() as u16 * 2 + 2;
                cursor = cursor.wrapping_add(consumed);
                model.orderlists[voice] = list;
            }
            Err(e) => {
                warnings.push(format!("voice {voice} orderlist: {e}"));
                cursor = cursor.wrapping_add(2);
            }
        }
    }
    map.push(orderlists_start, cursor, RegionKind::Orderlists);

    // Instruments are stored column-major: all 32 attack/decay bytes, then
    // all 32 sustain/release bytes, and so on through the eight columns.
    let instr_base = base.wrapping_add(INSTRUMENTS_OFFSET);
    for slot in 0..MAX_INSTRUMENTS {
        let mut bytes = [0u8; 8];
        for (column, byte) in bytes.iter_mut().enumerate() {
            *byte = memory.peek(
                instr_base.wrapping_add((column * MAX_INSTRUMENTS + slot) as u16),
            );
        }
        model.instruments.push(Instrument(bytes));
    }
    map.push(
        instr_base,
        instr_base.wrapping_add((MAX_INSTRUMENTS * 8) as u16),
        RegionKind::Instruments,
    );

    // Wave table: the two columns sit 0x32 bytes apart in the player but
    // stay logically parallel; both are read in full.
    let forms_base = base.wrapping_add(WAVE_FORMS_OFFSET);
    let notes_base = base.wrapping_add(WAVE_NOTES_OFFSET);
    model
        .wave
        .forms
        .copy_from_slice(memory.slice(forms_base, WAVE_ENTRIES));
    model
        .wave
        .notes
        .copy_from_slice(memory.slice(notes_base, WAVE_ENTRIES));
    map.push(
        forms_base,
        notes_base.wrapping_add(WAVE_ENTRIES as u16),
        RegionKind::WaveTable,
    );

    // Pulse and filter programs are 0xFF-terminated four-byte rows.
    let pulse_base = base.wrapping_add(PULSE_OFFSET);
    model.pulse = PulseTable {
        entries: read_rows::<4>(memory, pulse_base, MAX_PULSE_ENTRIES),
    };
    map.push(
        pulse_base,
        pulse_base.wrapping_add((model.pulse.entries.len() * 4 + 1) as u16),
        RegionKind::PulseTable,
    );
    for problem in model.pulse.validate() {
        warnings.push(problem);
    }

    let filter_base = base.wrapping_add(FILTER_OFFSET);
    model.filter = FilterTable {
        entries: read_rows::<4>(memory, filter_base, MAX_FILTER_ENTRIES),
    };
    map.push(
        filter_base,
        filter_base.wrapping_add((model.filter.entries.len() * 4 + 1) as u16),
        RegionKind::FilterTable,
    );
    for problem in model.filter.validate() {
        warnings.push(problem);
    }

    let commands_base = base.wrapping_add(COMMANDS_OFFSET);
    model.commands = CommandTable {
        entries: read_rows::<3>(memory, commands_base, MAX_COMMANDS),
    };
    map.push(
        commands_base,
        commands_base.wrapping_add((model.commands.entries.len() * 3) as u16),
        RegionKind::CommandTable,
    );

    // Sequences: the pointer tables address up to 128, but only the ones
    // the orderlists reach are meaningful.
    let lo_base = base.wrapping_add(SEQ_PTR_LO_OFFSET);
    let hi_base = base.wrapping_add(SEQ_PTR_HI_OFFSET);
    map.push(
        lo_base,
        hi_base.wrapping_add(MAX_SEQUENCES as u16),
        RegionKind::SequencePointers,
    );
    let used = model.max_used_sequence() + 1;
    let mut sequence_addresses = Vec::new();
    let mut seq_low = u16::MAX;
    let mut seq_high = 0u16;
    for index in 0..used.min(MAX_SEQUENCES) {
        let pointer = u16::from_le_bytes([
            memory.peek(lo_base.wrapping_add(index as u16)),
            memory.peek(hi_base.wrapping_add(index as u16)),
        ]);
        sequence_addresses.push(pointer);
        if pointer == 0 {
            warnings.push(format!("sequence {index} has a null pointer"));
            model.sequences.push(Sequence::empty());
            continue;
        }
        match read_sequence(memory, pointer) {
            Ok((sequence, len)) => {
                seq_low = seq_low.min(pointer);
                seq_high = seq_high.max(pointer.wrapping_add(len));
                model.sequences.push(sequence);
            }
            Err(problem) => {
                warnings.push(format!("sequence {index} at {pointer:#06x}: {problem}"));
                model.sequences.push(Sequence::empty());
            }
        }
    }
    if seq_low <= seq_high {
        map.push(seq_low, seq_high, RegionKind::Sequences);
    }

    for problem in &warnings {
        warn!("laxity extraction: {problem}");
    }

    Extraction {
        base,
        model,
        memory_map: map,
        orderlist_addresses,
        sequence_addresses,
        warnings,
    }
}

/// Reads fixed-width rows until a 0xFF lead byte or the row limit.
fn read_rows<const N: usize>(memory: &MemoryImage, base: u16, limit: usize) -> Vec<[u8; N]> {
    let mut rows = Vec::new();
    for index in 0..limit {
        let start = base.wrapping_add((index * N) as u16);
        if memory.peek(start) == 0xFF {
            break;
        }
        let mut row = [0u8; N];
        for (offset, byte) in row.iter_mut().enumerate() {
            *byte = memory.peek(start.wrapping_add(offset as u16));
        }
        rows.push(row);
    }
    rows
}

/// Reads one packed sequence starting at `pointer`, terminator included.
fn read_sequence(memory: &MemoryImage, pointer: u16) -> Result<(Sequence, u16), String> {
    let mut bytes = Vec::new();
    for offset in 0..MAX_SEQUENCE_BYTES as u16 {
        let byte = memory.peek(pointer.wrapping_add(offset));
        bytes.push(byte);
        if byte == SEQ_END {
            let len = bytes.len() as u16;
            return Sequence::from_bytes(bytes)
                .map(|s| (s, len))
                .map_err(|e| e.to_string());
        }
    }
    Err(format!("no terminator within {MAX_SEQUENCE_BYTES} bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrderlistEntry;

    const BASE: u16 = 0x1000;

    /// Builds an image with a consistent NP21 data layout and two tiny
    /// sequences referenced by voice orderlists.
    fn laxity_image() -> MemoryImage {
        let mut mem = MemoryImage::new();

        // Voice orderlists: v0 plays sequences 0,1; v1 and v2 play 0.
        let mut orderlists = Vec::new();
        orderlists.extend_from_slice(&[0xA0, 0x00, 0xA0, 0x01, 0xFF, 0x00]);
        orderlists.extend_from_slice(&[0xA0, 0x00, 0xFF, 0x00]);
        orderlists.extend_from_slice(&[0xA0, 0x00, 0xFF, 0x00]);
        mem.load(BASE + ORDERLISTS_OFFSET, &orderlists);

        // Two sequences living just above the pointer tables.
        let seq0_addr = BASE + 0x1F00;
        let seq1_addr = BASE + 0x1F10;
        mem.load(seq0_addr, &[0xA0, 0x81, 0x30, 0x7F]);
        mem.load(seq1_addr, &[0x83, 0x32, 0x7F]);
        mem.write(BASE + SEQ_PTR_LO_OFFSET, (seq0_addr & 0xFF) as u8);
        mem.write(BASE + SEQ_PTR_HI_OFFSET, (seq0_addr >> 8) as u8);
        mem.write(BASE + SEQ_PTR_LO_OFFSET + 1, (seq1_addr & 0xFF) as u8);
        mem.write(BASE + SEQ_PTR_HI_OFFSET + 1, (seq1_addr >> 8) as u8);

        // Instruments column-major: instrument 3 gets AD=$12, SR=$34.
        mem.write(BASE + INSTRUMENTS_OFFSET + 3, 0x12);
        mem.write(BASE + INSTRUMENTS_OFFSET + 32 + 3, 0x34);
        // Wave pointer column (index 7) for instrument 3
        mem.write(BASE + INSTRUMENTS_OFFSET + 7 * 32 + 3, 0x05);

        // Wave table columns.
        mem.write(BASE + WAVE_FORMS_OFFSET, 0x41);
        mem.write(BASE + WAVE_NOTES_OFFSET, 0xA0);

        // Pulse: one row plus terminator.
        mem.load(BASE + PULSE_OFFSET, &[0x00, 0x08, 0x10, 0x00, 0xFF]);
        // Filter: speed row, one program row, terminator.
        mem.load(
            BASE + FILTER_OFFSET,
            &[0x12, 0x00, 0x00, 0x00, 0x40, 0x02, 0x05, 0x04, 0xFF],
        );
        // Commands: one row then terminator lead byte.
        mem.load(BASE + COMMANDS_OFFSET, &[0x01, 0x02, 0x03, 0xFF]);

        mem
    }

    #[test]
    fn extracts_orderlists_and_sequences() {
        let extraction = extract(&laxity_image(), BASE);
        assert!(extraction.warnings.is_empty(), "{:?}", extraction.warnings);
        let model = &extraction.model;
        assert_eq!(
            model.orderlists[0].entries,
            vec![
                OrderlistEntry { transpose: 0xA0, sequence: 0 },
                OrderlistEntry { transpose: 0xA0, sequence: 1 },
            ]
        );
        assert_eq!(model.sequences.len(), 2);
        assert_eq!(model.sequences[0].bytes, vec![0xA0, 0x81, 0x30, 0x7F]);
        assert_eq!(model.sequences[1].bytes, vec![0x83, 0x32, 0x7F]);
    }

    #[test]
    fn instruments_are_read_column_major() {
        let extraction = extract(&laxity_image(), BASE);
        let instrument = extraction.model.instruments[3];
        assert_eq!(instrument.attack_decay(), 0x12);
        assert_eq!(instrument.sustain_release(), 0x34);
        assert_eq!(instrument.wave_pointer(), 0x05);
    }

    #[test]
    fn wave_columns_stay_parallel() {
        let extraction = extract(&laxity_image(), BASE);
        assert_eq!(extraction.model.wave.forms[0], 0x41);
        assert_eq!(extraction.model.wave.notes[0], 0xA0);
    }

    #[test]
    fn tables_stop_at_terminator() {
        let extraction = extract(&laxity_image(), BASE);
        assert_eq!(extraction.model.pulse.entries.len(), 1);
        assert_eq!(extraction.model.filter.entries.len(), 2);
        assert_eq!(extraction.model.commands.entries.len(), 1);
    }

    #[test]
    fn memory_map_classifies_code_and_data() {
        let extraction = extract(&laxity_image(), BASE);
        let map = &extraction.memory_map;
        assert_eq!(map.kind_at(BASE + 0x100), Some(RegionKind::PlayerCode));
        assert_eq!(
            map.kind_at(BASE + ORDERLISTS_OFFSET),
            Some(RegionKind::Orderlists)
        );
        assert_eq!(
            map.kind_at(BASE + WAVE_FORMS_OFFSET),
            Some(RegionKind::WaveTable)
        );
        assert_eq!(map.kind_at(BASE + 0x1F00), Some(RegionKind::Sequences));
    }

    #[test]
    fn null_sequence_pointer_warns_but_extracts() {
        let mut mem = laxity_image();
        // Damage sequence 1's pointer
        mem.write(BASE + SEQ_PTR_LO_OFFSET + 1, 0);
        mem.write(BASE + SEQ_PTR_HI_OFFSET + 1, 0);
        let extraction = extract(&mem, BASE);
        assert_eq!(extraction.model.sequences.len(), 2);
        assert_eq!(extraction.model.sequences[1], Sequence::empty());
        assert!(!extraction.warnings.is_empty());
    }

    #[test]
    fn strict_mode_turns_warnings_into_errors() {
        let extraction = extract(&laxity_image(), BASE);
        assert!(extraction.strict().is_ok());

        let mut mem = laxity_image();
        mem.write(BASE + SEQ_PTR_LO_OFFSET + 1, 0);
        mem.write(BASE + SEQ_PTR_HI_OFFSET + 1, 0);
        let extraction = extract(&mem, BASE);
        assert!(extraction.strict().is_err());
    }

    #[test]
    fn relocated_base_shifts_every_table() {
        let mut mem = MemoryImage::new();
        let base = 0xA000;
        mem.load(base + ORDERLISTS_OFFSET, &[0xA0, 0x00, 0xFF, 0x00]);
        mem.load(base + ORDERLISTS_OFFSET + 4, &[0xFF, 0x00, 0xFF, 0x00]);
        mem.write(base + WAVE_FORMS_OFFSET, 0x21);
        let extraction = extract(&mem, base);
        assert_eq!(extraction.model.wave.forms[0], 0x21);
        assert_eq!(extraction.model.orderlists[0].entries.len(), 1);
    }
}
