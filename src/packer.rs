// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Extract-and-wrap packing: embeds an original player's machine code in an
//! SF2 image, and turns SF2 files back into playable PSIDs.
//!
//! The wrap keeps the player's own semantics instead of translating them to
//! a generic driver: the code block (plus its constant data) is copied and
//! relocated wholesale, and only the music tables are moved to the addresses
//! the SF2 editor expects. Two patch classes exist: code operands found by
//! linear disassembly, and data pointers (indirect-jump vectors, pointer
//! tables) which are never inferred from a code scan alone.

use crate::cpu::{Mnemonic, Mode};
use crate::disasm::Disassembler;
use crate::error::{Error, Result};
use crate::laxity::{self, Extraction};
use crate::memory::MemoryImage;
use crate::model::{MAX_COMMANDS, MAX_FILTER_ENTRIES, MAX_INSTRUMENTS, MAX_PULSE_ENTRIES, SEQ_END};
use crate::sf2::{
    header_bytes, Descriptor, DriverCommon, InstrumentDescriptor, MusicData, Sf2File,
    TableDefinition, DRIVER_TYPE_LAXITY_WRAP, SF2_MAGIC, TABLE_COMMANDS, TABLE_GENERIC,
    TABLE_INSTRUMENTS,
};
use crate::sid_file::SidFile;
use log::{info, warn};

// Memory map of the wrapped SF2 image. The wrapper stub and the player
// block sit low; music data follows the relocated player so that nothing
// overlaps and the editor's stride rules hold.
pub const SF2_LOAD: u16 = 0x0C00;
const BLOCKS_START: u16 = 0x0C02;
/// Auxiliary-area pointer, by convention five bytes below the init entry.
const AUX_POINTER: u16 = WRAPPER_INIT - 5;
pub const WRAPPER_INIT: u16 = 0x0D7E;
pub const WRAPPER_PLAY: u16 = 0x0D81;
pub const WRAPPER_STOP: u16 = 0x0D84;
/// The relocated player block starts here.
pub const PLAYER_BASE: u16 = 0x0E00;
/// Bytes copied from the original player: code plus its constant data,
/// everything below the wave table.
const PLAYER_MODULE_SIZE: u16 = laxity::WAVE_FORMS_OFFSET;
pub const ORDERLISTS_BASE: u16 = 0x2500;
pub const ORDERLIST_SIZE: u16 = 0x0100;
pub const FILTER_BASE: u16 = 0x2800;
pub const PULSE_BASE: u16 = 0x2880;
pub const INSTRUMENTS_BASE: u16 = 0x2980;
pub const COMMANDS_BASE: u16 = 0x2A80;
pub const WAVE_FORMS_BASE: u16 = 0x2B40;
/// Must stay exactly 128 bytes above the forms: the de-interleaved layout
/// the wrapped player is patched to read.
pub const WAVE_NOTES_BASE: u16 = WAVE_FORMS_BASE + 0x80;
const TRACK_PTR_LO: u16 = 0x2C40;
const TRACK_PTR_HI: u16 = 0x2C44;
const SEQ_PTR_LO: u16 = 0x2C50;
const SEQ_PTR_HI: u16 = 0x2CD0;
const AUX_BASE: u16 = 0x2D50;
pub const SEQUENCES_BASE: u16 = 0x2E00;
pub const SEQUENCE_SIZE: u16 = 0x0100;
pub const SEQUENCE_COUNT: u8 = 128;
const IMAGE_END: u32 = SEQUENCES_BASE as u32 + SEQUENCE_COUNT as u32 * SEQUENCE_SIZE as u32;

/// How a patched location was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// Absolute operand of an instruction, found by linear disassembly
    CodeOperand,
    /// A 16-bit pointer stored in data (e.g. an indirect-jump vector)
    DataPointer,
}

/// One applied relocation patch, for the log.
#[derive(Debug, Clone, Copy)]
pub struct Patch {
    /// Address of the patched word in the output image
    pub site: u16,
    pub old: u16,
    pub new: u16,
    pub kind: PatchKind,
}

/// Result of wrapping: the SF2 file plus the full patch log.
#[derive(Debug)]
pub struct WrapOutput {
    pub sf2: Sf2File,
    pub patches: Vec<Patch>,
}

/// Address translation from the original player's memory map into the
/// wrapped image. Built per extraction; `None` means "leave untouched"
/// (hardware registers, zero page, anything outside the player).
struct AddressMap {
    base: u16,
    delta: i32,
    orderlist_ranges: [(u16, u16); 3],
    sequence_ranges: Vec<(u16, u16)>,
}

impl AddressMap {
    fn new(extraction: &Extraction) -> Self {
        let base = extraction.base;
        let mut orderlist_ranges = [(0u16, 0u16); 3];
        for voice in 0..3 {
            let start = extraction.orderlist_addresses[voice];
            let end = start
                + extraction.model.orderlists[voice].entries.len() as u16 * 2
                + 2;
            orderlist_ranges[voice] = (start, end);
        }
        let sequence_ranges = extraction
            .sequence_addresses
            .iter()
            .zip(&extraction.model.sequences)
            .map(|(&start, seq)| (start, start.wrapping_add(seq.bytes.len() as u16)))
            .collect();
        Self {
            base,
            delta: i32::from(PLAYER_BASE) - i32::from(base),
            orderlist_ranges,
            sequence_ranges,
        }
    }

    /// Maps an address from the source image to the wrapped image.
    fn map(&self, address: u16) -> Option<u16> {
        let rel = address.wrapping_sub(self.base);
        // The copied block: code and constant data move together
        if address >= self.base && rel < PLAYER_MODULE_SIZE {
            return Some((i32::from(address) + self.delta) as u16);
        }
        for (voice, (start, end)) in self.orderlist_ranges.iter().enumerate() {
            if (*start..*end).contains(&address) {
                return Some(ORDERLISTS_BASE + voice as u16 * ORDERLIST_SIZE + (address - start));
            }
        }
        for (index, (start, end)) in self.sequence_ranges.iter().enumerate() {
            if (*start..*end).contains(&address) {
                return Some(SEQUENCES_BASE + index as u16 * SEQUENCE_SIZE + (address - start));
            }
        }
        // Fixed-offset tables; the wave columns are checked notes-first
        // since the source columns sit only 0x32 bytes apart.
        let table_map: [(u16, u16, u16); 7] = [
            (laxity::WAVE_NOTES_OFFSET, 0x80, WAVE_NOTES_BASE),
            (laxity::WAVE_FORMS_OFFSET, 0x80, WAVE_FORMS_BASE),
            (laxity::SEQ_PTR_LO_OFFSET, 0x80, SEQ_PTR_LO),
            (laxity::SEQ_PTR_HI_OFFSET, 0x80, SEQ_PTR_HI),
            (laxity::COMMANDS_OFFSET, (MAX_COMMANDS * 3) as u16, COMMANDS_BASE),
            (laxity::FILTER_OFFSET, (MAX_FILTER_ENTRIES * 4) as u16, FILTER_BASE),
            (laxity::PULSE_OFFSET, (MAX_PULSE_ENTRIES * 4) as u16, PULSE_BASE),
        ];
        for (offset, len, new_base) in table_map {
            if rel >= offset && rel < offset + len {
                return Some(new_base + (rel - offset));
            }
        }
        let instr_len = (MAX_INSTRUMENTS * 8) as u16;
        if rel >= laxity::INSTRUMENTS_OFFSET && rel < laxity::INSTRUMENTS_OFFSET + instr_len {
            return Some(INSTRUMENTS_BASE + (rel - laxity::INSTRUMENTS_OFFSET));
        }
        None
    }

    /// True if the address belongs to the original player's footprint, i.e.
    /// leaving it unpatched would be a stale reference.
    fn inside_player(&self, address: u16) -> bool {
        let module_end = u32::from(self.base) + 0x2000;
        (u32::from(address)) >= u32::from(self.base) && u32::from(address) < module_end
    }
}

/// Wraps an extracted Laxity player into an SF2 image.
pub fn wrap_laxity(sid: &SidFile, extraction: &Extraction) -> Result<WrapOutput> {
    let source = MemoryImage::from_sid(sid);
    let map = AddressMap::new(extraction);
    let mut image = vec![0u8; (IMAGE_END - u32::from(SF2_LOAD)) as usize];
    let at = |address: u16| (address - SF2_LOAD) as usize;

    // 1. Copy the player block (code + constant data) to its new base.
    let module = source.slice(extraction.base, PLAYER_MODULE_SIZE as usize);
    image[at(PLAYER_BASE)..at(PLAYER_BASE) + module.len()].copy_from_slice(module);

    // 2. Relocate: walk the code linearly and rewrite absolute operands.
    let mut patches = Vec::new();
    let code_len = laxity::PLAYER_CODE_SIZE as usize;
    let instructions: Vec<_> =
        Disassembler::new(&image[at(PLAYER_BASE)..at(PLAYER_BASE) + code_len], PLAYER_BASE)
            .collect();
    for ins in instructions {
        let Some(old_target) = ins.absolute_operand() else {
            continue;
        };
        let Some(new_target) = map.map(old_target) else {
            if map.inside_player(old_target) {
                return Err(Error::Relocation {
                    address: ins.address.wrapping_add(1),
                    target: u32::from(old_target),
                });
            }
            continue; // hardware register or other external address
        };
        let operand_at = at(ins.address.wrapping_add(1));
        image[operand_at..operand_at + 2].copy_from_slice(&new_target.to_le_bytes());
        patches.push(Patch {
            site: ins.address.wrapping_add(1),
            old: old_target,
            new: new_target,
            kind: PatchKind::CodeOperand,
        });

        // Indirect jumps also carry a data pointer: the vector word stored
        // at the operand address must be retargeted as well.
        let is_indirect_jmp = ins
            .op
            .is_some_and(|op| op.mnemonic == Mnemonic::Jmp && op.mode == Mode::Indirect);
        if is_indirect_jmp {
            // The vector is read from the source image: its new location may
            // sit in a region that has not been injected yet.
            let vector_at = at(new_target);
            let old_vector = source.peek_word(old_target);
            let Some(new_vector) = map.map(old_vector) else {
                return Err(Error::Relocation {
                    address: new_target,
                    target: u32::from(old_vector),
                });
            };
            image[vector_at..vector_at + 2].copy_from_slice(&new_vector.to_le_bytes());
            patches.push(Patch {
                site: new_target,
                old: old_vector,
                new: new_vector,
                kind: PatchKind::DataPointer,
            });
        }
    }
    let data_patches = patches
        .iter()
        .filter(|p| p.kind == PatchKind::DataPointer)
        .count();
    info!(
        "relocated player: {} code-operand patches, {} data-pointer patches",
        patches.len() - data_patches,
        data_patches
    );

    // 3. Wrapper stub: init/play jumps into the relocated player, and a
    // stop routine that silences the SID.
    let init_target = map.map(sid.init_address).ok_or(Error::Relocation {
        address: WRAPPER_INIT,
        target: u32::from(sid.init_address),
    })?;
    let play_target = map.map(sid.play_address).ok_or(Error::Relocation {
        address: WRAPPER_PLAY,
        target: u32::from(sid.play_address),
    })?;
    let stub_at = at(WRAPPER_INIT);
    image[stub_at] = 0x4C;
    image[stub_at + 1..stub_at + 3].copy_from_slice(&init_target.to_le_bytes());
    image[stub_at + 3] = 0x4C;
    image[stub_at + 4..stub_at + 6].copy_from_slice(&play_target.to_le_bytes());
    // stop: LDA #$00, STA $D418, RTS
    image[stub_at + 6..stub_at + 12].copy_from_slice(&[0xA9, 0x00, 0x8D, 0x18, 0xD4, 0x60]);

    // 4. Inject the music tables at the advertised addresses.
    let model = &extraction.model;
    for (voice, orderlist) in model.orderlists.iter().enumerate() {
        let bytes = orderlist.to_bytes()?;
        if bytes.len() > ORDERLIST_SIZE as usize {
            return Err(Error::Validation(format!(
                "voice {voice} orderlist needs {} bytes, slot holds {ORDERLIST_SIZE}",
                bytes.len()
            )));
        }
        let dest = at(ORDERLISTS_BASE + voice as u16 * ORDERLIST_SIZE);
        image[dest..dest + bytes.len()].copy_from_slice(&bytes);
    }
    write_rows(&mut image, at(FILTER_BASE), &model.filter.entries, MAX_FILTER_ENTRIES);
    write_rows(&mut image, at(PULSE_BASE), &model.pulse.entries, MAX_PULSE_ENTRIES);
    write_rows(&mut image, at(COMMANDS_BASE), &model.commands.entries, MAX_COMMANDS);
    // Instruments keep the player's column-major layout
    for (slot, instrument) in model.instruments.iter().enumerate() {
        for (column, &byte) in instrument.0.iter().enumerate() {
            image[at(INSTRUMENTS_BASE) + column * MAX_INSTRUMENTS + slot] = byte;
        }
    }
    // Wave table, de-interleaved: 128 forms then 128 note offsets
    image[at(WAVE_FORMS_BASE)..at(WAVE_FORMS_BASE) + 0x80].copy_from_slice(&model.wave.forms);
    image[at(WAVE_NOTES_BASE)..at(WAVE_NOTES_BASE) + 0x80].copy_from_slice(&model.wave.notes);
    // Sequences: one 256-byte slot each; unused slots hold a bare terminator
    for index in 0..SEQUENCE_COUNT {
        let dest = at(SEQUENCES_BASE + u16::from(index) * SEQUENCE_SIZE);
        match model.sequences.get(index as usize) {
            Some(sequence) => {
                image[dest..dest + sequence.bytes.len()].copy_from_slice(&sequence.bytes)
            }
            None => image[dest] = SEQ_END,
        }
    }
    // Pointer tables per the strides
    for voice in 0..3u16 {
        let address = ORDERLISTS_BASE + voice * ORDERLIST_SIZE;
        image[at(TRACK_PTR_LO) + voice as usize] = address as u8;
        image[at(TRACK_PTR_HI) + voice as usize] = (address >> 8) as u8;
    }
    for index in 0..u16::from(SEQUENCE_COUNT) {
        let address = SEQUENCES_BASE + index * SEQUENCE_SIZE;
        image[at(SEQ_PTR_LO) + index as usize] = address as u8;
        image[at(SEQ_PTR_HI) + index as usize] = (address >> 8) as u8;
    }

    // 5. Auxiliary metadata area, referenced five bytes below init.
    let mut aux = Vec::new();
    for text in [&sid.name, &sid.author, &sid.released] {
        aux.extend(
            text.chars()
                .take(31)
                .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' }),
        );
        aux.push(0);
    }
    image[at(AUX_BASE)..at(AUX_BASE) + aux.len()].copy_from_slice(&aux);
    image[at(AUX_POINTER)..at(AUX_POINTER) + 2].copy_from_slice(&AUX_BASE.to_le_bytes());

    // 6. Header blocks.
    let header = header_bytes(
        &laxity_descriptor(),
        &laxity_driver_common(),
        &laxity_tables(),
        &laxity_instrument_descriptor(),
        &laxity_music_data(),
    );
    let header_room = (AUX_POINTER - BLOCKS_START) as usize;
    if header.len() > header_room {
        return Err(Error::Validation(format!(
            "header blocks need {} bytes, only {header_room} available",
            header.len()
        )));
    }
    image[at(BLOCKS_START)..at(BLOCKS_START) + header.len()].copy_from_slice(&header);
    image[at(SF2_LOAD)..at(SF2_LOAD) + 2].copy_from_slice(&SF2_MAGIC.to_le_bytes());

    // 7. Re-parse our own output: the codec's validation is the final word.
    let mut prg = SF2_LOAD.to_le_bytes().to_vec();
    prg.extend_from_slice(&image);
    let sf2 = Sf2File::parse(&prg)?;
    Ok(WrapOutput { sf2, patches })
}

/// Writes fixed-width rows, appending a 0xFF terminator when the table is
/// shorter than its region (`row_capacity` rows). A full table needs none.
fn write_rows<const N: usize>(
    image: &mut [u8],
    dest: usize,
    rows: &[[u8; N]],
    row_capacity: usize,
) {
    let mut cursor = dest;
    for row in rows {
        image[cursor..cursor + N].copy_from_slice(row);
        cursor += N;
    }
    if rows.len() < row_capacity {
        image[cursor] = 0xFF;
    }
}

fn laxity_descriptor() -> Descriptor {
    Descriptor {
        driver_type: DRIVER_TYPE_LAXITY_WRAP,
        driver_size: PLAYER_BASE + PLAYER_MODULE_SIZE - WRAPPER_INIT,
        name: "Laxity NewPlayer v21 wrap".into(),
        code_top: WRAPPER_INIT,
        code_size: PLAYER_BASE + PLAYER_MODULE_SIZE - WRAPPER_INIT,
        version_major: 21,
        version_minor: 0,
        revision: None,
    }
}

fn laxity_driver_common() -> DriverCommon {
    // Workspace addresses follow the player's zero-page usage
    DriverCommon {
        init: WRAPPER_INIT,
        stop: WRAPPER_STOP,
        update: WRAPPER_PLAY,
        channel_offset: 0x00F8,
        driver_state: 0x00F9,
        tick_counter: 0x00FA,
        orderlist_index: 0x00FB,
        sequence_index: 0x00FC,
        sequence_in_use: 0x00FD,
        current_sequence: 0x00FE,
        current_transpose: 0x00FF,
        event_duration: 0x00F0,
        next_instrument: 0x00F1,
        next_command: 0x00F2,
        next_note: 0x00F3,
        tie_note_flag: 0x00F4,
        tempo_counter: 0x00F5,
        trigger_sync: 0x00F6,
        note_event_sync: 0x7E,
        reserved: [0, 0],
    }
}

fn laxity_tables() -> Vec<TableDefinition> {
    let table = |table_type, id, name: &str, layout, address, columns, rows, visible| {
        TableDefinition {
            table_type,
            id,
            name: name.into(),
            layout,
            properties: 0x02,
            rule_insert_delete: 0,
            rule_enter: 0,
            rule_color: 0,
            address,
            columns,
            rows,
            visible_rows: visible,
        }
    };
    vec![
        table(TABLE_INSTRUMENTS, 0, "Instruments", 1, INSTRUMENTS_BASE, 8, 32, 16),
        table(TABLE_COMMANDS, 1, "Commands", 0, COMMANDS_BASE, 3, 64, 16),
        table(TABLE_GENERIC, 2, "Wave", 1, WAVE_FORMS_BASE, 2, 128, 16),
        table(TABLE_GENERIC, 3, "Pulse", 0, PULSE_BASE, 4, 64, 16),
        table(TABLE_GENERIC, 4, "Filter", 0, FILTER_BASE, 4, 32, 16),
    ]
}

fn laxity_instrument_descriptor() -> InstrumentDescriptor {
    InstrumentDescriptor {
        cell_names: ["AD", "SR", "Speed", "FX", "FCtl", "Filt", "Pulse", "Wave"]
            .into_iter()
            .map(String::from)
            .collect(),
    }
}

fn laxity_music_data() -> MusicData {
    MusicData {
        track_count: 3,
        track_orderlist_ptrs_lo: TRACK_PTR_LO,
        track_orderlist_ptrs_hi: TRACK_PTR_HI,
        sequence_count: SEQUENCE_COUNT,
        sequence_ptrs_lo: SEQ_PTR_LO,
        sequence_ptrs_hi: SEQ_PTR_HI,
        orderlist_size: ORDERLIST_SIZE,
        orderlist0: ORDERLISTS_BASE,
        sequence_size: SEQUENCE_SIZE,
        sequence0: SEQUENCES_BASE,
    }
}

/// Turns an SF2 file back into a playable PSID.
///
/// The sequence pointer tables are regenerated from the MusicData strides
/// first (mandatory after any sequence edit), then the image is truncated
/// at the end of the last sequence any orderlist references.
pub fn pack_to_sid(sf2: &Sf2File) -> Result<SidFile> {
    let mut sf2 = sf2.clone();
    sf2.regenerate_sequence_pointers();

    let md = sf2.music_data;
    let highest_used = sf2.max_used_sequence()?;
    let music_end = u32::from(md.sequence0)
        + u32::from(md.sequence_size) * (u32::from(highest_used) + 1);
    if music_end > sf2.end_address() {
        return Err(Error::Validation(format!(
            "music data ends at {music_end:#06x}, beyond the image"
        )));
    }

    let (title, author, released) = sf2.metadata().unwrap_or_default();

    let is_wrap = sf2.descriptor.driver_type == DRIVER_TYPE_LAXITY_WRAP;
    if !is_wrap {
        warn!(
            "driver {:#04x} is not a known wrap; emitting with the generic \
             load/load+3 convention",
            sf2.descriptor.driver_type
        );
    }
    let (load_address, init_address, play_address, payload_start) = if is_wrap {
        (
            sf2.load_address,
            sf2.driver_common.init,
            sf2.driver_common.update,
            0usize,
        )
    } else {
        // Generic SF2 drivers expose a jump table at the load address
        let load_address = sf2.load_address;
        (load_address, load_address, load_address + 3, 0usize)
    };

    let payload_end = (music_end - u32::from(sf2.load_address)) as usize;
    let data = sf2.image[payload_start..payload_end].to_vec();

    Ok(SidFile {
        magic: "PSID".into(),
        version: 2,
        data_offset: 0x7C,
        load_address,
        init_address,
        play_address,
        songs: 1,
        start_song: 1,
        speed: 0,
        name: title,
        author,
        released,
        flags: 0,
        data,
    })
}

/// Reinterprets an SF2-originated SID (one whose payload carries the 0x1337
/// magic at its load address) as an SF2 file. This is the fallback for
/// already-packed driver rips.
pub fn sf2_from_packed_sid(sid: &SidFile) -> Result<Sf2File> {
    let mut prg = sid.load_address.to_le_bytes().to_vec();
    prg.extend_from_slice(&sid.data);
    Sf2File::parse(&prg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::laxity::{
        COMMANDS_OFFSET, FILTER_OFFSET, INSTRUMENTS_OFFSET, ORDERLISTS_OFFSET, PULSE_OFFSET,
        SEQ_PTR_HI_OFFSET, SEQ_PTR_LO_OFFSET, WAVE_FORMS_OFFSET, WAVE_NOTES_OFFSET,
    };

    const BASE: u16 = 0x1000;

    /// Assembles a miniature player with the NP21 data layout: init sets the
    /// volume, play reads the wave and orderlist tables through absolute
    /// operands and pokes voice registers.
    fn synthetic_sid() -> SidFile {
        let mut mem = MemoryImage::new();

        // init at BASE: LDA #$0F, STA $D418, RTS
        mem.load(BASE, &[0xA9, 0x0F, 0x8D, 0x18, 0xD4, 0x60]);
        // play at BASE+0x40:
        //   LDX counter ; LDA waveforms,X ; STA $D404
        //   LDA wavenotes,X ; STA $D401
        //   LDA orderlist0 ; STA $D400
        //   INC counter ; JMP (vector)
        let counter = BASE + 0x30;
        let vector = BASE + 0x32;
        let done = BASE + 0x60; // RTS
        let play = vec![
            0xAE, (counter & 0xFF) as u8, (counter >> 8) as u8, // LDX counter
            0xBD, 0xDA, 0x26, // LDA $26DA,X (waveforms, BASE+$16DA)
            0x8D, 0x04, 0xD4, // STA $D404
            0xBD, 0x0C, 0x27, // LDA $270C,X (wavenotes, BASE+$170C)
            0x8D, 0x01, 0xD4, // STA $D401
            0xAD, 0x9F, 0x29, // LDA $299F (voice 0 orderlist)
            0x8D, 0x00, 0xD4, // STA $D400
            0xEE, (counter & 0xFF) as u8, (counter >> 8) as u8, // INC counter
            0x6C, (vector & 0xFF) as u8, (vector >> 8) as u8, // JMP (vector)
        ];
        mem.load(BASE + 0x40, &play);
        mem.load(done, &[0x60]);
        mem.write_word(vector, done);

        // Music data at the canonical offsets.
        mem.load(BASE + ORDERLISTS_OFFSET, &[0xA0, 0x00, 0xFF, 0x00]);
        mem.load(BASE + ORDERLISTS_OFFSET + 4, &[0xA0, 0x00, 0xFF, 0x00]);
        mem.load(BASE + ORDERLISTS_OFFSET + 8, &[0xA0, 0x00, 0xFF, 0x00]);
        let seq0 = BASE + 0x1F00;
        mem.load(seq0, &[0x81, 0x30, SEQ_END]);
        mem.write(BASE + SEQ_PTR_LO_OFFSET, (seq0 & 0xFF) as u8);
        mem.write(BASE + SEQ_PTR_HI_OFFSET, (seq0 >> 8) as u8);
        mem.load(BASE + WAVE_FORMS_OFFSET, &[0x41, 0x40, 0x11]);
        mem.load(BASE + WAVE_NOTES_OFFSET, &[0x00, 0x0C, 0x07]);
        mem.load(BASE + PULSE_OFFSET, &[0x00, 0x08, 0x02, 0x00, 0xFF]);
        mem.load(BASE + FILTER_OFFSET, &[0x22, 0x00, 0x00, 0x00, 0xFF]);
        mem.load(BASE + COMMANDS_OFFSET, &[0x01, 0x10, 0x20, 0xFF]);
        mem.write(BASE + INSTRUMENTS_OFFSET, 0xA9);

        let data = mem.slice(BASE, 0x2000).to_vec();
        SidFile {
            magic: "PSID".into(),
            version: 2,
            data_offset: 0x7C,
            load_address: BASE,
            init_address: BASE,
            play_address: BASE + 0x40,
            songs: 1,
            start_song: 1,
            speed: 0,
            name: "Synthetic".into(),
            author: "Test".into(),
            released: "2026".into(),
            flags: 0,
            data,
        }
    }

    fn wrap(sid: &SidFile) -> WrapOutput {
        let mem = MemoryImage::from_sid(sid);
        let extraction = laxity::extract(&mem, sid.load_address);
        wrap_laxity(sid, &extraction).expect("wrap")
    }

    #[test]
    fn wrapped_sf2_validates_and_carries_magic() {
        let output = wrap(&synthetic_sid());
        let sf2 = &output.sf2;
        assert_eq!(sf2.load_address, SF2_LOAD);
        assert_eq!(
            u16::from_le_bytes([sf2.image[0], sf2.image[1]]),
            SF2_MAGIC
        );
        assert_eq!(sf2.instruments_table().address, INSTRUMENTS_BASE);
        assert_eq!(sf2.commands_table().address, COMMANDS_BASE);
    }

    #[test]
    fn wave_notes_land_128_above_forms() {
        let output = wrap(&synthetic_sid());
        let sf2 = &output.sf2;
        assert_eq!(WAVE_NOTES_BASE, WAVE_FORMS_BASE + 0x80);
        assert_eq!(sf2.peek(WAVE_FORMS_BASE), 0x41);
        assert_eq!(sf2.peek(WAVE_FORMS_BASE + 2), 0x11);
        assert_eq!(sf2.peek(WAVE_NOTES_BASE + 1), 0x0C);
    }

    #[test]
    fn relocation_patches_wave_and_orderlist_operands() {
        let output = wrap(&synthetic_sid());
        let sf2 = &output.sf2;
        // LDA waveforms,X at play+3: operand now points at the new forms base
        let play_new = PLAYER_BASE + 0x40;
        let operand = u16::from_le_bytes([
            sf2.peek(play_new + 4),
            sf2.peek(play_new + 5),
        ]);
        assert_eq!(operand, WAVE_FORMS_BASE);
        let notes_operand = u16::from_le_bytes([
            sf2.peek(play_new + 10),
            sf2.peek(play_new + 11),
        ]);
        assert_eq!(notes_operand, WAVE_NOTES_BASE);
        let orderlist_operand = u16::from_le_bytes([
            sf2.peek(play_new + 16),
            sf2.peek(play_new + 17),
        ]);
        assert_eq!(orderlist_operand, ORDERLISTS_BASE);
    }

    #[test]
    fn indirect_jump_vector_is_a_data_pointer_patch() {
        let output = wrap(&synthetic_sid());
        let data_patches: Vec<_> = output
            .patches
            .iter()
            .filter(|p| p.kind == PatchKind::DataPointer)
            .collect();
        assert_eq!(data_patches.len(), 1);
        // The vector moved with the module and now targets the relocated RTS
        let vector_site = PLAYER_BASE + 0x32;
        assert_eq!(data_patches[0].site, vector_site);
        let stored = u16::from_le_bytes([
            output.sf2.peek(vector_site),
            output.sf2.peek(vector_site + 1),
        ]);
        assert_eq!(stored, PLAYER_BASE + 0x60);
    }

    #[test]
    fn wrapped_player_plays_like_the_original() {
        use crate::capture::Harness;
        let sid = synthetic_sid();
        let original_trace = Harness::init(&sid, 1)
            .expect("init original")
            .run_frames(16)
            .expect("run original");

        let output = wrap(&sid);
        let packed = pack_to_sid(&output.sf2).expect("pack");
        let wrapped_trace = Harness::init(&packed, 1)
            .expect("init wrapped")
            .run_frames(16)
            .expect("run wrapped");

        assert_eq!(original_trace, wrapped_trace);
    }

    #[test]
    fn packed_sid_roundtrips_byte_exact() {
        let output = wrap(&synthetic_sid());
        let sid = pack_to_sid(&output.sf2).expect("pack");
        assert_eq!(sid.load_address, SF2_LOAD);
        assert_eq!(sid.init_address, WRAPPER_INIT);
        assert_eq!(sid.play_address, WRAPPER_PLAY);
        assert_eq!(sid.name, "Synthetic");

        // The payload is itself an SF2 image: reparse and repack
        let reparsed = sf2_from_packed_sid(&sid).expect("reparse");
        let repacked = pack_to_sid(&reparsed).expect("repack");
        assert_eq!(repacked.data, sid.data);
        assert_eq!(repacked.write()[0x7C..], sid.write()[0x7C..]);
    }

    #[test]
    fn generic_driver_packs_with_load_convention() {
        let sf2 = Sf2File::parse(&crate::sf2::tests::small_sf2()).expect("parse");
        let sid = pack_to_sid(&sf2).expect("pack");
        assert_eq!(sid.load_address, sf2.load_address);
        assert_eq!(sid.init_address, sid.load_address);
        assert_eq!(sid.play_address, sid.load_address + 3);
        // Payload runs from the load address to the end of the one used
        // sequence slot; nothing below the driver code is discarded.
        let music_end = sf2.music_data.sequence0 + sf2.music_data.sequence_size;
        assert_eq!(sid.data.len(), (music_end - sf2.load_address) as usize);
        assert_eq!(sid.data[..2], sf2.image[..2]);
    }

    #[test]
    fn truncation_follows_highest_used_sequence() {
        let output = wrap(&synthetic_sid());
        let sid = pack_to_sid(&output.sf2).expect("pack");
        // One used sequence: the image ends one slot past SEQUENCES_BASE
        let expected_len = (SEQUENCES_BASE + SEQUENCE_SIZE - SF2_LOAD) as usize;
        assert_eq!(sid.data.len(), expected_len);
    }

    #[test]
    fn unresolvable_pointer_aborts_the_wrap() {
        let mut sid = synthetic_sid();
        // Point the indirect-jump vector into the unmapped gap past the
        // instrument table: relocation cannot resolve it.
        let vector_offset = 0x32usize;
        let stale = BASE + 0x1F80;
        sid.data[vector_offset] = (stale & 0xFF) as u8;
        sid.data[vector_offset + 1] = (stale >> 8) as u8;
        let mem = MemoryImage::from_sid(&sid);
        let extraction = laxity::extract(&mem, sid.load_address);
        match wrap_laxity(&sid, &extraction) {
            Err(Error::Relocation { target, .. }) => {
                assert_eq!(target, u32::from(stale));
            }
            other => panic!("expected relocation error, got {other:?}"),
        }
    }
}
