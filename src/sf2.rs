// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Reader and writer for the SID Factory II container format.
//!
//! An SF2 file is a C64 PRG: a two-byte little-endian load address followed
//! by a memory image. At the load address sits the magic word 0x1337, then a
//! sequence of `[id][size][payload]` header blocks terminated by id 0xFF,
//! then driver code and music data. All addresses in the header blocks are
//! absolute; the image owns the bytes and every block is just a view into it.

use crate::error::{Error, Result};
use crate::model::{Orderlist, Sequence, SEQ_END};
use std::fs;
use std::path::Path;

/// Magic word stored at the load address.
pub const SF2_MAGIC: u16 = 0x1337;

/// Header block IDs.
pub const BLOCK_DESCRIPTOR: u8 = 1;
pub const BLOCK_DRIVER_COMMON: u8 = 2;
pub const BLOCK_DRIVER_TABLES: u8 = 3;
pub const BLOCK_INSTRUMENT_DESCRIPTOR: u8 = 4;
pub const BLOCK_MUSIC_DATA: u8 = 5;
pub const BLOCK_END: u8 = 0xFF;

/// Table type bytes inside the DriverTables block.
pub const TABLE_GENERIC: u8 = 0x00;
pub const TABLE_INSTRUMENTS: u8 = 0x80;
pub const TABLE_COMMANDS: u8 = 0x81;

/// Driver type bytes in the descriptor.
pub const DRIVER_TYPE_GENERIC: u8 = 0x0B;
pub const DRIVER_TYPE_LAXITY_WRAP: u8 = 0x4C;

/// Descriptor block: which driver this file carries and where its code sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub driver_type: u8,
    pub driver_size: u16,
    pub name: String,
    pub code_top: u16,
    pub code_size: u16,
    pub version_major: u8,
    pub version_minor: u8,
    pub revision: Option<u8>,
}

impl Descriptor {
    fn parse(reader: &mut Reader) -> Result<Self> {
        Ok(Self {
            driver_type: reader.byte()?,
            driver_size: reader.word()?,
            name: reader.cstr()?,
            code_top: reader.word()?,
            code_size: reader.word()?,
            version_major: reader.byte()?,
            version_minor: reader.byte()?,
            revision: reader.optional_byte(),
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = vec![self.driver_type];
        out.extend_from_slice(&self.driver_size.to_le_bytes());
        push_cstr(&mut out, &self.name);
        out.extend_from_slice(&self.code_top.to_le_bytes());
        out.extend_from_slice(&self.code_size.to_le_bytes());
        out.push(self.version_major);
        out.push(self.version_minor);
        if let Some(revision) = self.revision {
            out.push(revision);
        }
        out
    }
}

/// DriverCommon block: entry points and the driver's workspace addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverCommon {
    pub init: u16,
    pub stop: u16,
    pub update: u16,
    pub channel_offset: u16,
    pub driver_state: u16,
    pub tick_counter: u16,
    pub orderlist_index: u16,
    pub sequence_index: u16,
    pub sequence_in_use: u16,
    pub current_sequence: u16,
    pub current_transpose: u16,
    pub event_duration: u16,
    pub next_instrument: u16,
    pub next_command: u16,
    pub next_note: u16,
    pub tie_note_flag: u16,
    pub tempo_counter: u16,
    pub trigger_sync: u16,
    pub note_event_sync: u8,
    pub reserved: [u8; 2],
}

impl DriverCommon {
    fn parse(reader: &mut Reader) -> Result<Self> {
        Ok(Self {
            init: reader.word()?,
            stop: reader.word()?,
            update: reader.word()?,
            channel_offset: reader.word()?,
            driver_state: reader.word()?,
            tick_counter: reader.word()?,
            orderlist_index: reader.word()?,
            sequence_index: reader.word()?,
            sequence_in_use: reader.word()?,
            current_sequence: reader.word()?,
            current_transpose: reader.word()?,
            event_duration: reader.word()?,
            next_instrument: reader.word()?,
            next_command: reader.word()?,
            next_note: reader.word()?,
            tie_note_flag: reader.word()?,
            tempo_counter: reader.word()?,
            trigger_sync: reader.word()?,
            note_event_sync: reader.byte()?,
            reserved: [reader.byte()?, reader.byte()?],
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let words = [
            self.init,
            self.stop,
            self.update,
            self.channel_offset,
            self.driver_state,
            self.tick_counter,
            self.orderlist_index,
            self.sequence_index,
            self.sequence_in_use,
            self.current_sequence,
            self.current_transpose,
            self.event_duration,
            self.next_instrument,
            self.next_command,
            self.next_note,
            self.tie_note_flag,
            self.tempo_counter,
            self.trigger_sync,
        ];
        let mut out = Vec::with_capacity(words.len() * 2 + 3);
        for word in words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.push(self.note_event_sync);
        out.extend_from_slice(&self.reserved);
        out
    }
}

/// One table definition inside the DriverTables block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub table_type: u8,
    pub id: u8,
    pub name: String,
    /// 0 = row-major, 1 = column-major
    pub layout: u8,
    /// bit 0 insert/delete enabled, bit 1 layout-vertically,
    /// bit 2 index-as-continuous
    pub properties: u8,
    pub rule_insert_delete: u8,
    pub rule_enter: u8,
    pub rule_color: u8,
    pub address: u16,
    pub columns: u16,
    pub rows: u16,
    pub visible_rows: u8,
}

impl TableDefinition {
    fn parse(reader: &mut Reader, table_type: u8) -> Result<Self> {
        let id = reader.byte()?;
        let _text_size = reader.byte()?;
        Ok(Self {
            table_type,
            id,
            name: reader.cstr()?,
            layout: reader.byte()?,
            properties: reader.byte()?,
            rule_insert_delete: reader.byte()?,
            rule_enter: reader.byte()?,
            rule_color: reader.byte()?,
            address: reader.word()?,
            columns: reader.word()?,
            rows: reader.word()?,
            visible_rows: reader.byte()?,
        })
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        out.push(self.table_type);
        out.push(self.id);
        out.push(self.name.len() as u8 + 1);
        push_cstr(out, &self.name);
        out.push(self.layout);
        out.push(self.properties);
        out.push(self.rule_insert_delete);
        out.push(self.rule_enter);
        out.push(self.rule_color);
        out.extend_from_slice(&self.address.to_le_bytes());
        out.extend_from_slice(&self.columns.to_le_bytes());
        out.extend_from_slice(&self.rows.to_le_bytes());
        out.push(self.visible_rows);
    }

    /// Bytes the table occupies in the image.
    pub const fn byte_size(&self) -> u32 {
        self.columns as u32 * self.rows as u32
    }
}

/// Serializes the DriverTables payload (definitions plus 0xFF terminator).
pub fn tables_payload(tables: &[TableDefinition]) -> Vec<u8> {
    let mut out = Vec::new();
    for table in tables {
        table.serialize(&mut out);
    }
    out.push(BLOCK_END);
    out
}

/// InstrumentDescriptor block: display names for the instrument columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstrumentDescriptor {
    pub cell_names: Vec<String>,
}

impl InstrumentDescriptor {
    fn parse(reader: &mut Reader) -> Result<Self> {
        let count = reader.byte()?;
        let mut cell_names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            cell_names.push(reader.cstr()?);
        }
        Ok(Self { cell_names })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = vec![self.cell_names.len() as u8];
        for name in &self.cell_names {
            push_cstr(&mut out, name);
        }
        out
    }
}

/// MusicData block: where tracks, orderlists and sequences live. Every
/// per-track and per-sequence address is a fixed stride from the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MusicData {
    pub track_count: u8,
    pub track_orderlist_ptrs_lo: u16,
    pub track_orderlist_ptrs_hi: u16,
    pub sequence_count: u8,
    pub sequence_ptrs_lo: u16,
    pub sequence_ptrs_hi: u16,
    pub orderlist_size: u16,
    pub orderlist0: u16,
    pub sequence_size: u16,
    pub sequence0: u16,
}

impl MusicData {
    fn parse(reader: &mut Reader) -> Result<Self> {
        Ok(Self {
            track_count: reader.byte()?,
            track_orderlist_ptrs_lo: reader.word()?,
            track_orderlist_ptrs_hi: reader.word()?,
            sequence_count: reader.byte()?,
            sequence_ptrs_lo: reader.word()?,
            sequence_ptrs_hi: reader.word()?,
            orderlist_size: reader.word()?,
            orderlist0: reader.word()?,
            sequence_size: reader.word()?,
            sequence0: reader.word()?,
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = vec![self.track_count];
        out.extend_from_slice(&self.track_orderlist_ptrs_lo.to_le_bytes());
        out.extend_from_slice(&self.track_orderlist_ptrs_hi.to_le_bytes());
        out.push(self.sequence_count);
        out.extend_from_slice(&self.sequence_ptrs_lo.to_le_bytes());
        out.extend_from_slice(&self.sequence_ptrs_hi.to_le_bytes());
        out.extend_from_slice(&self.orderlist_size.to_le_bytes());
        out.extend_from_slice(&self.orderlist0.to_le_bytes());
        out.extend_from_slice(&self.sequence_size.to_le_bytes());
        out.extend_from_slice(&self.sequence0.to_le_bytes());
        out
    }

    /// Address of track `t`'s orderlist.
    pub const fn orderlist_address(&self, track: u8) -> u16 {
        self.orderlist0
            .wrapping_add(self.orderlist_size.wrapping_mul(track as u16))
    }

    /// Address of sequence `i`.
    pub const fn sequence_address(&self, index: u8) -> u16 {
        self.sequence0
            .wrapping_add(self.sequence_size.wrapping_mul(index as u16))
    }
}

/// A header block this codec does not interpret; kept so a roundtrip does
/// not lose it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBlock {
    pub id: u8,
    pub payload: Vec<u8>,
}

/// A parsed SF2 file. The image owns all bytes; the block structs are
/// interpretations of it. `write` re-emits the image verbatim, so a
/// parse/write cycle is byte-exact.
#[derive(Debug, Clone)]
pub struct Sf2File {
    pub load_address: u16,
    pub image: Vec<u8>,
    pub descriptor: Descriptor,
    pub driver_common: DriverCommon,
    pub tables: Vec<TableDefinition>,
    pub instrument_descriptor: InstrumentDescriptor,
    pub music_data: MusicData,
    pub unknown_blocks: Vec<UnknownBlock>,
    /// Image offset just past the 0xFF block terminator
    pub header_end: usize,
}

impl Sf2File {
    /// Loads and parses an SF2 file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::parse(&bytes)
    }

    /// Parses an SF2 PRG from a byte slice.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::format(0, "a PRG with load address and magic"));
        }
        let load_address = u16::from_le_bytes([bytes[0], bytes[1]]);
        let image = bytes[2..].to_vec();

        let magic = u16::from_le_bytes([image[0], image[1]]);
        if magic != SF2_MAGIC {
            return Err(Error::format(
                2,
                format!("magic {SF2_MAGIC:#06x}, got {magic:#06x}"),
            ));
        }

        let mut descriptor = None;
        let mut driver_common = None;
        let mut tables = None;
        let mut instrument_descriptor = None;
        let mut music_data = None;
        let mut unknown_blocks = Vec::new();

        let mut offset = 2usize;
        let header_end = loop {
            let Some(&id) = image.get(offset) else {
                return Err(Error::format(offset + 2, "block id before end of image"));
            };
            if id == BLOCK_END {
                break offset + 1;
            }
            let Some(&size) = image.get(offset + 1) else {
                return Err(Error::format(offset + 3, "block size byte"));
            };
            let payload_start = offset + 2;
            let payload_end = payload_start + size as usize;
            if payload_end > image.len() {
                return Err(Error::format(
                    payload_start + 2,
                    format!("{size}-byte payload for block {id}"),
                ));
            }
            let mut reader = Reader::new(&image[payload_start..payload_end], payload_start + 2);
            match id {
                BLOCK_DESCRIPTOR => {
                    set_once(&mut descriptor, Descriptor::parse(&mut reader)?, id)?;
                }
                BLOCK_DRIVER_COMMON => {
                    set_once(&mut driver_common, DriverCommon::parse(&mut reader)?, id)?;
                }
                BLOCK_DRIVER_TABLES => {
                    let mut defs = Vec::new();
                    loop {
                        let table_type = reader.byte()?;
                        if table_type == BLOCK_END {
                            break;
                        }
                        defs.push(TableDefinition::parse(&mut reader, table_type)?);
                    }
                    set_once(&mut tables, defs, id)?;
                }
                BLOCK_INSTRUMENT_DESCRIPTOR => {
                    set_once(
                        &mut instrument_descriptor,
                        InstrumentDescriptor::parse(&mut reader)?,
                        id,
                    )?;
                }
                BLOCK_MUSIC_DATA => {
                    set_once(&mut music_data, MusicData::parse(&mut reader)?, id)?;
                }
                _ => unknown_blocks.push(UnknownBlock {
                    id,
                    payload: image[payload_start..payload_end].to_vec(),
                }),
            }
            offset = payload_end;
        };

        let missing = |name: &str| Error::Validation(format!("required block {name} missing"));
        let file = Self {
            load_address,
            image,
            descriptor: descriptor.ok_or_else(|| missing("Descriptor"))?,
            driver_common: driver_common.ok_or_else(|| missing("DriverCommon"))?,
            tables: tables.ok_or_else(|| missing("DriverTables"))?,
            instrument_descriptor: instrument_descriptor
                .ok_or_else(|| missing("DriverInstrumentDescriptor"))?,
            music_data: music_data.ok_or_else(|| missing("MusicData"))?,
            unknown_blocks,
            header_end,
        };
        file.validate()?;
        Ok(file)
    }

    /// Serializes as a PRG. The image is emitted verbatim.
    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.image.len() + 2);
        out.extend_from_slice(&self.load_address.to_le_bytes());
        out.extend_from_slice(&self.image);
        out
    }

    /// Saves to disk.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.write())?;
        Ok(())
    }

    // --- views into the image ----------------------------------------------

    /// End of the image in address space.
    pub fn end_address(&self) -> u32 {
        u32::from(self.load_address) + self.image.len() as u32
    }

    fn contains(&self, address: u16) -> bool {
        address >= self.load_address && u32::from(address) < self.end_address()
    }

    /// Reads one image byte by absolute address.
    pub fn peek(&self, address: u16) -> u8 {
        self.image[(address - self.load_address) as usize]
    }

    /// Writes one image byte by absolute address.
    pub fn poke(&mut self, address: u16, value: u8) {
        self.image[(address - self.load_address) as usize] = value;
    }

    /// The instruments table definition (validated to exist).
    pub fn instruments_table(&self) -> &TableDefinition {
        self.tables
            .iter()
            .find(|t| t.table_type == TABLE_INSTRUMENTS)
            .expect("validated on parse")
    }

    /// The commands table definition (validated to exist).
    pub fn commands_table(&self) -> &TableDefinition {
        self.tables
            .iter()
            .find(|t| t.table_type == TABLE_COMMANDS)
            .expect("validated on parse")
    }

    fn image_range(&self, address: u16, len: u16, what: &str) -> Result<(usize, usize)> {
        let start = address
            .checked_sub(self.load_address)
            .map(usize::from)
            .filter(|&s| s < self.image.len())
            .ok_or_else(|| {
                Error::Validation(format!("{what} address {address:#06x} outside the image"))
            })?;
        Ok((start, (start + len as usize).min(self.image.len())))
    }

    /// Parses track `t`'s orderlist out of the image.
    pub fn orderlist(&self, track: u8) -> Result<Orderlist> {
        let address = self.music_data.orderlist_address(track);
        let (start, end) =
            self.image_range(address, self.music_data.orderlist_size, "orderlist")?;
        Orderlist::parse(&self.image[start..end])
    }

    /// Parses sequence `i` out of the image.
    pub fn sequence(&self, index: u8) -> Result<Sequence> {
        let address = self.music_data.sequence_address(index);
        let (start, end) =
            self.image_range(address, self.music_data.sequence_size, "sequence")?;
        let slice = &self.image[start..end];
        let term = slice
            .iter()
            .position(|&b| b == SEQ_END)
            .ok_or_else(|| Error::Validation(format!("sequence {index} lacks a terminator")))?;
        Sequence::from_bytes(slice[..=term].to_vec())
    }

    /// Highest sequence index referenced by any track's orderlist.
    pub fn max_used_sequence(&self) -> Result<u8> {
        let mut max = 0;
        for track in 0..self.music_data.track_count {
            if let Some(seq) = self.orderlist(track)?.max_sequence() {
                max = max.max(seq);
            }
        }
        Ok(max)
    }

    /// Rewrites the sequence pointer tables from the MusicData strides.
    /// Must run after any edit that moved or resized sequence usage.
    pub fn regenerate_sequence_pointers(&mut self) {
        let md = self.music_data;
        for index in 0..md.sequence_count {
            let address = md.sequence_address(index);
            self.poke(md.sequence_ptrs_lo + u16::from(index), address as u8);
            self.poke(md.sequence_ptrs_hi + u16::from(index), (address >> 8) as u8);
        }
    }

    /// Reads the title/author/released strings from the auxiliary area,
    /// located through the pointer five bytes below the init entry point.
    pub fn metadata(&self) -> Option<(String, String, String)> {
        let pointer_at = self.driver_common.init.checked_sub(5)?;
        if !self.contains(pointer_at) || !self.contains(pointer_at + 1) {
            return None;
        }
        let aux = u16::from_le_bytes([self.peek(pointer_at), self.peek(pointer_at + 1)]);
        if aux == 0 || !self.contains(aux) {
            return None;
        }
        let mut cursor = (aux - self.load_address) as usize;
        let mut strings = Vec::new();
        for _ in 0..3 {
            let end = self.image[cursor..].iter().position(|&b| b == 0)?;
            strings.push(
                self.image[cursor..cursor + end]
                    .iter()
                    .map(|&b| b as char)
                    .collect::<String>(),
            );
            cursor += end + 1;
        }
        let mut iter = strings.into_iter();
        Some((iter.next()?, iter.next()?, iter.next()?))
    }

    // --- validation --------------------------------------------------------

    fn validate(&self) -> Result<()> {
        let instrument_tables = self
            .tables
            .iter()
            .filter(|t| t.table_type == TABLE_INSTRUMENTS)
            .count();
        let command_tables = self
            .tables
            .iter()
            .filter(|t| t.table_type == TABLE_COMMANDS)
            .count();
        if instrument_tables != 1 {
            return Err(Error::Validation(format!(
                "expected exactly one Instruments table, found {instrument_tables}"
            )));
        }
        if command_tables != 1 {
            return Err(Error::Validation(format!(
                "expected exactly one Commands table, found {command_tables}"
            )));
        }

        let mut regions: Vec<(String, u32, u32)> = Vec::new();
        let descriptor = &self.descriptor;
        regions.push((
            "driver code".into(),
            u32::from(descriptor.code_top),
            u32::from(descriptor.code_top) + u32::from(descriptor.code_size),
        ));
        for table in &self.tables {
            regions.push((
                format!("table {:?}", table.name),
                u32::from(table.address),
                u32::from(table.address) + table.byte_size(),
            ));
        }
        let md = &self.music_data;
        regions.push((
            "orderlists".into(),
            u32::from(md.orderlist0),
            u32::from(md.orderlist0)
                + u32::from(md.orderlist_size) * u32::from(md.track_count),
        ));
        // Only the sequences the orderlists reach must fit: editors may
        // truncate the unused tail of the sequence bank on save.
        let used = u32::from(self.max_used_sequence()?) + 1;
        regions.push((
            "sequences".into(),
            u32::from(md.sequence0),
            u32::from(md.sequence0) + u32::from(md.sequence_size) * used,
        ));
        // Pointer table arrays live in the image too
        for (name, base) in [
            ("track orderlist pointers (lo)", md.track_orderlist_ptrs_lo),
            ("track orderlist pointers (hi)", md.track_orderlist_ptrs_hi),
        ] {
            regions.push((
                name.into(),
                u32::from(base),
                u32::from(base) + u32::from(md.track_count),
            ));
        }
        for (name, base) in [
            ("sequence pointers (lo)", md.sequence_ptrs_lo),
            ("sequence pointers (hi)", md.sequence_ptrs_hi),
        ] {
            regions.push((
                name.into(),
                u32::from(base),
                u32::from(base) + u32::from(md.sequence_count),
            ));
        }

        let load = u32::from(self.load_address);
        let end = self.end_address();
        for (name, start, stop) in &regions {
            if *start < load || *stop > end {
                return Err(Error::Validation(format!(
                    "{name} spans {start:#06x}-{stop:#06x}, outside the image \
                     ({load:#06x}-{end:#06x})"
                )));
            }
        }
        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                if a.1 < b.2 && b.1 < a.2 {
                    return Err(Error::Validation(format!(
                        "{} overlaps {} at {:#06x}",
                        a.0,
                        b.0,
                        a.1.max(b.1)
                    )));
                }
            }
        }

        // Pointer tables must agree with the strides
        for track in 0..md.track_count {
            let expected = md.orderlist_address(track);
            let stored = u16::from_le_bytes([
                self.peek(md.track_orderlist_ptrs_lo + u16::from(track)),
                self.peek(md.track_orderlist_ptrs_hi + u16::from(track)),
            ]);
            if stored != expected {
                return Err(Error::Validation(format!(
                    "track {track} orderlist pointer {stored:#06x} disagrees with \
                     stride address {expected:#06x}"
                )));
            }
        }
        for index in 0..md.sequence_count {
            let expected = md.sequence_address(index);
            let stored = u16::from_le_bytes([
                self.peek(md.sequence_ptrs_lo + u16::from(index)),
                self.peek(md.sequence_ptrs_hi + u16::from(index)),
            ]);
            if stored != expected {
                return Err(Error::Validation(format!(
                    "sequence {index} pointer {stored:#06x} disagrees with stride \
                     address {expected:#06x}"
                )));
            }
        }
        Ok(())
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, id: u8) -> Result<()> {
    if slot.is_some() {
        return Err(Error::Validation(format!("duplicate header block {id}")));
    }
    *slot = Some(value);
    Ok(())
}

fn push_cstr(out: &mut Vec<u8>, text: &str) {
    out.extend(text.chars().map(|c| if (c as u32) < 256 { c as u8 } else { b'?' }));
    out.push(0);
}

/// Serializes the five required blocks plus the end marker.
pub fn header_bytes(
    descriptor: &Descriptor,
    driver_common: &DriverCommon,
    tables: &[TableDefinition],
    instrument_descriptor: &InstrumentDescriptor,
    music_data: &MusicData,
) -> Vec<u8> {
    let mut out = Vec::new();
    for (id, payload) in [
        (BLOCK_DESCRIPTOR, descriptor.to_payload()),
        (BLOCK_DRIVER_COMMON, driver_common.to_payload()),
        (BLOCK_DRIVER_TABLES, tables_payload(tables)),
        (
            BLOCK_INSTRUMENT_DESCRIPTOR,
            instrument_descriptor.to_payload(),
        ),
        (BLOCK_MUSIC_DATA, music_data.to_payload()),
    ] {
        debug_assert!(payload.len() <= u8::MAX as usize);
        out.push(id);
        out.push(payload.len() as u8);
        out.extend_from_slice(&payload);
    }
    out.push(BLOCK_END);
    out
}

/// Bounds-checked cursor over a block payload, reporting file offsets in
/// its errors.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    file_offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], file_offset: usize) -> Self {
        Self {
            bytes,
            pos: 0,
            file_offset,
        }
    }

    fn byte(&mut self) -> Result<u8> {
        let value = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| Error::format(self.file_offset + self.pos, "one more byte"))?;
        self.pos += 1;
        Ok(value)
    }

    fn optional_byte(&mut self) -> Option<u8> {
        let value = self.bytes.get(self.pos).copied();
        self.pos += 1;
        value
    }

    fn word(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes([self.byte()?, self.byte()?]))
    }

    fn cstr(&mut self) -> Result<String> {
        let start = self.pos;
        let end = self.bytes[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::format(self.file_offset + start, "NUL-terminated string"))?;
        self.pos = start + end + 1;
        Ok(self.bytes[start..start + end]
            .iter()
            .map(|&b| b as char)
            .collect())
    }
}
