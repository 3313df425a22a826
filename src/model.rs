// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! The extracted music model: orderlists, sequences, instruments and the
//! wave/pulse/filter/command tables, together with the packed sequence
//! codec shared by the analyzer and the SF2 writer.

use crate::error::{Error, Result};

/// Terminator byte for packed sequences and orderlists.
pub const SEQ_END: u8 = 0x7F;
/// Note value meaning "close the gate".
pub const NOTE_GATE_OFF: u8 = 0x00;
/// Note value meaning "hold the gate open" (sustain).
pub const NOTE_GATE_ON: u8 = 0x7E;
/// Orderlist terminator.
pub const ORDERLIST_END: u8 = 0xFF;

/// Maximum packed sequence size in bytes, terminator included.
pub const MAX_SEQUENCE_BYTES: usize = 255;
/// Maximum events after unpacking/expansion.
pub const MAX_SEQUENCE_EVENTS: usize = 1024;
/// Maximum orderlist entries, terminator included.
pub const MAX_ORDERLIST_ENTRIES: usize = 256;
/// Instrument slots in the player.
pub const MAX_INSTRUMENTS: usize = 32;
/// Wave table rows (two parallel columns of this many bytes).
pub const WAVE_ENTRIES: usize = 128;
/// Pulse table rows of four bytes each.
pub const MAX_PULSE_ENTRIES: usize = 64;
/// Filter table rows of four bytes each.
pub const MAX_FILTER_ENTRIES: usize = 32;
/// Command table rows of three bytes each.
pub const MAX_COMMANDS: usize = 64;

/// Instrument column of one sequence event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstrumentChange {
    /// Keep the running instrument
    #[default]
    NoChange,
    /// Tie: retrigger-free continuation into the new note
    Tie,
    /// Switch to instrument N
    Set(u8),
}

/// Command column of one sequence event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandChange {
    /// Keep the running command
    #[default]
    NoChange,
    /// Trigger command N
    Set(u8),
}

/// One unpacked sequence row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceEvent {
    pub instrument: InstrumentChange,
    pub command: CommandChange,
    /// Event duration in ticks, 0-15
    pub duration: u8,
    /// Note byte: gate-off 0x00, pitched 0x01.., gate-on/sustain 0x7E
    pub note: u8,
}

/// A packed sequence as stored in player memory and SF2 files, terminator
/// included.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sequence {
    pub bytes: Vec<u8>,
}

impl Sequence {
    /// Wraps raw packed bytes (must already carry the 0x7F terminator).
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() > MAX_SEQUENCE_BYTES {
            return Err(Error::Validation(format!(
                "packed sequence is {} bytes, limit is {MAX_SEQUENCE_BYTES}",
                bytes.len()
            )));
        }
        if bytes.last() != Some(&SEQ_END) {
            return Err(Error::Validation(
                "packed sequence lacks the 0x7F terminator".into(),
            ));
        }
        Ok(Self { bytes })
    }

    /// An empty sequence: just the terminator.
    pub fn empty() -> Self {
        Self {
            bytes: vec![SEQ_END],
        }
    }

    /// Unpacks into events, one per note byte.
    pub fn unpack(&self) -> Result<Vec<SequenceEvent>> {
        unpack_events(&self.bytes)
    }
}

/// Packs events into the canonical byte form.
///
/// Per event, bytes are emitted in the order instrument, command, duration,
/// note; the first three only when they change, the note always. A tie is
/// carried by the 0x90-0x9F duration byte and therefore always re-emits the
/// duration. The result includes the 0x7F terminator and is rejected when it
/// exceeds 255 bytes.
pub fn pack_events(events: &[SequenceEvent]) -> Result<Sequence> {
    let mut bytes = Vec::new();
    let mut running_duration: Option<u8> = None;

    for event in events {
        if event.duration > 0x0F {
            return Err(Error::Validation(format!(
                "event duration {} exceeds 15",
                event.duration
            )));
        }
        match event.instrument {
            InstrumentChange::Set(n) => {
                if n as usize >= MAX_INSTRUMENTS {
                    return Err(Error::Validation(format!("instrument index {n} out of range")));
                }
                bytes.push(0xA0 | n);
            }
            InstrumentChange::Tie | InstrumentChange::NoChange => {}
        }
        if let CommandChange::Set(n) = event.command {
            if n as usize >= MAX_COMMANDS {
                return Err(Error::Validation(format!("command index {n} out of range")));
            }
            bytes.push(0xC0 | n);
        }
        if matches!(event.instrument, InstrumentChange::Tie) {
            bytes.push(0x90 | event.duration);
            running_duration = Some(event.duration);
        } else if running_duration != Some(event.duration) {
            bytes.push(0x80 | event.duration);
            running_duration = Some(event.duration);
        }
        if event.note >= SEQ_END {
            return Err(Error::Validation(format!(
                "note byte {:#04x} collides with the terminator",
                event.note
            )));
        }
        bytes.push(event.note);
    }

    bytes.push(SEQ_END);
    Sequence::from_bytes(bytes)
}

/// Reverses [`pack_events`]. Marker bytes update the pending event; a note
/// byte completes it. Running duration carries across events.
pub fn unpack_events(bytes: &[u8]) -> Result<Vec<SequenceEvent>> {
    let mut events = Vec::new();
    let mut duration = 0u8;
    let mut instrument = InstrumentChange::NoChange;
    let mut command = CommandChange::NoChange;

    for &byte in bytes {
        match byte {
            SEQ_END => return Ok(events),
            0xC0..=0xFF => command = CommandChange::Set(byte & 0x3F),
            0xA0..=0xBF => instrument = InstrumentChange::Set(byte & 0x1F),
            0x90..=0x9F => {
                instrument = InstrumentChange::Tie;
                duration = byte & 0x0F;
            }
            0x80..=0x8F => duration = byte & 0x0F,
            note => {
                events.push(SequenceEvent {
                    instrument,
                    command,
                    duration,
                    note,
                });
                if events.len() > MAX_SEQUENCE_EVENTS {
                    return Err(Error::Validation(format!(
                        "sequence unpacks to more than {MAX_SEQUENCE_EVENTS} events"
                    )));
                }
                instrument = InstrumentChange::NoChange;
                command = CommandChange::NoChange;
            }
        }
    }
    Err(Error::Validation(
        "packed sequence ended without 0x7F terminator".into(),
    ))
}

/// Expands events to an editing grid where every tick is one row: an event
/// of duration `d` is followed by `d-1` synthetic sustain rows carrying
/// gate-on (or gate-off, if the source note was a gate-off) and no-change
/// markers elsewhere.
pub fn expand_sustains(events: &[SequenceEvent]) -> Result<Vec<SequenceEvent>> {
    let mut rows = Vec::new();
    for event in events {
        rows.push(*event);
        let sustain_note = if event.note == NOTE_GATE_OFF {
            NOTE_GATE_OFF
        } else {
            NOTE_GATE_ON
        };
        for _ in 1..event.duration.max(1) {
            rows.push(SequenceEvent {
                instrument: InstrumentChange::NoChange,
                command: CommandChange::NoChange,
                duration: event.duration,
                note: sustain_note,
            });
        }
        if rows.len() > MAX_SEQUENCE_EVENTS {
            return Err(Error::Validation(format!(
                "sequence expands to more than {MAX_SEQUENCE_EVENTS} rows"
            )));
        }
    }
    Ok(rows)
}

/// One orderlist step: play `sequence` transposed by `transpose`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderlistEntry {
    pub transpose: u8,
    pub sequence: u8,
}

/// Per-voice playback order, terminated in binary form by 0xFF plus a loop
/// index pointing back into the list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Orderlist {
    pub entries: Vec<OrderlistEntry>,
    pub loop_index: u8,
}

impl Orderlist {
    /// Parses the binary form: (transpose, sequence) pairs up to the 0xFF
    /// terminator, then one loop-index byte.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut iter = bytes.iter().copied();
        loop {
            let Some(transpose) = iter.next() else {
                return Err(Error::Validation("orderlist lacks 0xFF terminator".into()));
            };
            if transpose == ORDERLIST_END {
                break;
            }
            let Some(sequence) = iter.next() else {
                return Err(Error::Validation("orderlist entry truncated".into()));
            };
            entries.push(OrderlistEntry { transpose, sequence });
            if entries.len() >= MAX_ORDERLIST_ENTRIES {
                return Err(Error::Validation(format!(
                    "orderlist exceeds {MAX_ORDERLIST_ENTRIES} entries"
                )));
            }
        }
        let loop_index = iter.next().unwrap_or(0);
        if !entries.is_empty() && loop_index as usize >= entries.len() {
            return Err(Error::Validation(format!(
                "orderlist loop index {loop_index} outside {} entries",
                entries.len()
            )));
        }
        Ok(Self { entries, loop_index })
    }

    /// Serializes back to the binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.entries.len() + 1 > MAX_ORDERLIST_ENTRIES {
            return Err(Error::Validation(format!(
                "orderlist exceeds {MAX_ORDERLIST_ENTRIES} entries"
            )));
        }
        let mut bytes = Vec::with_capacity(self.entries.len() * 2 + 2);
        for entry in &self.entries {
            if entry.transpose == ORDERLIST_END {
                return Err(Error::Validation(
                    "orderlist transpose 0xFF collides with the terminator".into(),
                ));
            }
            bytes.push(entry.transpose);
            bytes.push(entry.sequence);
        }
        bytes.push(ORDERLIST_END);
        bytes.push(self.loop_index);
        Ok(bytes)
    }

    /// Highest sequence index referenced, if any entry exists.
    pub fn max_sequence(&self) -> Option<u8> {
        self.entries.iter().map(|e| e.sequence).max()
    }
}

/// One instrument: eight bytes in player order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Instrument(pub [u8; 8]);

impl Instrument {
    pub const fn attack_decay(&self) -> u8 {
        self.0[0]
    }
    pub const fn sustain_release(&self) -> u8 {
        self.0[1]
    }
    pub const fn wave_speed(&self) -> u8 {
        self.0[2]
    }
    pub const fn fx(&self) -> u8 {
        self.0[3]
    }
    pub const fn filter_control(&self) -> u8 {
        self.0[4]
    }
    pub const fn filter_pointer(&self) -> u8 {
        self.0[5]
    }
    pub const fn pulse_pointer(&self) -> u8 {
        self.0[6]
    }
    pub const fn wave_pointer(&self) -> u8 {
        self.0[7]
    }
}

/// Wave table: two parallel 128-byte columns, never interleaved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveTable {
    /// Waveform control bytes
    pub forms: [u8; WAVE_ENTRIES],
    /// Note offsets, one per form entry
    pub notes: [u8; WAVE_ENTRIES],
}

impl Default for WaveTable {
    fn default() -> Self {
        Self {
            forms: [0; WAVE_ENTRIES],
            notes: [0; WAVE_ENTRIES],
        }
    }
}

/// Pulse program: rows of (lo, hi, duration, next-index*4), 0xFF-terminated
/// in player memory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PulseTable {
    pub entries: Vec<[u8; 4]>,
}

impl PulseTable {
    /// Structure check: every next-index must be a multiple of four within
    /// the table. Violations are reported, not fatal.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.entries.len() > MAX_PULSE_ENTRIES {
            problems.push(format!(
                "pulse table has {} entries, limit is {MAX_PULSE_ENTRIES}",
                self.entries.len()
            ));
        }
        for (index, entry) in self.entries.iter().enumerate() {
            let next = entry[3];
            if next % 4 != 0 || next as usize > MAX_PULSE_ENTRIES * 4 {
                problems.push(format!(
                    "pulse entry {index} next-index {next:#04x} is not a valid row offset"
                ));
            }
        }
        problems
    }
}

/// Filter program: rows of (cutoff-or-terminator, add, delay, next).
/// The first two bytes of the table carry half-speed system data and are
/// preserved byte-for-byte without interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterTable {
    pub entries: Vec<[u8; 4]>,
}

impl FilterTable {
    /// Structure check: non-terminator rows need a nonzero delay. Row 0 is
    /// exempt, its leading bytes are speed data.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.entries.len() > MAX_FILTER_ENTRIES {
            problems.push(format!(
                "filter table has {} entries, limit is {MAX_FILTER_ENTRIES}",
                self.entries.len()
            ));
        }
        for (index, entry) in self.entries.iter().enumerate().skip(1) {
            if entry[0] != 0xFF && entry[2] == 0 {
                problems.push(format!("filter entry {index} has zero delay"));
            }
        }
        problems
    }
}

/// Command table: rows of (opcode, parameter 1, parameter 2).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandTable {
    pub entries: Vec<[u8; 3]>,
}

/// Everything the analyzer pulls out of a player, in the shape the SF2
/// writer consumes. Owned singly; the writer takes it by value.
#[derive(Debug, Clone, Default)]
pub struct MusicModel {
    pub orderlists: [Orderlist; 3],
    pub sequences: Vec<Sequence>,
    pub instruments: Vec<Instrument>,
    pub wave: WaveTable,
    pub pulse: PulseTable,
    pub filter: FilterTable,
    pub commands: CommandTable,
}

impl MusicModel {
    /// Highest sequence index any orderlist references.
    pub fn max_used_sequence(&self) -> usize {
        self.orderlists
            .iter()
            .filter_map(Orderlist::max_sequence)
            .max()
            .map_or(0, usize::from)
    }
}
