// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! Error taxonomy shared by all conversion stages.

use thiserror::Error;

/// Errors produced while converting between SID and SF2.
///
/// The emulator reports `UnknownOpcode` and `BudgetExhausted` as recoverable
/// statuses; its state stays valid and may be inspected afterwards. The SF2
/// reader and the packer abort on the first fatal error. Table extraction
/// problems are downgraded to warnings by the analyzer and only surface here
/// when a caller insists on a strict result.
#[derive(Debug, Error)]
pub enum Error {
    /// Container-level problem: bad magic, unsupported version, truncated
    /// header or block.
    #[error("format error at offset {offset:#06x}: {expected}")]
    Format {
        /// Byte offset of the offending field
        offset: usize,
        /// What was expected there
        expected: String,
    },

    /// A block or table parsed but violates a structural invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// The emulator fetched an opcode it cannot execute (KIL class).
    #[error("unknown opcode {opcode:#04x} at {pc:#06x}")]
    UnknownOpcode {
        /// Program counter at the fetch
        pc: u16,
        /// The offending byte
        opcode: u8,
    },

    /// A routine did not return within its instruction budget.
    #[error("routine {routine:?} did not return within {budget} instructions")]
    BudgetExhausted {
        /// Which routine was being run ("init" or "play")
        routine: &'static str,
        /// The budget that was exhausted
        budget: u32,
    },

    /// A player table failed its structure check.
    #[error("extraction failed for {table} table: {reason}")]
    Extraction {
        /// Table name ("pulse", "filter", ...)
        table: &'static str,
        /// What was wrong
        reason: String,
    },

    /// A code operand or data pointer fell outside the image after relocation.
    #[error("relocation of {address:#06x} targets {target:#06x} outside the image")]
    Relocation {
        /// Address of the operand or pointer being patched
        address: u16,
        /// Where it would point after relocation
        target: u32,
    },

    /// Filesystem error from reading or writing an artifact.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a `Format` error.
    pub fn format(offset: usize, expected: impl Into<String>) -> Self {
        Self::Format {
            offset,
            expected: expected.into(),
        }
    }
}
