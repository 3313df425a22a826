// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Mikael Lund

//! SidWrap - SID to SID Factory II converter.

#![deny(missing_docs)]

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use sidwrap::capture::{derive_notes, Harness};
use sidwrap::config::Config;
use sidwrap::error::{Error, Result};
use sidwrap::laxity;
use sidwrap::memory::MemoryImage;
use sidwrap::packer;
use sidwrap::pattern::{Player, SignatureDb};
use sidwrap::sf2::Sf2File;
use sidwrap::sid_file::SidFile;
use sidwrap::disasm;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sidwrap", version, about = "SID <-> SID Factory II converter")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Driver selection hint for `convert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Driver {
    /// Pick by signature detection
    Auto,
    /// Force the Laxity NewPlayer v21 extractor
    Laxity,
    /// Treat the input as an already-packed SF2 driver rip
    Driver11,
    /// NewPlayer v20 (detection only)
    Np20,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a SID file to an editable SF2 file
    Convert {
        /// Input .sid path
        input: PathBuf,
        /// Output .sf2 path
        output: PathBuf,
        /// Driver selection hint
        #[arg(short, long)]
        driver: Option<Driver>,
    },
    /// Pack an SF2 file back into a playable SID
    Pack {
        /// Input .sf2 path
        input: PathBuf,
        /// Output .sid path
        output: PathBuf,
    },
    /// Emulate a SID and dump its per-frame register trace
    Dump {
        /// Input .sid path
        input: PathBuf,
        /// Number of 50Hz frames to run
        #[arg(short, long)]
        frames: Option<usize>,
        /// Subtune to play (1-indexed; default from the header)
        #[arg(short, long)]
        subtune: Option<u16>,
        /// Disassemble the payload instead of emulating
        #[arg(long)]
        disasm: bool,
        /// Also print the derived per-voice note streams
        #[arg(long)]
        notes: bool,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::load();
    match args.command {
        Command::Convert {
            input,
            output,
            driver,
        } => {
            let driver = driver.unwrap_or_else(|| driver_from_config(&config));
            convert(&input, &output, driver)
        }
        Command::Pack { input, output } => {
            let sf2 = Sf2File::load(&input)?;
            let sid = packer::pack_to_sid(&sf2)?;
            sid.save(&output)?;
            info!("packed {} -> {}", input.display(), output.display());
            Ok(())
        }
        Command::Dump {
            input,
            frames,
            subtune,
            disasm,
            notes,
        } => dump(
            &input,
            frames.unwrap_or(config.dump_frames),
            subtune,
            disasm,
            notes,
        ),
    }
}

fn driver_from_config(config: &Config) -> Driver {
    match config.driver.as_str() {
        "laxity" => Driver::Laxity,
        "driver11" => Driver::Driver11,
        "np20" => Driver::Np20,
        _ => Driver::Auto,
    }
}

fn convert(input: &PathBuf, output: &PathBuf, driver: Driver) -> Result<()> {
    let sid = SidFile::load(input)?;
    if sid.requires_full_emulation() {
        warn!("{}: RSID or interrupt-driven tune; extraction may misbehave", input.display());
    }

    let db = SignatureDb::builtin();
    let player = match driver {
        Driver::Laxity => Player::Laxity,
        Driver::Driver11 => Player::DriverEleven,
        Driver::Np20 => Player::NewPlayer20,
        Driver::Auto => db
            .best_match(&sid.data)
            .map(|d| {
                info!("detected {:?} via {} at offset {:#x}", d.player, d.signature, d.offset);
                d.player
            })
            .unwrap_or(Player::Unknown),
    };

    match player {
        Player::DriverEleven => {
            // Already-packed SF2 rip: the payload is the SF2 image itself
            let sf2 = packer::sf2_from_packed_sid(&sid)?;
            sf2.save(output)?;
        }
        Player::Laxity => {
            let instances = db.occurrences("laxity-np21-ctrl-stores", &sid.data);
            if instances.len() > 1 {
                warn!(
                    "{} player instances found; extracting only the first",
                    instances.len()
                );
            }
            let memory = MemoryImage::from_sid(&sid);
            let extraction = laxity::extract(&memory, sid.load_address);
            let wrapped = packer::wrap_laxity(&sid, &extraction)?;
            info!("applied {} relocation patches", wrapped.patches.len());
            wrapped.sf2.save(output)?;
        }
        Player::NewPlayer20 => {
            return Err(Error::Validation(
                "NewPlayer v20 detected: table extraction for this player is not \
                 supported, only detection"
                    .into(),
            ));
        }
        Player::Unknown => {
            return Err(Error::Validation(
                "could not identify the player; pass --driver to override".into(),
            ));
        }
    }
    info!("converted {} -> {}", input.display(), output.display());
    Ok(())
}

fn dump(
    input: &PathBuf,
    frames: usize,
    subtune: Option<u16>,
    disassemble: bool,
    notes: bool,
) -> Result<()> {
    let sid = SidFile::load(input)?;
    if disassemble {
        print!("{}", disasm::listing(&sid.data, sid.load_address));
        return Ok(());
    }
    let subtune = subtune.unwrap_or(sid.start_song);
    let mut harness = Harness::init(&sid, subtune)?;
    let trace = harness.run_frames(frames)?;
    for (frame, state) in trace.iter().enumerate() {
        println!("{}", state.dump_line(frame));
    }
    if notes {
        for (voice, stream) in derive_notes(&trace).iter().enumerate() {
            for note in stream {
                println!(
                    "voice {voice}: midi {} vel {} frames {}..{}",
                    note.midi, note.velocity, note.start_frame, note.end_frame
                );
            }
        }
    }
    Ok(())
}
