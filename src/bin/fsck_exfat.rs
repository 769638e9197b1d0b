//! Thin CLI wrapping [`exfat_fsck::volume::check`] against a real file or
//! block device (spec §6's CLI surface, out of scope for the core itself
//! but needed to exercise the crate end-to-end — see `SPEC_FULL.md`).
//!
//! Does not reproduce the `fsck.exfat` launcher's fork/timeout wrapper
//! (spec §1 keeps that external); this binary *is* the checker process the
//! wrapper would fork.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use exfat_fsck::error::FaultCode;
use exfat_fsck::exit::ExitCode as FsckExitCode;
use exfat_fsck::policy::{Decision, FsckOptionsBuilder, Prompter, RepairMode};
use exfat_fsck::volume;

/// Check and, depending on the repair flags, fix an exFAT volume.
#[derive(Debug, Parser)]
#[command(name = "fsck.exfat", version, about, arg_required_else_help = true)]
struct Cli {
    /// Device or disk image holding the exFAT volume.
    device: PathBuf,

    /// Report corruption only; never write to the device.
    #[arg(short = 'n', long = "repair-no", group = "mode")]
    repair_no: bool,

    /// Ask yes/no before repairing each detected fault.
    #[arg(short = 'r', long = "repair", group = "mode")]
    repair_ask: bool,

    /// Repair every detected fault without asking.
    #[arg(short = 'y', long = "repair-yes", group = "mode")]
    repair_yes: bool,

    /// Repair the conservative, non-destructive subset of faults automatically.
    #[arg(short = 'p', short_alias = 'a', long = "repair-auto", group = "mode")]
    repair_auto: bool,

    /// Print progress and per-fault diagnostics.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

impl Cli {
    fn mode(&self) -> RepairMode {
        if self.repair_no {
            RepairMode::No
        } else if self.repair_ask {
            RepairMode::Ask
        } else if self.repair_yes {
            RepairMode::Yes
        } else if self.repair_auto {
            RepairMode::Auto
        } else {
            RepairMode::No
        }
    }
}

/// Blocking stdin prompt used by [`RepairMode::Ask`]. A bare `Enter` or
/// anything starting with `y`/`Y` repairs the fault; `c`/`C` cancels the
/// whole run (spec §5's `CANCEL` flag); anything else leaves it.
struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn ask(&mut self, fault: FaultCode) -> Decision {
        print!("{}: fix (y/n/[c]ancel)? ", fault.name());
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return Decision::Leave;
        }
        match line.trim().chars().next() {
            Some('y') | Some('Y') => Decision::Fix,
            Some('c') | Some('C') => Decision::Cancel,
            _ => Decision::Leave,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let mode = cli.mode();

    let file = match OpenOptions::new().read(true).write(mode.writable()).open(&cli.device) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("fsck.exfat: cannot open {}: {e}", cli.device.display());
            return ExitCode::from(FsckExitCode::OPERATIONAL_ERROR.bits());
        }
    };

    let options = match FsckOptionsBuilder::default().mode(mode).build() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("fsck.exfat: {e}");
            return ExitCode::from(FsckExitCode::SYNTAX_ERROR.bits());
        }
    };

    let report = match volume::check(&file, &options, StdinPrompter) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("fsck.exfat: {e}");
            return ExitCode::from(FsckExitCode::LIBRARY_ERROR.bits());
        }
    };

    if cli.verbose {
        println!(
            "{} directories, {} files",
            report.walk.dir_count, report.walk.file_count
        );
        if let Some(label) = &report.walk.volume_label {
            println!("volume label: {}", String::from_utf16_lossy(label));
        }
        println!(
            "{} fixed, {} left uncorrected",
            report.status.fixed_count, report.status.errors_left
        );
    }

    ExitCode::from(report.status.process_code())
}
