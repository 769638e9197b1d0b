//! Repair-decision policy (C10, spec §4.8).
//!
//! Maps every detected [`FaultCode`] to a yes/no repair decision under one
//! of four mutually exclusive modes, and tracks the two dirty flags the rest
//! of the core (the walker, [`crate::reconcile`]) reads back: whether
//! *anything* was written (`dirty`, gates the `VolumeDirty` bracket of spec
//! §5) and whether a chain was specifically truncated (`dirty_fat`, gates
//! whether [`crate::reconcile::run`] needs to sweep the FAT at all).
//!
//! `derive_builder` constructs [`FsckOptions`], mirroring the teacher
//! crate's `FormatVolumeOptionsBuilder`.

use derive_builder::Builder;

use crate::error::FaultCode;

/// The four modes spec §4.8 names, mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairMode {
    /// Prompt yes/no for each fault via [`Prompter`].
    Ask,
    /// Repair everything repairable.
    Yes,
    /// Report only; never write (read-only device open).
    #[default]
    No,
    /// Repair the conservative, non-destructive subset of fault codes;
    /// leave the rest reported but unfixed.
    Auto,
}

impl RepairMode {
    /// Whether this mode requires the device be opened read-write and
    /// `VolumeDirty` set before any repair (spec §4.8).
    pub fn writable(self) -> bool {
        !matches!(self, RepairMode::No)
    }
}

/// What the policy decided for one fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Fix,
    Leave,
    /// The user cancelled mid-prompt (spec §5's `CANCEL` flag); the walk
    /// exits after flushing the iterator.
    Cancel,
}

/// Callback the `ASK` mode consults once per fault. A thin CLI wires this to
/// a blocking stdin read; tests wire it to a scripted sequence.
pub trait Prompter {
    fn ask(&mut self, fault: FaultCode) -> Decision;
}

/// A [`Prompter`] that always answers the same way, for `YES`/`NO`-adjacent
/// scripted tests and for non-interactive embedding.
pub struct FixedPrompter(pub Decision);

impl Prompter for FixedPrompter {
    fn ask(&mut self, _fault: FaultCode) -> Decision {
        self.0
    }
}

/// Construction options for a checker run (spec §4.8's modes, plus the
/// verbosity/cancellation knobs the walk needs). Built with `derive_builder`,
/// as the teacher crate builds `FormatVolumeOptions`.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct FsckOptions {
    #[builder(default)]
    pub mode: RepairMode,
}

/// The conservative subset of fault codes `AUTO` mode repairs without asking:
/// corrections that only ever make the volume *more* internally consistent
/// and never discard reachable file content. Deterministic per fault code,
/// as spec §4.8 requires.
fn auto_repairs(code: FaultCode) -> bool {
    matches!(
        code,
        FaultCode::BsBootRegion
            | FaultCode::FileLargerSize
            | FaultCode::FileZeroNofat
            | FaultCode::FileValidSize
            | FaultCode::DeChecksum
    )
}

/// Drives repair decisions for one checker run and accumulates the two
/// dirty flags spec §4.8 and §5 define.
pub struct RepairPolicy<P: Prompter> {
    mode: RepairMode,
    prompter: P,
    /// Set the moment any write is issued; gates the `VolumeDirty` bracket.
    pub dirty: bool,
    /// Set the moment a chain truncation writes a new FAT `EOF`; gates
    /// whether [`crate::reconcile::run`] has anything to do.
    pub dirty_fat: bool,
    pub fixed_count: u32,
    /// Faults detected and left uncorrected (policy said no, or the mode
    /// never offered a fix) — folds into [`crate::exit::ExitStatus::errors_left`].
    pub left_count: u32,
    pub cancelled: bool,
}

impl<P: Prompter> RepairPolicy<P> {
    pub fn new(mode: RepairMode, prompter: P) -> Self {
        Self {
            mode,
            prompter,
            dirty: false,
            dirty_fat: false,
            fixed_count: 0,
            left_count: 0,
            cancelled: false,
        }
    }

    /// Decides whether `fault` should be repaired. Does not itself perform
    /// or record the repair — callers call [`Self::mark_fixed`] /
    /// [`Self::mark_fixed_fat`] only once the write actually lands, so a
    /// `Decision::Fix` that fails to write (I/O error) never inflates
    /// `fixed_count`.
    pub fn decide(&mut self, fault: FaultCode) -> Decision {
        if self.cancelled {
            return Decision::Cancel;
        }
        let decision = match self.mode {
            RepairMode::No => Decision::Leave,
            RepairMode::Yes => Decision::Fix,
            RepairMode::Auto => {
                if auto_repairs(fault) {
                    Decision::Fix
                } else {
                    Decision::Leave
                }
            }
            RepairMode::Ask => self.prompter.ask(fault),
        };
        if decision == Decision::Cancel {
            self.cancelled = true;
        }
        if decision == Decision::Leave {
            self.left_count += 1;
        }
        decision
    }

    pub fn mark_fixed(&mut self) {
        self.dirty = true;
        self.fixed_count += 1;
    }

    pub fn mark_fixed_fat(&mut self) {
        self.dirty = true;
        self.dirty_fat = true;
        self.fixed_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_mode_never_fixes() {
        let mut policy = RepairPolicy::new(RepairMode::No, FixedPrompter(Decision::Fix));
        assert_eq!(policy.decide(FaultCode::FileFirstClus), Decision::Leave);
    }

    #[test]
    fn auto_mode_fixes_safe_codes_only() {
        let mut policy = RepairPolicy::new(RepairMode::Auto, FixedPrompter(Decision::Fix));
        assert_eq!(policy.decide(FaultCode::FileValidSize), Decision::Fix);
        assert_eq!(policy.decide(FaultCode::FileDuplicatedClus), Decision::Leave);
    }

    #[test]
    fn cancellation_sticks_for_rest_of_run() {
        let mut policy = RepairPolicy::new(RepairMode::Ask, FixedPrompter(Decision::Cancel));
        assert_eq!(policy.decide(FaultCode::FileFirstClus), Decision::Cancel);
        policy.prompter = FixedPrompter(Decision::Fix);
        assert_eq!(policy.decide(FaultCode::FileValidSize), Decision::Cancel);
    }

    #[test]
    fn yes_mode_counts_fixed() {
        let mut policy = RepairPolicy::new(RepairMode::Yes, FixedPrompter(Decision::Fix));
        policy.decide(FaultCode::FileValidSize);
        policy.mark_fixed();
        assert_eq!(policy.fixed_count, 1);
        assert!(policy.dirty);
        assert!(!policy.dirty_fat);
    }
}
