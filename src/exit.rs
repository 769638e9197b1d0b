//! Exit-code taxonomy (spec §6), bit-exact with the traditional fsck
//! contract. The core never knows whether its caller is about to reboot a
//! live root filesystem, so [`ExitCode::REBOOT_NEEDED`] is defined for
//! completeness but never set by [`ExitStatus::code`] — a CLI wrapper that
//! tracks that context is free to OR it in itself.

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ExitCode: u8 {
        const NO_ERRORS = 0;
        const ERRORS_CORRECTED = 1;
        const REBOOT_NEEDED = 2;
        const ERRORS_LEFT = 4;
        const OPERATIONAL_ERROR = 8;
        const SYNTAX_ERROR = 16;
        const USER_CANCEL = 32;
        const LIBRARY_ERROR = 128;
    }
}

/// The outcome counters a completed (or aborted) check run accumulates —
/// spec §7's "top level collapses the outcome to one exit code".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitStatus {
    /// Faults [`crate::policy::RepairPolicy`] decided to fix, and the fix
    /// was applied (`fixed_count` of spec §4.8).
    pub fixed_count: u32,
    /// Faults detected but left uncorrected, whether because policy said no
    /// or because the class isn't repairable at all.
    pub errors_left: u32,
    /// Set by an `ASK`-mode `CANCEL` during the walk (spec §5).
    pub cancelled: bool,
    /// An I/O or allocation failure aborted the run outright.
    pub operational_error: bool,
}

impl ExitStatus {
    pub fn record_fixed(&mut self) {
        self.fixed_count += 1;
    }

    pub fn record_left(&mut self) {
        self.errors_left += 1;
    }

    /// Collapses the counters into the bitmask spec §6 defines.
    pub fn code(&self) -> ExitCode {
        if self.operational_error {
            return ExitCode::OPERATIONAL_ERROR;
        }
        let mut code = ExitCode::NO_ERRORS;
        if self.cancelled {
            code |= ExitCode::USER_CANCEL;
        }
        if self.fixed_count > 0 {
            code |= ExitCode::ERRORS_CORRECTED;
        }
        if self.errors_left > 0 {
            code |= ExitCode::ERRORS_LEFT;
        }
        code
    }

    /// The process exit status a CLI driver should return.
    pub fn process_code(&self) -> u8 {
        self.code().bits()
    }
}
