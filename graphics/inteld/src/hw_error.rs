// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Hardware error classification
//!
//! Discrete parts report RAS errors through three interrupt bits in the
//! per-tile master control register, one per severity. Each severity has a
//! device-level source register (`DEV_ERR_STAT`) whose bits name the IP
//! block that raised the error; every block then has its own status
//! registers. All status registers are write-one-to-clear.
//!
//! ```text
//!  GFX_MSTR_IRQ ── ERROR_IRQ(sev) ──► DEV_ERR_STAT(sev)
//!                                         ├─ GT    ─► ERR_STAT_GT / vectors
//!                                         ├─ GSC   ─► HECI status ─► memory health work
//!                                         ├─ SOC   ─► IEH0 ─┬─ local
//!                                         │                 └─ IEH1 ─ local
//!                                         └─ SGGI / SGUNIT / SGCI / MERT (log only)
//! ```
//!
//! Errors are folded into [`HwErrorCounters`]; nothing about an individual
//! error is kept beyond the log line and, for memory sparing events, the
//! uevent sent by deferred work.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::gt::{hw_err, Gt, IrqLocked};
use crate::regs::*;
use crate::regs::bit as bit_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HardwareError {
    Correctable = 0,
    NonFatal = 1,
    Fatal = 2,
}

impl HardwareError {
    pub const COUNT: usize = 3;
    pub const ALL: [HardwareError; Self::COUNT] = [
        HardwareError::Correctable,
        HardwareError::NonFatal,
        HardwareError::Fatal,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            HardwareError::Correctable => "CORRECTABLE",
            HardwareError::NonFatal => "NONFATAL",
            HardwareError::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP block named by a `DEV_ERR_STAT` bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSource {
    Gt,
    Sggi,
    Gsc,
    SgUnit,
    Sgci,
    Soc,
    Mert,
    Unknown,
}

impl ErrorSource {
    pub const COUNT: usize = 8;

    pub fn from_bit(bit: u32) -> Self {
        match bit {
            DEV_ERR_STAT_GT_ERROR => ErrorSource::Gt,
            DEV_ERR_STAT_SGGI_ERROR => ErrorSource::Sggi,
            DEV_ERR_STAT_GSC_ERROR => ErrorSource::Gsc,
            DEV_ERR_STAT_SGUNIT_ERROR => ErrorSource::SgUnit,
            DEV_ERR_STAT_SGCI_ERROR => ErrorSource::Sgci,
            DEV_ERR_STAT_SOC_ERROR => ErrorSource::Soc,
            DEV_ERR_STAT_MERT_ERROR => ErrorSource::Mert,
            _ => ErrorSource::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorSource::Gt => "GT",
            ErrorSource::Sggi => "SGGI",
            ErrorSource::Gsc => "GSC",
            ErrorSource::SgUnit => "SG UNIT",
            ErrorSource::Sgci => "SGCI",
            ErrorSource::Soc => "SOC",
            ErrorSource::Mert => "MERT",
            ErrorSource::Unknown => "Undefined",
        }
    }
}

/// Named GT error counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GtHwError {
    CorL3Sng,
    CorGuc,
    CorSampler,
    CorSlm,
    CorEuIc,
    CorEuGrf,
    CorSubslice,
    CorL3Bank,
    FatArrBist,
    FatFpu,
    FatL3Doub,
    FatL3EccChk,
    FatGuc,
    FatIdiPar,
    FatSqidi,
    FatSampler,
    FatSlm,
    FatEuIc,
    FatEuGrf,
    FatSubslice,
    FatL3Bank,
    FatTlb,
    FatL3Fabric,
}

impl GtHwError {
    pub const COUNT: usize = 23;
    pub const ALL: [GtHwError; Self::COUNT] = [
        GtHwError::CorL3Sng,
        GtHwError::CorGuc,
        GtHwError::CorSampler,
        GtHwError::CorSlm,
        GtHwError::CorEuIc,
        GtHwError::CorEuGrf,
        GtHwError::CorSubslice,
        GtHwError::CorL3Bank,
        GtHwError::FatArrBist,
        GtHwError::FatFpu,
        GtHwError::FatL3Doub,
        GtHwError::FatL3EccChk,
        GtHwError::FatGuc,
        GtHwError::FatIdiPar,
        GtHwError::FatSqidi,
        GtHwError::FatSampler,
        GtHwError::FatSlm,
        GtHwError::FatEuIc,
        GtHwError::FatEuGrf,
        GtHwError::FatSubslice,
        GtHwError::FatL3Bank,
        GtHwError::FatTlb,
        GtHwError::FatL3Fabric,
    ];

    /// Counter name as exported to tools.
    pub fn name(self) -> &'static str {
        match self {
            GtHwError::CorL3Sng => "correctable-l3-sng",
            GtHwError::CorGuc => "correctable-guc",
            GtHwError::CorSampler => "correctable-sampler",
            GtHwError::CorSlm => "correctable-slm",
            GtHwError::CorEuIc => "correctable-eu-ic",
            GtHwError::CorEuGrf => "correctable-eu-grf",
            GtHwError::CorSubslice => "correctable-subslice",
            GtHwError::CorL3Bank => "correctable-l3bank",
            GtHwError::FatArrBist => "fatal-array-bist",
            GtHwError::FatFpu => "fatal-fpu",
            GtHwError::FatL3Doub => "fatal-l3-double",
            GtHwError::FatL3EccChk => "fatal-l3-ecc-checker",
            GtHwError::FatGuc => "fatal-guc",
            GtHwError::FatIdiPar => "fatal-idi-parity",
            GtHwError::FatSqidi => "fatal-sqidi",
            GtHwError::FatSampler => "fatal-sampler",
            GtHwError::FatSlm => "fatal-slm",
            GtHwError::FatEuIc => "fatal-eu-ic",
            GtHwError::FatEuGrf => "fatal-eu-grf",
            GtHwError::FatSubslice => "fatal-subslice",
            GtHwError::FatL3Bank => "fatal-l3bank",
            GtHwError::FatTlb => "fatal-tlb",
            GtHwError::FatL3Fabric => "fatal-l3-fabric",
        }
    }
}

/// Named GSC error counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GscHwError {
    CorSramEcc,
    UncorMiaShutdown,
    UncorMiaInt,
    UncorSramEcc,
    UncorWdgTimeout,
    UncorRomParity,
    UncorUcodeParity,
    UncorGlitchDet,
    UncorFusePull,
    UncorFuseCrcCheck,
    UncorSelfmbist,
    UncorAonParity,
}

impl GscHwError {
    pub const COUNT: usize = 12;
}

/// Memory health as last reported by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemHealth {
    Ok = 0,
    Alarm = 1,
    EcPending = 2,
    Degraded = 3,
    Unknown = 4,
}

impl MemHealth {
    pub(crate) fn from_u8(val: u8) -> Self {
        match val {
            0 => MemHealth::Ok,
            1 => MemHealth::Alarm,
            2 => MemHealth::EcPending,
            3 => MemHealth::Degraded,
            _ => MemHealth::Unknown,
        }
    }
}

/// Progress of one severity through the source handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Idle = 0,
    /// Source register sampled under the tile's IRQ lock.
    Masked = 1,
    /// Every set bit handed to its block handler; ack pending.
    Classified = 2,
}

impl DispatchPhase {
    pub(crate) fn from_u8(val: u8) -> Self {
        match val {
            1 => DispatchPhase::Masked,
            2 => DispatchPhase::Classified,
            _ => DispatchPhase::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SocLocality {
    Global,
    Local,
}

/// Key of the sparse SOC error table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocErrIndex {
    pub ieh: u8,
    pub locality: SocLocality,
    pub severity: HardwareError,
    pub bit: u8,
}

impl SocErrIndex {
    pub const fn new(ieh: u8, locality: SocLocality, severity: HardwareError, bit: u8) -> Self {
        Self {
            ieh,
            locality,
            severity,
            bit,
        }
    }

    pub fn name(&self) -> SocErrorName {
        use SocLocality::{Global, Local};

        let fatal = self.severity == HardwareError::Fatal;
        let nonfatal = self.severity == HardwareError::NonFatal;
        if !fatal && !nonfatal {
            return SocErrorName::Undefined;
        }

        let bit = self.bit as u32;
        let named = match (self.ieh, self.locality, bit) {
            (0, Local, SOC_PSF_CSC_0) => "Invalid CSC PSF Command Parity",
            (0, Local, SOC_PSF_CSC_1) => "Invalid CSC PSF Unexpected Completion",
            (0, Local, SOC_PSF_CSC_2) => "Invalid CSC PSF Unsupported Request",
            (0, Local, PVC_SOC_MDFI_EAST) => "Base Die MDFI T2T",
            (0, Local, PVC_SOC_MDFI_SOUTH) => "Base Die MDFI T2C",
            (1, Global, PVC_SOC_CD0_MDFI) => "ANR MDFI",
            (0, Local, PVC_SOC_PSF_0) if fatal => "Invalid PCIe PSF Command Parity",
            (0, Local, PVC_SOC_PSF_1) if fatal => "PCIe PSF Unexpected Completion",
            (0, Local, PVC_SOC_PSF_2) if fatal => "PCIe PSF Unsupported Request",
            (0, Local, PVC_SOC_PCIAER) if fatal => "Local IEH internal: Malformed PCIe AER",
            (0, Local, PVC_SOC_PCIERR) if fatal => "Local IEH internal: Malformed PCIe ERR",
            (0, Local, PVC_SOC_UR) if fatal => "Local IEH internal: UR conditions in IEH",
            (0, Local, PVC_SOC_SERR_SRCS) if fatal => "Local IEH internal: From SERR Sources",
            (0, Global, SOC_PUNIT) if fatal => "PUNIT",
            (ieh, Global, _) => {
                let hbm_base = match ieh {
                    0 => [(0, SOC_HBM_SS0_0), (1, PVC_SOC_HBM_SS1_0)],
                    1 => [(2, PVC_SOC_HBM_SS2_0), (3, PVC_SOC_HBM_SS3_0)],
                    _ => return SocErrorName::Undefined,
                };
                return hbm_base
                    .iter()
                    .find(|(_, base)| (*base..*base + 8).contains(&bit))
                    .map_or(SocErrorName::Undefined, |&(ss, base)| SocErrorName::Hbm {
                        invalid: nonfatal,
                        ss,
                        channel: bit - base,
                    });
            }
            _ => return SocErrorName::Undefined,
        };
        SocErrorName::Named(named)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocErrorName {
    Named(&'static str),
    Hbm { invalid: bool, ss: u32, channel: u32 },
    Undefined,
}

impl SocErrorName {
    /// Errors the hardware is not expected to report are driver errors.
    pub fn is_valid(&self) -> bool {
        match self {
            SocErrorName::Named(name) => !name.starts_with("Invalid"),
            SocErrorName::Hbm { invalid, .. } => !invalid,
            SocErrorName::Undefined => false,
        }
    }
}

impl fmt::Display for SocErrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocErrorName::Named(name) => f.write_str(name),
            SocErrorName::Hbm {
                invalid,
                ss,
                channel,
            } => {
                if *invalid {
                    f.write_str("Invalid ")?;
                }
                write!(f, "HBM SS{}: Channel{}", ss, channel)
            }
            SocErrorName::Undefined => f.write_str("Undefined"),
        }
    }
}

/// HBM error location reported by the firmware in SWF0/SWF1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HbmErrorInfo {
    pub event: u32,
    pub tile: u32,
    pub channel: u32,
    pub pseudo_channel: u32,
    pub row: u32,
    pub column: u32,
    pub bank: u32,
    pub old_state: u32,
    pub new_state: u32,
}

impl HbmErrorInfo {
    pub fn decode(swf0: u32, swf1: u32) -> Self {
        Self {
            event: field_get(HBM_EVENT_MASK, swf0),
            tile: field_get(HBM_TILE_MASK, swf0),
            channel: field_get(HBM_CHANNEL_MASK, swf0),
            pseudo_channel: field_get(HBM_PSEUDOCHANNEL_MASK, swf0),
            row: field_get(HBM_ROW_MASK, swf0),
            column: field_get(HBM_COLUMN_MASK, swf1),
            bank: field_get(HBM_BANK_MASK, swf1),
            old_state: field_get(HBM_OLDSTATE_MASK, swf1),
            new_state: field_get(HBM_NEWSTATE_MASK, swf1),
        }
    }

    pub fn state_changed(&self) -> bool {
        self.old_state != self.new_state
    }
}

/// One classified error, folded into the counters as soon as it is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwErrorRecord {
    pub severity: HardwareError,
    pub source: ErrorSource,
    pub bit: u32,
    pub payload: Option<HbmErrorInfo>,
}

impl HwErrorRecord {
    pub fn new(severity: HardwareError, source: ErrorSource, bit: u32) -> Self {
        Self {
            severity,
            source,
            bit,
            payload: None,
        }
    }
}

fn counters<const N: usize>() -> [AtomicU64; N] {
    std::array::from_fn(|_| AtomicU64::new(0))
}

/// Per-tile error counters. Counters only grow until [`clear`](Self::clear).
pub struct HwErrorCounters {
    hw: [AtomicU64; GtHwError::COUNT],
    gsc: [AtomicU64; GscHwError::COUNT],
    sgunit: [AtomicU64; HardwareError::COUNT],
    by_source: [[AtomicU64; ErrorSource::COUNT]; HardwareError::COUNT],
    driver: AtomicU64,
    soc: spin::Mutex<BTreeMap<SocErrIndex, u64>>,
}

impl Default for HwErrorCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl HwErrorCounters {
    pub fn new() -> Self {
        Self {
            hw: counters(),
            gsc: counters(),
            sgunit: counters(),
            by_source: std::array::from_fn(|_| counters()),
            driver: AtomicU64::new(0),
            soc: spin::Mutex::new(BTreeMap::new()),
        }
    }

    pub fn gt(&self, err: GtHwError) -> u64 {
        self.hw[err as usize].load(Ordering::Relaxed)
    }

    pub fn gsc(&self, err: GscHwError) -> u64 {
        self.gsc[err as usize].load(Ordering::Relaxed)
    }

    pub fn sgunit(&self, hw_err: HardwareError) -> u64 {
        self.sgunit[hw_err as usize].load(Ordering::Relaxed)
    }

    /// Errors of `hw_err` severity reported by `source`.
    pub fn source(&self, hw_err: HardwareError, source: ErrorSource) -> u64 {
        self.by_source[hw_err as usize][source as usize].load(Ordering::Relaxed)
    }

    pub fn driver_errors(&self) -> u64 {
        self.driver.load(Ordering::Relaxed)
    }

    pub fn soc(&self, index: SocErrIndex) -> u64 {
        self.soc.lock().get(&index).copied().unwrap_or(0)
    }

    pub fn soc_entries(&self) -> Vec<(SocErrIndex, u64)> {
        self.soc.lock().iter().map(|(k, v)| (*k, *v)).collect()
    }

    pub fn snapshot(&self) -> HwErrorSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        HwErrorSnapshot {
            hw: self.hw.iter().map(load).collect(),
            gsc: self.gsc.iter().map(load).collect(),
            sgunit: self.sgunit.iter().map(load).collect(),
            by_source: self.by_source.iter().flatten().map(load).collect(),
            driver: load(&self.driver),
            soc: self.soc.lock().clone(),
        }
    }

    pub fn clear(&self) {
        let zero = |c: &AtomicU64| c.store(0, Ordering::Relaxed);
        self.hw.iter().for_each(zero);
        self.gsc.iter().for_each(zero);
        self.sgunit.iter().for_each(zero);
        self.by_source.iter().flatten().for_each(zero);
        zero(&self.driver);
        self.soc.lock().clear();
    }

    pub(crate) fn record(&self, record: &HwErrorRecord) {
        self.by_source[record.severity as usize][record.source as usize]
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_gt(&self, err: GtHwError, count: u64) {
        self.hw[err as usize].fetch_add(count, Ordering::Relaxed);
    }

    /// Hardware keeps a running count of its own for this error.
    pub(crate) fn update_gt_from_hw(&self, err: GtHwError, count: u64) {
        self.hw[err as usize].fetch_max(count, Ordering::Relaxed);
    }

    pub(crate) fn inc_gsc(&self, err: GscHwError) {
        self.gsc[err as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_sgunit(&self, hw_err: HardwareError) {
        self.sgunit[hw_err as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_soc(&self, index: SocErrIndex) {
        *self.soc.lock().entry(index).or_insert(0) += 1;
    }

    pub(crate) fn driver_error(&self) {
        self.driver.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwErrorSnapshot {
    pub hw: Vec<u64>,
    pub gsc: Vec<u64>,
    pub sgunit: Vec<u64>,
    pub by_source: Vec<u64>,
    pub driver: u64,
    pub soc: BTreeMap<SocErrIndex, u64>,
}

impl HwErrorSnapshot {
    /// True if no counter went down since `earlier`.
    pub fn dominates(&self, earlier: &HwErrorSnapshot) -> bool {
        let ge = |a: &[u64], b: &[u64]| a.iter().zip(b).all(|(x, y)| x >= y);
        ge(&self.hw, &earlier.hw)
            && ge(&self.gsc, &earlier.gsc)
            && ge(&self.sgunit, &earlier.sgunit)
            && ge(&self.by_source, &earlier.by_source)
            && self.driver >= earlier.driver
            && earlier
                .soc
                .iter()
                .all(|(k, v)| self.soc.get(k).is_some_and(|now| now >= v))
    }
}

fn set_bits(val: u32) -> impl Iterator<Item = u32> {
    (0..32).filter(move |bit| val & (1 << bit) != 0)
}

fn parity_error_name(source: ErrorSource, hw_err: HardwareError) -> Option<&'static str> {
    match (source, hw_err) {
        (ErrorSource::Sggi, HardwareError::Fatal) => Some("SGGI Cmd Parity"),
        (ErrorSource::Sggi, HardwareError::NonFatal) => Some("SGGI Data Parity"),
        (ErrorSource::Sgci, HardwareError::Fatal) => Some("SGCI Cmd Parity"),
        (ErrorSource::Sgci, HardwareError::NonFatal) => Some("SGCI Data Parity"),
        (ErrorSource::Mert, HardwareError::Fatal) => Some("MERT Cmd Parity"),
        (ErrorSource::Mert, HardwareError::NonFatal) => Some("MERT Data Parity"),
        _ => None,
    }
}

/// ERR_STAT_GT of one severity, with the SLM ECC counter on parts that
/// count SLM errors in a separate register.
struct GtErrStat {
    errstat: u32,
    slm: Option<u32>,
}

/// The vector registers of one severity. ERR_STAT_GT is read along with
/// them if a subslice vector is set.
struct GtVectors {
    vctr: [u32; ERR_STAT_GT_FATAL_VCTR_LEN as usize],
    len: u32,
    status: Option<GtErrStat>,
}

/// SOC IEH status of one severity. Registers behind a clear parent bit are
/// not read and stay zero.
#[derive(Default)]
struct SocIehStatus {
    mst_glb: u32,
    slv_glb: u32,
    slv_lcl: u32,
    mst_lcl: u32,
    header: Option<u32>,
}

impl Gt {
    /// Service the error classes flagged in a tile's master control value.
    /// The caller holds the tile's IRQ lock.
    pub(crate) fn hw_error_irq_handler(
        &self,
        locked: &mut IrqLocked,
        master_ctl: u32,
    ) -> Result<()> {
        for hw_err in HardwareError::ALL {
            if master_ctl & gen12_error_irq(hw_err) == 0 {
                continue;
            }
            if self.info.logs_gt_errors {
                hw_err!(self, "{} error GFX_MSTR_INTR:{:#010x}", hw_err, master_ctl);
            }
            self.hw_error_source_handler(locked, hw_err)?;
        }
        Ok(())
    }

    pub(crate) fn hw_error_source_handler(
        &self,
        locked: &mut IrqLocked,
        hw_err: HardwareError,
    ) -> Result<()> {
        self.set_dispatch_phase(hw_err, DispatchPhase::Masked);

        let result = self.dispatch_error_sources(locked, hw_err);

        self.set_dispatch_phase(hw_err, DispatchPhase::Idle);
        result
    }

    /// Read an error status register. All ones means the device stopped
    /// answering and nothing behind it can be decoded.
    fn read_err_status(&self, reg: Reg) -> Result<u32> {
        match self.regs.read32(reg) {
            u32::MAX => {
                log::debug!(
                    "inteld: GT{} register {:#x} reads all ones, device gone",
                    self.id,
                    reg.offset()
                );
                Err(Error::DeviceUnavailable)
            }
            val => Ok(val),
        }
    }

    fn dispatch_error_sources(&self, locked: &mut IrqLocked, hw_err: HardwareError) -> Result<()> {
        let status = dev_err_stat_reg(hw_err);
        let errsrc = self.read_err_status(status)?;
        if errsrc == 0 {
            self.log_driver_error(format_args!("DEV_ERR_STAT_REG_{} blank!", hw_err));
            return Ok(());
        }

        if self.info.logs_gt_errors {
            hw_err!(self, "DEV_ERR_STAT_REG_{}:{:#010x}", hw_err, errsrc);
        }

        for bit in set_bits(errsrc) {
            let source = ErrorSource::from_bit(bit);

            match source {
                ErrorSource::Gt => {
                    self.gt_hw_error_handler(hw_err)?;
                    if hw_err == HardwareError::Fatal {
                        self.set_reset_pending();
                    }
                }
                ErrorSource::Gsc if self.id == 0 => {
                    // memory health is tracked on the root tile only
                    self.gsc_hw_error_handler(locked, hw_err)?;
                }
                ErrorSource::Gsc => self.log_errors(hw_err, false, "Undefined GSC"),
                ErrorSource::SgUnit => {
                    self.log_errors(hw_err, false, "Undefined SG UNIT");
                    self.errors.inc_sgunit(hw_err);
                }
                ErrorSource::Soc => self.soc_hw_error_handler(hw_err)?,
                ErrorSource::Sggi | ErrorSource::Sgci | ErrorSource::Mert => {
                    match parity_error_name(source, hw_err) {
                        Some(name) => self.log_errors(hw_err, true, name),
                        None => self.log_errors(hw_err, false, "Undefined"),
                    }
                }
                ErrorSource::Unknown => self.log_errors(hw_err, false, "Undefined"),
            }

            self.errors.record(&HwErrorRecord::new(hw_err, source, bit));
        }

        self.set_dispatch_phase(hw_err, DispatchPhase::Classified);
        self.regs.write32(status, errsrc);
        Ok(())
    }

    fn log_errors(&self, hw_err: HardwareError, valid: bool, name: &str) {
        if !self.info.logs_gt_errors {
            return;
        }
        if valid {
            hw_err!(self, "{} {} error", name, hw_err);
        } else {
            self.log_driver_error(format_args!("{} {} error", name, hw_err));
        }
    }

    fn read_gt_err_stat(&self, hw_err: HardwareError) -> Result<GtErrStat> {
        let errstat = self.read_err_status(err_stat_gt_reg(hw_err))?;

        let (slm_bit, mask) = match hw_err {
            HardwareError::Correctable => (SLM_COR_ERR, self.info.gt_cor_err_mask),
            HardwareError::Fatal => (SLM_FAT_ERR, self.info.gt_fat_err_mask),
            HardwareError::NonFatal => return Ok(GtErrStat { errstat, slm: None }),
        };
        let slm = if !self.info.has_slm_error_bit && errstat & mask & bit_of(slm_bit) != 0 {
            Some(self.read_err_status(slm_ecc_error_cntr(hw_err))?)
        } else {
            None
        };
        Ok(GtErrStat { errstat, slm })
    }

    fn read_gt_vectors(&self, hw_err: HardwareError) -> Result<GtVectors> {
        let (len, vctr_reg): (u32, fn(u32) -> Reg) = match hw_err {
            HardwareError::Fatal => (ERR_STAT_GT_FATAL_VCTR_LEN, err_stat_gt_fatal_vctr_reg),
            _ => (ERR_STAT_GT_COR_VCTR_LEN, err_stat_gt_cor_vctr_reg),
        };

        let mut vectors = GtVectors {
            vctr: [0; ERR_STAT_GT_FATAL_VCTR_LEN as usize],
            len,
            status: None,
        };
        for i in 0..len {
            vectors.vctr[i as usize] = self.read_err_status(vctr_reg(i))?;
        }

        let subslice =
            vectors.vctr[ERR_STAT_GT_VCTR0 as usize] | vectors.vctr[ERR_STAT_GT_VCTR1 as usize];
        if subslice != 0 {
            vectors.status = Some(self.read_gt_err_stat(hw_err)?);
        }
        Ok(vectors)
    }

    fn gt_hw_error_handler(&self, hw_err: HardwareError) -> Result<()> {
        if self.info.has_gt_error_vectors {
            match hw_err {
                HardwareError::Correctable => {
                    let vectors = self.read_gt_vectors(hw_err)?;
                    hw_err!(self, "GT CORRECTABLE error");
                    self.gt_correctable_vectors(vectors);
                }
                HardwareError::NonFatal => {
                    self.log_driver_error(format_args!("Undefined GT NonFatal error"));
                }
                HardwareError::Fatal => {
                    let vectors = self.read_gt_vectors(hw_err)?;
                    hw_err!(self, "GT FATAL error");
                    self.gt_fatal_vectors(vectors);
                }
            }
            return Ok(());
        }

        let status = self.read_gt_err_stat(hw_err)?;
        if status.errstat == 0 {
            self.log_driver_error(format_args!("ERR_STAT_GT_REG_{} blank!", hw_err));
            return Ok(());
        }

        match hw_err {
            HardwareError::Correctable => {
                hw_err!(self, "GT CORRECTABLE error");
                self.gt_correctable_stats_update(&status);
                hw_err!(self, "ERR_STAT_GT_CORRECTABLE:{:#010x}", status.errstat);
            }
            // no non-fatal GT error bits are defined
            HardwareError::NonFatal => {
                self.log_driver_error(format_args!("Undefined GT NonFatal error"));
            }
            HardwareError::Fatal => {
                hw_err!(self, "GT FATAL error");
                self.gt_fatal_stats_update(&status);
                hw_err!(self, "ERR_STAT_GT_FATAL:{:#010x}", status.errstat);
            }
        }

        self.regs.write32(err_stat_gt_reg(hw_err), status.errstat);
        Ok(())
    }

    /// Decode ERR_STAT_GT on the first subslice vector; later ones find it taken.
    fn gt_vector_status(&self, hw_err: HardwareError, vectors: &mut GtVectors) {
        let Some(status) = vectors.status.take() else {
            return;
        };
        hw_err!(self, "ERR_STAT_GT_{}:{:#010x}", hw_err, status.errstat);
        match hw_err {
            HardwareError::Fatal => self.gt_fatal_stats_update(&status),
            _ => self.gt_correctable_stats_update(&status),
        }
        if status.errstat != 0 {
            self.regs.write32(err_stat_gt_reg(hw_err), status.errstat);
        }
    }

    fn gt_correctable_vectors(&self, mut vectors: GtVectors) {
        let mut error = false;

        for i in 0..vectors.len {
            let vctr = vectors.vctr[i as usize];
            if vctr == 0 {
                continue;
            }

            match i {
                ERR_STAT_GT_VCTR0 | ERR_STAT_GT_VCTR1 => {
                    self.errors
                        .add_gt(GtHwError::CorSubslice, vctr.count_ones() as u64);
                    hw_err!(
                        self,
                        "SUBSLICE CORRECTABLE error, ERR_VECT_GT_CORRECTABLE_{}:{:#010x}",
                        i,
                        vctr
                    );
                    self.gt_vector_status(HardwareError::Correctable, &mut vectors);
                }
                ERR_STAT_GT_VCTR2 | ERR_STAT_GT_VCTR3 => {
                    self.errors
                        .add_gt(GtHwError::CorL3Bank, vctr.count_ones() as u64);
                    hw_err!(
                        self,
                        "L3 BANK CORRECTABLE error, ERR_VECT_GT_CORRECTABLE_{}:{:#010x}",
                        i,
                        vctr
                    );
                }
                _ => self.log_driver_error(format_args!(
                    "Undefined CORRECTABLE error, ERR_VECT_GT_CORRECTABLE_{}:{:#010x}",
                    i, vctr
                )),
            }
            self.regs.write32(err_stat_gt_cor_vctr_reg(i), vctr);
            error = true;
        }

        if !error {
            self.log_driver_error(format_args!(
                "Undefined CORRECTABLE error, no vector register is set"
            ));
        }
    }

    fn gt_fatal_vectors(&self, mut vectors: GtVectors) {
        let mut error = false;

        for i in 0..vectors.len {
            let vctr = vectors.vctr[i as usize];
            if vctr == 0 {
                continue;
            }

            let name = match i {
                ERR_STAT_GT_VCTR0 | ERR_STAT_GT_VCTR1 => {
                    self.errors
                        .add_gt(GtHwError::FatSubslice, vctr.count_ones() as u64);
                    "SUBSLICE"
                }
                ERR_STAT_GT_VCTR2 | ERR_STAT_GT_VCTR3 => {
                    self.errors
                        .add_gt(GtHwError::FatL3Bank, vctr.count_ones() as u64);
                    "L3 BANK"
                }
                ERR_STAT_GT_VCTR6 => {
                    self.errors
                        .add_gt(GtHwError::FatTlb, (vctr & 0xffff).count_ones() as u64);
                    "TLB"
                }
                ERR_STAT_GT_VCTR7 => {
                    self.errors
                        .add_gt(GtHwError::FatL3Fabric, (vctr & 0xff).count_ones() as u64);
                    "L3 FABRIC"
                }
                _ => "Undefined",
            };

            if name == "Undefined" {
                self.log_driver_error(format_args!(
                    "Undefined FATAL error, ERR_VECT_GT_FATAL_{}:{:#010x}",
                    i, vctr
                ));
            } else {
                hw_err!(self, "{} FATAL error, ERR_VECT_GT_FATAL_{}:{:#010x}", name, i, vctr);
            }

            match i {
                ERR_STAT_GT_VCTR0 | ERR_STAT_GT_VCTR1 => {
                    self.gt_vector_status(HardwareError::Fatal, &mut vectors);
                }
                ERR_STAT_GT_VCTR7 => self.gt_l3fabric_error_handler(vctr),
                _ => {}
            }

            self.regs.write32(err_stat_gt_fatal_vctr_reg(i), vctr);
            error = true;
        }

        if !error {
            self.log_driver_error(format_args!(
                "Undefined FATAL error, no vector register is set"
            ));
        }
    }

    fn gt_l3fabric_error_handler(&self, vctr: u32) {
        const MAX_L3_NODEPAIR: u32 = 8;

        for nodepair in set_bits(vctr).take_while(|&b| b < MAX_L3_NODEPAIR) {
            // MERT is only behind node pair 0, T2T behind 0 and 2, T2C behind 6
            let mert = if nodepair == 0 { ", MERT IOSF poison/UR/CA" } else { "" };
            let t2t = if nodepair == 0 || nodepair == 2 {
                ", MDFI T2T poison/writefail/rsppktparity"
            } else {
                ""
            };
            let t2c = if nodepair == 6 {
                ", MDFI T2C poison/writefail/rsppktparity"
            } else {
                ""
            };

            hw_err!(
                self,
                "L3 Fabric Error seen on L3Nodepair[{}]: lngp_rdrtn parity, \
                 l3bankout prel3 fatal, rr fatal, lnep fatal (SQIDI, LCUnit{}{}{}), \
                 bmcb/blce tag/data",
                nodepair,
                t2t,
                t2c,
                mert
            );
        }
    }

    fn gt_correctable_stats_update(&self, status: &GtErrStat) {
        for bit in set_bits(status.errstat & genmask(GT_HW_ERROR_MAX_ERR_BITS - 1, 0)) {
            if self.info.gt_cor_err_mask & bit_of(bit) == 0 {
                self.log_driver_error(format_args!("Undefined CORRECTABLE error"));
                continue;
            }

            let (err, msg) = match bit {
                L3_SNG_COR_ERR => (GtHwError::CorL3Sng, "l3 single correctable error"),
                GUC_COR_ERR => (GtHwError::CorGuc, "SINGLE BIT GUC SRAM CORRECTABLE error"),
                SAMPLER_COR_ERR => (
                    GtHwError::CorSampler,
                    "SINGLE BIT SAMPLER CORRECTABLE error",
                ),
                SLM_COR_ERR => {
                    self.update_slm(GtHwError::CorSlm, status.slm);
                    hw_err!(self, "SINGLE BIT SLM CORRECTABLE error");
                    continue;
                }
                EU_IC_COR_ERR => (GtHwError::CorEuIc, "SINGLE BIT EU IC CORRECTABLE error"),
                EU_GRF_COR_ERR => (GtHwError::CorEuGrf, "SINGLE BIT EU GRF CORRECTABLE error"),
                _ => {
                    self.log_driver_error(format_args!("Undefined CORRECTABLE error"));
                    continue;
                }
            };
            self.errors.add_gt(err, 1);
            hw_err!(self, "{}", msg);
        }
    }

    fn gt_fatal_stats_update(&self, status: &GtErrStat) {
        for bit in set_bits(status.errstat & genmask(GT_HW_ERROR_MAX_ERR_BITS - 1, 0)) {
            if self.info.gt_fat_err_mask & bit_of(bit) == 0 {
                self.log_driver_error(format_args!("Undefined FATAL error"));
                continue;
            }

            let (err, msg) = match bit {
                ARRAY_BIST_FAT_ERR => (GtHwError::FatArrBist, "Array BIST FATAL error"),
                FPU_UNCORR_FAT_ERR => (GtHwError::FatFpu, "FPU FATAL error"),
                L3_DOUBLE_FAT_ERR => (GtHwError::FatL3Doub, "L3 Double FATAL error"),
                L3_ECC_CHK_FAT_ERR => (GtHwError::FatL3EccChk, "L3 ECC Checker FATAL error"),
                GUC_FAT_ERR => (GtHwError::FatGuc, "GUC SRAM FATAL error"),
                IDI_PAR_FAT_ERR => (GtHwError::FatIdiPar, "IDI PARITY FATAL error"),
                SQIDI_FAT_ERR => (GtHwError::FatSqidi, "SQIDI FATAL error"),
                SAMPLER_FAT_ERR => (GtHwError::FatSampler, "SAMPLER FATAL error"),
                SLM_FAT_ERR => {
                    self.update_slm(GtHwError::FatSlm, status.slm);
                    hw_err!(self, "LSC Uncorrectable Fatal error");
                    continue;
                }
                EU_IC_FAT_ERR => (GtHwError::FatEuIc, "EU IC FATAL error"),
                EU_GRF_FAT_ERR => (GtHwError::FatEuGrf, "EU GRF FATAL error"),
                _ => {
                    self.log_driver_error(format_args!("Undefined FATAL error"));
                    continue;
                }
            };
            self.errors.add_gt(err, 1);
            hw_err!(self, "{}", msg);
        }
    }

    fn update_slm(&self, err: GtHwError, counter: Option<u32>) {
        match counter {
            Some(count) => self.errors.update_gt_from_hw(err, count as u64),
            None => self.errors.add_gt(err, 1),
        }
    }

    fn soc_ieh_mask(&self, hw_err: HardwareError) {
        for ieh in 0..SOC_NUM_IEH {
            self.regs.write32(
                soc_gsysevtctl_reg(SOC_PVC_BASE, SOC_PVC_SLAVE_BASE, ieh),
                !bit_of(hw_err as u32),
            );
        }
    }

    fn soc_ieh_unmask(&self) {
        for ieh in 0..SOC_NUM_IEH {
            self.regs.write32(
                soc_gsysevtctl_reg(SOC_PVC_BASE, SOC_PVC_SLAVE_BASE, ieh),
                SOC_GSYSEVTCTL_ENABLE_ALL,
            );
        }
    }

    fn soc_clear_status(&self, hw_err: HardwareError) {
        let (base, slave) = (SOC_PVC_BASE, SOC_PVC_SLAVE_BASE);
        self.regs
            .write32(soc_global_err_stat_master_reg(base, hw_err), u32::MAX);
        self.regs
            .write32(soc_local_err_stat_master_reg(base, hw_err), u32::MAX);
        self.regs
            .write32(soc_global_err_stat_slave_reg(slave, hw_err), u32::MAX);
        self.regs
            .write32(soc_local_err_stat_slave_reg(slave, hw_err), u32::MAX);
    }

    /// Drop every latched SOC error, e.g. left over from a previous boot.
    pub(crate) fn clear_all_soc_errors(&self) {
        for hw_err in HardwareError::ALL {
            self.soc_ieh_mask(hw_err);
            self.soc_clear_status(hw_err);
        }
        self.soc_ieh_unmask();
    }

    fn log_soc_hw_error(&self, index: SocErrIndex) {
        if !self.info.logs_gt_errors {
            return;
        }
        let name = index.name();
        if name.is_valid() {
            hw_err!(self, "{} SOC {} error", name, index.severity);
        } else {
            self.log_driver_error(format_args!("{} SOC {} error", name, index.severity));
        }
    }

    fn soc_hw_error_handler(&self, hw_err: HardwareError) -> Result<()> {
        if !self.info.has_soc_errors {
            return Ok(());
        }

        hw_err!(self, "SOC {} error", hw_err);

        // no correctable SOC errors are defined
        if hw_err == HardwareError::Correctable {
            self.soc_ieh_mask(hw_err);
            self.soc_clear_status(hw_err);
            self.log_driver_error(format_args!("Invalid SOC {} error", hw_err));
            self.soc_ieh_unmask();
            return Ok(());
        }

        // mask the severity on both IEHs while walking master → slave → local
        self.soc_ieh_mask(hw_err);
        let result = self
            .read_soc_status(hw_err)
            .map(|status| self.soc_record_and_clear(hw_err, &status));
        self.soc_ieh_unmask();
        result
    }

    fn read_soc_status(&self, hw_err: HardwareError) -> Result<SocIehStatus> {
        let (base, slave) = (SOC_PVC_BASE, SOC_PVC_SLAVE_BASE);
        let mut status = SocIehStatus {
            mst_glb: self.read_err_status(soc_global_err_stat_master_reg(base, hw_err))?,
            ..SocIehStatus::default()
        };

        if status.mst_glb & bit_of(SOC_SLAVE_IEH) != 0 {
            status.slv_glb = self.read_err_status(soc_global_err_stat_slave_reg(slave, hw_err))?;
            if status.slv_glb & bit_of(SOC_IEH1_LOCAL_ERR_STATUS) != 0 {
                status.slv_lcl =
                    self.read_err_status(soc_local_err_stat_slave_reg(slave, hw_err))?;
            }
        }

        if status.mst_glb & bit_of(SOC_IEH0_LOCAL_ERR_STATUS) != 0 {
            status.mst_lcl = self.read_err_status(soc_local_err_stat_master_reg(base, hw_err))?;
            if status.mst_lcl & (bit_of(PVC_SOC_MDFI_EAST) | bit_of(PVC_SOC_MDFI_SOUTH)) != 0 {
                status.header = Some(self.read_err_status(LOCAL_FIRST_IEH_HEADER_LOG_REG)?);
            }
        }

        Ok(status)
    }

    fn soc_record_and_clear(&self, hw_err: HardwareError, status: &SocIehStatus) {
        let (base, slave) = (SOC_PVC_BASE, SOC_PVC_SLAVE_BASE);
        let mst_glb = status.mst_glb;
        hw_err!(self, "SOC_GLOBAL_ERR_STAT_MASTER_REG_{}:{:#010x}", hw_err, mst_glb);

        if mst_glb & bit_of(SOC_SLAVE_IEH) != 0 {
            let slv_glb = status.slv_glb;
            hw_err!(self, "SOC_GLOBAL_ERR_STAT_SLAVE_REG_{}:{:#010x}", hw_err, slv_glb);

            if slv_glb & bit_of(SOC_IEH1_LOCAL_ERR_STATUS) != 0 {
                let lcl = status.slv_lcl;
                hw_err!(self, "SOC_LOCAL_ERR_STAT_SLAVE_REG_{}:{:#010x}", hw_err, lcl);

                for bit in set_bits(lcl) {
                    let index = SocErrIndex::new(1, SocLocality::Local, hw_err, bit as u8);
                    self.errors.inc_soc(index);
                    self.log_driver_error(format_args!("Invalid SOC {} error", hw_err));
                }
                self.regs
                    .write32(soc_local_err_stat_slave_reg(slave, hw_err), lcl);
            }

            for bit in set_bits(slv_glb) {
                if bit == SOC_IEH1_LOCAL_ERR_STATUS {
                    continue;
                }
                let index = SocErrIndex::new(1, SocLocality::Global, hw_err, bit as u8);
                self.errors.inc_soc(index);
                self.log_soc_hw_error(index);
            }
            self.regs
                .write32(soc_global_err_stat_slave_reg(slave, hw_err), slv_glb);
        }

        if mst_glb & bit_of(SOC_IEH0_LOCAL_ERR_STATUS) != 0 {
            let mut lcl = status.mst_lcl;
            hw_err!(self, "SOC_LOCAL_ERR_STAT_MASTER_REG_{}:{:#010x}", hw_err, lcl);
            if let Some(header) = status.header {
                hw_err!(self, "LOCAL_FIRST_IEH_HEADER_LOG_REG:{:#010x}", header);
            }

            for bit in set_bits(lcl) {
                if bit == PVC_SOC_MDFI_EAST || bit == PVC_SOC_MDFI_SOUTH {
                    // the bit belongs to another severity, leave it latched
                    if status.header != Some(mdfi_severity(hw_err)) {
                        lcl &= !bit_of(bit);
                        continue;
                    }
                }
                let index = SocErrIndex::new(0, SocLocality::Local, hw_err, bit as u8);
                self.errors.inc_soc(index);
                self.log_soc_hw_error(index);
            }
            self.regs
                .write32(soc_local_err_stat_master_reg(base, hw_err), lcl);
        }

        for bit in set_bits(mst_glb) {
            if bit == SOC_SLAVE_IEH || bit == SOC_IEH0_LOCAL_ERR_STATUS {
                continue;
            }
            let index = SocErrIndex::new(0, SocLocality::Global, hw_err, bit as u8);
            self.errors.inc_soc(index);
            self.log_soc_hw_error(index);
        }
        self.regs
            .write32(soc_global_err_stat_master_reg(base, hw_err), mst_glb);
    }

    fn gsc_hw_error_handler(
        &self,
        locked: &mut IrqLocked,
        hw_err: HardwareError,
    ) -> Result<()> {
        if !self.info.has_mem_sparing {
            return Ok(());
        }

        let base = PVC_GSC_HECI1_BASE;
        let status = gsc_hec_corr_uncorr_err_status(base, hw_err);
        let err_status = self.read_err_status(status)?;
        if err_status == 0 {
            return Ok(());
        }

        let fw_cause = if hw_err == HardwareError::Correctable
            && err_status & bit_of(GSC_COR_FW_REPORTED_ERR) != 0
        {
            self.read_err_status(gsc_hec_corr_fw_err_dw0(base))?
        } else {
            0
        };

        match hw_err {
            HardwareError::Correctable => {
                for bit in set_bits(err_status) {
                    match bit {
                        GSC_COR_SRAM_ECC_SINGLE_BIT_ERR => {
                            self.errors.inc_gsc(GscHwError::CorSramEcc);
                            hw_err!(
                                self,
                                "Single bit error on SRAM GSC Correctable Error, \
                                 GSC_HEC_CORR_ERR_STATUS:{:#010x}",
                                err_status
                            );
                        }
                        GSC_COR_FW_REPORTED_ERR => {
                            if !self.gsc_fw_reported_error(locked, hw_err, bit, fw_cause) {
                                break;
                            }
                        }
                        _ => hw_err!(
                            self,
                            "Undefined GSC Correctable Error, GSC_HEC_CORR_ERR_STATUS:{:#010x}",
                            err_status
                        ),
                    }
                }
            }
            HardwareError::NonFatal => {
                for bit in set_bits(err_status) {
                    let (err, name) = match bit {
                        GSC_UNCOR_MIA_SHUTDOWN_ERR => (
                            Some(GscHwError::UncorMiaShutdown),
                            "MinuteIA Unexpected Shutdown",
                        ),
                        GSC_UNCOR_MIA_INT_ERR => {
                            (Some(GscHwError::UncorMiaInt), "MinuteIA Internal Error")
                        }
                        GSC_UNCOR_SRAM_ECC_ERR => {
                            (Some(GscHwError::UncorSramEcc), "Double bit error on SRAM")
                        }
                        GSC_UNCOR_WDG_TIMEOUT_ERR => {
                            (Some(GscHwError::UncorWdgTimeout), "WDT 2nd Timeout")
                        }
                        GSC_UNCOR_ROM_PARITY_ERR => {
                            (Some(GscHwError::UncorRomParity), "ROM has a parity error")
                        }
                        GSC_UNCOR_UCODE_PARITY_ERR => (
                            Some(GscHwError::UncorUcodeParity),
                            "Ucode has a parity error",
                        ),
                        GSC_UNCOR_FW_REPORTED_ERR => {
                            (None, "Errors Reported to FW and Detected by FW")
                        }
                        GSC_UNCOR_GLITCH_DET_ERR => (
                            Some(GscHwError::UncorGlitchDet),
                            "Glitch is detected on voltage rail",
                        ),
                        GSC_UNCOR_FUSE_PULL_ERR => {
                            (Some(GscHwError::UncorFusePull), "Fuse Pull Error")
                        }
                        GSC_UNCOR_FUSE_CRC_CHECK_ERR => (
                            Some(GscHwError::UncorFuseCrcCheck),
                            "Fuse CRC Check Failed on Fuse Pull",
                        ),
                        GSC_UNCOR_SELFMBIST_ERR => {
                            (Some(GscHwError::UncorSelfmbist), "Self Mbist Failed")
                        }
                        GSC_UNCOR_AON_PARITY_ERR => {
                            (Some(GscHwError::UncorAonParity), "AON RF has parity error")
                        }
                        _ => (None, "Undefined"),
                    };

                    if let Some(err) = err {
                        self.errors.inc_gsc(err);
                    }
                    self.schedule(&self.gsc_hw_error_work);
                    hw_err!(
                        self,
                        "{} GSC NON_FATAL Error, GSC_HEC_UNCORR_ERR_STATUS:{:#010x}",
                        name,
                        err_status
                    );
                    hw_err!(
                        self,
                        "CSC services may have stopped running, reset the card to recover them"
                    );
                }
            }
            HardwareError::Fatal => hw_err!(self, "Fatal GSC Error Detected"),
        }

        self.regs.write32(status, err_status);
        Ok(())
    }

    /// Latch the firmware's memory sparing cause and queue the health work.
    /// Returns false if the firmware reported nothing.
    fn gsc_fw_reported_error(
        &self,
        locked: &mut IrqLocked,
        hw_err: HardwareError,
        bit: u32,
        fw_cause: u32,
    ) -> bool {
        locked.mem_sparing_cause |= fw_cause;
        let cause = locked.mem_sparing_cause;

        hw_err!(
            self,
            "GSC {} FW Error, GSC_HEC_CORR_FW_ERR_DW0:{:#010x}",
            if cause == BANK_CORRECTABLE_ERROR {
                "CORRECTABLE"
            } else {
                "UNCORRECTABLE"
            },
            cause
        );

        if cause == 0 {
            return false;
        }

        if self.info.logs_gt_errors {
            let swf0 = self.regs.read32(SWF_0);
            let swf1 = self.regs.read32(SWF_1);
            let record = HwErrorRecord {
                payload: Some(HbmErrorInfo::decode(swf0, swf1)),
                ..HwErrorRecord::new(hw_err, ErrorSource::Gsc, bit)
            };
            self.log_hbm_error(cause, &record);

            // written by the firmware, cleared by us
            self.regs.write32(SWF_0, 0);
            self.regs.write32(SWF_1, 0);
        }

        self.schedule(&self.mem_health_work);
        true
    }

    fn log_hbm_error(&self, cause: u32, record: &HwErrorRecord) {
        let Some(hbm) = record.payload else {
            return;
        };
        let advise = || {
            log::warn!(
                "inteld: GT{} run an HBM test/repair cycle to repair any permanent fault",
                self.id
            )
        };

        let mut report_state_change = false;
        match cause {
            BANK_CORRECTABLE_ERROR => {
                hw_err!(
                    self,
                    "[HBM ERROR]: Correctable Error Received on HBM Tile{}, Channel{}, \
                     Pseudo Channel {}, Bank{}, Row{}, Column{}",
                    hbm.tile,
                    hbm.channel,
                    hbm.pseudo_channel,
                    hbm.bank,
                    hbm.row,
                    hbm.column
                );
                report_state_change = hbm.state_changed();
            }
            BANK_SPARNG_ERR_MITIGATION_DOWNGRADED => hw_err!(
                self,
                "[HBM ERROR]: PCLS Applied on HBM Tile{}, Channel{}, Pseudo Channel{}, \
                 Bank{}, Row{}, Column{}",
                hbm.tile,
                hbm.channel,
                hbm.pseudo_channel,
                hbm.bank,
                hbm.row,
                hbm.column
            ),
            BANK_SPARNG_DIS_PCLS_EXCEEDED => match hbm.event {
                HBM_UC_DEMAND_ACCESS | HBM_PATROL_SCRUB_ERROR => {
                    let event = if hbm.event == HBM_UC_DEMAND_ACCESS {
                        "Uncorrectable Error on Demand Access received"
                    } else {
                        "Uncorrectable Error on Patrol Scrub"
                    };
                    hw_err!(
                        self,
                        "[HBM ERROR]: {} of HBM Tile{}, Channel{}, Pseudo Channel{}, Bank{}, Row{}",
                        event,
                        hbm.tile,
                        hbm.channel,
                        hbm.pseudo_channel,
                        hbm.bank,
                        hbm.row
                    );
                    if hbm.event == HBM_PATROL_SCRUB_ERROR {
                        advise();
                    }
                }
                HBM_PCLS_EXCEEDED | HBM_PCLS_SAME_CACHELINE => {
                    let event = if hbm.event == HBM_PCLS_EXCEEDED {
                        "Exceeded PCLS Threshold"
                    } else {
                        "Cannot Apply PCLS, PCLS Already Applied to This Line"
                    };
                    hw_err!(
                        self,
                        "[HBM ERROR]: {} on HBM Tile{}, Channel{}, Pseudo Channel{}",
                        event,
                        hbm.tile,
                        hbm.channel,
                        hbm.pseudo_channel
                    );
                    advise();
                    report_state_change =
                        hbm.event == HBM_PCLS_EXCEEDED && hbm.state_changed();
                }
                _ => hw_err!(self, "Unknown event for Error Cause: {:#x}", cause),
            },
            BANK_SPARNG_ENA_PCLS_UNCORRECTABLE => log::error!(
                "[HW ERROR] [HBM ERROR]: Unrepairable fault has been detected, replace the card"
            ),
            _ => hw_err!(self, "Unknown Error Cause: {:#x}", cause),
        }

        if report_state_change {
            hw_err!(
                self,
                "[HBM ERROR]: Old_State{} to New_State{} for HBM TILE{}",
                hbm.old_state,
                hbm.new_state,
                hbm.tile
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_from_bit() {
        assert_eq!(ErrorSource::from_bit(DEV_ERR_STAT_GT_ERROR), ErrorSource::Gt);
        assert_eq!(ErrorSource::from_bit(DEV_ERR_STAT_SOC_ERROR), ErrorSource::Soc);
        assert_eq!(ErrorSource::from_bit(5), ErrorSource::Unknown);
    }

    #[test]
    fn test_soc_names() {
        let punit = SocErrIndex::new(0, SocLocality::Global, HardwareError::Fatal, SOC_PUNIT as u8);
        assert_eq!(punit.name().to_string(), "PUNIT");
        assert!(punit.name().is_valid());

        let hbm = SocErrIndex::new(1, SocLocality::Global, HardwareError::Fatal, 14);
        assert_eq!(hbm.name().to_string(), "HBM SS3: Channel2");

        let hbm_nf = SocErrIndex::new(0, SocLocality::Global, HardwareError::NonFatal, 17);
        assert_eq!(hbm_nf.name().to_string(), "Invalid HBM SS1: Channel1");
        assert!(!hbm_nf.name().is_valid());

        let csc = SocErrIndex::new(0, SocLocality::Local, HardwareError::Fatal, SOC_PSF_CSC_1 as u8);
        assert!(!csc.name().is_valid());

        let cor = SocErrIndex::new(0, SocLocality::Global, HardwareError::Correctable, 8);
        assert_eq!(cor.name(), SocErrorName::Undefined);
    }

    #[test]
    fn test_soc_index_order() {
        let a = SocErrIndex::new(0, SocLocality::Global, HardwareError::Fatal, 31);
        let b = SocErrIndex::new(0, SocLocality::Local, HardwareError::Correctable, 0);
        let c = SocErrIndex::new(1, SocLocality::Global, HardwareError::Correctable, 0);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_hbm_decode() {
        // event 3, tile 1, channel 5, pseudo channel 1, row 0x1234
        let swf0 = 3 | (1 << 5) | (5 << 6) | (1 << 11) | (0x1234 << 12);
        // column 0x2a, bank 7, old state 1, new state 2
        let swf1 = 0x2a | (7 << 10) | (1 << 16) | (2 << 20);

        let info = HbmErrorInfo::decode(swf0, swf1);
        assert_eq!(info.event, HBM_PCLS_EXCEEDED);
        assert_eq!(info.tile, 1);
        assert_eq!(info.channel, 5);
        assert_eq!(info.pseudo_channel, 1);
        assert_eq!(info.row, 0x1234);
        assert_eq!(info.column, 0x2a);
        assert_eq!(info.bank, 7);
        assert!(info.state_changed());
    }

    #[test]
    fn test_counters_clear() {
        let counters = HwErrorCounters::new();
        counters.add_gt(GtHwError::FatTlb, 3);
        counters.update_gt_from_hw(GtHwError::CorSlm, 5);
        counters.update_gt_from_hw(GtHwError::CorSlm, 2);
        counters.inc_soc(SocErrIndex::new(0, SocLocality::Global, HardwareError::Fatal, 2));
        counters.record(&HwErrorRecord::new(HardwareError::Fatal, ErrorSource::Soc, 16));

        let before = counters.snapshot();
        assert_eq!(counters.gt(GtHwError::FatTlb), 3);
        assert_eq!(counters.gt(GtHwError::CorSlm), 5);
        assert_eq!(counters.source(HardwareError::Fatal, ErrorSource::Soc), 1);

        counters.add_gt(GtHwError::FatTlb, 1);
        assert!(counters.snapshot().dominates(&before));

        counters.clear();
        assert_eq!(counters.gt(GtHwError::FatTlb), 0);
        assert!(counters.soc_entries().is_empty());
        assert!(!counters.snapshot().dominates(&before));
    }
}
