//! Limit descriptors handed to the OS
//!
//! These are plain records: building one is a pure function of the caller's
//! inputs, so which limit kinds end up enabled can be checked without a
//! kernel. The platform layer copies them into the OS structures.

use std::ops::{BitOr, BitOrAssign};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{JobError, Result};

/// CPU rate unit used by the OS: hundredths of a percent
pub const CPU_RATE_SCALE: f64 = 10_000.0;

/// Basic limit flags (`JOB_OBJECT_LIMIT_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LimitFlags(u32);

impl LimitFlags {
    pub const WORKINGSET: LimitFlags = LimitFlags(0x0000_0001);
    pub const PROCESS_MEMORY: LimitFlags = LimitFlags(0x0000_0100);
    pub const JOB_MEMORY: LimitFlags = LimitFlags(0x0000_0200);
    pub const KILL_ON_JOB_CLOSE: LimitFlags = LimitFlags(0x0000_2000);

    pub const fn empty() -> Self {
        LimitFlags(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        LimitFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: LimitFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LimitFlags {
    type Output = LimitFlags;

    fn bitor(self, rhs: LimitFlags) -> LimitFlags {
        LimitFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for LimitFlags {
    fn bitor_assign(&mut self, rhs: LimitFlags) {
        self.0 |= rhs.0;
    }
}

/// CPU rate control flags (`JOB_OBJECT_CPU_RATE_CONTROL_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuRateFlags(u32);

impl CpuRateFlags {
    pub const ENABLE: CpuRateFlags = CpuRateFlags(0x1);
    pub const HARD_CAP: CpuRateFlags = CpuRateFlags(0x4);

    pub const fn from_bits(bits: u32) -> Self {
        CpuRateFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: CpuRateFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CpuRateFlags {
    type Output = CpuRateFlags;

    fn bitor(self, rhs: CpuRateFlags) -> CpuRateFlags {
        CpuRateFlags(self.0 | rhs.0)
    }
}

/// Memory limits requested by a caller. Absent fields leave their kind disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryLimits {
    /// Minimum working set per process, in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_working_set: Option<usize>,
    /// Maximum working set per process, in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_working_set: Option<usize>,
    /// Committed memory ceiling for the whole group, in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_job_memory: Option<usize>,
}

impl MemoryLimits {
    pub fn new(
        min_working_set: Option<usize>,
        max_working_set: Option<usize>,
        max_job_memory: Option<usize>,
    ) -> Self {
        Self {
            min_working_set,
            max_working_set,
            max_job_memory,
        }
    }

    pub fn with_working_set(min: usize, max: usize) -> Self {
        Self {
            min_working_set: Some(min),
            max_working_set: Some(max),
            ..Default::default()
        }
    }

    pub fn with_job_memory(limit: usize) -> Self {
        Self {
            max_job_memory: Some(limit),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_working_set.is_none()
            && self.max_working_set.is_none()
            && self.max_job_memory.is_none()
    }

    /// Reject values the OS would refuse. A lone working-set bound is not
    /// checked since it never reaches the descriptor.
    pub fn validate(&self) -> Result<()> {
        if self.max_job_memory == Some(0) {
            return Err(JobError::InvalidConfig(
                "Job memory limit must be greater than 0".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (self.min_working_set, self.max_working_set) {
            if min == 0 || max == 0 {
                return Err(JobError::InvalidConfig(
                    "Working set bounds must be greater than 0".to_string(),
                ));
            }
            if min > max {
                return Err(JobError::InvalidConfig(format!(
                    "Minimum working set ({}) exceeds maximum ({})",
                    min, max
                )));
            }
        }
        Ok(())
    }

    /// Build the full descriptor for this request.
    ///
    /// The result starts from the kill-on-close default every time; nothing
    /// from an earlier descriptor is carried over.
    pub fn to_descriptor(&self) -> ExtendedLimits {
        let mut limits = ExtendedLimits::kill_on_close();

        match (self.min_working_set, self.max_working_set) {
            (Some(min), Some(max)) => {
                limits.flags |= LimitFlags::WORKINGSET;
                limits.min_working_set = min;
                limits.max_working_set = max;
            }
            (None, None) => {}
            _ => warn!("Working set limit needs both bounds, ignoring the one given"),
        }

        if let Some(ceiling) = self.max_job_memory {
            limits.flags |= LimitFlags::JOB_MEMORY;
            limits.job_memory_limit = ceiling;
        }

        limits
    }
}

/// Extended limit descriptor (`JOBOBJECT_EXTENDED_LIMIT_INFORMATION` subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedLimits {
    pub flags: LimitFlags,
    pub min_working_set: usize,
    pub max_working_set: usize,
    pub job_memory_limit: usize,
}

impl ExtendedLimits {
    /// Descriptor with no limits except terminating members on close
    pub fn kill_on_close() -> Self {
        Self {
            flags: LimitFlags::KILL_ON_JOB_CLOSE,
            ..Default::default()
        }
    }

    pub fn kills_on_close(&self) -> bool {
        self.flags.contains(LimitFlags::KILL_ON_JOB_CLOSE)
    }

    /// Read back the memory limits this descriptor enables
    pub fn memory_limits(&self) -> MemoryLimits {
        let working_set = self.flags.contains(LimitFlags::WORKINGSET);
        MemoryLimits {
            min_working_set: working_set.then_some(self.min_working_set),
            max_working_set: working_set.then_some(self.max_working_set),
            max_job_memory: self
                .flags
                .contains(LimitFlags::JOB_MEMORY)
                .then_some(self.job_memory_limit),
        }
    }
}

/// CPU rate descriptor (`JOBOBJECT_CPU_RATE_CONTROL_INFORMATION`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuRateControl {
    pub flags: CpuRateFlags,
    /// Hundredths of a percent of total CPU time
    pub rate: u32,
}

impl CpuRateControl {
    /// Hard-capped rate from a fraction of total CPU (1.0 = 100%).
    ///
    /// Only non-finite, negative or oversized fractions are rejected here.
    /// Anything else, including 0.0 and values above 1.0, is passed to the OS,
    /// which decides whether the rate is acceptable.
    pub fn hard_cap(fraction: f64) -> Result<Self> {
        if !fraction.is_finite() || fraction < 0.0 {
            return Err(JobError::InvalidConfig(format!(
                "CPU rate must be a finite, non-negative fraction, got {}",
                fraction
            )));
        }

        let scaled = (fraction * CPU_RATE_SCALE).round();
        if scaled > u32::MAX as f64 {
            return Err(JobError::InvalidConfig(format!(
                "CPU rate {} is out of range",
                fraction
            )));
        }

        Ok(Self {
            flags: CpuRateFlags::ENABLE | CpuRateFlags::HARD_CAP,
            rate: scaled as u32,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.contains(CpuRateFlags::ENABLE)
    }

    /// Rate as a fraction of total CPU
    pub fn fraction(&self) -> f64 {
        self.rate as f64 / CPU_RATE_SCALE
    }
}
