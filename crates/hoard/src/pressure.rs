// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

/// Coarse classification of host memory usage, driving how aggressively the
/// trim controller prunes each pool layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// Plenty of headroom; retain cached elements for a long time.
    Low,
    /// Memory is filling up; age out cached elements faster.
    Medium,
    /// The host is close to its limit; release cached elements immediately.
    High,
}

/// A point-in-time reading of host memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLoad {
    /// Bytes currently in use.
    pub load_bytes: u64,

    /// The byte count at which the host considers itself under high pressure.
    pub high_threshold_bytes: u64,
}

impl MemoryLoad {
    /// Classifies this reading: [`High`][MemoryPressure::High] at 90% of the
    /// threshold or above, [`Medium`][MemoryPressure::Medium] at 70%, otherwise
    /// [`Low`][MemoryPressure::Low].
    #[must_use]
    pub fn classify(self) -> MemoryPressure {
        let load = u128::from(self.load_bytes);
        let threshold = u128::from(self.high_threshold_bytes);

        if load * 10 >= threshold * 9 {
            MemoryPressure::High
        } else if load * 10 >= threshold * 7 {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Low
        }
    }
}

/// Where a pool learns about host memory usage.
///
/// The default source reads from the operating system (`sysinfo(2)` on Linux,
/// `GlobalMemoryStatusEx` on Windows). On hosts where no reading is available the
/// source reports [`MemoryPressure::High`], which keeps retained memory small rather
/// than risking unbounded growth on an unobservable host.
///
/// Embedders with a better view of their memory budget (e.g. a container limit the
/// OS counters do not reflect) can supply a custom reader via [`PressureSource::custom`].
#[derive(Clone)]
pub struct PressureSource(SourceRepr);

#[derive(Clone)]
enum SourceRepr {
    Os,
    Custom(Arc<dyn Fn() -> Option<MemoryLoad> + Send + Sync>),
}

impl PressureSource {
    /// Creates the operating-system backed source.
    #[must_use]
    pub fn os() -> Self {
        Self(SourceRepr::Os)
    }

    /// Creates a source backed by the given reader. Returning `None` from the reader
    /// classifies as [`MemoryPressure::High`].
    pub fn custom<F>(reader: F) -> Self
    where
        F: Fn() -> Option<MemoryLoad> + Send + Sync + 'static,
    {
        Self(SourceRepr::Custom(Arc::new(reader)))
    }

    /// Takes a reading and classifies it.
    #[must_use]
    pub fn current(&self) -> MemoryPressure {
        let reading = match &self.0 {
            SourceRepr::Os => os_memory_load(),
            SourceRepr::Custom(reader) => reader(),
        };

        reading.map_or(MemoryPressure::High, MemoryLoad::classify)
    }
}

impl Default for PressureSource {
    fn default() -> Self {
        Self::os()
    }
}

impl fmt::Debug for PressureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            SourceRepr::Os => f.write_str("PressureSource::Os"),
            SourceRepr::Custom(_) => f.write_str("PressureSource::Custom"),
        }
    }
}

#[cfg(target_os = "linux")]
fn os_memory_load() -> Option<MemoryLoad> {
    // SAFETY: an all-zero sysinfo struct is a valid value for the kernel to overwrite.
    let mut info = unsafe { std::mem::zeroed::<libc::sysinfo>() };

    // SAFETY: the pointer refers to a live, writable struct of the correct type.
    let rc = unsafe { libc::sysinfo(&raw mut info) };
    if rc != 0 {
        return None;
    }

    // The ram fields are c_ulong, whose width differs across libc targets; widen
    // through u128 before scaling by the unit size.
    let unit = u128::from(info.mem_unit.max(1));
    let total = u128::from(info.totalram) * unit;
    let free = u128::from(info.freeram) * unit;

    Some(MemoryLoad {
        load_bytes: u64::try_from(total.saturating_sub(free)).unwrap_or(u64::MAX),
        high_threshold_bytes: u64::try_from(total).unwrap_or(u64::MAX),
    })
}

#[cfg(windows)]
fn os_memory_load() -> Option<MemoryLoad> {
    use windows_sys::Win32::System::SystemInformation::{GlobalMemoryStatusEx, MEMORYSTATUSEX};

    #[expect(clippy::cast_possible_truncation, reason = "struct size is far below u32::MAX")]
    let length = size_of::<MEMORYSTATUSEX>() as u32;

    let mut status = MEMORYSTATUSEX {
        dwLength: length,
        dwMemoryLoad: 0,
        ullTotalPhys: 0,
        ullAvailPhys: 0,
        ullTotalPageFile: 0,
        ullAvailPageFile: 0,
        ullTotalVirtual: 0,
        ullAvailVirtual: 0,
        ullAvailExtendedVirtual: 0,
    };

    // SAFETY: the struct is live, writable and has dwLength set as the API requires.
    let ok = unsafe { GlobalMemoryStatusEx(&raw mut status) };
    if ok == 0 {
        return None;
    }

    Some(MemoryLoad {
        load_bytes: status.ullTotalPhys.saturating_sub(status.ullAvailPhys),
        high_threshold_bytes: status.ullTotalPhys,
    })
}

#[cfg(not(any(target_os = "linux", windows)))]
fn os_memory_load() -> Option<MemoryLoad> {
    None
}
