//! Fallback backend for platforms without `perf_event_open`.

use crate::domain::PmuError;
use crate::pmu::PmuCounters;

/// Always refuses to open; callers downgrade to a run without counters.
pub struct PerfCounterGroup {
    _private: (),
}

impl PerfCounterGroup {
    pub fn open() -> Result<Self, PmuError> {
        Err(PmuError::Unsupported)
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn finalize(self) -> Result<PmuCounters, PmuError> {
        Ok(PmuCounters::default())
    }
}
