//! ---
//! sw_section: "01-core-functionality"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Duration helpers shared by log fields and reports."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use std::time::Duration;

/// Convert a duration into milliseconds, saturating at `u64::MAX`.
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
