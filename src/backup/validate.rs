/// Archives smaller than this are treated as empty or corrupt dumps.
pub const MIN_ARCHIVE_SIZE: u64 = 4096;

/// Allowed relative drift against the previous successful archive, in percent.
pub const MAX_SIZE_DRIFT_PERCENT: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeCheck {
    pub accepted: bool,
    pub warning: bool,
    pub reason: String,
}

pub fn validate(size: u64, previous_success_size: Option<u64>) -> SizeCheck {
    if size < MIN_ARCHIVE_SIZE {
        return SizeCheck {
            accepted: false,
            warning: false,
            reason: format!(
                "archive is {} bytes, below the {} byte minimum",
                size, MIN_ARCHIVE_SIZE
            ),
        };
    }

    let previous = match previous_success_size {
        Some(prev) if prev > 0 => prev,
        _ => {
            return SizeCheck {
                accepted: true,
                warning: false,
                reason: "no previous successful backup to compare against".to_string(),
            }
        }
    };

    let diff = size.abs_diff(previous);
    // diff / previous > 10%, kept in integers so the boundary is exact
    let drifted = u128::from(diff) * 100 > u128::from(previous) * u128::from(MAX_SIZE_DRIFT_PERCENT);
    let percent = diff as f64 / previous as f64 * 100.0;

    if drifted {
        SizeCheck {
            accepted: true,
            warning: true,
            reason: format!(
                "archive size {} differs from previous {} by {:.1}%",
                size, previous, percent
            ),
        }
    } else {
        SizeCheck {
            accepted: true,
            warning: false,
            reason: format!("within {}% of previous {}", MAX_SIZE_DRIFT_PERCENT, previous),
        }
    }
}
