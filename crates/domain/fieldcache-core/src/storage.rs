use fieldcache_config::{CRITICAL_STORAGE_FLOOR_BYTES, LOW_STORAGE_HEADROOM_BYTES};

/// Outcome of a free-space check against an estimated requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStatus {
    Sufficient,
    Low { available: u64, required: u64 },
    Insufficient { available: u64, required: u64 },
    CriticallyLow { available: u64, required: u64 },
}

impl StorageStatus {
    pub fn assess(available: u64, required: u64) -> Self {
        if available < CRITICAL_STORAGE_FLOOR_BYTES || available < required / 4 {
            StorageStatus::CriticallyLow {
                available,
                required,
            }
        } else if available < required {
            StorageStatus::Insufficient {
                available,
                required,
            }
        } else if available < required.saturating_add(LOW_STORAGE_HEADROOM_BYTES) {
            StorageStatus::Low {
                available,
                required,
            }
        } else {
            StorageStatus::Sufficient
        }
    }

    /// Only a critically low device blocks an operation.
    pub fn blocks(&self) -> bool {
        matches!(self, StorageStatus::CriticallyLow { .. })
    }

    pub fn warning(&self) -> Option<String> {
        match self {
            StorageStatus::Sufficient => None,
            StorageStatus::Low {
                available,
                required,
            } => Some(format!(
                "Storage is low: {} MB free, about {} MB needed",
                available / 1_000_000,
                required / 1_000_000
            )),
            StorageStatus::Insufficient {
                available,
                required,
            } => Some(format!(
                "Storage may be insufficient: {} MB free, about {} MB needed",
                available / 1_000_000,
                required / 1_000_000
            )),
            StorageStatus::CriticallyLow {
                available,
                required,
            } => Some(format!(
                "Storage is critically low: {} MB free, about {} MB needed",
                available / 1_000_000,
                required / 1_000_000
            )),
        }
    }
}
