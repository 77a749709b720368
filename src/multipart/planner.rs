//! Splits an object into multipart upload parts.

use crate::error::{Error, Result};

/// Smallest part the service accepts (except for the last one).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
/// Largest single part the service accepts.
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
/// Maximum number of parts in one upload.
pub const MAX_PARTS: u32 = 10_000;
/// Largest object a multipart upload can produce.
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024 * 1024;

/// Bounds used to choose a part size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartSizing {
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub max_parts: u32,
}

impl Default for PartSizing {
    fn default() -> Self {
        Self {
            min_part_size: MIN_PART_SIZE,
            max_part_size: MAX_PART_SIZE,
            max_parts: MAX_PARTS,
        }
    }
}

impl PartSizing {
    pub fn new(min_part_size: u64, max_part_size: u64, max_parts: u32) -> Result<Self> {
        let sizing = Self {
            min_part_size,
            max_part_size,
            max_parts,
        };
        sizing.validate()?;
        Ok(sizing)
    }

    /// Protocol bounds with a caller-preferred minimum part size.
    pub fn with_min_part_size(min_part_size: u64) -> Result<Self> {
        Self::new(min_part_size, MAX_PART_SIZE, MAX_PARTS)
    }

    fn validate(&self) -> Result<()> {
        if self.min_part_size == 0 {
            return Err(Error::invalid_config("min part size must be at least 1 byte"));
        }
        if self.min_part_size > self.max_part_size {
            return Err(Error::invalid_config(
                "min part size must not exceed max part size",
            ));
        }
        if self.max_parts == 0 || self.max_parts > MAX_PARTS {
            return Err(Error::invalid_config("max parts must be between 1 and 10000"));
        }
        Ok(())
    }
}

/// One part's place in the object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number.
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
}

/// Part layout for one upload.
///
/// With a known total every part has the chosen size except the last, which
/// holds the remainder. A zero-byte object is a single empty part because
/// completion needs at least one. With an unknown total parts are cut at the
/// chosen size as input arrives and the last may be short.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartPlan {
    part_size: u64,
    total: Option<u64>,
    max_parts: u32,
}

impl PartPlan {
    pub fn new(total: Option<u64>, sizing: PartSizing) -> Result<Self> {
        sizing.validate()?;

        let Some(total) = total else {
            return Ok(Self {
                part_size: sizing.min_part_size,
                total: None,
                max_parts: sizing.max_parts,
            });
        };

        if total > MAX_OBJECT_SIZE {
            return Err(Error::invalid_config(
                "object size exceeds the 5 TiB multipart limit",
            ));
        }

        let spread = total.div_ceil(u64::from(sizing.max_parts));
        let part_size = sizing.min_part_size.max(spread);
        if part_size > sizing.max_part_size {
            return Err(Error::invalid_config(format!(
                "object of {total} bytes needs parts of {part_size} bytes, above the \
                 {} byte limit",
                sizing.max_part_size
            )));
        }

        Ok(Self {
            part_size,
            total: Some(total),
            max_parts: sizing.max_parts,
        })
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Number of parts, when the total is known.
    pub fn part_count(&self) -> Option<u32> {
        self.total.map(|total| {
            if total == 0 {
                1
            } else {
                // Bounded by max_parts, which fits in u32.
                total.div_ceil(self.part_size) as u32
            }
        })
    }

    /// Layout of `part_number`. With an unknown total the length is the
    /// nominal part size; the last part may turn out shorter.
    pub fn part(&self, part_number: u32) -> Result<PartRange> {
        if part_number == 0 {
            return Err(Error::invalid_config("part numbers start at 1"));
        }
        let limit = self.part_count().unwrap_or(self.max_parts);
        if part_number > limit {
            return Err(Error::invalid_config(format!(
                "part {part_number} is beyond the {limit} part limit of this upload"
            )));
        }

        let offset = u64::from(part_number - 1) * self.part_size;
        let length = match self.total {
            Some(total) => self.part_size.min(total - offset),
            None => self.part_size,
        };
        Ok(PartRange {
            part_number,
            offset,
            length,
        })
    }
}
