//! Multipart part planning

use crate::error::{AppError, Result};

/// Upper bound on parts accepted by S3 for one upload
pub const MAX_PARTS: u64 = 10_000;

/// Byte range of one multipart part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpec {
    /// 1-based part number
    pub part_number: i32,
    pub offset: u64,
    pub len: u64,
}

/// Split `size` bytes into `ceil(size / chunk_size)` parts of `chunk_size`
/// bytes; the last part carries the remainder.
pub fn plan_parts(size: u64, chunk_size: u64) -> Result<Vec<PartSpec>> {
    if chunk_size == 0 {
        return Err(AppError::InvalidConfig("chunk size must be greater than zero".to_string()));
    }

    let num_parts = size.div_ceil(chunk_size);
    if num_parts > MAX_PARTS {
        return Err(AppError::InvalidConfig(format!(
            "{} bytes with chunk size {} needs {} parts (max {})",
            size, chunk_size, num_parts, MAX_PARTS
        )));
    }

    let parts = (1..=num_parts)
        .map(|i| {
            let offset = (i - 1) * chunk_size;
            let len = if i == num_parts {
                size - (num_parts - 1) * chunk_size
            } else {
                chunk_size
            };
            PartSpec {
                part_number: i as i32,
                offset,
                len,
            }
        })
        .collect();

    Ok(parts)
}
