//! Read depth <-> one signed byte.
//!
//! Exact through 182, log-scaled above. Combining depths must go through
//! decode -> add -> encode; byte arithmetic on the log range is meaningless.

use crate::error::CodecError;

/// Logical missing-depth sentinel, distinct from zero.
pub const DEPTH_MISSING: i32 = -1;

/// Reserved byte for the missing sentinel.
pub const DEPTH_MISSING_BYTE: i8 = i8::MIN;

/// Largest depth the log range resolves before saturating.
pub const MAX_ACC_DEPTH: i32 = 10482;

// Log range: bytes -56..=-127 cover 183..=MAX_ACC_DEPTH geometrically.
// 71 steps over a 10482/183 span keeps the round-trip relative error
// under 3%.
const LOG_STEPS: i32 = 71;
const LOG_FLOOR: f64 = 183.0;

fn log_k() -> f64 {
    LOG_STEPS as f64 / (MAX_ACC_DEPTH as f64 / LOG_FLOOR).ln()
}

fn log_decode(step: i32) -> i32 {
    (LOG_FLOOR * (step as f64 / log_k()).exp()).round() as i32
}

/// Encode a depth into one byte.
///
/// 0..=127 map to themselves; 128..=182 map to `127 - depth` (still exact);
/// larger depths take the nearest log-range byte, saturating at the ceiling.
pub fn depth_to_byte(depth: i32) -> Result<i8, CodecError> {
    if depth == DEPTH_MISSING {
        return Ok(DEPTH_MISSING_BYTE);
    }
    if depth < 0 {
        return Err(CodecError::InvalidDepth(depth));
    }
    if depth <= 127 {
        return Ok(depth as i8);
    }
    if depth <= 182 {
        return Ok((127 - depth) as i8);
    }

    let t = log_k() * (depth as f64 / LOG_FLOOR).ln();
    let lo = (t.floor() as i32).clamp(0, LOG_STEPS);
    let hi = (t.ceil() as i32).clamp(0, LOG_STEPS);
    // Nearest decoded value wins, not nearest exponent.
    let step = if (depth - log_decode(lo)).abs() <= (log_decode(hi) - depth).abs() {
        lo
    } else {
        hi
    };
    Ok((-56 - step) as i8)
}

/// Decode a depth byte. Total; never fails. Exact inverse of the two exact
/// ranges, log formula for everything in -127..=-56.
pub fn byte_to_depth(byte: i8) -> i32 {
    if byte == DEPTH_MISSING_BYTE {
        return DEPTH_MISSING;
    }
    if byte >= 0 {
        return byte as i32;
    }
    let b = byte as i32;
    if b >= -55 {
        return 127 - b;
    }
    log_decode(-b - 56)
}

/// Decode, add, re-encode. The only sanctioned way to combine stored depths.
pub fn add_byte_depths(a: i8, b: i8) -> Result<i8, CodecError> {
    let da = byte_to_depth(a);
    let db = byte_to_depth(b);
    if da == DEPTH_MISSING {
        return Ok(b);
    }
    if db == DEPTH_MISSING {
        return Ok(a);
    }
    depth_to_byte((da + db).min(MAX_ACC_DEPTH))
}
