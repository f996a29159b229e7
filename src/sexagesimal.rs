//! Sexagesimal (degrees/hours : minutes : seconds) formatting and parsing.
//!
//! Number members whose display format is `%<w>.<f>m` render their value as
//! `[-]D:MM[:SS[.ff]]`. The `f` digit selects the resolution:
//!
//! | `f` | resolution          | example        |
//! |-----|---------------------|----------------|
//! | 3   | minutes             | `12:30`        |
//! | 5   | tenths of a minute  | `12:30.5`      |
//! | 6   | seconds             | `12:30:27`     |
//! | 8   | tenths of a second  | `12:30:27.4`   |
//! | 9   | hundredths of a sec | `12:30:27.45`  |
//!
//! Rounding is half-away-from-zero at the selected resolution. A negative value
//! whose whole part rounds to zero keeps its sign (`-0:30`).

use crate::error::{AppResult, IndiError};

/// Resolution of a sexagesimal rendering, expressed as units per whole degree/hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FracBase {
    /// `D:MM`
    Minutes,
    /// `D:MM.m`
    TenthMinutes,
    /// `D:MM:SS`
    Seconds,
    /// `D:MM:SS.s`
    TenthSeconds,
    /// `D:MM:SS.ss`
    HundredthSeconds,
}

impl FracBase {
    /// Number of resolution units in one whole unit.
    pub fn units(self) -> u64 {
        match self {
            FracBase::Minutes => 60,
            FracBase::TenthMinutes => 600,
            FracBase::Seconds => 3600,
            FracBase::TenthSeconds => 36_000,
            FracBase::HundredthSeconds => 360_000,
        }
    }

    /// Map the `f` digit of a `%w.fm` format to a resolution.
    ///
    /// Unknown digits fall back to minutes.
    pub fn from_frac_digits(frac: usize) -> Self {
        match frac {
            9 => FracBase::HundredthSeconds,
            8 => FracBase::TenthSeconds,
            6 => FracBase::Seconds,
            5 => FracBase::TenthMinutes,
            _ => FracBase::Minutes,
        }
    }
}

impl TryFrom<u64> for FracBase {
    type Error = IndiError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            60 => Ok(FracBase::Minutes),
            600 => Ok(FracBase::TenthMinutes),
            3600 => Ok(FracBase::Seconds),
            36_000 => Ok(FracBase::TenthSeconds),
            360_000 => Ok(FracBase::HundredthSeconds),
            other => Err(IndiError::Format(format!("fraction base {other}"))),
        }
    }
}

/// Render `value` as `[-]D:MM[:SS[.ff]]`, right-aligning the whole part in `width`.
pub fn format_sexagesimal(value: f64, width: usize, base: FracBase) -> String {
    let negative = value < 0.0;
    let units = base.units();
    let scaled = (value.abs() * units as f64 + 0.5).floor();
    let n = if scaled.is_finite() { scaled as u64 } else { 0 };
    let whole = n / units;
    let frac = n % units;

    let mut out = if negative && whole == 0 {
        format!("{:>width$}", "-0", width = width)
    } else if negative {
        format!("{:>width$}", -(whole as i64), width = width)
    } else {
        format!("{:>width$}", whole, width = width)
    };

    let rest = match base {
        FracBase::Minutes => format!(":{:02}", frac),
        FracBase::TenthMinutes => format!(":{:02}.{:1}", frac / 10, frac % 10),
        FracBase::Seconds => format!(":{:02}:{:02}", frac / 60, frac % 60),
        FracBase::TenthSeconds => {
            let (m, s) = (frac / 600, frac % 600);
            format!(":{:02}:{:02}.{:1}", m, s / 10, s % 10)
        }
        FracBase::HundredthSeconds => {
            let (m, s) = (frac / 6000, frac % 6000);
            format!(":{:02}:{:02}.{:02}", m, s / 100, s % 100)
        }
    };
    out.push_str(&rest);
    out
}

/// Parse sexagesimal text into a real number.
///
/// Up to three numeric fields separated by any run of non-digit characters are
/// read as `a + b/60 + c/3600`; missing trailing fields are zero. A `-` anywhere
/// in the text negates the whole result. Plain decimal text (including exponent
/// notation) is accepted as-is.
pub fn parse_sexagesimal(text: &str) -> AppResult<f64> {
    let trimmed = text.trim();
    if let Ok(plain) = trimmed.parse::<f64>() {
        // `nan`, `inf` and overflowing exponents carry no usable field
        return if plain.is_finite() {
            Ok(plain)
        } else {
            Err(IndiError::Format(text.to_string()))
        };
    }

    let negative = trimmed.contains('-');
    let cleaned = trimmed.replacen('-', " ", 1);
    let bytes = cleaned.as_bytes();

    let mut fields = [0.0f64; 3];
    let mut found = 0;
    let mut pos = 0;

    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }

    while found < 3 {
        if found > 0 {
            let sep_start = pos;
            while pos < bytes.len() && !bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos == sep_start || pos >= bytes.len() {
                break;
            }
        }
        match scan_float(&cleaned[pos..]) {
            Some((field, consumed)) => {
                fields[found] = field;
                found += 1;
                pos += consumed;
            }
            None => break,
        }
    }

    if found == 0 {
        return Err(IndiError::Format(text.to_string()));
    }

    let value = fields[0] + fields[1] / 60.0 + fields[2] / 3600.0;
    if !value.is_finite() {
        return Err(IndiError::Format(text.to_string()));
    }
    Ok(if negative { -value } else { value })
}

/// Scan a leading decimal number (`[+]digits[.digits][e[+-]digits]`).
fn scan_float(text: &str) -> Option<(f64, usize)> {
    let bytes = text.as_bytes();
    let mut end = 0;
    if end < bytes.len() && bytes[end] == b'+' {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa_digits = end - digits_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        mantissa_digits += frac_end - frac_start;
        if mantissa_digits > 0 {
            end = frac_end;
        }
    }
    if mantissa_digits == 0 {
        return None;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    text[..end].parse::<f64>().ok().map(|v| (v, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_BASES: [FracBase; 5] = [
        FracBase::Minutes,
        FracBase::TenthMinutes,
        FracBase::Seconds,
        FracBase::TenthSeconds,
        FracBase::HundredthSeconds,
    ];

    #[test]
    fn formats_each_resolution() {
        let v = 12.0 + 30.0 / 60.0 + 27.46 / 3600.0;
        assert_eq!(format_sexagesimal(v, 2, FracBase::Minutes), "12:30");
        assert_eq!(format_sexagesimal(v, 2, FracBase::TenthMinutes), "12:30.5");
        assert_eq!(format_sexagesimal(v, 2, FracBase::Seconds), "12:30:27");
        assert_eq!(format_sexagesimal(v, 2, FracBase::TenthSeconds), "12:30:27.5");
        assert_eq!(format_sexagesimal(v, 2, FracBase::HundredthSeconds), "12:30:27.46");
    }

    #[test]
    fn pads_whole_part_to_width() {
        assert_eq!(format_sexagesimal(5.5, 4, FracBase::Minutes), "   5:30");
        assert_eq!(format_sexagesimal(-5.5, 4, FracBase::Minutes), "  -5:30");
    }

    #[test]
    fn keeps_sign_of_negative_zero_whole_part() {
        assert_eq!(format_sexagesimal(-0.5, 2, FracBase::Minutes), "-0:30");
        assert_eq!(format_sexagesimal(-0.5, 4, FracBase::Minutes), "  -0:30");
        assert_eq!(format_sexagesimal(-0.001, 2, FracBase::Seconds), "-0:00:04");
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(format_sexagesimal(1.0 + 0.6 / 60.0, 1, FracBase::Minutes), "1:01");
        assert_eq!(format_sexagesimal(1.0 + 0.4 / 60.0, 1, FracBase::Minutes), "1:00");
        assert_eq!(format_sexagesimal(-1.0 - 0.6 / 60.0, 1, FracBase::Minutes), "-1:01");
        assert_eq!(format_sexagesimal(-1.0 - 0.4 / 60.0, 1, FracBase::Minutes), "-1:00");
        // carry into the whole part
        assert_eq!(format_sexagesimal(1.9999, 1, FracBase::Minutes), "2:00");
    }

    #[test]
    fn parses_common_shapes() {
        assert_eq!(parse_sexagesimal("12:30").unwrap(), 12.5);
        assert!((parse_sexagesimal("12:30:36").unwrap() - 12.51).abs() < 1e-12);
        assert!((parse_sexagesimal("12 30 36").unwrap() - 12.51).abs() < 1e-12);
        assert!((parse_sexagesimal("12d30m36s").unwrap() - 12.51).abs() < 1e-12);
        assert_eq!(parse_sexagesimal("-0:30").unwrap(), -0.5);
        assert_eq!(parse_sexagesimal("  -12:30  ").unwrap(), -12.5);
        assert_eq!(parse_sexagesimal("42").unwrap(), 42.0);
        assert_eq!(parse_sexagesimal("1.5e3").unwrap(), 1500.0);
        assert_eq!(parse_sexagesimal("12:30.5").unwrap(), 12.0 + 30.5 / 60.0);
    }

    #[test]
    fn rejects_text_without_numbers() {
        assert!(matches!(parse_sexagesimal(""), Err(IndiError::Format(_))));
        assert!(matches!(parse_sexagesimal("abc"), Err(IndiError::Format(_))));
        assert!(matches!(parse_sexagesimal(":-:"), Err(IndiError::Format(_))));
        for word in ["nan", "NaN", "-nan", "inf", "-inf", "infinity", "Infinity", "1e999"] {
            assert!(matches!(parse_sexagesimal(word), Err(IndiError::Format(_))), "{word}");
        }
    }

    #[test]
    fn round_trips_within_one_unit() {
        for base in ALL_BASES {
            let unit = 1.0 / base.units() as f64;
            let mut x = -400.0;
            while x <= 400.0 {
                let text = format_sexagesimal(x, 4, base);
                let back = parse_sexagesimal(&text).unwrap();
                assert!(
                    (back - x).abs() <= unit,
                    "{:?}: {} -> '{}' -> {}",
                    base,
                    x,
                    text,
                    back
                );
                x += 0.7371;
            }
        }
    }

    #[test]
    fn round_trips_negative_zero_whole_parts() {
        for base in ALL_BASES {
            let unit = 1.0 / base.units() as f64;
            for x in [-0.999, -0.5, -0.25, -0.0101, -unit] {
                let text = format_sexagesimal(x, 3, base);
                assert!(text.trim_start().starts_with('-'), "{}", text);
                let back = parse_sexagesimal(&text).unwrap();
                assert!((back - x).abs() <= unit, "{:?}: {} -> {}", base, x, back);
            }
        }
    }

    #[test]
    fn frac_base_from_digits_and_units() {
        assert_eq!(FracBase::from_frac_digits(9), FracBase::HundredthSeconds);
        assert_eq!(FracBase::from_frac_digits(3), FracBase::Minutes);
        assert_eq!(FracBase::try_from(36_000).unwrap(), FracBase::TenthSeconds);
        assert!(FracBase::try_from(100).is_err());
    }
}
