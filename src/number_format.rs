//! Display formatting for Number members.
//!
//! A member's format string is either a single printf-style numeric conversion
//! (`%g`, `%8.3f`, `%+.2e`, `%d`, ...) or the sexagesimal `%<w>.<f>m` form. The
//! printf subset covers the flags `-+ 0#`, width, precision, the length modifiers
//! `h l L q j z t` (ignored) and the conversions `d i u f F e E g G x X o`.
//! Literal text around the conversion is preserved.

use crate::sexagesimal::{format_sexagesimal, FracBase};

/// Format `value` according to a member format string.
pub fn number_format(value: f64, format: &str) -> String {
    if let Some((width, frac)) = sexagesimal_layout(format) {
        return format_sexagesimal(value, width.saturating_sub(frac), FracBase::from_frac_digits(frac));
    }
    printf_format(value, format)
}

/// Recognise a leading `%<w>.<f>m` format, returning `(w, f)`.
pub fn sexagesimal_layout(format: &str) -> Option<(usize, usize)> {
    let rest = format.strip_prefix('%')?;
    let dot = rest.find('.')?;
    let width: usize = rest[..dot].parse().ok()?;
    let after = &rest[dot + 1..];
    let m = after.find('m')?;
    let frac: usize = after[..m].parse().ok()?;
    Some((width, frac))
}

#[derive(Debug, Default)]
struct Conversion {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
    kind: char,
}

fn printf_format(value: f64, format: &str) -> String {
    let mut out = String::new();
    let mut chars = format.char_indices().peekable();
    let mut converted = false;

    while let Some((_, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if let Some(&(_, '%')) = chars.peek() {
            chars.next();
            out.push('%');
            continue;
        }

        let mut conv = Conversion::default();
        while let Some(&(_, flag)) = chars.peek() {
            match flag {
                '-' => conv.left = true,
                '+' => conv.plus = true,
                ' ' => conv.space = true,
                '0' => conv.zero = true,
                '#' => conv.alt = true,
                _ => break,
            }
            chars.next();
        }
        while let Some(&(_, d)) = chars.peek() {
            match d.to_digit(10) {
                Some(digit) => {
                    conv.width = conv.width * 10 + digit as usize;
                    chars.next();
                }
                None => break,
            }
        }
        if let Some(&(_, '.')) = chars.peek() {
            chars.next();
            let mut precision = 0usize;
            while let Some(&(_, d)) = chars.peek() {
                match d.to_digit(10) {
                    Some(digit) => {
                        precision = precision * 10 + digit as usize;
                        chars.next();
                    }
                    None => break,
                }
            }
            conv.precision = Some(precision);
        }
        while let Some(&(_, m)) = chars.peek() {
            if matches!(m, 'h' | 'l' | 'L' | 'q' | 'j' | 'z' | 't') {
                chars.next();
            } else {
                break;
            }
        }
        match chars.next() {
            Some((_, kind)) if !converted => {
                conv.kind = kind;
                out.push_str(&render(value, &conv));
                converted = true;
            }
            Some((_, kind)) => out.push(kind),
            None => break,
        }
    }

    if !converted && out.is_empty() {
        return render(
            value,
            &Conversion {
                kind: 'g',
                ..Default::default()
            },
        );
    }
    out
}

fn render(value: f64, conv: &Conversion) -> String {
    let upper = conv.kind.is_ascii_uppercase();
    let negative = value.is_sign_negative() && value != 0.0 && !value.is_nan();
    let magnitude = value.abs();

    let (body, numeric) = if !value.is_finite() {
        let text = if value.is_nan() { "nan" } else { "inf" };
        (if upper { text.to_uppercase() } else { text.to_string() }, false)
    } else {
        let body = match conv.kind {
            'd' | 'i' | 'u' => format!("{}", magnitude.trunc() as u64),
            'x' => format!("{:x}", magnitude.trunc() as u64),
            'X' => format!("{:X}", magnitude.trunc() as u64),
            'o' => format!("{:o}", magnitude.trunc() as u64),
            'f' | 'F' => format!("{:.*}", conv.precision.unwrap_or(6), magnitude),
            'e' | 'E' => exponent_form(magnitude, conv.precision.unwrap_or(6), upper),
            _ => general_form(magnitude, conv.precision.unwrap_or(6), conv.alt, upper),
        };
        (body, true)
    };

    let sign = if negative {
        "-"
    } else if conv.plus {
        "+"
    } else if conv.space {
        " "
    } else {
        ""
    };

    let len = sign.len() + body.len();
    if len >= conv.width {
        return format!("{sign}{body}");
    }
    let pad = conv.width - len;
    if conv.left {
        format!("{sign}{body}{}", " ".repeat(pad))
    } else if conv.zero && numeric {
        format!("{sign}{}{body}", "0".repeat(pad))
    } else {
        format!("{}{sign}{body}", " ".repeat(pad))
    }
}

/// `%e`: one leading digit, `precision` decimals, exponent with sign and two digits.
fn exponent_form(magnitude: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{:.*e}", precision, magnitude);
    let (mantissa, exp) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let marker = if upper { 'E' } else { 'e' };
    let exp_sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}{marker}{exp_sign}{:02}", exp.abs())
}

/// `%g`: shortest of `%e`/`%f` at `precision` significant digits.
fn general_form(magnitude: f64, precision: usize, alt: bool, upper: bool) -> String {
    let precision = precision.max(1);
    let exp = if magnitude == 0.0 {
        0
    } else {
        let raw = format!("{:.*e}", precision - 1, magnitude);
        raw.split_once('e')
            .and_then(|(_, e)| e.parse::<i32>().ok())
            .unwrap_or(0)
    };

    let text = if exp < -4 || exp >= precision as i32 {
        exponent_form(magnitude, precision - 1, upper)
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        format!("{:.*}", decimals, magnitude)
    };

    if alt {
        return text;
    }
    strip_trailing_zeros(&text)
}

fn strip_trailing_zeros(text: &str) -> String {
    let (mantissa, exponent) = match text.find(&['e', 'E'][..]) {
        Some(idx) => text.split_at(idx),
        None => (text, ""),
    };
    if !mantissa.contains('.') {
        return text.to_string();
    }
    let trimmed = mantissa.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed}{exponent}")
}
