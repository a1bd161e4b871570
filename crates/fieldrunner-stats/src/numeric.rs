//! Number helpers matching the arithmetic scripts expect.

/// Upper bound used when a caller does not cap values.
pub const NO_LIMIT: f64 = 1e100;

/// `Math.round`: halves round towards positive infinity.
pub fn js_round(x: f64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let floor = x.floor();
    if x - floor >= 0.5 {
        floor + 1.0
    } else {
        floor
    }
}

/// Round `value` to `decimals` places; `None` leaves it untouched.
pub fn round_to(value: f64, decimals: Option<i32>) -> f64 {
    match decimals {
        None => value,
        Some(d) => {
            let mul = 10f64.powi(d);
            js_round(value * mul) / mul
        }
    }
}

/// Render a number the way script output shows it (`1` not `1.0`, `NaN`,
/// `Infinity`, `1e+21`).
///
/// Magnitudes of at least 1e21 or below 1e-6 use exponent form, as
/// `String(n)` does in scripts.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if value == 0.0 {
        "0".to_string()
    } else if value.abs() >= 1e21 || value.abs() < 1e-6 {
        let text = format!("{value:e}");
        match text.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => text,
        }
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_round_halves_go_up() {
        assert_eq!(js_round(2.5), 3.0);
        assert_eq!(js_round(-2.5), -2.0);
        assert_eq!(js_round(-2.6), -3.0);
        assert_eq!(js_round(1.4), 1.0);
        assert!(js_round(f64::NAN).is_nan());
    }

    #[test]
    fn test_round_to_decimals() {
        assert_eq!(round_to(2.13808993, Some(2)), 2.14);
        assert_eq!(round_to(1234.5, Some(-2)), 1200.0);
        assert_eq!(round_to(1.23456, None), 1.23456);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.25), "0.25");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_format_number_exponent_range() {
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(-2.5e30), "-2.5e+30");
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(1.5e-7), "1.5e-7");
        assert_eq!(format_number(0.000001), "0.000001");
        assert_eq!(format_number(1e100), "1e+100");
    }
}
