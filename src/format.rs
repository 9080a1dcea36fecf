//! Display helpers. Values are stored unrounded; rounding only happens here.

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `PKR 1,234.56`. Non-finite amounts render as zero.
pub fn format_currency(amount: f64) -> String {
    format_currency_with(amount, "PKR")
}

pub fn format_currency_with(amount: f64, symbol: &str) -> String {
    if !amount.is_finite() {
        return format!("{symbol} 0.00");
    }
    let fixed = format!("{:.2}", amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{symbol} {sign}{}.{frac_part}", group_thousands(int_part))
}

pub fn format_percentage(value: f64) -> String {
    if !value.is_finite() {
        return "0.00%".to_string();
    }
    format!("{value:.2}%")
}

/// Percentage with an explicit `+` for gains, as shown next to quotes.
pub fn format_change_pct(value: f64) -> String {
    if value > 0.0 {
        format!("+{}", format_percentage(value))
    } else {
        format_percentage(value)
    }
}

pub fn format_volume(volume: f64) -> String {
    if !volume.is_finite() || volume < 0.0 {
        return "0".to_string();
    }
    if volume >= 1e9 {
        format!("{:.1}B", volume / 1e9)
    } else if volume >= 1e6 {
        format!("{:.1}M", volume / 1e6)
    } else if volume >= 1e3 {
        format!("{:.1}K", volume / 1e3)
    } else {
        format!("{volume:.0}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency() {
        assert_eq!(format_currency(1234.56), "PKR 1,234.56");
        assert_eq!(format_currency(132_920.0), "PKR 132,920.00");
        assert_eq!(format_currency(0.5), "PKR 0.50");
        assert_eq!(format_currency(-1_000_000.004), "PKR -1,000,000.00");
        assert_eq!(format_currency(f64::NAN), "PKR 0.00");
        assert_eq!(format_currency_with(12.0, "$"), "$ 12.00");
    }

    #[test]
    fn test_percentages() {
        assert_eq!(format_percentage(1.234), "1.23%");
        assert_eq!(format_change_pct(0.5), "+0.50%");
        assert_eq!(format_change_pct(-0.5), "-0.50%");
        assert_eq!(format_percentage(f64::INFINITY), "0.00%");
    }

    #[test]
    fn test_volume_units() {
        assert_eq!(format_volume(1_500_000.0), "1.5M");
        assert_eq!(format_volume(2_300.0), "2.3K");
        assert_eq!(format_volume(4_200_000_000.0), "4.2B");
        assert_eq!(format_volume(999.0), "999");
        assert_eq!(format_volume(-1.0), "0");
    }
}
