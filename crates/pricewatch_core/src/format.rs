//! Channel name rendering

/// Longest channel name we ever request; the platform allows 100
pub const MAX_CHANNEL_NAME_CHARS: usize = 95;

/// Format a price with precision that adapts to its magnitude.
///
/// At or above 1 the value gets thousands separators and 2 decimals, between
/// 0.01 and 1 it gets 4 decimals, and below 0.01 it gets 6.
pub fn format_price(price: f64) -> String {
    if price >= 1.0 {
        group_thousands(&format!("{:.2}", price))
    } else if price >= 0.01 {
        format!("{:.4}", price)
    } else {
        format!("{:.6}", price)
    }
}

fn group_thousands(fixed: &str) -> String {
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed, ""));

    let digits = int_part.len();
    let mut grouped = String::with_capacity(digits + digits / 3 + frac_part.len() + 1);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (digits - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if !frac_part.is_empty() {
        grouped.push('.');
        grouped.push_str(frac_part);
    }
    grouped
}

/// Build the channel name shown for a mapping, e.g. `BTC - $68,420.00`
pub fn channel_name(label: &str, price: f64) -> String {
    let name = format!("{} - ${}", label, format_price(price));
    truncate_chars(&name, MAX_CHANNEL_NAME_CHARS)
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_large_prices_get_separators_and_two_decimals() {
        assert_eq!(format_price(68420.004), "68,420.00");
        assert_eq!(format_price(1.0), "1.00");
        assert_eq!(format_price(999.999), "1,000.00");
        assert_eq!(format_price(1234567.891), "1,234,567.89");
    }

    #[test]
    fn test_sub_dollar_prices_get_four_decimals() {
        assert_eq!(format_price(0.123456), "0.1235");
        assert_eq!(format_price(0.01), "0.0100");
    }

    #[test]
    fn test_tiny_prices_get_six_decimals() {
        assert_eq!(format_price(0.0000032), "0.000003");
        assert_eq!(format_price(0.009999), "0.009999");
    }

    #[test]
    fn test_channel_name_composition() {
        assert_eq!(channel_name("💲 BTC", 68420.004), "💲 BTC - $68,420.00");
    }

    #[test]
    fn test_channel_name_truncates_by_characters() {
        let label = "€".repeat(120);
        let name = channel_name(&label, 2.5);
        assert_eq!(name.chars().count(), MAX_CHANNEL_NAME_CHARS);
        assert!(name.chars().all(|c| c == '€'));
    }
}
