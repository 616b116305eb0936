//! Presentation formatting
//!
//! Pure transforms from stored integer amounts and timestamps to display
//! strings. Nothing here mutates wallet state.

use chrono::{DateTime, TimeZone, Utc};

use super::types::BalanceUnit;

const SATS_PER_BTC: i64 = 100_000_000;

/// Format a smallest-unit amount in the given display unit
pub fn format_balance(amount: i64, unit: BalanceUnit) -> String {
    match unit {
        BalanceUnit::Sats => format!("{} sats", group_thousands(amount)),
        // No exchange-rate source in this core; local currency falls back to BTC
        BalanceUnit::Btc | BalanceUnit::LocalCurrency => format!("{} BTC", sats_to_btc(amount)),
    }
}

/// Render an amount in BTC with trailing zeros trimmed
pub fn sats_to_btc(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let whole = abs / SATS_PER_BTC as u64;
    let frac = abs % SATS_PER_BTC as u64;
    if frac == 0 {
        return format!("{}{}", sign, whole);
    }
    let frac = format!("{:08}", frac);
    format!("{}{}.{}", sign, whole, frac.trim_end_matches('0'))
}

fn group_thousands(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if amount < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

/// Human-readable time relative to `now`
pub fn relative_time(received: i64, now: DateTime<Utc>) -> String {
    let Some(then) = Utc.timestamp_opt(received, 0).single() else {
        return "never".to_string();
    };
    if received <= 0 {
        return "never".to_string();
    }

    let elapsed = now.signed_duration_since(then);
    let secs = elapsed.num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }

    match secs {
        0..=44 => "just now".to_string(),
        45..=89 => "a minute ago".to_string(),
        90..=2_699 => format!("{} minutes ago", (secs + 30) / 60),
        2_700..=5_399 => "an hour ago".to_string(),
        5_400..=79_199 => format!("{} hours ago", (secs + 1_800) / 3_600),
        79_200..=129_599 => "a day ago".to_string(),
        _ => {
            let days = elapsed.num_days();
            if days < 30 {
                format!("{} days ago", days)
            } else {
                then.format("%b %-d, %Y").to_string()
            }
        }
    }
}
