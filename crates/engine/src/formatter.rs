//! Human-readable Telegram messages for detected events and balance reports.
//!
//! Messages use Telegram's HTML parse mode; every interpolated string is
//! escaped.

use chrono::{DateTime, Utc};

use chainwatch_common::types::{
    AddressBalance, Direction, Event, MonitoredAddress, NANOERG_PER_ERG, TokenBalance, TokenDelta,
};

pub struct MessageFormatter;

impl MessageFormatter {
    /// Render the notification for `event` on `address`.
    pub fn render(address: &MonitoredAddress, event: &Event) -> String {
        let payload = &event.payload;
        let direction = payload.direction();

        let (icon, label) = match direction {
            Direction::Received => ("🟢", "Received"),
            Direction::Sent => ("🔴", "Sent"),
            Direction::SelfTransfer => ("⚪", "Self transfer"),
        };

        let mut lines = vec![
            format!("{} <b>{}</b> · <b>{}</b>", icon, label, escape(&address.nickname)),
            format!("<code>{}</code>", escape(&address.address)),
            format!(
                "Amount: <b>{} ERG</b>",
                signed_units(payload.value_delta, NANOERG_PER_ERG, 9)
            ),
        ];

        if !payload.tokens.is_empty() {
            lines.push("Tokens:".to_string());
            for token in &payload.tokens {
                lines.push(format!("  {}", token_line(token)));
            }
        }

        match payload.inclusion_height {
            Some(height) => lines.push(format!("Height: {}", height)),
            None => lines.push("Height: unconfirmed".to_string()),
        }
        lines.push(format!(
            "Time: {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        lines.push(format!("Tx: <code>{}</code>", escape(&event.id)));

        lines.join("\n")
    }

    /// Render the daily balance report for one destination.
    ///
    /// Addresses are listed by nickname; `None` marks an address whose balance
    /// could not be fetched. Tokens are listed largest holding first.
    pub fn render_balance_report(
        entries: &[(&MonitoredAddress, Option<&AddressBalance>)],
        at: DateTime<Utc>,
    ) -> String {
        let mut sorted: Vec<_> = entries.to_vec();
        sorted.sort_by(|a, b| a.0.nickname.cmp(&b.0.nickname));

        let mut lines = vec![
            "📊 <b>Daily Balance Report</b>".to_string(),
            format!("Time: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        ];

        for (address, balance) in sorted {
            lines.push(String::new());
            lines.push(format!("<b>{}</b>", escape(&address.nickname)));
            let Some(balance) = balance else {
                lines.push("ERG: balance unavailable".to_string());
                continue;
            };
            lines.push(format!(
                "ERG: <code>{}</code>",
                units(balance.nano_ergs, NANOERG_PER_ERG as u64, 9)
            ));

            let mut tokens: Vec<&TokenBalance> = balance.tokens.iter().collect();
            tokens.sort_by(|a, b| b.amount.cmp(&a.amount));
            for token in tokens {
                lines.push(format!("  {}", balance_line(token)));
            }
        }

        lines.join("\n")
    }
}

fn token_name(token_id: &str, name: Option<&str>) -> String {
    name.map(escape)
        .unwrap_or_else(|| format!("[{}…]", token_id.chars().take(12).collect::<String>()))
}

fn balance_line(token: &TokenBalance) -> String {
    let amount = match token.decimals {
        Some(decimals) if decimals > 0 && decimals <= 18 => {
            units(token.amount, 10u64.saturating_pow(decimals), decimals as usize)
        }
        _ => token.amount.to_string(),
    };
    format!(
        "<code>{}</code> {}",
        amount,
        token_name(&token.token_id, token.name.as_deref())
    )
}

fn token_line(token: &TokenDelta) -> String {
    let amount = match token.decimals {
        Some(decimals) if decimals > 0 && decimals <= 18 => {
            signed_units(token.amount, 10i64.saturating_pow(decimals), decimals as usize)
        }
        _ => format!("{:+}", token.amount),
    };
    format!(
        "<code>{}</code> {}",
        amount,
        token_name(&token.token_id, token.name.as_deref())
    )
}

/// Format `raw / scale` with a leading sign and exactly `decimals` digits.
fn signed_units(raw: i64, scale: i64, decimals: usize) -> String {
    let sign = if raw < 0 { "-" } else { "+" };
    let abs = raw.unsigned_abs();
    let scale = scale.unsigned_abs().max(1);
    format!(
        "{}{}.{:0width$}",
        sign,
        abs / scale,
        abs % scale,
        width = decimals
    )
}

/// Format `raw / scale` with exactly `decimals` digits.
fn units(raw: u64, scale: u64, decimals: usize) -> String {
    let scale = scale.max(1);
    format!("{}.{:0width$}", raw / scale, raw % scale, width = decimals)
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainwatch_common::types::{Destination, EventPayload};
    use chrono::TimeZone;

    fn address(nickname: &str) -> MonitoredAddress {
        MonitoredAddress {
            address: "9fRAWhdxEsTcdb8PhGNrZfwqa65zfkuYHAMmkQLcic1gdLSV5vA".to_string(),
            nickname: nickname.to_string(),
            destinations: vec![Destination::new("-1001", None)],
        }
    }

    fn event(value_delta: i64, tokens: Vec<TokenDelta>) -> Event {
        Event {
            id: "4c6282be413c6e300a530618b37790be5f286ded758accc2aebd41554a1be308".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            payload: EventPayload {
                inclusion_height: Some(1_250_000),
                value_delta,
                tokens,
            },
        }
    }

    #[test]
    fn test_render_received() {
        let text = MessageFormatter::render(&address("Treasury"), &event(1_500_000_000, vec![]));
        assert!(text.starts_with("🟢 <b>Received</b> · <b>Treasury</b>"));
        assert!(text.contains("9fRAWhdxEsTcdb8PhGNrZfwqa65zfkuYHAMmkQLcic1gdLSV5vA"));
        assert!(text.contains("Amount: <b>+1.500000000 ERG</b>"));
        assert!(text.contains("Height: 1250000"));
        assert!(text.contains("Time: 2024-05-01 12:30:00 UTC"));
        assert!(text.contains("Tx: <code>4c6282be"));
        assert!(!text.contains("Tokens:"));
    }

    #[test]
    fn test_render_sent_with_tokens() {
        let tokens = vec![
            TokenDelta {
                token_id: "03faf2cb329f2e90d6d23b58d91bbb6c".to_string(),
                name: Some("SigUSD".to_string()),
                decimals: Some(2),
                amount: -1234,
            },
            TokenDelta {
                token_id: "0cd8c9f416e5b1ca9f986a7f10a84191dfb85941619e49e53c0dc30ebf83324b".to_string(),
                name: None,
                decimals: None,
                amount: 5,
            },
        ];
        let text = MessageFormatter::render(&address("Hot"), &event(-2_001_000_000, tokens));
        assert!(text.starts_with("🔴 <b>Sent</b>"));
        assert!(text.contains("Amount: <b>-2.001000000 ERG</b>"));
        assert!(text.contains("<code>-12.34</code> SigUSD"));
        assert!(text.contains("<code>+5</code> [0cd8c9f416e5…]"));
    }

    #[test]
    fn test_nickname_is_escaped() {
        let text = MessageFormatter::render(&address("<Ops & Co>"), &event(0, vec![]));
        assert!(text.contains("&lt;Ops &amp; Co&gt;"));
        assert!(text.starts_with("⚪ <b>Self transfer</b>"));
    }

    #[test]
    fn test_balance_report_sorted_by_nickname_and_holding() {
        let treasury = address("Treasury");
        let mut hot = address("Hot");
        hot.address = "9hot".to_string();
        let cold = address("Cold");
        let balance = AddressBalance {
            nano_ergs: 12_345_678_901,
            tokens: vec![
                TokenBalance {
                    token_id: "0cd8c9f416e5b1ca9f986a7f10a84191".to_string(),
                    name: None,
                    decimals: None,
                    amount: 5,
                },
                TokenBalance {
                    token_id: "03faf2cb329f2e90d6d23b58d91bbb6c".to_string(),
                    name: Some("SigUSD".to_string()),
                    decimals: Some(2),
                    amount: 1234,
                },
            ],
        };
        let empty = AddressBalance::default();
        let at = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();

        let text = MessageFormatter::render_balance_report(
            &[(&treasury, Some(&balance)), (&hot, Some(&empty)), (&cold, None)],
            at,
        );

        assert!(text.starts_with("📊 <b>Daily Balance Report</b>\nTime: 2024-05-02 12:00:00 UTC"));
        let cold_at = text.find("<b>Cold</b>").unwrap();
        let hot_at = text.find("<b>Hot</b>").unwrap();
        let treasury_at = text.find("<b>Treasury</b>").unwrap();
        assert!(cold_at < hot_at && hot_at < treasury_at);
        assert!(text.contains("<b>Cold</b>\nERG: balance unavailable"));
        assert!(text.contains("<b>Hot</b>\nERG: <code>0.000000000</code>"));
        assert!(text.contains("ERG: <code>12.345678901</code>"));
        let sigusd_at = text.find("<code>12.34</code> SigUSD").unwrap();
        let unnamed_at = text.find("<code>5</code> [0cd8c9f416e5…]").unwrap();
        assert!(sigusd_at < unnamed_at);
    }

    #[test]
    fn test_signed_units() {
        assert_eq!(signed_units(0, NANOERG_PER_ERG, 9), "+0.000000000");
        assert_eq!(signed_units(-1, NANOERG_PER_ERG, 9), "-0.000000001");
        assert_eq!(signed_units(i64::MIN, NANOERG_PER_ERG, 9), "-9223372036.854775808");
    }
}
