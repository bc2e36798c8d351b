/// report.rs — Per-user status report
use std::fmt;

use chrono::{DateTime, Utc};

use crate::models::{Direction, TokenId, UserId, UserRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct TokenLine {
    pub token_id:    TokenId,
    pub entry_price: f64,
    pub entry_time:  DateTime<Utc>,
    /// `None` when the user's global threshold applies.
    pub custom:      Option<(f64, Direction)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserStatus {
    pub user_id:          UserId,
    pub active:           bool,
    pub registered_at:    DateTime<Utc>,
    pub global_threshold: f64,
    pub tokens:           Vec<TokenLine>,
}

impl From<&UserRecord> for UserStatus {
    fn from(user: &UserRecord) -> Self {
        let tokens = user
            .tracked_tokens
            .iter()
            .filter_map(|token| {
                let entry = user.entry_prices.get(token)?;
                Some(TokenLine {
                    token_id:    token.clone(),
                    entry_price: entry.price,
                    entry_time:  entry.timestamp,
                    custom:      user.token_thresholds.get(token).map(|p| (p.value, p.direction)),
                })
            })
            .collect();
        Self {
            user_id:          user.user_id.clone(),
            active:           user.active,
            registered_at:    user.registered_at,
            global_threshold: user.global_threshold,
            tokens,
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "────────────────────────────────────────────")?;
        writeln!(f, "  User {}", self.user_id)?;
        writeln!(f, "────────────────────────────────────────────")?;
        writeln!(f, "  Status         : {}", if self.active { "🟢 active" } else { "⚪ stopped" })?;
        writeln!(f, "  Registered     : {}", self.registered_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "  Threshold      : ±{}%", self.global_threshold)?;
        writeln!(f, "  Tracked Tokens : {}", self.tokens.len())?;
        for (i, line) in self.tokens.iter().enumerate() {
            let policy = match line.custom {
                None => "global".to_string(),
                Some((value, direction)) => format!("{value}% {direction}"),
            };
            writeln!(
                f,
                "  {:>2}. {}  entry ${:.8} @ {}  ({})",
                i + 1,
                line.token_id.short(),
                line.entry_price,
                line.entry_time.format("%Y-%m-%d %H:%M"),
                policy,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UserStore;
    use chrono::TimeZone;

    #[test]
    fn lists_tokens_with_policy() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 15, 0).unwrap();
        let mut store = UserStore::new(20.0);
        store.register("7".into());
        store.add_token(&"7".into(), "AAA".into(), 0.0005, at).unwrap();
        store.add_token(&"7".into(), "BBB".into(), 1.25, at).unwrap();
        store.set_token_threshold(&"7".into(), &"BBB".into(), 30.0, Direction::Negative).unwrap();

        let status = UserStatus::from(store.get(&"7".into()).unwrap());
        assert_eq!(status.tokens.len(), 2);
        assert_eq!(status.tokens[0].custom, None);
        assert_eq!(status.tokens[1].custom, Some((30.0, Direction::Negative)));

        let text = status.to_string();
        assert!(text.contains("User 7"));
        assert!(text.contains("🟢 active"));
        assert!(text.contains("Threshold      : ±20%"));
        assert!(text.contains("AAA  entry $0.00050000 @ 2024-05-01 09:15  (global)"));
        assert!(text.contains("BBB  entry $1.25000000 @ 2024-05-01 09:15  (30% negative)"));
    }

    #[test]
    fn stopped_user_without_tokens() {
        let mut store = UserStore::new(15.0);
        store.register("8".into());
        store.deactivate(&"8".into()).unwrap();
        let text = UserStatus::from(store.get(&"8".into()).unwrap()).to_string();
        assert!(text.contains("⚪ stopped"));
        assert!(text.contains("Tracked Tokens : 0"));
    }
}
