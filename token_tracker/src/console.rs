/// console.rs — Local command interface
///
/// Stand-in for the chat front-end.  One command per line:
///
///   <user_id> /start
///   <user_id> /stop
///   <user_id> /add <token> [entry_price]
///   <user_id> /remove <token>
///   <user_id> /threshold <value>
///   <user_id> /setthreshold <token> <value> [both|positive|negative]
///   <user_id> /reset <token> [price]
///   <user_id> /status
///   <user_id> /tokens
///
/// Parsing is pure; `execute` sends the command to the tracker service and
/// renders whatever comes back as reply text.
use crate::error::CommandError;
use crate::models::{Direction, TokenId, UserId};
use crate::report::UserStatus;
use crate::service::TrackerHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Add { token: TokenId, entry_price: Option<f64> },
    Remove { token: TokenId },
    Threshold { value: f64 },
    SetThreshold { token: TokenId, value: f64, direction: Direction },
    Reset { token: TokenId, price: Option<f64> },
    Status,
    Tokens,
}

const USAGE: &str = "Commands: /start /stop /add /remove /threshold /setthreshold /reset /status /tokens";

fn parse_threshold(raw: &str, max: f64) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|_| "Invalid threshold value. Please enter a number.".to_string())?;
    if !(value > 0.0 && value <= max) {
        return Err(format!("Threshold must be between 0 and {max}"));
    }
    Ok(value)
}

fn parse_price(raw: Option<&str>) -> Result<Option<f64>, String> {
    match raw {
        None => Ok(None),
        Some(s) => match s.parse::<f64>() {
            Ok(p) if p.is_finite() && p > 0.0 => Ok(Some(p)),
            _ => Err(format!("Invalid price '{s}'")),
        },
    }
}

/// Parse one input line.  The error is the usage text to show the user.
pub fn parse_line(line: &str, max_threshold: f64) -> Result<(UserId, ConsoleCommand), String> {
    let mut parts = line.split_whitespace();
    let user = parts.next().ok_or_else(|| USAGE.to_string())?;
    let command = parts.next().ok_or_else(|| USAGE.to_string())?;
    let args: Vec<&str> = parts.collect();

    let cmd = match (command, args.as_slice()) {
        ("/start", []) => ConsoleCommand::Start,
        ("/stop", []) => ConsoleCommand::Stop,
        ("/status", []) => ConsoleCommand::Status,
        ("/tokens", []) => ConsoleCommand::Tokens,

        ("/add", [token, rest @ ..]) if rest.len() <= 1 => ConsoleCommand::Add {
            token:       TokenId::from(*token),
            entry_price: parse_price(rest.first().copied())?,
        },
        ("/add", _) => return Err("Usage: /add <token_address> [entry_price]".into()),

        ("/remove", [token]) => ConsoleCommand::Remove { token: TokenId::from(*token) },
        ("/remove", _) => return Err("Usage: /remove <token_address>".into()),

        ("/threshold", [value]) => ConsoleCommand::Threshold {
            value: parse_threshold(value, max_threshold)?,
        },
        ("/threshold", _) => return Err("Usage: /threshold <value>\nExample: /threshold 15".into()),

        ("/setthreshold", [token, value, rest @ ..]) if rest.len() <= 1 => {
            let direction = match rest.first() {
                Some(d) => d
                    .parse::<Direction>()
                    .map_err(|_| "Direction must be 'both', 'positive', or 'negative'".to_string())?,
                None => Direction::Both,
            };
            ConsoleCommand::SetThreshold {
                token: TokenId::from(*token),
                value: parse_threshold(value, max_threshold)?,
                direction,
            }
        }
        ("/setthreshold", _) => {
            return Err("Usage: /setthreshold <token_address> <threshold> [direction]\n\
                        direction: both (default), positive, negative"
                .into())
        }

        ("/reset", [token, rest @ ..]) if rest.len() <= 1 => ConsoleCommand::Reset {
            token: TokenId::from(*token),
            price: parse_price(rest.first().copied())?,
        },
        ("/reset", _) => return Err("Usage: /reset <token_address> [price]".into()),

        (other, _) => return Err(format!("Unknown command '{other}'. {USAGE}")),
    };
    Ok((UserId::from(user), cmd))
}

/// Run `cmd` for `user` and render the reply.
pub async fn execute(handle: &TrackerHandle, user: UserId, cmd: ConsoleCommand) -> String {
    match run(handle, user, cmd).await {
        Ok(text) => text,
        Err(e) => format!("❌ {e}"),
    }
}

async fn run(handle: &TrackerHandle, user: UserId, cmd: ConsoleCommand) -> Result<String, CommandError> {
    let text = match cmd {
        ConsoleCommand::Start => {
            let record = handle.register(user).await?;
            format!(
                "Welcome {}! 🚀\nYou will be alerted on price changes above {}%.",
                record.user_id, record.global_threshold
            )
        }
        ConsoleCommand::Stop => {
            handle.deactivate(user).await?;
            "You have been unsubscribed from alerts. Send /start to subscribe again.".into()
        }
        ConsoleCommand::Add { token, entry_price } => {
            let record = handle.add_token(user, token.clone(), entry_price).await?;
            let entry = record.entry_prices.get(&token).map(|e| e.price).unwrap_or_default();
            format!("✅ Tracking {} (entry ${:.8})", token.short(), entry)
        }
        ConsoleCommand::Remove { token } => {
            handle.remove_token(user, token.clone()).await?;
            format!("✅ Removed token: {token}")
        }
        ConsoleCommand::Threshold { value } => {
            handle.set_global_threshold(user, value).await?;
            format!("✅ Price threshold updated to {value}%")
        }
        ConsoleCommand::SetThreshold { token, value, direction } => {
            handle.set_token_threshold(user, token.clone(), value, direction).await?;
            format!("✅ Threshold for {} set to {}% ({})", token.short(), value, direction)
        }
        ConsoleCommand::Reset { token, price } => {
            let price = handle.reset_entry_price(user, token.clone(), price).await?;
            format!(
                "✅ Price reference reset\nToken: {}\nNew reference price: ${:.8}",
                token.short(),
                price
            )
        }
        ConsoleCommand::Status => UserStatus::from(&handle.status(user).await?).to_string(),
        ConsoleCommand::Tokens => {
            let record = handle.status(user).await?;
            if record.tracked_tokens.is_empty() {
                "No tokens are being tracked.".into()
            } else {
                record
                    .tracked_tokens
                    .iter()
                    .enumerate()
                    .map(|(i, t)| format!("{}. {}", i + 1, t))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    };
    Ok(text)
}
