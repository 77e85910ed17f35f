//! Subject extraction
//!
//! Pulls a ticker symbol out of free text. Anything else is passed to
//! providers as a topic string.

/// Uppercase words that look like tickers but are not
const NOT_TICKERS: &[&str] = &[
    "A", "I", "AN", "THE", "AND", "OR", "OF", "TO", "IN", "ON", "AT", "FOR", "IS", "IT", "MY",
    "PE", "EPS", "ETF", "IPO", "CEO", "CFO", "CTO", "AI", "US", "USA", "UK", "EU", "USD", "EUR",
    "GDP", "CPI", "FED", "FOMC", "RSI", "MACD", "EMA", "SMA", "YTD", "ATH", "NYSE", "OK", "FAQ",
];

/// First plausible ticker in the text, uppercased.
///
/// `$`-prefixed symbols always count; bare words count when written in
/// uppercase, 1-5 letters, and not a common acronym.
pub fn extract_ticker(text: &str) -> Option<String> {
    text.split_whitespace().find_map(|raw| {
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '$');
        let (dollar, symbol) = match token.strip_prefix('$') {
            Some(rest) => (true, rest),
            None => (false, token),
        };

        let shaped = (1..=5).contains(&symbol.len())
            && symbol.chars().all(|c| c.is_ascii_alphabetic());
        if !shaped {
            return None;
        }

        if dollar {
            return Some(symbol.to_ascii_uppercase());
        }

        let uppercase = symbol.chars().all(|c| c.is_ascii_uppercase());
        (uppercase && !NOT_TICKERS.contains(&symbol)).then(|| symbol.to_string())
    })
}
