use chrono::{Duration, NaiveDate};
use serde::Deserialize;

use crate::types::{Listing, SortVariant};

/// One row as a collector writes it. Legacy scrapers used capitalised column
/// names, newer ones lowercase; both are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRow {
    #[serde(default, alias = "Date")]
    pub date: Option<String>,
    #[serde(default, alias = "Item", alias = "title", alias = "Title")]
    pub item: Option<String>,
    #[serde(default, alias = "Item_Link", alias = "url", alias = "link")]
    pub item_link: Option<String>,
    /// Either `"S$488"`-style text or a bare number.
    #[serde(default, alias = "Price")]
    pub price: Option<serde_json::Value>,
    #[serde(default, alias = "Description")]
    pub description: Option<String>,
    #[serde(default, alias = "Condition")]
    pub condition: Option<String>,
}

/// Turn a raw row into a [`Listing`]. Rows without a title are unusable and
/// yield `None`; a missing price or date is kept as `None` and left for the
/// predictor to filter.
pub fn normalize_row(
    row: &RawRow,
    sort_variant: SortVariant,
    today: NaiveDate,
    default_currency: &str,
) -> Option<Listing> {
    let title = row.item.as_deref().map(str::trim).filter(|t| !t.is_empty())?.to_string();

    let price_text = match &row.price {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    let price = parse_price(&price_text);
    let currency = detect_currency(&price_text).unwrap_or(default_currency).to_string();

    let date_text = row.date.as_deref().unwrap_or("").trim();
    let listed_on = parse_listing_date(date_text, today);

    let url = row
        .item_link
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(canonical_url);

    let id = match &url {
        Some(u) => u.clone(),
        None => format!("{}|{}|{}", date_text, title, price_text),
    };

    Some(Listing {
        id,
        title,
        description: row
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        price,
        currency,
        listed_on,
        condition: row
            .condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
        url,
        sort_variant,
    })
}

/// Drop the query string, fragment and trailing slash so tracking parameters
/// do not make one listing look like two.
/// `https://x.sg/p/chair-123/?t=1#top` → `https://x.sg/p/chair-123`
pub fn canonical_url(url: &str) -> String {
    let end = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
    url[..end].trim_end_matches('/').to_string()
}

/// First decimal number in a price string, thousands separators ignored.
/// `"S$1,200.50"` → 1200.5, `"Free"` → None.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| *c != ',').collect();
    let mut number = String::new();
    let mut seen_dot = false;
    for c in cleaned.chars() {
        if c.is_ascii_digit() {
            number.push(c);
        } else if c == '.' && !number.is_empty() && !seen_dot {
            seen_dot = true;
            number.push(c);
        } else if !number.is_empty() {
            break;
        }
    }
    let number = number.trim_end_matches('.');
    number.parse::<f64>().ok()
}

/// Currency implied by a price string's marker, if it has one.
pub fn detect_currency(text: &str) -> Option<&'static str> {
    let upper = text.to_uppercase();
    if upper.contains("S$") || upper.contains("SGD") {
        Some("SGD")
    } else if upper.contains("US$") || upper.contains("USD") {
        Some("USD")
    } else if upper.contains("RM") || upper.contains("MYR") {
        Some("MYR")
    } else if upper.contains('£') || upper.contains("GBP") {
        Some("GBP")
    } else {
        None
    }
}

/// Resolve a posting date. Accepts ISO dates, a couple of day-first layouts,
/// and relative phrases such as "3 days ago" or "yesterday".
pub fn parse_listing_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return Some(d);
        }
    }

    parse_relative_date(&text.to_lowercase(), today)
}

fn parse_relative_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    match text {
        "today" | "just now" => return Some(today),
        "yesterday" => return Some(today - Duration::days(1)),
        _ => {}
    }

    let mut words = text.split_whitespace();
    let amount = match words.next()? {
        "a" | "an" => 1,
        n => n.parse::<i64>().ok()?,
    };
    let unit = words.next()?.trim_end_matches('s');
    let days = match unit {
        "second" | "minute" => 0,
        "hour" => amount / 24,
        "day" => amount,
        "week" => amount.checked_mul(7)?,
        "month" => amount.checked_mul(30)?,
        "year" => amount.checked_mul(365)?,
        _ => return None,
    };
    // absurd ages leave the listing undated rather than failing the run
    today.checked_sub_signed(Duration::try_days(days)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
    }

    fn row(item: &str, link: Option<&str>, price: serde_json::Value, date: &str) -> RawRow {
        RawRow {
            date: Some(date.to_string()),
            item: Some(item.to_string()),
            item_link: link.map(str::to_string),
            price: Some(price),
            description: None,
            condition: None,
        }
    }

    #[test]
    fn canonical_url_strips_tracking() {
        assert_eq!(
            canonical_url("https://shop.sg/p/baby-chair-123/?t-id=abc#photos"),
            "https://shop.sg/p/baby-chair-123"
        );
        assert_eq!(canonical_url("https://shop.sg/p/1"), "https://shop.sg/p/1");
    }

    #[test]
    fn prices_parse_with_markers_and_separators() {
        assert_eq!(parse_price("S$488"), Some(488.0));
        assert_eq!(parse_price("SGD 1,200.50"), Some(1200.5));
        assert_eq!(parse_price("$15."), Some(15.0));
        assert_eq!(parse_price("Free"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn currency_markers() {
        assert_eq!(detect_currency("S$40"), Some("SGD"));
        assert_eq!(detect_currency("USD 40"), Some("USD"));
        assert_eq!(detect_currency("RM 99"), Some("MYR"));
        assert_eq!(detect_currency("40"), None);
    }

    #[test]
    fn relative_and_absolute_dates() {
        let t = today();
        assert_eq!(parse_listing_date("2025-03-01", t), NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(parse_listing_date("3 days ago", t), NaiveDate::from_ymd_opt(2025, 3, 12));
        assert_eq!(parse_listing_date("a day ago", t), NaiveDate::from_ymd_opt(2025, 3, 14));
        assert_eq!(parse_listing_date("5 hours ago", t), Some(t));
        assert_eq!(parse_listing_date("2 weeks ago", t), NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(parse_listing_date("yesterday", t), NaiveDate::from_ymd_opt(2025, 3, 14));
        assert_eq!(parse_listing_date("Bumped", t), None);
    }

    #[test]
    fn out_of_range_ages_are_undated() {
        let t = today();
        assert_eq!(parse_listing_date("300000 years ago", t), None);
        assert_eq!(parse_listing_date("9223372036854775807 weeks ago", t), None);
        assert_eq!(parse_listing_date("9223372036854775807 days ago", t), None);

        let r = row("chair", None, serde_json::json!("S$10"), "300000 years ago");
        let l = normalize_row(&r, SortVariant::Recent, t, "SGD").unwrap();
        assert_eq!(l.listed_on, None);
    }

    #[test]
    fn row_without_link_gets_composite_id() {
        let r = row("Baby chair", None, serde_json::json!("S$30"), "2025-03-10");
        let l = normalize_row(&r, SortVariant::Recent, today(), "SGD").unwrap();
        assert_eq!(l.id, "2025-03-10|Baby chair|S$30");
        assert_eq!(l.price, Some(30.0));
        assert_eq!(l.currency, "SGD");
    }

    #[test]
    fn numeric_price_and_default_currency() {
        let r = row("Chair", Some("https://s.sg/p/9?x=1"), serde_json::json!(42.5), "1 day ago");
        let l = normalize_row(&r, SortVariant::Nearby, today(), "USD").unwrap();
        assert_eq!(l.id, "https://s.sg/p/9");
        assert_eq!(l.price, Some(42.5));
        assert_eq!(l.currency, "USD");
        assert_eq!(l.sort_variant, SortVariant::Nearby);
        assert_eq!(l.age_days(today()), Some(1));
    }

    #[test]
    fn blank_title_is_dropped() {
        let r = row("   ", None, serde_json::json!("S$1"), "");
        assert!(normalize_row(&r, SortVariant::Recent, today(), "SGD").is_none());
    }

    #[test]
    fn legacy_column_names_deserialize() {
        let r: RawRow = serde_json::from_value(serde_json::json!({
            "Date": "2025-03-01",
            "Item": "High chair",
            "Item_Link": "https://s.sg/p/1",
            "Price": "S$20",
            "Seller": "someone"
        }))
        .unwrap();
        assert_eq!(r.item.as_deref(), Some("High chair"));
        assert_eq!(r.item_link.as_deref(), Some("https://s.sg/p/1"));
    }
}
