use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};
use std::collections::HashSet;

// Fixed UTC-5; daylight saving is ignored, which only shifts the cutoff by an hour in summer.
const NEW_YORK_OFFSET_SECS: i32 = -5 * 3600;

// NYSE closes 16:00 local; daily bars settle a little later.
const CLOSE_CUTOFF_HOUR: u32 = 17;
const CLOSE_CUTOFF_MINUTE: u32 = 0;

/// The trading date whose close the analysis should use.
pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid as-of date {s:?}; expected YYYY-MM-DD"));
    }

    let eastern =
        chrono::FixedOffset::east_opt(NEW_YORK_OFFSET_SECS).context("invalid US/Eastern offset")?;
    let now_local = now_utc.with_timezone(&eastern);

    let cutoff_reached =
        (now_local.hour(), now_local.minute()) >= (CLOSE_CUTOFF_HOUR, CLOSE_CUTOFF_MINUTE);
    let mut date = now_local.date_naive();
    if !cutoff_reached {
        date -= Duration::days(1);
    }

    let holidays = configured_holidays(date.year());
    while is_weekend(date) || holidays.contains(&date) {
        date -= Duration::days(1);
    }

    Ok(date)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Saturday holidays are observed on Friday, Sunday ones on Monday.
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn exchange_holidays(year: i32) -> Vec<NaiveDate> {
    let fixed = [(1, 1), (6, 19), (7, 4), (12, 25)]
        .into_iter()
        .filter_map(|(m, d)| NaiveDate::from_ymd_opt(year, m, d))
        .map(observed);

    let nth = |month: u32, weekday: Weekday, n: u8| {
        NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
    };
    let last_monday_of_may = nth(5, Weekday::Mon, 5).or_else(|| nth(5, Weekday::Mon, 4));
    let floating = [
        nth(1, Weekday::Mon, 3),  // Martin Luther King Jr. Day
        nth(2, Weekday::Mon, 3),  // Washington's Birthday
        last_monday_of_may,       // Memorial Day
        nth(9, Weekday::Mon, 1),  // Labor Day
        nth(11, Weekday::Thu, 4), // Thanksgiving
    ]
    .into_iter()
    .flatten();

    fixed.chain(floating).collect()
}

fn configured_holidays(year: i32) -> HashSet<NaiveDate> {
    // Good Friday and one-off closures go in US_MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD".
    let mut out: HashSet<NaiveDate> = (year - 1..=year + 1).flat_map(exchange_holidays).collect();

    if let Ok(s) = std::env::var("US_MARKET_HOLIDAYS") {
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match NaiveDate::parse_from_str(part, "%Y-%m-%d") {
                Ok(d) => {
                    out.insert(d);
                }
                Err(err) => tracing::warn!(value = part, error = %err, "ignoring bad US_MARKET_HOLIDAYS entry"),
            }
        }
    }

    out
}
