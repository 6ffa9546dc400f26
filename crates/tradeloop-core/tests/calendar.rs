use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use tradeloop_core::{Market, TradingCalendar, TradingSession};

const WEEKDAYS: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn msk(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    chrono_tz::Europe::Moscow
        .with_ymd_and_hms(year, month, day, hour, minute, 0)
        .unwrap()
        .with_timezone(&Utc)
}

// MOEX only, with May Day 2024 as a holiday.
fn calendar() -> TradingCalendar {
    TradingCalendar::builder()
        .session(TradingSession::new(
            Market::Moex,
            hm(10, 0),
            hm(18, 45),
            chrono_tz::Europe::Moscow,
            WEEKDAYS,
        ))
        .holiday(ymd(2024, 5, 1))
        .build()
}

#[test]
fn weekend_is_not_a_trading_day() {
    let cal = calendar();
    assert!(!cal.is_trading_day(ymd(2024, 3, 2))); // Saturday
    assert!(!cal.is_trading_day(ymd(2024, 3, 3))); // Sunday
    assert!(cal.is_trading_day(ymd(2024, 3, 4))); // Monday
}

#[test]
fn holiday_overrides_weekday() {
    let cal = calendar();
    // 2024-05-01 is a Wednesday.
    assert!(!cal.is_trading_day(ymd(2024, 5, 1)));
    assert!(cal.is_trading_day(ymd(2024, 5, 2)));
}

#[test]
fn moex_session_window_is_inclusive() {
    let cal = calendar();
    // Monday, not a holiday.
    assert!(cal.is_market_open(Market::Moex, msk(2024, 3, 4, 12, 0)));
    assert!(cal.is_market_open(Market::Moex, msk(2024, 3, 4, 10, 0)));
    assert!(cal.is_market_open(Market::Moex, msk(2024, 3, 4, 18, 45)));

    assert!(!cal.is_market_open(Market::Moex, msk(2024, 3, 4, 9, 0)));
    assert!(!cal.is_market_open(Market::Moex, msk(2024, 3, 4, 19, 0)));
}

#[test]
fn closed_on_weekends_and_holidays() {
    let cal = calendar();
    assert!(!cal.is_market_open(Market::Moex, msk(2024, 3, 2, 12, 0))); // Saturday
    assert!(!cal.is_market_open(Market::Moex, msk(2024, 5, 1, 12, 0))); // holiday
}

#[test]
fn unconfigured_market_reports_closed() {
    let cal = calendar();
    assert!(!cal.is_market_open(Market::Nasdaq, msk(2024, 3, 4, 12, 0)));
    assert!(cal.session(Market::Nasdaq).is_none());
    assert!(cal.market_hours(Market::Nasdaq).is_none());
}

#[test]
fn next_trading_day_skips_weekend_and_holiday() {
    let cal = calendar();
    // Friday -> Monday.
    assert_eq!(cal.next_trading_day(ymd(2024, 3, 1)), ymd(2024, 3, 4));
    // Tuesday before the May Day holiday -> Thursday.
    assert_eq!(cal.next_trading_day(ymd(2024, 4, 30)), ymd(2024, 5, 2));
    // From a trading day, the result is strictly after it.
    assert_eq!(cal.next_trading_day(ymd(2024, 3, 4)), ymd(2024, 3, 5));
}

#[test]
fn market_data_tasks_gated_on_session_hours() {
    let cal = calendar();
    let open = msk(2024, 3, 4, 12, 0);
    let closed = msk(2024, 3, 4, 9, 0);

    assert!(cal.should_run_task("moex_market_data_update", Some(Market::Moex), open));
    assert!(!cal.should_run_task("moex_market_data_update", Some(Market::Moex), closed));

    // No market given: any configured session counts.
    assert!(cal.should_run_task("market_data_sync", None, open));
    assert!(!cal.should_run_task("market_data_sync", None, closed));
}

#[test]
fn news_tasks_always_run() {
    let cal = calendar();
    assert!(cal.should_run_task("news_fetch", None, msk(2024, 3, 2, 3, 0)));
    assert!(cal.should_run_task("news_fetch", None, msk(2024, 5, 1, 12, 0)));
}

#[test]
fn analysis_and_default_tasks_run_on_trading_days() {
    let cal = calendar();
    let monday = msk(2024, 3, 4, 20, 0); // after close, still a trading day
    let saturday = msk(2024, 3, 2, 12, 0);

    assert!(cal.should_run_task("daily_indicators", None, monday));
    assert!(!cal.should_run_task("daily_indicators", None, saturday));
    assert!(cal.should_run_task("db_maintenance", None, monday));
    assert!(!cal.should_run_task("db_maintenance", None, saturday));
}

#[test]
fn optimal_time_for_market_data_is_next_session_open() {
    let cal = calendar();
    let at = msk(2024, 3, 4, 12, 0);
    let expected = msk(2024, 3, 5, 10, 0);
    assert_eq!(
        cal.optimal_run_time("moex_market_data_update", Some(Market::Moex), at),
        expected
    );
}

#[test]
fn optimal_time_for_news_and_default() {
    let cal = calendar();
    let at = msk(2024, 3, 4, 12, 0);
    assert_eq!(
        cal.optimal_run_time("news_fetch", None, at),
        at + Duration::minutes(30)
    );
    assert_eq!(
        cal.optimal_run_time("db_maintenance", None, at),
        at + Duration::hours(1)
    );
}

#[test]
fn optimal_time_for_analysis_is_next_trading_evening() {
    let cal = calendar();
    // Friday midday -> Monday 19:00 Moscow time.
    let at = msk(2024, 3, 1, 12, 0);
    assert_eq!(
        cal.optimal_run_time("signal_analysis", None, at),
        msk(2024, 3, 4, 19, 0)
    );
}

#[test]
fn default_calendar_has_builtin_sessions() {
    let cal = TradingCalendar::default();
    assert_eq!(cal.sessions().len(), 3);
    assert_eq!(
        cal.market_hours(Market::Moex),
        Some((hm(10, 0), hm(18, 45)))
    );
    assert_eq!(cal.market_hours(Market::Nyse), Some((hm(9, 30), hm(16, 0))));
}
