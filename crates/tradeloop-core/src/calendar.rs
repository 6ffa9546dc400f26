//! Market-aware trading calendar.
//!
//! Pure queries over static session tables and a holiday set: is a date a
//! trading day, is a market open at a given instant, when does the next
//! session start. The scheduler consults this oracle to gate tasks that
//! opted into calendar gating; task bodies may query it directly for finer
//! control.
//!
//! Every operation takes its reference time explicitly. Callers that want
//! "now" pass `Utc::now()`.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tracing::warn;

/// Markets with a built-in session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Market {
    /// Moscow Exchange.
    Moex,
    /// New York Stock Exchange.
    Nyse,
    /// NASDAQ.
    Nasdaq,
}

impl Market {
    /// Lowercase identifier, as used in logs and task-name matching.
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Moex => "moex",
            Market::Nyse => "nyse",
            Market::Nasdaq => "nasdaq",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One market's trading window: local open/close times, IANA timezone and
/// the weekdays the window applies to. Immutable once the calendar is built.
#[derive(Debug, Clone)]
pub struct TradingSession {
    /// Market this session belongs to.
    pub market: Market,
    /// Local session open, inclusive.
    pub start: NaiveTime,
    /// Local session close, inclusive.
    pub end: NaiveTime,
    /// Timezone the `start`/`end` times are expressed in.
    pub tz: Tz,
    /// Weekdays on which the session is held.
    pub weekdays: HashSet<Weekday>,
}

impl TradingSession {
    /// Creates a session description.
    pub fn new(
        market: Market,
        start: NaiveTime,
        end: NaiveTime,
        tz: Tz,
        weekdays: impl IntoIterator<Item = Weekday>,
    ) -> Self {
        Self {
            market,
            start,
            end,
            tz,
            weekdays: weekdays.into_iter().collect(),
        }
    }
}

/// Incrementally assembles a [`TradingCalendar`].
#[derive(Debug, Default)]
pub struct CalendarBuilder {
    sessions: Vec<TradingSession>,
    holidays: HashSet<NaiveDate>,
}

impl CalendarBuilder {
    /// Adds a trading session.
    pub fn session(mut self, session: TradingSession) -> Self {
        self.sessions.push(session);
        self
    }

    /// Adds a single holiday date.
    pub fn holiday(mut self, date: NaiveDate) -> Self {
        self.holidays.insert(date);
        self
    }

    /// Adds a batch of holiday dates.
    pub fn holidays(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(dates);
        self
    }

    /// Finalizes the calendar.
    pub fn build(self) -> TradingCalendar {
        TradingCalendar {
            sessions: self.sessions,
            holidays: self.holidays,
        }
    }
}

/// Trading calendar: session tables plus holidays.
///
/// The [`Default`] calendar carries MOEX (10:00-18:45 Europe/Moscow),
/// NYSE and NASDAQ (09:30-16:00 America/New_York), all Monday-Friday,
/// with New Year's Day and Christmas of the current year as holidays.
/// Hosts with real holiday feeds should build their own via [`builder`].
///
/// [`builder`]: TradingCalendar::builder
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    sessions: Vec<TradingSession>,
    holidays: HashSet<NaiveDate>,
}

const WEEKDAYS: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

/// Upper bound for the forward scan in [`TradingCalendar::next_trading_day`].
const NEXT_DAY_SCAN_LIMIT: u32 = 366;

impl Default for TradingCalendar {
    fn default() -> Self {
        let year = Utc::now().year();
        let fixed_holidays = [(1, 1), (12, 25)]
            .into_iter()
            .filter_map(|(month, day)| NaiveDate::from_ymd_opt(year, month, day));

        Self::builder()
            .session(TradingSession::new(
                Market::Moex,
                hm(10, 0),
                hm(18, 45),
                chrono_tz::Europe::Moscow,
                WEEKDAYS,
            ))
            .session(TradingSession::new(
                Market::Nyse,
                hm(9, 30),
                hm(16, 0),
                chrono_tz::America::New_York,
                WEEKDAYS,
            ))
            .session(TradingSession::new(
                Market::Nasdaq,
                hm(9, 30),
                hm(16, 0),
                chrono_tz::America::New_York,
                WEEKDAYS,
            ))
            .holidays(fixed_holidays)
            .build()
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("literal time")
}

impl TradingCalendar {
    /// Starts an empty calendar.
    pub fn builder() -> CalendarBuilder {
        CalendarBuilder::default()
    }

    /// Builds a calendar from explicit tables.
    pub fn new(sessions: Vec<TradingSession>, holidays: HashSet<NaiveDate>) -> Self {
        Self { sessions, holidays }
    }

    /// All configured sessions.
    pub fn sessions(&self) -> &[TradingSession] {
        &self.sessions
    }

    /// The session for `market`, if one is configured.
    pub fn session(&self, market: Market) -> Option<&TradingSession> {
        self.sessions.iter().find(|s| s.market == market)
    }

    /// Local open/close times for `market`, if configured.
    pub fn market_hours(&self, market: Market) -> Option<(NaiveTime, NaiveTime)> {
        self.session(market).map(|s| (s.start, s.end))
    }

    /// True unless `date` is a weekend day or a configured holiday.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        if self.holidays.contains(&date) {
            return false;
        }
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Whether `market` is open at instant `at`.
    ///
    /// The instant is converted into the session's timezone; the session
    /// window is inclusive on both ends. Unconfigured markets are reported
    /// closed rather than erroring.
    pub fn is_market_open(&self, market: Market, at: DateTime<Utc>) -> bool {
        let Some(session) = self.session(market) else {
            warn!(market = %market, "no trading session configured");
            return false;
        };

        let local = at.with_timezone(&session.tz);
        if !self.is_trading_day(local.date_naive()) {
            return false;
        }
        if !session.weekdays.contains(&local.weekday()) {
            return false;
        }

        let time_of_day = local.time();
        session.start <= time_of_day && time_of_day <= session.end
    }

    /// First trading day strictly after `from`.
    ///
    /// Scans forward at most a year; a holiday set covering every weekday
    /// of a whole year is out of scope, so the bound is never reached in
    /// practice.
    pub fn next_trading_day(&self, from: NaiveDate) -> NaiveDate {
        let mut day = from;
        for _ in 0..NEXT_DAY_SCAN_LIMIT {
            day = day.succ_opt().unwrap_or(day);
            if self.is_trading_day(day) {
                return day;
            }
        }
        day
    }

    /// Coarse gating heuristic classifying tasks by name.
    ///
    /// Market-data tasks run only while the given (or any configured)
    /// market is open; news tasks always run; indicator/analysis tasks run
    /// on any trading day; everything else defaults to trading days.
    /// Tasks needing a sharper check should query the calendar from their
    /// own body instead.
    pub fn should_run_task(
        &self,
        task_name: &str,
        market: Option<Market>,
        at: DateTime<Utc>,
    ) -> bool {
        let name = task_name.to_ascii_lowercase();

        if name.contains("market_data") {
            return match market {
                Some(market) => self.is_market_open(market, at),
                None => self
                    .sessions
                    .iter()
                    .any(|s| self.is_market_open(s.market, at)),
            };
        }

        // News feeds do not follow exchange hours.
        if name.contains("news") {
            return true;
        }

        // Indicator and analysis passes run after close as well, any
        // trading day is fine.
        if name.contains("indicators") || name.contains("analysis") {
            return self.is_trading_day(at.date_naive());
        }

        self.is_trading_day(at.date_naive())
    }

    /// Advisory next-run suggestion for a task, by the same name
    /// classification as [`should_run_task`].
    ///
    /// The scheduler does not consult this automatically; it is exposed for
    /// hosts that want market-aware initial scheduling.
    ///
    /// [`should_run_task`]: TradingCalendar::should_run_task
    pub fn optimal_run_time(
        &self,
        task_name: &str,
        market: Option<Market>,
        at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let name = task_name.to_ascii_lowercase();

        if name.contains("market_data") {
            // Next session open; MOEX when no market was given.
            let market = market.unwrap_or(Market::Moex);
            if let Some(session) = self.session(market) {
                let local_today = at.with_timezone(&session.tz).date_naive();
                let day = self.next_trading_day(local_today);
                if let Some(open) = session
                    .tz
                    .from_local_datetime(&day.and_time(session.start))
                    .earliest()
                {
                    return open.with_timezone(&Utc);
                }
            }
            return at + Duration::hours(1);
        }

        if name.contains("news") {
            return at + Duration::minutes(30);
        }

        if name.contains("indicators") || name.contains("analysis") {
            // Evening of the next trading day, after every session close.
            let tz = market
                .and_then(|m| self.session(m))
                .map(|s| s.tz)
                .unwrap_or(chrono_tz::Europe::Moscow);
            let day = self.next_trading_day(at.with_timezone(&tz).date_naive());
            if let Some(evening) = day
                .and_hms_opt(19, 0, 0)
                .and_then(|dt| tz.from_local_datetime(&dt).earliest())
            {
                return evening.with_timezone(&Utc);
            }
        }

        at + Duration::hours(1)
    }
}
