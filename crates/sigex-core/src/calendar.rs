//! Exchange session calendar.
//!
//! All decisions are made in the exchange's local timezone (IST for NSE/BSE):
//! - Session open/close with entry buffers on both ends
//! - Weekend, holiday and special-session closures
//! - Per-symbol earnings dates and derivative expiry days
//! - Intraday blackout windows
//! - Day/week/month period keys for ledger rollover

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{CoreError, Result};

/// Intraday window during which new entries are blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutWindow {
    /// Start time in HH:MM format (exchange local).
    pub start: String,
    /// End time in HH:MM format (exchange local).
    pub end: String,
}

impl BlackoutWindow {
    pub fn start_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.start, "%H:%M").ok()
    }

    pub fn end_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.end, "%H:%M").ok()
    }

    /// Whether `time` falls inside the window. Windows may wrap midnight.
    pub fn contains(&self, time: NaiveTime) -> bool {
        let (Some(start), Some(end)) = (self.start_time(), self.end_time()) else {
            return false;
        };

        if start <= end {
            time >= start && time < end
        } else {
            time >= start || time < end
        }
    }
}

/// Calendar configuration as loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// IANA timezone of the exchange.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Session open, HH:MM.
    #[serde(default = "default_session_open")]
    pub session_open: String,
    /// Session close, HH:MM.
    #[serde(default = "default_session_close")]
    pub session_close: String,
    /// No new entries this many minutes after the open.
    #[serde(default = "default_open_buffer_mins")]
    pub open_buffer_mins: u32,
    /// No new entries this many minutes before the close.
    #[serde(default = "default_close_buffer_mins")]
    pub close_buffer_mins: u32,
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
    /// Special sessions (e.g. muhurat trading) where entries are blocked.
    #[serde(default)]
    pub special_sessions: Vec<NaiveDate>,
    /// Symbol -> earnings announcement dates.
    #[serde(default)]
    pub earnings: HashMap<String, Vec<NaiveDate>>,
    #[serde(default)]
    pub expiry_dates: Vec<NaiveDate>,
    /// Block entries on expiry days.
    #[serde(default)]
    pub block_expiry_days: bool,
    #[serde(default)]
    pub blackout_windows: Vec<BlackoutWindow>,
}

fn default_timezone() -> String {
    "Asia/Kolkata".to_string()
}

fn default_session_open() -> String {
    "09:15".to_string()
}

fn default_session_close() -> String {
    "15:30".to_string()
}

fn default_open_buffer_mins() -> u32 {
    15
}

fn default_close_buffer_mins() -> u32 {
    15
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            session_open: default_session_open(),
            session_close: default_session_close(),
            open_buffer_mins: default_open_buffer_mins(),
            close_buffer_mins: default_close_buffer_mins(),
            holidays: Vec::new(),
            special_sessions: Vec::new(),
            earnings: HashMap::new(),
            expiry_dates: Vec::new(),
            block_expiry_days: false,
            blackout_windows: Vec::new(),
        }
    }
}

/// Why the calendar blocks entries right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimingBlock {
    Weekend,
    Holiday,
    SpecialSession,
    Earnings,
    Expiry,
    OutsideSession,
    OpenBuffer,
    CloseBuffer,
    Blackout { start: String, end: String },
}

impl fmt::Display for TimingBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weekend => write!(f, "weekend"),
            Self::Holiday => write!(f, "exchange holiday"),
            Self::SpecialSession => write!(f, "special session"),
            Self::Earnings => write!(f, "earnings date"),
            Self::Expiry => write!(f, "expiry day"),
            Self::OutsideSession => write!(f, "outside session hours"),
            Self::OpenBuffer => write!(f, "inside open buffer"),
            Self::CloseBuffer => write!(f, "inside close buffer"),
            Self::Blackout { start, end } => write!(f, "blackout {start}-{end}"),
        }
    }
}

/// Calendar period identifiers in exchange-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodKey {
    pub day: NaiveDate,
    /// (ISO year, ISO week number).
    pub week: (i32, u32),
    /// (year, month).
    pub month: (i32, u32),
}

/// Validated, query-ready calendar.
#[derive(Debug, Clone)]
pub struct SessionCalendar {
    timezone: Tz,
    open: NaiveTime,
    close: NaiveTime,
    open_buffer_mins: u32,
    close_buffer_mins: u32,
    holidays: HashSet<NaiveDate>,
    special_sessions: HashSet<NaiveDate>,
    earnings: HashMap<String, HashSet<NaiveDate>>,
    expiry_dates: HashSet<NaiveDate>,
    block_expiry_days: bool,
    blackout_windows: Vec<BlackoutWindow>,
}

impl SessionCalendar {
    /// Build a calendar from config, validating timezone and times.
    pub fn from_config(config: &CalendarConfig) -> Result<Self> {
        let timezone: Tz = config
            .timezone
            .parse()
            .map_err(|e| CoreError::UnknownTimezone(format!("{}: {e}", config.timezone)))?;
        let open = parse_hhmm(&config.session_open)?;
        let close = parse_hhmm(&config.session_close)?;
        if open >= close {
            return Err(CoreError::InvalidConfig(format!(
                "session_open {} must be before session_close {}",
                config.session_open, config.session_close
            )));
        }
        for w in &config.blackout_windows {
            parse_hhmm(&w.start)?;
            parse_hhmm(&w.end)?;
        }

        Ok(Self {
            timezone,
            open,
            close,
            open_buffer_mins: config.open_buffer_mins,
            close_buffer_mins: config.close_buffer_mins,
            holidays: config.holidays.iter().copied().collect(),
            special_sessions: config.special_sessions.iter().copied().collect(),
            earnings: config
                .earnings
                .iter()
                .map(|(sym, dates)| (sym.clone(), dates.iter().copied().collect()))
                .collect(),
            expiry_dates: config.expiry_dates.iter().copied().collect(),
            block_expiry_days: config.block_expiry_days,
            blackout_windows: config.blackout_windows.clone(),
        })
    }

    /// NSE-style calendar with default settings and no special dates.
    pub fn indian_equities() -> Self {
        Self {
            timezone: chrono_tz::Asia::Kolkata,
            open: NaiveTime::from_hms_opt(9, 15, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or(NaiveTime::MIN),
            open_buffer_mins: default_open_buffer_mins(),
            close_buffer_mins: default_close_buffer_mins(),
            holidays: HashSet::new(),
            special_sessions: HashSet::new(),
            earnings: HashMap::new(),
            expiry_dates: HashSet::new(),
            block_expiry_days: false,
            blackout_windows: Vec::new(),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Exchange-local calendar date of `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    /// Day/week/month identifiers of `now` in exchange-local time.
    pub fn period_key(&self, now: DateTime<Utc>) -> PeriodKey {
        let day = self.local_date(now);
        let iso = day.iso_week();
        PeriodKey {
            day,
            week: (iso.year(), iso.week()),
            month: (day.year(), day.month()),
        }
    }

    /// Returns the first calendar rule that blocks a new entry in `symbol` at `now`.
    pub fn timing_block(&self, symbol: &str, now: DateTime<Utc>) -> Option<TimingBlock> {
        let local = now.with_timezone(&self.timezone);
        let date = local.date_naive();
        let time = local.time();

        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return Some(TimingBlock::Weekend);
        }
        if self.holidays.contains(&date) {
            return Some(TimingBlock::Holiday);
        }
        if self.special_sessions.contains(&date) {
            return Some(TimingBlock::SpecialSession);
        }
        if self
            .earnings
            .get(symbol)
            .is_some_and(|dates| dates.contains(&date))
        {
            return Some(TimingBlock::Earnings);
        }
        if self.block_expiry_days && self.expiry_dates.contains(&date) {
            return Some(TimingBlock::Expiry);
        }
        if time < self.open || time >= self.close {
            return Some(TimingBlock::OutsideSession);
        }
        let open_buffer_end = self.open + chrono::Duration::minutes(self.open_buffer_mins.into());
        if time < open_buffer_end {
            return Some(TimingBlock::OpenBuffer);
        }
        let close_buffer_start =
            self.close - chrono::Duration::minutes(self.close_buffer_mins.into());
        if time >= close_buffer_start {
            return Some(TimingBlock::CloseBuffer);
        }
        self.blackout_windows
            .iter()
            .find(|w| w.contains(time))
            .map(|w| TimingBlock::Blackout {
                start: w.start.clone(),
                end: w.end.clone(),
            })
    }
}

impl Default for SessionCalendar {
    fn default() -> Self {
        Self::indian_equities()
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| CoreError::InvalidTime(format!("{s}: {e}")))
}
