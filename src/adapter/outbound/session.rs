//! Weekday trading-hours market session.

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveTime, Weekday};

use crate::domain::{Clock, MarketSession};
use crate::error::{ConfigError, Result};
use crate::infrastructure::config::UpstreamConfig;
use crate::port::MarketSessionSource;

/// Open Monday to Friday between `open` and `close` market-local time.
///
/// Holidays are not modelled.
pub struct WeekdaySchedule {
    open: NaiveTime,
    close: NaiveTime,
    utc_offset: Duration,
    clock: Arc<dyn Clock>,
}

fn parse_time(field: &'static str, value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|e| {
        ConfigError::InvalidValue {
            field,
            reason: format!("expected HH:MM, got {value:?}: {e}"),
        }
        .into()
    })
}

impl WeekdaySchedule {
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if the open or close time is not `HH:MM`
    /// or the session would be empty.
    pub fn from_config(config: &UpstreamConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let open = parse_time("upstream.market_open", &config.market_open)?;
        let close = parse_time("upstream.market_close", &config.market_close)?;
        if open >= close {
            return Err(ConfigError::InvalidValue {
                field: "upstream.market_close",
                reason: "must be later than market_open".into(),
            }
            .into());
        }
        Ok(Self {
            open,
            close,
            utc_offset: Duration::hours(i64::from(config.utc_offset_hours)),
            clock,
        })
    }
}

impl MarketSessionSource for WeekdaySchedule {
    fn current_session(&self) -> MarketSession {
        let local = self.clock.now().naive_utc() + self.utc_offset;
        let weekend = matches!(local.weekday(), Weekday::Sat | Weekday::Sun);
        let time = local.time();

        if !weekend && time >= self.open && time < self.close {
            MarketSession::Open
        } else {
            MarketSession::Closed
        }
    }
}
