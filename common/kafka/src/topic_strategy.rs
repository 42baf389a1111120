//! Policies that decide which topics a client should be attached to right now.
//!
//! Strategies are selected from configuration through [`TopicStrategyConfig`],
//! a tagged value resolved once at startup:
//!
//! ```json
//! {"class": "daily", "params": {"topic_format": ["ztf_%s_programid1"], "date_format": "%Y%m%d", "change_hour": 23}}
//! ```

use std::str::FromStr;
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Placeholder replaced by the formatted date in a topic format.
pub const DATE_PLACEHOLDER: &str = "%s";

#[derive(Debug, Error)]
pub enum TopicStrategyError {
    #[error("topic format {0:?} must contain exactly one {DATE_PLACEHOLDER} placeholder")]
    InvalidTopicFormat(String),
    #[error("at least one topic format is required")]
    NoTopicFormat,
    #[error("invalid date format {0:?}")]
    InvalidDateFormat(String),
    #[error("change hour must be between 0 and 23, got {0}")]
    InvalidChangeHour(u32),
    #[error("invalid topic strategy configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Source of wall-clock time, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Computes the current topic set. Implementations must be side-effect free,
/// they are called on every consume cycle.
pub trait TopicStrategy: Send + Sync {
    fn resolve(&self) -> Vec<String>;
}

/// One topic per day, switching over at `change_hour` UTC.
///
/// From the change hour on, tomorrow's topics are returned alongside today's
/// so a subscriber is already attached to the next topic when producers move.
pub struct DailyTopicStrategy {
    topic_formats: Vec<String>,
    date_format: String,
    change_hour: u32,
    clock: Arc<dyn Clock>,
}

impl DailyTopicStrategy {
    pub fn new(
        topic_formats: Vec<String>,
        date_format: impl Into<String>,
        change_hour: u32,
    ) -> Result<Self, TopicStrategyError> {
        let date_format = date_format.into();

        if topic_formats.is_empty() {
            return Err(TopicStrategyError::NoTopicFormat);
        }
        if let Some(bad) = topic_formats
            .iter()
            .find(|f| f.matches(DATE_PLACEHOLDER).count() != 1)
        {
            return Err(TopicStrategyError::InvalidTopicFormat(bad.clone()));
        }
        // chrono only reports a bad specifier when rendering, and panics doing so
        if StrftimeItems::new(&date_format).any(|item| matches!(item, Item::Error)) {
            return Err(TopicStrategyError::InvalidDateFormat(date_format));
        }
        if change_hour > 23 {
            return Err(TopicStrategyError::InvalidChangeHour(change_hour));
        }

        Ok(Self {
            topic_formats,
            date_format,
            change_hour,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn change_hour(&self) -> u32 {
        self.change_hour
    }

    /// Topics for an explicit point in time.
    pub fn topics_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut topics = self.topics_for_day(now);
        if now.hour() >= self.change_hour {
            topics.extend(self.topics_for_day(now + Duration::days(1)));
        }
        topics
    }

    fn topics_for_day(&self, day: DateTime<Utc>) -> Vec<String> {
        let date = day.format(&self.date_format).to_string();
        self.topic_formats
            .iter()
            .map(|format| format.replacen(DATE_PLACEHOLDER, &date, 1))
            .collect()
    }
}

impl TopicStrategy for DailyTopicStrategy {
    fn resolve(&self) -> Vec<String> {
        self.topics_at(self.clock.now())
    }
}

/// Registry of the strategies that can be named in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "class", content = "params", rename_all = "snake_case")]
pub enum TopicStrategyConfig {
    Daily(DailyTopicParams),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DailyTopicParams {
    pub topic_format: OneOrMany,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_change_hour")]
    pub change_hour: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(one) => vec![one],
            OneOrMany::Many(many) => many,
        }
    }
}

fn default_date_format() -> String {
    "%Y%m%d".to_string()
}

fn default_change_hour() -> u32 {
    22
}

impl TopicStrategyConfig {
    pub fn build(&self) -> Result<Box<dyn TopicStrategy>, TopicStrategyError> {
        self.build_with_clock(Arc::new(SystemClock))
    }

    pub fn build_with_clock(
        &self,
        clock: Arc<dyn Clock>,
    ) -> Result<Box<dyn TopicStrategy>, TopicStrategyError> {
        match self {
            TopicStrategyConfig::Daily(params) => {
                let strategy = DailyTopicStrategy::new(
                    params.topic_format.clone().into(),
                    params.date_format.clone(),
                    params.change_hour,
                )?
                .with_clock(clock);
                Ok(Box::new(strategy))
            }
        }
    }
}

impl FromStr for TopicStrategyConfig {
    type Err = TopicStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}
