//! Aggregate query construction with bound parameters

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Total number of stored events
pub const COUNT_ALL_SQL: &str = "SELECT count(*) AS count FROM utm";

/// Columns of the `utm` table that filters may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventColumn {
    PageId,
    UtmSource,
    UtmMedium,
    UtmCampaign,
    UtmTerm,
    UtmContent,
    VisitedAt,
    Iphash,
    CountryName,
    City,
    UserAgent,
}

impl EventColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventColumn::PageId => "page_id",
            EventColumn::UtmSource => "utm_source",
            EventColumn::UtmMedium => "utm_medium",
            EventColumn::UtmCampaign => "utm_campaign",
            EventColumn::UtmTerm => "utm_term",
            EventColumn::UtmContent => "utm_content",
            EventColumn::VisitedAt => "visited_at",
            EventColumn::Iphash => "iphash",
            EventColumn::CountryName => "country_name",
            EventColumn::City => "city",
            EventColumn::UserAgent => "user_agent",
        }
    }
}

impl fmt::Display for EventColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let column = match s {
            "page_id" => EventColumn::PageId,
            "utm_source" => EventColumn::UtmSource,
            "utm_medium" => EventColumn::UtmMedium,
            "utm_campaign" => EventColumn::UtmCampaign,
            "utm_term" => EventColumn::UtmTerm,
            "utm_content" => EventColumn::UtmContent,
            "visited_at" => EventColumn::VisitedAt,
            "iphash" => EventColumn::Iphash,
            "country_name" => EventColumn::CountryName,
            "city" => EventColumn::City,
            "user_agent" => EventColumn::UserAgent,
            other => return Err(format!("unknown column '{other}'")),
        };
        Ok(column)
    }
}

/// A `WHERE` fragment and the values bound to its placeholders, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    clause: String,
    params: Vec<String>,
}

impl Filter {
    pub fn equals(column: EventColumn, value: impl Into<String>) -> Self {
        Self {
            clause: format!("{column} = ?"),
            params: vec![value.into()],
        }
    }

    pub fn and(self, other: Filter) -> Self {
        let mut params = self.params;
        params.extend(other.params);
        Self {
            clause: format!("({}) AND ({})", self.clause, other.clause),
            params,
        }
    }

    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

/// Rows whose `column` lies within `[now - start days, now - end days]`,
/// both ends inclusive and evaluated in local time
pub fn date_range_filter(start_days_ago: u32, end_days_ago: u32, column: EventColumn) -> Filter {
    Filter {
        clause: format!(
            "{column} >= datetime('now', ?, 'localtime') AND {column} <= datetime('now', ?, 'localtime')"
        ),
        params: vec![
            format!("-{start_days_ago} days"),
            format!("-{end_days_ago} days"),
        ],
    }
}

/// Relative change of `recent` against `compare`, in whole percent
///
/// A zero baseline yields `recent * 100 - 100`; callers should present it as
/// a special case rather than a real percentage.
pub fn percent_change(recent: i64, compare: i64) -> i64 {
    let value = if compare > 0 {
        recent as f64 / compare as f64 * 100.0 - 100.0
    } else {
        recent as f64 * 100.0 - 100.0
    };
    value.round() as i64
}

/// An aggregate SQL statement with its bound parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateQuery {
    sql: String,
    params: Vec<String>,
}

impl AggregateQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn count_all() -> Self {
        Self::new(COUNT_ALL_SQL)
    }

    pub fn count_where(filter: &Filter) -> Self {
        Self {
            sql: format!("{COUNT_ALL_SQL} WHERE {}", filter.clause()),
            params: filter.params().to_vec(),
        }
    }

    pub fn bind(mut self, value: impl Into<String>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Memoization key derived from the exact text and parameters
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sql.as_bytes());
        for param in &self.params {
            hasher.update([0u8]);
            hasher.update(param.as_bytes());
        }
        format!("{:x}-count", hasher.finalize())
    }
}

impl Default for AggregateQuery {
    fn default() -> Self {
        Self::count_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(150, 100), 50);
        assert_eq!(percent_change(50, 100), -50);
        assert_eq!(percent_change(100, 0), 9900);
        assert_eq!(percent_change(0, 0), -100);
        assert_eq!(percent_change(100, 100), 0);
        assert_eq!(percent_change(1, 3), -67);
    }

    #[test]
    fn test_date_range_filter() {
        let filter = date_range_filter(7, 0, EventColumn::VisitedAt);
        assert_eq!(
            filter.clause(),
            "visited_at >= datetime('now', ?, 'localtime') AND visited_at <= datetime('now', ?, 'localtime')"
        );
        assert_eq!(filter.params(), ["-7 days", "-0 days"]);
    }

    #[test]
    fn test_count_where_combines_filters() {
        let filter = Filter::equals(EventColumn::PageId, "home")
            .and(date_range_filter(30, 0, EventColumn::VisitedAt));
        let query = AggregateQuery::count_where(&filter);

        assert!(query.sql().starts_with(COUNT_ALL_SQL));
        assert!(query.sql().contains("(page_id = ?) AND (visited_at >="));
        assert_eq!(query.params(), ["home", "-30 days", "-0 days"]);
    }

    #[test]
    fn test_cache_keys_distinguish_queries() {
        let all = AggregateQuery::count_all();
        let week = AggregateQuery::count_where(&date_range_filter(7, 0, EventColumn::VisitedAt));
        let month = AggregateQuery::count_where(&date_range_filter(30, 0, EventColumn::VisitedAt));

        assert_eq!(all.cache_key(), AggregateQuery::default().cache_key());
        assert_ne!(all.cache_key(), week.cache_key());
        assert_ne!(week.cache_key(), month.cache_key());
        assert!(all.cache_key().ends_with("-count"));
    }

    #[test]
    fn test_cache_key_separates_params() {
        let a = AggregateQuery::new("SELECT ?").bind("ab").bind("c");
        let b = AggregateQuery::new("SELECT ?").bind("a").bind("bc");
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_column_round_trip() {
        assert_eq!("visited_at".parse::<EventColumn>(), Ok(EventColumn::VisitedAt));
        assert!("visited_at; DROP TABLE utm".parse::<EventColumn>().is_err());
    }
}
