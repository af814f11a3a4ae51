//! List-Models use-case
//!
//! A flat string query either filters the collection or, with a `count`
//! key, counts it:
//!
//! - `count=today|yesterday|thisMonth|lastMonth`: models created in that range
//! - `count=field:value`: models whose `field` equals `value`
//! - any other `count`: every model

use crate::domain::model::Model;
use crate::domain::ports::{Query, RepositoryRef};
use crate::error::Result;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Query key switching to count mode
pub const COUNT_KEY: &str = "count";

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ListResult {
    Models(Vec<Model>),
    Count {
        #[serde(flatten)]
        filter: Option<BTreeMap<String, String>>,
        count: usize,
    },
}

impl ListResult {
    pub fn count(&self) -> usize {
        match self {
            ListResult::Models(models) => models.len(),
            ListResult::Count { count, .. } => *count,
        }
    }
}

/// Calendar ranges for `count`, in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRange {
    Today,
    Yesterday,
    ThisMonth,
    LastMonth,
}

impl FromStr for DateRange {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "today" => Ok(DateRange::Today),
            "yesterday" => Ok(DateRange::Yesterday),
            "thisMonth" => Ok(DateRange::ThisMonth),
            "lastMonth" => Ok(DateRange::LastMonth),
            _ => Err(()),
        }
    }
}

impl DateRange {
    /// Whether `time` falls in the range relative to `now`
    pub fn contains(&self, time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let date = time.date_naive();
        let today = now.date_naive();
        match self {
            DateRange::Today => date == today,
            DateRange::Yesterday => Some(date) == today.checked_sub_signed(Duration::days(1)),
            DateRange::ThisMonth => (date.year(), date.month()) == (today.year(), today.month()),
            DateRange::LastMonth => {
                let (year, month) = match today.month() {
                    1 => (today.year() - 1, 12),
                    m => (today.year(), m - 1),
                };
                (date.year(), date.month()) == (year, month)
            }
        }
    }

    /// First instant of the range relative to `now`
    pub fn start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.date_naive();
        let date = match self {
            DateRange::Today => today,
            DateRange::Yesterday => today.checked_sub_signed(Duration::days(1))?,
            DateRange::ThisMonth => NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?,
            DateRange::LastMonth => match today.month() {
                1 => NaiveDate::from_ymd_opt(today.year() - 1, 12, 1)?,
                m => NaiveDate::from_ymd_opt(today.year(), m - 1, 1)?,
            },
        };
        Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
    }
}

/// Lists or counts models of one repository
pub struct ListModels {
    repository: RepositoryRef,
}

impl ListModels {
    pub fn new(repository: RepositoryRef) -> Self {
        Self { repository }
    }

    pub async fn list(&self, query: &BTreeMap<String, String>) -> Result<ListResult> {
        self.list_at(query, Utc::now()).await
    }

    async fn list_at(
        &self,
        query: &BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<ListResult> {
        let Some(count) = query.get(COUNT_KEY) else {
            let filter = to_query(query);
            let filter = (!filter.is_empty()).then_some(filter);
            return Ok(ListResult::Models(self.repository.list(filter.as_ref()).await?));
        };

        if let Ok(range) = count.parse::<DateRange>() {
            let models = self.repository.list(None).await?;
            let count = models
                .iter()
                .filter(|m| range.contains(m.create_time(), now))
                .count();
            return Ok(ListResult::Count { filter: None, count });
        }

        if let Some((field, value)) = count.split_once(':') {
            let filter = BTreeMap::from([(field.to_string(), value.to_string())]);
            let models = self.repository.list(Some(&to_query(&filter))).await?;
            return Ok(ListResult::Count {
                filter: Some(filter),
                count: models.len(),
            });
        }

        Ok(ListResult::Count {
            filter: None,
            count: self.repository.list(None).await?.len(),
        })
    }
}

/// Values that parse as JSON compare as JSON, anything else as a string
fn to_query(query: &BTreeMap<String, String>) -> Query {
    query
        .iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
            (key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MemoryRepository;
    use crate::domain::ports::Repository;
    use serde_json::json;
    use std::sync::Arc;

    fn model(fields: Value, created: DateTime<Utc>) -> Model {
        let mut doc = fields;
        doc["id"] = json!(uuid::Uuid::new_v4().to_string());
        doc["modelName"] = json!("ORDER");
        doc["createTime"] = json!(created);
        Model::from_value(doc).unwrap()
    }

    async fn setup(now: DateTime<Utc>) -> ListModels {
        let repo = Arc::new(MemoryRepository::new("ORDER"));
        let models = [
            model(json!({"status": "open", "qty": 1}), now),
            model(json!({"status": "open", "qty": 2}), now - Duration::days(1)),
            model(json!({"status": "closed", "qty": 2}), now - Duration::days(40)),
        ];
        for m in models {
            repo.save(m.id(), m.clone()).await.unwrap();
        }
        ListModels::new(repo)
    }

    fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_date_range_wraps_year() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let dec = Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap();
        assert!(DateRange::Yesterday.contains(dec, now));
        assert!(DateRange::LastMonth.contains(dec, now));
        assert!(!DateRange::ThisMonth.contains(dec, now));
        assert_eq!(
            DateRange::LastMonth.start(now),
            Some(Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap())
        );
        assert!("week".parse::<DateRange>().is_err());
    }

    #[tokio::test]
    async fn test_list_and_filter() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let list = setup(now).await;

        assert_eq!(list.list_at(&query(&[]), now).await.unwrap().count(), 3);
        assert_eq!(
            list.list_at(&query(&[("status", "open")]), now).await.unwrap().count(),
            2
        );
        assert_eq!(
            list.list_at(&query(&[("qty", "2")]), now).await.unwrap().count(),
            2
        );
    }

    #[tokio::test]
    async fn test_counts() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let list = setup(now).await;

        let count = |c: &str| query(&[(COUNT_KEY, c)]);
        assert_eq!(list.list_at(&count("today"), now).await.unwrap().count(), 1);
        assert_eq!(list.list_at(&count("yesterday"), now).await.unwrap().count(), 1);
        assert_eq!(list.list_at(&count("thisMonth"), now).await.unwrap().count(), 2);
        assert_eq!(list.list_at(&count("lastMonth"), now).await.unwrap().count(), 1);
        assert_eq!(list.list_at(&count("all"), now).await.unwrap().count(), 3);

        let by_field = list.list_at(&count("status:closed"), now).await.unwrap();
        assert_eq!(
            serde_json::to_value(&by_field).unwrap(),
            json!({"status": "closed", "count": 1})
        );
    }
}
