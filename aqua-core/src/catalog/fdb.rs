//! Expansion of FDB request templates into per-chunk MARS-style requests.

use crate::errors::{AquaError, AquaResult};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Placeholder replaced by the first date of each chunk.
pub const DATE_PLACEHOLDER: &str = "{date}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chunking {
    #[default]
    Daily,
    Monthly,
}

/// Parses `YYYYMMDD`, optionally followed by `THHMM`.
pub fn parse_fdb_date(text: &str) -> AquaResult<NaiveDate> {
    let day = text.get(..8).unwrap_or(text);
    NaiveDate::parse_from_str(day, "%Y%m%d")
        .map_err(|e| AquaError::Time(format!("invalid FDB date '{text}': {e}")))
}

pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Sequence(items) => items.iter().map(render_value).collect::<Vec<_>>().join("/"),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn chunk_end(start: NaiveDate, chunks: Chunking) -> NaiveDate {
    match chunks {
        Chunking::Daily => start,
        Chunking::Monthly => {
            let (year, month) = if start.month() == 12 {
                (start.year() + 1, 1)
            } else {
                (start.year(), start.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1).map_or(start, |next| next - Duration::days(1))
        }
    }
}

/// One request per chunk between `start` and `end` (inclusive).
///
/// A `date` value containing `{date}` is rendered with the chunk's first day;
/// without a `date` key the chunk range is added as `first/to/last`.
pub fn expand_requests(
    template: &BTreeMap<String, Value>,
    start: NaiveDate,
    end: NaiveDate,
    chunks: Chunking,
) -> AquaResult<Vec<BTreeMap<String, String>>> {
    if end < start {
        return Err(AquaError::Time(format!(
            "FDB data end {end} is before start {start}"
        )));
    }
    let mut requests = Vec::new();
    let mut first = start;
    while first <= end {
        let last = chunk_end(first, chunks).min(end);
        let stamp = first.format("%Y%m%d").to_string();
        let mut request: BTreeMap<String, String> = template
            .iter()
            .map(|(k, v)| (k.clone(), render_value(v).replace(DATE_PLACEHOLDER, &stamp)))
            .collect();
        request.entry("date".to_string()).or_insert_with(|| {
            if first == last {
                stamp.clone()
            } else {
                format!("{stamp}/to/{}", last.format("%Y%m%d"))
            }
        });
        requests.push(request);
        first = last + Duration::days(1);
    }
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(yaml: &str) -> BTreeMap<String, Value> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn monthly_chunks_cover_range() {
        let t = template("class: d1\nparam: [167, 228]\nlevtype: sfc\n");
        let requests = expand_requests(
            &t,
            parse_fdb_date("20200115").unwrap(),
            parse_fdb_date("20200310T0000").unwrap(),
            Chunking::Monthly,
        )
        .unwrap();
        let dates: Vec<&str> = requests.iter().map(|r| r["date"].as_str()).collect();
        assert_eq!(
            dates,
            vec!["20200115/to/20200131", "20200201/to/20200229", "20200301/to/20200310"]
        );
        assert_eq!(requests[0]["param"], "167/228");
    }

    #[test]
    fn daily_placeholder() {
        let t = template("date: '{date}'\ntime: '0000/to/2300/by/0100'\n");
        let start = NaiveDate::from_ymd_opt(2021, 12, 31).unwrap();
        let requests =
            expand_requests(&t, start, start + Duration::days(1), Chunking::Daily).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1]["date"], "20220101");
        assert_eq!(requests[1]["time"], "0000/to/2300/by/0100");
    }

    #[test]
    fn bad_dates() {
        assert!(parse_fdb_date("2020-01-01").is_err());
        let start = NaiveDate::from_ymd_opt(2020, 2, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(expand_requests(&BTreeMap::new(), start, end, Chunking::Daily).is_err());
    }
}
