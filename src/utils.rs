//! Metadata parsing helpers shared by the CYGNSS adapter programs.
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::ParseError;

/// The epoch-relative units used for the output `time` variable.
///
/// [`days_since_epoch`] encodes datetimes consistently with this string,
/// so the two must change together.
pub const TIME_UNITS: &str = "days since 1970-01-01 00:00:00 UTC";

/// Our preferred ISO datetime format for string-valued attributes.
pub const ISO_TIMESTAMP_FMT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse the `YYYY_DDD` (four-digit year, three-digit day-of-year) stamp
/// that ends the stem of a CYGNSS L3 file name.
///
/// For example, `ucar_cu_cygnss_sm_v1_2017_077.nc` yields midnight on
/// 2017-03-18 (day 77 of 2017). The stamp must be exactly the last 8
/// characters before the extension; anything else is a [`ParseError`].
pub fn doy_timestamp_from_filename(path: &Path) -> Result<NaiveDateTime, ParseError> {
    let err = || ParseError::FilenameTimestamp(path.display().to_string());

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .ok_or_else(err)?;
    if stem.len() < 8 {
        return Err(err());
    }
    let stamp = &stem[stem.len() - 8..];

    let date = NaiveDate::parse_from_str(stamp, "%Y_%j").map_err(|_| err())?;
    Ok(date.and_hms_opt(0, 0, 0).expect("midnight is always a valid time"))
}

/// Extract the creation date embedded in a CYGNSS history string.
///
/// The upstream files store the date in one of two layouts, both starting
/// at character 8 of the history line: `dd-Mon-YYYY` (e.g. `05-Jan-2019`)
/// or `YYYY-mm-dd`. The first format is tried first; a format mismatch
/// falls back to the second. Both failing is a [`ParseError`].
pub fn history_creation_date(history: &str) -> Result<NaiveDateTime, ParseError> {
    if let Some(field) = history.get(8..19) {
        if let Ok(date) = NaiveDate::parse_from_str(field, "%d-%b-%Y") {
            return Ok(date.and_hms_opt(0, 0, 0).expect("midnight is always a valid time"));
        }
    }

    let field = history
        .get(8..18)
        .ok_or_else(|| ParseError::HistoryDate(history.to_string()))?;
    let date = NaiveDate::parse_from_str(field, "%Y-%m-%d")
        .map_err(|_| ParseError::HistoryDate(history.to_string()))?;
    Ok(date.and_hms_opt(0, 0, 0).expect("midnight is always a valid time"))
}

/// Parse the numeric part of a `"version <float>"` global attribute.
///
/// The literal `version ` prefix is stripped if present (the upstream
/// files are not perfectly consistent about including it).
pub fn parse_version_attr(raw: &str) -> Result<f64, ParseError> {
    let number = raw.strip_prefix("version ").unwrap_or(raw);
    number
        .trim()
        .parse::<f64>()
        .map_err(|_| ParseError::VersionAttr(raw.to_string()))
}

/// Encode a datetime as fractional days since 1970-01-01T00:00:00 UTC,
/// matching [`TIME_UNITS`].
pub fn days_since_epoch(t: NaiveDateTime) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
        .expect("the epoch is a valid date")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time");
    (t - epoch).num_seconds() as f64 / 86400.0
}
