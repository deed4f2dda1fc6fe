use crate::error::FaersLensError;

const DAYS_IN_MONTH: [u8; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
const DATE_FORMATS: &str = "YYYY, YYYY-MM, YYYY-MM-DD, or YYYYMMDD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeEdge {
    Start,
    End,
}

fn is_leap_year(year: u32) -> bool {
    (year.is_multiple_of(4) && !year.is_multiple_of(100)) || year.is_multiple_of(400)
}

fn days_in_month(year: u32, month: u32) -> u32 {
    if month == 2 && is_leap_year(year) {
        29
    } else {
        DAYS_IN_MONTH[(month - 1) as usize] as u32
    }
}

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

/// Splits a calendar date into `(year, month, day)` where month and day may be absent.
fn split_date(value: &str) -> Option<(&str, Option<&str>, Option<&str>)> {
    match value.len() {
        4 if all_digits(value) => Some((value, None, None)),
        7 if value.as_bytes()[4] == b'-' => Some((&value[..4], Some(&value[5..7]), None)),
        8 if all_digits(value) => Some((&value[..4], Some(&value[4..6]), Some(&value[6..8]))),
        10 if value.as_bytes()[4] == b'-' && value.as_bytes()[7] == b'-' => {
            Some((&value[..4], Some(&value[5..7]), Some(&value[8..10])))
        }
        _ => None,
    }
}

/// Converts a user-supplied date into openFDA's `YYYYMMDD` range boundary.
///
/// Partial dates widen to the matching edge of their period: `2019` as an end
/// boundary becomes `20191231`, `2020-02` as an end boundary becomes `20200229`.
pub(crate) fn range_boundary(value: &str, edge: RangeEdge) -> Result<String, FaersLensError> {
    let v = value.trim();
    let Some((year, month, day)) = split_date(v) else {
        return Err(FaersLensError::invalid(
            "date range",
            format!("'{v}' must be {DATE_FORMATS}"),
        ));
    };

    let parse = |part: &str, what: &str| -> Result<u32, FaersLensError> {
        if !all_digits(part) {
            return Err(FaersLensError::invalid(
                "date range",
                format!("invalid {what} in '{v}'"),
            ));
        }
        part.parse::<u32>()
            .map_err(|_| FaersLensError::invalid("date range", format!("invalid {what} in '{v}'")))
    };

    let year = parse(year, "year")?;
    if year < 1900 {
        return Err(FaersLensError::invalid(
            "date range",
            format!("year {year} in '{v}' is before any FAERS report"),
        ));
    }

    let month = match month {
        Some(m) => parse(m, "month")?,
        None if edge == RangeEdge::Start => 1,
        None => 12,
    };
    if !(1..=12).contains(&month) {
        return Err(FaersLensError::invalid(
            "date range",
            format!("month {month} in '{v}' must be 01-12"),
        ));
    }

    let max_day = days_in_month(year, month);
    let day = match day {
        Some(d) => parse(d, "day")?,
        None if edge == RangeEdge::Start => 1,
        None => max_day,
    };
    if day < 1 || day > max_day {
        return Err(FaersLensError::invalid(
            "date range",
            format!("day {day} is not valid for month {month} in '{v}'"),
        ));
    }

    Ok(format!("{year:04}{month:02}{day:02}"))
}

/// Parses an openFDA `YYYYMMDD` receipt date into `(year, month)`.
///
/// Returns `None` for anything that is not a real calendar date.
pub(crate) fn parse_receipt_date(value: &str) -> Option<(u32, u32)> {
    let v = value.trim();
    if v.len() != 8 || !all_digits(v) {
        return None;
    }
    let year: u32 = v[0..4].parse().ok()?;
    let month: u32 = v[4..6].parse().ok()?;
    let day: u32 = v[6..8].parse().ok()?;
    if !(1..=12).contains(&month) || day < 1 || day > days_in_month(year, month) {
        return None;
    }
    Some((year, month))
}

#[cfg(test)]
mod tests {
    use super::{RangeEdge, parse_receipt_date, range_boundary};

    #[test]
    fn expands_year_to_period_edges() {
        assert_eq!(range_boundary("2015", RangeEdge::Start).unwrap(), "20150101");
        assert_eq!(range_boundary("2015", RangeEdge::End).unwrap(), "20151231");
    }

    #[test]
    fn expands_year_month_to_last_day_including_leap_years() {
        assert_eq!(range_boundary("2020-02", RangeEdge::End).unwrap(), "20200229");
        assert_eq!(range_boundary("2019-02", RangeEdge::End).unwrap(), "20190228");
        assert_eq!(range_boundary("2019-02", RangeEdge::Start).unwrap(), "20190201");
    }

    #[test]
    fn accepts_dashed_and_compact_full_dates() {
        assert_eq!(range_boundary("2015-06-15", RangeEdge::Start).unwrap(), "20150615");
        assert_eq!(range_boundary("20150615", RangeEdge::End).unwrap(), "20150615");
    }

    #[test]
    fn rejects_invalid_month_and_day() {
        let err = range_boundary("2015-13", RangeEdge::Start).expect_err("month should fail");
        assert!(err.to_string().contains("month 13"));

        let err = range_boundary("2019-02-29", RangeEdge::Start).expect_err("day should fail");
        assert!(err.to_string().contains("day 29"));

        let err = range_boundary("last year", RangeEdge::Start).expect_err("format should fail");
        assert!(err.to_string().contains("Invalid date range"));
    }

    #[test]
    fn parse_receipt_date_skips_malformed_values() {
        assert_eq!(parse_receipt_date("20210315"), Some((2021, 3)));
        assert_eq!(parse_receipt_date("20211301"), None);
        assert_eq!(parse_receipt_date("2021-03-15"), None);
        assert_eq!(parse_receipt_date(""), None);
    }
}
