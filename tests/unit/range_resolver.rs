//! Ingest and coverage range resolution

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use test_log::test;

use crate::common::fixtures::ym;
use crate::common::logging::{init_test_logging, log_test_data, log_test_step};
use bronze_ingest::errors::IngestError;
use bronze_ingest::models::IngestRange;
use bronze_ingest::planner::RangeResolver;

#[test]
fn test_default_range_is_previous_and_current_month() {
    init_test_logging();
    log_test_step("Default range ignores time of day");

    for (day, hour) in [(1, 0), (15, 12), (31, 23)] {
        let trigger = Utc.with_ymd_and_hms(2025, 12, day, hour, 59, 59).unwrap();
        let range = RangeResolver::resolve(trigger, None, None).unwrap();
        assert_eq!((range.start(), range.end()), (ym("2025-11"), ym("2025-12")));
    }
}

#[test]
fn test_default_range_crosses_year_boundary() {
    let trigger = Utc.with_ymd_and_hms(2026, 1, 3, 8, 0, 0).unwrap();
    let range = RangeResolver::resolve(trigger, None, None).unwrap();
    assert_eq!((range.start(), range.end()), (ym("2025-12"), ym("2026-01")));
}

#[test]
fn test_explicit_range_is_used_verbatim() {
    let trigger = Utc.with_ymd_and_hms(2025, 12, 17, 10, 0, 0).unwrap();
    let range = RangeResolver::resolve(trigger, Some("2020-01"), Some("2020-02")).unwrap();
    assert_eq!(range, IngestRange::parse("2020-01", "2020-02").unwrap());

    let single = RangeResolver::resolve(trigger, Some(" 2021-07 "), Some("2021-07")).unwrap();
    assert_eq!((single.start(), single.end()), (ym("2021-07"), ym("2021-07")));
}

#[test]
fn test_explicit_range_validation() {
    let trigger = Utc.with_ymd_and_hms(2025, 12, 17, 10, 0, 0).unwrap();

    assert_matches!(
        RangeResolver::resolve(trigger, Some("2024-05"), Some("2024-01")),
        Err(IngestError::InvalidOrder { .. })
    );

    for bad in ["2024-13", "2024-1", "24-01", "2024/01", "2024-01-01", "abcd-ef"] {
        let err = RangeResolver::resolve(trigger, Some(bad), Some("2024-12")).unwrap_err();
        log_test_data("Rejected start", &err);
        assert_matches!(err, IngestError::InvalidFormat { field: "year_month_start", .. });

        let err = RangeResolver::resolve(trigger, Some("2024-01"), Some(bad)).unwrap_err();
        assert_matches!(err, IngestError::InvalidFormat { field: "year_month_end", .. });
    }
}

#[test]
fn test_resolution_is_deterministic() {
    let trigger = Utc.with_ymd_and_hms(2025, 6, 30, 23, 0, 0).unwrap();
    let first = RangeResolver::resolve(trigger, None, None).unwrap();
    let second = RangeResolver::resolve(trigger, None, None).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_coverage_starts_in_january_of_previous_year() {
    let cases = [
        (("2020-01", "2020-02"), ("2019-01", "2020-02")),
        (("2025-11", "2025-12"), ("2024-01", "2025-12")),
        (("2025-12", "2026-01"), ("2025-01", "2026-01")),
        (("2024-02", "2024-02"), ("2023-01", "2024-02")),
    ];

    for ((start, end), (cov_start, cov_end)) in cases {
        let ingest = IngestRange::parse(start, end).unwrap();
        let coverage = RangeResolver::coverage(&ingest).unwrap();
        assert_eq!((coverage.start, coverage.end), (ym(cov_start), ym(cov_end)));
        assert_eq!(coverage.start.month(), 1);
        assert!(coverage.start <= ingest.start());
        assert_eq!(coverage.end, ingest.end());
    }
}

#[test]
fn test_coverage_violation_for_multi_year_range() {
    // An explicit range that starts before the trailing year is not covered.
    let ingest = IngestRange::parse("2018-06", "2020-02").unwrap();
    assert_matches!(
        RangeResolver::coverage(&ingest),
        Err(IngestError::CoverageInvariantViolation(_))
    );
}
