//! `+CGNSINF` sentence grammar.
//!
//! The receiver reports one comma-separated record per poll:
//! `+CGNSINF: <run>,<fix>,<utc>,<lat>,<lon>,<alt>,<spd>,<cog>,<fix_mode>,...`
//! Empty fields are positionally significant and must be preserved; fields
//! beyond the parsed set are tolerated and ignored.

use heapless::Vec;
use winnow::ascii::{dec_uint, float, space0};
use winnow::combinator::preceded;
use winnow::error::ContextError;
use winnow::token::rest;
use winnow::prelude::*;

use super::{GnssFix, StartMode};

/// Minimum field count for a usable record.
const MIN_FIELDS: usize = 9;
/// Upper bound on fields we keep; longer tails are ignored.
const MAX_FIELDS: usize = 40;

const IDX_RUN_STATUS: usize = 0;
const IDX_FIX_STATUS: usize = 1;
const IDX_UTC: usize = 2;
const IDX_LAT: usize = 3;
const IDX_LON: usize = 4;
const IDX_ALT: usize = 5;
const IDX_SPEED: usize = 6;
const IDX_COURSE: usize = 7;
const IDX_FIX_MODE: usize = 8;
const IDX_HDOP: usize = 10;
const IDX_SATS_USED: usize = 14;

/// DOP reported when the field is absent; always fails the quality gate.
const HDOP_ABSENT: f32 = 999.0;

fn strip_prefix(line: &str) -> Option<&str> {
    let mut input = line.trim_start();
    preceded(("+CGNSINF:", space0::<&str, ContextError>), rest)
        .parse_next(&mut input)
        .ok()
}

fn field_f64(field: &str) -> Option<f64> {
    float::<&str, f64, ContextError>.parse(field.trim()).ok()
}

fn field_f32(field: &str) -> Option<f32> {
    float::<&str, f32, ContextError>.parse(field.trim()).ok()
}

fn field_u8(field: &str) -> Option<u8> {
    dec_uint::<&str, u8, ContextError>.parse(field.trim()).ok()
}

/// Parses one raw sentence into an ungated [`GnssFix`].
///
/// Returns `None` when the line is not a `+CGNSINF` record or carries fewer
/// than the minimum field count; the caller treats that as "no sample this
/// poll", not as a quality failure.
pub(super) fn parse(line: &str) -> Option<GnssFix> {
    let csv = strip_prefix(line)?;

    let mut fields: Vec<&str, MAX_FIELDS> = Vec::new();
    for piece in csv.split(',') {
        if fields.push(piece).is_err() {
            break;
        }
    }
    if fields.len() < MIN_FIELDS {
        return None;
    }

    let mut fix = GnssFix {
        field_count: u8::try_from(fields.len()).unwrap_or(u8::MAX),
        run_status: field_u8(fields[IDX_RUN_STATUS]).unwrap_or(0),
        fix_field_present: !fields[IDX_FIX_STATUS].is_empty(),
        fix_status: field_u8(fields[IDX_FIX_STATUS]).unwrap_or(0),
        lat: field_f64(fields[IDX_LAT]).unwrap_or(0.0),
        lon: field_f64(fields[IDX_LON]).unwrap_or(0.0),
        alt_m: field_f64(fields[IDX_ALT]).unwrap_or(0.0),
        speed_kmh: field_f64(fields[IDX_SPEED]).unwrap_or(0.0),
        course_deg: field_f64(fields[IDX_COURSE]).unwrap_or(0.0),
        fix_mode: field_u8(fields[IDX_FIX_MODE]).unwrap_or(0),
        hdop: HDOP_ABSENT,
        sats_used: 0,
        start_mode: StartMode::Unknown,
        ..GnssFix::default()
    };

    let utc = fields[IDX_UTC].trim();
    for ch in utc.chars().take(super::MAX_UTC_LEN) {
        let _ = fix.utc.push(ch);
    }

    if let Some(raw) = fields.get(IDX_HDOP)
        && !raw.is_empty()
    {
        fix.hdop = field_f32(raw).unwrap_or(HDOP_ABSENT);
    }

    if let Some(raw) = fields.get(IDX_SATS_USED)
        && !raw.is_empty()
    {
        fix.sats_used = field_u8(raw).unwrap_or(0);
    }

    Some(fix)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "+CGNSINF: 1,1,20250101115959.000,59.329500,18.068500,28.1,42.7,183.0,1,,1.2,1.5,0.9,,11,13,,,41,,";

    #[test]
    fn parses_a_full_record() {
        let fix = parse(FULL).expect("record should parse");
        assert_eq!(fix.run_status, 1);
        assert!(fix.fix_field_present);
        assert_eq!(fix.fix_status, 1);
        assert_eq!(fix.utc.as_str(), "20250101115959.000");
        assert!((fix.lat - 59.3295).abs() < 1e-9);
        assert!((fix.lon - 18.0685).abs() < 1e-9);
        assert!((fix.alt_m - 28.1).abs() < 1e-9);
        assert!((fix.speed_kmh - 42.7).abs() < 1e-9);
        assert!((fix.course_deg - 183.0).abs() < 1e-9);
        assert_eq!(fix.fix_mode, 1);
        assert!((fix.hdop - 1.2).abs() < 1e-6);
        assert_eq!(fix.sats_used, 11);
        assert_eq!(fix.field_count, 21);
    }

    #[test]
    fn preserves_empty_fields_positionally() {
        // fix-status empty: the field is reported absent, not zero-valued.
        let fix = parse("+CGNSINF: 1,,20250101115959.000,59.3,18.0,28.1,0.0,0.0,1,,1.2,,,,7,,,,,,")
            .expect("record should parse");
        assert!(!fix.fix_field_present);
        assert_eq!(fix.fix_status, 0);
        assert_eq!(fix.sats_used, 7);
    }

    #[test]
    fn short_records_are_unparseable() {
        assert!(parse("+CGNSINF: 1,1,20250101115959.000,59.3").is_none());
        assert!(parse("+CGNSINF: ").is_none());
    }

    #[test]
    fn non_cgnsinf_lines_are_unparseable() {
        assert!(parse("OK").is_none());
        assert!(parse("+CCLK: \"25/12/13,19:22:50+04\"").is_none());
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        // Only the 9 mandatory fields present: HDOP and sats absent.
        let fix = parse("+CGNSINF: 1,0,,0.0,0.0,0.0,0.0,0.0,0").expect("record should parse");
        assert_eq!(fix.hdop, HDOP_ABSENT);
        assert_eq!(fix.sats_used, 0);
        assert_eq!(fix.field_count, 9);
    }

    #[test]
    fn overlong_records_are_truncated_not_rejected() {
        let mut line = alloc::string::String::from("+CGNSINF: 1,1,20250101115959.000,59.3,18.0,28.1,0.0,0.0,1");
        for _ in 0..60 {
            line.push_str(",0");
        }
        let fix = parse(&line).expect("record should parse");
        assert_eq!(fix.field_count, 40);
    }
}
