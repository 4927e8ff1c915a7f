use std::io::Cursor;

use xdb_rs::{Segment, XdbError};
use xdb_rs::range::{parse_range_reader, split_into_subnets};

#[test]
fn parse_context_reports_surrounding_lines_on_rejection() {
    let text = "1.0.0.0|1.0.0.255|A\n1.0.1.0|1.0.1.255|B\n1.0.3.0|1.0.3.255|C\n";
    let err = parse_range_reader(Cursor::new(text), true).unwrap_err();
    match err {
        XdbError::Parse(ctx) => {
            assert_eq!(ctx.line_no, 3);
            assert_eq!(ctx.before, vec!["1.0.0.0|1.0.0.255|A".to_string(), "1.0.1.0|1.0.1.255|B".to_string()]);
        }
        other => panic!("expected a Parse error, got {other:?}"),
    }
}

#[test]
fn split_into_subnets_never_drops_or_duplicates_coverage() {
    let seg = Segment::new(0x00FFFF00, 0x02000100, "R");
    let parts = split_into_subnets(&seg);
    let covered: u64 = parts.iter().map(|p| p.end_ip as u64 - p.start_ip as u64 + 1).sum();
    assert_eq!(covered, seg.end_ip as u64 - seg.start_ip as u64 + 1);
}
