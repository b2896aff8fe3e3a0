use serde::Serialize;

/// Maximum end-term marks; the externally predicted component is clamped here.
pub const END_TERM_MAX: f64 = 50.0;

/// Grade bands, lower bound inclusive, evaluated top-down. Anything below
/// the lowest band is an F.
const GRADE_BANDS: [(f64, &str, i64); 7] = [
    (91.0, "O", 10),
    (81.0, "A+", 9),
    (71.0, "A", 8),
    (61.0, "B+", 7),
    (51.0, "B", 6),
    (46.0, "C", 5),
    (40.0, "P", 4),
];

pub fn grade_for(total: f64) -> (&'static str, i64) {
    for (floor, letter, grade_point) in GRADE_BANDS {
        if total >= floor {
            return (letter, grade_point);
        }
    }
    ("F", 0)
}

/// Weighted course total out of 100:
/// 20 (mid-term) + 10 (assignments) + 10 (attendance) + 10 (quiz) + 50 (end term).
/// A quiz not yet taken counts as zero, not as missing data. No clamping
/// happens here; the end-term component is clamped before it reaches us.
pub fn course_total(
    mid_term: f64,
    assignments: f64,
    attendance: f64,
    quiz_score: Option<f64>,
    end_term: f64,
) -> f64 {
    mid_term + assignments + attendance * 0.1 + quiz_score.unwrap_or(0.0) * 0.1 + end_term
}

/// Coerce the gateway's raw text to an end-term mark. The prompt asks for a
/// bare number but replies sometimes carry trailing prose, so take the
/// leading numeric prefix; anything unusable defaults to 0. Result is
/// clamped to [0, END_TERM_MAX].
pub fn coerce_end_term(raw: &str) -> f64 {
    leading_number(raw).unwrap_or(0.0).clamp(0.0, END_TERM_MAX)
}

fn leading_number(raw: &str) -> Option<f64> {
    let t = raw.trim_start();
    let bytes = t.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let mut seen_digit = false;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => {
                seen_digit = true;
                end += 1;
            }
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    if !seen_digit {
        return None;
    }
    t[..end].parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictedGrade {
    pub letter: &'static str,
    pub grade_point: i64,
    pub total: f64,
}

impl PredictedGrade {
    pub fn display(&self) -> String {
        display_grade(self.letter, self.grade_point, self.total)
    }
}

/// Display form consumed by the dashboard and anything it exports:
/// `"A+ (GP: 9, Total: 87.50/100)"`. The labels and the `/100` suffix are
/// parsed back by the extractors below; keep them byte-stable.
pub fn display_grade(letter: &str, grade_point: i64, total: f64) -> String {
    format!("{} (GP: {}, Total: {:.2}/100)", letter, grade_point, total)
}

/// Leading letter-grade token: one or more of `A`-`Z` or `+`.
pub fn parse_grade_letter(s: &str) -> Option<&str> {
    let end = s
        .find(|c: char| !(c.is_ascii_uppercase() || c == '+'))
        .unwrap_or(s.len());
    if end == 0 {
        None
    } else {
        Some(&s[..end])
    }
}

/// Integer after the literal `GP:` label, whitespace tolerated.
pub fn parse_grade_point(s: &str) -> Option<i64> {
    let rest = field_after(s, "GP:")?;
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if end == 0 {
        None
    } else {
        rest[..end].parse().ok()
    }
}

/// Float after the literal `Total:` label, whitespace tolerated.
pub fn parse_total(s: &str) -> Option<f64> {
    let rest = field_after(s, "Total:")?;
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    if end == 0 {
        None
    } else {
        rest[..end].parse().ok()
    }
}

fn field_after<'a>(s: &'a str, label: &str) -> Option<&'a str> {
    let at = s.find(label)?;
    Some(s[at + label.len()..].trim_start())
}

/// Full prediction pipeline for one course: coerce and clamp the raw
/// end-term text, aggregate the total, map it to a grade. Total over any
/// input; persistence belongs to the caller.
pub fn predict_course(
    mid_term: f64,
    assignments: f64,
    attendance: f64,
    quiz_score: Option<f64>,
    raw_prediction: &str,
) -> (f64, PredictedGrade) {
    let end_term = coerce_end_term(raw_prediction);
    let total = course_total(mid_term, assignments, attendance, quiz_score, end_term);
    let (letter, grade_point) = grade_for(total);
    (
        end_term,
        PredictedGrade {
            letter,
            grade_point,
            total,
        },
    )
}

/// Credit-weighted mean of the contributing grade points. Courses without a
/// grade point do not contribute; `None` when nothing contributes (the UI
/// renders "N/A", never 0).
pub fn sgpa<I>(courses: I) -> Option<f64>
where
    I: IntoIterator<Item = (i64, Option<i64>)>,
{
    let mut credit_sum = 0_i64;
    let mut point_sum = 0_i64;
    for (credits, grade_point) in courses {
        if let Some(gp) = grade_point {
            credit_sum += credits;
            point_sum += credits * gp;
        }
    }
    if credit_sum == 0 {
        None
    } else {
        Some(point_sum as f64 / credit_sum as f64)
    }
}

/// Round half away from zero to `dp` decimals, for display parity with the
/// dashboard's number formatting.
pub fn round_dp(x: f64, dp: u32) -> f64 {
    let f = 10_f64.powi(dp as i32);
    (x * f).round() / f
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_bands_are_lower_bound_inclusive() {
        let cases = [
            (-10.0, "F", 0),
            (0.0, "F", 0),
            (39.9, "F", 0),
            (40.0, "P", 4),
            (45.9, "P", 4),
            (46.0, "C", 5),
            (50.9, "C", 5),
            (51.0, "B", 6),
            (60.9, "B", 6),
            (61.0, "B+", 7),
            (70.9, "B+", 7),
            (71.0, "A", 8),
            (80.9, "A", 8),
            (81.0, "A+", 9),
            (90.9, "A+", 9),
            (91.0, "O", 10),
            (150.0, "O", 10),
        ];
        for (total, letter, gp) in cases {
            assert_eq!(grade_for(total), (letter, gp), "total {}", total);
        }
    }

    #[test]
    fn course_total_spans_zero_to_hundred() {
        assert_eq!(course_total(20.0, 10.0, 100.0, Some(100.0), 50.0), 100.0);
        assert_eq!(course_total(0.0, 0.0, 0.0, None, 0.0), 0.0);
    }

    #[test]
    fn absent_quiz_counts_as_zero() {
        let with_zero = course_total(12.0, 7.0, 80.0, Some(0.0), 30.0);
        let absent = course_total(12.0, 7.0, 80.0, None, 30.0);
        assert_eq!(with_zero, absent);
    }

    #[test]
    fn end_term_coercion_clamps_and_defaults() {
        assert_eq!(coerce_end_term("-5"), 0.0);
        assert_eq!(coerce_end_term("55"), 50.0);
        assert_eq!(coerce_end_term("abc"), 0.0);
        assert_eq!(coerce_end_term("37.2"), 37.2);
        assert_eq!(coerce_end_term("  42 out of 50"), 42.0);
        assert_eq!(coerce_end_term(""), 0.0);
    }

    #[test]
    fn predict_course_feeds_clamped_end_term_into_total() {
        let (end_term, predicted) = predict_course(15.0, 8.0, 90.0, None, "55");
        assert_eq!(end_term, 50.0);
        assert_eq!(predicted.total, 15.0 + 8.0 + 9.0 + 50.0);
        assert_eq!(predicted.letter, "A+");
        assert_eq!(predicted.grade_point, 9);
    }

    #[test]
    fn sgpa_is_credit_weighted() {
        let result = sgpa([(4, Some(9)), (2, Some(6))]);
        assert_eq!(result, Some(8.0));
    }

    #[test]
    fn sgpa_skips_courses_without_grade_point() {
        let result = sgpa([(4, Some(9)), (3, None)]);
        assert_eq!(result, Some(9.0));
    }

    #[test]
    fn sgpa_is_undefined_when_nothing_contributes() {
        assert_eq!(sgpa([(4, None), (2, None)]), None);
        assert_eq!(sgpa([]), None);
    }

    #[test]
    fn display_string_round_trips_through_extractors() {
        let s = display_grade("A+", 9, 87.5);
        assert_eq!(s, "A+ (GP: 9, Total: 87.50/100)");
        assert_eq!(parse_grade_letter(&s), Some("A+"));
        assert_eq!(parse_grade_point(&s), Some(9));
        assert_eq!(parse_total(&s), Some(87.5));

        let s = display_grade("F", 0, 12.0);
        assert_eq!(parse_grade_letter(&s), Some("F"));
        assert_eq!(parse_grade_point(&s), Some(0));
    }

    #[test]
    fn extractors_reject_malformed_strings() {
        assert_eq!(parse_grade_letter("pending"), None);
        assert_eq!(parse_grade_point("A+ (Total: 87.50/100)"), None);
        assert_eq!(parse_grade_point("GP: x"), None);
        assert_eq!(parse_total("A+ (GP: 9)"), None);
    }
}
