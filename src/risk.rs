use std::collections::HashMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One roster row as read from student_courses. `predicted_letter` is the
/// typed grade token; it is absent when no prediction has been stored yet.
#[derive(Debug, Clone)]
pub struct RosterRecord {
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    pub course_name: String,
    pub mid_term_marks: f64,
    pub attendance: f64,
    pub assignments: f64,
    pub quiz_score: Option<f64>,
    pub predicted_letter: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRisk {
    pub course_name: String,
    pub risk_factors: Vec<String>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRiskGroup {
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    pub courses: Vec<CourseRisk>,
    pub overall_risk_level: RiskLevel,
}

enum GradeSignal {
    None,
    Low,
    High,
}

/// Per-course risk derivation. `None` means the course is excluded from the
/// at-risk report: either its predicted grade is clean, or nothing at all
/// flagged it.
pub fn assess_course(record: &RosterRecord) -> Option<CourseRisk> {
    let mut factors = Vec::new();
    let mut signal = GradeSignal::None;

    if let Some(grade) = record.predicted_letter.as_deref() {
        match grade {
            // A clean predicted grade exempts the course even when the
            // threshold checks below would fire.
            "O" | "A+" | "A" | "B" => return None,
            "P" | "F" => {
                factors.push(format!("High risk grade ({grade})"));
                signal = GradeSignal::High;
            }
            "C" | "B+" => {
                factors.push(format!("Low risk grade ({grade})"));
                signal = GradeSignal::Low;
            }
            _ => {}
        }
    }

    let mut threshold_count = 0_usize;
    if record.attendance < 75.0 {
        factors.push(format!("Low attendance ({}%)", record.attendance));
        threshold_count += 1;
    }
    if record.mid_term_marks < 8.0 {
        factors.push(format!("Poor mid-term marks ({}/20)", record.mid_term_marks));
        threshold_count += 1;
    }
    if record.assignments < 5.0 {
        factors.push(format!("Low assignment score ({}/10)", record.assignments));
        threshold_count += 1;
    }
    if let Some(quiz) = record.quiz_score {
        if quiz < 50.0 {
            factors.push(format!("Low quiz score ({}%)", quiz));
            threshold_count += 1;
        }
    }

    if factors.is_empty() {
        return None;
    }

    // The grade signal wins over the factor count, even when the count
    // alone would rank the course higher.
    let risk_level = match signal {
        GradeSignal::High => RiskLevel::High,
        GradeSignal::Low => RiskLevel::Low,
        GradeSignal::None => match threshold_count {
            n if n >= 3 => RiskLevel::High,
            2 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        },
    };

    Some(CourseRisk {
        course_name: record.course_name.clone(),
        risk_factors: factors,
        risk_level,
    })
}

/// Group surviving course assessments by student, carry the max severity as
/// the student's overall level, and order the report highest severity first.
pub fn classify_roster(roster: &[RosterRecord]) -> Vec<StudentRiskGroup> {
    let mut groups: Vec<StudentRiskGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in roster {
        let Some(assessment) = assess_course(record) else {
            continue;
        };
        let at = match index.get(&record.student_id) {
            Some(&i) => i,
            None => {
                index.insert(record.student_id.clone(), groups.len());
                groups.push(StudentRiskGroup {
                    student_id: record.student_id.clone(),
                    student_name: record.student_name.clone(),
                    student_email: record.student_email.clone(),
                    courses: Vec::new(),
                    overall_risk_level: RiskLevel::Low,
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[at];
        group.overall_risk_level = group.overall_risk_level.max(assessment.risk_level);
        group.courses.push(assessment);
    }

    // Stable sort keeps roster order within the same severity.
    groups.sort_by(|a, b| b.overall_risk_level.cmp(&a.overall_risk_level));
    groups
}
