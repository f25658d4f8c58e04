//! Input checks run on parsed request data before it reaches any service.
//! Each function either hands back the validated value or an
//! `Error::InvalidArgument`.

use crate::models::ExamState;
use crate::Error;

pub const MIN_GRADE: f64 = 0.0;
pub const MAX_GRADE: f64 = 10.0;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Ids are positive and must fit the `SERIAL` columns they come from.
pub fn entity_id(raw: i64) -> Option<i32> {
    if raw <= 0 {
        return None;
    }
    i32::try_from(raw).ok()
}

pub fn require_id(raw: i64, what: &str) -> Result<i32, Error> {
    entity_id(raw).ok_or_else(|| Error::invalid(format!("Invalid {}", what)))
}

/// Same as [`require_id`] for values taken straight from a path segment.
pub fn parse_id(raw: &str, what: &str) -> Result<i32, Error> {
    let parsed = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| Error::invalid(format!("Invalid {}", what)))?;
    require_id(parsed, what)
}

pub fn grade(value: f64) -> Option<f64> {
    if value.is_finite() && (MIN_GRADE..=MAX_GRADE).contains(&value) {
        Some(value)
    } else {
        None
    }
}

/// Grade entry may only move a sitting out of `registered`.
pub fn terminal_state(state: ExamState) -> Result<ExamState, Error> {
    if state.is_terminal() {
        Ok(state)
    } else {
        Err(Error::invalid("Invalid state"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeSubmission {
    pub exam_id: i32,
    pub grade: f64,
    pub state: ExamState,
}

impl GradeSubmission {
    pub fn parse(exam_id: i64, grade_value: f64, state: ExamState) -> Result<Self, Error> {
        let (exam_id, grade_value) = match (entity_id(exam_id), grade(grade_value)) {
            (Some(id), Some(g)) => (id, g),
            _ => return Err(Error::invalid("Invalid data: exam id/grade")),
        };
        let state = terminal_state(state)?;
        Ok(Self {
            exam_id,
            grade: grade_value,
            state,
        })
    }

    /// [`parse`](Self::parse) for a state still in its wire form. The id and
    /// grade are checked before the state text is read.
    pub fn parse_raw(exam_id: i64, grade_value: f64, state: &str) -> Result<Self, Error> {
        if entity_id(exam_id).is_none() || grade(grade_value).is_none() {
            return Err(Error::invalid("Invalid data: exam id/grade"));
        }
        Self::parse(exam_id, grade_value, state.parse()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub surname: String,
    pub legajo: String,
    pub email: String,
    pub password: String,
    pub study_plan: Option<String>,
}

impl Registration {
    pub fn parse(
        name: &str,
        surname: &str,
        legajo: &str,
        email: &str,
        password: &str,
        study_plan: Option<&str>,
    ) -> Result<Self, Error> {
        let name = required_text(name, "name")?;
        let surname = required_text(surname, "surname")?;
        let legajo = required_text(legajo, "legajo")?;
        let email = required_text(email, "email")?;
        if !email.contains('@') {
            return Err(Error::invalid("`email` is not a valid address"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::invalid(format!(
                "`password` must be at least {} characters long",
                MIN_PASSWORD_LEN
            )));
        }
        let study_plan = study_plan
            .map(str::trim)
            .filter(|plan| !plan.is_empty())
            .map(str::to_string);
        Ok(Self {
            name,
            surname,
            legajo,
            email,
            password: password.to_string(),
            study_plan,
        })
    }
}

fn required_text(value: &str, field: &str) -> Result<String, Error> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::invalid(format!("`{}` parameter was empty", field)))
    } else {
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_must_be_positive() {
        assert_eq!(entity_id(1), Some(1));
        assert_eq!(entity_id(0), None);
        assert_eq!(entity_id(-3), None);
        assert_eq!(entity_id(i64::from(i32::MAX) + 1), None);
    }

    #[test]
    fn path_ids_reject_garbage() {
        assert_eq!(parse_id("12", "exam id"), Ok(12));
        assert!(matches!(
            parse_id("12abc", "exam id"),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            parse_id("1.5", "exam id"),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn grades_are_bounded() {
        assert_eq!(grade(0.0), Some(0.0));
        assert_eq!(grade(10.0), Some(10.0));
        assert_eq!(grade(7.5), Some(7.5));
        assert_eq!(grade(-1.0), None);
        assert_eq!(grade(10.01), None);
        assert_eq!(grade(f64::NAN), None);
        assert_eq!(grade(f64::INFINITY), None);
    }

    #[test]
    fn registered_is_not_a_grading_target() {
        let err = GradeSubmission::parse(1, 5.0, ExamState::Registered).unwrap_err();
        assert_eq!(err, Error::invalid("Invalid state"));
        assert!(GradeSubmission::parse(1, 5.0, ExamState::Absent).is_ok());
    }

    #[test]
    fn grade_checked_before_state() {
        let err = GradeSubmission::parse(1, 11.0, ExamState::Registered).unwrap_err();
        assert_eq!(err, Error::invalid("Invalid data: exam id/grade"));
    }

    #[test]
    fn raw_grade_checked_before_state_text() {
        let err = GradeSubmission::parse_raw(1, 11.0, "bogus").unwrap_err();
        assert_eq!(err, Error::invalid("Invalid data: exam id/grade"));
        let err = GradeSubmission::parse_raw(0, 5.0, "bogus").unwrap_err();
        assert_eq!(err, Error::invalid("Invalid data: exam id/grade"));

        let err = GradeSubmission::parse_raw(1, 5.0, "bogus").unwrap_err();
        assert_eq!(err, Error::invalid("Invalid state"));
        let err = GradeSubmission::parse_raw(1, 5.0, "registered").unwrap_err();
        assert_eq!(err, Error::invalid("Invalid state"));

        let submission = GradeSubmission::parse_raw(1, 5.0, "failed").unwrap();
        assert_eq!(submission.state, ExamState::Failed);
    }

    #[test]
    fn registration_normalizes_input() {
        let reg = Registration::parse(
            " Ana ",
            "Paz",
            "10234",
            "ana@uni.edu",
            "secret1",
            Some("  "),
        )
        .unwrap();
        assert_eq!(reg.name, "Ana");
        assert_eq!(reg.study_plan, None);
    }

    #[test]
    fn registration_rejects_bad_fields() {
        assert!(Registration::parse("", "Paz", "1", "a@b", "secret1", None).is_err());
        assert!(Registration::parse("Ana", "Paz", "1", "nope", "secret1", None).is_err());
        assert!(Registration::parse("Ana", "Paz", "1", "a@b", "short", None).is_err());
    }
}
