use std::collections::HashSet;
use std::sync::Arc;

use crate::models::{ExamHead, ExamSitting, ExamState, ExamSummary, PrerequisiteReport};
use crate::store::{already_registered, EnrollmentStore, ExamStore, RosterStore};
use crate::validate::{self, GradeSubmission};
use crate::Error;

/// Final exam registration, grading and the head-of-department checks that
/// guard grading.
#[derive(Clone)]
pub struct ExamService {
    roster: Arc<dyn RosterStore>,
    enrollments: Arc<dyn EnrollmentStore>,
    exams: Arc<dyn ExamStore>,
    approved_stc: Arc<str>,
}

impl ExamService {
    pub fn new(
        roster: Arc<dyn RosterStore>,
        enrollments: Arc<dyn EnrollmentStore>,
        exams: Arc<dyn ExamStore>,
        approved_stc: &str,
    ) -> Self {
        Self {
            roster,
            enrollments,
            exams,
            approved_stc: Arc::from(approved_stc),
        }
    }

    /// Which of the course's final-exam prerequisites the student has not yet
    /// approved. Missing courses come back in the course's own order.
    pub async fn verify_prerequisites(
        &self,
        student_id: i64,
        course_id: i64,
    ) -> Result<PrerequisiteReport, Error> {
        let (student_id, course_id) = match (
            validate::entity_id(student_id),
            validate::entity_id(course_id),
        ) {
            (Some(s), Some(c)) => (s, c),
            _ => return Err(Error::invalid("Invalid parameters")),
        };

        let student = self.roster.find_user(student_id).await?;
        let course = self.roster.find_course(course_id).await?;
        let course = match (student, course) {
            (Some(_), Some(course)) => course,
            _ => return Err(Error::invalid("Student or course not found")),
        };

        if course.final_prerequisites.is_empty() {
            return Ok(PrerequisiteReport {
                satisfied: true,
                missing: Vec::new(),
            });
        }

        let ids: Vec<i32> = course.final_prerequisites.iter().map(|c| c.id).collect();
        let approved: HashSet<i32> = self
            .enrollments
            .enrollments_in(student_id, &ids)
            .await?
            .into_iter()
            .filter(|e| e.stc == *self.approved_stc)
            .map(|e| e.course_id)
            .collect();

        let missing: Vec<_> = course
            .final_prerequisites
            .into_iter()
            .filter(|c| !approved.contains(&c.id))
            .collect();

        log::debug!(
            "student {} course {}: {} prerequisite(s) missing",
            student_id,
            course_id,
            missing.len()
        );

        Ok(PrerequisiteReport {
            satisfied: missing.is_empty(),
            missing,
        })
    }

    pub async fn register(&self, student_id: i64, course_id: i64) -> Result<ExamSitting, Error> {
        let (student, course) = match (
            validate::entity_id(student_id),
            validate::entity_id(course_id),
        ) {
            (Some(s), Some(c)) => (s, c),
            _ => return Err(Error::invalid("Invalid parameters")),
        };

        let exists = (
            self.roster.find_user(student).await?.is_some(),
            self.roster.find_course(course).await?.is_some(),
        );
        if exists != (true, true) {
            return Err(Error::invalid("Student or course not found"));
        }

        if self.exams.find_exam_for(student, course).await?.is_some() {
            return Err(already_registered());
        }

        let report = self.verify_prerequisites(student_id, course_id).await?;
        if !report.satisfied {
            let names: Vec<&str> = report.missing.iter().map(|c| c.name.as_str()).collect();
            return Err(Error::conflict(format!(
                "Cannot sit the final exam. Missing prerequisites: {}",
                names.join(", ")
            )));
        }

        let exam = self
            .exams
            .insert_exam(crate::models::NewExam {
                student_id: student,
                course_id: course,
            })
            .await?;
        log::info!(
            "student {} registered for final exam {} of course {}",
            student,
            exam.id,
            course
        );
        Ok(exam)
    }

    async fn head_of(&self, exam_id: i32) -> Result<Option<ExamHead>, Error> {
        self.exams.exam_head(exam_id).await
    }

    /// Cheap yes/no for request guards. Bad ids or a missing exam, course or
    /// head all answer `false`.
    pub async fn is_head(&self, staff_id: i64, exam_id: i64) -> Result<bool, Error> {
        let (staff_id, exam_id) = match (validate::entity_id(staff_id), validate::entity_id(exam_id))
        {
            (Some(s), Some(e)) => (s, e),
            _ => return Ok(false),
        };
        Ok(self
            .head_of(exam_id)
            .await?
            .and_then(|head| head.head_id)
            .map_or(false, |head| head == staff_id))
    }

    /// Tells a missing exam (`NotFound`) apart from a caller that may not
    /// grade it (`Forbidden`).
    pub async fn assert_head(&self, staff_id: i64, exam_id: i64) -> Result<(), Error> {
        let (staff_id, exam_id) = match (validate::entity_id(staff_id), validate::entity_id(exam_id))
        {
            (Some(s), Some(e)) => (s, e),
            _ => return Err(Error::invalid("Invalid parameters")),
        };

        let head = self
            .head_of(exam_id)
            .await?
            .ok_or_else(|| Error::not_found("Exam not found"))?;

        if head.head_id != Some(staff_id) {
            log::warn!(
                "staff {} denied grading exam {} of course {}",
                staff_id,
                head.exam_id,
                head.course_id
            );
            return Err(Error::forbidden(
                "You do not have permission for this operation",
            ));
        }
        Ok(())
    }

    pub async fn submit_grade(
        &self,
        staff_id: i64,
        exam_id: i64,
        grade: f64,
        state: ExamState,
    ) -> Result<ExamSitting, Error> {
        let submission = GradeSubmission::parse(exam_id, grade, state)?;

        self.assert_head(staff_id, exam_id).await?;

        if self.exams.find_exam(submission.exam_id).await?.is_none() {
            return Err(Error::not_found("Exam not found"));
        }

        let exam = self
            .exams
            .update_grade(submission.exam_id, submission.grade, submission.state)
            .await?
            .ok_or_else(|| Error::not_found("Exam not found"))?;
        log::info!(
            "exam {} graded {} ({}) by staff {}",
            exam.id,
            submission.grade,
            submission.state,
            staff_id
        );
        Ok(exam)
    }

    pub async fn exams_of(&self, student_id: i64) -> Result<Vec<ExamSummary>, Error> {
        let student_id = validate::require_id(student_id, "id")?;
        let exams = self.exams.exams_of(student_id).await?;
        Ok(exams.iter().map(ExamSitting::summary).collect())
    }
}
