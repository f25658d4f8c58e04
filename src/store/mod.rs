//! Storage seams. Services only ever see these traits; `PgStore` backs the
//! server and `MemoryStore` backs tests and embedders.

pub mod memory;
pub mod pg;

use axum::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Course, Enrollment, EnrollmentView, ExamHead, ExamSitting, ExamState, NewExam, NewUser, User,
    UserSession,
};
use crate::Error;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// SQLSTATE for `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

#[async_trait]
pub trait RosterStore: Send + Sync {
    async fn find_user(&self, id: i32) -> Result<Option<User>, Error>;

    async fn find_user_by_legajo(&self, legajo: &str) -> Result<Option<User>, Error>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Error>;

    /// Fails with `Conflict` when the legajo or email is taken.
    async fn insert_user(&self, user: NewUser) -> Result<User, Error>;

    /// Loads the course together with its final-exam prerequisites.
    async fn find_course(&self, id: i32) -> Result<Option<Course>, Error>;

    async fn list_courses(&self) -> Result<Vec<Course>, Error>;
}

#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// All of the student's enrollments in any of `course_ids`, in a single
    /// lookup.
    async fn enrollments_in(
        &self,
        student_id: i32,
        course_ids: &[i32],
    ) -> Result<Vec<Enrollment>, Error>;

    /// Newest first.
    async fn enrollments_of(&self, student_id: i32) -> Result<Vec<EnrollmentView>, Error>;
}

#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn find_exam(&self, id: i32) -> Result<Option<ExamSitting>, Error>;

    async fn find_exam_for(
        &self,
        student_id: i32,
        course_id: i32,
    ) -> Result<Option<ExamSitting>, Error>;

    async fn exam_head(&self, exam_id: i32) -> Result<Option<ExamHead>, Error>;

    /// Creates the sitting in `registered` state with no grade. A second
    /// sitting for the same (student, course) fails with `Conflict`.
    async fn insert_exam(&self, exam: NewExam) -> Result<ExamSitting, Error>;

    async fn update_grade(
        &self,
        id: i32,
        grade: f64,
        state: ExamState,
    ) -> Result<Option<ExamSitting>, Error>;

    /// Ordered by id descending.
    async fn exams_of(&self, student_id: i32) -> Result<Vec<ExamSitting>, Error>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: UserSession) -> Result<(), Error>;

    async fn find_session(&self, ssid: &str) -> Result<Option<UserSession>, Error>;

    /// Returns whether a session was actually removed.
    async fn delete_session(&self, ssid: &str) -> Result<bool, Error>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}

pub fn already_registered() -> Error {
    Error::conflict("Already registered for this course's final exam")
}
