use std::collections::HashMap;
use std::convert::TryFrom;

use anyhow::Context;
use axum::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{
    already_registered, EnrollmentStore, ExamStore, RosterStore, SessionStore, UNIQUE_VIOLATION,
};
use crate::models::{
    Course, CourseRef, Enrollment, EnrollmentView, ExamHead, ExamSitting, ExamState, NewExam,
    NewUser, User, UserSession,
};
use crate::Error;

const USER_COLUMNS: &str =
    "id, name, surname, legajo, email, role, study_plan, password_hash, created_at";
const EXAM_COLUMNS: &str = "id, student_id, course_id, state, grade, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pg: PgPool,
}

impl PgStore {
    pub fn new(pg: PgPool) -> Self {
        Self { pg }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pg = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("could not connect to the database")?;
        Ok(Self::new(pg))
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pg)
            .await
            .context("could not run database migrations")
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i32,
    name: String,
    surname: String,
    legajo: String,
    email: String,
    role: String,
    study_plan: Option<String>,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            name: row.name,
            surname: row.surname,
            legajo: row.legajo,
            email: row.email,
            role: row.role.parse()?,
            study_plan: row.study_plan,
            password_hash: row.password_hash,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CourseRow {
    id: i32,
    name: String,
    description: Option<String>,
    level: Option<i32>,
    head_id: Option<i32>,
}

impl CourseRow {
    fn with_prerequisites(self, final_prerequisites: Vec<CourseRef>) -> Course {
        Course {
            id: self.id,
            name: self.name,
            description: self.description,
            level: self.level,
            head_id: self.head_id,
            final_prerequisites,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PrerequisiteRow {
    course_id: i32,
    id: i32,
    name: String,
}

#[derive(Debug, sqlx::FromRow)]
struct EnrollmentViewRow {
    id: i32,
    course_id: i32,
    course_name: String,
    stc: String,
    enrolled_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ExamRow {
    id: i32,
    student_id: i32,
    course_id: i32,
    state: String,
    grade: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ExamRow> for ExamSitting {
    type Error = Error;

    fn try_from(row: ExamRow) -> Result<Self, Self::Error> {
        let state = row.state.parse::<ExamState>().map_err(|_| Error::InternalError {
            kind: "DataError",
            message: format!("Exam {} has unknown state `{}`", row.id, row.state),
        })?;
        Ok(ExamSitting {
            id: row.id,
            student_id: row.student_id,
            course_id: row.course_id,
            state,
            grade: row.grade,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HeadRow {
    exam_id: i32,
    course_id: i32,
    head_id: Option<i32>,
}

#[async_trait]
impl RosterStore for PgStore {
    async fn find_user(&self, id: i32) -> Result<Option<User>, Error> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1 LIMIT 1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pg)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_legajo(&self, legajo: &str) -> Result<Option<User>, Error> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE legajo = $1 LIMIT 1",
            USER_COLUMNS
        ))
        .bind(legajo)
        .fetch_optional(&self.pg)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = $1 LIMIT 1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pg)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, Error> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (name, surname, legajo, email, role, study_plan, password_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&user.name)
        .bind(&user.surname)
        .bind(&user.legajo)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(&user.study_plan)
        .bind(&user.password_hash)
        .fetch_one(&self.pg)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                Error::conflict("User with provided email/legajo already exists!")
            } else {
                Error::from(err)
            }
        })?;
        User::try_from(row)
    }

    async fn find_course(&self, id: i32) -> Result<Option<Course>, Error> {
        let course = sqlx::query_as::<_, CourseRow>(
            "SELECT id, name, description, level, head_id FROM courses WHERE id = $1 LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pg)
        .await?;

        let course = match course {
            Some(course) => course,
            None => return Ok(None),
        };

        let prerequisites = sqlx::query_as::<_, CourseRef>(
            "SELECT c.id, c.name FROM final_prerequisites p \
             JOIN courses c ON c.id = p.prerequisite_id \
             WHERE p.course_id = $1 ORDER BY c.id",
        )
        .bind(id)
        .fetch_all(&self.pg)
        .await?;

        Ok(Some(course.with_prerequisites(prerequisites)))
    }

    async fn list_courses(&self) -> Result<Vec<Course>, Error> {
        let courses = sqlx::query_as::<_, CourseRow>(
            "SELECT id, name, description, level, head_id FROM courses ORDER BY id",
        )
        .fetch_all(&self.pg)
        .await?;

        let rows = sqlx::query_as::<_, PrerequisiteRow>(
            "SELECT p.course_id, c.id, c.name FROM final_prerequisites p \
             JOIN courses c ON c.id = p.prerequisite_id ORDER BY p.course_id, c.id",
        )
        .fetch_all(&self.pg)
        .await?;

        let mut by_course: HashMap<i32, Vec<CourseRef>> = HashMap::new();
        for row in rows {
            by_course.entry(row.course_id).or_default().push(CourseRef {
                id: row.id,
                name: row.name,
            });
        }

        Ok(courses
            .into_iter()
            .map(|course| {
                let prerequisites = by_course.remove(&course.id).unwrap_or_default();
                course.with_prerequisites(prerequisites)
            })
            .collect())
    }
}

#[async_trait]
impl EnrollmentStore for PgStore {
    async fn enrollments_in(
        &self,
        student_id: i32,
        course_ids: &[i32],
    ) -> Result<Vec<Enrollment>, Error> {
        let enrollments = sqlx::query_as::<_, Enrollment>(
            "SELECT id, student_id, course_id, stc, enrolled_at FROM enrollments \
             WHERE student_id = $1 AND course_id = ANY($2)",
        )
        .bind(student_id)
        .bind(course_ids.to_vec())
        .fetch_all(&self.pg)
        .await?;
        Ok(enrollments)
    }

    async fn enrollments_of(&self, student_id: i32) -> Result<Vec<EnrollmentView>, Error> {
        let rows = sqlx::query_as::<_, EnrollmentViewRow>(
            "SELECT e.id, e.course_id, c.name AS course_name, e.stc, e.enrolled_at \
             FROM enrollments e JOIN courses c ON c.id = e.course_id \
             WHERE e.student_id = $1 ORDER BY e.enrolled_at DESC, e.id DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pg)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| EnrollmentView {
                id: row.id,
                course: CourseRef {
                    id: row.course_id,
                    name: row.course_name,
                },
                stc: row.stc,
                enrolled_at: row.enrolled_at,
            })
            .collect())
    }
}

#[async_trait]
impl ExamStore for PgStore {
    async fn find_exam(&self, id: i32) -> Result<Option<ExamSitting>, Error> {
        let row = sqlx::query_as::<_, ExamRow>(&format!(
            "SELECT {} FROM final_exams WHERE id = $1 LIMIT 1",
            EXAM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pg)
        .await?;
        row.map(ExamSitting::try_from).transpose()
    }

    async fn find_exam_for(
        &self,
        student_id: i32,
        course_id: i32,
    ) -> Result<Option<ExamSitting>, Error> {
        let row = sqlx::query_as::<_, ExamRow>(&format!(
            "SELECT {} FROM final_exams WHERE student_id = $1 AND course_id = $2 LIMIT 1",
            EXAM_COLUMNS
        ))
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&self.pg)
        .await?;
        row.map(ExamSitting::try_from).transpose()
    }

    async fn exam_head(&self, exam_id: i32) -> Result<Option<ExamHead>, Error> {
        let row = sqlx::query_as::<_, HeadRow>(
            "SELECT e.id AS exam_id, e.course_id, c.head_id \
             FROM final_exams e JOIN courses c ON c.id = e.course_id \
             WHERE e.id = $1 LIMIT 1",
        )
        .bind(exam_id)
        .fetch_optional(&self.pg)
        .await?;
        Ok(row.map(|row| ExamHead {
            exam_id: row.exam_id,
            course_id: row.course_id,
            head_id: row.head_id,
        }))
    }

    async fn insert_exam(&self, exam: NewExam) -> Result<ExamSitting, Error> {
        let row = sqlx::query_as::<_, ExamRow>(&format!(
            "INSERT INTO final_exams (student_id, course_id, state, grade) \
             VALUES ($1, $2, $3, NULL) RETURNING {}",
            EXAM_COLUMNS
        ))
        .bind(exam.student_id)
        .bind(exam.course_id)
        .bind(ExamState::Registered.as_str())
        .fetch_one(&self.pg)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                already_registered()
            } else {
                Error::from(err)
            }
        })?;
        ExamSitting::try_from(row)
    }

    async fn update_grade(
        &self,
        id: i32,
        grade: f64,
        state: ExamState,
    ) -> Result<Option<ExamSitting>, Error> {
        let row = sqlx::query_as::<_, ExamRow>(&format!(
            "UPDATE final_exams SET grade = $1, state = $2, updated_at = now() \
             WHERE id = $3 RETURNING {}",
            EXAM_COLUMNS
        ))
        .bind(grade)
        .bind(state.as_str())
        .bind(id)
        .fetch_optional(&self.pg)
        .await?;
        row.map(ExamSitting::try_from).transpose()
    }

    async fn exams_of(&self, student_id: i32) -> Result<Vec<ExamSitting>, Error> {
        let rows = sqlx::query_as::<_, ExamRow>(&format!(
            "SELECT {} FROM final_exams WHERE student_id = $1 ORDER BY id DESC",
            EXAM_COLUMNS
        ))
        .bind(student_id)
        .fetch_all(&self.pg)
        .await?;
        rows.into_iter().map(ExamSitting::try_from).collect()
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: UserSession) -> Result<(), Error> {
        let res = sqlx::query(
            "INSERT INTO user_sessions (ssid, belongs_to, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(&session.ssid)
        .bind(session.belongs_to)
        .bind(session.expires_at)
        .execute(&self.pg)
        .await?;

        if res.rows_affected() < 1 {
            return Err(Error::InternalError {
                kind: "DatabaseError",
                message: "Could not update session ids!".to_string(),
            });
        }
        Ok(())
    }

    async fn find_session(&self, ssid: &str) -> Result<Option<UserSession>, Error> {
        let session = sqlx::query_as::<_, UserSession>(
            "SELECT ssid, belongs_to, expires_at FROM user_sessions WHERE ssid = $1 LIMIT 1",
        )
        .bind(ssid)
        .fetch_optional(&self.pg)
        .await?;
        Ok(session)
    }

    async fn delete_session(&self, ssid: &str) -> Result<bool, Error> {
        let affected = sqlx::query("DELETE FROM user_sessions WHERE ssid = $1")
            .bind(ssid)
            .execute(&self.pg)
            .await?;
        Ok(affected.rows_affected() >= 1)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let affected = sqlx::query("DELETE FROM user_sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pg)
            .await?;
        Ok(affected.rows_affected())
    }
}
