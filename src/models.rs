use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Professor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Professor => "professor",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "professor" => Ok(Role::Professor),
            "admin" => Ok(Role::Admin),
            other => Err(Error::InternalError {
                kind: "DataError",
                message: format!("Unknown role `{}`", other),
            }),
        }
    }
}

/// Lifecycle of a final exam sitting. `Registered` is only ever the initial
/// state; the other three are set by grade entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExamState {
    Registered,
    Passed,
    Failed,
    Absent,
}

impl ExamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExamState::Registered => "registered",
            ExamState::Passed => "passed",
            ExamState::Failed => "failed",
            ExamState::Absent => "absent",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExamState::Registered)
    }
}

impl fmt::Display for ExamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExamState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(ExamState::Registered),
            "passed" => Ok(ExamState::Passed),
            "failed" => Ok(ExamState::Failed),
            "absent" => Ok(ExamState::Absent),
            _ => Err(Error::invalid("Invalid state")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub surname: String,
    pub legajo: String,
    pub email: String,
    pub role: Role,
    pub study_plan: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            name: self.name.clone(),
            surname: self.surname.clone(),
            legajo: self.legajo.clone(),
            email: self.email.clone(),
            role: self.role,
            study_plan: self.study_plan.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub surname: String,
    pub legajo: String,
    pub email: String,
    pub role: Role,
    pub study_plan: Option<String>,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicUser {
    pub id: i32,
    pub name: String,
    pub surname: String,
    pub legajo: String,
    pub email: String,
    pub role: Role,
    pub study_plan: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct CourseRef {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub level: Option<i32>,
    pub head_id: Option<i32>,
    pub final_prerequisites: Vec<CourseRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Enrollment {
    pub id: i32,
    pub student_id: i32,
    pub course_id: i32,
    pub stc: String,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentView {
    pub id: i32,
    pub course: CourseRef,
    pub stc: String,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExamSitting {
    pub id: i32,
    pub student_id: i32,
    pub course_id: i32,
    pub state: ExamState,
    pub grade: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExamSitting {
    pub fn summary(&self) -> ExamSummary {
        ExamSummary {
            id: self.id,
            state: self.state,
            grade: self.grade,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NewExam {
    pub student_id: i32,
    pub course_id: i32,
}

/// What a student gets to see of each sitting; nothing joined in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExamSummary {
    pub id: i32,
    pub state: ExamState,
    pub grade: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Narrow view used by authorization: an exam and who may grade it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExamHead {
    pub exam_id: i32,
    pub course_id: i32,
    pub head_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrerequisiteReport {
    pub satisfied: bool,
    pub missing: Vec<CourseRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSession {
    pub ssid: String,
    pub belongs_to: i32,
    pub expires_at: DateTime<Utc>,
}
