use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use axum::async_trait;
use chrono::{DateTime, Utc};

use super::{already_registered, EnrollmentStore, ExamStore, RosterStore, SessionStore};
use crate::models::{
    Course, CourseRef, Enrollment, EnrollmentView, ExamHead, ExamSitting, ExamState, NewExam,
    NewUser, User, UserSession,
};
use crate::Error;

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    courses: Vec<Course>,
    enrollments: Vec<Enrollment>,
    exams: Vec<ExamSitting>,
    sessions: HashMap<String, UserSession>,
    next_user: i32,
    next_enrollment: i32,
    next_exam: i32,
}

/// Table-per-`Vec` store behind one mutex. The lock is never held across an
/// await, so every method is a short critical section.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, Error> {
        self.tables.lock().map_err(|_| Error::InternalError {
            kind: "StoreError",
            message: "memory store lock poisoned".to_string(),
        })
    }

    /// Inserts a user under a fixed id, for seeding.
    pub fn put_user(&self, user: User) -> Result<(), Error> {
        let mut tables = self.lock()?;
        tables.next_user = tables.next_user.max(user.id);
        tables.users.retain(|u| u.id != user.id);
        tables.users.push(user);
        Ok(())
    }

    /// Inserts a course under a fixed id. Prerequisite names are resolved
    /// when the course is read, so courses may be seeded in any order.
    pub fn put_course(&self, course: Course) -> Result<(), Error> {
        let mut tables = self.lock()?;
        tables.courses.retain(|c| c.id != course.id);
        tables.courses.push(course);
        Ok(())
    }

    pub fn put_enrollment(&self, student_id: i32, course_id: i32, stc: &str) -> Result<i32, Error> {
        let mut tables = self.lock()?;
        tables.next_enrollment += 1;
        let id = tables.next_enrollment;
        tables.enrollments.push(Enrollment {
            id,
            student_id,
            course_id,
            stc: stc.to_string(),
            enrolled_at: Utc::now(),
        });
        Ok(id)
    }

    pub fn exam_count(&self, student_id: i32, course_id: i32) -> Result<usize, Error> {
        let tables = self.lock()?;
        Ok(tables
            .exams
            .iter()
            .filter(|e| e.student_id == student_id && e.course_id == course_id)
            .count())
    }
}

impl Tables {
    fn course_name(&self, id: i32) -> String {
        self.courses
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    fn resolved(&self, course: &Course) -> Course {
        let mut course = course.clone();
        for prerequisite in course.final_prerequisites.iter_mut() {
            if prerequisite.name.is_empty() {
                prerequisite.name = self.course_name(prerequisite.id);
            }
        }
        course
    }
}

#[async_trait]
impl RosterStore for MemoryStore {
    async fn find_user(&self, id: i32) -> Result<Option<User>, Error> {
        let tables = self.lock()?;
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_legajo(&self, legajo: &str) -> Result<Option<User>, Error> {
        let tables = self.lock()?;
        Ok(tables.users.iter().find(|u| u.legajo == legajo).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        let tables = self.lock()?;
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, Error> {
        let mut tables = self.lock()?;
        if tables
            .users
            .iter()
            .any(|u| u.legajo == user.legajo || u.email == user.email)
        {
            return Err(Error::conflict(
                "User with provided email/legajo already exists!",
            ));
        }
        tables.next_user += 1;
        let created = User {
            id: tables.next_user,
            name: user.name,
            surname: user.surname,
            legajo: user.legajo,
            email: user.email,
            role: user.role,
            study_plan: user.study_plan,
            password_hash: user.password_hash,
            created_at: Utc::now(),
        };
        tables.users.push(created.clone());
        Ok(created)
    }

    async fn find_course(&self, id: i32) -> Result<Option<Course>, Error> {
        let tables = self.lock()?;
        Ok(tables
            .courses
            .iter()
            .find(|c| c.id == id)
            .map(|c| tables.resolved(c)))
    }

    async fn list_courses(&self) -> Result<Vec<Course>, Error> {
        let tables = self.lock()?;
        let mut courses: Vec<Course> = tables.courses.iter().map(|c| tables.resolved(c)).collect();
        courses.sort_by_key(|c| c.id);
        Ok(courses)
    }
}

#[async_trait]
impl EnrollmentStore for MemoryStore {
    async fn enrollments_in(
        &self,
        student_id: i32,
        course_ids: &[i32],
    ) -> Result<Vec<Enrollment>, Error> {
        let tables = self.lock()?;
        Ok(tables
            .enrollments
            .iter()
            .filter(|e| e.student_id == student_id && course_ids.contains(&e.course_id))
            .cloned()
            .collect())
    }

    async fn enrollments_of(&self, student_id: i32) -> Result<Vec<EnrollmentView>, Error> {
        let tables = self.lock()?;
        let mut views: Vec<EnrollmentView> = tables
            .enrollments
            .iter()
            .filter(|e| e.student_id == student_id)
            .map(|e| EnrollmentView {
                id: e.id,
                course: CourseRef {
                    id: e.course_id,
                    name: tables.course_name(e.course_id),
                },
                stc: e.stc.clone(),
                enrolled_at: e.enrolled_at,
            })
            .collect();
        views.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at).then(b.id.cmp(&a.id)));
        Ok(views)
    }
}

#[async_trait]
impl ExamStore for MemoryStore {
    async fn find_exam(&self, id: i32) -> Result<Option<ExamSitting>, Error> {
        let tables = self.lock()?;
        Ok(tables.exams.iter().find(|e| e.id == id).cloned())
    }

    async fn find_exam_for(
        &self,
        student_id: i32,
        course_id: i32,
    ) -> Result<Option<ExamSitting>, Error> {
        let tables = self.lock()?;
        Ok(tables
            .exams
            .iter()
            .find(|e| e.student_id == student_id && e.course_id == course_id)
            .cloned())
    }

    async fn exam_head(&self, exam_id: i32) -> Result<Option<ExamHead>, Error> {
        let tables = self.lock()?;
        let exam = match tables.exams.iter().find(|e| e.id == exam_id) {
            Some(exam) => exam,
            None => return Ok(None),
        };
        let head_id = tables
            .courses
            .iter()
            .find(|c| c.id == exam.course_id)
            .and_then(|c| c.head_id);
        Ok(Some(ExamHead {
            exam_id: exam.id,
            course_id: exam.course_id,
            head_id,
        }))
    }

    async fn insert_exam(&self, exam: NewExam) -> Result<ExamSitting, Error> {
        let mut tables = self.lock()?;
        // unique (student_id, course_id)
        if tables
            .exams
            .iter()
            .any(|e| e.student_id == exam.student_id && e.course_id == exam.course_id)
        {
            return Err(already_registered());
        }
        tables.next_exam += 1;
        let now = Utc::now();
        let created = ExamSitting {
            id: tables.next_exam,
            student_id: exam.student_id,
            course_id: exam.course_id,
            state: ExamState::Registered,
            grade: None,
            created_at: now,
            updated_at: now,
        };
        tables.exams.push(created.clone());
        Ok(created)
    }

    async fn update_grade(
        &self,
        id: i32,
        grade: f64,
        state: ExamState,
    ) -> Result<Option<ExamSitting>, Error> {
        let mut tables = self.lock()?;
        Ok(tables.exams.iter_mut().find(|e| e.id == id).map(|exam| {
            exam.grade = Some(grade);
            exam.state = state;
            exam.updated_at = Utc::now();
            exam.clone()
        }))
    }

    async fn exams_of(&self, student_id: i32) -> Result<Vec<ExamSitting>, Error> {
        let tables = self.lock()?;
        let mut exams: Vec<ExamSitting> = tables
            .exams
            .iter()
            .filter(|e| e.student_id == student_id)
            .cloned()
            .collect();
        exams.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(exams)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: UserSession) -> Result<(), Error> {
        let mut tables = self.lock()?;
        tables.sessions.insert(session.ssid.clone(), session);
        Ok(())
    }

    async fn find_session(&self, ssid: &str) -> Result<Option<UserSession>, Error> {
        let tables = self.lock()?;
        Ok(tables.sessions.get(ssid).cloned())
    }

    async fn delete_session(&self, ssid: &str) -> Result<bool, Error> {
        let mut tables = self.lock()?;
        Ok(tables.sessions.remove(ssid).is_some())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let mut tables = self.lock()?;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.expires_at > now);
        Ok((before - tables.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sitting(student_id: i32, course_id: i32) -> NewExam {
        NewExam {
            student_id,
            course_id,
        }
    }

    #[tokio::test]
    async fn second_sitting_for_a_pair_is_a_conflict() {
        let store = MemoryStore::new();
        let first = store.insert_exam(sitting(7, 3)).await.unwrap();
        assert_eq!(first.state, ExamState::Registered);

        let err = store.insert_exam(sitting(7, 3)).await.unwrap_err();
        assert_eq!(err, already_registered());
        assert_eq!(store.exam_count(7, 3).unwrap(), 1);

        // other pairs are unaffected
        store.insert_exam(sitting(7, 4)).await.unwrap();
        store.insert_exam(sitting(8, 3)).await.unwrap();
        assert_eq!(store.exam_count(7, 4).unwrap(), 1);
        assert_eq!(store.exam_count(8, 3).unwrap(), 1);
    }

    #[tokio::test]
    async fn exam_head_names_the_exam_and_its_course() {
        let store = MemoryStore::new();
        store
            .put_course(Course {
                id: 3,
                name: "Physics".to_string(),
                description: None,
                level: None,
                head_id: Some(9),
                final_prerequisites: Vec::new(),
            })
            .unwrap();
        let exam = store.insert_exam(sitting(7, 3)).await.unwrap();

        assert_eq!(
            store.exam_head(exam.id).await.unwrap(),
            Some(ExamHead {
                exam_id: exam.id,
                course_id: 3,
                head_id: Some(9),
            })
        );
        assert_eq!(store.exam_head(exam.id + 1).await.unwrap(), None);
    }
}
