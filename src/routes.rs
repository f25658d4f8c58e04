//! HTTP surface: shared state, the router, request guards and handlers for
//! courses, enrollments and final exams.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequest, Path, RequestParts};
use axum::handler::Handler;
use axum::http::{HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use uuid::Uuid;

use crate::auth::{self, AuthService, Caller};
use crate::config::Config;
use crate::exam::ExamService;
use crate::models::{Course, EnrollmentView, ExamSitting, ExamSummary, PrerequisiteReport, Role};
use crate::store::{EnrollmentStore, ExamStore, RosterStore, SessionStore};
use crate::validate::{self, GradeSubmission};
use crate::{err, proceeds, Error, Payload};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Read when a client sends no `x-request-id`.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct AppState {
    pub exams: ExamService,
    pub auth: AuthService,
    roster: Arc<dyn RosterStore>,
    enrollments: Arc<dyn EnrollmentStore>,
}

impl AppState {
    pub fn new<S>(store: Arc<S>, config: &Config) -> Self
    where
        S: RosterStore + EnrollmentStore + ExamStore + SessionStore + 'static,
    {
        Self::with_policy(store, &config.approved_stc, config.session_ttl)
    }

    pub fn with_policy<S>(store: Arc<S>, approved_stc: &str, session_ttl: chrono::Duration) -> Self
    where
        S: RosterStore + EnrollmentStore + ExamStore + SessionStore + 'static,
    {
        Self {
            exams: ExamService::new(store.clone(), store.clone(), store.clone(), approved_stc),
            auth: AuthService::new(store.clone(), store.clone(), session_ttl),
            roster: store.clone(),
            enrollments: store,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register_student))
        .route("/auth/login", post(auth::login_student))
        .route("/auth/logout", post(auth::drop_session))
        .route("/auth/profile", get(auth::profile))
        .route("/courses", get(list_courses))
        .route("/enrollments/mine", get(my_enrollments))
        .route("/exams/prerequisites/:course_id", get(check_prerequisites))
        .route("/exams/register/:course_id", post(register_exam))
        .route("/exams/mine", get(my_exams))
        .route("/grades/:exam_id", patch(submit_grade))
        .fallback(err::handler404.into_service())
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(track_requests))
                .layer(Extension(state)),
        )
}

/// Tags every response with a request id and writes one access log line.
pub async fn track_requests<B>(req: Request<B>, next: Next<B>) -> Response {
    let request_id = [REQUEST_ID_HEADER, CORRELATION_ID_HEADER]
        .iter()
        .filter_map(|name| req.headers().get(*name))
        .filter_map(|v| v.to_str().ok())
        .find(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;
    let status = response.status();

    if status.is_server_error() {
        log::error!("[{}] {} {} -> {}", request_id, method, path, status);
    } else if status.is_client_error() {
        log::warn!("[{}] {} {} -> {}", request_id, method, path, status);
    } else {
        log::info!("[{}] {} {} -> {}", request_id, method, path, status);
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Grade routes only run for a professor who heads the exam's course.
pub struct HeadOfDepartment {
    pub caller: Caller,
    pub exam_id: i32,
}

#[async_trait]
impl<B> FromRequest<B> for HeadOfDepartment
where
    B: Send,
{
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request(req).await?;
        let Path(raw) = Path::<String>::from_request(req)
            .await
            .map_err(|_| Error::invalid("Invalid exam id"))?;
        let exam_id = validate::parse_id(&raw, "exam id")?;

        if caller.role != Role::Professor {
            return Err(Error::forbidden("Only professors may access this route"));
        }

        let Extension(state) = Extension::<AppState>::from_request(req)
            .await
            .map_err(|err| Error::InternalError {
                kind: "ExtensionError",
                message: err.to_string(),
            })?;
        if !state
            .exams
            .is_head(i64::from(caller.user_id), i64::from(exam_id))
            .await?
        {
            return Err(Error::forbidden(
                "You are not the head of department for this course",
            ));
        }

        Ok(Self { caller, exam_id })
    }
}

async fn health() -> Payload<Health> {
    proceeds(Health { status: "ok" })
}

async fn list_courses(_caller: Caller, Extension(state): Extension<AppState>) -> Payload<Courses> {
    proceeds(Courses {
        courses: state.roster.list_courses().await?,
    })
}

async fn my_enrollments(
    caller: Caller,
    Extension(state): Extension<AppState>,
) -> Payload<Enrollments> {
    proceeds(Enrollments {
        enrollments: state.enrollments.enrollments_of(caller.user_id).await?,
    })
}

async fn check_prerequisites(
    caller: Caller,
    Path(course_id): Path<String>,
    Extension(state): Extension<AppState>,
) -> Payload<PrerequisiteReport> {
    let course_id = validate::parse_id(&course_id, "course id")?;
    proceeds(
        state
            .exams
            .verify_prerequisites(i64::from(caller.user_id), i64::from(course_id))
            .await?,
    )
}

async fn register_exam(
    caller: Caller,
    Path(course_id): Path<String>,
    Extension(state): Extension<AppState>,
) -> Payload<ExamRecord> {
    let course_id = validate::parse_id(&course_id, "course id")?;
    let exam = state
        .exams
        .register(i64::from(caller.user_id), i64::from(course_id))
        .await?;
    proceeds(ExamRecord { exam })
}

async fn my_exams(caller: Caller, Extension(state): Extension<AppState>) -> Payload<ExamList> {
    proceeds(ExamList {
        exams: state.exams.exams_of(i64::from(caller.user_id)).await?,
    })
}

async fn submit_grade(
    head: HeadOfDepartment,
    Extension(state): Extension<AppState>,
    body: Result<Json<GradeRequest>, axum::extract::rejection::JsonRejection>,
) -> Payload<ExamRecord> {
    let Json(body) = body.map_err(|err| Error::invalid(err.to_string()))?;
    let submission =
        GradeSubmission::parse_raw(i64::from(head.exam_id), body.grade, &body.state)?;
    let exam = state
        .exams
        .submit_grade(
            i64::from(head.caller.user_id),
            i64::from(submission.exam_id),
            submission.grade,
            submission.state,
        )
        .await?;
    proceeds(ExamRecord { exam })
}

#[derive(Debug, Clone, Deserialize)]
pub struct GradeRequest {
    pub grade: f64,
    pub state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Courses {
    pub courses: Vec<Course>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Enrollments {
    pub enrollments: Vec<EnrollmentView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExamRecord {
    pub exam: ExamSitting,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExamList {
    pub exams: Vec<ExamSummary>,
}
