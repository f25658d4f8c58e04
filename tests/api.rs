//! Drives the router end to end over the in-memory store.

use std::sync::Arc;

use autogestion::auth::hash_password;
use autogestion::models::{Course, CourseRef, Role, User};
use autogestion::routes::{create_router, AppState, CORRELATION_ID_HEADER, REQUEST_ID_HEADER};
use autogestion::store::MemoryStore;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

const PASSWORD: &str = "secret123";

fn user(id: i32, role: Role, password_hash: &str) -> User {
    User {
        id,
        name: format!("User{}", id),
        surname: "Tester".to_string(),
        legajo: format!("{}", 1000 + id),
        email: format!("user{}@uni.edu", id),
        role,
        study_plan: Some("2023".to_string()),
        password_hash: password_hash.to_string(),
        created_at: Utc::now(),
    }
}

fn course(id: i32, name: &str, head_id: Option<i32>, prerequisites: &[(i32, &str)]) -> Course {
    Course {
        id,
        name: name.to_string(),
        description: None,
        level: Some(1),
        head_id,
        final_prerequisites: prerequisites
            .iter()
            .map(|&(id, name)| CourseRef {
                id,
                name: name.to_string(),
            })
            .collect(),
    }
}

/// Student 7; professors 9 (head of course 3) and 10; course 3 requires
/// course 1 for its final.
fn seeded(stc_for_course_1: &str) -> (Arc<MemoryStore>, Router) {
    let store = Arc::new(MemoryStore::new());
    let hash = hash_password(PASSWORD).unwrap();
    store.put_user(user(7, Role::Student, &hash)).unwrap();
    store.put_user(user(9, Role::Professor, &hash)).unwrap();
    store.put_user(user(10, Role::Professor, &hash)).unwrap();
    store.put_course(course(1, "Algebra I", None, &[])).unwrap();
    store
        .put_course(course(3, "Analysis II", Some(9), &[(1, "Algebra I")]))
        .unwrap();
    store.put_enrollment(7, 1, stc_for_course_1).unwrap();

    let state = AppState::with_policy(store.clone(), "approved", Duration::hours(1));
    (store, create_router(state))
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn login(app: &Router, legajo: &str) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "legajo": legajo, "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn register_with_approved_prerequisite() {
    let (store, app) = seeded("approved");
    let student = login(&app, "1007").await;

    let (status, body) = call(
        &app,
        Method::GET,
        "/exams/prerequisites/3",
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["satisfied"], true);
    assert_eq!(body["missing"], json!([]));

    let (status, body) = call(&app, Method::POST, "/exams/register/3", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["exam"]["state"], "registered");
    assert_eq!(body["exam"]["grade"], Value::Null);
    assert_eq!(body["exam"]["student_id"], 7);
    assert_eq!(body["exam"]["course_id"], 3);

    let (status, body) = call(&app, Method::POST, "/exams/register/3", Some(&student), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Conflict");
    assert_eq!(store.exam_count(7, 3).unwrap(), 1);
}

#[tokio::test]
async fn unapproved_prerequisite_blocks_registration() {
    let (store, app) = seeded("enrolled");
    let student = login(&app, "1007").await;

    let (status, body) = call(&app, Method::POST, "/exams/register/3", Some(&student), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("Algebra I"));
    assert_eq!(store.exam_count(7, 3).unwrap(), 0);

    let (_, body) = call(
        &app,
        Method::GET,
        "/exams/prerequisites/3",
        Some(&student),
        None,
    )
    .await;
    assert_eq!(body["satisfied"], false);
    assert_eq!(body["missing"], json!([{ "id": 1, "name": "Algebra I" }]));
}

#[tokio::test]
async fn head_of_department_grades_the_exam() {
    let (_, app) = seeded("approved");
    let student = login(&app, "1007").await;
    let head = login(&app, "1009").await;
    let other = login(&app, "1010").await;

    let (_, body) = call(&app, Method::POST, "/exams/register/3", Some(&student), None).await;
    let exam_id = body["exam"]["id"].as_i64().unwrap();
    let uri = format!("/grades/{}", exam_id);
    let grade = json!({ "grade": 7.5, "state": "passed" });

    let (status, body) = call(&app, Method::PATCH, &uri, Some(&other), Some(grade.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Forbidden");

    let (status, body) = call(&app, Method::PATCH, &uri, Some(&head), Some(grade)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["exam"]["state"], "passed");
    assert_eq!(body["exam"]["grade"], 7.5);

    let (status, body) = call(&app, Method::GET, "/exams/mine", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    let exams = body["exams"].as_array().unwrap();
    assert_eq!(exams.len(), 1);
    assert_eq!(exams[0]["state"], "passed");
    assert!(exams[0].get("student_id").is_none());
}

#[tokio::test]
async fn grade_guard_rejections() {
    let (_, app) = seeded("approved");
    let student = login(&app, "1007").await;
    let head = login(&app, "1009").await;
    let (_, body) = call(&app, Method::POST, "/exams/register/3", Some(&student), None).await;
    let uri = format!("/grades/{}", body["exam"]["id"].as_i64().unwrap());

    let (status, _) = call(
        &app,
        Method::PATCH,
        &uri,
        None,
        Some(json!({ "grade": 5, "state": "failed" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &app,
        Method::PATCH,
        &uri,
        Some(&student),
        Some(json!({ "grade": 5, "state": "failed" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        Method::PATCH,
        "/grades/abc",
        Some(&head),
        Some(json!({ "grade": 5, "state": "failed" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for body in [
        json!({ "grade": -1, "state": "passed" }),
        json!({ "grade": 10.01, "state": "passed" }),
        json!({ "grade": 6, "state": "registered" }),
        json!({ "grade": 6, "state": "excellent" }),
        json!({ "state": "passed" }),
    ] {
        let (status, reply) = call(&app, Method::PATCH, &uri, Some(&head), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", reply);
    }

    let (status, reply) = call(
        &app,
        Method::PATCH,
        &uri,
        Some(&head),
        Some(json!({ "grade": 11, "state": "bogus" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["message"], "Invalid data: exam id/grade");

    let (_, body) = call(&app, Method::GET, "/exams/mine", Some(&student), None).await;
    assert_eq!(body["exams"][0]["state"], "registered");
    assert_eq!(body["exams"][0]["grade"], Value::Null);
}

#[tokio::test]
async fn account_lifecycle() {
    let (_, app) = seeded("approved");

    let (status, body) = call(
        &app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({
            "name": "Ana",
            "surname": "Paz",
            "legajo": "55555",
            "email": "ana@uni.edu",
            "password": PASSWORD
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["user"]["role"], "student");
    assert!(body["user"].get("password_hash").is_none());

    let (status, _) = call(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "ana@uni.edu", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "ana@uni.edu", "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = call(&app, Method::GET, "/auth/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["legajo"], "55555");

    let (status, body) = call(&app, Method::POST, "/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["drop_success"], true);

    let (status, _) = call(&app, Method::GET, "/auth/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn catalog_and_enrollments() {
    let (_, app) = seeded("approved");
    let student = login(&app, "1007").await;

    let (status, body) = call(&app, Method::GET, "/courses", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    let courses = body["courses"].as_array().unwrap();
    assert_eq!(courses.len(), 2);
    assert_eq!(courses[1]["final_prerequisites"][0]["name"], "Algebra I");
    assert_eq!(courses[1]["head_id"], 9);

    let (status, body) = call(&app, Method::GET, "/enrollments/mine", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enrollments"][0]["course"]["name"], "Algebra I");
    assert_eq!(body["enrollments"][0]["stc"], "approved");

    let (status, _) = call(&app, Method::GET, "/courses", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_paths_and_request_ids() {
    let (_, app) = seeded("approved");

    let request = Request::builder()
        .uri("/nowhere")
        .header(REQUEST_ID_HEADER, "req-42")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");

    let request = Request::builder()
        .uri("/health")
        .header(CORRELATION_ID_HEADER, "corr-7")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()[REQUEST_ID_HEADER], "corr-7");

    let request = Request::builder()
        .uri("/health")
        .header(REQUEST_ID_HEADER, "req-43")
        .header(CORRELATION_ID_HEADER, "corr-8")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-43");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
}
