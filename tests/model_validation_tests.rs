use chrono::Utc;
use serde_json::json;
use university_api::{
    activity::{ActivityLog, ActivityRecord, MockActivityLog, object_key, record_activity},
    auth::RequestMeta,
    models::{LoginResponse, LoginUser, Role, UpdateUserRequest, UserPatch, UserProfile},
};
use uuid::Uuid;

// --- Wire Shapes ---

#[test]
fn test_update_request_omits_absent_fields() {
    let request = UpdateUserRequest {
        email: Some("nueva@universidad.edu".to_string()),
        ..Default::default()
    };

    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value, json!({ "email": "nueva@universidad.edu" }));
}

#[test]
fn test_update_request_accepts_partial_body() {
    let request: UpdateUserRequest =
        serde_json::from_value(json!({ "role_id": 2, "active": false })).unwrap();

    assert_eq!(request.role_id, Some(2));
    assert_eq!(request.active, Some(false));
    assert!(request.first_name.is_none());
    assert!(request.password.is_none());
}

#[test]
fn test_empty_patch_detection() {
    assert!(UserPatch::default().is_empty());
    assert!(
        !UserPatch {
            active: Some(true),
            ..Default::default()
        }
        .is_empty()
    );
}

#[test]
fn test_login_response_shape() {
    let session_id = Uuid::new_v4();
    let response = LoginResponse {
        user: LoginUser {
            id: 1,
            username: "admin".to_string(),
            role: Role {
                id: 1,
                name: "administrator".to_string(),
            },
            permissions: vec!["users.view".to_string()],
        },
        token: "header.payload.signature".to_string(),
        session_id,
    };

    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(
        value,
        json!({
            "user": {
                "id": 1,
                "username": "admin",
                "role": { "id": 1, "name": "administrator" },
                "permissions": ["users.view"],
            },
            "token": "header.payload.signature",
            "session_id": session_id.to_string(),
        })
    );
}

#[test]
fn test_user_profile_never_carries_credentials() {
    let profile = UserProfile {
        id: 7,
        first_name: "Juan".to_string(),
        last_name: "Perez".to_string(),
        email: "jperez@universidad.edu".to_string(),
        username: "jperez".to_string(),
        role_id: 2,
        role_name: "instructor".to_string(),
        active: true,
        created_at: Utc::now(),
        last_login_at: None,
    };

    let value = serde_json::to_value(&profile).unwrap();
    let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
    assert!(!keys.iter().any(|k| k.contains("password")));
    assert!(value["last_login_at"].is_null());
}

// --- Activity Documents ---

fn meta() -> RequestMeta {
    RequestMeta {
        ip: Some("10.0.0.8".to_string()),
        user_agent: Some("curl/8.5".to_string()),
        method: "POST".to_string(),
        path: "/api/auth/login".to_string(),
    }
}

#[test]
fn test_activity_record_copies_request_metadata() {
    let record = ActivityRecord::new("login", Some(1), Some("admin".to_string()), &meta());

    assert_eq!(record.action, "login");
    assert_eq!(record.ip.as_deref(), Some("10.0.0.8"));
    assert_eq!(record.user_agent.as_deref(), Some("curl/8.5"));
    assert_eq!(record.method, "POST");
    assert_eq!(record.path, "/api/auth/login");
}

#[test]
fn test_activity_object_keys_are_dated_and_unique() {
    let record = ActivityRecord::new("logout", None, None, &meta());
    let prefix = format!("activity/{}/", record.timestamp.format("%Y/%m/%d"));

    let first = object_key(&record);
    let second = object_key(&record);
    assert!(first.starts_with(&prefix));
    assert!(first.ends_with(".json"));
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_record_activity_swallows_failures() {
    let failing = MockActivityLog::new_failing();
    record_activity(&failing, ActivityRecord::new("login", Some(1), None, &meta())).await;
    assert!(failing.records().is_empty());

    let working = MockActivityLog::new();
    working.ensure_bucket_exists().await;
    record_activity(&working, ActivityRecord::new("login", Some(1), None, &meta())).await;
    assert_eq!(working.records().len(), 1);
}
