use chrono::Utc;
use rental_portal::{
    error::ApiError,
    store::StoreError,
    models::{RefreshRequest, RegisterRequest, Role, User, UserProfile},
    session::{AuthResponse, Session, SessionUser},
};
use serde_json::json;
use uuid::Uuid;

// --- Role ---

#[test]
fn test_role_text_representation() {
    for (role, text) in [
        (Role::Admin, "admin"),
        (Role::Customer, "customer"),
        (Role::Driver, "driver"),
        (Role::Owner, "owner"),
    ] {
        assert_eq!(role.as_str(), text);
        assert_eq!(serde_json::to_value(role).unwrap(), json!(text));
        assert_eq!(text.parse::<Role>().unwrap(), role);
        // The database column decodes through TryFrom<String>.
        assert_eq!(Role::try_from(text.to_string()).unwrap(), role);
    }
}

#[test]
fn test_unknown_role_is_rejected() {
    assert!("superuser".parse::<Role>().is_err());
    assert!("Admin".parse::<Role>().is_err());
    assert!(serde_json::from_value::<Role>(json!("guest")).is_err());
}

// --- Payloads ---

#[test]
fn test_register_role_is_optional() {
    let request: RegisterRequest = serde_json::from_value(json!({
        "name": "Ada",
        "email": "ada@example.com",
        "password": "long-enough-pw"
    }))
    .unwrap();
    assert_eq!(request.role, None);

    let request: RegisterRequest = serde_json::from_value(json!({
        "name": "Olu",
        "email": "olu@example.com",
        "password": "long-enough-pw",
        "role": "owner"
    }))
    .unwrap();
    assert_eq!(request.role, Some(Role::Owner));
}

#[test]
fn test_refresh_request_is_camel_case() {
    let request: RefreshRequest =
        serde_json::from_value(json!({"refreshToken": "abc"})).unwrap();
    assert_eq!(request.refresh_token, "abc");
    assert!(serde_json::from_value::<RefreshRequest>(json!({"refresh_token": "abc"})).is_err());
}

// --- Responses ---

#[test]
fn test_user_profile_hides_password_hash() {
    let user = User {
        id: Uuid::new_v4(),
        name: "Dee".to_string(),
        email: "dee@example.com".to_string(),
        password_hash: "$argon2id$secret".to_string(),
        role: Role::Driver,
        created_at: Utc::now(),
    };

    let value = serde_json::to_value(UserProfile::from(user)).unwrap();
    let text = value.to_string();

    assert!(!text.contains("argon2"));
    assert_eq!(value["role"], "driver");
    assert!(value["createdAt"].is_string());
}

#[test]
fn test_auth_response_flattens_session() {
    let session = Session {
        access_token: "a".to_string(),
        refresh_token: "r".to_string(),
        user: SessionUser {
            id: Uuid::nil(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            role: Role::Customer,
        },
    };

    let value = serde_json::to_value(AuthResponse::from(session)).unwrap();

    assert_eq!(value["success"], true);
    assert_eq!(value["accessToken"], "a");
    assert_eq!(value["refreshToken"], "r");
    assert_eq!(value["user"]["role"], "customer");
}

// --- Errors ---

#[test]
fn test_error_status_and_kind_mapping() {
    let cases = [
        (ApiError::Unauthenticated, 401, "Unauthenticated"),
        (ApiError::TokenRevoked, 401, "TokenRevoked"),
        (ApiError::TokenInvalid, 401, "TokenInvalid"),
        (ApiError::UserNotFound, 401, "UserNotFound"),
        (ApiError::Forbidden { role: Role::Driver }, 403, "Forbidden"),
        (
            ApiError::StoreUnavailable("down".to_string()),
            503,
            "StoreUnavailable",
        ),
        (ApiError::InvalidCredentials, 401, "InvalidCredentials"),
        (ApiError::Conflict("dup".to_string()), 409, "Conflict"),
        (ApiError::Internal("boom".to_string()), 500, "Internal"),
    ];

    for (error, status, kind) in cases {
        assert_eq!(error.status_code().as_u16(), status, "{kind}");
        assert_eq!(error.kind(), kind);
    }
}

#[test]
fn test_internal_details_are_not_exposed() {
    let error = ApiError::Internal("password column missing".to_string());
    assert_eq!(error.to_string(), "Internal server error");

    // Store errors carry host names and driver messages.
    let error = ApiError::from(StoreError::Unavailable(
        "connection refused (redis://10.0.3.7:6379)".to_string(),
    ));
    assert_eq!(error.to_string(), "Token store unavailable");
    assert!(!error.to_string().contains("10.0.3.7"));
}
