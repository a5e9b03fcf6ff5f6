use axum::http::StatusCode;

use crate::tests::helper;

#[tokio::test]
async fn test_users() {
    let mut app = helper::setup_test_app();

    let email = "alice@example.com";

    // sign up
    let (status_code, user, error) = helper::maybe_signup(&mut app, email, helper::PASSWORD).await;
    assert_eq!(StatusCode::CREATED, status_code);
    assert!(error.is_none());
    let user = user.unwrap();
    assert_eq!(email.to_string(), user.email);

    // sign up again with the same email address
    let (status_code, user_two, error) =
        helper::maybe_signup(&mut app, email, "someotherpassword").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert!(user_two.is_none());
    assert_eq!(Some("User already exists".to_string()), error);

    // email addresses are stored in lowercase
    let (status_code, _, error) =
        helper::maybe_signup(&mut app, "  Alice@Example.com ", helper::PASSWORD).await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(Some("User already exists".to_string()), error);

    // fetch current user
    let access_token = helper::login_with_password(&mut app, email, helper::PASSWORD).await;
    let (status_code, current_user) = helper::current_user(&mut app, &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
    let current_user = current_user.unwrap();
    assert_eq!(user.id, current_user.id);
    assert_eq!(user.email, current_user.email);
}

#[tokio::test]
async fn test_signup_validation() {
    let mut app = helper::setup_test_app();

    for email in ["", "alice", "alice@", "@example.com", "alice@example", "al ice@example.com"] {
        let (status_code, user, error) =
            helper::maybe_signup(&mut app, email, helper::PASSWORD).await;
        assert_eq!(StatusCode::BAD_REQUEST, status_code, "{email}");
        assert!(user.is_none());
        assert_eq!(Some("Invalid email address".to_string()), error);
    }

    let (status_code, user, error) =
        helper::maybe_signup(&mut app, "alice@example.com", "short").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert!(user.is_none());
    assert_eq!(
        Some("Password should be at least 8 characters".to_string()),
        error
    );

    // nothing was stored
    let (status_code, _, _) =
        helper::maybe_login(&mut app, "alice@example.com", "short").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
}
