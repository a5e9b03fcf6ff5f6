use axum::http::StatusCode;
use uuid::Uuid;

use crate::tests::helper;

#[tokio::test]
async fn test_sharing() {
    let mut app = helper::setup_test_app();

    let alice = helper::signup_and_login(&mut app, "alice@example.com").await;
    let bob = helper::signup_and_login(&mut app, "bob@example.com").await;
    let (_, bob_user) = helper::current_user(&mut app, &bob).await;
    let bob_user = bob_user.unwrap();

    let note = helper::create_note(&mut app, &alice, "Trip to Lisbon").await;

    // nothing shared yet
    let (status_code, grants, _) = helper::list_grants(&mut app, &alice, &note.id).await;
    assert_eq!(StatusCode::OK, status_code);
    assert!(grants.unwrap().is_empty());

    // share with bob
    let (status_code, grant, _) =
        helper::maybe_create_grant(&mut app, &alice, &note.id, "bob@example.com").await;
    assert_eq!(StatusCode::CREATED, status_code);
    assert_eq!(
        helper::Grant {
            note_id: note.id,
            user_id: bob_user.id,
            email: Some("bob@example.com".to_string()),
        },
        grant.unwrap()
    );

    let (_, grants, _) = helper::list_grants(&mut app, &alice, &note.id).await;
    let grants = grants.unwrap();
    assert_eq!(1, grants.len());
    assert_eq!(bob_user.id, grants[0].user_id);

    // bob sees the note in his list, with its owner
    let (_, notes, _) = helper::list_notes(&mut app, &bob, "").await;
    let (notes, _) = notes.unwrap();
    assert_eq!(1, notes.len());
    assert_eq!(note.id, notes[0].id);
    assert_eq!(Some("alice@example.com".to_string()), notes[0].owner_email);

    // bob can read and update
    let (status_code, _, _) = helper::single_note(&mut app, &bob, &note.id).await;
    assert_eq!(StatusCode::OK, status_code);

    let (status_code, updated, _) =
        helper::maybe_update_note(&mut app, &bob, &note.id, "Trip to Lisbon and Porto", Some(1))
            .await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(2, updated.unwrap().version);

    let (status_code, _) = helper::maybe_set_editing(&mut app, &bob, &note.id, true).await;
    assert_eq!(StatusCode::OK, status_code);

    // bob can not delete the note or manage who it is shared with
    let (status_code, error) = helper::maybe_delete_note(&mut app, &bob, &note.id).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);
    assert_eq!(
        Some("Only the owner of the note is allowed to do this".to_string()),
        error
    );

    let (status_code, _, _) = helper::list_grants(&mut app, &bob, &note.id).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);

    let (status_code, _, _) =
        helper::maybe_create_grant(&mut app, &bob, &note.id, "alice@example.com").await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);

    let (status_code, _) =
        helper::maybe_delete_grant(&mut app, &bob, &note.id, &bob_user.id).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);

    // stop sharing
    let (status_code, _) =
        helper::maybe_delete_grant(&mut app, &alice, &note.id, &bob_user.id).await;
    assert_eq!(StatusCode::NO_CONTENT, status_code);

    let (status_code, _, error) = helper::single_note(&mut app, &bob, &note.id).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);
    assert_eq!(Some("No access to this note".to_string()), error);

    let (_, notes, _) = helper::list_notes(&mut app, &bob, "").await;
    assert!(notes.unwrap().0.is_empty());

    // removing it again
    let (status_code, error) =
        helper::maybe_delete_grant(&mut app, &alice, &note.id, &bob_user.id).await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);
    assert_eq!(Some("Access grant not found".to_string()), error);
}

#[tokio::test]
async fn test_sharing_validation() {
    let mut app = helper::setup_test_app();

    let alice = helper::signup_and_login(&mut app, "alice@example.com").await;
    helper::signup_and_login(&mut app, "bob@example.com").await;

    let note = helper::create_note(&mut app, &alice, "Shopping list").await;

    // unknown user
    let (status_code, _, error) =
        helper::maybe_create_grant(&mut app, &alice, &note.id, "carol@example.com").await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);
    assert_eq!(Some("User not found".to_string()), error);

    // not an email address
    let (status_code, _, error) =
        helper::maybe_create_grant(&mut app, &alice, &note.id, "bob").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(Some("Invalid email address".to_string()), error);

    // the owner
    let (status_code, _, error) =
        helper::maybe_create_grant(&mut app, &alice, &note.id, "alice@example.com").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(Some("Can not share a note with its owner".to_string()), error);

    // twice, email addresses are normalized
    let (status_code, _, _) =
        helper::maybe_create_grant(&mut app, &alice, &note.id, "bob@example.com").await;
    assert_eq!(StatusCode::CREATED, status_code);

    let (status_code, _, error) =
        helper::maybe_create_grant(&mut app, &alice, &note.id, " Bob@Example.com").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(Some("Note is already shared with this user".to_string()), error);

    // unknown note
    let (status_code, _, error) =
        helper::maybe_create_grant(&mut app, &alice, &Uuid::new_v4(), "bob@example.com").await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);
    assert_eq!(Some("Note not found".to_string()), error);
}

#[tokio::test]
async fn test_delete_removes_grants() {
    let mut app = helper::setup_test_app();

    let alice = helper::signup_and_login(&mut app, "alice@example.com").await;
    let bob = helper::signup_and_login(&mut app, "bob@example.com").await;

    let note = helper::create_note(&mut app, &alice, "Short lived").await;
    helper::maybe_create_grant(&mut app, &alice, &note.id, "bob@example.com").await;

    let (status_code, _) = helper::maybe_delete_note(&mut app, &alice, &note.id).await;
    assert_eq!(StatusCode::NO_CONTENT, status_code);

    // gone for the grantee as well
    let (status_code, _, _) = helper::single_note(&mut app, &bob, &note.id).await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);

    let (_, notes, _) = helper::list_notes(&mut app, &bob, "").await;
    let (notes, pagination) = notes.unwrap();
    assert!(notes.is_empty());
    assert_eq!(0, pagination.total_notes);
}
