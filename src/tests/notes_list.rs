use axum::http::StatusCode;

use crate::tests::helper;

#[tokio::test]
async fn test_notes_pagination() {
    let mut app = helper::setup_test_app();

    let access_token = helper::signup_and_login(&mut app, "alice@example.com").await;

    let mut created = Vec::new();
    for index in 1..=25 {
        let note = helper::create_note(&mut app, &access_token, &format!("Note {index}")).await;
        created.push(note.id);
    }

    // default page: ten newest notes first
    let (status_code, notes, _) = helper::list_notes(&mut app, &access_token, "").await;
    assert_eq!(StatusCode::OK, status_code);
    let (notes, pagination) = notes.unwrap();
    assert_eq!(10, notes.len());
    assert_eq!("Note 25".to_string(), notes[0].content);
    assert_eq!("Note 16".to_string(), notes[9].content);
    assert_eq!(
        helper::Pagination {
            current_page: 1,
            total_pages: 3,
            total_notes: 25,
            has_next_page: true,
            has_prev_page: false,
        },
        pagination
    );

    // middle page
    let (_, notes, _) = helper::list_notes(&mut app, &access_token, "page=2").await;
    let (notes, pagination) = notes.unwrap();
    assert_eq!(10, notes.len());
    assert_eq!("Note 15".to_string(), notes[0].content);
    assert!(pagination.has_next_page);
    assert!(pagination.has_prev_page);

    // last page is partial
    let (_, notes, _) = helper::list_notes(&mut app, &access_token, "page=3").await;
    let (notes, pagination) = notes.unwrap();
    assert_eq!(5, notes.len());
    assert_eq!("Note 1".to_string(), notes[4].content);
    assert!(!pagination.has_next_page);
    assert!(pagination.has_prev_page);

    // past the last page
    let (status_code, notes, _) = helper::list_notes(&mut app, &access_token, "page=4").await;
    assert_eq!(StatusCode::OK, status_code);
    let (notes, pagination) = notes.unwrap();
    assert!(notes.is_empty());
    assert_eq!(4, pagination.current_page);
    assert!(!pagination.has_next_page);

    // custom limit
    let (_, notes, _) = helper::list_notes(&mut app, &access_token, "page=2&limit=20").await;
    let (notes, pagination) = notes.unwrap();
    assert_eq!(5, notes.len());
    assert_eq!(2, pagination.total_pages);

    // every note shows up exactly once over all pages
    let mut seen = Vec::new();
    for page in 1..=5 {
        let (_, notes, _) =
            helper::list_notes(&mut app, &access_token, &format!("page={page}&limit=6")).await;
        seen.extend(notes.unwrap().0.into_iter().map(|note| note.id));
    }
    seen.sort();
    created.sort();
    assert_eq!(created, seen);
}

#[tokio::test]
async fn test_notes_pagination_limits() {
    let mut app = helper::setup_test_app();

    let access_token = helper::signup_and_login(&mut app, "alice@example.com").await;

    let (status_code, _, error) = helper::list_notes(&mut app, &access_token, "page=0").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(Some("Page should be at least 1".to_string()), error);

    for query in ["limit=0", "limit=101"] {
        let (status_code, _, error) = helper::list_notes(&mut app, &access_token, query).await;
        assert_eq!(StatusCode::BAD_REQUEST, status_code, "{query}");
        assert_eq!(
            Some("Limit should be between 1 and 100".to_string()),
            error
        );
    }

    let (status_code, _, _) = helper::list_notes(&mut app, &access_token, "limit=100").await;
    assert_eq!(StatusCode::OK, status_code);
}

#[tokio::test]
async fn test_notes_search() {
    let mut app = helper::setup_test_app();

    let access_token = helper::signup_and_login(&mut app, "alice@example.com").await;

    helper::create_note(&mut app, &access_token, "Groceries: milk").await;
    helper::create_note(&mut app, &access_token, "Call the plumber").await;
    helper::create_note(&mut app, &access_token, "More GROCERIES: eggs").await;

    // case insensitive substring match
    let (status_code, notes, _) =
        helper::list_notes(&mut app, &access_token, "search=groceries").await;
    assert_eq!(StatusCode::OK, status_code);
    let (notes, pagination) = notes.unwrap();
    assert_eq!(2, pagination.total_notes);
    assert_eq!(
        vec![
            "More GROCERIES: eggs".to_string(),
            "Groceries: milk".to_string()
        ],
        notes
            .into_iter()
            .map(|note| note.content)
            .collect::<Vec<String>>()
    );

    // no match
    let (_, notes, _) = helper::list_notes(&mut app, &access_token, "search=dentist").await;
    let (notes, pagination) = notes.unwrap();
    assert!(notes.is_empty());
    assert_eq!(0, pagination.total_notes);
    assert_eq!(1, pagination.total_pages);

    // blank search lists everything
    let (_, notes, _) = helper::list_notes(&mut app, &access_token, "search=%20%20").await;
    assert_eq!(3, notes.unwrap().1.total_notes);
}

#[tokio::test]
async fn test_notes_are_private() {
    let mut app = helper::setup_test_app();

    let alice = helper::signup_and_login(&mut app, "alice@example.com").await;
    let bob = helper::signup_and_login(&mut app, "bob@example.com").await;

    let note = helper::create_note(&mut app, &alice, "Diary").await;

    // not in the list of bob
    let (_, notes, _) = helper::list_notes(&mut app, &bob, "").await;
    assert!(notes.unwrap().0.is_empty());

    // bob can not read, update or delete it
    let (status_code, _, error) = helper::single_note(&mut app, &bob, &note.id).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);
    assert_eq!(Some("No access to this note".to_string()), error);

    let (status_code, _, _) =
        helper::maybe_update_note(&mut app, &bob, &note.id, "Hacked", Some(1)).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);

    let (status_code, _) = helper::maybe_delete_note(&mut app, &bob, &note.id).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);

    let (status_code, _) = helper::maybe_set_editing(&mut app, &bob, &note.id, true).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);

    // untouched
    let (_, single, _) = helper::single_note(&mut app, &alice, &note.id).await;
    let single = single.unwrap();
    assert_eq!("Diary".to_string(), single.content);
    assert_eq!(1, single.version);
    assert!(!single.being_edited);
}
