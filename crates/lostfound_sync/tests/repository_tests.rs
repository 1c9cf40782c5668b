mod fixtures;

use fixtures::{png_file, settle, wallet, Harness};
use lostfound_common::codes;
use lostfound_common::{
    Item, ItemStatus, LostFoundError, NewItem, RemoteError, FAVORITES_COLLECTION, ITEMS_COLLECTION,
};
use lostfound_sync::memory::StoreOp;
use lostfound_sync::ItemFilter;

#[tokio::test]
async fn test_add_item_round_trip() {
    let h = Harness::new();
    let alice = h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;

    let id = h.client.items().add_item(wallet()).await.unwrap();
    let state = h.items_until(|s| s.items.len() == 1).await;

    let item = &state.items[0];
    assert_eq!(item.id, id);
    assert_eq!(item.title, "Lost Wallet");
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.user_id, alice.id);
    assert_eq!(item.user_name.as_deref(), Some("Alice"));
    assert_eq!(item.user_email.as_deref(), Some("alice@u.edu"));
    assert!(item.created_at.is_some());
}

#[tokio::test]
async fn test_add_item_omits_absent_optionals() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;

    h.client.items().add_item(wallet()).await.unwrap();

    let write = h
        .store
        .writes()
        .into_iter()
        .rfind(|w| w.op == StoreOp::Add && w.collection == ITEMS_COLLECTION)
        .unwrap();
    assert!(!write.data.contains_key("imageUri"));
    assert!(!write.data.contains_key("description"));
    assert!(!write.data.contains_key("category"));
    assert_eq!(write.data["status"], "pending");
}

#[tokio::test]
async fn test_writes_are_not_visible_before_the_snapshot() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    h.items_until(|s| !s.is_loading).await;

    h.store.hold_deliveries();
    h.client.items().add_item(wallet()).await.unwrap();
    settle().await;
    assert!(h.client.items().items().is_empty());

    h.store.release_deliveries();
    h.items_until(|s| s.items.len() == 1).await;
}

#[tokio::test]
async fn test_add_item_requires_a_user() {
    let h = Harness::new();
    let err = h.client.items().add_item(wallet()).await.unwrap_err();
    assert_eq!(err, LostFoundError::Unauthenticated);
    assert!(h.store.writes().is_empty());
}

#[tokio::test]
async fn test_add_item_validates_before_writing() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    let writes_before = h.store.writes().len();

    let err = h
        .client
        .items()
        .add_item(NewItem::new("ab", "Gym", "2025-03-01"))
        .await
        .unwrap_err();
    assert!(matches!(err, LostFoundError::Validation(ref msg) if msg.contains("title")));

    let err = h
        .client
        .items()
        .add_item(NewItem::new("Lost Wallet", "Gym", "2999-01-01"))
        .await
        .unwrap_err();
    assert!(matches!(err, LostFoundError::Validation(ref msg) if msg.contains("date")));

    let err = h
        .client
        .items()
        .add_item(wallet().with_category("Furniture"))
        .await
        .unwrap_err();
    assert!(matches!(err, LostFoundError::Validation(ref msg) if msg.contains("category")));
    assert_eq!(h.store.writes().len(), writes_before);
}

#[tokio::test]
async fn test_add_item_maps_remote_failures() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    h.store
        .fail_on(StoreOp::Add, ITEMS_COLLECTION, RemoteError::unavailable("offline"));

    let err = h.client.items().add_item(wallet()).await.unwrap_err();
    assert!(err.is_network_error());

    h.store.clear_failures();
    h.store.fail_on(
        StoreOp::Add,
        ITEMS_COLLECTION,
        RemoteError::permission_denied("rules"),
    );
    let err = h.client.items().add_item(wallet()).await.unwrap_err();
    assert_eq!(err, LostFoundError::RemotePermissionDenied("rules".into()));
    assert!(err.is_permission_error());
}

#[tokio::test]
async fn test_edit_never_changes_owner_or_status() {
    let h = Harness::new();
    let alice = h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    h.client.items().add_item(wallet()).await.unwrap();
    let state = h.items_until(|s| s.items.len() == 1).await;

    let mut edited = state.items[0].clone();
    edited.title = "Brown Wallet".into();
    edited.user_id = "someone-else".into();
    edited.user_name = Some("Mallory".into());
    edited.status = ItemStatus::Found;
    h.client.items().edit_item(&edited).await.unwrap();

    let state = h.items_until(|s| s.items[0].title == "Brown Wallet").await;
    let item = &state.items[0];
    assert_eq!(item.user_id, alice.id);
    assert_eq!(item.user_name.as_deref(), Some("Alice"));
    assert_eq!(item.status, ItemStatus::Pending);

    let patch = h.store.writes().pop().unwrap();
    assert_eq!(patch.op, StoreOp::Update);
    for field in ["id", "userId", "userName", "userEmail", "createdAt", "status"] {
        assert!(!patch.data.contains_key(field), "patch carried {}", field);
    }
}

#[tokio::test]
async fn test_non_owner_mutations_are_unauthorized() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    h.client.items().add_item(wallet()).await.unwrap();
    h.client.session().logout().await.unwrap();
    h.sign_in_new_user("Bob", "bob@u.edu", "S2").await;

    let state = h.items_until(|s| s.items.len() == 1).await;
    let item = state.items[0].clone();
    assert!(!h.client.items().is_owner(&item));
    let writes_before = h.store.writes().len();

    let repo = h.client.items();
    assert_eq!(
        repo.edit_item(&item).await.unwrap_err(),
        LostFoundError::Unauthorized(item.id.clone())
    );
    assert_eq!(
        repo.delete_item(&item.id).await.unwrap_err(),
        LostFoundError::Unauthorized(item.id.clone())
    );
    assert_eq!(
        repo.update_item_status(&item.id, ItemStatus::Found)
            .await
            .unwrap_err(),
        LostFoundError::Unauthorized(item.id.clone())
    );
    assert_eq!(h.store.writes().len(), writes_before);
}

#[tokio::test]
async fn test_edit_of_unsynced_item_ignores_claimed_owner() {
    let h = Harness::new();
    let bob = h.sign_in_new_user("Bob", "bob@u.edu", "S2").await;
    h.items_until(|s| !s.is_loading).await;

    h.store.hold_deliveries();
    let data = serde_json::json!({
        "userId": "alice-id",
        "title": "Alice Wallet",
        "location": "Gym",
        "date": "2025-03-01",
        "status": "pending",
    });
    h.store
        .insert_raw(ITEMS_COLLECTION, "alice-item", data.as_object().cloned().unwrap());
    let writes_before = h.store.writes().len();

    let claimed = Item {
        id: "alice-item".into(),
        title: "Hijacked".into(),
        description: None,
        location: "Gym".into(),
        date: "2025-03-01".into(),
        image_uri: None,
        category: None,
        user_id: bob.id.clone(),
        user_name: None,
        user_email: None,
        status: ItemStatus::Pending,
        created_at: None,
    };
    let err = h.client.items().edit_item(&claimed).await.unwrap_err();
    assert_eq!(err, LostFoundError::NotFound("alice-item".into()));
    assert_eq!(h.store.writes().len(), writes_before);

    let stored = h
        .store
        .documents(ITEMS_COLLECTION)
        .into_iter()
        .find(|d| d.id == "alice-item")
        .unwrap();
    assert_eq!(stored.get("title").unwrap(), "Alice Wallet");
    assert_eq!(stored.get("userId").unwrap(), "alice-id");
}

#[tokio::test]
async fn test_owner_delete_removes_item_and_favorites() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    let id = h.client.items().add_item(wallet()).await.unwrap();
    h.items_until(|s| s.items.len() == 1).await;
    assert!(h.client.items().toggle_favorite(&id).await.unwrap());

    h.client.session().logout().await.unwrap();
    h.sign_in_new_user("Bob", "bob@u.edu", "S2").await;
    assert!(h.client.items().toggle_favorite(&id).await.unwrap());
    h.items_until(|s| s.favorites.len() == 2).await;

    let err = h.client.items().delete_item(&id).await.unwrap_err();
    assert_eq!(err, LostFoundError::Unauthorized(id.clone()));

    h.switch_to("alice@u.edu").await;
    h.client.items().delete_item(&id).await.unwrap();

    let state = h
        .items_until(|s| s.items.is_empty() && s.favorites.is_empty())
        .await;
    assert!(state.items.is_empty());
    assert!(h.store.documents(FAVORITES_COLLECTION).is_empty());
}

#[tokio::test]
async fn test_delete_requires_the_item_in_the_mirror() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    let err = h.client.items().delete_item("missing").await.unwrap_err();
    assert_eq!(err, LostFoundError::NotFound("missing".into()));
}

#[tokio::test]
async fn test_favorite_cleanup_failures_do_not_block_delete() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    let id = h.client.items().add_item(wallet()).await.unwrap();
    h.items_until(|s| s.items.len() == 1).await;
    h.client.items().toggle_favorite(&id).await.unwrap();

    h.store.fail_on(
        StoreOp::Delete,
        FAVORITES_COLLECTION,
        RemoteError::unavailable("offline"),
    );
    h.client.items().delete_item(&id).await.unwrap();

    h.items_until(|s| s.items.is_empty()).await;
    assert_eq!(h.store.documents(FAVORITES_COLLECTION).len(), 1);
}

#[tokio::test]
async fn test_toggle_favorite_twice_restores_state() {
    let h = Harness::new();
    let alice = h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    let id = h.client.items().add_item(wallet()).await.unwrap();
    h.items_until(|s| s.items.len() == 1).await;

    let repo = h.client.items();
    assert!(repo.toggle_favorite(&id).await.unwrap());
    assert!(!repo.toggle_favorite(&id).await.unwrap());
    assert!(h.store.documents(FAVORITES_COLLECTION).is_empty());

    assert!(repo.toggle_favorite(&id).await.unwrap());
    h.items_until(|s| s.favorites_of(&alice.id).count() == 1).await;
    assert!(repo.is_favorite(&id));
    assert_eq!(repo.favorite_items().len(), 1);

    // a second set on the same pair must not add a row
    let docs = h.store.documents(FAVORITES_COLLECTION);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, format!("{}_{}", alice.id, id));
}

#[tokio::test]
async fn test_is_favorite_follows_the_signed_in_user() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    let id = h.client.items().add_item(wallet()).await.unwrap();
    h.items_until(|s| s.items.len() == 1).await;
    h.client.items().toggle_favorite(&id).await.unwrap();
    h.items_until(|s| s.favorites.len() == 1).await;
    assert!(h.client.items().is_favorite(&id));

    h.client.session().logout().await.unwrap();
    assert!(!h.client.items().is_favorite(&id));

    h.sign_in_new_user("Bob", "bob@u.edu", "S2").await;
    assert!(!h.client.items().is_favorite(&id));
    assert!(h.client.items().favorites().is_empty());
    assert!(h.client.items().favorite_items().is_empty());
}

#[tokio::test]
async fn test_status_moves_only_forward() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    let id = h.client.items().add_item(wallet()).await.unwrap();
    h.items_until(|s| s.items.len() == 1).await;

    h.client
        .items()
        .update_item_status(&id, ItemStatus::Found)
        .await
        .unwrap();
    h.items_until(|s| s.items[0].status == ItemStatus::Found).await;

    let patch = h.store.writes().pop().unwrap();
    assert_eq!(patch.data.len(), 1);
    assert_eq!(patch.data["status"], "found");

    let err = h
        .client
        .items()
        .update_item_status(&id, ItemStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(err, LostFoundError::Validation(_)));
}

#[tokio::test]
async fn test_local_image_is_uploaded_before_the_write() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    let dir = tempfile::tempdir().unwrap();
    let uri = png_file(dir.path(), 1600, 800);

    h.client
        .items()
        .add_item(wallet().with_image_uri(uri))
        .await
        .unwrap();
    assert!(!h.client.items().is_uploading());

    let paths = h.blobs.paths();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].starts_with("items/") && paths[0].ends_with(".jpg"));
    let (bytes, content_type) = h.blobs.object(&paths[0]).unwrap();
    assert_eq!(content_type, "image/jpeg");
    assert_eq!(lostfound_sync::image_dimensions(&bytes).unwrap(), (1200, 600));

    let state = h.items_until(|s| s.items.len() == 1).await;
    assert_eq!(
        state.items[0].image_uri.as_deref(),
        Some(format!("https://blobs.invalid/{}", paths[0]).as_str())
    );
}

#[tokio::test]
async fn test_undecodable_image_keeps_its_own_format() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.png");
    let mut truncated = b"\x89PNG\r\n\x1a\n".to_vec();
    truncated.extend_from_slice(b"not really pixels");
    std::fs::write(&path, &truncated).unwrap();

    h.client
        .items()
        .add_item(wallet().with_image_uri(format!("file://{}", path.display())))
        .await
        .unwrap();

    let paths = h.blobs.paths();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].ends_with(".png"), "uploaded as {}", paths[0]);
    let (bytes, content_type) = h.blobs.object(&paths[0]).unwrap();
    assert_eq!(content_type, "image/png");
    assert_eq!(bytes, truncated);
}

#[tokio::test]
async fn test_failed_upload_writes_nothing() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    let dir = tempfile::tempdir().unwrap();
    let uri = png_file(dir.path(), 10, 10);
    h.blobs
        .fail_uploads(Some(RemoteError::new(codes::STORAGE_UNKNOWN, "boom")));
    let writes_before = h.store.writes().len();

    let err = h
        .client
        .items()
        .add_item(wallet().with_image_uri(uri))
        .await
        .unwrap_err();
    assert_eq!(err.remote_code(), Some(codes::STORAGE_UNKNOWN));
    assert!(!h.client.items().is_uploading());
    assert_eq!(h.store.writes().len(), writes_before);
}

#[tokio::test]
async fn test_remote_image_urls_pass_through() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;

    h.client
        .items()
        .add_item(wallet().with_image_uri("https://cdn.example/w.jpg"))
        .await
        .unwrap();
    assert!(h.blobs.paths().is_empty());
    let state = h.items_until(|s| s.items.len() == 1).await;
    assert_eq!(
        state.items[0].image_uri.as_deref(),
        Some("https://cdn.example/w.jpg")
    );
}

#[tokio::test]
async fn test_listener_errors_keep_stale_data() {
    let h = Harness::new();
    h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    h.client.items().add_item(wallet()).await.unwrap();
    h.items_until(|s| s.items.len() == 1).await;

    h.store.break_listeners(
        ITEMS_COLLECTION,
        RemoteError::permission_denied("listener revoked"),
    );
    h.client
        .items()
        .add_item(NewItem::new("Blue Umbrella", "Library", "2025-03-02"))
        .await
        .unwrap();
    settle().await;

    let state = h.client.items().watch().borrow().clone();
    assert!(!state.is_loading);
    assert_eq!(state.items.len(), 1);
    assert_eq!(h.store.documents(ITEMS_COLLECTION).len(), 2);
}

#[tokio::test]
async fn test_stop_closes_the_subscriptions() {
    let h = Harness::new();
    settle().await;
    assert_eq!(h.store.listener_count(), 2);

    h.client.stop();
    settle().await;
    assert_eq!(h.store.listener_count(), 0);
}

#[tokio::test]
async fn test_search_and_my_items() {
    let h = Harness::new();
    let alice = h.sign_in_new_user("Alice", "alice@u.edu", "S1").await;
    h.client
        .items()
        .add_item(wallet().with_category("Personal Items"))
        .await
        .unwrap();
    h.client.session().logout().await.unwrap();
    h.sign_in_new_user("Bob", "bob@u.edu", "S2").await;
    h.client
        .items()
        .add_item(
            NewItem::new("Calculus Textbook", "Library", "2025-03-02")
                .with_description("Stewart, 8th edition")
                .with_category("Books"),
        )
        .await
        .unwrap();

    let state = h.items_until(|s| s.items.len() == 2).await;
    // newest first
    assert_eq!(state.items[0].title, "Calculus Textbook");

    let repo = h.client.items();
    assert_eq!(repo.search(&ItemFilter::new().query("stewart")).len(), 1);
    assert_eq!(repo.search(&ItemFilter::new().category("books")).len(), 1);
    assert_eq!(
        repo.search(&ItemFilter::new().status(ItemStatus::Pending))
            .len(),
        2
    );
    let mine = repo.my_items();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].title, "Calculus Textbook");
    assert_eq!(repo.search(&ItemFilter::new().owner(alice.id)).len(), 1);
}
