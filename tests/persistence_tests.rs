use gigboard::config::StorageConfig;
use gigboard::error::MarketError;
use gigboard::persistence::Persistence;
use gigboard::soft_delete::ReadOptions;
use gigboard::test_utils::{create_user, seed_marketplace};
use gigboard::types::{
    Bid, BidStatus, NewBid, NewChat, NewMessage, NewOrder, NewReview, NewUser, OrderSearch,
    OrderStatus, OrderUpdate,
};
use tempfile::tempdir;

fn temp_db_path() -> std::path::PathBuf {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.duckdb");
    // Keep directory alive by leaking it for test duration to avoid drop before use
    Box::leak(Box::new(dir));
    path
}

fn market_error(err: anyhow::Error) -> MarketError {
    err.downcast::<MarketError>().expect("domain error")
}

#[test]
fn db_initializes_and_tables_exist() {
    let path = temp_db_path();
    let p = Persistence::new(&path).expect("init db");
    let conn = p.conn();
    for table in ["users", "orders", "bids", "chats", "messages", "reviews", "notifications"] {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let mut stmt = conn.prepare(&sql).unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 0, "table {} should start empty", table);
    }
}

#[test]
fn reopening_keeps_data_and_seeds_once() {
    let path = temp_db_path();
    let user_id = {
        let p = Persistence::new(&path).unwrap();
        let user = create_user(&p, "client", "alice");
        p.checkpoint().unwrap();
        user.id
    };

    let p = Persistence::new(&path).unwrap();
    assert_eq!(p.list_roles().unwrap().len(), 3);
    assert_eq!(p.get_user(user_id).unwrap().unwrap().email, "alice@example.com");
}

#[test]
fn user_validation_and_conflicts() {
    let p = Persistence::in_memory().unwrap();
    let client = p.get_role_by_name("client").unwrap().unwrap();
    let new_user = |email: &str, login: &str| NewUser {
        role_id: client.id,
        login: Some(login.to_string()),
        email: email.to_string(),
        first_name: "Ann".to_string(),
        last_name: "Lee".to_string(),
    };

    let err = p.create_user(&new_user("no-at-sign", "ann")).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Invalid(_)));

    let ann = p.create_user(&new_user("ann@example.com", "ann")).unwrap();
    assert_eq!(ann.full_name(), "Ann Lee");

    let err = p.create_user(&new_user("ann@example.com", "other")).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Conflict(_)));

    // Deleted accounts keep their email reserved.
    p.soft_delete::<gigboard::types::User>(ann.id, None).unwrap();
    let err = p.create_user(&new_user("ann@example.com", "ann2")).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Conflict(_)));

    let err = p
        .create_user(&NewUser {
            role_id: 999,
            ..new_user("bob@example.com", "bob")
        })
        .unwrap_err();
    assert_eq!(market_error(err), MarketError::not_found("Role", 999));
}

#[test]
fn users_with_role_follow_role_liveness() {
    let p = Persistence::in_memory().unwrap();
    let reviewer = p.create_role("reviewer", Some("Checks deliveries")).unwrap();
    let user = p
        .create_user(&NewUser {
            role_id: reviewer.id,
            login: None,
            email: "rita@example.com".to_string(),
            first_name: "Rita".to_string(),
            last_name: "Moss".to_string(),
        })
        .unwrap();
    assert_eq!(
        p.users_with_role("reviewer").unwrap().iter().map(|u| u.id).collect::<Vec<_>>(),
        vec![user.id]
    );

    p.soft_delete::<gigboard::types::Role>(reviewer.id, None).unwrap();
    assert!(p.users_with_role("reviewer").unwrap().is_empty());
    assert!(p.get_role_by_name("reviewer").unwrap().is_none());
}

#[test]
fn skills_are_seeded_and_links_are_idempotent() {
    let market = seed_marketplace();
    let p = &market.persistence;
    assert!(p.list_skills().unwrap().len() >= 20);

    let rust = p.get_skill_by_name("Rust").unwrap().unwrap();
    let first = p.add_user_skill(market.executor.id, rust.id).unwrap();
    let again = p.add_user_skill(market.executor.id, rust.id).unwrap();
    assert_eq!(first.id, again.id);

    let holders = p.skill_holders(rust.id).unwrap();
    assert_eq!(holders.iter().map(|u| u.id).collect::<Vec<_>>(), vec![market.executor.id]);

    let err = p.create_skill("Rust", None).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Conflict(_)));
    assert!(!p.remove_user_skill(market.client.id, rust.id).unwrap());
}

#[test]
fn order_lifecycle() {
    let market = seed_marketplace();
    let p = &market.persistence;
    assert_eq!(market.order.status, OrderStatus::Active);

    let updated = p
        .update_order(
            market.order.id,
            &OrderUpdate {
                name: Some("Landing page v2".to_string()),
                start_price: Some(450.0),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.name, "Landing page v2");
    assert_eq!(updated.start_price, Some(450.0));
    assert_eq!(updated.description, market.order.description);

    let err = p
        .update_order(
            market.order.id,
            &OrderUpdate {
                start_price: Some(-1.0),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(market_error(err), MarketError::Invalid(_)));

    assert_eq!(p.orders_by_author(market.client.id).unwrap().len(), 1);
    assert_eq!(p.active_orders(0, 10).unwrap().len(), 1);

    p.delete_order(market.order.id).unwrap();
    let err = p.update_order(market.order.id, &OrderUpdate::default()).unwrap_err();
    assert_eq!(market_error(err), MarketError::not_found("Order", market.order.id));
}

#[test]
fn list_orders_pages() {
    let market = seed_marketplace();
    let p = &market.persistence;
    for i in 0..4 {
        p.create_order(&gigboard::types::NewOrder {
            author_id: market.client.id,
            name: format!("Order {}", i),
            description: None,
            preview_file_id: None,
            start_price: None,
        })
        .unwrap();
    }

    let page = p.list_orders(1, 2, ReadOptions::live()).unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].name, "Order 0");
    assert_eq!(page[1].name, "Order 1");
}

#[test]
fn accepting_a_bid_settles_the_order() {
    let market = seed_marketplace();
    let p = &market.persistence;
    let rival = create_user(p, "executor", "rival");

    let bid = |user_id: i64, price: f64| NewBid {
        order_id: market.order.id,
        user_id,
        price: Some(price),
        comment: None,
    };
    let winning = p.create_bid(&bid(market.executor.id, 280.0)).unwrap();
    let losing = p.create_bid(&bid(rival.id, 260.0)).unwrap();

    let accepted = p.accept_bid(winning.id).unwrap();
    assert_eq!(accepted.status, BidStatus::Accepted);
    assert_eq!(p.get_bid(losing.id).unwrap().unwrap().status, BidStatus::Rejected);
    assert_eq!(
        p.get_order(market.order.id, ReadOptions::live()).unwrap().unwrap().status,
        OrderStatus::InProgress
    );

    let winner_notes = p.notifications_for_user(market.executor.id, true).unwrap();
    assert_eq!(winner_notes.len(), 1);
    assert!(winner_notes[0].message.contains("accepted"));
    let rival_notes = p.notifications_for_user(rival.id, true).unwrap();
    assert_eq!(rival_notes.len(), 1);
    assert!(rival_notes[0].message.contains("rejected"));

    assert!(p.mark_notification_read(winner_notes[0].id).unwrap());
    assert!(!p.mark_notification_read(winner_notes[0].id).unwrap());
    assert!(p.notifications_for_user(market.executor.id, true).unwrap().is_empty());

    // Closed orders take no more bids and keep their accepted bid.
    let err = p.accept_bid(winning.id).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Conflict(_)));
    let late = create_user(p, "executor", "late");
    let err = p.create_bid(&bid(late.id, 100.0)).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Conflict(_)));
}

#[test]
fn bid_rules() {
    let market = seed_marketplace();
    let p = &market.persistence;

    let err = p
        .create_bid(&NewBid {
            order_id: market.order.id,
            user_id: market.client.id,
            price: None,
            comment: None,
        })
        .unwrap_err();
    assert!(matches!(market_error(err), MarketError::Invalid(_)));

    let bid = p
        .create_bid(&NewBid {
            order_id: market.order.id,
            user_id: market.executor.id,
            price: None,
            comment: Some("Can start tomorrow".to_string()),
        })
        .unwrap();
    assert_eq!(p.reject_bid(bid.id).unwrap().status, BidStatus::Rejected);
    let err = p.reject_bid(bid.id).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Conflict(_)));
}

#[test]
fn concurrent_duplicates_resolve_to_one_row_and_conflicts() {
    let market = seed_marketplace();
    let p = &market.persistence;

    let outcomes: Vec<anyhow::Result<i64>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| p.create_skill("Kotlin", None).map(|skill| skill.id)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let created: Vec<i64> = outcomes.iter().filter_map(|o| o.as_ref().ok().copied()).collect();
    assert_eq!(created.len(), 1);
    for outcome in outcomes.into_iter().filter(|o| o.is_err()) {
        assert!(matches!(market_error(outcome.unwrap_err()), MarketError::Conflict(_)));
    }

    let rust = p.get_skill_by_name("Rust").unwrap().unwrap();
    let links: Vec<i64> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| p.add_user_skill(market.executor.id, rust.id).unwrap().id))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(links.iter().all(|id| *id == links[0]));
    assert_eq!(p.user_skills(market.executor.id).unwrap().len(), 1);
}

#[test]
fn one_live_bid_per_user_and_order() {
    let market = seed_marketplace();
    let p = &market.persistence;
    let new = NewBid {
        order_id: market.order.id,
        user_id: market.executor.id,
        price: Some(300.0),
        comment: None,
    };

    let first = p.create_bid(&new).unwrap();
    let err = p.create_bid(&new).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Conflict(_)));
    assert_eq!(p.bids_for_order(market.order.id).unwrap().len(), 1);

    // A withdrawn bid no longer blocks a fresh one.
    assert!(p.soft_delete::<Bid>(first.id, None).unwrap());
    let second = p.create_bid(&new).unwrap();
    assert_ne!(second.id, first.id);
}

#[test]
fn new_bid_notifies_order_author() {
    let market = seed_marketplace();
    let p = &market.persistence;
    assert!(p.notifications_for_user(market.client.id, false).unwrap().is_empty());

    let bid = p
        .create_bid(&NewBid {
            order_id: market.order.id,
            user_id: market.executor.id,
            price: Some(120.0),
            comment: None,
        })
        .unwrap();

    let notes = p.notifications_for_user(market.client.id, false).unwrap();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].message.contains(&format!("#{}", bid.id)));
    assert!(notes[0].message.contains(&market.order.name));
    assert!(!notes[0].is_read);
    // The bidder is not notified of their own bid.
    assert!(p.notifications_for_user(market.executor.id, false).unwrap().is_empty());

    // A rejected duplicate leaves no notification behind.
    let _ = p.create_bid(&NewBid {
        order_id: market.order.id,
        user_id: market.executor.id,
        price: Some(99.0),
        comment: None,
    });
    assert_eq!(p.notifications_for_user(market.client.id, false).unwrap().len(), 1);
}

#[test]
fn chats_and_messages() {
    let market = seed_marketplace();
    let p = &market.persistence;

    let err = p
        .create_chat(&NewChat {
            name: None,
            order_id: market.order.id,
            client_id: market.executor.id,
            executor_id: market.client.id,
        })
        .unwrap_err();
    assert!(matches!(market_error(err), MarketError::Invalid(_)));

    let chat = p
        .create_chat(&NewChat {
            name: Some("Landing".to_string()),
            order_id: market.order.id,
            client_id: market.client.id,
            executor_id: market.executor.id,
        })
        .unwrap();
    assert_eq!(p.chats_for_user(market.executor.id).unwrap().len(), 1);

    let (client, executor) = p.chat_participants(chat.id).unwrap().unwrap();
    assert_eq!(client.id, market.client.id);
    assert_eq!(executor.id, market.executor.id);

    let text = |author_id: i64, text: &str| NewMessage {
        author_id,
        text: Some(text.to_string()),
        file_id: None,
    };
    p.send_message(chat.id, &text(market.client.id, "Hello")).unwrap();
    p.send_message(chat.id, &text(market.executor.id, "Hi!")).unwrap();

    let outsider = create_user(p, "executor", "outsider");
    let err = p.send_message(chat.id, &text(outsider.id, "Let me in")).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Invalid(_)));
    let err = p.send_message(chat.id, &text(market.client.id, "   ")).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Invalid(_)));

    let history = p.chat_messages(chat.id, ReadOptions::live()).unwrap();
    let texts: Vec<_> = history.iter().filter_map(|m| m.text.clone()).collect();
    assert_eq!(texts, vec!["Hello", "Hi!"]);

    // A deleted participant hides the pair.
    p.soft_delete::<gigboard::types::User>(market.executor.id, None).unwrap();
    assert!(p.chat_participants(chat.id).unwrap().is_none());
}

#[test]
fn reviews_are_upserted_per_pair() {
    let market = seed_marketplace();
    let p = &market.persistence;
    let review = |grade: i32| NewReview {
        author_id: market.client.id,
        executor_id: market.executor.id,
        grade,
        comment: None,
        file_id: None,
    };

    let err = p.upsert_review(&review(6)).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Invalid(_)));

    let first = p.upsert_review(&review(3)).unwrap();
    let second = p.upsert_review(&review(5)).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.grade, 5);

    let other = create_user(p, "client", "other");
    p.upsert_review(&NewReview {
        author_id: other.id,
        ..review(4)
    })
    .unwrap();

    assert_eq!(p.reviews_for_executor(market.executor.id).unwrap().len(), 2);
    assert_eq!(p.reviews_by_author(market.client.id).unwrap().len(), 1);
    assert_eq!(p.executor_rating(market.executor.id).unwrap(), Some(4.5));

    p.delete_review(second.id).unwrap();
    assert_eq!(p.executor_rating(market.executor.id).unwrap(), Some(4.0));
    assert_eq!(p.executor_rating(market.client.id).unwrap(), None);
}

fn storage_in(dir: &std::path::Path) -> StorageConfig {
    StorageConfig {
        directory: dir.join("uploads"),
        max_file_size: 16,
        allowed_extensions: vec!["png".to_string(), ".pdf".to_string()],
    }
}

#[test]
fn stored_files_land_on_disk() {
    let market = seed_marketplace();
    let p = &market.persistence;
    let dir = tempdir().unwrap();
    let storage = storage_in(dir.path());

    let file = p
        .store_file(&storage, Some(market.client.id), "brief.PDF", b"%PDF-1.7")
        .unwrap();
    assert_eq!(file.name, "brief.PDF");
    assert!(!file.is_image);
    let path = std::path::PathBuf::from(file.path.clone().unwrap());
    assert_eq!(path, storage.directory.join(format!("{}.pdf", file.id)));
    assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7");
    assert_eq!(p.file_contents(file.id).unwrap(), b"%PDF-1.7");

    let image = p.store_file(&storage, None, "logo.png", &[0x89, b'P', b'N', b'G']).unwrap();
    assert!(image.is_image);

    // Metadata-only records have nothing to read back.
    let bare = p.create_file(None, "external.png").unwrap();
    assert_eq!(bare.path, None);
    let err = p.file_contents(bare.id).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Invalid(_)));
}

#[test]
fn store_file_enforces_size_and_extension() {
    let market = seed_marketplace();
    let p = &market.persistence;
    let dir = tempdir().unwrap();
    let storage = storage_in(dir.path());

    let err = p.store_file(&storage, None, "huge.png", &[0u8; 17]).unwrap_err();
    assert!(matches!(market_error(err), MarketError::Invalid(_)));
    let err = p.store_file(&storage, None, "run.sh", b"echo").unwrap_err();
    assert!(matches!(market_error(err), MarketError::Invalid(_)));
    let err = p.store_file(&storage, Some(999), "a.png", b"x").unwrap_err();
    assert!(matches!(market_error(err), MarketError::NotFound { .. }));

    // Nothing was written for the rejected uploads.
    assert!(!storage.directory.exists() || std::fs::read_dir(&storage.directory).unwrap().next().is_none());
    assert!(p.store_file(&storage, None, "edge.png", &[0u8; 16]).is_ok());
}

#[test]
fn order_search_matches_names_and_prices() {
    let market = seed_marketplace();
    let p = &market.persistence;
    let order = |name: &str, price: Option<f64>| NewOrder {
        author_id: market.client.id,
        name: name.to_string(),
        description: None,
        preview_file_id: None,
        start_price: price,
    };
    let cheap = p.create_order(&order("Landing page tweaks", Some(50.0))).unwrap();
    let pricey = p.create_order(&order("New LANDING flow", Some(900.0))).unwrap();
    let gone = p.create_order(&order("Landing archive", Some(70.0))).unwrap();
    p.create_order(&order("100% uptime audit", None)).unwrap();
    p.delete_order(gone.id).unwrap();

    let ids = |search: &OrderSearch| -> Vec<i64> {
        let mut ids: Vec<i64> = p.search_orders(search).unwrap().iter().map(|o| o.id).collect();
        ids.sort_unstable();
        ids
    };

    let mut expected = vec![market.order.id, cheap.id, pricey.id];
    expected.sort_unstable();
    assert_eq!(ids(&OrderSearch::new("landing")), expected);

    let mut bounded = OrderSearch::new("landing");
    bounded.min_price = Some(40.0);
    bounded.max_price = Some(100.0);
    assert_eq!(ids(&bounded), vec![cheap.id]);

    // Wildcards in the query match literally.
    assert_eq!(p.search_orders(&OrderSearch::new("0%")).unwrap().len(), 1);
    assert!(p.search_orders(&OrderSearch::new("_")).unwrap().is_empty());

    // Orders that left the active state drop out of search.
    p.update_order(
        pricey.id,
        &OrderUpdate {
            status: Some(OrderStatus::Completed),
            ..OrderUpdate::default()
        },
    )
    .unwrap();
    assert!(!ids(&OrderSearch::new("landing")).contains(&pricey.id));
}

#[test]
fn order_search_validates_and_caps_paging() {
    let market = seed_marketplace();
    let p = &market.persistence;
    for n in 0..105 {
        p.create_order(&NewOrder {
            author_id: market.client.id,
            name: format!("Bulk job {}", n),
            description: None,
            preview_file_id: None,
            start_price: None,
        })
        .unwrap();
    }

    let mut search = OrderSearch::new("bulk");
    search.limit = 500;
    assert_eq!(p.search_orders(&search).unwrap().len(), 100);
    assert_eq!(p.search_orders(&OrderSearch::new("bulk")).unwrap().len(), 10);

    for bad in [
        OrderSearch::new("  "),
        OrderSearch::new("x".repeat(51)),
        OrderSearch {
            min_price: Some(10.0),
            max_price: Some(5.0),
            ..OrderSearch::new("bulk")
        },
        OrderSearch {
            min_price: Some(-1.0),
            ..OrderSearch::new("bulk")
        },
        OrderSearch {
            skip: -1,
            ..OrderSearch::new("bulk")
        },
    ] {
        let err = p.search_orders(&bad).unwrap_err();
        assert!(matches!(market_error(err), MarketError::Invalid(_)));
    }
}
