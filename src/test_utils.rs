use std::sync::{Mutex, OnceLock};

use crate::persistence::Persistence;
use crate::types::{NewOrder, NewUser, Order, User};

/// Global test utilities
///
/// Provides a process-wide mutex to serialize tests that mutate process-wide
/// state (like environment variables). Use this to avoid flaky tests when
/// `cargo test` runs tests in parallel.
pub fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

pub fn create_test_db() -> Persistence {
    Persistence::in_memory().unwrap()
}

/// A client, an executor and one open order of the client.
pub struct Marketplace {
    pub persistence: Persistence,
    pub client: User,
    pub executor: User,
    pub order: Order,
}

pub fn create_user(persistence: &Persistence, role: &str, login: &str) -> User {
    let role = persistence.get_role_by_name(role).unwrap().unwrap();
    persistence
        .create_user(&NewUser {
            role_id: role.id,
            login: Some(login.to_string()),
            email: format!("{}@example.com", login),
            first_name: login.to_string(),
            last_name: "Tester".to_string(),
        })
        .unwrap()
}

pub fn seed_marketplace() -> Marketplace {
    let persistence = create_test_db();
    let client = create_user(&persistence, "client", "client");
    let executor = create_user(&persistence, "executor", "executor");
    let order = persistence
        .create_order(&NewOrder {
            author_id: client.id,
            name: "Landing page".to_string(),
            description: Some("One page, responsive".to_string()),
            preview_file_id: None,
            start_price: Some(300.0),
        })
        .unwrap();

    Marketplace {
        persistence,
        client,
        executor,
        order,
    }
}
