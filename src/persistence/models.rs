//! Table registrations and relationships for the marketplace schema.

use crate::soft_delete::{ModelRegistry, Relationship, Secondary};
use crate::types::{
    Bid, Chat, ChatMessage, File, Notification, Order, Review, Role, Skill, User, UserSkill,
};

pub fn model_registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry
        .register::<Role>()
        .register::<User>()
        .register::<Skill>()
        .register::<UserSkill>()
        .register::<File>()
        .register::<Order>()
        .register::<Bid>()
        .register::<Chat>()
        .register::<ChatMessage>()
        .register::<Review>()
        .register::<Notification>();

    // users
    registry
        .relate(Relationship::many_to_one("users", "role", "role_id", "roles"))
        .relate(Relationship::one_to_many("users", "orders", "orders", "author_id"))
        .relate(Relationship::many_to_many(
            "users",
            "skills",
            "skills",
            Secondary::table("user_skills", "user_id", "skill_id"),
        ))
        .relate(Relationship::one_to_many(
            "users",
            "reviews_received",
            "reviews",
            "executor_id",
        ))
        .relate(Relationship::many_to_many(
            "skills",
            "users",
            "users",
            Secondary::table("user_skills", "skill_id", "user_id"),
        ));

    // orders and bids
    registry
        .relate(Relationship::many_to_one("orders", "author", "author_id", "users"))
        .relate(Relationship::many_to_one("orders", "preview", "preview_file_id", "files"))
        .relate(Relationship::one_to_many("orders", "bids", "bids", "order_id"))
        .relate(Relationship::one_to_many("orders", "chats", "chats", "order_id"))
        .relate(Relationship::many_to_one("bids", "order", "order_id", "orders"))
        .relate(Relationship::many_to_one("bids", "bidder", "user_id", "users"));

    // chats
    registry
        .relate(Relationship::many_to_one("chats", "order", "order_id", "orders"))
        .relate(Relationship::many_to_one("chats", "client", "client_id", "users"))
        .relate(Relationship::many_to_one("chats", "executor", "executor_id", "users"))
        .relate(Relationship::one_to_many("chats", "messages", "messages", "chat_id"))
        .relate(Relationship::many_to_one("messages", "chat", "chat_id", "chats"))
        .relate(Relationship::many_to_one("messages", "author", "author_id", "users"))
        .relate(
            Relationship::many_to_one("messages", "file", "file_id", "files").skip_soft_delete(),
        );

    // everything else
    registry
        .relate(Relationship::many_to_one("reviews", "author", "author_id", "users"))
        .relate(Relationship::many_to_one("reviews", "executor", "executor_id", "users"))
        .relate(Relationship::many_to_one("notifications", "user", "user_id", "users"))
        .relate(Relationship::many_to_one("files", "author", "author_id", "users"));

    registry
}
