use anyhow::Result;
use duckdb::types::Value;
use duckdb::{params, Row};

use super::accounts::{user_from_row_at, USER_COLUMNS};
use super::files::{file_from_row, FILE_COLUMNS};
use super::{optional_timestamp_at, timestamp_at, qualified, Persistence};
use crate::error::MarketError;
use crate::soft_delete::ReadOptions;
use crate::types::{Chat, ChatMessage, File, NewChat, NewMessage, User};

const CHAT_COLUMNS: [&str; 7] = [
    "id",
    "name",
    "order_id",
    "client_id",
    "executor_id",
    "created_at",
    "deleted_at",
];

const MESSAGE_COLUMNS: [&str; 7] = [
    "id",
    "chat_id",
    "author_id",
    "text",
    "file_id",
    "created_at",
    "deleted_at",
];

fn chat_from_row(row: &Row<'_>) -> duckdb::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        name: row.get(1)?,
        order_id: row.get(2)?,
        client_id: row.get(3)?,
        executor_id: row.get(4)?,
        created_at: timestamp_at(row, 5)?,
        deleted_at: optional_timestamp_at(row, 6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> duckdb::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        author_id: row.get(2)?,
        text: row.get(3)?,
        file_id: row.get(4)?,
        created_at: timestamp_at(row, 5)?,
        deleted_at: optional_timestamp_at(row, 6)?,
    })
}

impl Persistence {
    // ---------- Chats ----------

    pub fn create_chat(&self, new: &NewChat) -> Result<Chat> {
        if new.client_id == new.executor_id {
            return Err(MarketError::invalid("a chat needs two different participants").into());
        }
        let order = self
            .get_order(new.order_id, ReadOptions::live())?
            .ok_or_else(|| MarketError::not_found("Order", new.order_id))?;
        if order.author_id != new.client_id {
            return Err(MarketError::invalid("the client must be the author of the order").into());
        }
        for user_id in [new.client_id, new.executor_id] {
            if self.get_user(user_id)?.is_none() {
                return Err(MarketError::not_found("User", user_id).into());
            }
        }

        let id: i64 = {
            let conn = self.conn();
            conn.query_row(
                "INSERT INTO chats (name, order_id, client_id, executor_id) \
                 VALUES (?, ?, ?, ?) RETURNING id",
                params![new.name, new.order_id, new.client_id, new.executor_id],
                |row| row.get(0),
            )?
        };
        self.get_chat(id)?
            .ok_or_else(|| MarketError::not_found("Chat", id).into())
    }

    pub fn get_chat(&self, id: i64) -> Result<Option<Chat>> {
        self.fetch_one(
            self.select("chats", "c")
                .columns(qualified("c", &CHAT_COLUMNS))
                .filter("c.id = ?", [Value::BigInt(id)]),
            chat_from_row,
        )
    }

    pub fn chats_for_user(&self, user_id: i64) -> Result<Vec<Chat>> {
        self.fetch_all(
            self.select("chats", "c")
                .columns(qualified("c", &CHAT_COLUMNS))
                .filter(
                    "c.client_id = ? OR c.executor_id = ?",
                    [Value::BigInt(user_id), Value::BigInt(user_id)],
                )
                .order_by("c.id"),
            chat_from_row,
        )
    }

    /// Client and executor of a live chat. None if either of them is deleted.
    pub fn chat_participants(&self, chat_id: i64) -> Result<Option<(User, User)>> {
        let width = USER_COLUMNS.len();
        self.fetch_one(
            self.select("chats", "c")
                .columns(qualified("client", &USER_COLUMNS))
                .columns(qualified("executor", &USER_COLUMNS))
                .join("c", "client", "client")
                .join("c", "executor", "executor")
                .filter("c.id = ?", [Value::BigInt(chat_id)]),
            |row| Ok((user_from_row_at(row, 0)?, user_from_row_at(row, width)?)),
        )
    }

    // ---------- Messages ----------

    pub fn send_message(&self, chat_id: i64, new: &NewMessage) -> Result<ChatMessage> {
        let chat = self
            .get_chat(chat_id)?
            .ok_or_else(|| MarketError::not_found("Chat", chat_id))?;
        if chat.counterpart(new.author_id).is_none() {
            return Err(MarketError::invalid(format!(
                "user #{} does not take part in chat #{}",
                new.author_id, chat_id
            ))
            .into());
        }
        let has_text = new.text.as_deref().map(|t| !t.trim().is_empty()).unwrap_or(false);
        if !has_text && new.file_id.is_none() {
            return Err(MarketError::invalid("a message needs text or an attachment").into());
        }
        if let Some(file_id) = new.file_id {
            if self.get_file(file_id)?.is_none() {
                return Err(MarketError::not_found("File", file_id).into());
            }
        }

        let id: i64 = {
            let conn = self.conn();
            conn.query_row(
                "INSERT INTO messages (chat_id, author_id, text, file_id) \
                 VALUES (?, ?, ?, ?) RETURNING id",
                params![chat_id, new.author_id, new.text, new.file_id],
                |row| row.get(0),
            )?
        };
        self.get_message(id)?
            .ok_or_else(|| MarketError::not_found("Message", id).into())
    }

    pub fn get_message(&self, id: i64) -> Result<Option<ChatMessage>> {
        self.fetch_one(
            self.select("messages", "m")
                .columns(qualified("m", &MESSAGE_COLUMNS))
                .filter("m.id = ?", [Value::BigInt(id)]),
            message_from_row,
        )
    }

    /// Messages of a chat in posting order. With `include_deleted`, deleted
    /// messages and messages of a deleted chat are returned as well.
    pub fn chat_messages(&self, chat_id: i64, options: ReadOptions) -> Result<Vec<ChatMessage>> {
        self.fetch_all(
            self.select("messages", "m")
                .columns(qualified("m", &MESSAGE_COLUMNS))
                .join("m", "chat", "c")
                .filter("c.id = ?", [Value::BigInt(chat_id)])
                .order_by("m.created_at")
                .order_by("m.id")
                .options(options),
            message_from_row,
        )
    }

    /// The file attached to a message, even if the file itself was deleted.
    pub fn message_attachment(&self, message_id: i64) -> Result<Option<File>> {
        self.fetch_one(
            self.select("messages", "m")
                .columns(qualified("f", &FILE_COLUMNS))
                .join("m", "file", "f")
                .filter("m.id = ?", [Value::BigInt(message_id)]),
            file_from_row,
        )
    }

    pub fn delete_message(&self, id: i64) -> Result<bool> {
        self.soft_delete::<ChatMessage>(id, None)
    }
}
