use anyhow::Result;
use duckdb::types::Value;
use duckdb::{params, Connection, Row};

use super::accounts::{user_from_row, USER_COLUMNS};
use super::{in_transaction, optional_timestamp_at, timestamp_at, qualified, query_rows, Persistence};
use crate::error::MarketError;
use crate::soft_delete::ReadOptions;
use crate::types::{
    Bid, BidStatus, NewBid, NewOrder, Notification, Order, OrderSearch, OrderStatus, OrderUpdate,
    User,
};

pub(crate) const ORDER_COLUMNS: [&str; 10] = [
    "id",
    "author_id",
    "name",
    "description",
    "preview_file_id",
    "start_price",
    "status",
    "created_at",
    "updated_at",
    "deleted_at",
];

const BID_COLUMNS: [&str; 8] = [
    "id",
    "order_id",
    "user_id",
    "price",
    "comment",
    "status",
    "created_at",
    "deleted_at",
];

/// Largest page `search_orders` returns.
pub const MAX_SEARCH_LIMIT: i64 = 100;

const MAX_SEARCH_QUERY: usize = 50;

const NOTIFICATION_COLUMNS: [&str; 6] =
    ["id", "user_id", "message", "is_read", "created_at", "deleted_at"];

pub(crate) fn order_from_row(row: &Row<'_>) -> duckdb::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        author_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        preview_file_id: row.get(4)?,
        start_price: row.get(5)?,
        status: OrderStatus::from_str(&row.get::<_, String>(6)?),
        created_at: timestamp_at(row, 7)?,
        updated_at: timestamp_at(row, 8)?,
        deleted_at: optional_timestamp_at(row, 9)?,
    })
}

fn bid_from_row(row: &Row<'_>) -> duckdb::Result<Bid> {
    Ok(Bid {
        id: row.get(0)?,
        order_id: row.get(1)?,
        user_id: row.get(2)?,
        price: row.get(3)?,
        comment: row.get(4)?,
        status: BidStatus::from_str(&row.get::<_, String>(5)?),
        created_at: timestamp_at(row, 6)?,
        deleted_at: optional_timestamp_at(row, 7)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> duckdb::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message: row.get(2)?,
        is_read: row.get(3)?,
        created_at: timestamp_at(row, 4)?,
        deleted_at: optional_timestamp_at(row, 5)?,
    })
}

fn insert_notification(conn: &Connection, user_id: i64, message: &str) -> Result<i64> {
    let id = conn.query_row(
        "INSERT INTO notifications (user_id, message) VALUES (?, ?) RETURNING id",
        params![user_id, message],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Escape LIKE wildcards so user input matches literally.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn validate_price(price: Option<f64>) -> Result<()> {
    match price {
        Some(p) if p.is_nan() || p < 0.0 => Err(MarketError::invalid("price must be a non-negative number").into()),
        _ => Ok(()),
    }
}

impl Persistence {
    // ---------- Orders ----------

    pub fn create_order(&self, new: &NewOrder) -> Result<Order> {
        if new.name.trim().is_empty() {
            return Err(MarketError::invalid("order name must not be empty").into());
        }
        validate_price(new.start_price)?;
        if self.get_user(new.author_id)?.is_none() {
            return Err(MarketError::not_found("User", new.author_id).into());
        }
        if let Some(file_id) = new.preview_file_id {
            if self.get_file(file_id)?.is_none() {
                return Err(MarketError::not_found("File", file_id).into());
            }
        }

        let id: i64 = {
            let conn = self.conn();
            conn.query_row(
                "INSERT INTO orders (author_id, name, description, preview_file_id, start_price, status) \
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
                params![
                    new.author_id,
                    new.name.trim(),
                    new.description,
                    new.preview_file_id,
                    new.start_price,
                    OrderStatus::Active.as_str()
                ],
                |row| row.get(0),
            )?
        };
        tracing::debug!("Created order #{} for user #{}", id, new.author_id);
        self.get_order(id, ReadOptions::live())?
            .ok_or_else(|| MarketError::not_found("Order", id).into())
    }

    pub fn get_order(&self, id: i64, options: ReadOptions) -> Result<Option<Order>> {
        self.fetch_one(
            self.select("orders", "o")
                .columns(qualified("o", &ORDER_COLUMNS))
                .filter("o.id = ?", [Value::BigInt(id)])
                .options(options),
            order_from_row,
        )
    }

    pub fn list_orders(&self, skip: i64, limit: i64, options: ReadOptions) -> Result<Vec<Order>> {
        self.fetch_all(
            self.select("orders", "o")
                .columns(qualified("o", &ORDER_COLUMNS))
                .order_by("o.id")
                .limit(limit)
                .offset(skip)
                .options(options),
            order_from_row,
        )
    }

    /// Live orders still open for bids.
    pub fn active_orders(&self, skip: i64, limit: i64) -> Result<Vec<Order>> {
        self.fetch_all(
            self.select("orders", "o")
                .columns(qualified("o", &ORDER_COLUMNS))
                .filter("o.status = ?", [Value::Text(OrderStatus::Active.as_str().to_string())])
                .order_by("o.created_at DESC")
                .order_by("o.id DESC")
                .limit(limit)
                .offset(skip),
            order_from_row,
        )
    }

    /// Open orders whose name contains `search.q`, case-insensitively, within
    /// the optional price bounds. At most [`MAX_SEARCH_LIMIT`] rows per page.
    pub fn search_orders(&self, search: &OrderSearch) -> Result<Vec<Order>> {
        let q = search.q.trim();
        if q.is_empty() || q.chars().count() > MAX_SEARCH_QUERY {
            return Err(MarketError::invalid(format!(
                "search query must be 1 to {} characters",
                MAX_SEARCH_QUERY
            ))
            .into());
        }
        if search.skip < 0 || search.limit < 0 {
            return Err(MarketError::invalid("skip and limit must not be negative").into());
        }
        validate_price(search.min_price)?;
        validate_price(search.max_price)?;
        if let (Some(min), Some(max)) = (search.min_price, search.max_price) {
            if min > max {
                return Err(MarketError::invalid("min_price must not exceed max_price").into());
            }
        }

        let mut select = self
            .select("orders", "o")
            .columns(qualified("o", &ORDER_COLUMNS))
            .filter(
                "o.status = ?",
                [Value::Text(OrderStatus::Active.as_str().to_string())],
            )
            .filter(
                "o.name ILIKE ? ESCAPE '\\'",
                [Value::Text(format!("%{}%", escape_like(q)))],
            );
        if let Some(min) = search.min_price {
            select = select.filter("o.start_price >= ?", [Value::Double(min)]);
        }
        if let Some(max) = search.max_price {
            select = select.filter("o.start_price <= ?", [Value::Double(max)]);
        }
        self.fetch_all(
            select
                .order_by("o.created_at DESC")
                .order_by("o.id DESC")
                .limit(search.limit.min(MAX_SEARCH_LIMIT))
                .offset(search.skip),
            order_from_row,
        )
    }

    /// Live orders of a live author.
    pub fn orders_by_author(&self, author_id: i64) -> Result<Vec<Order>> {
        self.fetch_all(
            self.select("users", "u")
                .columns(qualified("o", &ORDER_COLUMNS))
                .join("u", "orders", "o")
                .filter("u.id = ?", [Value::BigInt(author_id)])
                .order_by("o.id"),
            order_from_row,
        )
    }

    pub fn update_order(&self, id: i64, update: &OrderUpdate) -> Result<Order> {
        let current = self
            .get_order(id, ReadOptions::live())?
            .ok_or_else(|| MarketError::not_found("Order", id))?;

        let name = update.name.as_deref().unwrap_or(&current.name).trim().to_string();
        if name.is_empty() {
            return Err(MarketError::invalid("order name must not be empty").into());
        }
        let description = update.description.clone().or(current.description);
        let start_price = update.start_price.or(current.start_price);
        validate_price(start_price)?;
        let status = update.status.unwrap_or(current.status);

        {
            let conn = self.conn();
            conn.execute(
                "UPDATE orders SET name = ?, description = ?, start_price = ?, status = ?, \
                 updated_at = CURRENT_TIMESTAMP WHERE id = ? AND deleted_at IS NULL",
                params![name, description, start_price, status.as_str(), id],
            )?;
        }
        self.get_order(id, ReadOptions::live())?
            .ok_or_else(|| MarketError::not_found("Order", id).into())
    }

    pub fn delete_order(&self, id: i64) -> Result<bool> {
        self.soft_delete::<Order>(id, None)
    }

    pub fn restore_order(&self, id: i64) -> Result<bool> {
        self.restore::<Order>(id)
    }

    /// Author of a live order, if the author is live too.
    pub fn order_author(&self, order_id: i64) -> Result<Option<User>> {
        self.fetch_one(
            self.select("orders", "o")
                .columns(qualified("a", &USER_COLUMNS))
                .join("o", "author", "a")
                .filter("o.id = ?", [Value::BigInt(order_id)]),
            user_from_row,
        )
    }

    /// Other live orders published by the author of `order_id`.
    pub fn other_orders_by_same_author(&self, order_id: i64) -> Result<Vec<Order>> {
        self.fetch_all(
            self.select("orders", "o")
                .columns(qualified("sibling", &ORDER_COLUMNS))
                .join("o", "author", "a")
                .join("a", "orders", "sibling")
                .filter("o.id = ?", [Value::BigInt(order_id)])
                .condition("sibling.id <> o.id")
                .order_by("sibling.id"),
            order_from_row,
        )
    }

    // ---------- Bids ----------

    pub fn create_bid(&self, new: &NewBid) -> Result<Bid> {
        validate_price(new.price)?;
        let order = self
            .get_order(new.order_id, ReadOptions::live())?
            .ok_or_else(|| MarketError::not_found("Order", new.order_id))?;
        if order.status != OrderStatus::Active {
            return Err(MarketError::conflict(format!("order #{} is not accepting bids", order.id)).into());
        }
        if self.get_user(new.user_id)?.is_none() {
            return Err(MarketError::not_found("User", new.user_id).into());
        }
        if order.author_id == new.user_id {
            return Err(MarketError::invalid("authors cannot bid on their own orders").into());
        }

        let existing_query = self
            .select("bids", "b")
            .column("b.id")
            .filter(
                "b.order_id = ? AND b.user_id = ?",
                [Value::BigInt(new.order_id), Value::BigInt(new.user_id)],
            )
            .limit(1)
            .build()?;

        let id: i64 = {
            let conn = self.conn();
            in_transaction(&conn, |tx| {
                if !query_rows(tx, &existing_query, |row| row.get::<_, i64>(0))?.is_empty() {
                    return Err(MarketError::conflict(format!(
                        "user #{} already has a bid on order #{}",
                        new.user_id, new.order_id
                    ))
                    .into());
                }
                let id: i64 = tx.query_row(
                    "INSERT INTO bids (order_id, user_id, price, comment, status) \
                     VALUES (?, ?, ?, ?, ?) RETURNING id",
                    params![
                        new.order_id,
                        new.user_id,
                        new.price,
                        new.comment,
                        BidStatus::Pending.as_str()
                    ],
                    |row| row.get(0),
                )?;
                insert_notification(
                    tx,
                    order.author_id,
                    &format!("New bid #{} received for your order \"{}\"", id, order.name),
                )?;
                Ok(id)
            })?
        };
        tracing::debug!("User #{} placed bid #{} on order #{}", new.user_id, id, new.order_id);
        self.get_bid(id)?
            .ok_or_else(|| MarketError::not_found("Bid", id).into())
    }

    pub fn get_bid(&self, id: i64) -> Result<Option<Bid>> {
        self.fetch_one(
            self.select("bids", "b")
                .columns(qualified("b", &BID_COLUMNS))
                .filter("b.id = ?", [Value::BigInt(id)]),
            bid_from_row,
        )
    }

    /// Live bids on a live order.
    pub fn bids_for_order(&self, order_id: i64) -> Result<Vec<Bid>> {
        self.fetch_all(
            self.select("orders", "o")
                .columns(qualified("b", &BID_COLUMNS))
                .join("o", "bids", "b")
                .filter("o.id = ?", [Value::BigInt(order_id)])
                .order_by("b.id"),
            bid_from_row,
        )
    }

    /// Live bids placed on any live order of `user_id`.
    pub fn bids_received_by_user(&self, user_id: i64) -> Result<Vec<Bid>> {
        self.fetch_all(
            self.select("users", "u")
                .columns(qualified("b", &BID_COLUMNS))
                .join("u", "orders", "o")
                .join("o", "bids", "b")
                .filter("u.id = ?", [Value::BigInt(user_id)])
                .order_by("b.id"),
            bid_from_row,
        )
    }

    /// Accept a pending bid: the order moves to in-progress, competing pending
    /// bids are rejected and the bidder is notified.
    pub fn accept_bid(&self, bid_id: i64) -> Result<Bid> {
        let bid_query = self
            .select("bids", "b")
            .columns(qualified("b", &BID_COLUMNS))
            .filter("b.id = ?", [Value::BigInt(bid_id)])
            .build()?;

        {
            let conn = self.conn();
            in_transaction(&conn, |tx| {
                let bid = query_rows(tx, &bid_query, bid_from_row)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| MarketError::not_found("Bid", bid_id))?;
                if bid.status != BidStatus::Pending {
                    return Err(MarketError::conflict(format!(
                        "bid #{} is already {}",
                        bid.id,
                        bid.status.as_str()
                    ))
                    .into());
                }

                let order_query = self
                    .select("orders", "o")
                    .columns(qualified("o", &ORDER_COLUMNS))
                    .filter("o.id = ?", [Value::BigInt(bid.order_id)])
                    .build()?;
                let order = query_rows(tx, &order_query, order_from_row)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| MarketError::not_found("Order", bid.order_id))?;
                if order.status != OrderStatus::Active {
                    return Err(MarketError::conflict(format!(
                        "order #{} is not accepting bids",
                        order.id
                    ))
                    .into());
                }

                let competing_query = self
                    .select("bids", "b")
                    .columns(qualified("b", &BID_COLUMNS))
                    .filter(
                        "b.order_id = ? AND b.id <> ? AND b.status = ?",
                        [
                            Value::BigInt(order.id),
                            Value::BigInt(bid.id),
                            Value::Text(BidStatus::Pending.as_str().to_string()),
                        ],
                    )
                    .build()?;
                let competing = query_rows(tx, &competing_query, bid_from_row)?;

                tx.execute(
                    "UPDATE bids SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                    params![BidStatus::Accepted.as_str(), bid.id],
                )?;
                tx.execute(
                    "UPDATE bids SET status = ?, updated_at = CURRENT_TIMESTAMP \
                     WHERE order_id = ? AND id <> ? AND status = ? AND deleted_at IS NULL",
                    params![
                        BidStatus::Rejected.as_str(),
                        order.id,
                        bid.id,
                        BidStatus::Pending.as_str()
                    ],
                )?;
                tx.execute(
                    "UPDATE orders SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                    params![OrderStatus::InProgress.as_str(), order.id],
                )?;
                insert_notification(
                    tx,
                    bid.user_id,
                    &format!("Your bid on \"{}\" was accepted", order.name),
                )?;
                for other in &competing {
                    insert_notification(
                        tx,
                        other.user_id,
                        &format!("Your bid on \"{}\" was rejected", order.name),
                    )?;
                }
                Ok(())
            })?;
        }

        tracing::info!("Accepted bid #{}", bid_id);
        self.get_bid(bid_id)?
            .ok_or_else(|| MarketError::not_found("Bid", bid_id).into())
    }

    pub fn reject_bid(&self, bid_id: i64) -> Result<Bid> {
        let bid = self
            .get_bid(bid_id)?
            .ok_or_else(|| MarketError::not_found("Bid", bid_id))?;
        if bid.status != BidStatus::Pending {
            return Err(MarketError::conflict(format!(
                "bid #{} is already {}",
                bid.id,
                bid.status.as_str()
            ))
            .into());
        }
        {
            let conn = self.conn();
            conn.execute(
                "UPDATE bids SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                params![BidStatus::Rejected.as_str(), bid_id],
            )?;
        }
        self.get_bid(bid_id)?
            .ok_or_else(|| MarketError::not_found("Bid", bid_id).into())
    }

    // ---------- Notifications ----------

    pub fn notify(&self, user_id: i64, message: &str) -> Result<Notification> {
        if self.get_user(user_id)?.is_none() {
            return Err(MarketError::not_found("User", user_id).into());
        }
        let id = {
            let conn = self.conn();
            insert_notification(&conn, user_id, message)?
        };
        self.fetch_one(
            self.select("notifications", "n")
                .columns(qualified("n", &NOTIFICATION_COLUMNS))
                .filter("n.id = ?", [Value::BigInt(id)]),
            notification_from_row,
        )?
        .ok_or_else(|| MarketError::not_found("Notification", id).into())
    }

    pub fn notifications_for_user(&self, user_id: i64, unread_only: bool) -> Result<Vec<Notification>> {
        let mut select = self
            .select("notifications", "n")
            .columns(qualified("n", &NOTIFICATION_COLUMNS))
            .filter("n.user_id = ?", [Value::BigInt(user_id)])
            .order_by("n.id DESC");
        if unread_only {
            select = select.condition("NOT n.is_read");
        }
        self.fetch_all(select, notification_from_row)
    }

    pub fn mark_notification_read(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE notifications SET is_read = TRUE, updated_at = CURRENT_TIMESTAMP \
             WHERE id = ? AND deleted_at IS NULL AND NOT is_read",
            params![id],
        )?;
        Ok(changed > 0)
    }
}
