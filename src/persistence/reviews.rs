use anyhow::Result;
use duckdb::types::Value;
use duckdb::{params, Row};

use super::{optional_timestamp_at, timestamp_at, qualified, Persistence};
use crate::error::MarketError;
use crate::types::{NewReview, Review};

const REVIEW_COLUMNS: [&str; 9] = [
    "id",
    "author_id",
    "executor_id",
    "grade",
    "comment",
    "file_id",
    "created_at",
    "updated_at",
    "deleted_at",
];

fn review_from_row(row: &Row<'_>) -> duckdb::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        author_id: row.get(1)?,
        executor_id: row.get(2)?,
        grade: row.get(3)?,
        comment: row.get(4)?,
        file_id: row.get(5)?,
        created_at: timestamp_at(row, 6)?,
        updated_at: timestamp_at(row, 7)?,
        deleted_at: optional_timestamp_at(row, 8)?,
    })
}

impl Persistence {
    /// One live review per author and executor: a second call rewrites the
    /// existing review instead of adding another.
    pub fn upsert_review(&self, new: &NewReview) -> Result<Review> {
        if !(1..=5).contains(&new.grade) {
            return Err(MarketError::invalid("grade must be between 1 and 5").into());
        }
        if new.author_id == new.executor_id {
            return Err(MarketError::invalid("users cannot review themselves").into());
        }
        for user_id in [new.author_id, new.executor_id] {
            if self.get_user(user_id)?.is_none() {
                return Err(MarketError::not_found("User", user_id).into());
            }
        }

        let existing = self.fetch_one(
            self.select("reviews", "r")
                .column("r.id")
                .filter(
                    "r.author_id = ? AND r.executor_id = ?",
                    [Value::BigInt(new.author_id), Value::BigInt(new.executor_id)],
                ),
            |row| row.get::<_, i64>(0),
        )?;

        let id = {
            let conn = self.conn();
            match existing {
                Some(id) => {
                    conn.execute(
                        "UPDATE reviews SET grade = ?, comment = ?, file_id = ?, \
                         updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                        params![new.grade, new.comment, new.file_id, id],
                    )?;
                    id
                }
                None => conn.query_row(
                    "INSERT INTO reviews (author_id, executor_id, grade, comment, file_id) \
                     VALUES (?, ?, ?, ?, ?) RETURNING id",
                    params![
                        new.author_id,
                        new.executor_id,
                        new.grade,
                        new.comment,
                        new.file_id
                    ],
                    |row| row.get(0),
                )?,
            }
        };
        self.get_review(id)?
            .ok_or_else(|| MarketError::not_found("Review", id).into())
    }

    pub fn get_review(&self, id: i64) -> Result<Option<Review>> {
        self.fetch_one(
            self.select("reviews", "r")
                .columns(qualified("r", &REVIEW_COLUMNS))
                .filter("r.id = ?", [Value::BigInt(id)]),
            review_from_row,
        )
    }

    /// Live reviews of a live executor.
    pub fn reviews_for_executor(&self, executor_id: i64) -> Result<Vec<Review>> {
        self.fetch_all(
            self.select("users", "u")
                .columns(qualified("r", &REVIEW_COLUMNS))
                .join("u", "reviews_received", "r")
                .filter("u.id = ?", [Value::BigInt(executor_id)])
                .order_by("r.id"),
            review_from_row,
        )
    }

    pub fn reviews_by_author(&self, author_id: i64) -> Result<Vec<Review>> {
        self.fetch_all(
            self.select("reviews", "r")
                .columns(qualified("r", &REVIEW_COLUMNS))
                .join("r", "author", "a")
                .filter("a.id = ?", [Value::BigInt(author_id)])
                .order_by("r.id"),
            review_from_row,
        )
    }

    /// Mean grade over live reviews, or None without any.
    pub fn executor_rating(&self, executor_id: i64) -> Result<Option<f64>> {
        let rating = self.fetch_one(
            self.select("reviews", "r")
                .column("AVG(r.grade)")
                .filter("r.executor_id = ?", [Value::BigInt(executor_id)]),
            |row| row.get::<_, Option<f64>>(0),
        )?;
        Ok(rating.flatten())
    }

    pub fn delete_review(&self, id: i64) -> Result<bool> {
        self.soft_delete::<Review>(id, None)
    }
}
