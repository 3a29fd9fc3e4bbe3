use anyhow::Result;
use duckdb::types::Value;
use duckdb::{params, Row};

use super::{optional_timestamp_at, timestamp_at, qualified, Persistence};
use crate::error::MarketError;
use crate::soft_delete::ReadOptions;
use crate::types::{NewUser, Role, Skill, User, UserSkill};

pub(crate) const ROLE_COLUMNS: [&str; 6] =
    ["id", "name", "description", "is_core", "created_at", "deleted_at"];

pub(crate) const USER_COLUMNS: [&str; 8] = [
    "id",
    "role_id",
    "login",
    "email",
    "first_name",
    "last_name",
    "created_at",
    "deleted_at",
];

pub(crate) const SKILL_COLUMNS: [&str; 5] = ["id", "name", "description", "created_at", "deleted_at"];

const USER_SKILL_COLUMNS: [&str; 5] = ["id", "user_id", "skill_id", "created_at", "deleted_at"];

pub(crate) fn role_from_row(row: &Row<'_>) -> duckdb::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_core: row.get(3)?,
        created_at: timestamp_at(row, 4)?,
        deleted_at: optional_timestamp_at(row, 5)?,
    })
}

pub(crate) fn user_from_row(row: &Row<'_>) -> duckdb::Result<User> {
    user_from_row_at(row, 0)
}

/// Map a user whose columns start at index `base`.
pub(crate) fn user_from_row_at(row: &Row<'_>, base: usize) -> duckdb::Result<User> {
    Ok(User {
        id: row.get(base)?,
        role_id: row.get(base + 1)?,
        login: row.get(base + 2)?,
        email: row.get(base + 3)?,
        first_name: row.get(base + 4)?,
        last_name: row.get(base + 5)?,
        created_at: timestamp_at(row, base + 6)?,
        deleted_at: optional_timestamp_at(row, base + 7)?,
    })
}

pub(crate) fn skill_from_row(row: &Row<'_>) -> duckdb::Result<Skill> {
    Ok(Skill {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: timestamp_at(row, 3)?,
        deleted_at: optional_timestamp_at(row, 4)?,
    })
}

fn user_skill_from_row(row: &Row<'_>) -> duckdb::Result<UserSkill> {
    Ok(UserSkill {
        id: row.get(0)?,
        user_id: row.get(1)?,
        skill_id: row.get(2)?,
        created_at: timestamp_at(row, 3)?,
        deleted_at: optional_timestamp_at(row, 4)?,
    })
}

impl Persistence {
    // ---------- Roles ----------

    pub fn create_role(&self, name: &str, description: Option<&str>) -> Result<Role> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MarketError::invalid("role name must not be empty").into());
        }
        // Names stay reserved after deletion.
        let id = self.insert_unique(
            self.select("roles", "r")
                .column("r.id")
                .filter("r.name = ?", [Value::Text(name.to_string())])
                .options(ReadOptions::with_deleted()),
            MarketError::conflict(format!("role '{}' already exists", name)),
            |tx| {
                tx.query_row(
                    "INSERT INTO roles (name, description) VALUES (?, ?) RETURNING id",
                    params![name, description],
                    |row| row.get(0),
                )
            },
        )?;
        self.get_role(id)?
            .ok_or_else(|| MarketError::not_found("Role", id).into())
    }

    pub fn get_role(&self, id: i64) -> Result<Option<Role>> {
        self.fetch_one(
            self.select("roles", "r")
                .columns(qualified("r", &ROLE_COLUMNS))
                .filter("r.id = ?", [Value::BigInt(id)]),
            role_from_row,
        )
    }

    pub fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        self.fetch_one(
            self.select("roles", "r")
                .columns(qualified("r", &ROLE_COLUMNS))
                .filter("r.name = ?", [Value::Text(name.to_string())]),
            role_from_row,
        )
    }

    pub fn list_roles(&self) -> Result<Vec<Role>> {
        self.fetch_all(
            self.select("roles", "r")
                .columns(qualified("r", &ROLE_COLUMNS))
                .order_by("r.id"),
            role_from_row,
        )
    }

    // ---------- Users ----------

    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        if !new.email.contains('@') {
            return Err(MarketError::invalid(format!("'{}' is not an email address", new.email)).into());
        }
        if new.first_name.trim().is_empty() || new.last_name.trim().is_empty() {
            return Err(MarketError::invalid("first and last name are required").into());
        }
        if self.get_role(new.role_id)?.is_none() {
            return Err(MarketError::not_found("Role", new.role_id).into());
        }

        let mut taken = self
            .select("users", "u")
            .column("u.id")
            .options(ReadOptions::with_deleted());
        taken = match &new.login {
            Some(login) => taken.filter(
                "u.email = ? OR u.login = ?",
                [Value::Text(new.email.clone()), Value::Text(login.clone())],
            ),
            None => taken.filter("u.email = ?", [Value::Text(new.email.clone())]),
        };
        let id = self.insert_unique(
            taken,
            MarketError::conflict("email or login is already registered"),
            |tx| {
                tx.query_row(
                    "INSERT INTO users (role_id, login, email, first_name, last_name) \
                     VALUES (?, ?, ?, ?, ?) RETURNING id",
                    params![
                        new.role_id,
                        new.login,
                        new.email,
                        new.first_name,
                        new.last_name
                    ],
                    |row| row.get(0),
                )
            },
        )?;
        tracing::debug!("Created user #{} ({})", id, new.email);
        self.get_user(id)?
            .ok_or_else(|| MarketError::not_found("User", id).into())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.find_user(id, ReadOptions::live())
    }

    pub fn find_user(&self, id: i64, options: ReadOptions) -> Result<Option<User>> {
        self.fetch_one(
            self.select("users", "u")
                .columns(qualified("u", &USER_COLUMNS))
                .filter("u.id = ?", [Value::BigInt(id)])
                .options(options),
            user_from_row,
        )
    }

    pub fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<User>> {
        self.fetch_all(
            self.select("users", "u")
                .columns(qualified("u", &USER_COLUMNS))
                .order_by("u.id")
                .limit(limit)
                .offset(skip),
            user_from_row,
        )
    }

    /// Live users whose live role is called `role_name`.
    pub fn users_with_role(&self, role_name: &str) -> Result<Vec<User>> {
        self.fetch_all(
            self.select("users", "u")
                .columns(qualified("u", &USER_COLUMNS))
                .join("u", "role", "r")
                .filter("r.name = ?", [Value::Text(role_name.to_string())])
                .order_by("u.id"),
            user_from_row,
        )
    }

    // ---------- Skills ----------

    pub fn create_skill(&self, name: &str, description: Option<&str>) -> Result<Skill> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MarketError::invalid("skill name must not be empty").into());
        }
        let id = self.insert_unique(
            self.select("skills", "s")
                .column("s.id")
                .filter("s.name = ?", [Value::Text(name.to_string())])
                .options(ReadOptions::with_deleted()),
            MarketError::conflict(format!("skill '{}' already exists", name)),
            |tx| {
                tx.query_row(
                    "INSERT INTO skills (name, description) VALUES (?, ?) RETURNING id",
                    params![name, description],
                    |row| row.get(0),
                )
            },
        )?;
        self.get_skill(id)?
            .ok_or_else(|| MarketError::not_found("Skill", id).into())
    }

    pub fn get_skill(&self, id: i64) -> Result<Option<Skill>> {
        self.fetch_one(
            self.select("skills", "s")
                .columns(qualified("s", &SKILL_COLUMNS))
                .filter("s.id = ?", [Value::BigInt(id)]),
            skill_from_row,
        )
    }

    pub fn get_skill_by_name(&self, name: &str) -> Result<Option<Skill>> {
        self.fetch_one(
            self.select("skills", "s")
                .columns(qualified("s", &SKILL_COLUMNS))
                .filter("s.name = ?", [Value::Text(name.to_string())]),
            skill_from_row,
        )
    }

    pub fn list_skills(&self) -> Result<Vec<Skill>> {
        self.fetch_all(
            self.select("skills", "s")
                .columns(qualified("s", &SKILL_COLUMNS))
                .order_by("s.name"),
            skill_from_row,
        )
    }

    /// Link a user to a skill. Linking twice returns the existing live link.
    pub fn add_user_skill(&self, user_id: i64, skill_id: i64) -> Result<UserSkill> {
        if self.get_user(user_id)?.is_none() {
            return Err(MarketError::not_found("User", user_id).into());
        }
        if self.get_skill(skill_id)?.is_none() {
            return Err(MarketError::not_found("Skill", skill_id).into());
        }
        let (id, _) = self.find_or_insert(
            self.select("user_skills", "us")
                .column("us.id")
                .filter(
                    "us.user_id = ? AND us.skill_id = ?",
                    [Value::BigInt(user_id), Value::BigInt(skill_id)],
                ),
            |tx| {
                tx.query_row(
                    "INSERT INTO user_skills (user_id, skill_id) VALUES (?, ?) RETURNING id",
                    params![user_id, skill_id],
                    |row| row.get(0),
                )
            },
        )?;
        self.fetch_one(
            self.select("user_skills", "us")
                .columns(qualified("us", &USER_SKILL_COLUMNS))
                .filter("us.id = ?", [Value::BigInt(id)]),
            user_skill_from_row,
        )?
        .ok_or_else(|| MarketError::not_found("UserSkill", id).into())
    }

    /// Soft-delete the link between a user and a skill.
    pub fn remove_user_skill(&self, user_id: i64, skill_id: i64) -> Result<bool> {
        match self.live_user_skill(user_id, skill_id)? {
            Some(link) => self.soft_delete::<UserSkill>(link.id, None),
            None => Ok(false),
        }
    }

    fn live_user_skill(&self, user_id: i64, skill_id: i64) -> Result<Option<UserSkill>> {
        self.fetch_one(
            self.select("user_skills", "us")
                .columns(qualified("us", &USER_SKILL_COLUMNS))
                .filter(
                    "us.user_id = ? AND us.skill_id = ?",
                    [Value::BigInt(user_id), Value::BigInt(skill_id)],
                ),
            user_skill_from_row,
        )
    }

    /// Live skills of a user, through live links only.
    pub fn user_skills(&self, user_id: i64) -> Result<Vec<Skill>> {
        self.fetch_all(
            self.select("users", "u")
                .columns(qualified("s", &SKILL_COLUMNS))
                .join("u", "skills", "s")
                .filter("u.id = ?", [Value::BigInt(user_id)])
                .order_by("s.name"),
            skill_from_row,
        )
    }

    /// Live users holding a skill.
    pub fn skill_holders(&self, skill_id: i64) -> Result<Vec<User>> {
        self.fetch_all(
            self.select("skills", "s")
                .columns(qualified("u", &USER_COLUMNS))
                .join("s", "users", "u")
                .filter("s.id = ?", [Value::BigInt(skill_id)])
                .order_by("u.id"),
            user_from_row,
        )
    }
}
