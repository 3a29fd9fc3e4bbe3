use anyhow::{Context, Result};
use duckdb::Connection;

pub fn run(conn: &Connection) -> Result<()> {
    // Simple migration system: ensure a schema version table and apply migrations sequentially.
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .context("creating schema_migrations table")?;

    let current = current_version(conn)?;
    let mut migrations_applied = false;

    if current < 1 {
        apply_v1(conn)?;
        set_version(conn, 1)?;
        migrations_applied = true;
    }

    if current < 2 {
        apply_v2(conn)?;
        set_version(conn, 2)?;
        migrations_applied = true;
    }

    if migrations_applied {
        tracing::info!("Database schema at version {}", current_version(conn)?);
    }

    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    let mut stmt = conn.prepare("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")?;
    let v: i64 = stmt.query_row([], |row| row.get(0))?;
    Ok(v)
}

fn set_version(conn: &Connection, v: i64) -> Result<()> {
    conn.execute("INSERT INTO schema_migrations (version) VALUES (?)", [v])?;
    Ok(())
}

fn apply_v1(conn: &Connection) -> Result<()> {
    // Every marketplace table carries created_at / updated_at / deleted_at.
    // Referential integrity is enforced by the repositories: DuckDB rejects
    // updates to rows referenced through FOREIGN KEY constraints.
    conn.execute_batch(
        r#"
        CREATE SEQUENCE IF NOT EXISTS roles_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS users_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS skills_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS user_skills_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS files_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS orders_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS bids_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS chats_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS messages_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS reviews_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS notifications_id_seq START 1;

        CREATE TABLE IF NOT EXISTS roles (
            id BIGINT PRIMARY KEY DEFAULT nextval('roles_id_seq'),
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            is_core BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            deleted_at TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS users (
            id BIGINT PRIMARY KEY DEFAULT nextval('users_id_seq'),
            role_id BIGINT NOT NULL,
            login TEXT UNIQUE,
            email TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            deleted_at TIMESTAMP,
            CHECK (position('@' IN email) > 0)
        );

        CREATE TABLE IF NOT EXISTS skills (
            id BIGINT PRIMARY KEY DEFAULT nextval('skills_id_seq'),
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            deleted_at TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS user_skills (
            id BIGINT PRIMARY KEY DEFAULT nextval('user_skills_id_seq'),
            user_id BIGINT NOT NULL,
            skill_id BIGINT NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            deleted_at TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS files (
            id BIGINT PRIMARY KEY DEFAULT nextval('files_id_seq'),
            author_id BIGINT,
            name TEXT NOT NULL,
            path TEXT,
            is_image BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            deleted_at TIMESTAMP,
            CHECK (name <> '')
        );

        CREATE TABLE IF NOT EXISTS orders (
            id BIGINT PRIMARY KEY DEFAULT nextval('orders_id_seq'),
            author_id BIGINT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            preview_file_id BIGINT,
            start_price DOUBLE,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            deleted_at TIMESTAMP,
            CHECK (name <> ''),
            CHECK (start_price IS NULL OR start_price >= 0)
        );

        CREATE TABLE IF NOT EXISTS bids (
            id BIGINT PRIMARY KEY DEFAULT nextval('bids_id_seq'),
            order_id BIGINT NOT NULL,
            user_id BIGINT NOT NULL,
            price DOUBLE,
            comment TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            deleted_at TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS chats (
            id BIGINT PRIMARY KEY DEFAULT nextval('chats_id_seq'),
            name TEXT,
            order_id BIGINT NOT NULL,
            client_id BIGINT NOT NULL,
            executor_id BIGINT NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            deleted_at TIMESTAMP,
            CHECK (client_id <> executor_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id BIGINT PRIMARY KEY DEFAULT nextval('messages_id_seq'),
            chat_id BIGINT NOT NULL,
            author_id BIGINT NOT NULL,
            text TEXT,
            file_id BIGINT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            deleted_at TIMESTAMP,
            CHECK (COALESCE(text, '') <> '' OR file_id IS NOT NULL)
        );

        CREATE TABLE IF NOT EXISTS reviews (
            id BIGINT PRIMARY KEY DEFAULT nextval('reviews_id_seq'),
            author_id BIGINT NOT NULL,
            executor_id BIGINT NOT NULL,
            grade INTEGER NOT NULL,
            comment TEXT,
            file_id BIGINT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            deleted_at TIMESTAMP,
            CHECK (grade BETWEEN 1 AND 5)
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id BIGINT PRIMARY KEY DEFAULT nextval('notifications_id_seq'),
            user_id BIGINT NOT NULL,
            message TEXT NOT NULL,
            is_read BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            deleted_at TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_user_skills_user ON user_skills(user_id);
        CREATE INDEX IF NOT EXISTS idx_orders_author ON orders(author_id);
        CREATE INDEX IF NOT EXISTS idx_bids_order ON bids(order_id);
        CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id);
        CREATE INDEX IF NOT EXISTS idx_reviews_executor ON reviews(executor_id);
        CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id);
        "#,
    )
    .context("applying v1 schema")?;

    Ok(())
}

fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        INSERT INTO roles (name, description, is_core) VALUES
            ('admin', 'Platform administrator', TRUE),
            ('client', 'Publishes orders and picks executors', TRUE),
            ('executor', 'Bids on orders and delivers work', TRUE);

        INSERT INTO skills (name, description) VALUES
            ('Frontend', 'Web development'),
            ('Backend', 'Web development'),
            ('Fullstack', 'Web development'),
            ('iOS', 'Mobile development'),
            ('Android', 'Mobile development'),
            ('Flutter', 'Mobile development'),
            ('Python', 'Programming'),
            ('Java', 'Programming'),
            ('Go', 'Programming'),
            ('Rust', 'Programming'),
            ('SQL', 'Databases'),
            ('Redis', 'Databases'),
            ('Docker', 'DevOps'),
            ('Kubernetes', 'DevOps'),
            ('CI/CD', 'DevOps'),
            ('Figma', 'Design'),
            ('UI/UX', 'Design'),
            ('Blender', '3D and animation'),
            ('Video editing', 'Video and audio'),
            ('Copywriting', 'Content and marketing'),
            ('Technical translation', 'Content and marketing');
        "#,
    )
    .context("applying v2 seed data (core roles and skills)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 2);

        let roles: i64 = conn
            .query_row("SELECT COUNT(*) FROM roles WHERE is_core", [], |row| row.get(0))
            .unwrap();
        assert_eq!(roles, 3);
    }
}
