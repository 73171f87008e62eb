use rusqlite::Connection;
use tracing::info;

use cerca_types::models::{ActionKind, DELETED_USER_NAME, User};

use crate::error::{DbError, Environ, Result};
use crate::models::CredentialsRow;
use crate::modlog::insert_log;
use crate::{Database, exists};

impl Database {
    // -- Accounts --

    /// Creates an account and returns its id. The reserved deleted-user name
    /// is refused.
    pub fn create_user(&self, name: &str, password_hash: &str) -> Result<i64> {
        self.with_conn(|conn| create_user_in(conn, name, password_hash))
    }

    pub fn check_user_exists(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| user_exists(conn, id))
    }

    pub fn check_username_exists(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            exists(conn, "SELECT 1 FROM users WHERE name = ?1", [name])
                .environ("check username exists")
        })
    }

    pub fn get_user_id(&self, name: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT id FROM users WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .environ("get user id")
        })
    }

    pub fn get_user(&self, id: i64) -> Result<User> {
        self.with_conn(|conn| {
            conn.query_row("SELECT id, name FROM users WHERE id = ?1", [id], |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .environ("get user")
        })
    }

    pub fn get_credentials(&self, name: &str) -> Result<CredentialsRow> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, passwordhash FROM users WHERE name = ?1",
                [name],
                |row| {
                    Ok(CredentialsRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        password_hash: row.get(2)?,
                    })
                },
            )
            .environ("get credentials")
        })
    }

    pub fn update_password_hash(&self, id: i64, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET passwordhash = ?1 WHERE id = ?2",
                    (password_hash, id),
                )
                .environ("update password hash")?;
            if changed == 0 {
                return Err(DbError::not_found("update password hash"));
            }
            Ok(())
        })
    }

    /// Self-service signup: creates the account and records the host and
    /// link it registered from, both or neither.
    pub fn register_user(
        &self,
        name: &str,
        password_hash: &str,
        host: &str,
        link: &str,
    ) -> Result<i64> {
        let now = self.now().timestamp();
        let id = self.with_tx("register user", |tx| {
            let id = create_user_in(tx, name, password_hash)?;
            tx.execute(
                "INSERT INTO registrations (userid, host, link, time) VALUES (?1, ?2, ?3, ?4)",
                (id, host, link, now),
            )
            .environ("register user: insert into registrations table")?;
            Ok(id)
        })?;
        info!("Registered user {} from {}", id, host);
        Ok(id)
    }

    /// Admin-initiated account creation, logged as `ADMIN_ADD_USER`.
    pub fn admin_add_user(&self, admin_id: i64, name: &str, password_hash: &str) -> Result<i64> {
        let now = self.now().timestamp();
        let id = self.with_tx("admin add user", |tx| {
            let id = create_user_in(tx, name, password_hash)?;
            insert_log(tx, admin_id, Some(id), ActionKind::AdminAddUser, now)?;
            Ok(id)
        })?;
        info!("Admin {} created user {}", admin_id, id);
        Ok(id)
    }

    /// Replaces a user's password hash on an admin's behalf, logged as
    /// `RESETPW`.
    pub fn admin_reset_password(
        &self,
        admin_id: i64,
        user_id: i64,
        password_hash: &str,
    ) -> Result<()> {
        const ENVIRON: &str = "admin reset password";
        if user_id == self.deleted_user_id {
            return Err(DbError::precondition(ENVIRON, "user is reserved"));
        }
        let now = self.now().timestamp();
        self.with_tx(ENVIRON, |tx| {
            let changed = tx
                .execute(
                    "UPDATE users SET passwordhash = ?1 WHERE id = ?2",
                    (password_hash, user_id),
                )
                .environ("admin reset password: update users")?;
            if changed == 0 {
                return Err(DbError::not_found(ENVIRON));
            }
            insert_log(tx, admin_id, Some(user_id), ActionKind::ResetPw, now)?;
            Ok(())
        })?;
        info!("Admin {} reset the password of user {}", admin_id, user_id);
        Ok(())
    }

    // -- Admins --

    pub fn is_admin(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| is_admin(conn, id))
    }

    /// All admins, ordered by name.
    pub fn admins(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT u.id, u.name FROM users u
                     INNER JOIN admins a ON a.id = u.id
                     ORDER BY u.name",
                )
                .environ("get admins")?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .environ("get admins")?;

            Ok(rows)
        })
    }

    pub fn add_admin(&self, id: i64) -> Result<()> {
        let deleted_id = self.deleted_user_id;
        self.with_tx("add admin", |tx| add_admin_in(tx, deleted_id, id))?;
        info!("User {} is now an admin", id);
        Ok(())
    }

    pub fn demote_admin(&self, id: i64) -> Result<()> {
        self.with_tx("demote admin", |tx| demote_admin_in(tx, id))?;
        info!("User {} is no longer an admin", id);
        Ok(())
    }

    /// Whether privileged actions need a second admin. Derived from the
    /// admins table on every call.
    pub fn quorum_active(&self) -> Result<bool> {
        self.with_conn(quorum_active_in)
    }
}

fn create_user_in(conn: &Connection, name: &str, password_hash: &str) -> Result<i64> {
    if name == DELETED_USER_NAME {
        return Err(DbError::precondition("create user", "name is reserved"));
    }
    let inserted = conn.query_row(
        "INSERT INTO users (name, passwordhash) VALUES (?1, ?2) RETURNING id",
        (name, password_hash),
        |row| row.get(0),
    );
    match inserted {
        // A concurrent signup took the name between the caller's check and here.
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(DbError::precondition("create user", "name is taken"))
        }
        other => other.environ("create user: insert into users table"),
    }
}

pub(crate) fn quorum_active_in(conn: &Connection) -> Result<bool> {
    let admins: i64 = conn
        .query_row("SELECT COUNT(*) FROM admins", [], |row| row.get(0))
        .environ("quorum active")?;
    Ok(admins >= 2)
}

pub(crate) fn user_exists(conn: &Connection, id: i64) -> Result<bool> {
    exists(conn, "SELECT 1 FROM users WHERE id = ?1", [id]).environ("check user exists")
}

pub(crate) fn is_admin(conn: &Connection, id: i64) -> Result<bool> {
    exists(conn, "SELECT 1 FROM admins WHERE id = ?1", [id]).environ("is admin")
}

pub(crate) fn add_admin_in(conn: &Connection, deleted_id: i64, id: i64) -> Result<()> {
    if id == deleted_id {
        return Err(DbError::precondition("add admin", "user is reserved"));
    }
    if !user_exists(conn, id)? {
        return Err(DbError::not_found("add admin"));
    }
    if is_admin(conn, id)? {
        return Err(DbError::precondition("add admin", "user is already an admin"));
    }
    conn.execute("INSERT INTO admins (id) VALUES (?1)", [id])
        .environ("add admin: insert into admins table")?;
    Ok(())
}

pub(crate) fn demote_admin_in(conn: &Connection, id: i64) -> Result<()> {
    if !user_exists(conn, id)? {
        return Err(DbError::not_found("demote admin"));
    }
    if !is_admin(conn, id)? {
        return Err(DbError::precondition("demote admin", "user is not an admin"));
    }
    conn.execute("DELETE FROM admins WHERE id = ?1", [id])
        .environ("demote admin: delete from admins table")?;
    Ok(())
}
