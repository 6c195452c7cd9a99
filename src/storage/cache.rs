use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, Row, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::calendar::{CachedHoliday, Calendar, Holiday, SharedUserInfo, SourceType, User};

pub const SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Unknown source type in cache: {0}")]
    UnknownSourceType(String),
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

/// A user row in the local cache. Credentials and login bookkeeping never
/// leave the device.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUser {
    pub user: User,
    pub password_hash: Option<String>,
    pub is_primary: bool,
    pub last_login: Option<i64>,
}

/// A calendar row cached on behalf of `cached_for`, the user whose
/// dashboard it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCalendar {
    pub cached_for: String,
    pub calendar: Calendar,
    pub cached_at: i64,
}

pub struct LocalCache {
    conn: Mutex<Connection>,
}

impl LocalCache {
    pub fn new(conn: Connection) -> Self {
        Self { conn: Mutex::new(conn) }
    }

    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let cache = Self::new(Connection::open(path)?);
        cache.initialize()?;
        Ok(cache)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        let cache = Self::new(Connection::open_in_memory()?);
        cache.initialize()?;
        Ok(cache)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn initialize(&self) -> Result<(), CacheError> {
        let conn = self.conn();
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version != 0 && version != SCHEMA_VERSION {
            tracing::warn!("Local cache schema {} does not match {}, rebuilding", version, SCHEMA_VERSION);
            conn.execute_batch(
                "DROP TABLE IF EXISTS calendars;
                 DROP TABLE IF EXISTS holidays;
                 DROP TABLE IF EXISTS users;",
            )?;
        }

        conn.execute(
            "CREATE TABLE IF NOT EXISTS calendars (
                cached_for TEXT NOT NULL,
                id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                owner_id TEXT NOT NULL,
                shared_with TEXT NOT NULL,
                cached_at INTEGER NOT NULL,
                PRIMARY KEY (cached_for, id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS holidays (
                local_id TEXT PRIMARY KEY,
                original_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                source_type TEXT NOT NULL,
                year INTEGER,
                data TEXT NOT NULL,
                cached_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS holidays_by_source ON holidays (source_type, source_id, year)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                first_name TEXT,
                last_name TEXT,
                password_hash TEXT,
                date_of_birth TEXT,
                location TEXT,
                is_primary INTEGER NOT NULL DEFAULT 0,
                last_login INTEGER
            )",
            [],
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i32, CacheError> {
        Ok(self.conn().query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        let result: SqliteResult<i32> = self.conn().query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        );
        result.unwrap_or(0) > 0
    }

    pub fn upsert_user(&self, stored: &StoredUser) -> Result<(), CacheError> {
        let user = &stored.user;
        self.conn().execute(
            "INSERT OR REPLACE INTO users
                (id, email, first_name, last_name, password_hash, date_of_birth, location, is_primary, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &user.id,
                &user.email,
                &user.first_name,
                &user.last_name,
                &stored.password_hash,
                &user.date_of_birth,
                &user.location,
                stored.is_primary,
                stored.last_login,
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<Option<StoredUser>, CacheError> {
        let conn = self.conn();
        let user = conn
            .query_row(&format!("{} WHERE id = ?1", SELECT_USER), [id], user_from_row)
            .optional()?;
        Ok(user)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<StoredUser>, CacheError> {
        let conn = self.conn();
        let user = conn
            .query_row(
                &format!("{} WHERE lower(trim(email)) = lower(trim(?1)) ORDER BY last_login DESC LIMIT 1", SELECT_USER),
                [email],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_last_login(&self, id: &str, when: i64) -> Result<(), CacheError> {
        self.conn().execute("UPDATE users SET last_login = ?2 WHERE id = ?1", params![id, when])?;
        Ok(())
    }

    pub fn clear_primary_flags(&self) -> Result<(), CacheError> {
        self.conn().execute("UPDATE users SET is_primary = 0 WHERE is_primary != 0", [])?;
        Ok(())
    }

    pub fn get_primary_user(&self) -> Result<Option<StoredUser>, CacheError> {
        let conn = self.conn();
        let user = conn
            .query_row(
                &format!("{} WHERE is_primary != 0 ORDER BY last_login DESC LIMIT 1", SELECT_USER),
                [],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn delete_user(&self, id: &str) -> Result<(), CacheError> {
        self.conn().execute("DELETE FROM users WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Swaps the whole cached calendar set of a user in one transaction,
    /// dropping the custom holidays of calendars no other user still caches.
    pub fn replace_calendars(
        &self,
        cached_for: &str,
        calendars: &[Calendar],
        holidays: &[CachedHoliday],
        cached_at: i64,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM holidays WHERE source_type = ?1
                AND source_id IN (SELECT id FROM calendars WHERE cached_for = ?2)
                AND source_id NOT IN (SELECT id FROM calendars WHERE cached_for != ?2)",
            params![SourceType::Custom.as_str(), cached_for],
        )?;
        tx.execute("DELETE FROM calendars WHERE cached_for = ?1", [cached_for])?;

        for calendar in calendars {
            insert_calendar(&tx, cached_for, calendar, cached_at)?;
        }
        for holiday in holidays {
            insert_holiday(&tx, holiday)?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn upsert_calendar(&self, cached_for: &str, calendar: &Calendar, cached_at: i64) -> Result<(), CacheError> {
        let conn = self.conn();
        insert_calendar(&conn, cached_for, calendar, cached_at)
    }

    pub fn get_calendars(&self, cached_for: &str) -> Result<Vec<CachedCalendar>, CacheError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT cached_for, id, title, description, owner_id, shared_with, cached_at
             FROM calendars WHERE cached_for = ?1 ORDER BY title, id",
        )?;
        let rows = stmt.query_map([cached_for], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut calendars = Vec::new();
        for row in rows {
            let (cached_for, id, title, description, owner_id, shared_with, cached_at) = row?;
            let shared_with: BTreeMap<String, SharedUserInfo> = serde_json::from_str(&shared_with)?;
            calendars.push(CachedCalendar {
                cached_for,
                calendar: Calendar {
                    id,
                    title,
                    description,
                    owner_id,
                    shared_with,
                    holidays: BTreeMap::new(),
                },
                cached_at,
            });
        }
        Ok(calendars)
    }

    pub fn delete_calendar(&self, calendar_id: &str) -> Result<(), CacheError> {
        let conn = self.conn();
        conn.execute("DELETE FROM calendars WHERE id = ?1", [calendar_id])?;
        conn.execute(
            "DELETE FROM holidays WHERE source_type = ?1 AND source_id = ?2",
            params![SourceType::Custom.as_str(), calendar_id],
        )?;
        Ok(())
    }

    pub fn delete_calendars_for(&self, cached_for: &str) -> Result<(), CacheError> {
        self.replace_calendars(cached_for, &[], &[], 0)
    }

    pub fn upsert_holidays(&self, holidays: &[CachedHoliday]) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for holiday in holidays {
            insert_holiday(&tx, holiday)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_holidays(
        &self,
        source_type: SourceType,
        source_id: &str,
        year: Option<i32>,
    ) -> Result<Vec<CachedHoliday>, CacheError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT local_id, source_id, source_type, year, data, cached_at FROM holidays
             WHERE source_type = ?1 AND source_id = ?2 AND (?3 IS NULL OR year = ?3)
             ORDER BY local_id",
        )?;
        let rows = stmt.query_map(params![source_type.as_str(), source_id, year], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i32>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut holidays = Vec::new();
        for row in rows {
            let (local_id, source_id, source_type, year, data, cached_at) = row?;
            let source_type =
                SourceType::parse(&source_type).ok_or(CacheError::UnknownSourceType(source_type))?;
            holidays.push(CachedHoliday {
                local_id,
                holiday: serde_json::from_str(&data)?,
                source_id,
                source_type,
                year,
                cached_at,
            });
        }
        Ok(holidays)
    }

    pub fn delete_holidays(
        &self,
        source_type: SourceType,
        source_id: &str,
        year: Option<i32>,
    ) -> Result<usize, CacheError> {
        let removed = self.conn().execute(
            "DELETE FROM holidays WHERE source_type = ?1 AND source_id = ?2 AND (?3 IS NULL OR year = ?3)",
            params![source_type.as_str(), source_id, year],
        )?;
        Ok(removed)
    }

    pub fn delete_holiday(&self, local_id: &str) -> Result<(), CacheError> {
        self.conn().execute("DELETE FROM holidays WHERE local_id = ?1", [local_id])?;
        Ok(())
    }

    /// Removes every calendar and holiday row cached before `cutoff`.
    pub fn delete_cached_before(&self, cutoff: i64) -> Result<usize, CacheError> {
        let conn = self.conn();
        let holidays = conn.execute("DELETE FROM holidays WHERE cached_at < ?1", [cutoff])?;
        let calendars = conn.execute("DELETE FROM calendars WHERE cached_at < ?1", [cutoff])?;
        Ok(holidays + calendars)
    }
}

const SELECT_USER: &str = "SELECT id, email, first_name, last_name, password_hash, date_of_birth, location, is_primary, last_login FROM users";

fn user_from_row(row: &Row<'_>) -> SqliteResult<StoredUser> {
    Ok(StoredUser {
        user: User {
            id: row.get(0)?,
            email: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            date_of_birth: row.get(5)?,
            location: row.get(6)?,
        },
        password_hash: row.get(4)?,
        is_primary: row.get(7)?,
        last_login: row.get(8)?,
    })
}

fn insert_calendar(conn: &Connection, cached_for: &str, calendar: &Calendar, cached_at: i64) -> Result<(), CacheError> {
    let shared_with = serde_json::to_string(&calendar.shared_with)?;
    conn.execute(
        "INSERT OR REPLACE INTO calendars (cached_for, id, title, description, owner_id, shared_with, cached_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            cached_for,
            &calendar.id,
            &calendar.title,
            &calendar.description,
            &calendar.owner_id,
            shared_with,
            cached_at,
        ],
    )?;
    Ok(())
}

fn insert_holiday(conn: &Connection, cached: &CachedHoliday) -> Result<(), CacheError> {
    let data = serde_json::to_string(&cached.holiday)?;
    conn.execute(
        "INSERT OR REPLACE INTO holidays (local_id, original_id, source_id, source_type, year, data, cached_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &cached.local_id,
            &cached.holiday.id,
            &cached.source_id,
            cached.source_type.as_str(),
            cached.year,
            data,
            cached.cached_at,
        ],
    )?;
    Ok(())
}

pub fn cached_holiday(holiday: Holiday, source_type: SourceType, source_id: &str, year: Option<i32>, cached_at: i64) -> CachedHoliday {
    let local_id = match source_type {
        SourceType::Public => format!("{}_{}_{}", source_id, year.unwrap_or_default(), holiday.id),
        SourceType::Custom => format!("{}_{}", source_id, holiday.id),
    };
    CachedHoliday {
        local_id,
        holiday,
        source_id: source_id.to_string(),
        source_type,
        year,
        cached_at,
    }
}
