use rusqlite::OptionalExtension;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use parabot_core::error::ParabotError;

const SCHEMA_VERSION_CURRENT: i64 = 1;

pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
}

pub async fn call_blocking<T, F>(db: Arc<Database>, f: F) -> Result<T, ParabotError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T, ParabotError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(db.as_ref()))
        .await
        .map_err(|e| ParabotError::Task(format!("DB task join error: {e}")))?
}

/// Something that can hand out a consistent copy of the database file.
pub trait LocalSnapshot: Send + Sync {
    fn read_snapshot(&self) -> Result<Vec<u8>, ParabotError>;
}

/// A plain file on disk. Used before the store is open and in tests.
impl LocalSnapshot for PathBuf {
    fn read_snapshot(&self) -> Result<Vec<u8>, ParabotError> {
        Ok(std::fs::read(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    pub guild_id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BirthdayRecord {
    pub id: i64,
    pub guild_id: String,
    pub user_id: String,
    pub day: u32,
    pub month: u32,
}

/// A birthday due today, with the guild's notification channel if one is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BirthdayMatch {
    pub guild_id: String,
    pub user_id: String,
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Range check only: 31/02 passes.
pub fn validate_day_month(day: i64, month: i64) -> Result<(u32, u32), ParabotError> {
    if !(1..=31).contains(&day) || !(1..=12).contains(&month) {
        return Err(ParabotError::InvalidInput(
            "Invalid day or month. Day: 1-31, Month: 1-12.".into(),
        ));
    }
    Ok((day as u32, month as u32))
}

fn apply_schema(conn: &Connection) -> Result<(), ParabotError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS guild_channels (
            guild_id TEXT PRIMARY KEY,
            channel_id TEXT
        );

        CREATE TABLE IF NOT EXISTS birthdays (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guild_id TEXT,
            user_id TEXT,
            day INTEGER,
            month INTEGER
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_birthdays_guild_user
            ON birthdays(guild_id, user_id);",
    )?;
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version != SCHEMA_VERSION_CURRENT {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION_CURRENT)?;
    }
    Ok(())
}

impl Database {
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Open (or create) the database file and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self, ParabotError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        // The mirrored file must hold every commit; WAL would leave them in a side file.
        conn.execute_batch("PRAGMA journal_mode=DELETE;")?;

        let db = Database {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        };
        db.init_schema()?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Safe to call any number of times.
    pub fn init_schema(&self) -> Result<(), ParabotError> {
        let conn = self.lock_conn();
        apply_schema(&conn)
    }

    pub fn upsert_channel_binding(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<(), ParabotError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR REPLACE INTO guild_channels (guild_id, channel_id) VALUES (?1, ?2)",
            params![guild_id, channel_id],
        )?;
        Ok(())
    }

    pub fn get_channel_binding(
        &self,
        guild_id: &str,
    ) -> Result<Option<ChannelBinding>, ParabotError> {
        let conn = self.lock_conn();
        let binding = conn
            .query_row(
                "SELECT guild_id, channel_id FROM guild_channels WHERE guild_id = ?1",
                params![guild_id],
                |row| {
                    Ok(ChannelBinding {
                        guild_id: row.get(0)?,
                        channel_id: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(binding)
    }

    /// Insert a birthday, or overwrite day/month if the user already has one in this guild.
    pub fn upsert_birthday(
        &self,
        guild_id: &str,
        user_id: &str,
        day: i64,
        month: i64,
    ) -> Result<UpsertOutcome, ParabotError> {
        let (day, month) = validate_day_month(day, month)?;

        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM birthdays WHERE guild_id = ?1 AND user_id = ?2",
                params![guild_id, user_id],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE birthdays SET day = ?1, month = ?2 WHERE id = ?3",
                    params![day, month, id],
                )?;
                UpsertOutcome::Updated
            }
            None => {
                tx.execute(
                    "INSERT INTO birthdays (guild_id, user_id, day, month) VALUES (?1, ?2, ?3, ?4)",
                    params![guild_id, user_id, day, month],
                )?;
                UpsertOutcome::Inserted
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    pub fn list_birthdays(&self, guild_id: &str) -> Result<Vec<BirthdayRecord>, ParabotError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, guild_id, user_id, day, month
             FROM birthdays
             WHERE guild_id = ?1
             ORDER BY month ASC, day ASC",
        )?;
        let records = stmt
            .query_map(params![guild_id], |row| {
                Ok(BirthdayRecord {
                    id: row.get(0)?,
                    guild_id: row.get(1)?,
                    user_id: row.get(2)?,
                    day: row.get(3)?,
                    month: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Every birthday on `day`/`month` across all guilds.
    pub fn find_matching(&self, day: u32, month: u32) -> Result<Vec<BirthdayMatch>, ParabotError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT b.guild_id, b.user_id, gc.channel_id
             FROM birthdays b
             LEFT JOIN guild_channels gc ON gc.guild_id = b.guild_id
             WHERE b.day = ?1 AND b.month = ?2
             ORDER BY b.id ASC",
        )?;
        let matches = stmt
            .query_map(params![day, month], |row| {
                Ok(BirthdayMatch {
                    guild_id: row.get(0)?,
                    user_id: row.get(1)?,
                    channel_id: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(matches)
    }
}

impl LocalSnapshot for Database {
    /// Holding the connection lock keeps writers out while the file is copied.
    fn read_snapshot(&self) -> Result<Vec<u8>, ParabotError> {
        let _conn = self.lock_conn();
        Ok(std::fs::read(&self.path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (Database, PathBuf) {
        let dir = std::env::temp_dir().join(format!("parabot_test_{}", uuid::Uuid::new_v4()));
        let db = Database::open(&dir.join("parabot.sqlite")).unwrap();
        (db, dir)
    }

    fn cleanup(dir: &Path) {
        let _ = std::fs::remove_dir_all(dir);
    }

    fn count_schema_objects(db: &Database, kind: &str) -> i64 {
        let conn = db.lock_conn();
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = ?1 AND name NOT LIKE 'sqlite_%'",
            params![kind],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_open_creates_tables() {
        let (db, dir) = test_db();
        assert!(db.list_birthdays("1").unwrap().is_empty());
        assert!(db.find_matching(1, 1).unwrap().is_empty());
        assert!(db.get_channel_binding("1").unwrap().is_none());
        assert_eq!(count_schema_objects(&db, "table"), 2);
        assert_eq!(count_schema_objects(&db, "index"), 1);
        cleanup(&dir);
    }

    #[test]
    fn test_init_schema_is_idempotent() {
        let (db, dir) = test_db();
        db.upsert_birthday("g", "u", 3, 4).unwrap();
        db.init_schema().unwrap();
        db.init_schema().unwrap();
        assert_eq!(count_schema_objects(&db, "table"), 2);
        assert_eq!(count_schema_objects(&db, "index"), 1);
        assert_eq!(db.list_birthdays("g").unwrap().len(), 1);
        cleanup(&dir);
    }

    #[test]
    fn test_reopen_existing_file_keeps_data() {
        let (db, dir) = test_db();
        db.upsert_channel_binding("g", "c").unwrap();
        db.upsert_birthday("g", "u", 10, 10).unwrap();
        let path = db.path().to_path_buf();
        drop(db);

        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.list_birthdays("g").unwrap().len(), 1);
        assert_eq!(
            reopened.get_channel_binding("g").unwrap().unwrap().channel_id,
            "c"
        );
        cleanup(&dir);
    }

    #[test]
    fn test_schema_version_is_tracked() {
        let (db, dir) = test_db();
        let conn = db.lock_conn();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION_CURRENT);
        drop(conn);
        cleanup(&dir);
    }

    #[test]
    fn test_upsert_birthday_updates_instead_of_duplicating() {
        let (db, dir) = test_db();
        assert_eq!(
            db.upsert_birthday("g", "u1", 1, 2).unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            db.upsert_birthday("g", "u1", 5, 6).unwrap(),
            UpsertOutcome::Updated
        );

        let list = db.list_birthdays("g").unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!((list[0].day, list[0].month), (5, 6));
        cleanup(&dir);
    }

    #[test]
    fn test_same_user_in_two_guilds_is_two_records() {
        let (db, dir) = test_db();
        db.upsert_birthday("g1", "u", 1, 1).unwrap();
        db.upsert_birthday("g2", "u", 2, 2).unwrap();
        assert_eq!(db.list_birthdays("g1").unwrap().len(), 1);
        assert_eq!(db.list_birthdays("g2").unwrap().len(), 1);
        cleanup(&dir);
    }

    #[test]
    fn test_upsert_birthday_rejects_out_of_range() {
        let (db, dir) = test_db();
        db.upsert_birthday("g", "u", 7, 7).unwrap();

        let err = db.upsert_birthday("g", "u", 32, 1).unwrap_err();
        assert!(matches!(err, ParabotError::InvalidInput(_)));
        let err = db.upsert_birthday("g", "u", 1, 13).unwrap_err();
        assert!(matches!(err, ParabotError::InvalidInput(_)));
        assert!(db.upsert_birthday("g", "other", 0, 5).is_err());

        let list = db.list_birthdays("g").unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!((list[0].day, list[0].month), (7, 7));
        cleanup(&dir);
    }

    #[test]
    fn test_validate_day_month_is_range_only() {
        assert_eq!(validate_day_month(31, 2).unwrap(), (31, 2));
        assert!(validate_day_month(-1, 5).is_err());
        assert!(validate_day_month(1, 0).is_err());
    }

    #[test]
    fn test_list_birthdays_ordered_by_month_then_day() {
        let (db, dir) = test_db();
        db.upsert_birthday("g", "a", 20, 5).unwrap();
        db.upsert_birthday("g", "b", 3, 1).unwrap();
        db.upsert_birthday("g", "c", 1, 5).unwrap();
        db.upsert_birthday("other", "d", 1, 1).unwrap();

        let users: Vec<String> = db
            .list_birthdays("g")
            .unwrap()
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(users, vec!["b", "c", "a"]);
        cleanup(&dir);
    }

    #[test]
    fn test_channel_binding_is_replaced() {
        let (db, dir) = test_db();
        db.upsert_channel_binding("g", "c1").unwrap();
        db.upsert_channel_binding("g", "c2").unwrap();
        let binding = db.get_channel_binding("g").unwrap().unwrap();
        assert_eq!(binding.channel_id, "c2");
        cleanup(&dir);
    }

    #[test]
    fn test_find_matching_joins_channel_binding() {
        let (db, dir) = test_db();
        db.upsert_channel_binding("A", "chan-a").unwrap();
        db.upsert_birthday("A", "U1", 15, 6).unwrap();

        let today = db.find_matching(15, 6).unwrap();
        assert_eq!(
            today,
            vec![BirthdayMatch {
                guild_id: "A".into(),
                user_id: "U1".into(),
                channel_id: Some("chan-a".into()),
            }]
        );
        assert!(db.find_matching(16, 6).unwrap().is_empty());
        cleanup(&dir);
    }

    #[test]
    fn test_find_matching_without_binding_yields_no_channel() {
        let (db, dir) = test_db();
        db.upsert_birthday("B", "U2", 1, 1).unwrap();
        let matches = db.find_matching(1, 1).unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].channel_id.is_none());
        cleanup(&dir);
    }

    #[test]
    fn test_read_snapshot_matches_file_on_disk() {
        let (db, dir) = test_db();
        db.upsert_birthday("g", "u", 1, 1).unwrap();
        let snapshot = db.read_snapshot().unwrap();
        assert_eq!(snapshot, std::fs::read(db.path()).unwrap());
        assert!(snapshot.starts_with(b"SQLite format 3\0"));
        cleanup(&dir);
    }

    #[tokio::test]
    async fn test_call_blocking_runs_on_pool() {
        let (db, dir) = test_db();
        let db = Arc::new(db);
        let outcome = call_blocking(db.clone(), |db| db.upsert_birthday("g", "u", 2, 2))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        cleanup(&dir);
    }
}
