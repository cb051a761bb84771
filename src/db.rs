use std::path::Path;
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::model::AthleteRecord;
use crate::upsert::{Backend, Table};

pub const DEFAULT_DB_PATH: &str = "data/swimming.sqlite";

/// One SQLite handle. Sessions and batch workers each open their own and
/// drop it when they finish.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Store { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Store { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS athletes (
                athlete_id          INTEGER PRIMARY KEY,
                athlete_name        TEXT,
                age                 INTEGER,
                gender              TEXT CHECK(gender IN ('M','F')),
                country_code        TEXT,
                image_url           TEXT,
                athlete_profile_url TEXT,
                created_at          TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at          TEXT
            );

            CREATE TABLE IF NOT EXISTS results (
                id                INTEGER PRIMARY KEY,
                athlete_id        INTEGER NOT NULL REFERENCES athletes(athlete_id),
                event             TEXT NOT NULL,
                time_text         TEXT NOT NULL,
                race_date         TEXT,
                competition       TEXT,
                record_tags       TEXT,
                medal             TEXT,
                pool_length       TEXT,
                age_at_result     INTEGER,
                comp_country_code TEXT,
                created_at        TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at        TEXT
            );
            -- null key parts must not let duplicates through
            CREATE UNIQUE INDEX IF NOT EXISTS idx_results_key ON results(
                athlete_id, event, time_text, IFNULL(race_date, ''), IFNULL(competition, '')
            );
            CREATE INDEX IF NOT EXISTS idx_results_athlete ON results(athlete_id);

            CREATE TABLE IF NOT EXISTS rankings (
                id                    INTEGER PRIMARY KEY,
                gender                TEXT NOT NULL CHECK(gender IN ('M','F')),
                distance              INTEGER NOT NULL,
                stroke                TEXT NOT NULL,
                pool_configuration    TEXT NOT NULL CHECK(pool_configuration IN ('SCM','LCM')),
                athlete_id            INTEGER NOT NULL,
                race_date             TEXT,
                time_text             TEXT NOT NULL,
                overall_rank          INTEGER NOT NULL DEFAULT 0,
                country_code          TEXT,
                points                INTEGER,
                tag                   TEXT,
                record_tag            TEXT,
                competition           TEXT,
                location_country_code TEXT,
                athlete_name          TEXT,
                age                   INTEGER,
                created_at            TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at            TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_rankings_key ON rankings(
                gender, distance, stroke, pool_configuration, athlete_id,
                IFNULL(race_date, ''), time_text
            );
            CREATE INDEX IF NOT EXISTS idx_rankings_event
                ON rankings(gender, distance, stroke, pool_configuration);
            ",
        )?;
        Ok(())
    }

    // ── Queries ──

    pub fn table_counts(&self) -> Result<Stats, StoreError> {
        let count = |sql: &str| -> Result<usize, StoreError> {
            Ok(self.conn.query_row(sql, [], |r| r.get(0))?)
        };
        Ok(Stats {
            athletes: count("SELECT COUNT(*) FROM athletes")?,
            enriched: count(
                "SELECT COUNT(*) FROM athletes
                 WHERE IFNULL(image_url, '') != '' AND IFNULL(athlete_profile_url, '') != ''",
            )?,
            results: count("SELECT COUNT(*) FROM results")?,
            rankings: count("SELECT COUNT(*) FROM rankings")?,
        })
    }

    /// Named athletes still missing an image or profile URL.
    pub fn athletes_for_enrichment(&self, limit: Option<usize>) -> Result<Vec<(i64, String)>, StoreError> {
        let sql = format!(
            "SELECT athlete_id, athlete_name FROM athletes
             WHERE IFNULL(athlete_name, '') != ''
               AND (IFNULL(image_url, '') = '' OR IFNULL(athlete_profile_url, '') = '')
             ORDER BY athlete_id{}",
            match limit {
                Some(n) => format!(" LIMIT {}", n),
                None => String::new(),
            }
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_athlete(&self, athlete_id: i64) -> Result<Option<AthleteRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT athlete_id, athlete_name, age, gender, country_code, image_url, athlete_profile_url
                 FROM athletes WHERE athlete_id = ?1",
                [athlete_id],
                |row| {
                    Ok(AthleteRecord {
                        athlete_id: row.get(0)?,
                        athlete_name: row.get(1)?,
                        age: row.get(2)?,
                        gender: row.get(3)?,
                        country_code: row.get(4)?,
                        image_url: row.get(5)?,
                        athlete_profile_url: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

// ── Upsert backend ──

fn key_clause(table: &Table, first: usize) -> String {
    table
        .key
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{} IS ?{}", col, first + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

impl Backend for Store {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn load(&mut self, table: &Table, key: &[Value]) -> Result<Option<Vec<Value>>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            table.values.join(", "),
            table.name,
            key_clause(table, 1)
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let n = table.values.len();
        let row = stmt
            .query_row(params_from_iter(key.iter()), |row| {
                (0..n).map(|i| row.get::<_, Value>(i)).collect::<Result<Vec<_>, _>>()
            })
            .optional()?;
        Ok(row)
    }

    fn insert(&mut self, table: &Table, key: &[Value], values: &[Value]) -> Result<(), StoreError> {
        let columns: Vec<&str> = table.key.iter().chain(table.values).copied().collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.name,
            columns.join(", "),
            placeholders.join(", ")
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(key.iter().chain(values)))?;
        Ok(())
    }

    fn update(&mut self, table: &Table, key: &[Value], values: &[Value]) -> Result<(), StoreError> {
        let assignments: Vec<String> = table
            .values
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{} = ?{}", col, i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {}, updated_at = datetime('now') WHERE {}",
            table.name,
            assignments.join(", "),
            key_clause(table, values.len() + 1)
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(values.iter().chain(key)))?;
        Ok(())
    }
}

// ── Stats ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub athletes: usize,
    pub enriched: usize,
    pub results: usize,
    pub rankings: usize,
}
