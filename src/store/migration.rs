//! Typed-state SQL migration builder, carried over from the teacher's
//! `src/backend/migration.rs` almost verbatim, with one addition: a
//! `Query::Raw` variant for idempotent `CREATE TABLE IF NOT EXISTS`
//! statements, so the same builder drives both the initial schema and later
//! `ALTER TABLE` migrations.

use std::fmt::{Debug, Display};
use std::marker::PhantomData;

use rusqlite::{Connection, Result, Transaction};

#[derive(Debug, PartialEq, Eq)]
pub struct MigrationTable {
    pub id: u32,
    pub name: String,
    pub version: String,
    pub applied_at: String,
}

impl MigrationTable {
    fn new(id: u32, name: String, version: String, applied_at: String) -> Self {
        Self {
            id,
            name,
            version,
            applied_at,
        }
    }

    fn get_schema() -> &'static str {
        r"
        CREATE TABLE IF NOT EXISTS migrations(
            id INTEGER PRIMARY KEY,
            name VARCHAR NOT NULL,
            version VARCHAR NOT NULL,
            applied_at  DATETIME DEFAULT (datetime('now'))
        )"
    }
}

pub enum AlterTableCommand<'a> {
    Add { column: &'a str, data_type: &'a str },
}

pub enum Query<'a> {
    AlterTable {
        table_name: &'a str,
        command: AlterTableCommand<'a>,
    },
    /// An idempotent statement (e.g. `CREATE TABLE IF NOT EXISTS ...`) that is
    /// always safe to re-run.
    Raw(&'a str),
}

impl<'a> Display for Query<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlterTable { table_name, command } => match command {
                AlterTableCommand::Add {
                    column: column_to_add,
                    data_type,
                } => write!(f, "ALTER TABLE {} ADD {} {}", table_name, column_to_add, data_type),
            },
            Self::Raw(sql) => write!(f, "{sql}"),
        }
    }
}

impl<'a> Debug for Query<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

#[derive(Debug)]
pub struct Up;

#[derive(Debug)]
pub struct Down;

#[derive(Debug)]
pub struct Building;

#[derive(Debug)]
pub struct Migration<'a, T = Building> {
    version: &'a str,
    queries: &'a [Query<'a>],
    name: &'a str,
    _phantom_data: PhantomData<T>,
}

impl<'a> Migration<'a, Building> {
    pub fn new(queries: &'a [Query<'a>]) -> Self {
        Self {
            version: "",
            queries,
            name: "",
            _phantom_data: PhantomData,
        }
    }

    pub fn with_version(mut self, version: &'a str) -> Self {
        self.version = version;
        self
    }

    pub fn with_name(mut self, name: &'a str) -> Self {
        self.name = name;
        self
    }

    pub fn up(self, connection: &mut Connection) -> Result<Option<Migration<'a, Up>>> {
        let transaction = connection.transaction()?;

        self.create_table_migrations_if_not_exists(&transaction)?;

        if !self.should_run_migration(&transaction)? {
            transaction.commit()?;
            return Ok(None);
        }

        transaction.commit()?;

        let migration: Migration<Up> = Migration::new_up_migration(self.version, self.queries, self.name);

        Ok(Some(migration))
    }
}

impl<'a> Migration<'a, Up> {
    fn new_up_migration(version: &'a str, queries: &'a [Query<'a>], name: &'a str) -> Migration<'a, Up> {
        Migration {
            version,
            queries,
            name,
            _phantom_data: PhantomData,
        }
    }

    pub fn update(self, connection: &mut Connection) -> rusqlite::Result<MigrationTable> {
        let transaction = connection.transaction()?;

        self.run_queries(&transaction)?;

        let migration_saved = self.save_migration(&transaction)?;

        transaction.commit()?;

        Ok(migration_saved)
    }

    #[cfg(test)]
    fn new_up_migration_for_test(version: &'a str, queries: &'a [Query<'a>], name: &'a str) -> Self {
        Self::new_up_migration(version, queries, name)
    }
}

impl<'a, T> Migration<'a, T> {
    fn run_queries(&self, transaction: &Transaction) -> rusqlite::Result<()> {
        for query in self.queries {
            if self.can_run_query(query, transaction)? {
                transaction.execute(&query.to_string(), [])?;
            }
        }
        Ok(())
    }

    fn can_run_query(&self, query: &'a Query<'a>, transaction: &Transaction) -> rusqlite::Result<bool> {
        let can_run_query = match query {
            Query::AlterTable { table_name, command } => match command {
                AlterTableCommand::Add { column, .. } => !self.column_exists(table_name, column, transaction)?,
            },
            Query::Raw(_) => true,
        };

        Ok(can_run_query)
    }

    fn column_exists(&self, table_name: &str, column_name: &str, transaction: &Transaction) -> rusqlite::Result<bool> {
        let query = format!("PRAGMA table_info({table_name})");

        let mut query = transaction.prepare(&query)?;

        let rows = query.query_map([], |row| row.get::<_, String>(1))?;

        for column in rows {
            let column = column?;
            if column == column_name {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn should_run_migration(&self, transaction: &Transaction) -> rusqlite::Result<bool> {
        let query = "SELECT EXISTS(SELECT id FROM migrations WHERE name = ?1 AND version = ?2) as row_exists";
        let migration_exists: bool = transaction.query_row(query, [self.name, self.version], |row| row.get(0))?;

        Ok(!migration_exists)
    }

    fn create_table_migrations_if_not_exists(&self, transaction: &Transaction) -> rusqlite::Result<()> {
        let migrations_table = MigrationTable::get_schema();

        transaction.execute(migrations_table, [])?;

        Ok(())
    }

    fn save_migration(&self, transaction: &Transaction) -> rusqlite::Result<MigrationTable> {
        let insert_query = "INSERT INTO migrations(name, version) VALUES(?1, ?2) RETURNING id, name, version, applied_at";

        let result: MigrationTable = transaction.query_row(insert_query, [self.name, self.version], |row| {
            let migration_saved = MigrationTable::new(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?);

            Ok(migration_saved)
        })?;

        Ok(result)
    }
}

impl<'a> Migration<'a, Down> {
    #[allow(dead_code)]
    pub fn rollback(self, connection: &mut Connection) -> rusqlite::Result<()> {
        let transaction = connection.transaction()?;

        self.run_queries(&transaction)?;

        transaction.commit()?;

        Ok(())
    }
}

const INITIAL_SCHEMA_QUERIES: &[Query<'static>] = &[
    Query::Raw(
        r"CREATE TABLE IF NOT EXISTS downloads (
            id TEXT PRIMARY KEY,
            source_url TEXT NOT NULL,
            source_type TEXT NOT NULL,
            title TEXT NOT NULL,
            author TEXT NULL,
            status TEXT NOT NULL,
            progress_percent INTEGER NOT NULL DEFAULT 0,
            current_chapter INTEGER NOT NULL DEFAULT 0,
            total_chapters INTEGER NULL,
            library_path TEXT NULL,
            destination_path TEXT NULL,
            error_message TEXT NULL,
            plugin_id TEXT NOT NULL DEFAULT 'mangadex',
            created_by TEXT NOT NULL DEFAULT 'user',
            created_at DATETIME NOT NULL DEFAULT (datetime('now')),
            started_at DATETIME NULL,
            completed_at DATETIME NULL,
            last_modified DATETIME NOT NULL DEFAULT (datetime('now')),
            priority INTEGER NOT NULL DEFAULT 5,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3
        )",
    ),
    Query::Raw(
        r"CREATE TABLE IF NOT EXISTS chapter_url_records (
            id TEXT PRIMARY KEY,
            manga_id TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            chapter_number REAL NULL,
            volume INTEGER NULL,
            title TEXT NOT NULL,
            lang TEXT NOT NULL DEFAULT 'en',
            downloaded_at DATETIME NOT NULL DEFAULT (datetime('now')),
            source TEXT NOT NULL,
            upstream_chapter_id TEXT NULL,
            scanlation_group TEXT NULL,
            created_at DATETIME NOT NULL DEFAULT (datetime('now')),
            last_modified DATETIME NOT NULL DEFAULT (datetime('now'))
        )",
    ),
    Query::Raw(
        r"CREATE TABLE IF NOT EXISTS follow_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            enabled BOOLEAN NOT NULL DEFAULT 0,
            check_interval_hours INTEGER NOT NULL DEFAULT 24,
            urls TEXT NULL,
            last_check_time DATETIME NULL
        )",
    ),
    Query::Raw(
        r"CREATE TABLE IF NOT EXISTS plugin_config (
            plugin_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (plugin_id, key)
        )",
    ),
    Query::Raw(
        r"CREATE TABLE IF NOT EXISTS plugin_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            plugin_id TEXT NOT NULL,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            stack_trace TEXT NULL,
            created_at DATETIME NOT NULL DEFAULT (datetime('now'))
        )",
    ),
];

/// Creates the initial schema (idempotent: safe to call on every startup).
pub fn migrate_initial_schema(connection: &mut Connection) -> rusqlite::Result<Option<MigrationTable>> {
    let migration = Migration::new(INITIAL_SCHEMA_QUERIES).with_name("create initial schema").with_version("0.1.0").up(connection)?;

    match migration {
        Some(migration) => Ok(Some(migration.update(connection)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn it_creates_migration_table() {
        let mut connection = Connection::open_in_memory().unwrap();

        let migration: Migration<Up> = Migration::<Up>::new_up_migration_for_test("1.0.1", &[], "some change");

        let transaction = connection.transaction().unwrap();
        migration.create_table_migrations_if_not_exists(&transaction).unwrap();

        let confirmation: String = transaction
            .query_row("SELECT name FROM sqlite_master WHERE type='table' AND name='migrations';", [], |row| row.get(0))
            .unwrap();

        assert_eq!(confirmation, "migrations");
    }

    #[test]
    fn it_runs_the_initial_schema_migration_exactly_once() {
        let mut connection = Connection::open_in_memory().unwrap();

        let first = migrate_initial_schema(&mut connection).unwrap();
        assert!(first.is_some());

        let second = migrate_initial_schema(&mut connection).unwrap();
        assert!(second.is_none());

        connection.execute("INSERT INTO downloads(id, source_url, source_type, title, status) VALUES('id1', 'url', 'remote-catalog', 'title', 'PENDING')", []).unwrap();
    }

    #[test]
    fn it_knows_not_to_run_alter_table_query_for_an_existing_column() {
        let mut connection = Connection::open_in_memory().unwrap();
        connection.execute("CREATE TABLE mangas(id PRIMARY KEY, title VARCHAR NULL)", []).unwrap();

        let queries = [Query::AlterTable {
            table_name: "mangas",
            command: AlterTableCommand::Add {
                column: "title",
                data_type: "VARCHAR NULL",
            },
        }];

        let transaction = connection.transaction().unwrap();
        let migration: Migration<Up> = Migration::new_up_migration_for_test("0.1.0", &queries, "add column title");

        assert!(!migration.can_run_query(&queries[0], &transaction).unwrap());
    }
}
