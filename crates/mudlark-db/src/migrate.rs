//! Four-phase table migrator and on-disk schema store.
//!
//! At startup, every entity kind's live schema is reconciled against the
//! database exactly once, inside one outer transaction owned by the
//! caller (all-or-nothing startup). The phases are:
//!
//! 1. [`TableMigrator::add_table`] -- validate the live schema against
//!    the schema-of-record on disk, then queue the table for creation or
//!    migration as needed. In update-schema mode, drift is turned into a
//!    guided migration-authoring flow; in production mode it is fatal.
//! 2. [`TableMigrator::create_tables`] -- `CREATE TABLE` for queued-new
//!    tables and insert their migration-level rows at 0.
//! 3. [`TableMigrator::migrate_tables`] -- apply pending migration
//!    scripts in ascending numeric order and persist the level reached.
//! 4. [`TableMigrator::exec_post_create`] -- run deferred foreign-key
//!    constraints for newly created tables only.
//!
//! # On-disk layout
//!
//! - `<data>/schemas/<table>.json` -- the serialized [`TableSchema`] as
//!    last durably recorded; the source of truth for what production
//!    already committed to.
//! - `<data>/migrations/<table>/<level>_<description>.sql` -- ordered
//!    migration scripts; `<level>` is an arbitrary-width non-negative
//!    integer with no mandated zero-padding.

use std::fs;
use std::io::{BufRead, Write as _};
use std::path::{Path, PathBuf};

use sqlx::PgConnection;

use mudlark_schema::{AlterRequest, FieldDef, TableSchema};

/// Name of the system table recording per-table migration levels.
const MIGRATIONS_TABLE: &str = "mud_migrations";

/// Errors that can occur during schema reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// A database operation failed.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// A filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path being read or written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A stored schema file could not be parsed.
    #[error("invalid stored schema at {path}: {source}")]
    InvalidStoredSchema {
        /// The schema file.
        path: PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// The live schema differs from the schema-of-record in production.
    ///
    /// An operator must generate and review a migration script before
    /// deploying; this is never auto-healed.
    #[error("in production, and table {table} has outdated schema")]
    SchemaDrift {
        /// The drifted table.
        table: String,
    },

    /// Scripts were deleted after being applied elsewhere.
    #[error("{table} is already at level {level}, but its migration directory is missing")]
    MissingHistory {
        /// The affected table.
        table: String,
        /// The recorded migration level.
        level: i32,
    },

    /// A migration script file name has no parseable numeric prefix.
    #[error("migration script has no numeric prefix: {path}")]
    BadScriptName {
        /// The offending file.
        path: PathBuf,
    },

    /// A queued table lost its migration-level row mid-startup.
    #[error("migration level row vanished for table {table}")]
    MissingLevelRow {
        /// The affected table.
        table: String,
    },

    /// Reading operator input failed.
    #[error("failed to read operator input: {source}")]
    Input {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// `CREATE TABLE` failed during startup.
    ///
    /// Bad generated schema or lost connectivity; fatal either way.
    #[error("failed to create table {table}: {source}")]
    CreateTable {
        /// The table being created.
        table: String,
        /// The underlying database error.
        source: sqlx::Error,
    },
}

/// How the migrator treats schema drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigratorMode {
    /// First-run / development: proceed without halting on drift.
    Dev,
    /// Interactively author migration scripts for drifted tables and
    /// persist the new schema-of-record.
    UpdateSchema,
    /// Strict: refuse to start with drifted schema.
    Production,
}

/// Source of operator-supplied values during interactive migration.
///
/// Abstracted so the guided flow is testable with scripted answers; the
/// server binary uses [`StdinPrompt`].
pub trait MigrationPrompt {
    /// Ask the operator for one value.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Input`] if input cannot be read.
    fn prompt(&mut self, message: &str) -> Result<String, MigrationError>;
}

/// Prompt implementation reading answers from standard input.
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl MigrationPrompt for StdinPrompt {
    fn prompt(&mut self, message: &str) -> Result<String, MigrationError> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{message}: ").map_err(|source| MigrationError::Input { source })?;
        stdout
            .flush()
            .map_err(|source| MigrationError::Input { source })?;

        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|source| MigrationError::Input { source })?;
        Ok(line.trim_end_matches(['\r', '\n']).to_owned())
    }
}

/// Reads and writes the per-table schema-of-record files.
#[derive(Debug, Clone)]
pub struct SchemaStore {
    dir: PathBuf,
}

impl SchemaStore {
    /// Create a store rooted at `<data>/schemas`.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.json"))
    }

    /// Load the stored schema for a table, if one has been recorded.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] for I/O failures other than the file
    /// being absent, or for unparseable content.
    pub fn load(&self, table: &str) -> Result<Option<TableSchema>, MigrationError> {
        let path = self.path_for(table);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(MigrationError::Io { path, source }),
        };
        let schema = serde_json::from_str(&content)
            .map_err(|source| MigrationError::InvalidStoredSchema { path, source })?;
        Ok(Some(schema))
    }

    /// Overwrite the stored schema for a table.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Io`] if the directory or file cannot be
    /// written.
    pub fn save(&self, schema: &TableSchema) -> Result<(), MigrationError> {
        fs::create_dir_all(&self.dir).map_err(|source| MigrationError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(&schema.name);
        // Stored schemas are always valid JSON values; serialization
        // cannot fail for this type, but the lint policy forbids unwrap.
        let content = serde_json::to_string_pretty(schema).map_err(|source| {
            MigrationError::InvalidStoredSchema {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, content).map_err(|source| MigrationError::Io { path, source })
    }
}

/// A migration script on disk, identified by its numeric level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScriptFile {
    /// Numeric prefix of the file name.
    pub(crate) level: i32,
    /// Full path to the script.
    pub(crate) path: PathBuf,
}

/// Parse the numeric prefix of a script file name.
fn script_level(path: &Path) -> Result<i32, MigrationError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.split('_').next())
        .and_then(|prefix| prefix.parse::<i32>().ok())
        .ok_or_else(|| MigrationError::BadScriptName {
            path: path.to_path_buf(),
        })
}

/// List the scripts for a table with level greater than `current_level`,
/// in ascending numeric order.
///
/// A missing script directory is fine for a table at level 0 (it has no
/// migrations yet) and fatal for anything above (the history was deleted
/// out from under a live table).
pub(crate) fn pending_scripts(
    migrations_dir: &Path,
    table: &str,
    current_level: i32,
) -> Result<Vec<ScriptFile>, MigrationError> {
    let dir = migrations_dir.join(table);
    if !dir.exists() {
        if current_level > 0 {
            return Err(MigrationError::MissingHistory {
                table: table.to_owned(),
                level: current_level,
            });
        }
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(&dir).map_err(|source| MigrationError::Io {
        path: dir.clone(),
        source,
    })?;

    let mut scripts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| MigrationError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = entry.path();
        let level = script_level(&path)?;
        if level > current_level {
            scripts.push(ScriptFile { level, path });
        }
    }
    scripts.sort_by_key(|script| script.level);
    Ok(scripts)
}

/// Count the scripts already on disk for a table (applied or not).
fn script_count(migrations_dir: &Path, table: &str) -> Result<usize, MigrationError> {
    let dir = migrations_dir.join(table);
    if !dir.exists() {
        return Ok(0);
    }
    let entries = fs::read_dir(&dir).map_err(|source| MigrationError::Io {
        path: dir.clone(),
        source,
    })?;
    Ok(entries.count())
}

/// Interactively render alter requests into one migration script.
///
/// Prompts for every operator-supplied placeholder and for the script's
/// description, then writes `<level>_<description>.sql` with statements
/// joined by `;\n`. The level is one past the number of scripts already
/// on disk, so the new script is pending relative to any table whose
/// recorded level matches the old script count.
pub(crate) fn write_migration_script<P: MigrationPrompt>(
    migrations_dir: &Path,
    table: &str,
    requests: &[AlterRequest],
    prompt: &mut P,
) -> Result<PathBuf, MigrationError> {
    tracing::info!(table, "Creating migration script");

    let mut statements: Vec<String> = Vec::new();
    for request in requests {
        if request.input_needed.is_empty() {
            tracing::info!(table, description = %request.description, "auto");
        } else {
            tracing::info!(table, description = %request.description, "input needed");
        }

        let mut sql = request.sql.clone();
        for (token, reason) in &request.input_needed {
            let value = prompt.prompt(reason)?;
            for statement in &mut sql {
                *statement = statement.replace(token, &value);
            }
        }
        statements.extend(sql);
    }

    let dir = migrations_dir.join(table);
    fs::create_dir_all(&dir).map_err(|source| MigrationError::Io {
        path: dir.clone(),
        source,
    })?;

    let level = script_count(migrations_dir, table)?.saturating_add(1);
    let description = prompt.prompt(&format!("description for {table} migration {level}"))?;
    let path = dir.join(format!("{level}_{description}.sql"));
    fs::write(&path, statements.join(";\n")).map_err(|source| MigrationError::Io {
        path: path.clone(),
        source,
    })?;

    tracing::info!(table, path = %path.display(), "Migration script written");
    Ok(path)
}

/// Reconciles entity table schemas against the database at startup.
///
/// Borrows the caller's connection, which is expected to be inside an
/// open transaction: any phase failure rolls back every table's changes,
/// leaving the database exactly as before the attempt.
pub struct TableMigrator<'c, P: MigrationPrompt> {
    conn: &'c mut PgConnection,
    migrations_dir: PathBuf,
    schema_store: SchemaStore,
    mode: MigratorMode,
    prompt: P,
    new_tables: Vec<TableSchema>,
    migration_queue: Vec<String>,
}

impl<'c, P: MigrationPrompt> TableMigrator<'c, P> {
    /// Create a migrator over the given connection and data directory.
    ///
    /// `data_dir` holds the `schemas/` and `migrations/` subdirectories.
    pub fn new(conn: &'c mut PgConnection, data_dir: &Path, mode: MigratorMode, prompt: P) -> Self {
        Self {
            conn,
            migrations_dir: data_dir.join("migrations"),
            schema_store: SchemaStore::new(data_dir.join("schemas")),
            mode,
            prompt,
            new_tables: Vec::new(),
            migration_queue: Vec::new(),
        }
    }

    /// Create the migrator's own system tables.
    ///
    /// Call before adding any table; safe if the tables already exist.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Db`] on database failure.
    pub async fn create_sys_tables(&mut self) -> Result<(), MigrationError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (\ntable_name text,\nlevel integer\n)"
        ))
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    async fn migration_level(&mut self, table: &str) -> Result<Option<i32>, MigrationError> {
        let row: Option<(i32,)> =
            sqlx::query_as(&format!(
                "SELECT level FROM {MIGRATIONS_TABLE} WHERE table_name = $1"
            ))
            .bind(table)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(row.map(|(level,)| level))
    }

    async fn set_migration_level(&mut self, table: &str, level: i32) -> Result<(), MigrationError> {
        sqlx::query(&format!(
            "UPDATE {MIGRATIONS_TABLE} SET level = $1 WHERE table_name = $2"
        ))
        .bind(level)
        .bind(table)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Phase 1: validate one table's schema and queue follow-up work.
    ///
    /// Compares the live schema against the schema-of-record. On drift:
    /// update-schema mode authors a migration script interactively and
    /// persists the new schema; production mode fails with
    /// [`MigrationError::SchemaDrift`]; dev mode logs and proceeds.
    /// Afterwards the table is queued for creation (no migration-level
    /// row) or migration (pending scripts on disk), or left alone.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] on drift in production, lost script
    /// history, or database/filesystem failure.
    pub async fn add_table(
        &mut self,
        schema: &TableSchema,
        fields: &[FieldDef],
    ) -> Result<(), MigrationError> {
        let table = schema.name.clone();
        let stored = self.schema_store.load(&table)?;
        let drifted = match stored.as_ref() {
            Some(stored) => !stored.diff(fields).1.is_empty(),
            None => true,
        };

        if drifted {
            match self.mode {
                MigratorMode::UpdateSchema => {
                    if let Some(stored) = stored {
                        let (new_schema, requests) = stored.diff(fields);
                        write_migration_script(
                            &self.migrations_dir,
                            &table,
                            &requests,
                            &mut self.prompt,
                        )?;
                        self.schema_store.save(&new_schema)?;
                    } else {
                        // First sighting of this table; record the live
                        // schema as the schema-of-record.
                        self.schema_store.save(schema)?;
                    }
                }
                MigratorMode::Production => {
                    return Err(MigrationError::SchemaDrift { table });
                }
                MigratorMode::Dev => {
                    tracing::warn!(table, "Schema drift ignored (dev mode)");
                }
            }
        }

        match self.migration_level(&table).await? {
            None => {
                tracing::debug!(table, "Queued for creation");
                self.new_tables.push(schema.clone());
            }
            Some(level) => {
                if pending_scripts(&self.migrations_dir, &table, level)?.is_empty() {
                    tracing::debug!(table, level, "Up to date");
                } else {
                    tracing::debug!(table, level, "Queued for migration");
                    self.migration_queue.push(table);
                }
            }
        }
        Ok(())
    }

    /// Phase 2: create every queued-new table.
    ///
    /// Each created table gets a migration-level row initialized to 0.
    /// Returns the number of tables created.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::CreateTable`] if a `CREATE TABLE`
    /// fails; this is fatal for startup.
    pub async fn create_tables(&mut self) -> Result<usize, MigrationError> {
        for schema in &self.new_tables {
            sqlx::query(&schema.create_table_sql())
                .execute(&mut *self.conn)
                .await
                .map_err(|source| MigrationError::CreateTable {
                    table: schema.name.clone(),
                    source,
                })?;
            sqlx::query(&format!(
                "INSERT INTO {MIGRATIONS_TABLE} (table_name, level) VALUES ($1, $2)"
            ))
            .bind(&schema.name)
            .bind(0_i32)
            .execute(&mut *self.conn)
            .await?;
            tracing::info!(table = %schema.name, "Created table");
        }
        Ok(self.new_tables.len())
    }

    /// Phase 3: apply pending migration scripts to queued tables.
    ///
    /// Scripts with a numeric prefix greater than the recorded level run
    /// in ascending order; the highest level reached is persisted.
    /// Returns the number of tables migrated.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] if history is missing, a script cannot
    /// be read, or execution fails.
    pub async fn migrate_tables(&mut self) -> Result<usize, MigrationError> {
        let queue = std::mem::take(&mut self.migration_queue);
        for table in &queue {
            let Some(current_level) = self.migration_level(table).await? else {
                return Err(MigrationError::MissingLevelRow {
                    table: table.clone(),
                });
            };

            let mut reached = current_level;
            for script in pending_scripts(&self.migrations_dir, table, current_level)? {
                let sql = fs::read_to_string(&script.path).map_err(|source| {
                    MigrationError::Io {
                        path: script.path.clone(),
                        source,
                    }
                })?;
                sqlx::raw_sql(&sql).execute(&mut *self.conn).await?;
                tracing::info!(table, level = script.level, "Applied migration script");
                reached = script.level;
            }

            if reached != current_level {
                self.set_migration_level(table, reached).await?;
            }
        }
        self.migration_queue = queue;
        Ok(self.migration_queue.len())
    }

    /// Phase 4: run deferred foreign-key statements for new tables.
    ///
    /// Existing tables' constraints are assumed to already exist or be
    /// handled by their own migration scripts. Returns the number of
    /// statements executed.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Db`] on database failure.
    pub async fn exec_post_create(&mut self) -> Result<usize, MigrationError> {
        let mut count: usize = 0;
        for schema in &self.new_tables {
            for statement in schema.post_create_sql() {
                sqlx::query(&statement).execute(&mut *self.conn).await?;
                count = count.saturating_add(1);
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;

    use mudlark_schema::{ColumnType, FieldDef, TableSchema};

    use super::*;

    /// Prompt with pre-scripted answers, failing when they run out.
    struct ScriptedPrompt {
        answers: VecDeque<String>,
    }

    impl ScriptedPrompt {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|&a| a.to_owned()).collect(),
            }
        }
    }

    impl MigrationPrompt for ScriptedPrompt {
        fn prompt(&mut self, _message: &str) -> Result<String, MigrationError> {
            self.answers.pop_front().ok_or_else(|| MigrationError::Input {
                source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "out of answers"),
            })
        }
    }

    fn widget_schema() -> TableSchema {
        TableSchema::derive(
            "mud_widget",
            &[FieldDef::required("count", ColumnType::Integer)],
        )
        .unwrap()
    }

    #[test]
    fn schema_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SchemaStore::new(dir.path().join("schemas"));
        let schema = widget_schema();

        assert!(store.load("mud_widget").unwrap().is_none());
        store.save(&schema).unwrap();
        assert_eq!(store.load("mud_widget").unwrap(), Some(schema));
    }

    #[test]
    fn schema_store_rejects_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let schemas = dir.path().join("schemas");
        fs::create_dir_all(&schemas).unwrap();
        fs::write(schemas.join("mud_widget.json"), "not json").unwrap();

        let store = SchemaStore::new(schemas);
        let err = store.load("mud_widget").unwrap_err();
        assert!(matches!(err, MigrationError::InvalidStoredSchema { .. }));
    }

    #[test]
    fn missing_script_dir_is_fine_at_level_zero() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = pending_scripts(dir.path(), "mud_widget", 0).unwrap();
        assert!(scripts.is_empty());
    }

    #[test]
    fn missing_script_dir_is_fatal_above_level_zero() {
        let dir = tempfile::tempdir().unwrap();
        let err = pending_scripts(dir.path(), "mud_widget", 3).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::MissingHistory { level: 3, .. }
        ));
    }

    #[test]
    fn scripts_sort_numerically_not_lexicographically() {
        let dir = tempfile::tempdir().unwrap();
        let table_dir = dir.path().join("mud_widget");
        fs::create_dir_all(&table_dir).unwrap();
        fs::write(table_dir.join("10_later.sql"), "").unwrap();
        fs::write(table_dir.join("2_earlier.sql"), "").unwrap();
        fs::write(table_dir.join("1_applied.sql"), "").unwrap();

        let scripts = pending_scripts(dir.path(), "mud_widget", 1).unwrap();
        let levels: Vec<i32> = scripts.iter().map(|s| s.level).collect();
        assert_eq!(levels, vec![2, 10]);
    }

    #[test]
    fn script_without_numeric_prefix_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let table_dir = dir.path().join("mud_widget");
        fs::create_dir_all(&table_dir).unwrap();
        fs::write(table_dir.join("notes.sql"), "").unwrap();

        let err = pending_scripts(dir.path(), "mud_widget", 0).unwrap_err();
        assert!(matches!(err, MigrationError::BadScriptName { .. }));
    }

    #[test]
    fn written_script_substitutes_operator_values() {
        let dir = tempfile::tempdir().unwrap();
        let old = widget_schema();
        let (_, requests) = old.diff(&[
            FieldDef::required("count", ColumnType::Integer),
            FieldDef::required("tag", ColumnType::Text),
        ]);

        // First answer backfills the non-null column, second names the
        // script.
        let mut prompt = ScriptedPrompt::new(&["'unknown'", "add_tag"]);
        let path =
            write_migration_script(dir.path(), "mud_widget", &requests, &mut prompt).unwrap();

        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "1_add_tag.sql");
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "ALTER TABLE mud_widget ADD COLUMN tag text;\n\
             UPDATE mud_widget SET tag = 'unknown';\n\
             ALTER TABLE mud_widget ALTER COLUMN tag SET NOT NULL"
        );
    }

    #[test]
    fn script_levels_continue_from_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let table_dir = dir.path().join("mud_widget");
        fs::create_dir_all(&table_dir).unwrap();
        fs::write(table_dir.join("1_first.sql"), "").unwrap();
        fs::write(table_dir.join("2_second.sql"), "").unwrap();

        let old = widget_schema();
        let (_, requests) = old.diff(&[
            FieldDef::required("count", ColumnType::Integer),
            FieldDef::optional("label", ColumnType::Text),
        ]);

        let mut prompt = ScriptedPrompt::new(&["add_label"]);
        let path =
            write_migration_script(dir.path(), "mud_widget", &requests, &mut prompt).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "3_add_label.sql"
        );
    }
}
