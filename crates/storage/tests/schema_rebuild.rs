#![forbid(unsafe_code)]

use dm_core::{EngineVersion, PlanError, RebuildPath, RebuildPlan, TableSchema};
use dm_storage::{
    DEFAULT_BUSY_TIMEOUT, EngineError, RebuildError, RebuildOptions, RebuildStage, SchemaEngine,
    SqliteDb, StoreError, SwapStep, rebuild,
};
use rusqlite::Connection;
use std::cell::Cell;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SCENARIO: &str = r#"
    CREATE TABLE T (x INTEGER, y TEXT);
    INSERT INTO T (x, y) VALUES (1, 'a'), (2, 'b');
    CREATE INDEX idx_x ON T (x);
"#;

const FORCE_REBUILD: RebuildOptions = RebuildOptions {
    transactional: true,
    allow_native: false,
};

const UNGUARDED_REBUILD: RebuildOptions = RebuildOptions {
    transactional: false,
    allow_native: false,
};

fn seeded_db(dir: &TempDir, name: &str, ddl: &str) -> PathBuf {
    let path = dir.path().join(name);
    let conn = Connection::open(&path).expect("create db");
    conn.execute_batch(ddl).expect("seed schema");
    path
}

fn open(path: &Path) -> SqliteDb {
    SqliteDb::open(path, DEFAULT_BUSY_TIMEOUT).expect("open db")
}

fn pairs(db: &SqliteDb, sql: &str) -> Vec<(i64, String)> {
    let mut stmt = db.connection().prepare(sql).expect("prepare");
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows")
}

fn labels(db: &SqliteDb, sql: &str) -> Vec<String> {
    let mut stmt = db.connection().prepare(sql).expect("prepare");
    stmt.query_map([], |row| row.get(0))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows")
}

fn table_names(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
        .expect("prepare");
    stmt.query_map([], |row| row.get(0))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows")
}

fn index_columns(schema: &TableSchema, index: &str) -> BTreeSet<String> {
    schema
        .index(index)
        .unwrap_or_else(|| panic!("index {index} missing"))
        .referenced_columns
        .clone()
}

/// Reports an engine that predates `ALTER TABLE .. RENAME COLUMN`.
struct LegacyEngine<'a>(&'a Connection);

impl SchemaEngine for LegacyEngine<'_> {
    fn introspect(&self, table: &str) -> Result<TableSchema, EngineError> {
        SchemaEngine::introspect(self.0, table)
    }

    fn object_exists(&self, name: &str) -> Result<bool, EngineError> {
        SchemaEngine::object_exists(self.0, name)
    }

    fn execute(&self, sql: &str) -> Result<(), EngineError> {
        SchemaEngine::execute(self.0, sql)
    }

    fn row_count(&self, table: &str) -> Result<u64, EngineError> {
        SchemaEngine::row_count(self.0, table)
    }

    fn null_count(&self, table: &str, column: &str) -> Result<u64, EngineError> {
        SchemaEngine::null_count(self.0, table, column)
    }

    fn engine_version(&self) -> EngineVersion {
        EngineVersion::new(3, 24, 0)
    }
}

/// Fails the first statement containing `needle`, then behaves normally.
struct FaultyEngine<'a> {
    conn: &'a Connection,
    needle: &'static str,
    fired: Cell<bool>,
}

impl<'a> FaultyEngine<'a> {
    fn new(conn: &'a Connection, needle: &'static str) -> Self {
        Self {
            conn,
            needle,
            fired: Cell::new(false),
        }
    }
}

impl SchemaEngine for FaultyEngine<'_> {
    fn introspect(&self, table: &str) -> Result<TableSchema, EngineError> {
        SchemaEngine::introspect(self.conn, table)
    }

    fn object_exists(&self, name: &str) -> Result<bool, EngineError> {
        SchemaEngine::object_exists(self.conn, name)
    }

    fn execute(&self, sql: &str) -> Result<(), EngineError> {
        if !self.fired.get() && sql.contains(self.needle) {
            self.fired.set(true);
            return Err(EngineError::Statement {
                message: format!("injected failure on {}", self.needle),
            });
        }
        SchemaEngine::execute(self.conn, sql)
    }

    fn row_count(&self, table: &str) -> Result<u64, EngineError> {
        SchemaEngine::row_count(self.conn, table)
    }

    fn null_count(&self, table: &str, column: &str) -> Result<u64, EngineError> {
        SchemaEngine::null_count(self.conn, table, column)
    }

    fn engine_version(&self) -> EngineVersion {
        SchemaEngine::engine_version(self.conn)
    }
}

fn failing_rebuild(
    dir: &TempDir,
    needle: &'static str,
    options: &RebuildOptions,
) -> (Connection, RebuildError) {
    let path = seeded_db(dir, "faulty.db", SCENARIO);
    let conn = Connection::open(&path).expect("open db");
    let err = {
        let engine = FaultyEngine::new(&conn, needle);
        let current = engine.introspect("T").expect("introspect");
        rebuild(
            &engine,
            &current,
            &RebuildPlan::rename_column("x", "z"),
            options,
        )
        .expect_err("injected failure must surface")
    };
    (conn, err)
}

#[test]
fn rename_column_end_to_end_native() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = seeded_db(&dir, "native.db", SCENARIO);
    let db = open(&path);

    let outcome = db
        .rename_column("T", "x", "z", &RebuildOptions::default(), false)
        .expect("rename column");

    assert_eq!(outcome.path_taken, RebuildPath::Native);
    assert_eq!(outcome.new_schema.column_names(), vec!["z", "y"]);
    assert_eq!(
        index_columns(&outcome.new_schema, "idx_x"),
        BTreeSet::from(["z".to_string()])
    );
    assert_eq!(
        pairs(&db, "SELECT z, y FROM T ORDER BY z"),
        vec![(1, "a".to_string()), (2, "b".to_string())]
    );
}

#[test]
fn rename_column_end_to_end_rebuild() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = seeded_db(&dir, "rebuild.db", SCENARIO);
    let db = open(&path);

    let outcome = db
        .rename_column("T", "x", "z", &FORCE_REBUILD, true)
        .expect("rename column");

    assert_eq!(outcome.path_taken, RebuildPath::Rebuild);
    assert_eq!(outcome.recreated_indexes, vec!["idx_x".to_string()]);
    assert!(outcome.dropped_indexes.is_empty());
    assert_eq!(outcome.new_schema.column_names(), vec!["z", "y"]);
    assert_eq!(outcome.new_schema.columns[0].declared_type, "INTEGER");
    assert_eq!(
        index_columns(&outcome.new_schema, "idx_x"),
        BTreeSet::from(["z".to_string()])
    );
    assert_eq!(
        pairs(&db, "SELECT z, y FROM T ORDER BY z"),
        vec![(1, "a".to_string()), (2, "b".to_string())]
    );
    assert_eq!(db.list_tables().expect("tables"), vec!["T".to_string()]);
}

#[test]
fn legacy_engine_takes_rebuild_path_with_same_result() {
    let dir = tempfile::tempdir().expect("temp dir");
    let native_path = seeded_db(&dir, "modern.db", SCENARIO);
    let legacy_path = seeded_db(&dir, "legacy.db", SCENARIO);
    let plan = RebuildPlan::rename_column("x", "z");

    let modern = Connection::open(&native_path).expect("open modern");
    let current = SchemaEngine::introspect(&modern, "T").expect("introspect modern");
    let native = rebuild(&modern, &current, &plan, &RebuildOptions::default())
        .expect("native rename");

    let legacy_conn = Connection::open(&legacy_path).expect("open legacy");
    let legacy = LegacyEngine(&legacy_conn);
    let current = legacy.introspect("T").expect("introspect legacy");
    let rebuilt =
        rebuild(&legacy, &current, &plan, &RebuildOptions::default()).expect("rebuild rename");

    assert_eq!(native.path_taken, RebuildPath::Native);
    assert_eq!(rebuilt.path_taken, RebuildPath::Rebuild);
    assert_eq!(native.new_schema.columns, rebuilt.new_schema.columns);
    assert_eq!(
        index_columns(&native.new_schema, "idx_x"),
        index_columns(&rebuilt.new_schema, "idx_x")
    );
}

#[test]
fn rebuild_rename_edits_only_whole_column_references() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = seeded_db(
        &dir,
        "substring.db",
        r#"
        CREATE TABLE t (a INTEGER, ab INTEGER, "note" TEXT);
        INSERT INTO t VALUES (1, 10, 'x'), (2, 20, 'y');
        CREATE INDEX idx_mix ON t (ab, a);
        CREATE INDEX idx_part ON t (ab) WHERE a > 0;
        CREATE INDEX idx_note ON t ("note");
        "#,
    );
    let db = open(&path);

    let outcome = db
        .rename_column("t", "a", "z", &FORCE_REBUILD, false)
        .expect("rename column");

    assert_eq!(
        outcome.recreated_indexes,
        vec![
            "idx_mix".to_string(),
            "idx_part".to_string(),
            "idx_note".to_string()
        ]
    );
    let schema = &outcome.new_schema;
    assert_eq!(
        index_columns(schema, "idx_mix"),
        BTreeSet::from(["ab".to_string(), "z".to_string()])
    );
    assert_eq!(
        index_columns(schema, "idx_part"),
        BTreeSet::from(["ab".to_string(), "z".to_string()])
    );
    assert_eq!(
        index_columns(schema, "idx_note"),
        BTreeSet::from(["note".to_string()])
    );
    assert_eq!(
        pairs(&db, "SELECT z, note FROM t ORDER BY z"),
        vec![(1, "x".to_string()), (2, "y".to_string())]
    );
}

#[test]
fn rename_to_existing_column_is_rejected_before_mutation() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = seeded_db(&dir, "clash.db", SCENARIO);
    let db = open(&path);

    let err = db
        .rename_column("T", "x", "Y", &FORCE_REBUILD, false)
        .expect_err("rename onto an existing column must fail");
    assert!(matches!(
        err,
        StoreError::Rebuild(RebuildError::Plan(PlanError::ColumnExists { .. }))
    ));
    assert_eq!(err.code(), "COLUMN_EXISTS");
    assert_eq!(
        db.introspect("T").expect("introspect").column_names(),
        vec!["x", "y"]
    );
}

#[test]
fn drop_column_preserves_values_and_reports_lost_indexes() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = seeded_db(
        &dir,
        "drop.db",
        r#"
        CREATE TABLE readings (a INTEGER, b TEXT NOT NULL DEFAULT 'n/a', c REAL);
        INSERT INTO readings VALUES (1, 'one', 1.5), (2, 'two', 2.5);
        CREATE INDEX idx_a ON readings (a);
        CREATE INDEX idx_bc ON readings (b, c);
        "#,
    );
    let db = open(&path);

    let outcome = db
        .drop_column("readings", "a", &RebuildOptions::default())
        .expect("drop column");

    assert_eq!(outcome.path_taken, RebuildPath::Rebuild);
    assert_eq!(outcome.dropped_indexes, vec!["idx_a".to_string()]);
    assert_eq!(outcome.recreated_indexes, vec!["idx_bc".to_string()]);
    assert_eq!(outcome.new_schema.column_names(), vec!["b", "c"]);
    let b = outcome.new_schema.column("b").expect("column b");
    assert!(b.not_null);
    assert_eq!(b.default_value.as_deref(), Some("'n/a'"));
    assert!(outcome.new_schema.index("idx_a").is_none());

    let mut stmt = db
        .connection()
        .prepare("SELECT b, c FROM readings ORDER BY c")
        .expect("prepare");
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows");
    assert_eq!(rows, vec![("one".to_string(), 1.5), ("two".to_string(), 2.5)]);
}

#[test]
fn drop_only_column_is_rejected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = seeded_db(&dir, "single.db", "CREATE TABLE solo (a INTEGER);");
    let db = open(&path);

    let err = db
        .drop_column("solo", "a", &RebuildOptions::default())
        .expect_err("dropping the sole column must fail");
    assert!(matches!(
        err,
        StoreError::Rebuild(RebuildError::Plan(PlanError::CannotDropOnlyColumn { .. }))
    ));
    assert!(!err.is_fatal());
}

#[test]
fn unknown_table_and_column_are_reported() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = seeded_db(&dir, "missing.db", SCENARIO);
    let db = open(&path);

    let err = db
        .drop_column("nope", "x", &RebuildOptions::default())
        .expect_err("unknown table");
    assert!(matches!(err, StoreError::TableNotFound { .. }));

    let err = db
        .drop_column("T", "nope", &RebuildOptions::default())
        .expect_err("unknown column");
    assert!(matches!(
        err,
        StoreError::Rebuild(RebuildError::Plan(PlanError::ColumnNotFound { .. }))
    ));
}

#[test]
fn drop_column_keeps_composite_key() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = seeded_db(
        &dir,
        "composite.db",
        r#"
        CREATE TABLE links (src INTEGER, dst INTEGER, note TEXT, PRIMARY KEY (src, dst));
        INSERT INTO links VALUES (1, 2, 'a'), (2, 3, 'b');
        "#,
    );
    let db = open(&path);

    let outcome = db
        .drop_column("links", "note", &RebuildOptions::default())
        .expect("drop column");

    let key = outcome
        .new_schema
        .primary_key()
        .into_iter()
        .map(|col| (col.name.clone(), col.pk_ordinal))
        .collect::<Vec<_>>();
    assert_eq!(key, vec![("src".to_string(), 1), ("dst".to_string(), 2)]);
    let err = db
        .connection()
        .execute_batch("INSERT INTO links VALUES (1, 2)")
        .expect_err("composite key still enforced");
    assert!(err.to_string().contains("UNIQUE"));
}

#[test]
fn add_primary_key_on_unique_column() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = seeded_db(
        &dir,
        "pk.db",
        r#"
        CREATE TABLE people (id INTEGER, name TEXT);
        INSERT INTO people VALUES (7, 'ann'), (9, 'bob');
        CREATE INDEX idx_name ON people (name);
        "#,
    );
    let db = open(&path);

    let outcome = db
        .add_primary_key("people", "id", &RebuildOptions::default())
        .expect("add primary key");

    let key = outcome.new_schema.primary_key();
    assert_eq!(key.len(), 1);
    assert_eq!(key[0].name, "id");
    assert_eq!(outcome.recreated_indexes, vec!["idx_name".to_string()]);
    assert_eq!(
        pairs(&db, "SELECT id, name FROM people ORDER BY id"),
        vec![(7, "ann".to_string()), (9, "bob".to_string())]
    );

    let err = db
        .add_primary_key("people", "name", &RebuildOptions::default())
        .expect_err("second key must fail");
    assert_eq!(err.code(), "PRIMARY_KEY_EXISTS");
}

#[test]
fn add_primary_key_with_duplicates_fails_copy_and_leaves_table_intact() {
    for transactional in [true, false] {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = seeded_db(
            &dir,
            "dupes.db",
            r#"
            CREATE TABLE people (id INTEGER, name TEXT);
            INSERT INTO people VALUES (1, 'ann'), (1, 'bob');
            "#,
        );
        let db = open(&path);
        let options = RebuildOptions {
            transactional,
            allow_native: true,
        };

        let err = db
            .add_primary_key("people", "id", &options)
            .expect_err("duplicate ids must fail");
        assert!(
            matches!(err, StoreError::Rebuild(RebuildError::CopyFailed { .. })),
            "unexpected error: {err:?}"
        );
        assert!(!err.is_fatal());

        let schema = db.introspect("people").expect("introspect");
        assert!(schema.primary_key().is_empty());
        assert_eq!(
            pairs(&db, "SELECT id, name FROM people ORDER BY name"),
            vec![(1, "ann".to_string()), (1, "bob".to_string())]
        );
        assert_eq!(db.list_tables().expect("tables"), vec!["people".to_string()]);
    }
}

#[test]
fn existing_temp_table_blocks_rebuild() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = seeded_db(
        &dir,
        "collision.db",
        r#"
        CREATE TABLE items (a INTEGER, b TEXT);
        CREATE TABLE items_temp (leftover TEXT);
        INSERT INTO items_temp VALUES ('keep me');
        "#,
    );
    let db = open(&path);

    let err = db
        .drop_column("items", "b", &RebuildOptions::default())
        .expect_err("collision must fail");
    assert!(matches!(
        err,
        StoreError::Rebuild(RebuildError::TempNameCollision { .. })
    ));
    assert_eq!(err.code(), "TEMP_NAME_COLLISION");

    let leftover: String = db
        .connection()
        .query_row("SELECT leftover FROM items_temp", [], |row| row.get(0))
        .expect("temp table untouched");
    assert_eq!(leftover, "keep me");
    assert_eq!(
        db.introspect("items").expect("introspect").column_names(),
        vec!["a", "b"]
    );
}

#[test]
fn missing_database_file_is_reported() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = SqliteDb::open(dir.path().join("absent.db"), DEFAULT_BUSY_TIMEOUT)
        .expect_err("missing file");
    assert!(matches!(err, StoreError::DatabaseMissing { .. }));
}

#[test]
fn failed_rename_of_temp_rolls_back_inside_savepoint() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (conn, err) = failing_rebuild(&dir, "RENAME TO", &FORCE_REBUILD);

    assert!(
        matches!(
            err,
            RebuildError::SwapFailed {
                step: SwapStep::RenameTemp,
                rolled_back: true,
                ..
            }
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(err.stage(), RebuildStage::Swap);
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("(rolled back)"));
    assert_eq!(table_names(&conn), vec!["T".to_string()]);

    let schema = SchemaEngine::introspect(&conn, "T").expect("introspect");
    assert_eq!(schema.column_names(), vec!["x", "y"]);
    assert!(schema.index("idx_x").is_some());
}

#[test]
fn failed_rename_of_temp_without_savepoint_is_fatal() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (conn, err) = failing_rebuild(&dir, "RENAME TO", &UNGUARDED_REBUILD);

    assert!(
        matches!(
            err,
            RebuildError::SwapFailed {
                step: SwapStep::RenameTemp,
                rolled_back: false,
                ..
            }
        ),
        "unexpected error: {err:?}"
    );
    assert!(err.is_fatal());
    assert_eq!(err.code(), "SWAP_FAILED");
    assert!(err.to_string().contains("FATAL"));
    assert!(StoreError::Rebuild(err).is_fatal());

    assert_eq!(table_names(&conn), vec!["T_temp".to_string()]);
    let copied: i64 = conn
        .query_row("SELECT COUNT(*) FROM T_temp WHERE z IN (1, 2)", [], |row| {
            row.get(0)
        })
        .expect("data kept in temp table");
    assert_eq!(copied, 2);
}

#[test]
fn failed_reindex_reports_rollback_state_per_mode() {
    for (options, rolled_back, columns) in [
        (FORCE_REBUILD, true, vec!["x", "y"]),
        (UNGUARDED_REBUILD, false, vec!["z", "y"]),
    ] {
        let dir = tempfile::tempdir().expect("temp dir");
        let (conn, err) = failing_rebuild(&dir, "CREATE INDEX", &options);

        match &err {
            RebuildError::ReindexFailed {
                index,
                rolled_back: reported,
                ..
            } => {
                assert_eq!(index, "idx_x");
                assert_eq!(*reported, rolled_back);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.stage(), RebuildStage::Reindex);
        assert!(!err.is_fatal());

        let schema = SchemaEngine::introspect(&conn, "T").expect("introspect");
        assert_eq!(schema.column_names(), columns);
        assert_eq!(schema.index("idx_x").is_some(), rolled_back);
        assert_eq!(table_names(&conn), vec!["T".to_string()]);
    }
}

#[test]
fn failed_release_rolls_back_the_rebuild() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (conn, err) = failing_rebuild(&dir, "RELEASE dm_rebuild", &FORCE_REBUILD);

    assert!(
        matches!(
            err,
            RebuildError::CommitFailed {
                rolled_back: true,
                ..
            }
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(err.stage(), RebuildStage::Commit);
    assert_eq!(err.code(), "COMMIT_FAILED");
    assert!(!err.is_fatal());

    let schema = SchemaEngine::introspect(&conn, "T").expect("introspect");
    assert_eq!(schema.column_names(), vec!["x", "y"]);
    assert_eq!(table_names(&conn), vec!["T".to_string()]);
}

const VIEWED: &str = r#"
    CREATE TABLE T (x INTEGER, y TEXT);
    INSERT INTO T (x, y) VALUES (1, 'a'), (2, 'b');
    CREATE VIEW v_all AS SELECT * FROM T;
    CREATE VIEW v_label AS SELECT t.y AS label FROM T AS t WHERE t.x > 0;
"#;

#[test]
fn rebuild_under_views_rewrites_them_in_both_modes() {
    for options in [FORCE_REBUILD, UNGUARDED_REBUILD] {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = seeded_db(&dir, "views.db", VIEWED);
        let db = open(&path);

        let outcome = db
            .rename_column("T", "y", "name", &options, false)
            .expect("rename under views");

        assert_eq!(outcome.rewritten_views, vec!["v_label".to_string()]);
        assert!(outcome.dropped_views.is_empty());
        assert_eq!(
            labels(&db, "SELECT label FROM v_label ORDER BY label"),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            labels(&db, "SELECT name FROM v_all ORDER BY name"),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(db.list_tables().expect("tables"), vec!["T".to_string()]);
    }
}

#[test]
fn drop_column_under_views_removes_only_views_using_it() {
    for options in [RebuildOptions::default(), UNGUARDED_REBUILD] {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = seeded_db(&dir, "views.db", VIEWED);
        let db = open(&path);

        let outcome = db
            .drop_column("T", "x", &options)
            .expect("drop under views");

        assert_eq!(outcome.dropped_views, vec!["v_label".to_string()]);
        assert!(outcome.rewritten_views.is_empty());
        assert_eq!(
            labels(&db, "SELECT y FROM v_all ORDER BY y"),
            vec!["a".to_string(), "b".to_string()]
        );
        let remaining = outcome
            .new_schema
            .dependent_views
            .iter()
            .map(|view| view.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(remaining, vec!["v_all"]);
    }
}

#[test]
fn rebuild_keeps_declared_constraints_like_native_rename() {
    const USERS: &str = r#"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT COLLATE NOCASE NOT NULL UNIQUE,
            age INTEGER CHECK (age >= 0),
            note TEXT
        );
        INSERT INTO users (email, age, note) VALUES ('ann@x', 30, 'n1'), ('bob@x', 40, 'n2');
    "#;
    let dir = tempfile::tempdir().expect("temp dir");
    let native = open(&seeded_db(&dir, "native.db", USERS));
    let rebuilt = open(&seeded_db(&dir, "rebuilt.db", USERS));

    native
        .rename_column("users", "note", "memo", &RebuildOptions::default(), false)
        .expect("native rename");
    let outcome = rebuilt
        .rename_column("users", "note", "memo", &FORCE_REBUILD, false)
        .expect("rebuild rename");
    assert_eq!(outcome.path_taken, RebuildPath::Rebuild);

    let autoindexes = "SELECT origin || ':' || \"unique\" FROM pragma_index_list('users') \
                       ORDER BY 1";
    assert_eq!(labels(&native, autoindexes), labels(&rebuilt, autoindexes));
    assert_eq!(labels(&rebuilt, autoindexes), vec!["u:1".to_string()]);

    let conn = rebuilt.connection();
    let err = conn
        .execute_batch("INSERT INTO users (email, age) VALUES ('ANN@X', 1)")
        .expect_err("case-insensitive unique email");
    assert!(err.to_string().contains("UNIQUE"), "{err}");
    let err = conn
        .execute_batch("INSERT INTO users (email, age) VALUES ('cy@x', -1)")
        .expect_err("check constraint kept");
    assert!(err.to_string().contains("CHECK"), "{err}");

    let definition: String = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type='table' AND name='users'",
            [],
            |row| row.get(0),
        )
        .expect("definition");
    assert!(definition.contains("AUTOINCREMENT"), "{definition}");
    assert!(definition.contains("COLLATE NOCASE"), "{definition}");
}

#[test]
fn drop_column_needed_by_table_check_is_rejected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = seeded_db(
        &dir,
        "check.db",
        "CREATE TABLE ranges (lo INTEGER, hi INTEGER, CHECK (lo <= hi));",
    );
    let db = open(&path);

    let err = db
        .drop_column("ranges", "hi", &RebuildOptions::default())
        .expect_err("check still needs the column");
    assert!(matches!(
        err,
        StoreError::Rebuild(RebuildError::Plan(PlanError::ColumnInUse { .. }))
    ));
    assert_eq!(err.code(), "COLUMN_IN_USE");
    assert_eq!(
        db.introspect("ranges").expect("introspect").column_names(),
        vec!["lo", "hi"]
    );
}

const AUDITED: &str = r#"
    CREATE TABLE T (x INTEGER, y TEXT);
    CREATE TABLE audit (note TEXT);
    INSERT INTO T (x, y) VALUES (1, 'a'), (2, 'b');
    CREATE TRIGGER t_label AFTER UPDATE OF y ON T BEGIN
        INSERT INTO audit VALUES ('now ' || new.y);
    END;
    CREATE TRIGGER t_insert AFTER INSERT ON T BEGIN
        INSERT INTO audit VALUES ('row ' || new.x);
    END;
"#;

#[test]
fn rebuild_recreates_triggers_with_renamed_column() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = open(&seeded_db(&dir, "triggers.db", AUDITED));

    let outcome = db
        .rename_column("T", "y", "name", &FORCE_REBUILD, false)
        .expect("rename with triggers");
    assert_eq!(
        outcome.recreated_triggers,
        vec!["t_label".to_string(), "t_insert".to_string()]
    );
    assert!(outcome.dropped_triggers.is_empty());
    assert_eq!(outcome.new_schema.triggers.len(), 2);

    db.connection()
        .execute_batch("UPDATE T SET name = 'c' WHERE x = 1; INSERT INTO T VALUES (3, 'd');")
        .expect("triggers fire");
    assert_eq!(
        labels(&db, "SELECT note FROM audit ORDER BY note"),
        vec!["now c".to_string(), "row 3".to_string()]
    );
}

#[test]
fn drop_column_skips_triggers_that_use_it() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = open(&seeded_db(&dir, "triggers.db", AUDITED));

    let outcome = db
        .drop_column("T", "y", &UNGUARDED_REBUILD)
        .expect("drop with triggers");
    assert_eq!(outcome.dropped_triggers, vec!["t_label".to_string()]);
    assert_eq!(outcome.recreated_triggers, vec!["t_insert".to_string()]);

    db.connection()
        .execute_batch("INSERT INTO T VALUES (3);")
        .expect("remaining trigger fires");
    assert_eq!(
        labels(&db, "SELECT note FROM audit"),
        vec!["row 3".to_string()]
    );
}

#[test]
fn add_primary_key_refuses_null_keys() {
    for transactional in [true, false] {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = seeded_db(
            &dir,
            "nulls.db",
            r#"
            CREATE TABLE people (id INTEGER, name TEXT);
            INSERT INTO people VALUES (5, 'a'), (NULL, 'b'), (NULL, 'c');
            "#,
        );
        let db = open(&path);
        let options = RebuildOptions {
            transactional,
            allow_native: true,
        };

        let err = db
            .add_primary_key("people", "id", &options)
            .expect_err("null ids must not become rowids");
        match &err {
            StoreError::Rebuild(RebuildError::CopyFailed { message, .. }) => {
                assert!(message.contains("2 row(s)"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(db.introspect("people").expect("introspect").primary_key().is_empty());
        assert_eq!(
            labels(&db, "SELECT name FROM people WHERE id IS NULL ORDER BY name"),
            vec!["b".to_string(), "c".to_string()]
        );
        assert_eq!(db.list_tables().expect("tables"), vec!["people".to_string()]);
    }
}
