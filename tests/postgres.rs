//! End-to-end run against a real PostgreSQL server
//!
//! Set `STEPWISE_TEST_DATABASE_URL` to run these; without it they return
//! early. Each test works in its own schema and drops it afterwards.

use sea_query::{ColumnDef, Expr, Index, Table};
use stepwise::migration::{
    DownOptions, Migration, MigrationRegistry, Migrator, OpenOptions, SchemaManager, UnitKind,
    UpOptions,
};
use stepwise::{DbError, PostgresInterface, QualifiedName, QueryInterface, Reporter};

fn database_url() -> Option<String> {
    std::env::var("STEPWISE_TEST_DATABASE_URL").ok()
}

struct CreateWidgets;

impl Migration for CreateWidgets {
    fn id(&self) -> &str {
        "20230101000000-create-widgets"
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
        let namespace = manager.namespace().unwrap_or("public").to_string();
        let table = Table::create()
            .table((namespace.clone(), "widgets".to_string()))
            .col(ColumnDef::new("id").integer().not_null().primary_key())
            .col(ColumnDef::new("label").string().not_null())
            .to_owned();
        manager.create_table(table)?;

        let index = Index::create()
            .name("idx_widgets_label")
            .table((namespace, "widgets".to_string()))
            .col(Expr::col("label"))
            .to_owned();
        manager.create_index(index)
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
        let namespace = manager.namespace().unwrap_or("public").to_string();
        manager.drop_table(Table::drop().table((namespace, "widgets".to_string())).to_owned())
    }
}

fn cleanup(url: &str, schema: &str) {
    if let Ok(db) = PostgresInterface::connect(url, Reporter::capture().0) {
        let _ = db.execute(&format!("DROP SCHEMA IF EXISTS \"{schema}\" CASCADE"));
    }
}

#[test]
fn test_migrate_and_revert_against_postgres() {
    let Some(url) = database_url() else {
        eprintln!("STEPWISE_TEST_DATABASE_URL not set, skipping");
        return;
    };
    let schema = "stepwise_it_engine";
    cleanup(&url, schema);

    let dir = tempfile::TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!("[test]\nurl = \"{url}\"\nschema = \"{schema}\"\n"),
    )
    .unwrap();

    let mut registry = MigrationRegistry::new();
    registry.register_migration(CreateWidgets).unwrap();

    let options = OpenOptions::new()
        .config_path(&config_path)
        .env("test")
        .reporter(Reporter::capture().0);
    let migrator = Migrator::open(UnitKind::Migration, options, Box::new(registry)).unwrap();

    let applied = migrator.up(&UpOptions::default()).unwrap();
    assert_eq!(applied, vec!["20230101000000-create-widgets"]);
    assert!(migrator.up(&UpOptions::default()).unwrap().is_empty());

    let tables = migrator.interface().list_tables(Some(schema)).unwrap();
    assert!(tables.contains(&"widgets".to_string()));
    assert!(tables.contains(&"SchemaMeta".to_string()));

    let meta = QualifiedName::new(Some(schema), "SchemaMeta");
    let err = migrator
        .interface()
        .bulk_insert(&meta, &[serde_json::from_str(r#"{"name": "20230101000000-create-widgets"}"#).unwrap()])
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { ref key, .. } if key == "20230101000000-create-widgets"));

    let reverted = migrator.down(&DownOptions::default()).unwrap();
    assert_eq!(reverted, vec!["20230101000000-create-widgets"]);
    assert!(migrator.executed().unwrap().is_empty());

    migrator.close();
    cleanup(&url, schema);
}

#[test]
fn test_legacy_table_upgraded_against_postgres() {
    let Some(url) = database_url() else {
        eprintln!("STEPWISE_TEST_DATABASE_URL not set, skipping");
        return;
    };
    let schema = "stepwise_it_upgrade";
    cleanup(&url, schema);

    let db = PostgresInterface::connect(&url, Reporter::capture().0).unwrap();
    db.create_namespace(schema).unwrap();
    db.execute(&format!(
        "CREATE TABLE \"{schema}\".\"SchemaMeta\" (name varchar(255) PRIMARY KEY, foo text)"
    ))
    .unwrap();
    db.execute(&format!(
        "INSERT INTO \"{schema}\".\"SchemaMeta\" (name, foo) VALUES ('a', 'x'), ('b', 'y')"
    ))
    .unwrap();

    let table = QualifiedName::new(Some(schema), "SchemaMeta");
    let outcome = stepwise::migration::ensure_current_meta_schema(&db, &table, "name").unwrap();
    assert!(matches!(outcome, stepwise::migration::MetaSchemaOutcome::Upgraded { rows: 2, .. }));
    assert_eq!(db.select_all(&table).unwrap().len(), 2);
    assert_eq!(db.select_all(&table.with_name("SchemaMetaBackup")).unwrap().len(), 2);

    let duplicate = serde_json::from_str(
        r#"{"name": "a", "createdAt": "2023-01-01T00:00:00Z", "updatedAt": "2023-01-01T00:00:00Z"}"#,
    )
    .unwrap();
    let err = db.bulk_insert(&table, &[duplicate]).unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { ref key, .. } if key == "a"), "{err}");

    cleanup(&url, schema);
}
