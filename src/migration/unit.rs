//! Migration units and the actions they run.
//!
//! Every action has one signature: it receives the [`SchemaManager`] and
//! returns a `Result`. Continuation-style actions, which signal completion
//! through a callback instead of returning, are wrapped into that signature
//! by [`Action::from_callback`] when the unit is built, so the migrator never
//! has to know which style a unit was written in.

use crate::error::DbError;
use crate::migration::error::MigrationError;
use crate::migration::schema_manager::SchemaManager;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a migrator drives: schema migrations or seed data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Migration,
    Seed,
}

impl UnitKind {
    /// Progress verbs (before, after) for one step in `direction`
    pub(crate) fn progress(self, direction: Direction) -> (&'static str, &'static str) {
        match (self, direction) {
            (UnitKind::Migration, Direction::Up) => ("migrating", "migrated"),
            (UnitKind::Seed, Direction::Up) => ("seeding", "seeded"),
            (_, Direction::Down) => ("reverting", "reverted"),
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Migration => f.write_str("migration"),
            UnitKind::Seed => f.write_str("seed"),
        }
    }
}

/// Direction for migration execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Apply the migration (up)
    Up,
    /// Rollback the migration (down)
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

type ActionFn = dyn Fn(&SchemaManager<'_>) -> Result<(), DbError> + Send + Sync;

/// Executable body of an up or down step
#[derive(Clone)]
pub struct Action(Arc<ActionFn>);

impl Action {
    /// Action returning its result directly
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&SchemaManager<'_>) -> Result<(), DbError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Action that reports completion through [`Done`]
    ///
    /// The step finishes when `done` is signalled, which may happen on
    /// another coroutine. Dropping `done` without signalling fails the step.
    pub fn from_callback<F>(f: F) -> Self
    where
        F: Fn(&SchemaManager<'_>, Done) + Send + Sync + 'static,
    {
        Self::new(move |manager| {
            let (tx, rx) = may::sync::mpsc::channel();
            f(manager, Done { tx });
            rx.recv().map_err(|_| {
                DbError::other("action finished without signalling completion")
            })?
        })
    }

    /// Run the action
    pub fn run(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
        (self.0)(manager)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Action")
    }
}

/// Completion handle passed to callback-style actions
pub struct Done {
    tx: may::sync::mpsc::Sender<Result<(), DbError>>,
}

impl Done {
    /// Signal success
    pub fn ok(self) {
        self.finish(Ok(()));
    }

    /// Signal failure
    pub fn fail(self, error: DbError) {
        self.finish(Err(error));
    }

    /// Signal `result`
    pub fn finish(self, result: Result<(), DbError>) {
        // The receiver only goes away once the step is over.
        let _ = self.tx.send(result);
    }
}

/// One versioned change with an apply and an optional revert action
///
/// Identifiers sort lexicographically in chronological order, which
/// timestamp prefixes (`20230101000000-create-users`) guarantee.
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    id: String,
    up: Action,
    down: Option<Action>,
    source: PathBuf,
}

impl MigrationUnit {
    /// Unit with only an up action; its source defaults to the identifier
    pub fn new(id: impl Into<String>, up: Action) -> Self {
        let id = id.into();
        Self {
            source: PathBuf::from(&id),
            id,
            up,
            down: None,
        }
    }

    /// Add a down action
    pub fn with_down(mut self, down: Action) -> Self {
        self.down = Some(down);
        self
    }

    /// Set the source location
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = source.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn up(&self) -> &Action {
        &self.up
    }

    pub fn down(&self) -> Option<&Action> {
        self.down.as_ref()
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    pub(crate) fn action(&self, direction: Direction) -> Option<&Action> {
        match direction {
            Direction::Up => Some(&self.up),
            Direction::Down => self.down.as_ref(),
        }
    }
}

/// Trait for migrations written as Rust types
///
/// ```rust,no_run
/// use stepwise::migration::{Migration, SchemaManager};
/// use stepwise::DbError;
/// use sea_query::{ColumnDef, Table};
///
/// pub struct CreateUsers;
///
/// impl Migration for CreateUsers {
///     fn id(&self) -> &str {
///         "20230101000000-create-users"
///     }
///
///     fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
///         let table = Table::create()
///             .table("users")
///             .col(ColumnDef::new("id").integer().not_null().primary_key())
///             .to_owned();
///         manager.create_table(table)
///     }
///
///     fn down(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
///         manager.drop_table(Table::drop().table("users").to_owned())
///     }
/// }
/// ```
pub trait Migration: Send + Sync + 'static {
    /// Identifier recorded in the bookkeeping table
    fn id(&self) -> &str;

    /// Apply the migration
    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError>;

    /// Roll the migration back
    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), DbError>;

    /// Whether `down` may be run; irreversible migrations return `false`
    fn is_reversible(&self) -> bool {
        true
    }
}

impl<M: Migration> From<M> for MigrationUnit {
    fn from(migration: M) -> Self {
        let migration = Arc::new(migration);
        let id = migration.id().to_string();
        let reversible = migration.is_reversible();

        let up = {
            let migration = Arc::clone(&migration);
            Action::new(move |manager| migration.up(manager))
        };
        let unit = MigrationUnit::new(id.clone(), up).with_source(format!("{id}.rs"));

        if reversible {
            unit.with_down(Action::new(move |manager| migration.down(manager)))
        } else {
            unit
        }
    }
}

/// Turns a directory of migration definitions into executable units
pub trait MigrationLoader {
    /// Units defined under `dir` whose file name matches `pattern`
    fn load(&self, dir: &Path, pattern: &Regex) -> Result<Vec<MigrationUnit>, MigrationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;

    #[test]
    fn test_callback_action_success_and_failure() {
        let db = MemoryDatabase::new();
        let manager = SchemaManager::new(&db, None);

        let ok = Action::from_callback(|manager, done| {
            match manager.execute("CREATE TABLE users (id integer)") {
                Ok(()) => done.ok(),
                Err(e) => done.fail(e),
            }
        });
        assert!(ok.run(&manager).is_ok());

        let failing = Action::from_callback(|_, done| done.fail(DbError::other("boom")));
        let err = failing.run(&manager).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_callback_action_dropping_done_fails() {
        let db = MemoryDatabase::new();
        let manager = SchemaManager::new(&db, None);

        let forgetful = Action::from_callback(|_, done| drop(done));
        let err = forgetful.run(&manager).unwrap_err();
        assert!(err.to_string().contains("without signalling completion"));
    }

    #[test]
    fn test_callback_completed_on_another_coroutine() {
        let db = MemoryDatabase::new();
        let manager = SchemaManager::new(&db, None);

        let deferred = Action::from_callback(|_, done| {
            may::go!(move || done.ok());
        });
        assert!(deferred.run(&manager).is_ok());
    }

    struct Irreversible;

    impl Migration for Irreversible {
        fn id(&self) -> &str {
            "20230101000000-drop-legacy"
        }

        fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
            manager.execute("DROP TABLE legacy")
        }

        fn down(&self, _manager: &SchemaManager<'_>) -> Result<(), DbError> {
            Err(DbError::other("cannot restore dropped data"))
        }

        fn is_reversible(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_migration_trait_conversion() {
        let unit = MigrationUnit::from(Irreversible);
        assert_eq!(unit.id(), "20230101000000-drop-legacy");
        assert_eq!(unit.source(), Path::new("20230101000000-drop-legacy.rs"));
        assert!(!unit.is_reversible());
        assert!(unit.action(Direction::Down).is_none());
    }

    #[test]
    fn test_progress_verbs() {
        assert_eq!(UnitKind::Migration.progress(Direction::Up), ("migrating", "migrated"));
        assert_eq!(UnitKind::Seed.progress(Direction::Up), ("seeding", "seeded"));
        assert_eq!(UnitKind::Seed.progress(Direction::Down), ("reverting", "reverted"));
    }
}
