//! Connection pooling shared by every crate that opens a SQLite file.
//!
//! Every database the engine touches — old or new — is opened through this
//! module so PRAGMA setup stays in one place.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::error::{MigrError, Result};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open a connection pool backed by a file-based SQLite database, creating
/// the file if it does not exist. `journal_mode=WAL` and `foreign_keys=ON`
/// are set on every connection handed out by the pool.
pub fn create_pool(db_path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        Ok(())
    });

    Pool::builder()
        .max_size(8)
        .build(manager)
        .map_err(|e| MigrError::Internal(e.to_string()))
}

/// Open a connection pool backed by a shared in-memory SQLite database. Used
/// by tests that need two distinct "files" without touching disk.
pub fn create_memory_pool() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory().with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    });

    Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| MigrError::Internal(e.to_string()))
}

pub fn get(pool: &DbPool) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
    pool.get().map_err(|e| MigrError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_pool_enforces_foreign_keys() {
        let pool = create_memory_pool().unwrap();
        let conn = get(&pool).unwrap();
        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn file_pool_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let pool = create_pool(path.to_str().unwrap()).unwrap();
        let conn = get(&pool).unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        drop(conn);
        assert!(path.exists());
    }
}
