mod from_row;
pub mod queries;
mod schema;

pub use from_row::FromRow;
pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::identity::SessionVerifier;
use crate::payments::StripeClient;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Local mirror of users, catalog and subscriptions
    pub db: DbPool,
    /// Payment provider client (checkout, portal, webhook verification)
    pub stripe: StripeClient,
    /// Identity provider session verification
    pub sessions: Arc<SessionVerifier>,
    /// Public site URL for redirect targets (no trailing slash)
    pub site_url: String,
    /// Feature slugs served behind the premium gate
    pub premium_features: Arc<Vec<String>>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|c| {
        c.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
    });
    Pool::builder().max_size(10).build(manager)
}
