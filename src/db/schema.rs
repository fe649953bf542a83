use rusqlite::Connection;

/// Initialize the mirror schema. Safe to run on every startup.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Users (local mirror of identity-provider accounts)
        -- external_id: identity provider subject; created lazily on first request or webhook
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            name TEXT,
            avatar_url TEXT,
            notification_preferences TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_external ON users(external_id);

        -- Products (mirror of payment-provider catalog; id is the provider's id)
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            active INTEGER NOT NULL DEFAULT 1,
            name TEXT NOT NULL,
            description TEXT,
            image TEXT,
            metadata TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Prices (mirror of payment-provider prices)
        CREATE TABLE IF NOT EXISTS prices (
            id TEXT PRIMARY KEY,
            product_id TEXT REFERENCES products(id) ON DELETE SET NULL,
            active INTEGER NOT NULL DEFAULT 1,
            description TEXT,
            unit_amount INTEGER,
            currency TEXT,
            price_type TEXT CHECK (price_type IS NULL OR price_type IN ('one_time', 'recurring')),
            interval TEXT,
            interval_count INTEGER,
            trial_period_days INTEGER,
            metadata TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_prices_product ON prices(product_id);

        -- Subscriptions (mirror of provider subscriptions, keyed by the provider's id)
        -- last_event_at: created-time of the newest webhook event applied (stale events are skipped)
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            status TEXT NOT NULL,
            price_id TEXT REFERENCES prices(id) ON DELETE SET NULL,
            quantity INTEGER NOT NULL DEFAULT 1,
            cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
            created INTEGER NOT NULL,
            current_period_start INTEGER,
            current_period_end INTEGER,
            ended_at INTEGER,
            cancel_at INTEGER,
            canceled_at INTEGER,
            trial_start INTEGER,
            trial_end INTEGER,
            customer_id TEXT,
            metadata TEXT,
            last_event_at INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_user_status ON subscriptions(user_id, status);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_customer ON subscriptions(customer_id);

        -- Webhook events (replay prevention; one row per applied provider event)
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            received_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_received ON webhook_events(received_at);
        "#,
    )
}
