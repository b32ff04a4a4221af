//! Database schema definitions

/// SQL to create all tables
/// NOTE: All prices/percentages stored as TEXT to preserve rust_decimal::Decimal precision.
/// Timestamps are unix milliseconds.
pub const CREATE_TABLES: &str = r#"
-- Tracked catalog items
CREATE TABLE IF NOT EXISTS watched_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier TEXT NOT NULL UNIQUE,
    label TEXT NOT NULL DEFAULT '',
    title TEXT NOT NULL DEFAULT '',
    brand TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    image_url TEXT NOT NULL DEFAULT '',
    target_buy_price TEXT,
    source TEXT NOT NULL DEFAULT 'manual',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Append-only price observations
CREATE TABLE IF NOT EXISTS price_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier TEXT NOT NULL REFERENCES watched_items(identifier) ON DELETE CASCADE,
    checked_at INTEGER NOT NULL,
    current_price TEXT,
    list_price TEXT,
    buy_box_price TEXT,
    savings_percent TEXT,
    sales_rank INTEGER,
    avg_30d TEXT,
    avg_90d TEXT,
    avg_180d TEXT,
    all_time_low TEXT,
    all_time_high TEXT,
    provenance TEXT NOT NULL
);

-- Detected deals
CREATE TABLE IF NOT EXISTS deals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier TEXT NOT NULL REFERENCES watched_items(identifier) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    trigger_price TEXT,
    reference_price TEXT,
    drop_percent TEXT,
    estimated_profit TEXT,
    estimated_roi TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    detected_at INTEGER NOT NULL,
    dismissed_at INTEGER
);

-- Deduplicated alerts (one per identifier/deal/kind)
CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier TEXT NOT NULL,
    deal_id INTEGER REFERENCES deals(id) ON DELETE CASCADE,
    alert_kind TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    sent_at INTEGER NOT NULL,
    UNIQUE (identifier, deal_id, alert_kind)
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_items_active ON watched_items(is_active);
CREATE INDEX IF NOT EXISTS idx_snapshots_identifier_checked ON price_snapshots(identifier, checked_at);
CREATE INDEX IF NOT EXISTS idx_deals_identifier_active ON deals(identifier, is_active);
CREATE INDEX IF NOT EXISTS idx_deals_detected ON deals(detected_at DESC);
CREATE INDEX IF NOT EXISTS idx_alerts_identifier ON alerts(identifier, sent_at)
"#;

