//! PostgreSQL schema for the deposit pipeline
//!
//! `watched_addresses` is owned by the wallet service; it is created here so
//! a fresh database is usable for development.

pub const CREATE_DEPOSIT_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS deposit_records (
    tx_hash         VARCHAR(128) PRIMARY KEY,
    to_address      VARCHAR(64) NOT NULL,
    user_id         BIGINT NOT NULL,
    amount          NUMERIC(78, 0) NOT NULL,
    token_address   VARCHAR(64),
    chain_id        VARCHAR(32) NOT NULL,
    block_height    BIGINT NOT NULL,
    confirmations   BIGINT NOT NULL DEFAULT 0,
    status          VARCHAR(16) NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    settled_at      TIMESTAMPTZ,
    CONSTRAINT deposit_records_status_check
        CHECK (status IN ('PENDING', 'CONFIRMING', 'CONFIRMED', 'CREDITED', 'FAILED'))
)"#;

pub const CREATE_DEPOSIT_RECORDS_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_deposit_records_open
    ON deposit_records (block_height)
    WHERE status IN ('PENDING', 'CONFIRMING', 'CONFIRMED')"#;

pub const CREATE_DEPOSIT_RECORDS_USER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_deposit_records_user
    ON deposit_records (user_id, created_at DESC)"#;

/// The composite primary key is the credit deduplication constraint
pub const CREATE_DEPOSIT_IDEMPOTENCY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS deposit_idempotency (
    tx_hash          VARCHAR(128) NOT NULL,
    block_height     BIGINT NOT NULL,
    idempotency_key  VARCHAR(160) NOT NULL UNIQUE,
    claimed_at       TIMESTAMPTZ NOT NULL,
    applied_at       TIMESTAMPTZ,
    PRIMARY KEY (tx_hash, block_height)
)"#;

pub const CREATE_SCAN_CURSOR_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scan_cursor (
    chain_id             VARCHAR(32) PRIMARY KEY,
    last_scanned_height  BIGINT NOT NULL,
    updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

pub const CREATE_WATCHED_ADDRESSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS watched_addresses (
    address     VARCHAR(64) NOT NULL,
    chain_id    VARCHAR(32) NOT NULL,
    user_id     BIGINT NOT NULL,
    active      BOOLEAN NOT NULL DEFAULT TRUE,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (chain_id, address)
)"#;

pub const CREATE_DEPOSIT_BALANCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS deposit_balances (
    user_id     BIGINT NOT NULL,
    asset       VARCHAR(64) NOT NULL,
    amount      NUMERIC(78, 0) NOT NULL DEFAULT 0,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (user_id, asset)
)"#;

/// One row per applied credit. The balance upsert only runs when this
/// insert succeeds, so a replayed credit leaves the balance alone.
pub const CREATE_DEPOSIT_CREDITS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS deposit_credits (
    tx_hash       VARCHAR(128) NOT NULL,
    block_height  BIGINT NOT NULL,
    user_id       BIGINT NOT NULL,
    asset         VARCHAR(64) NOT NULL,
    amount        NUMERIC(78, 0) NOT NULL,
    credited_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (tx_hash, block_height)
)"#;

/// Statements in creation order
pub const ALL: [(&str, &str); 8] = [
    ("deposit_records", CREATE_DEPOSIT_RECORDS_TABLE),
    ("idx_deposit_records_open", CREATE_DEPOSIT_RECORDS_STATUS_INDEX),
    ("idx_deposit_records_user", CREATE_DEPOSIT_RECORDS_USER_INDEX),
    ("deposit_idempotency", CREATE_DEPOSIT_IDEMPOTENCY_TABLE),
    ("scan_cursor", CREATE_SCAN_CURSOR_TABLE),
    ("watched_addresses", CREATE_WATCHED_ADDRESSES_TABLE),
    ("deposit_balances", CREATE_DEPOSIT_BALANCES_TABLE),
    ("deposit_credits", CREATE_DEPOSIT_CREDITS_TABLE),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_idempotent() {
        for (name, sql) in ALL {
            assert!(sql.contains("IF NOT EXISTS"), "{} is not idempotent", name);
            assert!(sql.contains(name), "{} statement names another object", name);
        }
    }

    #[test]
    fn test_amount_columns_hold_uint256() {
        assert!(CREATE_DEPOSIT_RECORDS_TABLE.contains("NUMERIC(78, 0)"));
        assert!(CREATE_DEPOSIT_BALANCES_TABLE.contains("NUMERIC(78, 0)"));
        assert!(CREATE_DEPOSIT_CREDITS_TABLE.contains("NUMERIC(78, 0)"));
    }

    #[test]
    fn test_credit_log_is_keyed_like_idempotency() {
        assert!(CREATE_DEPOSIT_CREDITS_TABLE.contains("PRIMARY KEY (tx_hash, block_height)"));
        assert!(CREATE_DEPOSIT_IDEMPOTENCY_TABLE.contains("PRIMARY KEY (tx_hash, block_height)"));
    }
}
