use rusqlite::Connection;

pub(crate) fn init_vault(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Encrypted records plus the shared salt/IV metadata row (`PLMSecureMetadata`).
        CREATE TABLE IF NOT EXISTS secure_records (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        -- Plaintext, non-secret UI hints (e.g. PIN pad length).
        CREATE TABLE IF NOT EXISTS plaintext_settings (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );
        "#,
    )
}

pub(crate) fn init_credentials(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS credentials (
          name TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );
        "#,
    )
}
