//! DDL and DML for the `pgb` audit schema.

pub const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS pgb";

pub const CREATE_LOG_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS pgb.pgb_log (
        id SERIAL PRIMARY KEY,
        timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        service_name VARCHAR(50) DEFAULT 'pgbridge',
        event_type VARCHAR(50) NOT NULL,
        database_name VARCHAR(100),
        module_name VARCHAR(50),
        message TEXT,
        details JSONB
    )
"#;

pub const CREATE_TIMESTAMP_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_pgb_log_timestamp ON pgb.pgb_log(timestamp)";

pub const CREATE_EVENT_TYPE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_pgb_log_event_type ON pgb.pgb_log(event_type)";

pub const INSERT_LOG: &str = r#"
    INSERT INTO pgb.pgb_log (service_name, event_type, database_name, module_name, message, details)
    VALUES ($1, $2, $3, $4, $5, $6)
"#;
