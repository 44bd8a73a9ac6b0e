//! SQL statements against the audit table.
//!
//! Identifiers come from configuration, so they are always quoted.

use crate::config::AuditTableConfig;

/// Name of the server-side cursor used by the backlog scan.
pub const CURSOR_NAME: &str = "historic_scan";

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified_table(config: &AuditTableConfig) -> String {
    format!(
        "{}.{}",
        quote_ident(&config.schema),
        quote_ident(&config.table)
    )
}

/// `DECLARE` for the backlog cursor. The lower bound is an integer literal
/// since utility statements take no bind parameters.
pub fn declare_cursor(config: &AuditTableConfig, since_exclusive: Option<i64>) -> String {
    let filter = match since_exclusive {
        Some(since) => format!(" WHERE {} > {since}", quote_ident(&config.key_column)),
        None => String::new(),
    };
    format!(
        "DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR SELECT * FROM {}{filter} ORDER BY {} ASC",
        qualified_table(config),
        quote_ident(&config.ordering_column)
    )
}

pub fn fetch_cursor(rows: usize) -> String {
    format!("FETCH {rows} FROM {CURSOR_NAME}")
}

pub fn close_cursor() -> String {
    format!("CLOSE {CURSOR_NAME}")
}

pub fn select_by_key(config: &AuditTableConfig) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = $1::bigint",
        qualified_table(config),
        quote_ident(&config.key_column)
    )
}

/// `DELETE` of `count` keys, bound as `$1..$count`.
///
/// Parameters are cast to `bigint` so `i64` binds against any integer key
/// column.
pub fn delete_keys(config: &AuditTableConfig, count: usize) -> String {
    let placeholders: Vec<String> = (1..=count).map(|i| format!("${i}::bigint")).collect();
    format!(
        "DELETE FROM {} WHERE {} IN ({})",
        qualified_table(config),
        quote_ident(&config.key_column),
        placeholders.join(", ")
    )
}

/// `DELETE` of the key range `(low, high]`; with no lower bound the only
/// parameter is `high`.
pub fn delete_range(config: &AuditTableConfig, has_lower_bound: bool) -> String {
    let key = quote_ident(&config.key_column);
    let condition = if has_lower_bound {
        format!("{key} > $1::bigint AND {key} <= $2::bigint")
    } else {
        format!("{key} <= $1::bigint")
    };
    format!("DELETE FROM {} WHERE {condition}", qualified_table(config))
}

pub fn audited_streams(config: &AuditTableConfig) -> String {
    format!(
        "SELECT DISTINCT {}::text FROM {}",
        quote_ident(&config.stream_column),
        qualified_table(config)
    )
}

/// Columns of the audit table whose type is `hstore`; binds schema, table.
pub const HSTORE_COLUMNS: &str = "SELECT column_name::text FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 AND udt_name = 'hstore'";

pub fn listen(channel: &str) -> String {
    format!("LISTEN {}", quote_ident(channel))
}

pub const UNLISTEN_ALL: &str = "UNLISTEN *";

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuditTableConfig {
        AuditTableConfig::default()
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("event_id"), "\"event_id\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_declare_cursor() {
        assert_eq!(
            declare_cursor(&config(), Some(100)),
            "DECLARE historic_scan NO SCROLL CURSOR FOR SELECT * FROM \"audit\".\"logged_actions\" \
             WHERE \"event_id\" > 100 ORDER BY \"event_id\" ASC"
        );
        assert_eq!(
            declare_cursor(&config(), None),
            "DECLARE historic_scan NO SCROLL CURSOR FOR SELECT * FROM \"audit\".\"logged_actions\" \
             ORDER BY \"event_id\" ASC"
        );
    }

    #[test]
    fn test_select_by_key_uses_equality() {
        assert_eq!(
            select_by_key(&config()),
            "SELECT * FROM \"audit\".\"logged_actions\" WHERE \"event_id\" = $1::bigint"
        );
    }

    #[test]
    fn test_delete_keys_placeholders() {
        assert_eq!(
            delete_keys(&config(), 3),
            "DELETE FROM \"audit\".\"logged_actions\" WHERE \"event_id\" IN ($1::bigint, $2::bigint, $3::bigint)"
        );
    }

    #[test]
    fn test_delete_range() {
        assert_eq!(
            delete_range(&config(), true),
            "DELETE FROM \"audit\".\"logged_actions\" WHERE \"event_id\" > $1::bigint AND \"event_id\" <= $2::bigint"
        );
        assert_eq!(
            delete_range(&config(), false),
            "DELETE FROM \"audit\".\"logged_actions\" WHERE \"event_id\" <= $1::bigint"
        );
    }

    #[test]
    fn test_listen_and_fetch() {
        assert_eq!(listen("audit_id"), "LISTEN \"audit_id\"");
        assert_eq!(fetch_cursor(500), "FETCH 500 FROM historic_scan");
        assert_eq!(close_cursor(), "CLOSE historic_scan");
    }
}
