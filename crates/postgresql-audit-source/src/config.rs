use sync_core::EventColumns;

/// Where the audit rows live and how they are announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditTableConfig {
    pub schema: String,
    pub table: String,
    /// Primary key column
    pub key_column: String,
    pub timestamp_column: String,
    /// Column the backlog scan orders by
    pub ordering_column: String,
    /// Column naming the audited table of each row
    pub stream_column: String,
    /// Channel carrying full rows as JSON
    pub small_channel: String,
    /// Channel carrying only primary keys
    pub big_channel: String,
}

impl Default for AuditTableConfig {
    fn default() -> Self {
        Self {
            schema: "audit".to_string(),
            table: "logged_actions".to_string(),
            key_column: "event_id".to_string(),
            timestamp_column: "action_timestamp".to_string(),
            ordering_column: "event_id".to_string(),
            stream_column: "table_name".to_string(),
            small_channel: "audit".to_string(),
            big_channel: "audit_id".to_string(),
        }
    }
}

impl AuditTableConfig {
    /// Columns used to build change events from rows of this table.
    pub fn event_columns(&self) -> EventColumns {
        EventColumns {
            key_column: self.key_column.clone(),
            timestamp_column: self.timestamp_column.clone(),
            ordering_column: self.ordering_column.clone(),
            stream_column: self.stream_column.clone(),
            default_stream: self.table.clone(),
        }
    }
}
