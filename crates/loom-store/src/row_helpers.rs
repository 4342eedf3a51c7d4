use crate::error::StoreError;

/// Read a required column, reporting the table and column on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Decode a JSON column into a typed value.
pub fn parse_json<T: serde::de::DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::GraphStatus;

    #[test]
    fn parse_enum_reports_column() {
        let ok: Result<GraphStatus, _> = parse_enum("archived", "graphs", "status");
        assert_eq!(ok.unwrap(), GraphStatus::Archived);

        let bad: Result<GraphStatus, _> = parse_enum("gone", "graphs", "status");
        assert!(matches!(
            bad,
            Err(StoreError::CorruptRow { table: "graphs", column: "status", .. })
        ));
    }

    #[test]
    fn parse_json_reports_column() {
        let bad: Result<serde_json::Value, _> = parse_json("{", "graphs", "document");
        assert!(matches!(
            bad,
            Err(StoreError::CorruptRow { column: "document", .. })
        ));
    }
}
