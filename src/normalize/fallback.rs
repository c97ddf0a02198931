//! Single-field fallback substitution applied after mapping.

use crate::row::Row;

/// Replace an unset `lastSeenAt` with the row's `connectedSince`.
///
/// The API reports "never" as `0`, `"0"` or null; those already map to a
/// null timestamp, so any null `lastSeenAt` takes `connectedSince` instead.
/// Rows whose table lacks either column come back untouched.
pub fn apply_last_seen_fallback(mut row: Row) -> Row {
    // ---
    let table = row.table();
    let (Some(last_seen), Some(connected_since)) = (
        table.column_index("lastSeenAt"),
        table.column_index("connectedSince"),
    ) else {
        return row;
    };

    if row.cells()[last_seen].is_null() {
        let substitute = row.cells()[connected_since].clone();
        row.set_at(last_seen, substitute);
    }
    row
}
