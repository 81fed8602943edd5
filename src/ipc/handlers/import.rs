use crate::importer;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::rows::{self, RawRow};
use crate::store::{FallbackClassifier, SqliteStore};
use serde_json::json;
use std::sync::atomic::AtomicBool;

/// Rows arrive as JSON objects, header -> cell. Spreadsheet readers hand
/// numeric cells through as numbers, so coerce scalars to the string form
/// the importer validates. Null cells are absent.
fn raw_rows(params: &serde_json::Value) -> Option<Vec<RawRow>> {
    let arr = params.get("rows")?.as_array()?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let obj = item.as_object()?;
        let mut row = RawRow::new();
        for (k, v) in obj {
            let text = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => continue,
                _ => return None,
            };
            row.insert(k.clone(), text);
        }
        out.push(row);
    }
    Some(out)
}

fn outcome_json(outcome: &importer::ImportOutcome) -> serde_json::Value {
    json!({
        "created": outcome.created,
        "updated": outcome.updated,
        "errors": outcome.errors,
    })
}

fn handle_import_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(raw) = raw_rows(&req.params) else {
        return err(
            &req.id,
            "bad_params",
            "missing rows (array of header -> cell objects)",
            None,
        );
    };

    let parsed: Vec<_> = raw.iter().map(rows::student_row).collect();
    let mut store = SqliteStore::new(conn);
    let cancel = AtomicBool::new(false);
    let outcome = importer::import_students(&mut store, &parsed, &cancel);

    ok(&req.id, outcome_json(&outcome))
}

fn handle_import_measurements(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(raw) = raw_rows(&req.params) else {
        return err(
            &req.id,
            "bad_params",
            "missing rows (array of header -> cell objects)",
            None,
        );
    };
    let default_staff_id = req.params.get("defaultStaffId").and_then(|v| v.as_i64());

    let parsed: Vec<_> = raw.iter().map(rows::measurement_row).collect();
    let mut store = SqliteStore::new(conn);
    let classifier = FallbackClassifier::new(conn);
    let cancel = AtomicBool::new(false);
    let outcome =
        importer::import_measurements(&mut store, &classifier, &parsed, default_staff_id, &cancel);

    ok(&req.id, outcome_json(&outcome))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.students" => Some(handle_import_students(state, req)),
        "import.measurements" => Some(handle_import_measurements(state, req)),
        _ => None,
    }
}
