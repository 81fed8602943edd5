use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

// Read-only catalog queries feeding the caller's cascading dropdowns
// (region -> commune -> establishment -> course). Each returns (id, label)
// pairs plus whatever extra columns the picker needs.

fn id_name_list(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> anyhow::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn handle_regions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match id_name_list(conn, "SELECT id, name FROM regions ORDER BY name", &[]) {
        Ok(rows) => ok(&req.id, json!({ "regions": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_communes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(region_id) = req.params.get("regionId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing regionId", None);
    };
    match id_name_list(
        conn,
        "SELECT id, name FROM communes WHERE region_id = ? ORDER BY name",
        &[&region_id],
    ) {
        Ok(rows) => ok(&req.id, json!({ "communes": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_establishments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let commune_id = req.params.get("communeId").and_then(|v| v.as_i64());
    let result = match commune_id {
        Some(cid) => id_name_list(
            conn,
            "SELECT id, name FROM establishments
             WHERE commune_id = ? AND active = 1 ORDER BY name",
            &[&cid],
        ),
        None => id_name_list(
            conn,
            "SELECT id, name FROM establishments WHERE active = 1 ORDER BY name",
            &[],
        ),
    };
    match result {
        Ok(rows) => ok(&req.id, json!({ "establishments": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(establishment_id) = req.params.get("establishmentId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing establishmentId", None);
    };
    match id_name_list(
        conn,
        "SELECT id, name FROM courses WHERE establishment_id = ? ORDER BY name",
        &[&establishment_id],
    ) {
        Ok(rows) => ok(&req.id, json!({ "courses": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_staff_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let establishment_id = req.params.get("establishmentId").and_then(|v| v.as_i64());

    let (sql, params): (&str, Vec<&dyn rusqlite::ToSql>) = match &establishment_id {
        Some(eid) => (
            "SELECT id, rut, name, role FROM staff
             WHERE active = 1 AND establishment_id = ? ORDER BY name",
            vec![eid],
        ),
        None => (
            "SELECT id, rut, name, role FROM staff WHERE active = 1 ORDER BY name",
            vec![],
        ),
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params.as_slice(), |row| {
            let id: i64 = row.get(0)?;
            let rut: String = row.get(1)?;
            let name: String = row.get(2)?;
            let role: Option<String> = row.get(3)?;
            Ok(json!({ "id": id, "rut": rut, "name": name, "role": role }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(staff) => ok(&req.id, json!({ "staff": staff })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_categories_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut stmt = match conn
        .prepare("SELECT id, name, min_bmi, max_bmi FROM bmi_categories ORDER BY id")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let min_bmi: Option<f64> = row.get(2)?;
            let max_bmi: Option<f64> = row.get(3)?;
            Ok(json!({ "id": id, "name": name, "minBmi": min_bmi, "maxBmi": max_bmi }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(categories) => ok(&req.id, json!({ "categories": categories })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "regions.list" => Some(handle_regions_list(state, req)),
        "communes.list" => Some(handle_communes_list(state, req)),
        "establishments.list" => Some(handle_establishments_list(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "staff.list" => Some(handle_staff_list(state, req)),
        "categories.list" => Some(handle_categories_list(state, req)),
        _ => None,
    }
}
