use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::rut;
use rusqlite::OptionalExtension;
use serde_json::json;

// Catalog maintenance: the entities the importer resolves against. Kept to
// the create operations the admin screens actually need; students and
// measurements have their own handler families.

fn require_name(req: &Request) -> Result<String, serde_json::Value> {
    match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(err(&req.id, "bad_params", "missing name", None)),
    }
}

fn handle_regions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match require_name(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match conn.execute("INSERT INTO regions(name) VALUES(?)", [&name]) {
        Ok(_) => ok(
            &req.id,
            json!({ "regionId": conn.last_insert_rowid(), "name": name }),
        ),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "regions" })),
        ),
    }
}

fn handle_communes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(region_id) = req.params.get("regionId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing regionId", None);
    };
    let name = match require_name(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM regions WHERE id = ?", [region_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "region not found", None);
    }
    match conn.execute(
        "INSERT INTO communes(region_id, name) VALUES(?, ?)",
        (region_id, &name),
    ) {
        Ok(_) => ok(
            &req.id,
            json!({ "communeId": conn.last_insert_rowid(), "name": name }),
        ),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "communes" })),
        ),
    }
}

fn handle_establishments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match require_name(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let address = req.params.get("address").and_then(|v| v.as_str());
    let commune_id = req.params.get("communeId").and_then(|v| v.as_i64());

    if let Some(cid) = commune_id {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM communes WHERE id = ?", [cid], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "commune not found", None);
        }
    }

    match conn.execute(
        "INSERT INTO establishments(name, address, commune_id) VALUES(?, ?, ?)",
        (&name, address, commune_id),
    ) {
        Ok(_) => ok(
            &req.id,
            json!({ "establishmentId": conn.last_insert_rowid(), "name": name }),
        ),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "establishments" })),
        ),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(establishment_id) = req.params.get("establishmentId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing establishmentId", None);
    };
    let name = match require_name(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM establishments WHERE id = ?",
            [establishment_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "establishment not found", None);
    }
    match conn.execute(
        "INSERT INTO courses(establishment_id, name) VALUES(?, ?)",
        (establishment_id, &name),
    ) {
        Ok(_) => ok(
            &req.id,
            json!({ "courseId": conn.last_insert_rowid(), "name": name }),
        ),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        ),
    }
}

fn handle_staff_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let rut_value = match req.params.get("rut").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing rut", None),
    };
    if !rut::validate(&rut_value) {
        return err(
            &req.id,
            "invalid_rut",
            format!("RUT inválido ('{}')", rut_value),
            None,
        );
    }
    let name = match require_name(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = req.params.get("email").and_then(|v| v.as_str());
    let role = req.params.get("role").and_then(|v| v.as_str());
    let establishment_id = req.params.get("establishmentId").and_then(|v| v.as_i64());

    match conn.execute(
        "INSERT INTO staff(rut, name, email, role, establishment_id) VALUES(?, ?, ?, ?, ?)",
        (&rut_value, &name, email, role, establishment_id),
    ) {
        Ok(_) => ok(
            &req.id,
            json!({ "staffId": conn.last_insert_rowid(), "rut": rut_value }),
        ),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "staff" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "regions.create" => Some(handle_regions_create(state, req)),
        "communes.create" => Some(handle_communes_create(state, req)),
        "establishments.create" => Some(handle_establishments_create(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "staff.create" => Some(handle_staff_create(state, req)),
        _ => None,
    }
}
