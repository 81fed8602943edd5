use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::rut;
use crate::store::{ImportStore, NewStudent, SqliteStore};
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, OptionalExtension};
use serde_json::json;

const DATE_FMT: &str = "%Y-%m-%d";

fn student_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: i64 = row.get(0)?;
    let rut: String = row.get(1)?;
    let full_name: String = row.get(2)?;
    let birth_date: String = row.get(3)?;
    let sex_code: i64 = row.get(4)?;
    let establishment_id: i64 = row.get(5)?;
    let course_id: i64 = row.get(6)?;
    let active: i64 = row.get(7)?;
    let establishment_name: String = row.get(8)?;
    let course_name: String = row.get(9)?;
    Ok(json!({
        "id": id,
        "rut": rut,
        "fullName": full_name,
        "birthDate": birth_date,
        "sexCode": sex_code,
        "establishmentId": establishment_id,
        "establishmentName": establishment_name,
        "courseId": course_id,
        "courseName": course_name,
        "active": active != 0
    }))
}

const STUDENT_SELECT: &str = "SELECT s.id, s.rut, s.full_name, s.birth_date, s.sex_code,
        s.establishment_id, s.course_id, s.active, e.name, c.name
 FROM students s
 JOIN establishments e ON e.id = s.establishment_id
 JOIN courses c ON c.id = s.course_id";

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    if let Some(eid) = req.params.get("establishmentId").and_then(|v| v.as_i64()) {
        clauses.push("s.establishment_id = ?");
        params.push(Value::Integer(eid));
    }
    if let Some(cid) = req.params.get("courseId").and_then(|v| v.as_i64()) {
        clauses.push("s.course_id = ?");
        params.push(Value::Integer(cid));
    }
    if req
        .params
        .get("activeOnly")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        clauses.push("s.active = 1");
    }

    let mut sql = STUDENT_SELECT.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY s.full_name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(params), student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let found = if let Some(sid) = req.params.get("studentId").and_then(|v| v.as_i64()) {
        let sql = format!("{} WHERE s.id = ?", STUDENT_SELECT);
        conn.query_row(&sql, [sid], student_json).optional()
    } else if let Some(rut_value) = req.params.get("rut").and_then(|v| v.as_str()) {
        let sql = format!("{} WHERE s.rut = ?", STUDENT_SELECT);
        conn.query_row(&sql, [rut_value], student_json).optional()
    } else {
        return err(&req.id, "bad_params", "missing studentId or rut", None);
    };

    match found {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

struct StudentFields {
    full_name: String,
    birth_date: NaiveDate,
    sex_code: i64,
    establishment_id: i64,
    course_id: i64,
    active: bool,
}

/// Shared validation for the interactive create/update paths: referenced
/// establishment must exist and the course must belong to it.
fn check_references(
    store: &SqliteStore<'_>,
    fields: &StudentFields,
) -> Result<(), (String, String)> {
    match store.establishment_by_id(fields.establishment_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err((
                "not_found".into(),
                format!("establishment {} not found", fields.establishment_id),
            ))
        }
        Err(e) => return Err(("db_query_failed".into(), e.to_string())),
    }
    match store.course_by_id(fields.course_id) {
        Ok(Some(course)) => {
            if course.establishment_id != fields.establishment_id {
                return Err((
                    "bad_params".into(),
                    format!(
                        "course {} does not belong to establishment {}",
                        fields.course_id, fields.establishment_id
                    ),
                ));
            }
        }
        Ok(None) => {
            return Err((
                "not_found".into(),
                format!("course {} not found", fields.course_id),
            ))
        }
        Err(e) => return Err(("db_query_failed".into(), e.to_string())),
    }
    Ok(())
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let full_name = match req.params.get("fullName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing fullName", None),
    };
    let birth_date = match req
        .params
        .get("birthDate")
        .and_then(|v| v.as_str())
        .and_then(|v| NaiveDate::parse_from_str(v, DATE_FMT).ok())
    {
        Some(v) => v,
        None => {
            return err(
                &req.id,
                "bad_params",
                "missing or malformed birthDate (yyyy-MM-dd)",
                None,
            )
        }
    };
    let Some(sex_code) = req.params.get("sexCode").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing sexCode", None);
    };
    let Some(establishment_id) = req.params.get("establishmentId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing establishmentId", None);
    };
    let Some(course_id) = req.params.get("courseId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let fields = StudentFields {
        full_name,
        birth_date,
        sex_code,
        establishment_id,
        course_id,
        active,
    };
    let mut store = SqliteStore::new(conn);
    if let Err((code, message)) = check_references(&store, &fields) {
        return err(&req.id, &code, message, None);
    }

    match store.student_by_rut(&rut_value) {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "conflict",
                format!("student with RUT '{}' already exists", rut_value),
                None,
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let record = NewStudent {
        rut: rut_value.clone(),
        full_name: fields.full_name.clone(),
        birth_date: fields.birth_date,
        sex_code: fields.sex_code,
        establishment_id: fields.establishment_id,
        course_id: fields.course_id,
        active: fields.active,
    };
    match store.insert_student(&record) {
        Ok(id) => ok(&req.id, json!({ "studentId": id, "rut": rut_value })),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        ),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    let mut store = SqliteStore::new(conn);
    let current = match store.student_by_id(student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Overlay: absent fields keep their stored value.
    let full_name = match req.params.get("fullName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        Some(_) => return err(&req.id, "bad_params", "fullName must not be empty", None),
        None => current.full_name.clone(),
    };
    let birth_date = match req.params.get("birthDate").and_then(|v| v.as_str()) {
        Some(v) => match NaiveDate::parse_from_str(v, DATE_FMT) {
            Ok(d) => d,
            Err(_) => {
                return err(
                    &req.id,
                    "bad_params",
                    "malformed birthDate (yyyy-MM-dd)",
                    None,
                )
            }
        },
        None => current.birth_date,
    };
    let fields = StudentFields {
        full_name,
        birth_date,
        sex_code: req
            .params
            .get("sexCode")
            .and_then(|v| v.as_i64())
            .unwrap_or(current.sex_code),
        establishment_id: req
            .params
            .get("establishmentId")
            .and_then(|v| v.as_i64())
            .unwrap_or(current.establishment_id),
        course_id: req
            .params
            .get("courseId")
            .and_then(|v| v.as_i64())
            .unwrap_or(current.course_id),
        active: req
            .params
            .get("active")
            .and_then(|v| v.as_bool())
            .unwrap_or(current.active),
    };
    if let Err((code, message)) = check_references(&store, &fields) {
        return err(&req.id, &code, message, None);
    }

    let record = NewStudent {
        rut: current.rut,
        full_name: fields.full_name,
        birth_date: fields.birth_date,
        sex_code: fields.sex_code,
        establishment_id: fields.establishment_id,
        course_id: fields.course_id,
        active: fields.active,
    };
    match store.update_student(student_id, &record) {
        Ok(()) => ok(&req.id, json!({ "studentId": student_id })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        _ => None,
    }
}
