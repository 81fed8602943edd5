use crate::bmi;
use crate::importer::{ENTRY_HEIGHT_MIN_CM, HEIGHT_MAX_CM, WEIGHT_MAX_KG, WEIGHT_MIN_KG};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{Classifier, FallbackClassifier, ImportStore, NewMeasurement, SqliteStore};
use chrono::{Local, NaiveDate};
use serde_json::json;

const DATE_FMT: &str = "%Y-%m-%d";

fn handle_measurements_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(staff_id) = req.params.get("staffId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing staffId", None);
    };
    let measured_on = match req
        .params
        .get("measuredOn")
        .and_then(|v| v.as_str())
        .and_then(|v| NaiveDate::parse_from_str(v, DATE_FMT).ok())
    {
        Some(d) => d,
        None => {
            return err(
                &req.id,
                "bad_params",
                "missing or malformed measuredOn (yyyy-MM-dd)",
                None,
            )
        }
    };
    if measured_on > Local::now().date_naive() {
        return err(
            &req.id,
            "bad_params",
            "measuredOn must not be in the future",
            None,
        );
    }
    let Some(weight_kg) = req.params.get("weightKg").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing weightKg", None);
    };
    let Some(height_cm) = req.params.get("heightCm").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing heightCm", None);
    };

    // Interactive entry bounds. Note the 80 cm floor: stricter than the bulk
    // importer's 50 cm, kept deliberately distinct.
    if !(WEIGHT_MIN_KG..=WEIGHT_MAX_KG).contains(&weight_kg) {
        return err(
            &req.id,
            "out_of_range",
            format!(
                "El peso debe estar entre {} y {} kg.",
                WEIGHT_MIN_KG, WEIGHT_MAX_KG
            ),
            None,
        );
    }
    if !(ENTRY_HEIGHT_MIN_CM..=HEIGHT_MAX_CM).contains(&height_cm) {
        return err(
            &req.id,
            "out_of_range",
            format!(
                "La estatura debe estar entre {} y {} cm.",
                ENTRY_HEIGHT_MIN_CM, HEIGHT_MAX_CM
            ),
            None,
        );
    }

    let mut store = SqliteStore::new(conn);
    let student = match store.student_by_id(student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match store.staff_by_id(staff_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "staff member not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let weight_kg = bmi::round2(weight_kg);
    let height_cm = bmi::round2(height_cm);
    let record = NewMeasurement {
        student_id,
        measured_on,
        staff_id,
        weight_kg,
        height_cm,
        bmi: bmi::bmi(weight_kg, height_cm),
        notes: req
            .params
            .get("notes")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        recorded_at: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
    };
    let measurement_id = match store.insert_measurement(&record) {
        Ok(id) => id,
        Err(e) => {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "measurements" })),
            )
        }
    };

    // Classification failure leaves the measurement persisted and
    // unclassified; the caller sees why.
    let classification_error = FallbackClassifier::new(conn)
        .classify(
            measurement_id,
            measured_on,
            student.birth_date,
            student.sex_code,
        )
        .err()
        .map(|e| e.to_string());

    let (category_id, category_name): (Option<i64>, Option<String>) = conn
        .query_row(
            "SELECT m.category_id, c.name
             FROM measurements m
             LEFT JOIN bmi_categories c ON c.id = m.category_id
             WHERE m.id = ?",
            [measurement_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap_or((None, None));

    ok(
        &req.id,
        json!({
            "measurementId": measurement_id,
            "bmi": record.bmi,
            "categoryId": category_id,
            "categoryName": category_name,
            "classificationError": classification_error
        }),
    )
}

fn handle_measurements_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT m.id, m.measured_on, m.weight_kg, m.height_cm, m.bmi,
                c.name, m.z_score, m.notes, st.name
         FROM measurements m
         LEFT JOIN bmi_categories c ON c.id = m.category_id
         JOIN staff st ON st.id = m.staff_id
         WHERE m.student_id = ?
         ORDER BY m.measured_on DESC, m.id DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([student_id], |row| {
            let id: i64 = row.get(0)?;
            let measured_on: String = row.get(1)?;
            let weight_kg: f64 = row.get(2)?;
            let height_cm: f64 = row.get(3)?;
            let bmi_value: f64 = row.get(4)?;
            let category: Option<String> = row.get(5)?;
            let z_score: Option<f64> = row.get(6)?;
            let notes: Option<String> = row.get(7)?;
            let staff_name: String = row.get(8)?;
            Ok(json!({
                "id": id,
                "measuredOn": measured_on,
                "weightKg": weight_kg,
                "heightCm": height_cm,
                "bmi": bmi::round2(bmi_value),
                "category": category.unwrap_or_else(|| "No clasificada".to_string()),
                "zScore": z_score.map(bmi::round2),
                "notes": notes,
                "staffName": staff_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(measurements) => ok(&req.id, json!({ "measurements": measurements })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "measurements.create" => Some(handle_measurements_create(state, req)),
        "measurements.history" => Some(handle_measurements_history(state, req)),
        _ => None,
    }
}
