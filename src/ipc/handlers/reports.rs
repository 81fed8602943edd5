use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::Connection;
use serde_json::json;

// Dashboard-style aggregates. Every query is optionally scoped to one
// establishment (directors and teachers see their own school; the admin
// sees everything).

fn scoped_count(
    conn: &Connection,
    base: &str,
    scoped: &str,
    establishment_id: Option<i64>,
) -> anyhow::Result<i64> {
    let count = match establishment_id {
        Some(eid) => conn.query_row(scoped, [eid], |r| r.get(0))?,
        None => conn.query_row(base, [], |r| r.get(0))?,
    };
    Ok(count)
}

fn handle_reports_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let establishment_id = req.params.get("establishmentId").and_then(|v| v.as_i64());

    let totals = (|| -> anyhow::Result<serde_json::Value> {
        let total_students = scoped_count(
            conn,
            "SELECT COUNT(*) FROM students WHERE active = 1",
            "SELECT COUNT(*) FROM students WHERE active = 1 AND establishment_id = ?",
            establishment_id,
        )?;
        let total_measurements = scoped_count(
            conn,
            "SELECT COUNT(*) FROM measurements",
            "SELECT COUNT(*) FROM measurements m
             JOIN students s ON s.id = m.student_id
             WHERE s.establishment_id = ?",
            establishment_id,
        )?;
        let total_establishments: i64 = match establishment_id {
            Some(_) => 1,
            None => conn.query_row(
                "SELECT COUNT(*) FROM establishments WHERE active = 1",
                [],
                |r| r.get(0),
            )?,
        };

        let month_prefix = Local::now().format("%Y-%m").to_string();
        let measurements_this_month: i64 = match establishment_id {
            Some(eid) => conn.query_row(
                "SELECT COUNT(*) FROM measurements m
                 JOIN students s ON s.id = m.student_id
                 WHERE s.establishment_id = ?1 AND m.measured_on LIKE ?2 || '%'",
                rusqlite::params![eid, month_prefix],
                |r| r.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM measurements WHERE measured_on LIKE ?1 || '%'",
                [&month_prefix],
                |r| r.get(0),
            )?,
        };

        // Category distribution over classified measurements.
        let (dist_sql, dist_params): (&str, Vec<i64>) = match establishment_id {
            Some(eid) => (
                "SELECT c.name, COUNT(*) FROM measurements m
                 JOIN bmi_categories c ON c.id = m.category_id
                 JOIN students s ON s.id = m.student_id
                 WHERE s.establishment_id = ?
                 GROUP BY c.name ORDER BY COUNT(*) DESC",
                vec![eid],
            ),
            None => (
                "SELECT c.name, COUNT(*) FROM measurements m
                 JOIN bmi_categories c ON c.id = m.category_id
                 GROUP BY c.name ORDER BY COUNT(*) DESC",
                vec![],
            ),
        };
        let mut stmt = conn.prepare(dist_sql)?;
        let distribution = stmt
            .query_map(rusqlite::params_from_iter(dist_params), |row| {
                let category: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok(json!({ "category": category, "count": count }))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let male = scoped_count(
            conn,
            "SELECT COUNT(*) FROM students WHERE active = 1 AND sex_code = 1",
            "SELECT COUNT(*) FROM students
             WHERE active = 1 AND sex_code = 1 AND establishment_id = ?",
            establishment_id,
        )?;
        let female = scoped_count(
            conn,
            "SELECT COUNT(*) FROM students WHERE active = 1 AND sex_code = 2",
            "SELECT COUNT(*) FROM students
             WHERE active = 1 AND sex_code = 2 AND establishment_id = ?",
            establishment_id,
        )?;

        Ok(json!({
            "totalStudents": total_students,
            "totalMeasurements": total_measurements,
            "totalEstablishments": total_establishments,
            "measurementsThisMonth": measurements_this_month,
            "bmiDistribution": distribution,
            "studentsMale": male,
            "studentsFemale": female
        }))
    })();

    match totals {
        Ok(summary) => ok(&req.id, summary),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.summary" => Some(handle_reports_summary(state, req)),
        _ => None,
    }
}
