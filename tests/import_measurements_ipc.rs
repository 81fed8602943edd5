use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_nutritrackd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn nutritrackd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Workspace with one establishment, one course, one staff member, and one
/// imported student. Returns (staffId, studentId).
fn seed_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> (i64, i64) {
    let _ = request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let est = request_ok(
        stdin,
        reader,
        "seed-est",
        "establishments.create",
        json!({ "name": "Escuela Gabriela Mistral" }),
    );
    let est_id = est.get("establishmentId").and_then(|v| v.as_i64()).unwrap();
    let course = request_ok(
        stdin,
        reader,
        "seed-course",
        "courses.create",
        json!({ "establishmentId": est_id, "name": "1° Básico A" }),
    );
    let course_id = course.get("courseId").and_then(|v| v.as_i64()).unwrap();
    let staff = request_ok(
        stdin,
        reader,
        "seed-staff",
        "staff.create",
        json!({ "rut": "20347878-K", "name": "Docente Uno", "establishmentId": est_id }),
    );
    let staff_id = staff.get("staffId").and_then(|v| v.as_i64()).unwrap();

    let imported = request_ok(
        stdin,
        reader,
        "seed-student",
        "import.students",
        json!({
            "rows": [{
                "RUT": "12345678-5",
                "NombreCompleto": "Ana Soto",
                "FechaNacimiento": "2015-03-09",
                "ID_Sexo": "2",
                "ID_Establecimiento": est_id,
                "ID_Curso": course_id
            }]
        }),
    );
    assert_eq!(imported.get("created").and_then(|v| v.as_u64()), Some(1));

    let got = request_ok(
        stdin,
        reader,
        "seed-get",
        "students.get",
        json!({ "rut": "12345678-5" }),
    );
    let student_id = got
        .get("student")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_i64())
        .unwrap();
    (staff_id, student_id)
}

#[test]
fn measurement_rows_are_validated_and_classified() {
    let workspace = temp_dir("nutritrack-import-measurements");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (staff_id, student_id) = seed_workspace(&mut stdin, &mut reader, &workspace);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.measurements",
        json!({
            "rows": [
                {
                    // Numeric cells may arrive as JSON numbers.
                    "RUT": "12345678-5",
                    "FechaMedicion": "2025-04-01",
                    "Peso_kg": 60,
                    "Estatura_cm": 150,
                    "ID_DocenteEncargado": staff_id,
                    "Observaciones": "control anual"
                },
                {
                    "RUT": "12345678-5",
                    "FechaMedicion": "2025-04-02",
                    "Peso_kg": "32.5",
                    "Estatura_cm": "500",
                    "ID_DocenteEncargado": staff_id
                },
                {
                    "ID_Estudiante": student_id,
                    "FechaMedicion": "2025-04-03",
                    "Peso_kg": "32.5",
                    "Estatura_cm": "62",
                    "ID_DocenteEncargado": staff_id
                }
            ]
        }),
    );

    // Row 2 fails the height range; rows 1 and 3 import (bulk import
    // accepts heights down to 50 cm).
    assert_eq!(result.get("created").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(result.get("updated").and_then(|v| v.as_u64()), Some(0));
    let errors = result
        .get("errors")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(errors.len(), 1, "{:?}", errors);
    let msg = errors[0].as_str().unwrap_or("");
    assert!(msg.starts_with("Línea 3:"), "{}", msg);
    assert!(msg.contains("Estatura fuera de rango (500)"), "{}", msg);

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "measurements.history",
        json!({ "studentId": student_id }),
    );
    let measurements = history
        .get("measurements")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(measurements.len(), 2);

    // Newest first. 32.5 kg at 62 cm is far above the obesity threshold;
    // the keyword scan lands on the plain "Obesidad" category, which comes
    // first in table order.
    assert_eq!(
        measurements[0].get("measuredOn").and_then(|v| v.as_str()),
        Some("2025-04-03")
    );
    assert_eq!(
        measurements[0].get("category").and_then(|v| v.as_str()),
        Some("Obesidad")
    );

    // 60 kg at 1.50 m -> BMI 26.67 -> Sobrepeso.
    let first = &measurements[1];
    assert_eq!(first.get("measuredOn").and_then(|v| v.as_str()), Some("2025-04-01"));
    assert_eq!(first.get("weightKg").and_then(|v| v.as_f64()), Some(60.0));
    assert_eq!(first.get("bmi").and_then(|v| v.as_f64()), Some(26.67));
    assert_eq!(
        first.get("category").and_then(|v| v.as_str()),
        Some("Sobrepeso")
    );
    assert_eq!(
        first.get("notes").and_then(|v| v.as_str()),
        Some("control anual")
    );
}

#[test]
fn staff_defaults_and_lookup_misses() {
    let workspace = temp_dir("nutritrack-import-measurements-staff");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (staff_id, _student_id) = seed_workspace(&mut stdin, &mut reader, &workspace);

    // DocenteRUT path plus the caller-supplied default.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.measurements",
        json!({
            "defaultStaffId": staff_id,
            "rows": [
                {
                    "RUT": "12345678-5",
                    "FechaMedicion": "2025-04-01",
                    "Peso_kg": "30",
                    "Estatura_cm": "130",
                    "DocenteRUT": "20347878-K"
                },
                {
                    "RUT": "12345678-5",
                    "FechaMedicion": "2025-04-02",
                    "Peso_kg": "30",
                    "Estatura_cm": "130"
                }
            ]
        }),
    );
    assert_eq!(result.get("created").and_then(|v| v.as_u64()), Some(2));

    // Without a default, a staff-less row fails; unknown students fail too.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.measurements",
        json!({
            "rows": [
                {
                    "RUT": "12345678-5",
                    "FechaMedicion": "2025-04-03",
                    "Peso_kg": "30",
                    "Estatura_cm": "130"
                },
                {
                    "RUT": "14-0",
                    "FechaMedicion": "2025-04-03",
                    "Peso_kg": "30",
                    "Estatura_cm": "130",
                    "DocenteRUT": "20347878-K"
                }
            ]
        }),
    );
    assert_eq!(result.get("created").and_then(|v| v.as_u64()), Some(0));
    let errors = result
        .get("errors")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(errors.len(), 2);
    assert!(errors[0]
        .as_str()
        .unwrap_or("")
        .contains("no hay docente por defecto"));
    assert!(errors[1]
        .as_str()
        .unwrap_or("")
        .contains("No se encontró estudiante con RUT '14-0'"));
}
