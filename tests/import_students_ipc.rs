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

/// Open a workspace and create one establishment with one course. Returns
/// (establishmentId, courseId).
fn seed_catalog(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> (i64, i64) {
    let est = request_ok(
        stdin,
        reader,
        "seed-est",
        "establishments.create",
        json!({ "name": "Escuela Gabriela Mistral" }),
    );
    let est_id = est
        .get("establishmentId")
        .and_then(|v| v.as_i64())
        .expect("establishmentId");
    let course = request_ok(
        stdin,
        reader,
        "seed-course",
        "courses.create",
        json!({ "establishmentId": est_id, "name": "1° Básico A" }),
    );
    let course_id = course
        .get("courseId")
        .and_then(|v| v.as_i64())
        .expect("courseId");
    (est_id, course_id)
}

#[test]
fn import_creates_updates_and_reports_row_errors() {
    let workspace = temp_dir("nutritrack-import-students");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (est_id, course_id) = seed_catalog(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.students",
        json!({
            "rows": [
                {
                    "RUT": "12345678-5",
                    "NombreCompleto": "Ana Soto",
                    "FechaNacimiento": "2015-03-09",
                    "ID_Sexo": "2",
                    "ID_Establecimiento": est_id,
                    "ID_Curso": course_id
                },
                {
                    "RUT": "12345678-5",
                    "NombreCompleto": "Ana Soto Rojas",
                    "FechaNacimiento": "2015-03-09",
                    "ID_Sexo": "2",
                    "NombreEstablecimiento": "escuela gabriela mistral",
                    "Curso": "1° básico a"
                },
                {
                    "RUT": "",
                    "NombreCompleto": "Sin Rut",
                    "FechaNacimiento": "2014-01-01",
                    "ID_Sexo": "1",
                    "ID_Establecimiento": est_id,
                    "ID_Curso": course_id
                },
                {
                    "RUT": "14-0",
                    "NombreCompleto": "Pedro Pérez",
                    "FechaNacimiento": "01/02/2014",
                    "ID_Sexo": "1",
                    "ID_Establecimiento": est_id,
                    "ID_Curso": course_id
                }
            ]
        }),
    );

    assert_eq!(result.get("created").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(result.get("updated").and_then(|v| v.as_u64()), Some(1));

    let errors = result
        .get("errors")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(errors.len(), 2, "{:?}", errors);
    // Row numbering starts at 2 (row 1 is the header).
    assert_eq!(errors[0].as_str(), Some("Línea 4: RUT vacío."));
    let line5 = errors[1].as_str().unwrap_or("");
    assert!(line5.starts_with("Línea 5:"), "{}", line5);
    assert!(line5.contains("FechaNacimiento inválida"), "{}", line5);

    // The second row's update won: name changed, resolved to the same course.
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.get",
        json!({ "rut": "12345678-5" }),
    );
    let student = got.get("student").cloned().unwrap_or_default();
    assert_eq!(
        student.get("fullName").and_then(|v| v.as_str()),
        Some("Ana Soto Rojas")
    );
    assert_eq!(student.get("courseId").and_then(|v| v.as_i64()), Some(course_id));
    assert_eq!(student.get("active").and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn reimport_is_idempotent_across_calls() {
    let workspace = temp_dir("nutritrack-import-students-idem");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (est_id, course_id) = seed_catalog(&mut stdin, &mut reader);

    let rows = json!({
        "rows": [{
            "RUT": "12345678-5",
            "NombreCompleto": "Ana Soto",
            "FechaNacimiento": "2015-03-09",
            "ID_Sexo": "2",
            "ID_Establecimiento": est_id,
            "ID_Curso": course_id,
            "EstadoRegistro": "1"
        }]
    });

    let first = request_ok(&mut stdin, &mut reader, "2", "import.students", rows.clone());
    assert_eq!(first.get("created").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(first.get("updated").and_then(|v| v.as_u64()), Some(0));

    let second = request_ok(&mut stdin, &mut reader, "3", "import.students", rows);
    assert_eq!(second.get("created").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(second.get("updated").and_then(|v| v.as_u64()), Some(1));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.list",
        json!({ "establishmentId": est_id }),
    );
    let students = listed
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(students.len(), 1);
    assert_eq!(
        students[0].get("birthDate").and_then(|v| v.as_str()),
        Some("2015-03-09")
    );
}

#[test]
fn unknown_references_reject_the_row() {
    let workspace = temp_dir("nutritrack-import-students-refs");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (est_id, _course_id) = seed_catalog(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.students",
        json!({
            "rows": [
                {
                    "RUT": "12345678-5",
                    "NombreCompleto": "Ana Soto",
                    "FechaNacimiento": "2015-03-09",
                    "ID_Sexo": "2",
                    "ID_Establecimiento": 999,
                    "ID_Curso": 1
                },
                {
                    "RUT": "12345678-5",
                    "NombreCompleto": "Ana Soto",
                    "FechaNacimiento": "2015-03-09",
                    "ID_Sexo": "2",
                    "ID_Establecimiento": est_id,
                    "NombreCurso": "8° Básico Z"
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
        .contains("Establecimiento ID 999 no encontrado"));
    assert!(errors[1]
        .as_str()
        .unwrap_or("")
        .contains("no encontrado en el establecimiento"));
}
