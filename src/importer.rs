use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Local, NaiveDate};
use serde::Serialize;
use thiserror::Error;

use crate::bmi;
use crate::rows::{MeasurementRow, StudentRow};
use crate::rut;
use crate::store::{Classifier, ImportStore, NewMeasurement, NewStudent};

/// Plausible ranges for a school-age measurement. The bulk importer accepts
/// heights down to 50 cm while the interactive entry form bottoms out at
/// 80 cm; the divergence is preserved as-is (bulk files may carry younger
/// children), so keep these as separate constants.
pub const WEIGHT_MIN_KG: f64 = 10.0;
pub const WEIGHT_MAX_KG: f64 = 150.0;
pub const IMPORT_HEIGHT_MIN_CM: f64 = 50.0;
pub const ENTRY_HEIGHT_MIN_CM: f64 = 80.0;
pub const HEIGHT_MAX_CM: f64 = 220.0;

const DATE_FMT: &str = "%Y-%m-%d";

/// Row-scoped failure. Nothing here aborts the batch; every variant becomes
/// one "Línea N: ..." diagnostic and processing moves to the next row.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    ReferenceNotFound(String),
    #[error("{0}")]
    ExternalService(String),
    #[error("excepción procesando fila: {0}")]
    Unexpected(String),
}

fn unexpected(e: anyhow::Error) -> RowError {
    RowError::Unexpected(e.to_string())
}

#[derive(Debug, Default, Serialize)]
pub struct ImportOutcome {
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<String>,
}

impl ImportOutcome {
    fn record(&mut self, line: usize, err: &RowError) {
        self.errors.push(format!("Línea {}: {}", line, err));
    }
}

enum RowAction {
    Created,
    Updated,
}

/// Validate and upsert a batch of student rows. Rows are 1-indexed from 2
/// (row 1 is the spreadsheet header). Each accepted row is committed on its
/// own before the next row starts; the cancellation flag is checked between
/// rows only.
pub fn import_students(
    store: &mut dyn ImportStore,
    rows: &[StudentRow],
    cancel: &AtomicBool,
) -> ImportOutcome {
    let mut outcome = ImportOutcome::default();

    for (i, row) in rows.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let line = i + 2;
        match import_student_row(store, row) {
            Ok(RowAction::Created) => outcome.created += 1,
            Ok(RowAction::Updated) => outcome.updated += 1,
            Err(e) => outcome.record(line, &e),
        }
    }

    outcome
}

fn import_student_row(
    store: &mut dyn ImportStore,
    row: &StudentRow,
) -> Result<RowAction, RowError> {
    let Some(rut_value) = row.rut.as_deref() else {
        return Err(RowError::Validation("RUT vacío.".into()));
    };
    if !rut::validate(rut_value) {
        return Err(RowError::Validation(format!(
            "RUT inválido ('{}').",
            rut_value
        )));
    }

    let Some(full_name) = row.full_name.as_deref() else {
        return Err(RowError::Validation("NombreCompleto vacío.".into()));
    };

    let birth_raw = row.birth_date.as_deref().unwrap_or("");
    let Ok(birth_date) = NaiveDate::parse_from_str(birth_raw, DATE_FMT) else {
        return Err(RowError::Validation(format!(
            "FechaNacimiento inválida ('{}'). Use yyyy-MM-dd.",
            birth_raw
        )));
    };

    let sex_raw = row.sex_code.as_deref().unwrap_or("");
    let Ok(sex_code) = sex_raw.parse::<i64>() else {
        return Err(RowError::Validation(format!(
            "ID_Sexo inválido ('{}').",
            sex_raw
        )));
    };

    // Establishment: prefer a numeric id; a non-numeric or absent id column
    // falls back to the name column.
    let establishment_id = match row
        .establishment_id
        .as_deref()
        .and_then(|s| s.parse::<i64>().ok())
    {
        Some(id) => {
            if store.establishment_by_id(id).map_err(unexpected)?.is_none() {
                return Err(RowError::ReferenceNotFound(format!(
                    "Establecimiento ID {} no encontrado.",
                    id
                )));
            }
            id
        }
        None => match row.establishment_name.as_deref() {
            Some(name) => match store.establishment_by_name(name).map_err(unexpected)? {
                Some(est) => est.id,
                None => {
                    return Err(RowError::ReferenceNotFound(format!(
                        "Establecimiento con nombre '{}' no encontrado.",
                        name
                    )))
                }
            },
            None => {
                return Err(RowError::Validation(
                    "Falta ID_Establecimiento o NombreEstablecimiento.".into(),
                ))
            }
        },
    };

    // Course: same id/name preference, but the name match is scoped to the
    // resolved establishment and the id path re-checks membership.
    let course_id = match row.course_id.as_deref().and_then(|s| s.parse::<i64>().ok()) {
        Some(id) => {
            let Some(course) = store.course_by_id(id).map_err(unexpected)? else {
                return Err(RowError::ReferenceNotFound(format!(
                    "Curso ID {} no encontrado.",
                    id
                )));
            };
            if course.establishment_id != establishment_id {
                return Err(RowError::Validation(format!(
                    "Curso ID {} no pertenece al establecimiento ID {}.",
                    id, establishment_id
                )));
            }
            id
        }
        None => match row.course_name.as_deref() {
            Some(name) => {
                match store
                    .course_by_name(establishment_id, name)
                    .map_err(unexpected)?
                {
                    Some(course) => course.id,
                    None => {
                        return Err(RowError::ReferenceNotFound(format!(
                            "Curso con nombre '{}' no encontrado en el establecimiento ID {}.",
                            name, establishment_id
                        )))
                    }
                }
            }
            None => return Err(RowError::Validation("Falta ID_Curso o NombreCurso.".into())),
        },
    };

    let active = parse_record_status(row.record_status.as_deref());

    let record = NewStudent {
        rut: rut_value.to_string(),
        full_name: full_name.to_string(),
        birth_date,
        sex_code,
        establishment_id,
        course_id,
        active,
    };

    // Fresh lookup per row: an earlier row in the same batch may have
    // created this student already.
    let existing = store.student_by_rut(rut_value).map_err(unexpected)?;

    store.begin_row().map_err(unexpected)?;
    let result = match &existing {
        Some(student) => store
            .update_student(student.id, &record)
            .map(|_| RowAction::Updated),
        None => store.insert_student(&record).map(|_| RowAction::Created),
    };
    match result {
        Ok(action) => {
            store.commit_row().map_err(unexpected)?;
            Ok(action)
        }
        Err(e) => {
            let _ = store.rollback_row();
            Err(unexpected(e))
        }
    }
}

/// Tri-state active flag: explicit true/false forms, empty defaults to
/// active, anything else is compared case-insensitively against "true"/"1".
fn parse_record_status(value: Option<&str>) -> bool {
    match value {
        Some("1") | Some("true") | Some("True") => true,
        Some("0") | Some("false") | Some("False") => false,
        None | Some("") => true,
        Some(other) => {
            let t = other.trim();
            t.eq_ignore_ascii_case("true") || t == "1"
        }
    }
}

/// Validate and insert a batch of measurement rows. Each row commits before
/// its classification call so a classifier failure leaves the measurement
/// persisted; that failure is reported but the row still counts as created.
pub fn import_measurements(
    store: &mut dyn ImportStore,
    classifier: &dyn Classifier,
    rows: &[MeasurementRow],
    default_staff_id: Option<i64>,
    cancel: &AtomicBool,
) -> ImportOutcome {
    let mut outcome = ImportOutcome::default();
    let today = Local::now().date_naive();

    for (i, row) in rows.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let line = i + 2;
        match import_measurement_row(store, classifier, row, default_staff_id, today) {
            Ok(classification_error) => {
                outcome.created += 1;
                if let Some(e) = classification_error {
                    outcome.record(line, &e);
                }
            }
            Err(e) => outcome.record(line, &e),
        }
    }

    outcome
}

fn import_measurement_row(
    store: &mut dyn ImportStore,
    classifier: &dyn Classifier,
    row: &MeasurementRow,
    default_staff_id: Option<i64>,
    today: NaiveDate,
) -> Result<Option<RowError>, RowError> {
    // Student: RUT is preferred over the numeric id.
    let student = if let Some(rut_value) = row.rut.as_deref() {
        if !rut::validate(rut_value) {
            return Err(RowError::Validation(format!(
                "RUT estudiante inválido ('{}').",
                rut_value
            )));
        }
        match store.student_by_rut(rut_value).map_err(unexpected)? {
            Some(s) => s,
            None => {
                return Err(RowError::ReferenceNotFound(format!(
                    "No se encontró estudiante con RUT '{}'.",
                    rut_value
                )))
            }
        }
    } else if let Some(id) = row.student_id.as_deref().and_then(|s| s.parse::<i64>().ok()) {
        match store.student_by_id(id).map_err(unexpected)? {
            Some(s) => s,
            None => {
                return Err(RowError::ReferenceNotFound(format!(
                    "No se encontró estudiante con ID {}.",
                    id
                )))
            }
        }
    } else {
        return Err(RowError::Validation(
            "Falta RUT o ID_Estudiante para localizar al estudiante.".into(),
        ));
    };

    let date_raw = row.measured_on.as_deref().unwrap_or("");
    let Ok(measured_on) = NaiveDate::parse_from_str(date_raw, DATE_FMT) else {
        return Err(RowError::Validation(format!(
            "FechaMedicion inválida ('{}'). Use yyyy-MM-dd.",
            date_raw
        )));
    };
    if measured_on > today {
        return Err(RowError::Validation(format!(
            "FechaMedicion no puede ser futura ('{}').",
            date_raw
        )));
    }

    let weight_raw = row.weight_kg.as_deref().unwrap_or("");
    let Ok(weight_kg) = weight_raw.parse::<f64>() else {
        return Err(RowError::Validation(format!(
            "Peso_kg inválido ('{}').",
            weight_raw
        )));
    };
    let height_raw = row.height_cm.as_deref().unwrap_or("");
    let Ok(height_cm) = height_raw.parse::<f64>() else {
        return Err(RowError::Validation(format!(
            "Estatura_cm inválida ('{}').",
            height_raw
        )));
    };

    if !(WEIGHT_MIN_KG..=WEIGHT_MAX_KG).contains(&weight_kg) {
        return Err(RowError::Validation(format!(
            "Peso fuera de rango ({}).",
            weight_kg
        )));
    }
    if !(IMPORT_HEIGHT_MIN_CM..=HEIGHT_MAX_CM).contains(&height_cm) {
        return Err(RowError::Validation(format!(
            "Estatura fuera de rango ({}).",
            height_cm
        )));
    }

    // Responsible staff: numeric id, then staff RUT, then the caller's
    // default (typically the logged-in user driving the import).
    let staff_id = if let Some(id) = row.staff_id.as_deref().and_then(|s| s.parse::<i64>().ok()) {
        if store.staff_by_id(id).map_err(unexpected)?.is_none() {
            return Err(RowError::ReferenceNotFound(format!(
                "Docente ID {} no encontrado.",
                id
            )));
        }
        id
    } else if let Some(staff_rut) = row.staff_rut.as_deref() {
        if !rut::validate(staff_rut) {
            return Err(RowError::Validation(format!(
                "DocenteRUT inválido ('{}').",
                staff_rut
            )));
        }
        match store.staff_by_rut(staff_rut).map_err(unexpected)? {
            Some(s) => s.id,
            None => {
                return Err(RowError::ReferenceNotFound(format!(
                    "Docente con RUT '{}' no encontrado.",
                    staff_rut
                )))
            }
        }
    } else if let Some(id) = default_staff_id {
        id
    } else {
        return Err(RowError::Validation(
            "Falta ID_DocenteEncargado o DocenteRUT, y no hay docente por defecto.".into(),
        ));
    };

    let weight_kg = bmi::round2(weight_kg);
    let height_cm = bmi::round2(height_cm);
    let record = NewMeasurement {
        student_id: student.id,
        measured_on,
        staff_id,
        weight_kg,
        height_cm,
        bmi: bmi::bmi(weight_kg, height_cm),
        notes: row.notes.clone(),
        recorded_at: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
    };

    store.begin_row().map_err(unexpected)?;
    let measurement_id = match store.insert_measurement(&record) {
        Ok(id) => id,
        Err(e) => {
            let _ = store.rollback_row();
            return Err(unexpected(e));
        }
    };
    store.commit_row().map_err(unexpected)?;

    // The row is committed; a classification failure is reported but does
    // not un-create the measurement.
    let classification_error = classifier
        .classify(measurement_id, measured_on, student.birth_date, student.sex_code)
        .err()
        .map(|e| {
            RowError::ExternalService(format!(
                "Error clasificando medición ID {}: {}",
                measurement_id, e
            ))
        });

    Ok(classification_error)
}
