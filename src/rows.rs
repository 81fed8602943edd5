use std::collections::HashMap;

/// A spreadsheet row as delivered by the external reader: header -> cell
/// text. Header matching is case-insensitive and blank cells count as
/// absent; everything else is the importer's problem.
pub type RawRow = HashMap<String, String>;

/// Loosely-typed student row. Field names mirror the expected spreadsheet
/// headers; all values stay strings until the importer validates them.
#[derive(Debug, Clone, Default)]
pub struct StudentRow {
    pub rut: Option<String>,
    pub full_name: Option<String>,
    pub birth_date: Option<String>,
    pub sex_code: Option<String>,
    pub establishment_id: Option<String>,
    pub establishment_name: Option<String>,
    pub course_id: Option<String>,
    pub course_name: Option<String>,
    pub record_status: Option<String>,
}

/// Loosely-typed measurement row.
#[derive(Debug, Clone, Default)]
pub struct MeasurementRow {
    pub rut: Option<String>,
    pub student_id: Option<String>,
    pub measured_on: Option<String>,
    pub weight_kg: Option<String>,
    pub height_cm: Option<String>,
    pub staff_id: Option<String>,
    pub staff_rut: Option<String>,
    pub notes: Option<String>,
}

fn get(row: &RawRow, header: &str) -> Option<String> {
    let wanted = header.to_lowercase();
    for (k, v) in row {
        if k.trim().to_lowercase() == wanted {
            let v = v.trim();
            if v.is_empty() {
                return None;
            }
            return Some(v.to_string());
        }
    }
    None
}

fn get_aliased(row: &RawRow, headers: &[&str]) -> Option<String> {
    headers.iter().find_map(|h| get(row, h))
}

pub fn student_row(row: &RawRow) -> StudentRow {
    StudentRow {
        rut: get(row, "RUT"),
        full_name: get(row, "NombreCompleto"),
        birth_date: get(row, "FechaNacimiento"),
        sex_code: get(row, "ID_Sexo"),
        // "Establecimiento" is a common shorthand header for the id column.
        establishment_id: get_aliased(row, &["ID_Establecimiento", "Establecimiento"]),
        establishment_name: get(row, "NombreEstablecimiento"),
        course_id: get(row, "ID_Curso"),
        course_name: get_aliased(row, &["NombreCurso", "Curso"]),
        record_status: get(row, "EstadoRegistro"),
    }
}

pub fn measurement_row(row: &RawRow) -> MeasurementRow {
    MeasurementRow {
        rut: get(row, "RUT"),
        student_id: get(row, "ID_Estudiante"),
        measured_on: get(row, "FechaMedicion"),
        weight_kg: get(row, "Peso_kg"),
        height_cm: get(row, "Estatura_cm"),
        staff_id: get(row, "ID_DocenteEncargado"),
        staff_rut: get(row, "DocenteRUT"),
        notes: get(row, "Observaciones"),
    }
}
