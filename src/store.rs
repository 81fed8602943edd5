use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};

use crate::bmi;

#[derive(Debug, Clone)]
pub struct Establishment {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Course {
    pub id: i64,
    pub establishment_id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: i64,
    pub rut: String,
    pub full_name: String,
    pub birth_date: NaiveDate,
    pub sex_code: i64,
    pub establishment_id: i64,
    pub course_id: i64,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct StaffMember {
    pub id: i64,
    pub rut: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub rut: String,
    pub full_name: String,
    pub birth_date: NaiveDate,
    pub sex_code: i64,
    pub establishment_id: i64,
    pub course_id: i64,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct NewMeasurement {
    pub student_id: i64,
    pub measured_on: NaiveDate,
    pub staff_id: i64,
    pub weight_kg: f64,
    pub height_cm: f64,
    pub bmi: f64,
    pub notes: Option<String>,
    pub recorded_at: String,
}

/// Persistence port for the bulk importer. Each imported row is wrapped in
/// its own `begin_row`/`commit_row` pair so a later row's failure never
/// rolls back earlier successes. Lookups run outside the row transaction.
pub trait ImportStore {
    fn establishment_by_id(&self, id: i64) -> anyhow::Result<Option<Establishment>>;
    fn establishment_by_name(&self, name: &str) -> anyhow::Result<Option<Establishment>>;
    fn course_by_id(&self, id: i64) -> anyhow::Result<Option<Course>>;
    /// Name match scoped to one establishment; a same-named course elsewhere
    /// must not match.
    fn course_by_name(&self, establishment_id: i64, name: &str) -> anyhow::Result<Option<Course>>;
    fn student_by_rut(&self, rut: &str) -> anyhow::Result<Option<Student>>;
    fn student_by_id(&self, id: i64) -> anyhow::Result<Option<Student>>;
    fn staff_by_id(&self, id: i64) -> anyhow::Result<Option<StaffMember>>;
    fn staff_by_rut(&self, rut: &str) -> anyhow::Result<Option<StaffMember>>;

    fn begin_row(&mut self) -> anyhow::Result<()>;
    fn commit_row(&mut self) -> anyhow::Result<()>;
    fn rollback_row(&mut self) -> anyhow::Result<()>;

    fn insert_student(&mut self, student: &NewStudent) -> anyhow::Result<i64>;
    fn update_student(&mut self, id: i64, student: &NewStudent) -> anyhow::Result<()>;
    /// Returns the generated measurement id.
    fn insert_measurement(&mut self, m: &NewMeasurement) -> anyhow::Result<i64>;
}

/// External classification port. The real implementation computes reference
/// Z-scores from the measurement date, birth date, and sex; it may fail, and
/// the importer treats that as row-scoped and non-fatal.
pub trait Classifier {
    fn classify(
        &self,
        measurement_id: i64,
        measured_on: NaiveDate,
        birth_date: NaiveDate,
        sex_code: i64,
    ) -> anyhow::Result<()>;
}

const DATE_FMT: &str = "%Y-%m-%d";

fn parse_stored_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, DATE_FMT).unwrap_or_default()
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    let birth_date: String = row.get(3)?;
    Ok(Student {
        id: row.get(0)?,
        rut: row.get(1)?,
        full_name: row.get(2)?,
        birth_date: parse_stored_date(&birth_date),
        sex_code: row.get(4)?,
        establishment_id: row.get(5)?,
        course_id: row.get(6)?,
        active: row.get::<_, i64>(7)? != 0,
    })
}

const STUDENT_COLS: &str =
    "id, rut, full_name, birth_date, sex_code, establishment_id, course_id, active";

impl ImportStore for SqliteStore<'_> {
    fn establishment_by_id(&self, id: i64) -> anyhow::Result<Option<Establishment>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name FROM establishments WHERE id = ?",
                [id],
                |r| {
                    Ok(Establishment {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn establishment_by_name(&self, name: &str) -> anyhow::Result<Option<Establishment>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name FROM establishments WHERE lower(trim(name)) = lower(trim(?))",
                [name],
                |r| {
                    Ok(Establishment {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn course_by_id(&self, id: i64) -> anyhow::Result<Option<Course>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, establishment_id, name FROM courses WHERE id = ?",
                [id],
                |r| {
                    Ok(Course {
                        id: r.get(0)?,
                        establishment_id: r.get(1)?,
                        name: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn course_by_name(&self, establishment_id: i64, name: &str) -> anyhow::Result<Option<Course>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, establishment_id, name FROM courses
                 WHERE establishment_id = ? AND lower(trim(name)) = lower(trim(?))",
                (establishment_id, name),
                |r| {
                    Ok(Course {
                        id: r.get(0)?,
                        establishment_id: r.get(1)?,
                        name: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn student_by_rut(&self, rut: &str) -> anyhow::Result<Option<Student>> {
        let sql = format!("SELECT {} FROM students WHERE rut = ?", STUDENT_COLS);
        let row = self
            .conn
            .query_row(&sql, [rut], student_from_row)
            .optional()?;
        Ok(row)
    }

    fn student_by_id(&self, id: i64) -> anyhow::Result<Option<Student>> {
        let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLS);
        let row = self
            .conn
            .query_row(&sql, [id], student_from_row)
            .optional()?;
        Ok(row)
    }

    fn staff_by_id(&self, id: i64) -> anyhow::Result<Option<StaffMember>> {
        let row = self
            .conn
            .query_row("SELECT id, rut, name FROM staff WHERE id = ?", [id], |r| {
                Ok(StaffMember {
                    id: r.get(0)?,
                    rut: r.get(1)?,
                    name: r.get(2)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    fn staff_by_rut(&self, rut: &str) -> anyhow::Result<Option<StaffMember>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, rut, name FROM staff WHERE rut = ?",
                [rut],
                |r| {
                    Ok(StaffMember {
                        id: r.get(0)?,
                        rut: r.get(1)?,
                        name: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn begin_row(&mut self) -> anyhow::Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit_row(&mut self) -> anyhow::Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback_row(&mut self) -> anyhow::Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn insert_student(&mut self, student: &NewStudent) -> anyhow::Result<i64> {
        self.conn.execute(
            "INSERT INTO students(rut, full_name, birth_date, sex_code, establishment_id, course_id, active)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &student.rut,
                &student.full_name,
                student.birth_date.format(DATE_FMT).to_string(),
                student.sex_code,
                student.establishment_id,
                student.course_id,
                student.active as i64,
            ),
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_student(&mut self, id: i64, student: &NewStudent) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE students
             SET full_name = ?, birth_date = ?, sex_code = ?, establishment_id = ?, course_id = ?, active = ?
             WHERE id = ?",
            (
                &student.full_name,
                student.birth_date.format(DATE_FMT).to_string(),
                student.sex_code,
                student.establishment_id,
                student.course_id,
                student.active as i64,
                id,
            ),
        )?;
        Ok(())
    }

    fn insert_measurement(&mut self, m: &NewMeasurement) -> anyhow::Result<i64> {
        self.conn.execute(
            "INSERT INTO measurements(student_id, measured_on, staff_id, weight_kg, height_cm, bmi, notes, recorded_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                m.student_id,
                m.measured_on.format(DATE_FMT).to_string(),
                m.staff_id,
                m.weight_kg,
                m.height_cm,
                m.bmi,
                &m.notes,
                &m.recorded_at,
            ),
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

/// Threshold fallback classifier. Only assigns a category when the external
/// procedure left none, and only from the stored BMI value; it never
/// overwrites an existing classification and never touches z_score.
pub struct FallbackClassifier<'a> {
    conn: &'a Connection,
}

impl<'a> FallbackClassifier<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl Classifier for FallbackClassifier<'_> {
    fn classify(
        &self,
        measurement_id: i64,
        _measured_on: NaiveDate,
        _birth_date: NaiveDate,
        _sex_code: i64,
    ) -> anyhow::Result<()> {
        let current: Option<(f64, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT bmi, category_id FROM measurements WHERE id = ?",
                [measurement_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((bmi_value, category_id)) = current else {
            anyhow::bail!("medición {} no encontrada", measurement_id);
        };
        if category_id.is_some() {
            return Ok(());
        }

        let keyword = bmi::band_keyword(bmi::fallback_band(bmi_value));
        let category: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM bmi_categories
                 WHERE instr(lower(name), ?) > 0
                 ORDER BY id LIMIT 1",
                [&keyword],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(category_id) = category {
            self.conn.execute(
                "UPDATE measurements SET category_id = ? WHERE id = ?",
                (category_id, measurement_id),
            )?;
        }
        Ok(())
    }
}
