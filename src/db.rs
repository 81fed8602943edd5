use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("nutritrack.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

/// In-memory database with the full schema, for tests.
#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS regions(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS communes(
            id INTEGER PRIMARY KEY,
            region_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(region_id) REFERENCES regions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_communes_region ON communes(region_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS establishments(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT,
            commune_id INTEGER,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(commune_id) REFERENCES communes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_establishments_commune ON establishments(commune_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id INTEGER PRIMARY KEY,
            establishment_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(establishment_id) REFERENCES establishments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_establishment ON courses(establishment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id INTEGER PRIMARY KEY,
            rut TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT,
            role TEXT,
            establishment_id INTEGER,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(establishment_id) REFERENCES establishments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_establishment ON staff(establishment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bmi_categories(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            min_bmi REAL,
            max_bmi REAL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY,
            rut TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            birth_date TEXT NOT NULL,
            sex_code INTEGER NOT NULL,
            establishment_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(establishment_id) REFERENCES establishments(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_establishment ON students(establishment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_course ON students(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS measurements(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            measured_on TEXT NOT NULL,
            staff_id INTEGER NOT NULL,
            weight_kg REAL NOT NULL,
            height_cm REAL NOT NULL,
            bmi REAL NOT NULL,
            category_id INTEGER,
            z_score REAL,
            notes TEXT,
            recorded_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(staff_id) REFERENCES staff(id),
            FOREIGN KEY(category_id) REFERENCES bmi_categories(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_measurements_student ON measurements(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_measurements_staff ON measurements(staff_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_measurements_category ON measurements(category_id)",
        [],
    )?;

    // Workspaces created before the classification work lack z_score.
    ensure_measurements_z_score(conn)?;

    seed_bmi_categories(conn)?;

    Ok(())
}

fn ensure_measurements_z_score(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "measurements", "z_score")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE measurements ADD COLUMN z_score REAL", [])?;
    Ok(())
}

/// The category table is master data upstream. Seed the seven reference
/// bands once so fresh workspaces can classify immediately.
fn seed_bmi_categories(conn: &Connection) -> anyhow::Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM bmi_categories", [], |r| r.get(0))?;
    if count > 0 {
        return Ok(());
    }

    let bands: [(&str, Option<f64>, Option<f64>); 7] = [
        ("Bajo peso severo", None, Some(16.0)),
        ("Bajo peso moderado", Some(16.0), Some(17.0)),
        ("Bajo peso", Some(17.0), Some(18.5)),
        ("Normal", Some(18.5), Some(25.0)),
        ("Sobrepeso", Some(25.0), Some(30.0)),
        ("Obesidad", Some(30.0), Some(35.0)),
        ("Obesidad severa", Some(35.0), None),
    ];
    let mut ins =
        conn.prepare("INSERT INTO bmi_categories(name, min_bmi, max_bmi) VALUES(?, ?, ?)")?;
    for (name, min, max) in bands {
        ins.execute((name, min, max))?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
