use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "activity.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            active_semester INTEGER NOT NULL,
            active_school_year INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            label TEXT NOT NULL,
            is_junior INTEGER NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            UNIQUE(school_id, label)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            classroom_id TEXT,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_classroom ON students(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            template TEXT NOT NULL,
            coverage TEXT NOT NULL,
            required INTEGER NOT NULL,
            active INTEGER NOT NULL,
            deadline TEXT,
            unit TEXT NOT NULL,
            target_amount REAL NOT NULL,
            update_protocol TEXT NOT NULL,
            semester INTEGER NOT NULL,
            school_year INTEGER NOT NULL,
            owner_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    ensure_activities_updated_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_school_scope
         ON activities(school_id, semester, school_year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_classrooms(
            activity_id INTEGER NOT NULL,
            classroom_label TEXT NOT NULL,
            PRIMARY KEY(activity_id, classroom_label),
            FOREIGN KEY(activity_id) REFERENCES activities(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_students(
            activity_id INTEGER NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(activity_id, student_id),
            FOREIGN KEY(activity_id) REFERENCES activities(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS records(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            activity_id INTEGER NOT NULL,
            student_id TEXT NOT NULL,
            teacher_id TEXT,
            semester INTEGER NOT NULL,
            school_year INTEGER NOT NULL,
            amount REAL NOT NULL,
            data TEXT NOT NULL,
            advice TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(activity_id) REFERENCES activities(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_records_version(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_activity_scope
         ON records(activity_id, semester, school_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_student ON records(student_id)",
        [],
    )?;

    // Append-only. Rows are only removed together with their record.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS record_status_history(
            record_id INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            status TEXT NOT NULL,
            at TEXT NOT NULL,
            PRIMARY KEY(record_id, seq),
            FOREIGN KEY(record_id) REFERENCES records(id)
        )",
        [],
    )?;

    Ok(())
}

fn ensure_activities_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "activities", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE activities ADD COLUMN updated_at TEXT", [])?;
    conn.execute(
        "UPDATE activities SET updated_at = created_at WHERE updated_at IS NULL",
        [],
    )?;
    Ok(())
}

fn ensure_records_version(conn: &Connection) -> anyhow::Result<()> {
    // Workspaces created before optimistic locking start every record at version 1.
    if table_has_column(conn, "records", "version")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE records ADD COLUMN version INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
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
