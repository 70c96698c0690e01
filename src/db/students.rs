//! The `students` table behind the [`StudentStore`] trait.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::connection::{ensure_schema, open_connection};
use crate::bus::ChangeBus;
use crate::error::StoreError;
use crate::models::{EntityKind, NewStudent, Student, StudentId};

/// Synchronous CRUD over the students table. Every call blocks on I/O, so
/// callers on an interactive thread should hand it to a worker.
pub trait StudentStore: Send + Sync {
    /// Insert a row and return its freshly assigned identifier.
    fn create(&self, student: &NewStudent) -> Result<StudentId, StoreError>;

    /// Returns Ok(None) if no row has that identifier.
    fn read_by_id(&self, id: StudentId) -> Result<Option<Student>, StoreError>;

    /// Every student, ordered by name.
    fn read_all(&self) -> Result<Vec<Student>, StoreError>;

    /// Students whose name contains `filter`, ordered by name.
    fn read_matching(&self, filter: &str) -> Result<Vec<Student>, StoreError>;

    /// True iff exactly one row changed.
    fn update(&self, student: &Student) -> Result<bool, StoreError>;

    /// True iff exactly one row was removed.
    fn delete_by_id(&self, id: StudentId) -> Result<bool, StoreError>;
}

const SELECT_COLUMNS: &str = "SELECT id, name, course, phone, address, avatar FROM students";

/// SQLite-backed store. Connections are opened per operation and closed when
/// it returns; mutations go through `write_lock` so only one writer touches the
/// file at a time and then announce themselves on the change bus.
pub struct SqliteStudentStore {
    path: PathBuf,
    bus: ChangeBus,
    write_lock: Mutex<()>,
}

impl SqliteStudentStore {
    pub fn open(path: impl AsRef<Path>, bus: ChangeBus) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        ensure_schema(&path)?;
        info!(path = %path.display(), "opened student store");
        Ok(Self {
            path,
            bus,
            write_lock: Mutex::new(()),
        })
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        open_connection(&self.path)
    }

    /// Run a mutation with the writer lock held, then publish if it reports a
    /// change. Publishing happens after the connection is closed.
    fn write<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, StoreError>,
        changed: impl FnOnce(&T) -> bool,
    ) -> Result<T, StoreError> {
        let outcome = {
            let _writer = self
                .write_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let conn = self.connect()?;
            op(&conn)?
        };
        if changed(&outcome) {
            self.bus.publish(EntityKind::Students);
        }
        Ok(outcome)
    }

    fn query_list(&self, sql: &str, filter: Option<&str>) -> Result<Vec<Student>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(StoreError::sqlite("prepare student list query"))?;

        let rows = match filter {
            Some(filter) => stmt.query_map(params![filter], student_from_row),
            None => stmt.query_map([], student_from_row),
        }
        .map_err(StoreError::sqlite("load students"))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::sqlite("collect students"))
    }
}

impl StudentStore for SqliteStudentStore {
    fn create(&self, student: &NewStudent) -> Result<StudentId, StoreError> {
        let id = self.write(
            |conn| {
                conn.execute(
                    "INSERT INTO students (name, course, phone, address, avatar)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        student.name,
                        student.course,
                        student.phone,
                        student.address,
                        student.avatar
                    ],
                )
                .map_err(StoreError::sqlite("insert student"))?;
                Ok(StudentId(conn.last_insert_rowid()))
            },
            |_| true,
        )?;
        debug!(%id, name = %student.name, "student created");
        Ok(id)
    }

    fn read_by_id(&self, id: StudentId) -> Result<Option<Student>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            params![id],
            student_from_row,
        )
        .optional()
        .map_err(StoreError::sqlite("read student"))
    }

    fn read_all(&self) -> Result<Vec<Student>, StoreError> {
        self.query_list(&format!("{SELECT_COLUMNS} ORDER BY name, id"), None)
    }

    fn read_matching(&self, filter: &str) -> Result<Vec<Student>, StoreError> {
        if filter.is_empty() {
            return self.read_all();
        }
        self.query_list(
            &format!("{SELECT_COLUMNS} WHERE instr(name, ?1) > 0 ORDER BY name, id"),
            Some(filter),
        )
    }

    fn update(&self, student: &Student) -> Result<bool, StoreError> {
        let updated = self.write(
            |conn| {
                conn.execute(
                    "UPDATE students
                     SET name = ?1, course = ?2, phone = ?3, address = ?4, avatar = ?5
                     WHERE id = ?6",
                    params![
                        student.name,
                        student.course,
                        student.phone,
                        student.address,
                        student.avatar,
                        student.id
                    ],
                )
                .map_err(StoreError::sqlite("update student"))
            },
            |rows| *rows == 1,
        )?;
        debug!(id = %student.id, updated, "student update finished");
        Ok(updated == 1)
    }

    fn delete_by_id(&self, id: StudentId) -> Result<bool, StoreError> {
        let deleted = self.write(
            |conn| {
                conn.execute("DELETE FROM students WHERE id = ?1", params![id])
                    .map_err(StoreError::sqlite("delete student"))
            },
            |rows| *rows == 1,
        )?;
        debug!(%id, deleted, "student delete finished");
        Ok(deleted == 1)
    }
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        course: row.get(2)?,
        phone: row.get(3)?,
        address: row.get(4)?,
        avatar: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use proptest::prelude::*;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn new_student(name: &str) -> NewStudent {
        NewStudent {
            name: name.to_string(),
            course: "1DAW".to_string(),
            phone: "600 000 000".to_string(),
            address: "Calle Real 1".to_string(),
            avatar: String::new(),
        }
    }

    fn store_with_events() -> (TempDir, SqliteStudentStore, Receiver<EntityKind>) {
        let dir = tempdir().unwrap();
        let bus = ChangeBus::new().unwrap();
        let (tx, rx) = unbounded();
        bus.subscribe(EntityKind::Students, move |kind| {
            let _ = tx.send(kind);
        });
        let store = SqliteStudentStore::open(dir.path().join("roster.sqlite"), bus).unwrap();
        (dir, store, rx)
    }

    /// Publishes go through the dispatcher thread, so give stragglers a moment
    /// before counting.
    fn drain(rx: &Receiver<EntityKind>) -> usize {
        let mut count = 0;
        while rx.recv_timeout(Duration::from_millis(200)).is_ok() {
            count += 1;
        }
        count
    }

    #[test]
    fn read_all_orders_by_name_case_sensitively() {
        let (_dir, store, _rx) = store_with_events();
        for name in ["maria", "Carlos", "Ana", "beatriz"] {
            store.create(&new_student(name)).unwrap();
        }

        let names: Vec<String> = store
            .read_all()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["Ana", "Carlos", "beatriz", "maria"]);
    }

    #[test]
    fn read_all_on_empty_table_is_empty() {
        let (_dir, store, _rx) = store_with_events();
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn read_by_id_missing_row_is_none() {
        let (_dir, store, _rx) = store_with_events();
        assert_eq!(store.read_by_id(StudentId(42)).unwrap(), None);
    }

    #[test]
    fn identifiers_are_never_reused() {
        let (_dir, store, _rx) = store_with_events();
        let first = store.create(&new_student("Ana")).unwrap();
        assert!(store.delete_by_id(first).unwrap());
        let second = store.create(&new_student("Ana")).unwrap();
        assert!(second > first);
    }

    #[test]
    fn update_and_delete_report_row_counts() {
        let (_dir, store, _rx) = store_with_events();
        let id = store.create(&new_student("Ana")).unwrap();

        let mut student = store.read_by_id(id).unwrap().unwrap();
        student.phone = "611 111 111".to_string();
        assert!(store.update(&student).unwrap());
        assert_eq!(store.read_by_id(id).unwrap().unwrap().phone, "611 111 111");

        let ghost = Student {
            id: StudentId(999),
            ..student
        };
        assert!(!store.update(&ghost).unwrap());

        assert!(store.delete_by_id(id).unwrap());
        assert!(!store.delete_by_id(id).unwrap());
    }

    #[test]
    fn every_successful_mutation_publishes_once() {
        let (_dir, store, rx) = store_with_events();

        let id = store.create(&new_student("Ana")).unwrap();
        assert_eq!(drain(&rx), 1);

        let mut student = store.read_by_id(id).unwrap().unwrap();
        student.course = "2DAW".to_string();
        store.update(&student).unwrap();
        assert_eq!(drain(&rx), 1);

        store.delete_by_id(id).unwrap();
        assert_eq!(drain(&rx), 1);
    }

    #[test]
    fn unsuccessful_mutations_stay_quiet() {
        let (_dir, store, rx) = store_with_events();
        let ghost = new_student("Nadie").with_id(StudentId(77));

        assert!(!store.update(&ghost).unwrap());
        assert!(!store.delete_by_id(StudentId(77)).unwrap());
        store.read_all().unwrap();

        assert_eq!(drain(&rx), 0);
    }

    #[test]
    fn read_matching_filters_on_name() {
        let (_dir, store, _rx) = store_with_events();
        for name in ["Ana Torres", "Luis Ortega", "Mariana Ruiz"] {
            store.create(&new_student(name)).unwrap();
        }

        let names: Vec<String> = store
            .read_matching("ana")
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["Mariana Ruiz"]);
        assert_eq!(store.read_matching("").unwrap().len(), 3);
    }

    #[test]
    fn quotes_in_values_are_stored_verbatim() {
        let (_dir, store, _rx) = store_with_events();
        let id = store.create(&new_student("O'Brien\"; DROP TABLE students; --")).unwrap();
        assert!(store.delete_by_id(id).unwrap());
        assert!(store.read_all().unwrap().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn create_then_read_round_trips(
            name in "[A-Za-z ]{1,20}",
            course in "[0-9A-Z]{0,6}",
            phone in "[0-9 ]{0,12}",
            address in "\\PC{0,30}",
        ) {
            let dir = tempdir().unwrap();
            let store = SqliteStudentStore::open(
                dir.path().join("roster.sqlite"),
                ChangeBus::new().unwrap(),
            )
            .unwrap();
            let draft = NewStudent { name, course, phone, address, avatar: String::new() };

            let id = store.create(&draft).unwrap();
            let stored = store.read_by_id(id).unwrap().unwrap();

            prop_assert_eq!(stored, draft.with_id(id));
        }
    }
}
