//! Domain models that mirror the `students` table. They stay plain data
//! holders so the store, the engine, and the terminal front-end can pass them
//! around by value.

use std::cmp::Ordering;
use std::fmt;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

/// Stable identifier assigned by the store on insertion. SQLite's
/// `AUTOINCREMENT` guarantees it is monotonic and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StudentId(pub i64);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl ToSql for StudentId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}

impl FromSql for StudentId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(StudentId)
    }
}

/// Entity types that travel over the change bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Students,
}

/// A persisted student row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub id: StudentId,
    /// Ordering key for every list read.
    pub name: String,
    pub course: String,
    pub phone: String,
    pub address: String,
    /// Name of the avatar resource shown next to the student; may be blank.
    pub avatar: String,
}

impl Student {
    /// Compare two students by the key the store sorts on: name in byte
    /// order, then identifier.
    pub fn order_key_cmp(&self, other: &Student) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.id.cmp(&other.id))
    }

    /// `Name (Course)` with the parenthesis omitted when the course is blank.
    pub fn display_name(&self) -> String {
        if self.course.trim().is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.course)
        }
    }
}

impl fmt::Display for Student {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Attribute set for a student that has not been persisted yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewStudent {
    pub name: String,
    pub course: String,
    pub phone: String,
    pub address: String,
    pub avatar: String,
}

impl NewStudent {
    /// Attach the identifier the store handed back.
    pub fn with_id(self, id: StudentId) -> Student {
        Student {
            id,
            name: self.name,
            course: self.course,
            phone: self.phone,
            address: self.address,
            avatar: self.avatar,
        }
    }
}
