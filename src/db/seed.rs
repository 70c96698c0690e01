//! Demo roster written into an empty database.

use tracing::info;

use super::students::StudentStore;
use crate::error::StoreError;
use crate::models::NewStudent;

/// Demo roster used on first launch so the list has something to show.
const DEMO_STUDENTS: &[(&str, &str, &str, &str)] = &[
    ("Baldomero Llégate Ligero", "2CFGS", "666 666 666", "C/ Mayor 1"),
    ("Germán Ginés Picasso", "1CFGS", "677 777 777", "C/ Sol 12"),
    ("Lucía Puente Alto", "2CFGS", "688 888 888", "Av. del Puerto 3"),
    ("Marta Orozco Vela", "1CFGS", "699 999 999", "Plaza Alta 7"),
];

/// Insert the demo roster when the table is empty. Returns how many rows were
/// added.
pub fn seed_if_empty(store: &dyn StudentStore) -> Result<usize, StoreError> {
    if !store.read_all()?.is_empty() {
        return Ok(0);
    }

    for (name, course, phone, address) in DEMO_STUDENTS {
        store.create(&NewStudent {
            name: name.to_string(),
            course: course.to_string(),
            phone: phone.to_string(),
            address: address.to_string(),
            avatar: String::new(),
        })?;
    }
    info!(count = DEMO_STUDENTS.len(), "seeded demo students");
    Ok(DEMO_STUDENTS.len())
}
