//! Dialog state for adding, editing and batch deleting students.

use anyhow::{anyhow, Result};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};

use crate::models::{NewStudent, Student};

/// Form state shared by the add and edit dialogs.
#[derive(Default, Clone)]
pub(crate) struct StudentForm {
    pub(crate) name: String,
    pub(crate) course: String,
    pub(crate) phone: String,
    pub(crate) address: String,
    /// Carried through untouched; there is no avatar picker in the terminal.
    pub(crate) avatar: String,
    pub(crate) active: StudentField,
    pub(crate) error: Option<String>,
}

/// Enumerates the fields within the student form to drive focus management.
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub(crate) enum StudentField {
    #[default]
    Name,
    Course,
    Phone,
    Address,
}

impl StudentField {
    pub(crate) const ALL: [StudentField; 4] = [
        StudentField::Name,
        StudentField::Course,
        StudentField::Phone,
        StudentField::Address,
    ];

    pub(crate) fn label(self) -> &'static str {
        match self {
            StudentField::Name => "Name",
            StudentField::Course => "Course",
            StudentField::Phone => "Phone",
            StudentField::Address => "Address",
        }
    }
}

impl StudentForm {
    /// Populate the form from an existing student when entering edit mode.
    pub(crate) fn from_student(student: &Student) -> Self {
        Self {
            name: student.name.clone(),
            course: student.course.clone(),
            phone: student.phone.clone(),
            address: student.address.clone(),
            avatar: student.avatar.clone(),
            active: StudentField::Name,
            error: None,
        }
    }

    /// Cycle focus across the fields; `back` walks the other way.
    pub(crate) fn toggle_field(&mut self, back: bool) {
        let fields = StudentField::ALL;
        let current = fields
            .iter()
            .position(|f| *f == self.active)
            .unwrap_or_default();
        let next = if back {
            (current + fields.len() - 1) % fields.len()
        } else {
            (current + 1) % fields.len()
        };
        self.active = fields[next];
    }

    fn value_mut(&mut self, field: StudentField) -> &mut String {
        match field {
            StudentField::Name => &mut self.name,
            StudentField::Course => &mut self.course,
            StudentField::Phone => &mut self.phone,
            StudentField::Address => &mut self.address,
        }
    }

    fn value(&self, field: StudentField) -> &str {
        match field {
            StudentField::Name => &self.name,
            StudentField::Course => &self.course,
            StudentField::Phone => &self.phone,
            StudentField::Address => &self.address,
        }
    }

    /// Insert a character into the active field.
    pub(crate) fn push_char(&mut self, ch: char) -> bool {
        if ch.is_control() {
            return false;
        }
        if self.active == StudentField::Phone
            && !(ch.is_ascii_digit() || matches!(ch, ' ' | '+' | '-' | '(' | ')'))
        {
            return false;
        }
        let field = self.active;
        self.value_mut(field).push(ch);
        true
    }

    /// Remove the last character from the active field.
    pub(crate) fn backspace(&mut self) {
        let field = self.active;
        self.value_mut(field).pop();
    }

    /// Validate the inputs and return a record ready for persistence.
    pub(crate) fn parse_inputs(&self) -> Result<NewStudent> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(anyhow!("Student name is required."));
        }
        Ok(NewStudent {
            name: name.to_string(),
            course: self.course.trim().to_string(),
            phone: self.phone.trim().to_string(),
            address: self.address.trim().to_string(),
            avatar: self.avatar.clone(),
        })
    }

    /// Render a single line for the form widget.
    pub(crate) fn build_line(&self, field: StudentField) -> Line<'static> {
        let value = self.value(field);
        let is_active = self.active == field;

        let display = if value.is_empty() && field == StudentField::Name {
            "<required>".to_string()
        } else {
            value.to_string()
        };

        let style = if is_active {
            Style::default().fg(Color::Yellow)
        } else if value.is_empty() {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };

        Line::from(vec![
            Span::raw(format!("{}: ", field.label())),
            Span::styled(display, style),
        ])
    }

    /// Return the character count for the requested field.
    pub(crate) fn value_len(&self, field: StudentField) -> usize {
        self.value(field).chars().count()
    }
}

/// Pending "delete everything selected" confirmation.
#[derive(Clone)]
pub(crate) struct ConfirmBatchDelete {
    pub(crate) count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_required() {
        let form = StudentForm {
            name: "   ".to_string(),
            ..StudentForm::default()
        };
        assert!(form.parse_inputs().is_err());
    }

    #[test]
    fn inputs_are_trimmed() {
        let mut form = StudentForm::default();
        for ch in " Ana ".chars() {
            form.push_char(ch);
        }
        form.toggle_field(false);
        form.toggle_field(false);
        for ch in "600x1".chars() {
            form.push_char(ch);
        }
        let student = form.parse_inputs().unwrap();
        assert_eq!(student.name, "Ana");
        assert_eq!(student.phone, "6001");
    }

    #[test]
    fn focus_wraps_both_ways() {
        let mut form = StudentForm::default();
        form.toggle_field(true);
        assert!(form.active == StudentField::Address);
        form.toggle_field(false);
        assert!(form.active == StudentField::Name);
    }
}
