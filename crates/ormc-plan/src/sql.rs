//! Parameterized SQL text builder.
//!
//! Placeholders are numbered in the order they are written, which is also
//! the order of the statement's parameter slots.

use ormc_schema::Dialect;

use crate::slot::Slot;

pub(crate) struct SqlWriter {
    dialect: &'static dyn Dialect,
    text: String,
    params: usize,
}

impl SqlWriter {
    pub(crate) fn new(dialect: &'static dyn Dialect) -> Self {
        SqlWriter {
            dialect,
            text: String::new(),
            params: 0,
        }
    }

    pub(crate) fn push(&mut self, s: &str) -> &mut Self {
        self.text.push_str(s);
        self
    }

    pub(crate) fn ident(&mut self, name: &str) -> &mut Self {
        let quoted = self.dialect.quote(name);
        self.text.push_str(&quoted);
        self
    }

    /// `"table"."column"`.
    pub(crate) fn qualified(&mut self, table: &str, column: &str) -> &mut Self {
        self.ident(table).push(".").ident(column)
    }

    pub(crate) fn param(&mut self) -> &mut Self {
        self.params += 1;
        let placeholder = self.dialect.placeholder(self.params);
        self.text.push_str(&placeholder);
        self
    }

    /// Comma-separated qualified select list.
    pub(crate) fn select_list<'a>(&mut self, items: impl IntoIterator<Item = (&'a str, &'a Slot)>) -> &mut Self {
        for (i, (table, slot)) in items.into_iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.qualified(table, &slot.column);
        }
        self
    }

    /// `"t"."a" = ? AND "t"."b" = ?`.
    pub(crate) fn where_eq(&mut self, table: &str, slots: &[Slot]) -> &mut Self {
        for (i, slot) in slots.iter().enumerate() {
            if i > 0 {
                self.push(" AND ");
            }
            self.qualified(table, &slot.column).push(" = ").param();
        }
        self
    }

    pub(crate) fn finish(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}
