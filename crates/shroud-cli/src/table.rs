use std::io::IsTerminal;

use comfy_table::{presets::NOTHING, Attribute, Cell, Table};

use shroud_core::StagedRef;

use crate::format::short_oid;

/// Whether tables may use bold headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TableStyle {
    pub bold: bool,
}

impl TableStyle {
    pub(crate) fn detect() -> Self {
        let is_tty = std::io::stdout().is_terminal();
        let no_color = std::env::var_os("NO_COLOR").is_some();
        Self {
            bold: is_tty && !no_color,
        }
    }

    fn cell(self, text: &str) -> Cell {
        let cell = Cell::new(text);
        if self.bold {
            cell.add_attribute(Attribute::Bold)
        } else {
            cell
        }
    }

    pub(crate) fn kv_table(self) -> Table {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table
    }

    pub(crate) fn add_kv_row(self, table: &mut Table, field: &str, value: impl ToString) {
        table.add_row(vec![self.cell(field), Cell::new(value.to_string())]);
    }

    /// One row per staged ref: source name, staging name and both oids.
    pub(crate) fn staged_table(self, refs: &[StagedRef]) -> Table {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_header(
            ["Ref", "Staged as", "Source", "Target"]
                .iter()
                .map(|h| self.cell(h))
                .collect::<Vec<_>>(),
        );
        for r in refs {
            table.add_row(vec![
                Cell::new(&r.name),
                Cell::new(&r.staged),
                Cell::new(short_oid(&r.source)),
                Cell::new(short_oid(&r.target)),
            ]);
        }
        table
    }
}
