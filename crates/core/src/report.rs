//! Plain-text report of the accounts created in a pass.

use chrono::{DateTime, Local};
use comfy_table::{presets::ASCII_FULL, Cell, CellAlignment, Table};

use crate::models::TargetAccount;

/// Heading line above the table.
pub const REPORT_HEADING: &str = "New Users Created in FreeIPA:";

/// Render the created accounts as a table: numeric ID, login, email, initial
/// password. Rows keep the order of `accounts`.
pub fn render(accounts: &[TargetAccount]) -> String {
    let mut table = Table::new();
    table.load_preset(ASCII_FULL);
    table.set_header(vec!["UIDNumber", "UID", "Email", "Password"]);

    for account in accounts {
        table.add_row(vec![
            Cell::new(account.uid_number).set_alignment(CellAlignment::Right),
            Cell::new(&account.login),
            Cell::new(&account.mail),
            Cell::new(&account.password),
        ]);
    }

    format!("{}\n\n{}\n", REPORT_HEADING, table)
}

/// Email subject for a report generated at `at`.
pub fn subject(at: DateTime<Local>) -> String {
    format!("AAD to FreeIPA Sync Report - {}", at.format("%Y-%m-%d %H:%M:%S"))
}
