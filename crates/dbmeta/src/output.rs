use std::fmt::Write;
use std::sync::Arc;

use dbmeta_postgres::{Database, RelationKind, Setting, Table as Relation};
use prettytable::format::consts::FORMAT_CLEAN;
use prettytable::{Table, row};

pub fn databases_table(databases: &[Arc<Database>], active: &str) -> Table {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => "", "Name", "Owner", "Encoding", "Flags"]);

    for database in databases {
        let info = database.info();
        let marker = if database.name() == active { "*" } else { "" };

        let mut flags = Vec::new();
        if info.is_template {
            flags.push("template");
        }
        if !info.allow_connections {
            flags.push("no connections");
        }

        table.add_row(row![
            marker,
            database.name(),
            info.owner.as_deref().unwrap_or("-"),
            info.encoding.as_deref().unwrap_or("-"),
            flags.join(", "),
        ]);
    }
    table
}

pub fn settings_table(settings: &[Arc<Setting>]) -> Table {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => "Name", "Setting", "Unit", "Category"]);

    for setting in settings {
        let value = setting.value();
        table.add_row(row![
            setting.name(),
            value.setting,
            value.unit.unwrap_or_default(),
            value.category.unwrap_or_default(),
        ]);
    }
    table
}

pub fn setting_details(setting: &Setting) -> Table {
    let value = setting.value();
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.add_row(row![r->"Name:", setting.name()]);
    table.add_row(row![r->"Setting:", value.setting]);
    if let Some(unit) = value.unit {
        table.add_row(row![r->"Unit:", unit]);
    }
    if let Some(category) = value.category {
        table.add_row(row![r->"Category:", category]);
    }
    if let Some(description) = value.description {
        table.add_row(row![r->"Description:", description]);
    }
    table
}

fn describe_relation(table: &Relation) -> String {
    let kind = match table.kind() {
        RelationKind::Table => "table",
        RelationKind::View => "view",
        RelationKind::MaterializedView => "materialized view",
        RelationKind::ForeignTable => "foreign table",
        RelationKind::PartitionedTable => "partitioned table",
    };
    match table.rows() {
        Some(rows) => format!("{} ({kind}, ~{rows} rows)", table.name()),
        None => format!("{} ({kind})", table.name()),
    }
}

/// Renders the cached part of the metadata tree.
///
/// Levels that were not read yet are left out.
pub fn render_tree(databases: &[Arc<Database>]) -> String {
    let mut out = String::new();
    for database in databases {
        writeln!(out, "{}", database.name()).ok();
        for schema in database.schema_cache().get_cached_objects() {
            writeln!(out, "  {}", schema.name()).ok();
            for table in schema.table_cache().get_cached_objects() {
                writeln!(out, "    {}", describe_relation(&table)).ok();
            }
        }
    }
    out
}
