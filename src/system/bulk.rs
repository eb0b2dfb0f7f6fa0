// src/system/bulk.rs

//! Tab-delimited bulk load and unload over any [`Session`](crate::system::backend::Session).

use crate::{
    constants::PROGRESS_INTERVAL,
    system::{
        backend::{ColumnInfo, Session},
        executor::ExecutionError,
    },
};
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
    str::FromStr,
};

/// Direction of a bulk transfer, seen from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkDirection {
    /// File into table.
    In,
    /// Table into file.
    Out,
}

impl FromStr for BulkDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            other => Err(format!("Unknown bulk direction '{}'. Expected 'in' or 'out'.", other)),
        }
    }
}

/// Splits one tab-delimited data line.
pub fn split_fields(line: &str) -> Vec<String> {
    line.trim_end_matches(['\r', '\n'])
        .split('\t')
        .map(str::to_string)
        .collect()
}

/// Fits a data row to the destination columns.
///
/// Fields beyond the last column are joined onto it with tabs, missing
/// fields become empty, and empty numeric fields become `0`.
pub fn coerce_row(mut fields: Vec<String>, columns: &[ColumnInfo]) -> Vec<String> {
    let count = columns.len();
    if count > 0 && fields.len() > count {
        let extra = fields.split_off(count);
        if let Some(last) = fields.last_mut() {
            for field in extra {
                last.push('\t');
                last.push_str(&field);
            }
        }
    }
    fields.resize(count, String::new());

    for (field, column) in fields.iter_mut().zip(columns) {
        if field.is_empty() && column.is_numeric() {
            field.push('0');
        }
    }
    fields
}

/// Calls `progress` on every `PROGRESS_INTERVAL`th row.
fn tick(count: &mut u64, progress: &mut dyn FnMut(u64)) {
    *count += 1;
    if *count % PROGRESS_INTERVAL == 0 {
        progress(*count);
    }
}

/// Moves rows between `table` and a tab-delimited `data_file`.
pub fn bulk_copy(
    session: &mut dyn Session,
    table: &str,
    direction: BulkDirection,
    data_file: &Path,
    progress: &mut dyn FnMut(u64),
) -> Result<u64, ExecutionError> {
    match direction {
        BulkDirection::In => bulk_in(session, table, data_file, progress),
        BulkDirection::Out => bulk_out(session, table, data_file, progress),
    }
}

fn bulk_in(
    session: &mut dyn Session,
    table: &str,
    data_file: &Path,
    progress: &mut dyn FnMut(u64),
) -> Result<u64, ExecutionError> {
    let columns = session.table_columns(table)?;
    if columns.is_empty() {
        return Err(ExecutionError::Server(format!(
            "Table '{}' does not exist or has no columns.",
            table
        )));
    }
    log::debug!("Loading '{}' into {} ({} columns).", data_file.display(), table, columns.len());

    let reader = BufReader::new(File::open(data_file)?);
    let mut read_error = None;
    let mut count = 0u64;
    let loaded = {
        let mut rows = reader
            .lines()
            .map_while(|line| match line {
                Ok(line) => Some(line),
                Err(e) => {
                    read_error = Some(e);
                    None
                }
            })
            .filter(|line| !line.is_empty())
            .map(|line| coerce_row(split_fields(&line), &columns))
            .inspect(|_| tick(&mut count, progress));
        session.bulk_insert(table, &columns, &mut rows)?
    };

    if let Some(e) = read_error {
        return Err(ExecutionError::Io(e));
    }
    Ok(loaded)
}

fn bulk_out(
    session: &mut dyn Session,
    table: &str,
    data_file: &Path,
    progress: &mut dyn FnMut(u64),
) -> Result<u64, ExecutionError> {
    let mut writer = BufWriter::new(File::create(data_file)?);
    let mut count = 0u64;
    let exported = session.bulk_export(table, &mut |fields| {
        writeln!(writer, "{}", fields.join("\t"))?;
        tick(&mut count, progress);
        Ok(())
    })?;
    writer.flush()?;
    log::debug!("Exported {} row(s) from {} to '{}'.", exported, table, data_file.display());
    Ok(exported)
}
