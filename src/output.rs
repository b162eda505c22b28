use std::path::PathBuf;

use csv_core::WriteResult;

use crate::registers::{Register, Value};

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone)]
#[group(id = "output::Args")]
pub struct Args {
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not encode `{0}` as a CSV field")]
    EncodeCsv(String),
    #[error("could not serialize registers to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

impl Args {
    pub fn to_output(self) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        let formatter = match &self.format {
            Format::Table => Formatter::Table { comfy: None },
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv { written_header: false },
        };
        Ok(Output { args: self, io, formatter })
    }
}

/// One register value as it is written out by `read` and `write`.
#[derive(serde::Serialize)]
pub struct RegisterRecord<'a> {
    pub id: i32,
    pub name: &'a str,
    pub value: Option<Value>,
    pub unit: &'a str,
    pub raw: i32,
    pub previous_raw: i32,
    pub class: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a> RegisterRecord<'a> {
    pub const HEADERS: [&'static str; 7] =
        ["Id", "Name", "Value", "Unit", "Raw", "Previous raw", "Class"];

    pub fn new(register: &'a Register) -> Self {
        let (value, error) = match register.from_heat_pump() {
            Ok(value) => (Some(value), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            id: register.id(),
            name: register.name(),
            value,
            unit: register.unit(),
            raw: register.raw_value(),
            previous_raw: register.previous_raw_value(),
            class: register.class().name(),
            error,
        }
    }

    fn row(&self) -> Vec<String> {
        let value = match (&self.value, &self.error) {
            (Some(value), _) => value.to_string(),
            (None, Some(error)) => format!("<{error}>"),
            (None, None) => String::new(),
        };
        vec![
            self.id.to_string(),
            self.name.to_string(),
            value,
            self.unit.to_string(),
            self.raw.to_string(),
            self.previous_raw.to_string(),
            self.class.to_string(),
        ]
    }
}

pub struct Output {
    args: Args,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
}

enum Formatter {
    Csv { written_header: bool },
    /// Rows accumulate until [`Output::flush_batch`] renders them as one table.
    Table { comfy: Option<comfy_table::Table> },
    Jsonl,
}

impl Output {
    fn write_csv_row<V: std::ops::Deref<Target = str>>(
        &mut self,
        values: &[V],
    ) -> Result<(), Error> {
        let max_len = 2 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut output = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        let mut line = Vec::new();
        for (index, value) in values.iter().enumerate() {
            if index != 0 {
                let (_, ob) = writer.delimiter(&mut output);
                line.extend_from_slice(&output[..ob]);
            }
            let (WriteResult::InputEmpty, _, ob) = writer.field(value.as_bytes(), &mut output)
            else {
                return Err(Error::EncodeCsv((**value).to_string()));
            };
            line.extend_from_slice(&output[..ob]);
        }
        let (_, ob) = writer.terminator(&mut output);
        line.extend_from_slice(&output[..ob]);
        self.io.write_all(&line).map_err(|e| self.write_error(e))
    }

    /// Emit one record, rendered as a row or as a JSON object depending on the format.
    pub fn record<R: serde::Serialize>(
        &mut self,
        headers: &[&'static str],
        table_row: impl FnOnce() -> Vec<String>,
        serde_record: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_header } => {
                if !*written_header {
                    *written_header = true;
                    self.write_csv_row(headers)?;
                }
                let values = table_row();
                self.write_csv_row(&values)?;
            }
            Formatter::Table { comfy } => {
                let comfy = comfy.get_or_insert_with(|| {
                    let mut comfy = comfy_table::Table::new();
                    comfy.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                    comfy.set_header(headers.to_vec());
                    comfy
                });
                comfy.add_row(table_row());
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, &serde_record())
                    .map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?
            }
        }
        Ok(())
    }

    pub fn register(&mut self, register: &Register) -> Result<(), Error> {
        let record = RegisterRecord::new(register);
        self.record(&RegisterRecord::HEADERS, || record.row(), || &record)
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.args.output {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.into()),
        }
    }

    /// Write out whatever has been buffered so far, e.g. at the end of one watch round.
    pub fn flush_batch(&mut self) -> Result<(), Error> {
        if let Formatter::Table { comfy } = &mut self.formatter {
            if let Some(comfy) = comfy.take() {
                let rendered = format!("{comfy}\n");
                self.io.write_all(rendered.as_bytes()).map_err(|e| self.write_error(e))?;
            }
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }

    pub fn commit(mut self) -> Result<(), Error> {
        self.flush_batch()
    }
}
