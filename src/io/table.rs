/*
Copyright 2025 Jakub Lewandowski

This file is part of Shybox.

Shybox is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

Shybox is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with Shybox. If not, see https://www.gnu.org/licenses/.
*/

//! Codecs of tabular and text files, passed through without
//! the gridded pipeline.

use super::{FileIo, WriteOptions};
use crate::{
    errors::CodecError,
    grid::{Payload, Table},
};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::Path,
};

fn unsupported(format: &str, payload: &Payload) -> CodecError {
    CodecError::UnsupportedFormat(format!("{} of {}", format, payload.kind()))
}

/// Delimited text tables. The delimiter of read files is detected
/// from the header line.
#[derive(Copy, Clone, Debug)]
pub struct CsvTable {
    pub delimiter: u8,
}

impl Default for CsvTable {
    fn default() -> Self {
        CsvTable { delimiter: b';' }
    }
}

impl FileIo for CsvTable {
    fn read(
        &self,
        path: &Path,
        _file_type: &str,
        _variables: &[String],
    ) -> Result<Payload, CodecError> {
        let text = fs::read_to_string(path)?;
        let header = text.lines().next().unwrap_or_default();
        let delimiter = [b';', b',', b'\t']
            .into_iter()
            .find(|d| header.as_bytes().contains(d))
            .unwrap_or(self.delimiter);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader.headers()?.iter().map(String::from).collect();
        let mut rows = vec![];
        for record in reader.records() {
            rows.push(record?.iter().map(String::from).collect());
        }

        Ok(Payload::Table(Table { headers, rows }))
    }

    fn write(
        &self,
        payload: &Payload,
        path: &Path,
        _file_type: &str,
        options: &WriteOptions,
    ) -> Result<(), CodecError> {
        let table = match payload {
            Payload::Table(table) => table,
            other => return Err(unsupported("csv", other)),
        };

        let append = options.append && path.exists();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(path)?;

        let mut out_file = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(file);

        if !append {
            out_file.write_record(&table.headers)?;
        }
        for row in &table.rows {
            out_file.write_record(row)?;
        }

        out_file.flush()?;
        Ok(())
    }
}

/// Json documents. Tables are written as arrays of records.
#[derive(Copy, Clone, Debug, Default)]
pub struct JsonDocument;

impl FileIo for JsonDocument {
    fn read(
        &self,
        path: &Path,
        _file_type: &str,
        _variables: &[String],
    ) -> Result<Payload, CodecError> {
        let file = fs::File::open(path)?;
        Ok(Payload::Json(serde_json::from_reader(file)?))
    }

    fn write(
        &self,
        payload: &Payload,
        path: &Path,
        _file_type: &str,
        _options: &WriteOptions,
    ) -> Result<(), CodecError> {
        let value = match payload {
            Payload::Json(value) => value.clone(),
            Payload::Table(table) => serde_json::Value::Array(
                table
                    .rows
                    .iter()
                    .map(|row| {
                        serde_json::Value::Object(
                            table
                                .headers
                                .iter()
                                .cloned()
                                .zip(row.iter().cloned().map(serde_json::Value::String))
                                .collect(),
                        )
                    })
                    .collect(),
            ),
            other => return Err(unsupported("json", other)),
        };

        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &value)?;
        Ok(())
    }
}

/// Plain text files, also used for the generic `file` format.
#[derive(Copy, Clone, Debug, Default)]
pub struct PlainText;

impl FileIo for PlainText {
    fn read(
        &self,
        path: &Path,
        _file_type: &str,
        _variables: &[String],
    ) -> Result<Payload, CodecError> {
        Ok(Payload::Text(fs::read_to_string(path)?))
    }

    fn write(
        &self,
        payload: &Payload,
        path: &Path,
        _file_type: &str,
        options: &WriteOptions,
    ) -> Result<(), CodecError> {
        let text = match payload {
            Payload::Text(text) => text,
            other => return Err(unsupported("text", other)),
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(options.append)
            .truncate(!options.append)
            .open(path)?;
        file.write_all(text.as_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CsvTable, JsonDocument, PlainText};
    use crate::{
        grid::{Payload, Table},
        io::{FileIo, WriteOptions},
    };

    fn sections() -> Table {
        Table {
            headers: vec!["name".to_string(), "discharge".to_string()],
            rows: vec![
                vec!["Arno".to_string(), "120.5".to_string()],
                vec!["Tevere".to_string(), "80.1".to_string()],
            ],
        }
    }

    #[test]
    fn csv_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sections.csv");
        let table = Payload::Table(sections());

        CsvTable::default()
            .write(&table, &path, "points_section_db", &WriteOptions::default())
            .unwrap();
        let append = WriteOptions {
            append: true,
            time: None,
        };
        CsvTable::default()
            .write(&table, &path, "points_section_db", &append)
            .unwrap();

        match CsvTable::default().read(&path, "points_section_db", &[]).unwrap() {
            Payload::Table(read) => {
                assert_eq!(read.headers, sections().headers);
                assert_eq!(read.rows.len(), 4);
                assert_eq!(read.column("discharge").unwrap()[3], "80.1");
            }
            other => panic!("unexpected payload {}", other.kind()),
        }
    }

    #[test]
    fn comma_separated_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.csv");
        std::fs::write(&path, "code,lon,lat\nA1,12.1,43.9\n").unwrap();

        match CsvTable::default().read(&path, "", &[]).unwrap() {
            Payload::Table(read) => assert_eq!(read.column("lat").unwrap(), vec!["43.9"]),
            other => panic!("unexpected payload {}", other.kind()),
        }
    }

    #[test]
    fn json_from_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sections.json");

        JsonDocument
            .write(&Payload::Table(sections()), &path, "", &WriteOptions::default())
            .unwrap();

        match JsonDocument.read(&path, "", &[]).unwrap() {
            Payload::Json(value) => assert_eq!(value[1]["name"], "Tevere"),
            other => panic!("unexpected payload {}", other.kind()),
        }
    }

    #[test]
    fn text_rejects_grids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("info.txt");
        let grid = crate::grid::tests::sample_grid("a", 2, 2, 0.0);

        assert!(PlainText
            .write(&Payload::Grid(grid), &path, "", &WriteOptions::default())
            .is_err());
    }
}
