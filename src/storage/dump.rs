//! DUMP/LOAD files: one `<table>.dump` per table holding the schema, a record
//! count and every record in address order. Each entry is decoded on its own so
//! the record size limit applies per record, not to the whole file.
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use bincode::{decode_from_std_read, encode_into_std_write};
use log::info;

use crate::database::{DbError, DbResult};

use super::{record::config, table::Schema};

pub const EXTENSION: &str = "dump";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpFile {
    pub schema: Schema,
    pub records: Vec<Vec<u8>>,
}

pub fn path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{table}.{EXTENSION}"))
}

pub fn write(dir: &Path, dump: &DumpFile) -> DbResult<i64> {
    let path = path(dir, &dump.schema.name);
    let mut writer = BufWriter::new(File::create(&path)?);
    encode_into_std_write(&dump.schema, &mut writer, config())?;
    encode_into_std_write(dump.records.len() as u64, &mut writer, config())?;
    for record in &dump.records {
        encode_into_std_write(record, &mut writer, config())?;
    }
    writer.flush()?;
    info!(
        "dumped {} records to {}",
        dump.records.len(),
        path.display()
    );
    Ok(dump.records.len() as i64)
}

pub fn read(dir: &Path, table: &str) -> DbResult<DumpFile> {
    let path = path(dir, table);
    let mut reader = BufReader::new(File::open(&path)?);
    let schema: Schema = decode_from_std_read(&mut reader, config())?;
    if schema.name != table {
        return Err(DbError::InvalidRecord(format!(
            "{} holds table {}",
            path.display(),
            schema.name
        )));
    }

    let count: u64 = decode_from_std_read(&mut reader, config())?;
    let mut records = Vec::new();
    for _ in 0..count {
        records.push(decode_from_std_read(&mut reader, config())?);
    }
    Ok(DumpFile { schema, records })
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn dump() -> DumpFile {
        DumpFile {
            schema: Schema {
                name: "items".into(),
                columns: vec!["name".into()],
                key: vec![],
            },
            records: vec![vec![1, 2, 3], vec![]],
        }
    }

    #[test]
    fn write_then_read() {
        let temp = TempDir::new("dump").unwrap();
        assert_eq!(write(temp.path(), &dump()).unwrap(), 2);
        assert!(temp.path().join("items.dump").exists());

        assert_eq!(read(temp.path(), "items").unwrap(), dump());
    }

    #[test]
    fn missing_file() {
        let temp = TempDir::new("dump").unwrap();
        assert!(matches!(read(temp.path(), "items"), Err(DbError::Io(_))));
    }

    #[test]
    fn oversized_record_is_rejected() {
        let temp = TempDir::new("dump").unwrap();
        write(temp.path(), &dump()).unwrap();

        let path = path(temp.path(), "items");
        let mut bytes = std::fs::read(&path).unwrap();
        let schema_len = bytes.len() - (8 + 8 + 3 + 8);
        // first record claims 2^40 bytes
        bytes[schema_len + 8..schema_len + 16].copy_from_slice(&(1_u64 << 40).to_be_bytes());
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(read(temp.path(), "items"), Err(DbError::Decode(_))));
    }

    #[test]
    fn huge_record_count_stops_at_end_of_file() {
        let temp = TempDir::new("dump").unwrap();
        write(temp.path(), &dump()).unwrap();

        let path = path(temp.path(), "items");
        let mut bytes = std::fs::read(&path).unwrap();
        let count_at = bytes.len() - (8 + 3 + 8) - 8;
        bytes[count_at..count_at + 8].copy_from_slice(&u64::MAX.to_be_bytes());
        std::fs::write(&path, bytes).unwrap();

        assert!(read(temp.path(), "items").is_err());
    }

    #[test]
    fn renamed_file_is_rejected() {
        let temp = TempDir::new("dump").unwrap();
        write(temp.path(), &dump()).unwrap();
        std::fs::rename(path(temp.path(), "items"), path(temp.path(), "other")).unwrap();

        assert!(matches!(
            read(temp.path(), "other"),
            Err(DbError::InvalidRecord(_))
        ));
    }
}
