use std::fmt;

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint, Limit},
};

use crate::{
    database::{DbError, DbResult},
    protocol::codec::MAX_LENGTH,
};

/// Most bytes one record or dump entry decode may claim. Same as a wire buffer.
pub const MAX_RECORD_SIZE: usize = MAX_LENGTH;

pub(crate) type Config = Configuration<BigEndian, Fixint, Limit<MAX_RECORD_SIZE>>;

/// Encoding used for records and dump files. Length prefixes are checked against
/// the limit before anything is allocated for them.
pub(crate) fn config() -> Config {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
        .with_limit::<MAX_RECORD_SIZE>()
}

/// A row's fields, one opaque byte string per column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct Record {
    fields: Vec<Vec<u8>>,
}

impl Record {
    pub fn new(fields: Vec<Vec<u8>>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Vec<u8>] {
        &self.fields
    }

    pub fn get(&self, i: usize) -> Option<&[u8]> {
        self.fields.get(i).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn pack(&self) -> DbResult<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, config())?)
    }

    pub fn unpack(bytes: &[u8]) -> DbResult<Record> {
        let (record, read): (Record, usize) = bincode::decode_from_slice(bytes, config())?;
        if read != bytes.len() {
            return Err(DbError::InvalidRecord(format!(
                "{} trailing bytes",
                bytes.len() - read
            )));
        }
        Ok(record)
    }
}

impl<S: AsRef<[u8]>> From<Vec<S>> for Record {
    fn from(fields: Vec<S>) -> Self {
        Self {
            fields: fields.iter().map(|f| f.as_ref().to_vec()).collect(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", String::from_utf8_lossy(field))?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_unpack() {
        let record = Record::from(vec!["apple", "", "3"]);
        let packed = record.pack().unwrap();

        let unpacked = Record::unpack(&packed).unwrap();
        assert_eq!(unpacked, record);
        assert_eq!(unpacked.get(0), Some(&b"apple"[..]));
        assert_eq!(unpacked.get(3), None);
    }

    #[test]
    fn trailing_bytes_are_invalid() {
        let mut packed = Record::from(vec!["a"]).pack().unwrap();
        packed.push(0);
        assert!(matches!(
            Record::unpack(&packed),
            Err(DbError::InvalidRecord(_))
        ));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(Record::unpack(&[0xff; 3]), Err(DbError::Decode(_))));
    }

    #[test]
    fn huge_field_count_is_rejected() {
        // 2^40 fields claimed by an eight byte record
        assert!(matches!(
            Record::unpack(&[0, 0, 1, 0, 0, 0, 0, 0]),
            Err(DbError::Decode(_))
        ));
        let mut bytes = u64::MAX.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0; 16]);
        assert!(matches!(Record::unpack(&bytes), Err(DbError::Decode(_))));
    }

    #[test]
    fn huge_field_length_is_rejected() {
        let mut bytes = 1_u64.to_be_bytes().to_vec();
        bytes.extend_from_slice(&(1_u64 << 40).to_be_bytes());
        bytes.extend_from_slice(b"abc");
        assert!(matches!(Record::unpack(&bytes), Err(DbError::Decode(_))));
    }

    #[test]
    fn display() {
        assert_eq!(
            Record::from(vec!["apple", "3"]).to_string(),
            r#"("apple", "3")"#
        );
    }
}
