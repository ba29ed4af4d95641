//! The fixed-layout row record stored in every leaf cell.
//!
//! `id` at offset 0, `user_name` at offset 4 (31 chars + NUL), `email` at
//! offset 36 (255 chars + NUL); 292 bytes total. Unlike the schema-driven,
//! variable-column `Row` this lineage uses elsewhere, this table has exactly
//! one shape, so serialization is direct field-to-offset copying rather than
//! a generic column encoder.

use crate::err;
use crate::errors::Error;

pub const USERNAME_LEN: usize = 32;
pub const EMAIL_LEN: usize = 256;
pub const ROW_SIZE: usize = 4 + USERNAME_LEN + EMAIL_LEN;

const ID_OFFSET: usize = 0;
const USERNAME_OFFSET: usize = 4;
const EMAIL_OFFSET: usize = USERNAME_OFFSET + USERNAME_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: u32,
    pub user_name: String,
    pub email: String,
}

impl Row {
    pub fn new(id: u32, user_name: &str, email: &str) -> Result<Self, Error> {
        validate_field_len("user_name", user_name, USERNAME_LEN - 1)?;
        validate_field_len("email", email, EMAIL_LEN - 1)?;
        Ok(Row {
            id,
            user_name: user_name.to_string(),
            email: email.to_string(),
        })
    }

    pub fn serialize(&self) -> [u8; ROW_SIZE] {
        let mut buf = [0u8; ROW_SIZE];
        buf[ID_OFFSET..ID_OFFSET + 4].copy_from_slice(&self.id.to_le_bytes());
        write_fixed_str(&mut buf[USERNAME_OFFSET..USERNAME_OFFSET + USERNAME_LEN], &self.user_name);
        write_fixed_str(&mut buf[EMAIL_OFFSET..EMAIL_OFFSET + EMAIL_LEN], &self.email);
        buf
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() != ROW_SIZE {
            return Err(err!(Storage, "row buffer has wrong size: {}", buf.len()));
        }
        let id = u32::from_le_bytes(buf[ID_OFFSET..ID_OFFSET + 4].try_into().unwrap());
        let user_name = read_fixed_str(&buf[USERNAME_OFFSET..USERNAME_OFFSET + USERNAME_LEN])?;
        let email = read_fixed_str(&buf[EMAIL_OFFSET..EMAIL_OFFSET + EMAIL_LEN])?;
        Ok(Row { id, user_name, email })
    }
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.id, self.user_name, self.email)
    }
}

fn validate_field_len(field: &str, value: &str, max: usize) -> Result<(), Error> {
    if value.len() > max {
        return Err(err!(
            InvalidInput,
            "{} is {} bytes, exceeds the fixed {}-byte field",
            field,
            value.len(),
            max
        ));
    }
    Ok(())
}

fn write_fixed_str(dst: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    dst[..bytes.len()].copy_from_slice(bytes);
    for b in &mut dst[bytes.len()..] {
        *b = 0;
    }
}

fn read_fixed_str(src: &[u8]) -> Result<String, Error> {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8(src[..end].to_vec()).map_err(|e| err!(Storage, "row field is not valid utf-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_serialize_deserialize() {
        let row = Row::new(7, "user", "user@example.com").unwrap();
        let buf = row.serialize();
        let back = Row::deserialize(&buf).unwrap();
        assert_eq!(row, back);
    }

    #[test]
    fn rejects_oversized_user_name() {
        let long = "a".repeat(USERNAME_LEN);
        assert!(Row::new(1, &long, "e@x").is_err());
    }

    #[test]
    fn rejects_oversized_email() {
        let long = "a".repeat(EMAIL_LEN);
        assert!(Row::new(1, "u", &long).is_err());
    }

    #[test]
    fn pads_short_fields_with_zeroes() {
        let row = Row::new(1, "u", "e").unwrap();
        let buf = row.serialize();
        assert_eq!(buf[USERNAME_OFFSET + 1], 0);
        assert_eq!(buf[EMAIL_OFFSET + 1], 0);
    }
}
