pub mod common;
pub mod config;
pub mod db_check;
pub mod db_to_entry;
pub mod dtd;
pub mod grow_buf;
pub mod xml_cursor;
pub mod xml_to_db;
