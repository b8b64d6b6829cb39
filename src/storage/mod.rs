pub mod blob;
pub mod migrations;
pub mod sqlite;
